//! A single WebSocket connection to the dispatch server.
//!
//! [`DeviceSocket`] is deliberately dumb: it connects once, writes and
//! reads frames. Reconnection and routing live in `buson-core`, which
//! owns the socket exclusively so there is only ever one writer per
//! connection.
//!
//! # Example
//!
//! ```rust,ignore
//! use std::time::Duration;
//! use buson_api::{DeviceSocket, TransportConfig, device_ws_url};
//!
//! let url = device_ws_url("192.168.0.10", 3000)?;
//! let mut socket = DeviceSocket::connect(&url, &TransportConfig::default()).await?;
//!
//! while let Some(text) = socket.recv(Duration::from_millis(200)).await? {
//!     println!("{text}");
//! }
//!
//! socket.close().await;
//! ```

use std::time::Duration;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::{self, ClientRequestBuilder, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use url::Url;

use crate::error::Error;
use crate::protocol::Outbound;
use crate::transport::TransportConfig;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Close code reported when the stream ends without a close frame.
const ABNORMAL_CLOSURE: u16 = 1006;

/// An open device connection.
pub struct DeviceSocket {
    url: Url,
    write: SplitSink<WsStream, Message>,
    read: SplitStream<WsStream>,
}

impl std::fmt::Debug for DeviceSocket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceSocket")
            .field("url", &self.url.as_str())
            .finish_non_exhaustive()
    }
}

impl DeviceSocket {
    /// Open a connection, bounded by `transport.connect_timeout`.
    pub async fn connect(url: &Url, transport: &TransportConfig) -> Result<Self, Error> {
        tracing::debug!(url = %url, "opening device socket");

        let uri: tungstenite::http::Uri = url
            .as_str()
            .parse()
            .map_err(|e: tungstenite::http::uri::InvalidUri| Error::WebSocketConnect(e.to_string()))?;

        let request =
            ClientRequestBuilder::new(uri).with_header("User-Agent", transport.user_agent.clone());

        let (ws_stream, _response) =
            tokio::time::timeout(transport.connect_timeout, tokio_tungstenite::connect_async(request))
                .await
                .map_err(|_| Error::Timeout {
                    timeout_ms: duration_ms(transport.connect_timeout),
                })?
                .map_err(|e| Error::WebSocketConnect(e.to_string()))?;

        let (write, read) = ws_stream.split();

        Ok(Self {
            url: url.clone(),
            write,
            read,
        })
    }

    /// Serialize and write one message.
    pub async fn send(&mut self, message: &Outbound) -> Result<(), Error> {
        let text = message.to_json()?;
        tracing::trace!(kind = message.kind(), "sending frame");
        self.send_text(text).await
    }

    pub async fn send_text(&mut self, text: String) -> Result<(), Error> {
        self.write
            .send(Message::text(text))
            .await
            .map_err(|e| Error::Send(e.to_string()))
    }

    /// Wait up to `wait` for the next text frame.
    ///
    /// `Ok(None)` means nothing arrived in time, or a control/binary frame
    /// was consumed. A close frame or end of stream is an error: the
    /// caller must reconnect.
    pub async fn recv(&mut self, wait: Duration) -> Result<Option<String>, Error> {
        let Ok(frame) = tokio::time::timeout(wait, self.read.next()).await else {
            return Ok(None);
        };

        match frame {
            Some(Ok(Message::Text(text))) => Ok(Some(text.as_str().to_owned())),
            Some(Ok(Message::Close(frame))) => {
                let (code, reason) = frame.map_or_else(
                    || (ABNORMAL_CLOSURE, "close frame without payload".to_owned()),
                    |cf| (u16::from(cf.code), cf.reason.as_str().to_owned()),
                );
                tracing::info!(code, reason = %reason, "close frame received");
                Err(Error::WebSocketClosed { code, reason })
            }
            Some(Ok(Message::Ping(_))) => {
                // tungstenite queues the pong itself
                tracing::trace!("ping");
                Ok(None)
            }
            Some(Ok(_)) => Ok(None),
            Some(Err(e)) => Err(Error::Receive(e.to_string())),
            None => Err(Error::WebSocketClosed {
                code: ABNORMAL_CLOSURE,
                reason: "stream ended".into(),
            }),
        }
    }

    /// Best-effort close handshake.
    pub async fn close(mut self) {
        if let Err(e) = self.write.send(Message::Close(None)).await {
            tracing::debug!(error = %e, "close frame not delivered");
        }
        let _ = self.write.close().await;
    }
}

fn duration_ms(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}
