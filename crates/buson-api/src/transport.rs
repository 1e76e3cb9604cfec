// Shared transport settings for opening device sockets.
//
// The link loop re-reads its configuration on every connection attempt,
// so these are plain values rebuilt per attempt rather than a client
// object kept alive across reconnects.

use std::net::{IpAddr, Ipv4Addr, UdpSocket};
use std::time::Duration;

use url::Url;

use crate::error::Error;

/// Path the dispatch server serves the device channel on.
pub const DEVICE_WS_PATH: &str = "/device-ws";

/// Port the dispatch server listens on unless configured otherwise.
pub const DEFAULT_PORT: u16 = 3000;

/// `User-Agent` sent with the upgrade request.
pub const USER_AGENT: &str = "buson-device";

/// Transport settings for a single connection attempt.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Upper bound on TCP connect + WebSocket handshake.
    pub connect_timeout: Duration,
    pub user_agent: String,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(3),
            user_agent: USER_AGENT.into(),
        }
    }
}

/// Build `ws://<host>:<port>/device-ws`.
pub fn device_ws_url(host: &str, port: u16) -> Result<Url, Error> {
    let url = Url::parse(&format!("ws://{host}:{port}{DEVICE_WS_PATH}"))?;
    Ok(url)
}

/// Address of the interface the device would use to reach the outside
/// world, or `0.0.0.0` when there is no route.
///
/// Connecting a UDP socket only selects a route; no packet is sent.
pub fn local_ip() -> IpAddr {
    let probe = || -> std::io::Result<IpAddr> {
        let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))?;
        socket.connect((Ipv4Addr::new(8, 8, 8, 8), 80))?;
        Ok(socket.local_addr()?.ip())
    };
    probe().unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn builds_device_ws_url() {
        let url = device_ws_url("192.168.0.10", DEFAULT_PORT).unwrap();
        assert_eq!(url.as_str(), "ws://192.168.0.10:3000/device-ws");
    }

    #[test]
    fn rejects_garbage_host() {
        assert!(device_ws_url("not a host", 3000).is_err());
    }

    #[test]
    fn default_transport_uses_device_user_agent() {
        let config = TransportConfig::default();
        assert_eq!(config.user_agent, "buson-device");
        assert_eq!(config.connect_timeout, Duration::from_secs(3));
    }
}
