// buson-api: wire protocol and WebSocket transport for bus terminal devices

pub mod error;
pub mod protocol;
pub mod transport;
pub mod websocket;

pub use error::Error;
pub use protocol::{
    DeviceInfo, HelloPayload, InboundKind, InboundMessage, Outbound, Position, RideResponsePayload,
    TelemetryPayload,
};
pub use transport::{DEFAULT_PORT, DEVICE_WS_PATH, TransportConfig, USER_AGENT, device_ws_url, local_ip};
pub use websocket::DeviceSocket;
