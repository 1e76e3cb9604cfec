// buson-core: device link, command dispatch and shared device state for bus terminals.

pub mod config;
pub mod dispatch;
pub mod error;
pub mod handlers;
pub mod identity;
pub mod state;
pub mod telemetry;
pub mod terminal;

// ── Primary re-exports ──────────────────────────────────────────────
pub use config::{ConfigProvider, DeviceClass, DeviceConfig, Direction, LinkTiming, SharedConfig};
pub use dispatch::{Dispatch, Dispatcher, Handler, HandlerResult};
pub use error::CoreError;
pub use handlers::install_defaults;
pub use identity::DeviceIdentity;
pub use state::{DeviceSnapshot, DeviceState, DeviceStatus};
pub use telemetry::TelemetryEmitter;
pub use terminal::{ConnectionState, LinkStatus, Terminal, TerminalEvent};

// Wire types embedders need without depending on buson-api directly.
pub use buson_api::{Outbound, Position};
