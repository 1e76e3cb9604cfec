// ── Device state ──
//
// The one record shared between the link loop (through dispatch
// handlers) and the embedding application's render loop. Every
// mutation goes through a single `watch` update, so readers always see
// status and stop from the same write.

use std::sync::Arc;

use buson_api::Position;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

/// Operational status reported in every telemetry message.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, strum::Display, strum::EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum DeviceStatus {
    #[default]
    Idle,
    RidePending,
    RideActive,
    DropPending,
    Resetting,
}

/// A consistent copy of the device state at one point in time.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeviceSnapshot {
    pub status: DeviceStatus,
    /// Name or number of the stop the current request refers to.
    pub stop: Option<String>,
    /// Last GPS fix; `None` without a fix.
    pub position: Option<Position>,
    /// Whether the link to the dispatch server is up.
    pub connected: bool,
}

/// Shared, cheaply cloneable handle to the device state.
#[derive(Debug, Clone)]
pub struct DeviceState {
    tx: Arc<watch::Sender<DeviceSnapshot>>,
}

impl Default for DeviceState {
    fn default() -> Self {
        Self::new()
    }
}

impl DeviceState {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(DeviceSnapshot::default());
        Self { tx: Arc::new(tx) }
    }

    pub fn snapshot(&self) -> DeviceSnapshot {
        self.tx.borrow().clone()
    }

    pub fn status(&self) -> DeviceStatus {
        self.tx.borrow().status
    }

    /// Receiver that wakes on every change. The render loop may poll
    /// [`snapshot`](Self::snapshot) instead.
    pub fn subscribe(&self) -> watch::Receiver<DeviceSnapshot> {
        self.tx.subscribe()
    }

    /// Set status and stop together.
    pub fn set_status(&self, status: DeviceStatus, stop: Option<String>) {
        self.tx.send_if_modified(|snap| {
            if snap.status == status && snap.stop == stop {
                return false;
            }
            snap.status = status;
            snap.stop = stop;
            true
        });
    }

    /// Local reset: back to idle with no stop.
    pub fn force_idle(&self) {
        self.set_status(DeviceStatus::Idle, None);
    }

    pub fn set_position(&self, position: Option<Position>) {
        self.tx.send_if_modified(|snap| {
            if snap.position == position {
                return false;
            }
            snap.position = position;
            true
        });
    }

    pub(crate) fn set_connected(&self, connected: bool) {
        self.tx.send_if_modified(|snap| {
            let changed = snap.connected != connected;
            snap.connected = connected;
            changed
        });
    }
}
