//! JSON messages exchanged over the `/device-ws` channel.
//!
//! Outbound messages are strongly typed and serialized with an internal
//! `"type"` tag. Inbound messages are parsed leniently from a
//! [`serde_json::Value`]: the server side evolves independently, so
//! anything unrecognized is surfaced as [`InboundKind::Other`] instead of
//! failing the receive loop.

use serde::{Deserialize, Serialize, Serializer};
use serde_json::Value;

use crate::error::Error;

// ── Shared blocks ────────────────────────────────────────────────────

/// The `device` block every outbound message carries.
///
/// The server keys its device table on `id` and drops messages without it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub id: String,
    pub ip: String,
    /// 1 = handheld, 2 = vehicle, 3 = stop beacon.
    pub device_type: u8,
}

/// A GPS fix as reported by the receiver.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub lat: f64,
    pub lon: f64,
    /// Ground speed in km/h, when the sentence carries it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speed: Option<f64>,
    /// UTC time of the fix, `HH:MM:SS`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time: Option<String>,
}

// ── Outbound ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HelloPayload {
    pub bus_number: Option<String>,
    pub vehicle_number: Option<String>,
    pub direction: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TelemetryPayload {
    /// Serialized as `{}` when there is no fix.
    #[serde(serialize_with = "position_or_empty")]
    pub gps: Option<Position>,
    pub status: String,
    pub bus_number: Option<String>,
    pub vehicle_number: Option<String>,
    pub direction: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RideResponsePayload {
    #[serde(rename = "requestId")]
    pub request_id: String,
    /// `"accepted"` or `"rejected"`.
    pub decision: String,
}

/// Every message the device sends to the server.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Outbound {
    /// First message on every new connection.
    Hello {
        device: DeviceInfo,
        payload: HelloPayload,
    },
    /// Periodic status report.
    Telemetry {
        msg_id: String,
        ts: i64,
        device: DeviceInfo,
        payload: TelemetryPayload,
    },
    /// Caller-constructed event such as a door state change.
    Event {
        event: String,
        device: DeviceInfo,
        payload: Value,
    },
    /// Driver decision on a pending ride request.
    RideResponse {
        device: DeviceInfo,
        payload: RideResponsePayload,
    },
}

impl Outbound {
    /// Wire tag of this message.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Hello { .. } => "hello",
            Self::Telemetry { .. } => "telemetry",
            Self::Event { .. } => "event",
            Self::RideResponse { .. } => "ride_response",
        }
    }

    pub fn to_json(&self) -> Result<String, Error> {
        Ok(serde_json::to_string(self)?)
    }
}

#[allow(clippy::ref_option)]
fn position_or_empty<S: Serializer>(gps: &Option<Position>, s: S) -> Result<S::Ok, S::Error> {
    match gps {
        Some(position) => position.serialize(s),
        None => serde_json::Map::new().serialize(s),
    }
}

// ── Inbound ──────────────────────────────────────────────────────────

/// Type tag of an inbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundKind {
    /// Server reply to `hello`. Reserved; carries no contract yet.
    HelloAck,
    Command,
    Event,
    Info,
    /// Acknowledgment of a message carrying `msg_id`.
    Ack,
    RideRequest,
    AlightRequest,
    /// Any tag this client does not know about.
    Other(String),
}

impl InboundKind {
    pub fn from_tag(tag: &str) -> Self {
        match tag {
            "hello-ack" | "hello_ack" => Self::HelloAck,
            "command" => Self::Command,
            "event" => Self::Event,
            "info" => Self::Info,
            "ack" => Self::Ack,
            "ride_request" => Self::RideRequest,
            "alight_request" => Self::AlightRequest,
            other => Self::Other(other.to_owned()),
        }
    }
}

/// A decoded inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub struct InboundMessage {
    pub kind: InboundKind,
    /// Top-level `cmd`, when present.
    pub cmd: Option<String>,
    /// Top-level `ts` in milliseconds since the epoch. Fractional values
    /// are truncated.
    pub ts: Option<i64>,
    /// `ack_id` echoed back by the server for acknowledgments.
    pub ack_id: Option<String>,
    /// The `payload` object; an empty object when absent or `null`.
    pub payload: Value,
}

impl InboundMessage {
    /// Parse a text frame. Returns `None` for anything that is not a JSON
    /// object with a string `type`.
    pub fn parse(text: &str) -> Option<Self> {
        match serde_json::from_str::<Value>(text) {
            Ok(value) => Self::from_value(value),
            Err(e) => {
                tracing::debug!(error = %e, "inbound frame is not JSON");
                None
            }
        }
    }

    pub fn from_value(mut value: Value) -> Option<Self> {
        let obj = value.as_object_mut()?;
        let kind = InboundKind::from_tag(obj.get("type")?.as_str()?);

        let payload = match obj.remove("payload") {
            Some(Value::Null) | None => Value::Object(serde_json::Map::new()),
            Some(p) => p,
        };

        Some(Self {
            kind,
            cmd: obj.get("cmd").and_then(Value::as_str).map(String::from),
            ts: obj.get("ts").and_then(epoch_millis),
            ack_id: obj.get("ack_id").and_then(Value::as_str).map(String::from),
            payload,
        })
    }

    /// Command name: top-level `cmd`, falling back to `payload.command`.
    pub fn command_name(&self) -> Option<&str> {
        self.cmd
            .as_deref()
            .filter(|c| !c.is_empty())
            .or_else(|| self.payload.get("command").and_then(Value::as_str))
    }
}

/// Integer milliseconds from a JSON number, truncating fractions.
#[allow(clippy::as_conversions, clippy::cast_possible_truncation)]
fn epoch_millis(value: &Value) -> Option<i64> {
    value
        .as_i64()
        .or_else(|| value.as_f64().filter(|f| f.is_finite()).map(|f| f.trunc() as i64))
}

// ── Tests ────────────────────────────────────────────────────────────
