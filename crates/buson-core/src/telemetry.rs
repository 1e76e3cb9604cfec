// ── Telemetry emitter ──
//
// A rate governor, not a scheduler: the link loop calls `maybe_send` on
// every iteration and gets a message back at most once per interval.
// Missed windows are never made up, and each message is built from the
// state as it is at call time.

use std::time::Duration;

use buson_api::{Outbound, TelemetryPayload};
use rand::Rng;
use tokio::time::Instant;

use crate::identity::DeviceIdentity;
use crate::state::DeviceSnapshot;

#[derive(Debug, Clone)]
pub struct TelemetryEmitter {
    min_interval: Duration,
    last_attempt: Option<Instant>,
}

impl TelemetryEmitter {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last_attempt: None,
        }
    }

    /// Whether a message would be produced at `now`.
    pub fn is_due(&self, now: Instant) -> bool {
        self.last_attempt
            .is_none_or(|last| now.saturating_duration_since(last) >= self.min_interval)
    }

    /// Produce a telemetry message if the interval has elapsed, and
    /// count this call as the latest attempt.
    pub fn maybe_send(
        &mut self,
        now: Instant,
        identity: &DeviceIdentity,
        snapshot: &DeviceSnapshot,
    ) -> Option<Outbound> {
        if !self.is_due(now) {
            return None;
        }
        self.last_attempt = Some(now);
        Some(telemetry_message(identity, snapshot, epoch_millis()))
    }

    /// Time left until the next message is due.
    pub fn remaining(&self, now: Instant) -> Duration {
        self.last_attempt.map_or(Duration::ZERO, |last| {
            self.min_interval
                .saturating_sub(now.saturating_duration_since(last))
        })
    }
}

/// Build a telemetry message stamped with `ts`.
pub fn telemetry_message(identity: &DeviceIdentity, snapshot: &DeviceSnapshot, ts: i64) -> Outbound {
    Outbound::Telemetry {
        msg_id: message_id(ts),
        ts,
        device: identity.device_info(),
        payload: TelemetryPayload {
            gps: snapshot.position.clone(),
            status: snapshot.status.to_string(),
            bus_number: identity.bus_number.clone(),
            vehicle_number: identity.vehicle_number.clone(),
            direction: identity.direction.wire_label().to_owned(),
        },
    }
}

/// `t-<ts>-<0..999>`. Collisions within one millisecond are possible
/// and only weaken ack correlation.
pub fn message_id(ts: i64) -> String {
    let suffix: u16 = rand::thread_rng().gen_range(0..1000);
    format!("t-{ts}-{suffix}")
}

/// Wall-clock milliseconds since the Unix epoch.
pub fn epoch_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::net::{IpAddr, Ipv4Addr};

    use buson_api::Position;

    use super::*;
    use crate::config::{DeviceClass, Direction};
    use crate::state::DeviceStatus;

    fn identity() -> DeviceIdentity {
        DeviceIdentity {
            device_id: "BUS-1".into(),
            class: DeviceClass::Vehicle,
            bus_number: Some("720".into()),
            vehicle_number: Some("4411".into()),
            direction: Direction::Up,
            ip: IpAddr::V4(Ipv4Addr::LOCALHOST),
        }
    }

    #[test]
    fn first_call_sends() {
        let mut emitter = TelemetryEmitter::new(Duration::from_millis(500));
        let now = Instant::now();
        assert!(emitter.maybe_send(now, &identity(), &DeviceSnapshot::default()).is_some());
    }

    #[test]
    fn calls_inside_window_are_suppressed() {
        let mut emitter = TelemetryEmitter::new(Duration::from_millis(500));
        let start = Instant::now();
        let snap = DeviceSnapshot::default();

        let sent: Vec<_> = [0, 100, 250, 499]
            .into_iter()
            .filter_map(|ms| emitter.maybe_send(start + Duration::from_millis(ms), &identity(), &snap))
            .collect();
        assert_eq!(sent.len(), 1);

        assert!(emitter.maybe_send(start + Duration::from_millis(500), &identity(), &snap).is_some());
        assert!(emitter.maybe_send(start + Duration::from_millis(900), &identity(), &snap).is_none());
    }

    #[test]
    fn remaining_counts_down() {
        let mut emitter = TelemetryEmitter::new(Duration::from_millis(500));
        let start = Instant::now();
        assert_eq!(emitter.remaining(start), Duration::ZERO);

        emitter.maybe_send(start, &identity(), &DeviceSnapshot::default());
        assert_eq!(emitter.remaining(start + Duration::from_millis(200)), Duration::from_millis(300));
        assert!(!emitter.is_due(start + Duration::from_millis(200)));
        assert!(emitter.is_due(start + Duration::from_millis(500)));
    }

    #[test]
    fn message_reflects_snapshot() {
        let snap = DeviceSnapshot {
            status: DeviceStatus::RidePending,
            stop: Some("Central".into()),
            position: Some(Position {
                lat: 37.5,
                lon: 127.0,
                speed: Some(31.5),
                time: None,
            }),
            connected: true,
        };

        let value = serde_json::to_value(telemetry_message(&identity(), &snap, 1_700_000_000_000)).unwrap();
        assert_eq!(value["type"], "telemetry");
        assert_eq!(value["ts"], 1_700_000_000_000_i64);
        assert_eq!(value["payload"]["status"], "ride_pending");
        assert_eq!(value["payload"]["gps"]["lat"], 37.5);
        assert_eq!(value["payload"]["direction"], "상행");
        assert_eq!(value["device"]["device_type"], 2);
    }

    #[test]
    fn message_id_shape() {
        let id = message_id(1_700_000_000_000);
        let suffix = id.strip_prefix("t-1700000000000-").unwrap();
        assert!(suffix.parse::<u16>().unwrap() < 1000);
    }
}
