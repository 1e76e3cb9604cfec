// ── Command dispatcher ──
//
// Routes decoded inbound messages to handlers registered by name and
// measures ack round-trip time. Handler failures (errors and panics)
// are contained here; nothing a handler does can end the link loop.

use std::collections::BTreeSet;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use buson_api::{InboundKind, InboundMessage};
use dashmap::DashMap;
use serde_json::Value;
use tracing::{debug, warn};

/// Handler key the `alight_request` wire message is delivered under.
pub const DROP_REQUEST: &str = "drop_request";
pub const RIDE_REQUEST: &str = "ride_request";
pub const CANCEL_REQUEST: &str = "cancel_request";
pub const RESET: &str = "reset";

pub type HandlerResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;

/// A registered reaction to one named event. Receives the message payload.
pub type Handler = Arc<dyn Fn(&Value) -> HandlerResult + Send + Sync>;

/// What happened to one inbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dispatch {
    /// A handler ran and returned `Ok`.
    Handled { event: String },
    /// A handler returned an error or panicked.
    Failed { event: String, reason: String },
    /// No handler is registered for this name.
    Unhandled { event: String },
    /// An ack carrying `ts` was received. `rtt_ms` is `now - ts` and
    /// goes negative when the server clock runs ahead.
    RoundTrip { rtt_ms: i64 },
    /// Reserved, unknown or incomplete message.
    Ignored,
}

/// Listener registry: one handler per event name, last registration wins.
#[derive(Clone, Default)]
pub struct Dispatcher {
    listeners: Arc<DashMap<String, Handler>>,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("events", &self.registered())
            .finish_non_exhaustive()
    }
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for `event`, replacing any previous one.
    pub fn on<F>(&self, event: impl Into<String>, handler: F)
    where
        F: Fn(&Value) -> HandlerResult + Send + Sync + 'static,
    {
        let event = event.into();
        if self.listeners.insert(event.clone(), Arc::new(handler)).is_some() {
            debug!(event = %event, "handler replaced");
        }
    }

    /// Remove the handler for `event`. Returns whether one was registered.
    pub fn off(&self, event: &str) -> bool {
        self.listeners.remove(event).is_some()
    }

    pub fn is_registered(&self, event: &str) -> bool {
        self.listeners.contains_key(event)
    }

    /// Registered event names, sorted.
    pub fn registered(&self) -> BTreeSet<String> {
        self.listeners.iter().map(|e| e.key().clone()).collect()
    }

    /// Invoke the handler for `event` with `payload`.
    pub fn emit(&self, event: &str, payload: &Value) -> Dispatch {
        // Clone out of the map so a handler may (re)register without deadlocking.
        let Some(handler) = self.listeners.get(event).map(|h| Arc::clone(h.value())) else {
            debug!(event, "no handler registered");
            return Dispatch::Unhandled {
                event: event.to_owned(),
            };
        };

        match catch_unwind(AssertUnwindSafe(|| handler(payload))) {
            Ok(Ok(())) => {
                debug!(event, "handler completed");
                Dispatch::Handled {
                    event: event.to_owned(),
                }
            }
            Ok(Err(e)) => {
                warn!(event, error = %e, "handler failed");
                Dispatch::Failed {
                    event: event.to_owned(),
                    reason: e.to_string(),
                }
            }
            Err(panic) => {
                let reason = panic_message(panic.as_ref());
                warn!(event, reason = %reason, "handler panicked");
                Dispatch::Failed {
                    event: event.to_owned(),
                    reason,
                }
            }
        }
    }

    /// Route one inbound message. `now_ms` is the receive time in epoch
    /// milliseconds, used for ack round-trip time.
    pub fn dispatch(&self, message: &InboundMessage, now_ms: i64) -> Dispatch {
        match &message.kind {
            InboundKind::Command | InboundKind::Event | InboundKind::Info => {
                match message.command_name() {
                    Some(name) => self.emit(name, &message.payload),
                    None => {
                        debug!(kind = ?message.kind, "message without command name");
                        Dispatch::Ignored
                    }
                }
            }
            InboundKind::RideRequest => self.emit(RIDE_REQUEST, &message.payload),
            InboundKind::AlightRequest => self.emit(DROP_REQUEST, &message.payload),
            InboundKind::Ack => match message.ts {
                Some(ts) => {
                    let rtt_ms = now_ms.saturating_sub(ts);
                    debug!(rtt_ms, ack_id = ?message.ack_id, "ack");
                    Dispatch::RoundTrip { rtt_ms }
                }
                None => Dispatch::Ignored,
            },
            InboundKind::HelloAck => {
                debug!("hello acknowledged");
                Dispatch::Ignored
            }
            InboundKind::Other(tag) => {
                debug!(tag = %tag, "unrecognized message type");
                Dispatch::Ignored
            }
        }
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    panic
        .downcast_ref::<&str>()
        .map(|s| (*s).to_owned())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "handler panicked".to_owned())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Mutex;

    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;

    fn recording(dispatcher: &Dispatcher, event: &str) -> Arc<Mutex<Vec<Value>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        dispatcher.on(event, move |payload| {
            sink.lock().unwrap().push(payload.clone());
            Ok(())
        });
        seen
    }

    fn parse(text: &str) -> InboundMessage {
        InboundMessage::parse(text).unwrap()
    }

    #[test]
    fn command_routes_by_cmd() {
        let dispatcher = Dispatcher::new();
        let seen = recording(&dispatcher, "cancel_request");

        let outcome = dispatcher.dispatch(
            &parse(r#"{"type":"command","cmd":"cancel_request","payload":{"requestId":"r-1"}}"#),
            0,
        );

        assert_eq!(
            outcome,
            Dispatch::Handled {
                event: "cancel_request".into()
            }
        );
        assert_eq!(*seen.lock().unwrap(), vec![json!({ "requestId": "r-1" })]);
    }

    #[test]
    fn info_routes_by_payload_command() {
        let dispatcher = Dispatcher::new();
        let seen = recording(&dispatcher, "reset");

        dispatcher.dispatch(&parse(r#"{"type":"info","payload":{"command":"reset"}}"#), 0);
        assert_eq!(seen.lock().unwrap().len(), 1);
    }

    #[test]
    fn alight_request_is_delivered_as_drop_request() {
        let dispatcher = Dispatcher::new();
        let drop_seen = recording(&dispatcher, DROP_REQUEST);
        let alight_seen = recording(&dispatcher, "alight_request");

        let outcome = dispatcher.dispatch(
            &parse(r#"{"type":"alight_request","payload":{"stopName":"Central"}}"#),
            0,
        );

        assert_eq!(
            outcome,
            Dispatch::Handled {
                event: DROP_REQUEST.into()
            }
        );
        assert_eq!(*drop_seen.lock().unwrap(), vec![json!({ "stopName": "Central" })]);
        assert!(alight_seen.lock().unwrap().is_empty());
    }

    #[test]
    fn ride_request_message_type() {
        let dispatcher = Dispatcher::new();
        let seen = recording(&dispatcher, RIDE_REQUEST);

        dispatcher.dispatch(&parse(r#"{"type":"ride_request","payload":{"stopNo":"12"}}"#), 0);
        assert_eq!(*seen.lock().unwrap(), vec![json!({ "stopNo": "12" })]);
    }

    #[test]
    fn ack_measures_round_trip() {
        let dispatcher = Dispatcher::new();
        let outcome = dispatcher.dispatch(&parse(r#"{"type":"ack","ts":1000}"#), 1042);
        assert_eq!(outcome, Dispatch::RoundTrip { rtt_ms: 42 });

        // Server clock ahead of ours.
        let outcome = dispatcher.dispatch(&parse(r#"{"type":"ack","ts":2000}"#), 1500);
        assert_eq!(outcome, Dispatch::RoundTrip { rtt_ms: -500 });

        let outcome = dispatcher.dispatch(&parse(r#"{"type":"ack","ts":1000.75}"#), 1042);
        assert_eq!(outcome, Dispatch::RoundTrip { rtt_ms: 42 });

        let outcome = dispatcher.dispatch(&parse(r#"{"type":"ack","ack_id":"t-1-1"}"#), 1500);
        assert_eq!(outcome, Dispatch::Ignored);
    }

    #[test]
    fn unknown_command_is_tolerated() {
        let dispatcher = Dispatcher::new();
        let outcome = dispatcher.dispatch(&parse(r#"{"type":"command","cmd":"unknown_xyz"}"#), 0);
        assert_eq!(
            outcome,
            Dispatch::Unhandled {
                event: "unknown_xyz".into()
            }
        );
    }

    #[test]
    fn reserved_and_unknown_types_are_ignored() {
        let dispatcher = Dispatcher::new();
        let seen = recording(&dispatcher, "hello-ack");

        assert_eq!(dispatcher.dispatch(&parse(r#"{"type":"hello-ack"}"#), 0), Dispatch::Ignored);
        assert_eq!(dispatcher.dispatch(&parse(r#"{"type":"telemetry"}"#), 0), Dispatch::Ignored);
        assert_eq!(dispatcher.dispatch(&parse(r#"{"type":"command"}"#), 0), Dispatch::Ignored);
        assert!(seen.lock().unwrap().is_empty());
    }

    #[test]
    fn last_registration_wins() {
        let dispatcher = Dispatcher::new();
        let first = recording(&dispatcher, "reset");
        let second = recording(&dispatcher, "reset");

        dispatcher.emit("reset", &json!({}));
        assert!(first.lock().unwrap().is_empty());
        assert_eq!(second.lock().unwrap().len(), 1);

        assert!(dispatcher.off("reset"));
        assert!(!dispatcher.is_registered("reset"));
    }

    #[test]
    fn handler_errors_are_contained() {
        let dispatcher = Dispatcher::new();
        dispatcher.on(RIDE_REQUEST, |_| Err("display offline".into()));

        let outcome = dispatcher.emit(RIDE_REQUEST, &json!({}));
        assert_eq!(
            outcome,
            Dispatch::Failed {
                event: RIDE_REQUEST.into(),
                reason: "display offline".into()
            }
        );
    }

    #[test]
    fn handler_panics_are_contained() {
        let dispatcher = Dispatcher::new();
        dispatcher.on(RIDE_REQUEST, |_| panic!("speaker on fire"));

        let outcome = dispatcher.emit(RIDE_REQUEST, &json!({}));
        assert!(
            matches!(&outcome, Dispatch::Failed { reason, .. } if reason == "speaker on fire"),
            "unexpected outcome: {outcome:?}"
        );

        // The registry is still usable afterwards.
        let seen = recording(&dispatcher, RIDE_REQUEST);
        dispatcher.emit(RIDE_REQUEST, &json!({ "n": 2 }));
        assert_eq!(seen.lock().unwrap().len(), 1);
    }

    #[test]
    fn handler_may_register_from_inside_a_call() {
        let dispatcher = Dispatcher::new();
        let inner = dispatcher.clone();
        dispatcher.on("arm", move |_| {
            inner.on("armed", |_| Ok(()));
            Ok(())
        });

        dispatcher.emit("arm", &json!({}));
        assert!(dispatcher.is_registered("armed"));
    }
}
