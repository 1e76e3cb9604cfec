// ── Default handlers ──
//
// Status transitions for the standard server commands. Embedders call
// `install_defaults` before `start()` and may override any entry with
// their own `on(..)` afterwards.

use serde_json::Value;

use crate::dispatch::{CANCEL_REQUEST, DROP_REQUEST, Dispatcher, RESET, RIDE_REQUEST};
use crate::state::{DeviceState, DeviceStatus};

/// Register the standard status transitions on `dispatcher`.
pub fn install_defaults(dispatcher: &Dispatcher, state: &DeviceState) {
    let s = state.clone();
    dispatcher.on(RIDE_REQUEST, move |payload| {
        s.set_status(DeviceStatus::RidePending, stop_from(payload));
        Ok(())
    });

    let s = state.clone();
    dispatcher.on(DROP_REQUEST, move |payload| {
        s.set_status(DeviceStatus::DropPending, stop_from(payload));
        Ok(())
    });

    let s = state.clone();
    dispatcher.on(CANCEL_REQUEST, move |_| {
        s.force_idle();
        Ok(())
    });

    let s = state.clone();
    dispatcher.on(RESET, move |_| {
        let stop = s.snapshot().stop;
        s.set_status(DeviceStatus::Resetting, stop);
        Ok(())
    });
}

/// Stop named in a request payload: `stopName`, falling back to `stopNo`.
pub fn stop_from(payload: &Value) -> Option<String> {
    ["stopName", "stopNo"]
        .into_iter()
        .filter_map(|key| payload.get(key))
        .find_map(|v| match v {
            Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_owned()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        })
}
