// ── Device identity ──
//
// Fixed for the duration of one session: built from the configuration
// right after the handshake and dropped when the connection ends.

use std::net::IpAddr;

use buson_api::{DeviceInfo, HelloPayload, Outbound};

use crate::config::{DeviceClass, DeviceConfig, Direction};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceIdentity {
    pub device_id: String,
    pub class: DeviceClass,
    pub bus_number: Option<String>,
    pub vehicle_number: Option<String>,
    pub direction: Direction,
    /// Address of the interface the session runs over.
    pub ip: IpAddr,
}

impl DeviceIdentity {
    pub fn from_config(config: &DeviceConfig, ip: IpAddr) -> Self {
        Self {
            device_id: config.device_id.trim().to_owned(),
            class: config.device_class,
            bus_number: non_empty(config.bus_number.as_deref()),
            vehicle_number: non_empty(config.vehicle_number.as_deref()),
            direction: config.direction,
            ip,
        }
    }

    /// The `device` block for outbound envelopes.
    pub fn device_info(&self) -> DeviceInfo {
        DeviceInfo {
            id: self.device_id.clone(),
            ip: self.ip.to_string(),
            device_type: self.class.code(),
        }
    }

    pub fn hello(&self) -> Outbound {
        Outbound::Hello {
            device: self.device_info(),
            payload: HelloPayload {
                bus_number: self.bus_number.clone(),
                vehicle_number: self.vehicle_number.clone(),
                direction: self.direction.wire_label().to_owned(),
            },
        }
    }
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value.map(str::trim).filter(|v| !v.is_empty()).map(String::from)
}
