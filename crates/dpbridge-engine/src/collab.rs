//! Seams to the host platform.
//!
//! The engine never owns capabilities, transports, or storage. It talks to
//! them through these traits, bundled per device in [`Collaborators`].

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError};

use dpbridge_mapping::{AttributeValue, BatteryConfig};
use dpbridge_timesync::{Clock, SystemClock};
use serde::Serialize;

use crate::state::{MemoryStateStore, StateStore};

/// Failure reported by a collaborator.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CollabError {
    #[error("unknown device {0}")]
    UnknownDevice(String),

    #[error("device does not expose attribute {0}")]
    UnknownAttribute(String),

    #[error("transport unavailable: {0}")]
    Unavailable(String),

    #[error("storage failure: {0}")]
    Storage(String),
}

/// Receives routed attribute values.
pub trait AttributeSink: Send + Sync {
    fn write_attribute(
        &self,
        device: &str,
        attribute: &str,
        value: &AttributeValue,
    ) -> Result<(), CollabError>;
}

/// Puts encoded commands on the wire. `bytes` start with the command id.
pub trait WireSender: Send + Sync {
    fn send_bytes(&self, device: &str, cluster: u16, bytes: &[u8]) -> Result<(), CollabError>;
}

/// Answers whether a device exposes an attribute.
pub trait CapabilityOracle: Send + Sync {
    fn has_attribute(&self, device: &str, attribute: &str) -> bool;
}

/// Converts a raw battery reading to a percentage.
pub trait BatteryOracle: Send + Sync {
    fn calculate_battery_percentage(&self, raw: f64, config: &BatteryConfig) -> f64;
}

/// Everything a [`DeviceEngine`](crate::DeviceEngine) needs from its host.
#[derive(Clone)]
pub struct Collaborators {
    pub sink: Arc<dyn AttributeSink>,
    pub sender: Arc<dyn WireSender>,
    pub capabilities: Arc<dyn CapabilityOracle>,
    pub battery: Arc<dyn BatteryOracle>,
    pub store: Arc<dyn StateStore>,
    pub clock: Arc<dyn Clock>,
}

impl Collaborators {
    /// In-memory collaborators: recording sink and sender, the given
    /// capabilities, linear battery curve, memory store, system clock.
    pub fn in_memory(capabilities: StaticCapabilities) -> Self {
        Self {
            sink: Arc::new(MemorySink::default()),
            sender: Arc::new(MemorySender::default()),
            capabilities: Arc::new(capabilities),
            battery: Arc::new(LinearBatteryOracle),
            store: Arc::new(MemoryStateStore::default()),
            clock: Arc::new(SystemClock),
        }
    }
}

/// One attribute write seen by a [`MemorySink`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecordedWrite {
    pub device: String,
    pub attribute: String,
    pub value: AttributeValue,
}

/// Sink that keeps every write in order.
#[derive(Debug, Default)]
pub struct MemorySink {
    writes: Mutex<Vec<RecordedWrite>>,
}

impl MemorySink {
    pub fn writes(&self) -> Vec<RecordedWrite> {
        self.writes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Most recent value written to `attribute` on any device.
    pub fn last(&self, attribute: &str) -> Option<AttributeValue> {
        self.writes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .rev()
            .find(|w| w.attribute == attribute)
            .map(|w| w.value.clone())
    }
}

impl AttributeSink for MemorySink {
    fn write_attribute(
        &self,
        device: &str,
        attribute: &str,
        value: &AttributeValue,
    ) -> Result<(), CollabError> {
        self.writes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(RecordedWrite {
                device: device.to_string(),
                attribute: attribute.to_string(),
                value: value.clone(),
            });
        Ok(())
    }
}

/// One command seen by a [`MemorySender`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentCommand {
    pub device: String,
    pub cluster: u16,
    pub bytes: Vec<u8>,
}

/// Sender that records instead of transmitting.
#[derive(Debug, Default)]
pub struct MemorySender {
    sent: Mutex<Vec<SentCommand>>,
}

impl MemorySender {
    pub fn sent(&self) -> Vec<SentCommand> {
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl WireSender for MemorySender {
    fn send_bytes(&self, device: &str, cluster: u16, bytes: &[u8]) -> Result<(), CollabError> {
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(SentCommand {
                device: device.to_string(),
                cluster,
                bytes: bytes.to_vec(),
            });
        Ok(())
    }
}

/// Fixed attribute sets, optionally per device.
#[derive(Debug, Clone, Default)]
pub struct StaticCapabilities {
    shared: HashSet<String>,
    per_device: HashMap<String, HashSet<String>>,
}

impl StaticCapabilities {
    /// Every device exposes `attributes`.
    pub fn all<I, S>(attributes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            shared: attributes.into_iter().map(Into::into).collect(),
            per_device: HashMap::new(),
        }
    }

    pub fn with_device<I, S>(mut self, device: &str, attributes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.per_device.insert(
            device.to_string(),
            attributes.into_iter().map(Into::into).collect(),
        );
        self
    }
}

impl CapabilityOracle for StaticCapabilities {
    fn has_attribute(&self, device: &str, attribute: &str) -> bool {
        match self.per_device.get(device) {
            Some(attributes) => attributes.contains(attribute),
            None => self.shared.contains(attribute),
        }
    }
}

/// Linear voltage curve between `min_voltage` and `max_voltage`.
///
/// Raw readings above 100 are taken as millivolts, otherwise as decivolts.
#[derive(Debug, Clone, Copy, Default)]
pub struct LinearBatteryOracle;

impl LinearBatteryOracle {
    pub const DEFAULT_MIN_VOLTAGE: f64 = 2.5;
    pub const DEFAULT_MAX_VOLTAGE: f64 = 3.0;
}

impl BatteryOracle for LinearBatteryOracle {
    fn calculate_battery_percentage(&self, raw: f64, config: &BatteryConfig) -> f64 {
        let volts = if raw > 100.0 { raw / 1000.0 } else { raw / 10.0 };
        let min = config.min_voltage.unwrap_or(Self::DEFAULT_MIN_VOLTAGE);
        let max = config.max_voltage.unwrap_or(Self::DEFAULT_MAX_VOLTAGE);
        if max <= min {
            return 0.0;
        }
        ((volts - min) / (max - min) * 100.0).clamp(0.0, 100.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn static_capabilities_prefer_device_entry() {
        let caps = StaticCapabilities::all(["measure_temperature"])
            .with_device("trv", ["target_temperature"]);
        assert!(caps.has_attribute("other", "measure_temperature"));
        assert!(!caps.has_attribute("trv", "measure_temperature"));
        assert!(caps.has_attribute("trv", "target_temperature"));
    }

    #[test]
    fn linear_battery_curve() {
        let oracle = LinearBatteryOracle;
        let config = BatteryConfig::default();
        assert_eq!(oracle.calculate_battery_percentage(3000.0, &config), 100.0);
        assert_eq!(oracle.calculate_battery_percentage(2750.0, &config), 50.0);
        assert_eq!(oracle.calculate_battery_percentage(20.0, &config), 0.0);
    }

    #[test]
    fn memory_sink_keeps_order() {
        let sink = MemorySink::default();
        sink.write_attribute("d", "onoff", &AttributeValue::Bool(true))
            .unwrap();
        sink.write_attribute("d", "onoff", &AttributeValue::Bool(false))
            .unwrap();
        assert_eq!(sink.writes().len(), 2);
        assert_eq!(sink.last("onoff"), Some(AttributeValue::Bool(false)));
    }
}
