use std::collections::HashSet;

use dpbridge_codec::{is_valid_id, DpValue};
use serde::{Deserialize, Serialize};

use crate::error::{MappingError, Result};
use crate::transform::{AttributeValue, Transform, ValidRange};

pub const DEFAULT_BATTERY_PERCENTAGE_DP: u8 = 15;
pub const DEFAULT_BATTERY_STATE_DP: u8 = 14;
pub const DEFAULT_LOW_BATTERY_THRESHOLD: f64 = 20.0;
pub const DEFAULT_HEURISTIC_BATTERY_THRESHOLD: u8 = 10;

/// Parameters handed to the battery oracle when converting a voltage reading.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct BatteryConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chemistry: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_voltage: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_voltage: Option<f64>,
}

/// Which DataPoints carry battery information for a device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatteryDps {
    /// Reports 0-100 directly. `null` disables.
    #[serde(default = "default_percentage_dp")]
    pub percentage_dp: Option<u8>,
    /// Reports an enum level: 0 low, 1 medium, 2 high.
    #[serde(default = "default_state_dp")]
    pub state_dp: Option<u8>,
    /// Reports a raw voltage for the battery oracle.
    #[serde(default)]
    pub voltage_dp: Option<u8>,
    /// `alarm_battery` is raised at or below this percentage.
    #[serde(default = "default_low_threshold")]
    pub low_threshold: f64,
    #[serde(default)]
    pub config: BatteryConfig,
}

fn default_percentage_dp() -> Option<u8> {
    Some(DEFAULT_BATTERY_PERCENTAGE_DP)
}

fn default_state_dp() -> Option<u8> {
    Some(DEFAULT_BATTERY_STATE_DP)
}

fn default_low_threshold() -> f64 {
    DEFAULT_LOW_BATTERY_THRESHOLD
}

fn default_heuristic_threshold() -> u8 {
    DEFAULT_HEURISTIC_BATTERY_THRESHOLD
}

impl Default for BatteryDps {
    fn default() -> Self {
        Self {
            percentage_dp: default_percentage_dp(),
            state_dp: default_state_dp(),
            voltage_dp: None,
            low_threshold: DEFAULT_LOW_BATTERY_THRESHOLD,
            config: BatteryConfig::default(),
        }
    }
}

/// Battery role of a DataPoint id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatteryRole {
    Percentage,
    State,
    Voltage,
}

impl BatteryDps {
    pub fn role_of(&self, dp: u8) -> Option<BatteryRole> {
        if self.percentage_dp == Some(dp) {
            Some(BatteryRole::Percentage)
        } else if self.state_dp == Some(dp) {
            Some(BatteryRole::State)
        } else if self.voltage_dp == Some(dp) {
            Some(BatteryRole::Voltage)
        } else {
            None
        }
    }
}

/// Explicit mapping for one DataPoint id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DpMapping {
    pub dp: u8,
    /// Target attribute. Absent means the DataPoint is a device setting.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attribute: Option<String>,
    #[serde(default)]
    pub transform: Transform,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub valid: Option<ValidRange>,
}

impl DpMapping {
    pub fn new(dp: u8, attribute: impl Into<String>, transform: Transform) -> Self {
        Self {
            dp,
            attribute: Some(attribute.into()),
            transform,
            valid: None,
        }
    }

    /// A DataPoint recorded as a setting rather than an attribute.
    pub fn setting(dp: u8) -> Self {
        Self {
            dp,
            attribute: None,
            transform: Transform::Identity,
            valid: None,
        }
    }

    pub fn with_valid(mut self, valid: ValidRange) -> Self {
        self.valid = Some(valid);
        self
    }

    /// Transform `value` and check it against the validity range.
    pub fn resolve(&self, value: &DpValue) -> Option<AttributeValue> {
        let converted = self.transform.apply(value)?;
        match &self.valid {
            Some(range) if !range.contains(&converted) => None,
            _ => Some(converted),
        }
    }
}

/// Everything the router knows about one device model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceProfile {
    /// Device key, usually `<manufacturer>:<model>` or a driver id.
    pub device: String,
    #[serde(default)]
    pub battery: BatteryDps,
    /// Ids at or above this resolve a humidity/battery tie to battery.
    #[serde(default = "default_heuristic_threshold")]
    pub heuristic_battery_threshold: u8,
    #[serde(default)]
    pub datapoints: Vec<DpMapping>,
}

impl DeviceProfile {
    pub fn new(device: impl Into<String>) -> Self {
        Self {
            device: device.into(),
            battery: BatteryDps::default(),
            heuristic_battery_threshold: DEFAULT_HEURISTIC_BATTERY_THRESHOLD,
            datapoints: Vec::new(),
        }
    }

    pub fn with_mapping(mut self, mapping: DpMapping) -> Self {
        self.datapoints.push(mapping);
        self
    }

    pub fn with_battery(mut self, battery: BatteryDps) -> Self {
        self.battery = battery;
        self
    }

    pub fn mapping_for(&self, dp: u8) -> Option<&DpMapping> {
        self.datapoints.iter().find(|m| m.dp == dp)
    }

    /// Semantic checks the schema cannot express.
    pub fn validate(&self) -> Result<()> {
        let invalid = |message: String| MappingError::InvalidProfile {
            source_name: self.device.clone(),
            message,
        };

        if self.device.trim().is_empty() {
            return Err(invalid("device key is empty".to_string()));
        }

        let mut seen = HashSet::new();
        for mapping in &self.datapoints {
            if !is_valid_id(mapping.dp) {
                return Err(invalid(format!("dp {} outside 1..=200", mapping.dp)));
            }
            if !seen.insert(mapping.dp) {
                return Err(invalid(format!("dp {} mapped twice", mapping.dp)));
            }
            if let Transform::Scale { divisor } = mapping.transform {
                if divisor == 0.0 || !divisor.is_finite() {
                    return Err(invalid(format!("dp {} has divisor {divisor}", mapping.dp)));
                }
            }
            if let Some(ValidRange {
                min: Some(min),
                max: Some(max),
            }) = mapping.valid
            {
                if min > max {
                    return Err(invalid(format!("dp {} has min {min} > max {max}", mapping.dp)));
                }
            }
        }

        let battery = [
            self.battery.percentage_dp,
            self.battery.state_dp,
            self.battery.voltage_dp,
        ];
        for dp in battery.into_iter().flatten() {
            if !is_valid_id(dp) {
                return Err(invalid(format!("battery dp {dp} outside 1..=200")));
            }
        }
        Ok(())
    }
}
