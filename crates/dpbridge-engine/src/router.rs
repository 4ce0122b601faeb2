use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use dpbridge_codec::DpValue;
use dpbridge_mapping::{attr, universal, AttributeValue, BatteryRole, DeviceProfile};
use serde::Serialize;

use crate::collab::{BatteryOracle, CapabilityOracle};

/// Percentage reported for the enum battery states low, medium, high.
pub const BATTERY_STATE_PERCENT: [f64; 3] = [10.0, 50.0, 100.0];

const TEMPERATURE_RANGE: std::ops::RangeInclusive<i64> = -400..=1000;
const PERCENT_RANGE: std::ops::RangeInclusive<i64> = 0..=100;

/// Resolution layer that produced an attribute value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RouteSource {
    Battery,
    Explicit,
    Universal,
    Heuristic,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AttributeWrite {
    pub attribute: String,
    pub value: AttributeValue,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RouteOutcome {
    Routed {
        attribute: String,
        value: AttributeValue,
        source: RouteSource,
        /// Further writes implied by the same report, such as `alarm_battery`.
        secondary: Vec<AttributeWrite>,
    },
    /// Mapped explicitly without an attribute; kept as a device setting.
    SettingOnly,
    /// Matched a layer but the value did not convert or was out of range.
    Dropped { reason: &'static str },
    Unknown,
}

impl RouteOutcome {
    fn routed(attribute: &str, value: AttributeValue, source: RouteSource) -> Self {
        Self::Routed {
            attribute: attribute.to_string(),
            value,
            source,
            secondary: Vec::new(),
        }
    }

    /// Every attribute write carried by the outcome, primary first.
    pub fn writes(&self) -> Vec<AttributeWrite> {
        match self {
            Self::Routed {
                attribute,
                value,
                secondary,
                ..
            } => std::iter::once(AttributeWrite {
                attribute: attribute.clone(),
                value: value.clone(),
            })
            .chain(secondary.iter().cloned())
            .collect(),
            _ => Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UnknownEntry {
    pub count: u64,
    pub last: DpValue,
}

/// DataPoints no layer could place, for diagnostics.
#[derive(Debug, Clone, Default)]
pub struct UnknownLog {
    entries: BTreeMap<u8, UnknownEntry>,
}

impl UnknownLog {
    pub fn record(&mut self, dp: u8, value: &DpValue) {
        self.entries
            .entry(dp)
            .and_modify(|entry| {
                entry.count = entry.count.saturating_add(1);
                entry.last = value.clone();
            })
            .or_insert_with(|| UnknownEntry {
                count: 1,
                last: value.clone(),
            });
    }

    pub fn get(&self, dp: u8) -> Option<&UnknownEntry> {
        self.entries.get(&dp)
    }

    pub fn iter(&self) -> impl Iterator<Item = (u8, &UnknownEntry)> {
        self.entries.iter().map(|(dp, entry)| (*dp, entry))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Maps `(dp, value)` to a semantic attribute for one device.
///
/// Layers are tried in order: battery, explicit profile, universal catalogue,
/// value-shape heuristic. Whatever falls through is logged as unknown.
pub struct DataPointRouter {
    device: String,
    profile: Arc<DeviceProfile>,
    capabilities: Arc<dyn CapabilityOracle>,
    battery: Arc<dyn BatteryOracle>,
    heuristic_cache: HashMap<u8, &'static str>,
    settings: BTreeMap<u8, DpValue>,
    unknown: UnknownLog,
}

impl DataPointRouter {
    pub fn new(
        device: impl Into<String>,
        profile: Arc<DeviceProfile>,
        capabilities: Arc<dyn CapabilityOracle>,
        battery: Arc<dyn BatteryOracle>,
    ) -> Self {
        Self {
            device: device.into(),
            profile,
            capabilities,
            battery,
            heuristic_cache: HashMap::new(),
            settings: BTreeMap::new(),
            unknown: UnknownLog::default(),
        }
    }

    pub fn profile(&self) -> &DeviceProfile {
        &self.profile
    }

    pub fn unknown(&self) -> &UnknownLog {
        &self.unknown
    }

    /// Last value of every DataPoint recorded as a setting.
    pub fn settings(&self) -> &BTreeMap<u8, DpValue> {
        &self.settings
    }

    /// Attribute the heuristic settled on for `dp`, if any.
    pub fn learned(&self, dp: u8) -> Option<&'static str> {
        self.heuristic_cache.get(&dp).copied()
    }

    pub fn route(&mut self, dp: u8, value: &DpValue) -> RouteOutcome {
        let outcome = self
            .route_battery(dp, value)
            .or_else(|| self.route_explicit(dp, value))
            .or_else(|| self.route_universal(dp, value))
            .or_else(|| self.route_heuristic(dp, value));

        match outcome {
            Some(outcome) => {
                tracing::debug!(device = %self.device, dp, ?outcome, "datapoint routed");
                outcome
            }
            None => {
                self.unknown.record(dp, value);
                tracing::debug!(device = %self.device, dp, kind = value.kind(), "unknown datapoint");
                RouteOutcome::Unknown
            }
        }
    }

    fn has(&self, attribute: &str) -> bool {
        self.capabilities.has_attribute(&self.device, attribute)
    }

    fn route_battery(&self, dp: u8, value: &DpValue) -> Option<RouteOutcome> {
        let battery = &self.profile.battery;
        let role = battery.role_of(dp)?;
        // A battery dp never resolves through later layers.
        if !self.has(attr::MEASURE_BATTERY) {
            return Some(RouteOutcome::Dropped {
                reason: "device has no battery capability",
            });
        }

        let percent = match role {
            BatteryRole::Percentage => value.as_i64().map(|v| v.clamp(0, 100) as f64),
            BatteryRole::State => value
                .as_i64()
                .and_then(|v| usize::try_from(v).ok())
                .and_then(|i| BATTERY_STATE_PERCENT.get(i).copied()),
            BatteryRole::Voltage => value.as_i64().map(|raw| {
                self.battery
                    .calculate_battery_percentage(raw as f64, &battery.config)
                    .clamp(0.0, 100.0)
            }),
        };
        let Some(percent) = percent else {
            return Some(RouteOutcome::Dropped {
                reason: "battery value not convertible",
            });
        };

        let mut secondary = Vec::new();
        if self.has(attr::ALARM_BATTERY) {
            secondary.push(AttributeWrite {
                attribute: attr::ALARM_BATTERY.to_string(),
                value: AttributeValue::Bool(percent <= battery.low_threshold),
            });
        }
        Some(RouteOutcome::Routed {
            attribute: attr::MEASURE_BATTERY.to_string(),
            value: AttributeValue::Number(percent),
            source: RouteSource::Battery,
            secondary,
        })
    }

    fn route_explicit(&mut self, dp: u8, value: &DpValue) -> Option<RouteOutcome> {
        let mapping = self.profile.mapping_for(dp)?;
        let Some(attribute) = mapping.attribute.as_deref() else {
            self.settings.insert(dp, value.clone());
            return Some(RouteOutcome::SettingOnly);
        };
        Some(match mapping.resolve(value) {
            Some(converted) => RouteOutcome::routed(attribute, converted, RouteSource::Explicit),
            None => RouteOutcome::Dropped {
                reason: "explicit mapping rejected value",
            },
        })
    }

    fn route_universal(&self, dp: u8, value: &DpValue) -> Option<RouteOutcome> {
        universal::resolve(dp, value, |attribute| self.has(attribute))
            .map(|(attribute, converted)| {
                RouteOutcome::routed(attribute, converted, RouteSource::Universal)
            })
    }

    fn route_heuristic(&mut self, dp: u8, value: &DpValue) -> Option<RouteOutcome> {
        let DpValue::Value(raw) = value else {
            return None;
        };
        let raw = i64::from(*raw);

        let attribute = match self.heuristic_cache.get(&dp) {
            Some(cached) => *cached,
            None => {
                let chosen = self.heuristic_candidate(dp, raw)?;
                tracing::info!(device = %self.device, dp, attribute = chosen, "heuristic mapping learned");
                self.heuristic_cache.insert(dp, chosen);
                chosen
            }
        };

        let converted = if attribute == attr::MEASURE_TEMPERATURE {
            raw as f64 / 10.0
        } else {
            raw as f64
        };
        Some(RouteOutcome::routed(
            attribute,
            AttributeValue::Number(converted),
            RouteSource::Heuristic,
        ))
    }

    fn heuristic_candidate(&self, dp: u8, raw: i64) -> Option<&'static str> {
        let mut candidates: Vec<&'static str> = Vec::with_capacity(3);
        if TEMPERATURE_RANGE.contains(&raw) && self.has(attr::MEASURE_TEMPERATURE) {
            candidates.push(attr::MEASURE_TEMPERATURE);
        }
        if PERCENT_RANGE.contains(&raw) {
            let humidity = self.has(attr::MEASURE_HUMIDITY);
            let battery = self.has(attr::MEASURE_BATTERY);
            match (humidity, battery) {
                (true, true) if dp >= self.profile.heuristic_battery_threshold => {
                    candidates.push(attr::MEASURE_BATTERY)
                }
                (true, _) => candidates.push(attr::MEASURE_HUMIDITY),
                (false, true) => candidates.push(attr::MEASURE_BATTERY),
                (false, false) => {}
            }
        }
        match candidates.as_slice() {
            [only] => Some(*only),
            _ => None,
        }
    }
}
