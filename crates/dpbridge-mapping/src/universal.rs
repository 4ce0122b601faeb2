//! Fallback catalogue of common DataPoint id assignments.
//!
//! Many vendors reuse the same ids for the same quantities. When a device has
//! no explicit mapping for an id, the router walks the candidates listed here
//! and picks the first whose attribute the device exposes and whose
//! conversion fits the value.

use dpbridge_codec::DpValue;

use crate::transform::{AttributeValue, Transform};

/// Attribute names shared by the catalogue, profiles, and the router.
pub mod attr {
    pub const ONOFF: &str = "onoff";
    pub const ALARM_MOTION: &str = "alarm_motion";
    pub const ALARM_CONTACT: &str = "alarm_contact";
    pub const ALARM_WATER: &str = "alarm_water";
    pub const ALARM_SMOKE: &str = "alarm_smoke";
    pub const ALARM_BATTERY: &str = "alarm_battery";
    pub const MEASURE_TEMPERATURE: &str = "measure_temperature";
    pub const MEASURE_HUMIDITY: &str = "measure_humidity";
    pub const MEASURE_LUMINANCE: &str = "measure_luminance";
    pub const MEASURE_BATTERY: &str = "measure_battery";
    pub const MEASURE_CURRENT: &str = "measure_current";
    pub const MEASURE_POWER: &str = "measure_power";
    pub const MEASURE_VOLTAGE: &str = "measure_voltage";
    pub const TARGET_TEMPERATURE: &str = "target_temperature";
}

/// Const-constructible subset of [`Transform`] used by the catalogue.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Conversion {
    Bool,
    Number,
    Scaled(f64),
}

impl Conversion {
    pub fn fits(self, value: &DpValue) -> bool {
        match self {
            Self::Bool => match value {
                DpValue::Bool(_) => true,
                DpValue::Enum(e) => *e <= 1,
                _ => false,
            },
            Self::Number | Self::Scaled(_) => matches!(value, DpValue::Value(_)),
        }
    }

    pub fn apply(self, value: &DpValue) -> Option<AttributeValue> {
        self.transform().apply(value)
    }

    pub fn transform(self) -> Transform {
        match self {
            Self::Bool => Transform::Bool,
            Self::Number => Transform::Identity,
            Self::Scaled(divisor) => Transform::scale(divisor),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Candidate {
    pub attribute: &'static str,
    pub conversion: Conversion,
}

const fn candidate(attribute: &'static str, conversion: Conversion) -> Candidate {
    Candidate {
        attribute,
        conversion,
    }
}

/// `(dp, candidates)` in lookup order.
pub static CATALOGUE: &[(u8, &[Candidate])] = &[
    (
        1,
        &[
            candidate(attr::ONOFF, Conversion::Bool),
            candidate(attr::ALARM_MOTION, Conversion::Bool),
            candidate(attr::ALARM_CONTACT, Conversion::Bool),
            candidate(attr::MEASURE_TEMPERATURE, Conversion::Scaled(10.0)),
            candidate(attr::ALARM_WATER, Conversion::Bool),
            candidate(attr::ALARM_SMOKE, Conversion::Bool),
        ],
    ),
    (
        2,
        &[
            candidate(attr::MEASURE_HUMIDITY, Conversion::Number),
            candidate(attr::MEASURE_LUMINANCE, Conversion::Number),
            candidate(attr::TARGET_TEMPERATURE, Conversion::Scaled(10.0)),
        ],
    ),
    (3, &[candidate(attr::MEASURE_TEMPERATURE, Conversion::Scaled(10.0))]),
    (4, &[candidate(attr::MEASURE_BATTERY, Conversion::Number)]),
    (12, &[candidate(attr::MEASURE_LUMINANCE, Conversion::Number)]),
    (
        18,
        &[
            candidate(attr::MEASURE_CURRENT, Conversion::Scaled(1000.0)),
            candidate(attr::MEASURE_TEMPERATURE, Conversion::Scaled(10.0)),
        ],
    ),
    (
        19,
        &[
            candidate(attr::MEASURE_POWER, Conversion::Scaled(10.0)),
            candidate(attr::MEASURE_HUMIDITY, Conversion::Number),
        ],
    ),
    (20, &[candidate(attr::MEASURE_VOLTAGE, Conversion::Scaled(10.0))]),
    (101, &[candidate(attr::MEASURE_LUMINANCE, Conversion::Number)]),
];

/// Candidates for `dp`, empty when the id is not catalogued.
pub fn candidates(dp: u8) -> &'static [Candidate] {
    CATALOGUE
        .iter()
        .find(|(id, _)| *id == dp)
        .map(|(_, list)| *list)
        .unwrap_or(&[])
}

/// First candidate for `dp` accepted by `has_attribute` whose conversion fits `value`.
pub fn resolve(
    dp: u8,
    value: &DpValue,
    mut has_attribute: impl FnMut(&str) -> bool,
) -> Option<(&'static str, AttributeValue)> {
    candidates(dp)
        .iter()
        .filter(|c| c.conversion.fits(value))
        .filter(|c| has_attribute(c.attribute))
        .find_map(|c| c.conversion.apply(value).map(|v| (c.attribute, v)))
}
