use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use dpbridge_codec::DpValue;
use serde::{Deserialize, Serialize};

/// Value written to a semantic attribute.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttributeValue {
    Bool(bool),
    Number(f64),
    Text(String),
}

impl AttributeValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            Self::Bool(_) | Self::Text(_) => None,
        }
    }
}

impl fmt::Display for AttributeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(b) => write!(f, "{b}"),
            Self::Number(n) => write!(f, "{n}"),
            Self::Text(s) => f.write_str(s),
        }
    }
}

type CustomFn = dyn Fn(&DpValue) -> Option<AttributeValue> + Send + Sync;

/// A transform supplied in code rather than in a profile document.
#[derive(Clone)]
pub struct CustomTransform {
    name: &'static str,
    func: Arc<CustomFn>,
}

impl CustomTransform {
    pub fn new<F>(name: &'static str, func: F) -> Self
    where
        F: Fn(&DpValue) -> Option<AttributeValue> + Send + Sync + 'static,
    {
        Self {
            name,
            func: Arc::new(func),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl fmt::Debug for CustomTransform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("CustomTransform").field(&self.name).finish()
    }
}

impl PartialEq for CustomTransform {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.func, &other.func)
    }
}

/// Conversion from a decoded DataPoint value to an attribute value.
///
/// Every variant is a pure function. `Custom` cannot appear in profile
/// documents; it is attached programmatically.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Transform {
    /// Bools stay bools, integers become numbers, strings become text.
    #[default]
    Identity,
    /// Integer divided by `divisor`.
    Scale { divisor: f64 },
    /// Non-zero is true.
    Bool,
    /// Zero is true.
    InvertBool,
    /// Enum ordinal looked up in `values`, keyed by the decimal ordinal.
    EnumMap { values: BTreeMap<String, String> },
    #[serde(skip)]
    Custom(CustomTransform),
}

impl Transform {
    /// Shorthand for `Scale { divisor }`.
    pub fn scale(divisor: f64) -> Self {
        Self::Scale { divisor }
    }

    /// Apply to `value`. `None` means the value does not convert.
    pub fn apply(&self, value: &DpValue) -> Option<AttributeValue> {
        match self {
            Self::Identity => match value {
                DpValue::Bool(b) => Some(AttributeValue::Bool(*b)),
                DpValue::String(s) => Some(AttributeValue::Text(s.clone())),
                DpValue::Raw(_) => None,
                other => other.as_i64().map(|v| AttributeValue::Number(v as f64)),
            },
            Self::Scale { divisor } => {
                if *divisor == 0.0 || !divisor.is_finite() {
                    return None;
                }
                let raw = match value {
                    DpValue::Bool(_) => return None,
                    other => other.as_i64()?,
                };
                Some(AttributeValue::Number(raw as f64 / divisor))
            }
            Self::Bool => value.as_bool().map(AttributeValue::Bool),
            Self::InvertBool => value.as_bool().map(|b| AttributeValue::Bool(!b)),
            Self::EnumMap { values } => {
                let ordinal = value.as_i64()?.to_string();
                values.get(&ordinal).cloned().map(AttributeValue::Text)
            }
            Self::Custom(custom) => (custom.func)(value),
        }
    }

    /// Whether `value` has a shape this transform is meant for.
    pub fn fits(&self, value: &DpValue) -> bool {
        match self {
            Self::Identity => !matches!(value, DpValue::Raw(_)),
            Self::Scale { .. } => value.is_numeric(),
            Self::Bool | Self::InvertBool => matches!(value, DpValue::Bool(_) | DpValue::Enum(_)),
            Self::EnumMap { .. } => matches!(value, DpValue::Enum(_) | DpValue::Value(_)),
            Self::Custom(_) => true,
        }
    }
}

/// Inclusive bounds a numeric attribute value must fall within.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ValidRange {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
}

impl ValidRange {
    pub fn new(min: f64, max: f64) -> Self {
        Self {
            min: Some(min),
            max: Some(max),
        }
    }

    /// Non-numeric values always pass.
    pub fn contains(&self, value: &AttributeValue) -> bool {
        let Some(n) = value.as_f64() else {
            return true;
        };
        self.min.is_none_or(|min| n >= min) && self.max.is_none_or(|max| n <= max)
    }
}
