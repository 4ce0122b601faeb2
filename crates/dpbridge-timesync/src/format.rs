use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::TimeSyncError;

/// Seconds between 1970-01-01 and 2000-01-01.
pub const Y2000_OFFSET_SECS: i64 = 946_684_800;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EpochBase {
    Unix1970,
    Y2000,
}

impl EpochBase {
    /// Offset subtracted from Unix seconds before encoding.
    pub fn offset_secs(self) -> i64 {
        match self {
            Self::Unix1970 => 0,
            Self::Y2000 => Y2000_OFFSET_SECS,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ByteOrder {
    Big,
    Little,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Zone {
    Utc,
    Local,
}

/// Optional trailing fields of a date-string payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct DateLayout {
    /// Append timezone hour (signed) and minute bytes.
    pub timezone: bool,
    /// Append a DST flag byte.
    pub dst: bool,
}

impl DateLayout {
    pub const PLAIN: Self = Self {
        timezone: false,
        dst: false,
    };
    pub const FULL: Self = Self {
        timezone: true,
        dst: true,
    };
}

/// Wire encodings a device may expect in answer to a time request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TimeSyncFormat {
    /// 4-byte seconds counter.
    Epoch {
        base: EpochBase,
        order: ByteOrder,
        zone: Zone,
    },
    /// 8 bytes: local seconds then UTC seconds, big-endian.
    DualEpoch { base: EpochBase },
    /// 7-10 bytes: year-2000, month, day, hour, minute, second, weekday,
    /// then the optional fields of `layout`.
    DateString { layout: DateLayout },
    /// 9 bytes: length byte `0x08`, UTC seconds, local seconds (1970 base, big-endian).
    McuHeader,
    /// 12 bytes with a full 4-digit year.
    Gateway,
}

/// Format used when no selection rule matches.
pub const DEFAULT_FORMAT: TimeSyncFormat = TimeSyncFormat::DateString {
    layout: DateLayout::PLAIN,
};

/// Fixed order in which alternative formats are tried.
pub const FALLBACK_ORDER: [TimeSyncFormat; 12] = [
    TimeSyncFormat::McuHeader,
    TimeSyncFormat::DualEpoch {
        base: EpochBase::Unix1970,
    },
    TimeSyncFormat::Epoch {
        base: EpochBase::Unix1970,
        order: ByteOrder::Big,
        zone: Zone::Utc,
    },
    TimeSyncFormat::Epoch {
        base: EpochBase::Unix1970,
        order: ByteOrder::Big,
        zone: Zone::Local,
    },
    TimeSyncFormat::Epoch {
        base: EpochBase::Y2000,
        order: ByteOrder::Big,
        zone: Zone::Utc,
    },
    TimeSyncFormat::Epoch {
        base: EpochBase::Y2000,
        order: ByteOrder::Big,
        zone: Zone::Local,
    },
    TimeSyncFormat::DateString {
        layout: DateLayout::PLAIN,
    },
    TimeSyncFormat::DateString {
        layout: DateLayout::FULL,
    },
    TimeSyncFormat::Gateway,
    TimeSyncFormat::DualEpoch {
        base: EpochBase::Y2000,
    },
    TimeSyncFormat::Epoch {
        base: EpochBase::Unix1970,
        order: ByteOrder::Little,
        zone: Zone::Utc,
    },
    TimeSyncFormat::Epoch {
        base: EpochBase::Y2000,
        order: ByteOrder::Little,
        zone: Zone::Local,
    },
];

/// Alternatives to try after `format` is rejected, in fixed order.
///
/// The chain is [`FALLBACK_ORDER`] without `format` itself.
pub fn fallback_chain(format: TimeSyncFormat) -> Vec<TimeSyncFormat> {
    FALLBACK_ORDER
        .iter()
        .copied()
        .filter(|candidate| *candidate != format)
        .collect()
}

impl TimeSyncFormat {
    /// Payload size in bytes.
    pub fn wire_len(&self) -> usize {
        match self {
            Self::Epoch { .. } => 4,
            Self::DualEpoch { .. } => 8,
            Self::DateString { layout } => {
                let timezone = if layout.timezone { 2 } else { 0 };
                7 + timezone + usize::from(layout.dst)
            }
            Self::McuHeader => 9,
            Self::Gateway => 12,
        }
    }
}

impl fmt::Display for TimeSyncFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Epoch { base, order, zone } => write!(
                f,
                "epoch-{}-{}-{}",
                base_label(*base),
                match order {
                    ByteOrder::Big => "be",
                    ByteOrder::Little => "le",
                },
                match zone {
                    Zone::Utc => "utc",
                    Zone::Local => "local",
                }
            ),
            Self::DualEpoch { base } => write!(f, "dual-{}", base_label(*base)),
            Self::DateString { layout } => {
                write!(f, "date")?;
                if layout.timezone {
                    write!(f, "-tz")?;
                }
                if layout.dst {
                    write!(f, "-dst")?;
                }
                Ok(())
            }
            Self::McuHeader => write!(f, "mcu-header"),
            Self::Gateway => write!(f, "gateway"),
        }
    }
}

impl FromStr for TimeSyncFormat {
    type Err = TimeSyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let label = s.trim().to_ascii_lowercase();
        let parts: Vec<&str> = label.split('-').collect();
        let unknown = || TimeSyncError::UnknownFormat(s.to_string());

        match parts.as_slice() {
            ["mcu", "header"] => Ok(Self::McuHeader),
            ["gateway"] => Ok(Self::Gateway),
            ["dual", base] => Ok(Self::DualEpoch {
                base: parse_base(base).ok_or_else(unknown)?,
            }),
            ["epoch", base, order, zone] => Ok(Self::Epoch {
                base: parse_base(base).ok_or_else(unknown)?,
                order: match *order {
                    "be" => ByteOrder::Big,
                    "le" => ByteOrder::Little,
                    _ => return Err(unknown()),
                },
                zone: match *zone {
                    "utc" => Zone::Utc,
                    "local" => Zone::Local,
                    _ => return Err(unknown()),
                },
            }),
            ["date", rest @ ..] => {
                let mut layout = DateLayout::PLAIN;
                for flag in rest {
                    match *flag {
                        "tz" if !layout.timezone && !layout.dst => layout.timezone = true,
                        "dst" if !layout.dst => layout.dst = true,
                        _ => return Err(unknown()),
                    }
                }
                Ok(Self::DateString { layout })
            }
            _ => Err(unknown()),
        }
    }
}

fn base_label(base: EpochBase) -> &'static str {
    match base {
        EpochBase::Unix1970 => "1970",
        EpochBase::Y2000 => "2000",
    }
}

fn parse_base(label: &str) -> Option<EpochBase> {
    match label {
        "1970" => Some(EpochBase::Unix1970),
        "2000" => Some(EpochBase::Y2000),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_lengths_cover_documented_range() {
        for format in FALLBACK_ORDER {
            let len = format.wire_len();
            assert!((4..=12).contains(&len), "{format} has length {len}");
        }
        assert_eq!(DEFAULT_FORMAT.wire_len(), 7);
        assert_eq!(
            TimeSyncFormat::DateString {
                layout: DateLayout::FULL
            }
            .wire_len(),
            10
        );
    }

    #[test]
    fn labels_parse_back() {
        for format in FALLBACK_ORDER {
            let label = format.to_string();
            assert_eq!(label.parse::<TimeSyncFormat>().unwrap(), format);
        }
        assert!("epoch-1999-be-utc".parse::<TimeSyncFormat>().is_err());
        assert!("date-dst-tz".parse::<TimeSyncFormat>().is_err());
    }

    #[test]
    fn fallback_chain_excludes_primary_and_keeps_order() {
        let chain = fallback_chain(TimeSyncFormat::McuHeader);
        assert_eq!(chain.len(), FALLBACK_ORDER.len() - 1);
        assert!(!chain.contains(&TimeSyncFormat::McuHeader));
        assert_eq!(chain[0], FALLBACK_ORDER[1]);
    }

    #[test]
    fn fallback_chain_is_deterministic() {
        assert_eq!(fallback_chain(DEFAULT_FORMAT), fallback_chain(DEFAULT_FORMAT));
    }

    #[test]
    fn serde_uses_kind_tag() {
        let json = serde_json::to_string(&TimeSyncFormat::Gateway).unwrap();
        assert_eq!(json, r#"{"kind":"gateway"}"#);
        let back: TimeSyncFormat = serde_json::from_str(
            r#"{"kind":"epoch","base":"y2000","order":"little","zone":"local"}"#,
        )
        .unwrap();
        assert_eq!(
            back,
            TimeSyncFormat::Epoch {
                base: EpochBase::Y2000,
                order: ByteOrder::Little,
                zone: Zone::Local
            }
        );
    }
}
