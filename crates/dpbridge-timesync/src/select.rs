use crate::format::{DateLayout, EpochBase, TimeSyncFormat, DEFAULT_FORMAT};

/// Maps device identity keywords to a time-sync format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SelectionRule {
    pub name: &'static str,
    /// Lowercase substrings matched against model and manufacturer.
    pub keywords: &'static [&'static str],
    pub format: TimeSyncFormat,
}

impl SelectionRule {
    fn matches(&self, model: &str, manufacturer: &str) -> bool {
        self.keywords
            .iter()
            .any(|keyword| model.contains(keyword) || manufacturer.contains(keyword))
    }
}

/// Rules in priority order. The first match wins.
pub const RULES: &[SelectionRule] = &[
    SelectionRule {
        name: "gateway",
        keywords: &["gateway", "hub", "bridge"],
        format: TimeSyncFormat::Gateway,
    },
    SelectionRule {
        name: "thermostat",
        keywords: &["thermostat", "valve", "radiator", "trv"],
        format: TimeSyncFormat::McuHeader,
    },
    SelectionRule {
        name: "display",
        keywords: &["clock", "lcd", "display"],
        format: TimeSyncFormat::DateString {
            layout: DateLayout::FULL,
        },
    },
    SelectionRule {
        name: "mcu",
        keywords: &["ts0601", "_tze200_", "_tze204_"],
        format: TimeSyncFormat::DualEpoch {
            base: EpochBase::Unix1970,
        },
    },
];

/// First rule matching the device identity, if any.
pub fn matching_rule(model: &str, manufacturer: &str) -> Option<&'static SelectionRule> {
    let model = model.to_ascii_lowercase();
    let manufacturer = manufacturer.to_ascii_lowercase();
    RULES.iter().find(|rule| rule.matches(&model, &manufacturer))
}

/// Pick the primary time-sync format for a device. Total.
pub fn select_format(model: &str, manufacturer: &str) -> TimeSyncFormat {
    match matching_rule(model, manufacturer) {
        Some(rule) => {
            tracing::debug!(model, manufacturer, rule = rule.name, format = %rule.format, "time-sync format selected");
            rule.format
        }
        None => {
            tracing::debug!(model, manufacturer, format = %DEFAULT_FORMAT, "no time-sync rule matched, using default");
            DEFAULT_FORMAT
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn thermostat_by_model() {
        assert_eq!(
            select_format("Smart Radiator Thermostat", "Acme"),
            TimeSyncFormat::McuHeader
        );
    }

    #[test]
    fn manufacturer_prefix_selects_dual_epoch() {
        assert_eq!(
            select_format("TS0601", "_TZE200_abcdefgh"),
            TimeSyncFormat::DualEpoch {
                base: EpochBase::Unix1970
            }
        );
    }

    #[test]
    fn earlier_rule_wins() {
        // "TS0601" would match the mcu rule, "thermostat" comes first.
        assert_eq!(
            select_format("TS0601 thermostat", "_TZE204_x"),
            TimeSyncFormat::McuHeader
        );
        assert_eq!(matching_rule("LCD hub", "").map(|rule| rule.name), Some("gateway"));
    }

    #[test]
    fn unknown_device_gets_default() {
        assert_eq!(select_format("", ""), DEFAULT_FORMAT);
        assert_eq!(select_format("door sensor", "generic"), DEFAULT_FORMAT);
    }
}
