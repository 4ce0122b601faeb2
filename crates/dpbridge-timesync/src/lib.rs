//! Time-sync sub-protocol for DataPoint devices.
//!
//! Devices ask the coordinator for the current time and expect one of several
//! incompatible payload layouts. This crate picks a primary layout from the
//! device identity ([`select_format`]), encodes payloads deterministically
//! ([`build_payload`]) and exposes the fixed fallback order tried when a
//! device keeps asking.

pub mod clock;
pub mod error;
pub mod format;
pub mod payload;
pub mod select;

pub use clock::{
    is_dst, Clock, FixedClock, FixedOffsetSource, HostOffsetSource, LocalClock, OffsetSource,
    SystemClock,
};
pub use error::{Result, TimeSyncError};
pub use format::{
    fallback_chain, ByteOrder, DateLayout, EpochBase, TimeSyncFormat, Zone, DEFAULT_FORMAT,
    FALLBACK_ORDER, Y2000_OFFSET_SECS,
};
pub use payload::{build_payload, build_payload_with_clock, parse_payload, weekday, ParsedTime};
pub use select::{matching_rule, select_format, SelectionRule, RULES};
