use chrono::{DateTime, Datelike, NaiveDateTime, Timelike, Utc};

use crate::clock::LocalClock;
use crate::format::{ByteOrder, EpochBase, TimeSyncFormat, Zone};

/// Build the time payload for `format` at `now` with a fixed offset.
///
/// Pure: the same inputs always yield the same bytes. The DST flag is false.
pub fn build_payload(format: TimeSyncFormat, now: DateTime<Utc>, tz_offset_minutes: i32) -> Vec<u8> {
    build_payload_with_clock(format, &LocalClock::new(now, tz_offset_minutes))
}

/// Build the time payload for `format` from a fully observed clock.
pub fn build_payload_with_clock(format: TimeSyncFormat, clock: &LocalClock) -> Vec<u8> {
    let mut out = Vec::with_capacity(format.wire_len());
    match format {
        TimeSyncFormat::Epoch { base, order, zone } => {
            let secs = match zone {
                Zone::Utc => clock.utc_secs(),
                Zone::Local => clock.local_secs(),
            };
            let value = epoch_value(secs, base);
            match order {
                ByteOrder::Big => out.extend_from_slice(&value.to_be_bytes()),
                ByteOrder::Little => out.extend_from_slice(&value.to_le_bytes()),
            }
        }
        TimeSyncFormat::DualEpoch { base } => {
            out.extend_from_slice(&epoch_value(clock.local_secs(), base).to_be_bytes());
            out.extend_from_slice(&epoch_value(clock.utc_secs(), base).to_be_bytes());
        }
        TimeSyncFormat::DateString { layout } => {
            let local = clock.local_naive();
            out.push(u8::try_from((local.year() - 2000).clamp(0, 255)).unwrap_or(0));
            push_wall_clock(&mut out, &local);
            if layout.timezone {
                push_timezone(&mut out, clock.offset_minutes);
            }
            if layout.dst {
                out.push(u8::from(clock.dst));
            }
        }
        TimeSyncFormat::McuHeader => {
            out.push(0x08);
            out.extend_from_slice(&epoch_value(clock.utc_secs(), EpochBase::Unix1970).to_be_bytes());
            out.extend_from_slice(&epoch_value(clock.local_secs(), EpochBase::Unix1970).to_be_bytes());
        }
        TimeSyncFormat::Gateway => {
            let local = clock.local_naive();
            out.push(0x01);
            let year = u16::try_from(local.year().clamp(0, i32::from(u16::MAX))).unwrap_or(0);
            out.extend_from_slice(&year.to_be_bytes());
            push_wall_clock(&mut out, &local);
            push_timezone(&mut out, clock.offset_minutes);
            out.push(u8::from(clock.dst));
        }
    }
    out
}

/// Month, day, hour, minute, second, weekday (Monday=1..Sunday=7).
fn push_wall_clock(out: &mut Vec<u8>, local: &NaiveDateTime) {
    out.extend_from_slice(&[
        local.month() as u8,
        local.day() as u8,
        local.hour() as u8,
        local.minute() as u8,
        local.second() as u8,
        weekday(local),
    ]);
}

fn push_timezone(out: &mut Vec<u8>, offset_minutes: i32) {
    let hours = (offset_minutes / 60).clamp(i32::from(i8::MIN), i32::from(i8::MAX)) as i8;
    out.push(hours as u8);
    out.push((offset_minutes % 60).unsigned_abs() as u8);
}

/// Weekday in 1..=7 with Sunday as 7.
pub fn weekday(local: &NaiveDateTime) -> u8 {
    match local.weekday().num_days_from_sunday() {
        0 => 7,
        day => day as u8,
    }
}

/// Seconds relative to `base`, clamped into `u32`.
fn epoch_value(unix_secs: i64, base: EpochBase) -> u32 {
    let secs = (unix_secs - base.offset_secs()).max(0);
    u32::try_from(secs).unwrap_or(u32::MAX)
}

/// Fields recovered from a time payload.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedTime {
    pub utc: Option<DateTime<Utc>>,
    pub local: Option<NaiveDateTime>,
    pub weekday: Option<u8>,
    pub tz_offset_minutes: Option<i32>,
    pub dst: Option<bool>,
}

/// Interpret `bytes` as a payload of `format`.
///
/// Returns `None` when the length does not match the format or a date field
/// is out of range.
pub fn parse_payload(format: TimeSyncFormat, bytes: &[u8]) -> Option<ParsedTime> {
    if bytes.len() != format.wire_len() {
        return None;
    }
    let mut parsed = ParsedTime::default();
    match format {
        TimeSyncFormat::Epoch { base, order, zone } => {
            let raw: [u8; 4] = bytes.try_into().ok()?;
            let value = match order {
                ByteOrder::Big => u32::from_be_bytes(raw),
                ByteOrder::Little => u32::from_le_bytes(raw),
            };
            let instant = from_epoch(value, base)?;
            match zone {
                Zone::Utc => parsed.utc = Some(instant),
                Zone::Local => parsed.local = Some(instant.naive_utc()),
            }
        }
        TimeSyncFormat::DualEpoch { base } => {
            parsed.local = Some(from_epoch(read_be32(&bytes[0..4])?, base)?.naive_utc());
            parsed.utc = Some(from_epoch(read_be32(&bytes[4..8])?, base)?);
        }
        TimeSyncFormat::DateString { layout } => {
            let year = 2000 + i32::from(bytes[0]);
            parsed.local = Some(wall_clock(year, &bytes[1..6])?);
            parsed.weekday = Some(bytes[6]);
            let mut rest = &bytes[7..];
            if layout.timezone {
                parsed.tz_offset_minutes = Some(read_timezone(rest[0], rest[1]));
                rest = &rest[2..];
            }
            if layout.dst {
                parsed.dst = Some(rest[0] != 0);
            }
        }
        TimeSyncFormat::McuHeader => {
            if bytes[0] != 0x08 {
                return None;
            }
            parsed.utc = Some(from_epoch(read_be32(&bytes[1..5])?, EpochBase::Unix1970)?);
            parsed.local =
                Some(from_epoch(read_be32(&bytes[5..9])?, EpochBase::Unix1970)?.naive_utc());
        }
        TimeSyncFormat::Gateway => {
            if bytes[0] != 0x01 {
                return None;
            }
            let year = i32::from(u16::from_be_bytes([bytes[1], bytes[2]]));
            parsed.local = Some(wall_clock(year, &bytes[3..8])?);
            parsed.weekday = Some(bytes[8]);
            parsed.tz_offset_minutes = Some(read_timezone(bytes[9], bytes[10]));
            parsed.dst = Some(bytes[11] != 0);
        }
    }
    Some(parsed)
}

fn read_be32(bytes: &[u8]) -> Option<u32> {
    Some(u32::from_be_bytes(bytes.try_into().ok()?))
}

fn from_epoch(value: u32, base: EpochBase) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp(i64::from(value) + base.offset_secs(), 0)
}

fn wall_clock(year: i32, fields: &[u8]) -> Option<NaiveDateTime> {
    chrono::NaiveDate::from_ymd_opt(year, u32::from(fields[0]), u32::from(fields[1]))?.and_hms_opt(
        u32::from(fields[2]),
        u32::from(fields[3]),
        u32::from(fields[4]),
    )
}

fn read_timezone(hours: u8, minutes: u8) -> i32 {
    let hours = i32::from(hours as i8);
    let minutes = i32::from(minutes);
    if hours < 0 {
        hours * 60 - minutes
    } else {
        hours * 60 + minutes
    }
}
