use chrono::{DateTime, Datelike, Local, NaiveDateTime, Offset, TimeZone, Utc};

/// Source of the local UTC offset at a given instant.
pub trait OffsetSource {
    /// UTC offset in minutes (east positive) in effect at `utc`.
    fn offset_minutes_at(&self, utc: DateTime<Utc>) -> i32;
}

impl<F> OffsetSource for F
where
    F: Fn(DateTime<Utc>) -> i32,
{
    fn offset_minutes_at(&self, utc: DateTime<Utc>) -> i32 {
        self(utc)
    }
}

/// A constant offset with no daylight saving.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedOffsetSource(pub i32);

impl OffsetSource for FixedOffsetSource {
    fn offset_minutes_at(&self, _utc: DateTime<Utc>) -> i32 {
        self.0
    }
}

/// The host's local timezone as reported by the OS.
#[derive(Debug, Clone, Copy, Default)]
pub struct HostOffsetSource;

impl OffsetSource for HostOffsetSource {
    fn offset_minutes_at(&self, utc: DateTime<Utc>) -> i32 {
        Local
            .offset_from_utc_datetime(&utc.naive_utc())
            .fix()
            .local_minus_utc()
            / 60
    }
}

/// Whether daylight saving is in effect at `utc`.
///
/// The standard offset is the smaller of the January 1 and July 1 offsets of
/// the same year; DST is active when the current offset exceeds it.
pub fn is_dst(source: &dyn OffsetSource, utc: DateTime<Utc>) -> bool {
    let year = utc.year();
    let probe = |month: u32| {
        Utc.with_ymd_and_hms(year, month, 1, 0, 0, 0)
            .single()
            .map(|instant| source.offset_minutes_at(instant))
    };
    let current = source.offset_minutes_at(utc);
    match (probe(1), probe(7)) {
        (Some(jan), Some(jul)) => current > jan.min(jul),
        _ => false,
    }
}

/// An instant together with the local offset and DST state used to encode it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocalClock {
    pub utc: DateTime<Utc>,
    pub offset_minutes: i32,
    pub dst: bool,
}

impl LocalClock {
    /// Clock with an explicit offset and no DST flag.
    pub fn new(utc: DateTime<Utc>, offset_minutes: i32) -> Self {
        Self {
            utc,
            offset_minutes,
            dst: false,
        }
    }

    /// Clock whose offset and DST flag are read from `source`.
    pub fn observe(utc: DateTime<Utc>, source: &dyn OffsetSource) -> Self {
        Self {
            utc,
            offset_minutes: source.offset_minutes_at(utc),
            dst: is_dst(source, utc),
        }
    }

    /// Unix seconds of the instant.
    pub fn utc_secs(&self) -> i64 {
        self.utc.timestamp()
    }

    /// Unix seconds shifted by the local offset.
    pub fn local_secs(&self) -> i64 {
        self.utc_secs() + i64::from(self.offset_minutes) * 60
    }

    /// Wall-clock date and time in the local offset.
    pub fn local_naive(&self) -> NaiveDateTime {
        self.utc.naive_utc() + chrono::Duration::minutes(i64::from(self.offset_minutes))
    }
}

/// Supplies the current time to the engine.
pub trait Clock: Send + Sync {
    fn now(&self) -> LocalClock;
}

/// Wall clock backed by the host timezone.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> LocalClock {
        LocalClock::observe(Utc::now(), &HostOffsetSource)
    }
}

/// A clock frozen at one instant.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub LocalClock);

impl Clock for FixedClock {
    fn now(&self) -> LocalClock {
        self.0
    }
}
