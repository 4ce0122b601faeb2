use std::time::{Duration, Instant};

use dpbridge_timesync::{fallback_chain, TimeSyncFormat};

/// How the engine answers device time requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeSyncPolicy {
    /// Delay before the identical second reply.
    pub double_send_delay: Duration,
    /// A request within this long after a reply counts as a re-request.
    pub rerequest_window: Duration,
    /// Consecutive re-requests before moving to the next fallback format.
    /// `None` keeps the primary format forever.
    pub advance_after: Option<u32>,
}

impl Default for TimeSyncPolicy {
    fn default() -> Self {
        Self {
            double_send_delay: Duration::from_millis(200),
            rerequest_window: Duration::from_secs(60),
            advance_after: Some(3),
        }
    }
}

/// Per-device format selection with fallback on repeated requests.
#[derive(Debug, Clone)]
pub struct TimeSyncTracker {
    policy: TimeSyncPolicy,
    /// Primary format followed by its fallback chain.
    formats: Vec<TimeSyncFormat>,
    index: usize,
    last_reply: Option<Instant>,
    rerequests: u32,
}

impl TimeSyncTracker {
    pub fn new(primary: TimeSyncFormat, policy: TimeSyncPolicy) -> Self {
        let mut formats = Vec::with_capacity(1 + dpbridge_timesync::FALLBACK_ORDER.len());
        formats.push(primary);
        formats.extend(fallback_chain(primary));
        Self {
            policy,
            formats,
            index: 0,
            last_reply: None,
            rerequests: 0,
        }
    }

    pub fn policy(&self) -> &TimeSyncPolicy {
        &self.policy
    }

    pub fn current(&self) -> TimeSyncFormat {
        self.formats[self.index]
    }

    /// 0 for the primary format, n for the n-th fallback.
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn primary(&self) -> TimeSyncFormat {
        self.formats[0]
    }

    /// Resume from a learned format. Unknown formats leave the tracker unchanged.
    pub fn restore(&mut self, format: TimeSyncFormat) -> bool {
        match self.formats.iter().position(|f| *f == format) {
            Some(index) => {
                self.index = index;
                true
            }
            None => false,
        }
    }

    /// Account for a request at `now` and return the format to answer with.
    ///
    /// The second return value is true when the format just advanced.
    pub fn on_request(&mut self, now: Instant) -> (TimeSyncFormat, bool) {
        let is_rerequest = self
            .last_reply
            .is_some_and(|last| now.saturating_duration_since(last) <= self.policy.rerequest_window);
        self.last_reply = Some(now);

        if !is_rerequest {
            self.rerequests = 0;
            return (self.current(), false);
        }

        self.rerequests = self.rerequests.saturating_add(1);
        let Some(limit) = self.policy.advance_after else {
            return (self.current(), false);
        };
        if self.rerequests >= limit && self.index + 1 < self.formats.len() {
            self.index += 1;
            self.rerequests = 0;
            tracing::info!(format = %self.current(), index = self.index, "device keeps asking for time, trying next format");
            return (self.current(), true);
        }
        (self.current(), false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dpbridge_timesync::{FALLBACK_ORDER, DEFAULT_FORMAT};

    #[test]
    fn spaced_requests_keep_primary() {
        let mut tracker = TimeSyncTracker::new(DEFAULT_FORMAT, TimeSyncPolicy::default());
        let start = Instant::now();
        for hour in 0..5 {
            let (format, advanced) = tracker.on_request(start + Duration::from_secs(3600 * hour));
            assert_eq!(format, DEFAULT_FORMAT);
            assert!(!advanced);
        }
    }

    #[test]
    fn repeated_requests_advance_through_chain() {
        let mut tracker =
            TimeSyncTracker::new(TimeSyncFormat::McuHeader, TimeSyncPolicy::default());
        let start = Instant::now();
        let at = |s: u64| start + Duration::from_secs(s);

        tracker.on_request(at(0));
        tracker.on_request(at(10));
        tracker.on_request(at(20));
        let (format, advanced) = tracker.on_request(at(30));
        assert!(advanced);
        assert_eq!(tracker.index(), 1);
        // The first fallback skips the primary itself.
        assert_eq!(format, FALLBACK_ORDER[1]);
    }

    #[test]
    fn disabled_advance_never_moves() {
        let policy = TimeSyncPolicy {
            advance_after: None,
            ..TimeSyncPolicy::default()
        };
        let mut tracker = TimeSyncTracker::new(DEFAULT_FORMAT, policy);
        let start = Instant::now();
        for s in 0..20 {
            tracker.on_request(start + Duration::from_secs(s));
        }
        assert_eq!(tracker.index(), 0);
    }

    #[test]
    fn restore_learned_format() {
        let mut tracker = TimeSyncTracker::new(DEFAULT_FORMAT, TimeSyncPolicy::default());
        assert!(tracker.restore(TimeSyncFormat::Gateway));
        assert_eq!(tracker.current(), TimeSyncFormat::Gateway);
        assert_eq!(tracker.primary(), DEFAULT_FORMAT);
    }

    #[test]
    fn chain_end_is_sticky() {
        let policy = TimeSyncPolicy {
            advance_after: Some(1),
            ..TimeSyncPolicy::default()
        };
        let mut tracker = TimeSyncTracker::new(DEFAULT_FORMAT, policy);
        let start = Instant::now();
        for s in 0..40 {
            tracker.on_request(start + Duration::from_secs(s));
        }
        assert_eq!(tracker.index(), FALLBACK_ORDER.len() - 1);
    }
}
