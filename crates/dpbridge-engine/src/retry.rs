use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

/// Upper bound on attempts for any policy.
pub const MAX_ATTEMPTS: u32 = 5;

/// Jitter applied to every backoff delay, as a fraction of the delay.
pub const JITTER: f64 = 0.25;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PowerSource {
    /// Sleepy end device; radios wake briefly.
    Battery,
    #[default]
    Mains,
}

/// How outbound queries are retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    /// How long to wait for a report after each attempt.
    #[serde(with = "millis")]
    pub timeout: Duration,
    #[serde(with = "millis")]
    pub base_delay: Duration,
    #[serde(with = "millis")]
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub const BATTERY: Self = Self {
        max_attempts: 2,
        timeout: Duration::from_secs(5),
        base_delay: Duration::from_secs(2),
        max_delay: Duration::from_secs(30),
    };

    pub const MAINS: Self = Self {
        max_attempts: 5,
        timeout: Duration::from_secs(10),
        base_delay: Duration::from_secs(1),
        max_delay: Duration::from_secs(60),
    };

    pub fn for_power(power: PowerSource) -> Self {
        match power {
            PowerSource::Battery => Self::BATTERY,
            PowerSource::Mains => Self::MAINS,
        }
    }

    pub fn attempts(&self) -> u32 {
        self.max_attempts.clamp(1, MAX_ATTEMPTS)
    }

    /// Exponential delay before retry number `attempt` (1-based), capped, no jitter.
    pub fn nominal_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        self.base_delay
            .saturating_mul(1u32 << exponent)
            .min(self.max_delay)
    }

    /// [`nominal_delay`](Self::nominal_delay) with ±25 % jitter, still capped.
    pub fn backoff_delay<R: Rng + ?Sized>(&self, attempt: u32, rng: &mut R) -> Duration {
        let factor = rng.gen_range((1.0 - JITTER)..=(1.0 + JITTER));
        self.nominal_delay(attempt)
            .mul_f64(factor)
            .min(self.max_delay)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::MAINS
    }
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(value.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

/// Progress of an outbound DataPoint query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum QueryState {
    #[default]
    Idle,
    Pending { attempt: u32 },
    /// Retries are exhausted; the next unsolicited report settles the query.
    AwaitingPassiveReport,
}

/// What to do after a query attempt timed out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryStep {
    /// Send attempt `attempt` after `delay`.
    Retry { attempt: u32, delay: Duration },
    GiveUp,
    /// The timeout belongs to an attempt that is no longer current.
    Stale,
}

#[derive(Debug, Clone, Default)]
pub struct QueryTracker {
    policy: RetryPolicy,
    state: QueryState,
}

impl QueryTracker {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            state: QueryState::Idle,
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn state(&self) -> QueryState {
        self.state
    }

    /// Begin a query; the first attempt is sent by the caller right away.
    pub fn start(&mut self) -> u32 {
        self.state = QueryState::Pending { attempt: 1 };
        1
    }

    pub fn on_timeout<R: Rng + ?Sized>(&mut self, attempt: u32, rng: &mut R) -> RetryStep {
        match self.state {
            QueryState::Pending { attempt: current } if current == attempt => {
                if attempt >= self.policy.attempts() {
                    self.state = QueryState::AwaitingPassiveReport;
                    RetryStep::GiveUp
                } else {
                    let next = attempt + 1;
                    self.state = QueryState::Pending { attempt: next };
                    RetryStep::Retry {
                        attempt: next,
                        delay: self.policy.backoff_delay(attempt, rng),
                    }
                }
            }
            _ => RetryStep::Stale,
        }
    }

    /// Any DataPoint report settles an outstanding query.
    pub fn on_report(&mut self) -> bool {
        let was_outstanding = self.state != QueryState::Idle;
        self.state = QueryState::Idle;
        was_outstanding
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn nominal_delay_doubles_and_caps() {
        let policy = RetryPolicy::MAINS;
        assert_eq!(policy.nominal_delay(1), Duration::from_secs(1));
        assert_eq!(policy.nominal_delay(2), Duration::from_secs(2));
        assert_eq!(policy.nominal_delay(4), Duration::from_secs(8));
        assert_eq!(policy.nominal_delay(30), Duration::from_secs(60));
    }

    #[test]
    fn jitter_stays_within_a_quarter() {
        let policy = RetryPolicy::BATTERY;
        let mut rng = StdRng::seed_from_u64(7);
        for attempt in 1..=4 {
            let nominal = policy.nominal_delay(attempt).as_secs_f64();
            for _ in 0..100 {
                let delay = policy.backoff_delay(attempt, &mut rng).as_secs_f64();
                assert!(delay >= nominal * 0.75 - 1e-9);
                assert!(delay <= (nominal * 1.25).min(30.0) + 1e-9);
            }
        }
    }

    #[test]
    fn attempts_never_exceed_five() {
        let policy = RetryPolicy {
            max_attempts: 50,
            ..RetryPolicy::MAINS
        };
        assert_eq!(policy.attempts(), MAX_ATTEMPTS);
    }

    #[test]
    fn battery_query_gives_up_after_two_attempts() {
        let mut rng = StdRng::seed_from_u64(1);
        let mut tracker = QueryTracker::new(RetryPolicy::for_power(PowerSource::Battery));
        assert_eq!(tracker.start(), 1);

        assert!(matches!(
            tracker.on_timeout(1, &mut rng),
            RetryStep::Retry { attempt: 2, .. }
        ));
        assert_eq!(tracker.on_timeout(1, &mut rng), RetryStep::Stale);
        assert_eq!(tracker.on_timeout(2, &mut rng), RetryStep::GiveUp);
        assert_eq!(tracker.state(), QueryState::AwaitingPassiveReport);

        assert!(tracker.on_report());
        assert_eq!(tracker.state(), QueryState::Idle);
        assert!(!tracker.on_report());
    }

    #[test]
    fn policy_serializes_in_millis() {
        let json = serde_json::to_value(RetryPolicy::BATTERY).unwrap();
        assert_eq!(json["timeout"], 5000);
        assert_eq!(json["max_attempts"], 2);
    }
}
