use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default observation window before the one-shot decision.
pub const DEFAULT_ARBITRATION_WINDOW: Duration = Duration::from_secs(15 * 60);

/// The two paths a device may report on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Protocol {
    /// Standard attribute reporting.
    Zcl,
    /// Vendor DataPoint cluster.
    Tuya,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArbitrationMode {
    #[default]
    Undecided,
    ZclOnly,
    TuyaOnly,
    Hybrid,
    HybridForced,
}

impl fmt::Display for ArbitrationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Undecided => "undecided",
            Self::ZclOnly => "zcl_only",
            Self::TuyaOnly => "tuya_only",
            Self::Hybrid => "hybrid",
            Self::HybridForced => "hybrid_forced",
        })
    }
}

/// Per-device arbitration bookkeeping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DeviceProtocolState {
    pub zcl_hits: u32,
    pub tuya_hits: u32,
    pub decided: bool,
    pub mode: ArbitrationMode,
    pub forced_active: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArbitrationConfig {
    /// How long traffic is observed before deciding.
    pub window: Duration,
}

impl Default for ArbitrationConfig {
    fn default() -> Self {
        Self {
            window: DEFAULT_ARBITRATION_WINDOW,
        }
    }
}

/// Mode for the observed counters, or `None` when nothing was seen and the
/// DataPoint path is not forced.
pub fn decide_mode(zcl_hits: u32, tuya_hits: u32, forced_active: bool) -> Option<ArbitrationMode> {
    match (zcl_hits > 0, tuya_hits > 0) {
        (false, true) => Some(ArbitrationMode::TuyaOnly),
        (true, false) if forced_active => Some(ArbitrationMode::HybridForced),
        (true, false) => Some(ArbitrationMode::ZclOnly),
        (true, true) => Some(ArbitrationMode::Hybrid),
        (false, false) if forced_active => Some(ArbitrationMode::HybridForced),
        (false, false) => None,
    }
}

/// Decides, once, which protocol paths a device's traffic is routed on.
#[derive(Debug, Clone, Default)]
pub struct ProtocolArbiter {
    state: DeviceProtocolState,
    config: ArbitrationConfig,
}

impl ProtocolArbiter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: ArbitrationConfig) -> Self {
        Self {
            state: DeviceProtocolState::default(),
            config,
        }
    }

    pub fn config(&self) -> &ArbitrationConfig {
        &self.config
    }

    pub fn state(&self) -> &DeviceProtocolState {
        &self.state
    }

    pub fn mode(&self) -> ArbitrationMode {
        self.state.mode
    }

    pub fn is_decided(&self) -> bool {
        self.state.decided
    }

    /// Count one frame or record seen on `protocol`.
    ///
    /// Counters freeze once decided unless the DataPoint path is forced.
    pub fn register_hit(&mut self, protocol: Protocol) {
        if self.state.decided && !self.state.forced_active {
            return;
        }
        let counter = match protocol {
            Protocol::Zcl => &mut self.state.zcl_hits,
            Protocol::Tuya => &mut self.state.tuya_hits,
        };
        *counter = counter.saturating_add(1);
    }

    /// Settle the mode from the counters. No-op once decided.
    pub fn decide(&mut self) -> ArbitrationMode {
        if self.state.decided {
            return self.state.mode;
        }
        let state = &mut self.state;
        match decide_mode(state.zcl_hits, state.tuya_hits, state.forced_active) {
            Some(mode) => {
                state.mode = mode;
                state.decided = true;
                tracing::info!(
                    zcl_hits = state.zcl_hits,
                    tuya_hits = state.tuya_hits,
                    forced = state.forced_active,
                    %mode,
                    "protocol arbitration decided"
                );
            }
            None => {
                tracing::debug!("no traffic observed, arbitration stays undecided");
            }
        }
        state.mode
    }

    /// Keep the DataPoint path alive regardless of observed traffic.
    pub fn set_forced_active(&mut self, forced: bool) {
        self.state.forced_active = forced;
        if forced && self.state.decided && self.state.mode == ArbitrationMode::ZclOnly {
            self.state.mode = ArbitrationMode::HybridForced;
            tracing::info!(mode = %self.state.mode, "forced-active re-enabled the datapoint path");
        }
    }

    /// Manual override. Any mode except `Undecided` counts as decided.
    pub fn override_mode(&mut self, mode: ArbitrationMode) {
        self.state.mode = mode;
        self.state.decided = mode != ArbitrationMode::Undecided;
        tracing::info!(%mode, "protocol mode overridden");
    }

    /// Whether traffic on `protocol` should be routed. Decoding happens regardless.
    pub fn accepts(&self, protocol: Protocol) -> bool {
        match self.state.mode {
            ArbitrationMode::ZclOnly => protocol == Protocol::Zcl,
            ArbitrationMode::TuyaOnly => protocol == Protocol::Tuya,
            ArbitrationMode::Undecided | ArbitrationMode::Hybrid | ArbitrationMode::HybridForced => {
                true
            }
        }
    }

    /// Load a persisted decision at attach time. Counters start from zero.
    pub fn restore(&mut self, mode: ArbitrationMode, forced_active: bool) {
        self.state = DeviceProtocolState {
            decided: mode != ArbitrationMode::Undecided,
            mode,
            forced_active,
            ..DeviceProtocolState::default()
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn arbiter_with(zcl: u32, tuya: u32, forced: bool) -> ProtocolArbiter {
        let mut arbiter = ProtocolArbiter::new();
        arbiter.set_forced_active(forced);
        for _ in 0..zcl {
            arbiter.register_hit(Protocol::Zcl);
        }
        for _ in 0..tuya {
            arbiter.register_hit(Protocol::Tuya);
        }
        arbiter
    }

    #[test]
    fn decision_table() {
        assert_eq!(arbiter_with(0, 1, false).decide(), ArbitrationMode::TuyaOnly);
        assert_eq!(arbiter_with(3, 0, false).decide(), ArbitrationMode::ZclOnly);
        assert_eq!(arbiter_with(3, 0, true).decide(), ArbitrationMode::HybridForced);
        assert_eq!(arbiter_with(2, 2, false).decide(), ArbitrationMode::Hybrid);
        assert_eq!(arbiter_with(0, 0, true).decide(), ArbitrationMode::HybridForced);
    }

    #[test]
    fn silence_stays_undecided() {
        let mut arbiter = ProtocolArbiter::new();
        assert_eq!(arbiter.decide(), ArbitrationMode::Undecided);
        assert!(!arbiter.is_decided());

        // One DataPoint hit after the first window decides on the retry.
        arbiter.register_hit(Protocol::Tuya);
        assert_eq!(arbiter.decide(), ArbitrationMode::TuyaOnly);
        assert!(arbiter.is_decided());
    }

    #[test]
    fn counters_freeze_after_decision() {
        let mut arbiter = arbiter_with(0, 1, false);
        arbiter.decide();
        arbiter.register_hit(Protocol::Zcl);
        assert_eq!(arbiter.state().zcl_hits, 0);
        assert_eq!(arbiter.decide(), ArbitrationMode::TuyaOnly);
    }

    #[test]
    fn forcing_reenables_datapoints_on_zcl_only() {
        let mut arbiter = arbiter_with(5, 0, false);
        arbiter.decide();
        assert!(!arbiter.accepts(Protocol::Tuya));

        arbiter.set_forced_active(true);
        assert_eq!(arbiter.mode(), ArbitrationMode::HybridForced);
        assert!(arbiter.accepts(Protocol::Tuya));
        assert!(arbiter.accepts(Protocol::Zcl));

        arbiter.register_hit(Protocol::Tuya);
        assert_eq!(arbiter.state().tuya_hits, 1);
    }

    #[test]
    fn gating_follows_mode() {
        let mut arbiter = ProtocolArbiter::new();
        assert!(arbiter.accepts(Protocol::Zcl) && arbiter.accepts(Protocol::Tuya));
        arbiter.override_mode(ArbitrationMode::TuyaOnly);
        assert!(arbiter.is_decided());
        assert!(!arbiter.accepts(Protocol::Zcl));
        assert!(arbiter.accepts(Protocol::Tuya));
    }

    #[test]
    fn restore_marks_decided_modes() {
        let mut arbiter = ProtocolArbiter::new();
        arbiter.restore(ArbitrationMode::Hybrid, false);
        assert!(arbiter.is_decided());
        arbiter.restore(ArbitrationMode::Undecided, true);
        assert!(!arbiter.is_decided());
        assert!(arbiter.state().forced_active);
    }

    #[test]
    fn saturating_counters() {
        let mut arbiter = ProtocolArbiter::new();
        arbiter.state.tuya_hits = u32::MAX;
        arbiter.register_hit(Protocol::Tuya);
        assert_eq!(arbiter.state().tuya_hits, u32::MAX);
    }

    proptest! {
        #[test]
        fn decision_depends_only_on_counters(zcl in 0u32..50, tuya in 0u32..50, forced: bool) {
            let mut a = arbiter_with(zcl, tuya, forced);
            let mut b = arbiter_with(zcl, tuya, forced);
            prop_assert_eq!(a.decide(), b.decide());
            prop_assert_eq!(
                a.mode(),
                decide_mode(zcl, tuya, forced).unwrap_or(ArbitrationMode::Undecided)
            );
        }

        #[test]
        fn decide_is_idempotent(zcl in 0u32..50, tuya in 0u32..50, forced: bool, extra in 0u32..10) {
            let mut arbiter = arbiter_with(zcl, tuya, forced);
            let first = arbiter.decide();
            for _ in 0..extra {
                arbiter.register_hit(Protocol::Zcl);
            }
            if arbiter.is_decided() {
                prop_assert_eq!(arbiter.decide(), first);
            }
        }
    }
}
