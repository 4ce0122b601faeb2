//! Per-device DataPoint protocol engine.
//!
//! [`DeviceEngine`] owns one device's decoder memo, protocol arbitration,
//! DataPoint routing, query retries and time-sync replies. It is synchronous:
//! delayed work is handed back as [`Deferred`] values. Enable the `async`
//! feature for a tokio actor per device ([`DeviceActor`], [`EngineHub`]).
//!
//! The host supplies capabilities, transport and storage through the traits
//! in [`collab`].

#[cfg(feature = "async")]
pub mod actor;
pub mod arbiter;
pub mod collab;
pub mod engine;
pub mod error;
pub mod retry;
pub mod router;
pub mod state;
pub mod timesync;

#[cfg(feature = "async")]
pub use actor::{DeviceActor, DeviceHandle, EngineHub, INBOX_CAPACITY};
pub use arbiter::{
    decide_mode, ArbitrationConfig, ArbitrationMode, DeviceProtocolState, Protocol,
    ProtocolArbiter, DEFAULT_ARBITRATION_WINDOW,
};
pub use collab::{
    AttributeSink, BatteryOracle, CapabilityOracle, CollabError, Collaborators,
    LinearBatteryOracle, MemorySender, MemorySink, RecordedWrite, SentCommand,
    StaticCapabilities, WireSender,
};
pub use engine::{
    Deferred, DeferredAction, DeviceEngine, DeviceIdentity, EngineConfig, EngineStatus,
    FrameStats, IngressEvent, UnknownSummary, DEFAULT_REQUEST_SPACING,
};
pub use error::{EngineError, Result};
pub use retry::{PowerSource, QueryState, QueryTracker, RetryPolicy, RetryStep, MAX_ATTEMPTS};
pub use router::{
    AttributeWrite, DataPointRouter, RouteOutcome, RouteSource, UnknownEntry, UnknownLog,
    BATTERY_STATE_PERCENT,
};
pub use state::{JsonFileStateStore, MemoryStateStore, PersistedDeviceState, StateStore};
pub use timesync::{TimeSyncPolicy, TimeSyncTracker};
