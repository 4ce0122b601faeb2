//! DataPoint protocol engine for mixed ZCL and vendor DataPoint devices.
//!
//! dpbridge recovers typed DataPoint records from ambiguously framed cluster
//! payloads, decides per device which protocol path to trust, routes values to
//! semantic attributes and answers device time requests.
//!
//! # Crate Structure
//!
//! - [`codec`]: value codec, frame decoder and outbound command writer
//! - [`timesync`]: time payload formats, selection and fallback order
//! - [`mapping`]: mapping profiles and the universal catalogue (behind `engine` feature)
//! - [`engine`]: arbitration, routing and the per-device facade (behind `engine` feature)

/// Re-export codec types.
pub mod codec {
    pub use dpbridge_codec::*;
}

/// Re-export time-sync types.
pub mod timesync {
    pub use dpbridge_timesync::*;
}

/// Re-export mapping types (requires `engine` feature).
#[cfg(feature = "engine")]
pub mod mapping {
    pub use dpbridge_mapping::*;
}

/// Re-export engine types (requires `engine` feature).
#[cfg(feature = "engine")]
pub mod engine {
    pub use dpbridge_engine::*;
}
