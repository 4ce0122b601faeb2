//! DataPoint-to-attribute mapping.
//!
//! Explicit per-device profiles are JSON documents validated against an
//! embedded JSON Schema and loaded into a [`ProfileRegistry`]. The
//! [`universal`] catalogue covers ids that vendors commonly share.

pub mod config;
pub mod error;
pub mod profile;
pub mod registry;
pub mod transform;
pub mod universal;
pub mod validator;

pub use config::RegistryConfig;
pub use error::{MappingError, Result};
pub use profile::{BatteryConfig, BatteryDps, BatteryRole, DeviceProfile, DpMapping};
pub use registry::{ProfileRegistry, PROFILE_SUFFIX};
pub use transform::{AttributeValue, CustomTransform, Transform, ValidRange};
pub use universal::{attr, Candidate, Conversion};
pub use validator::PROFILE_SCHEMA;
