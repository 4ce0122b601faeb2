/// Errors raised while loading or validating mapping profiles.
#[derive(Debug, thiserror::Error)]
pub enum MappingError {
    /// A profile file or directory could not be read.
    #[error("failed to load profile: {0}")]
    LoadFailed(String),

    /// The embedded profile schema could not be compiled.
    #[error("failed to compile profile schema: {0}")]
    CompileFailed(String),

    /// A profile document is structurally or semantically invalid.
    #[error("invalid profile {source_name}: {message}")]
    InvalidProfile {
        source_name: String,
        message: String,
    },

    /// Two profiles claim the same device.
    #[error("duplicate profile for device {0}")]
    DuplicateDevice(String),

    /// The document is not valid JSON.
    #[error("profile is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, MappingError>;
