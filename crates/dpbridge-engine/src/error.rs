use std::path::PathBuf;

use crate::collab::CollabError;

/// Errors surfaced by engine operations that talk to the outside world.
///
/// Ingress paths (`on_raw_frame`, `handle`) never return these; collaborator
/// failures there are logged and swallowed.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Encoding an outbound command failed.
    #[error("codec error: {0}")]
    Codec(#[from] dpbridge_codec::CodecError),

    /// A collaborator rejected a request.
    #[error("collaborator error: {0}")]
    Collaborator(#[from] CollabError),

    /// Persisted state could not be read or written.
    #[error("state store error at {path}: {message}")]
    Store { path: PathBuf, message: String },

    /// JSON serialization/deserialization error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// The device actor is gone.
    #[error("device {0} is detached")]
    Detached(String),
}

pub type Result<T> = std::result::Result<T, EngineError>;
