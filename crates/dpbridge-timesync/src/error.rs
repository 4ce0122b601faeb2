/// Errors raised by time-sync helpers.
#[derive(Debug, thiserror::Error)]
pub enum TimeSyncError {
    /// A format label did not name any known encoding.
    #[error("unknown time sync format: {0}")]
    UnknownFormat(String),
}

pub type Result<T> = std::result::Result<T, TimeSyncError>;
