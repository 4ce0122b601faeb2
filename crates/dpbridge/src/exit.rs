use std::fmt;
use std::io;

use dpbridge_engine::EngineError;
use dpbridge_mapping::MappingError;

// Exit codes follow sysexits where one fits.
pub const SUCCESS: i32 = 0;
pub const FAILURE: i32 = 1;
pub const PERMISSION_DENIED: i32 = 50;
pub const DATA_INVALID: i32 = 60;
pub const USAGE: i32 = 64;
pub const INTERNAL: i32 = 125;

pub type CliResult<T> = Result<T, CliError>;

#[derive(Debug)]
pub struct CliError {
    pub code: i32,
    pub message: String,
}

impl CliError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for CliError {}

pub fn io_error(context: &str, err: io::Error) -> CliError {
    let code = match err.kind() {
        io::ErrorKind::PermissionDenied => PERMISSION_DENIED,
        io::ErrorKind::NotFound => USAGE,
        io::ErrorKind::InvalidData | io::ErrorKind::UnexpectedEof => DATA_INVALID,
        _ => INTERNAL,
    };
    CliError::new(code, format!("{context}: {err}"))
}

pub fn mapping_error(context: &str, err: MappingError) -> CliError {
    match err {
        MappingError::CompileFailed(_) => CliError::new(INTERNAL, format!("{context}: {err}")),
        MappingError::LoadFailed(_)
        | MappingError::InvalidProfile { .. }
        | MappingError::DuplicateDevice(_)
        | MappingError::Json(_) => CliError::new(DATA_INVALID, format!("{context}: {err}")),
    }
}

pub fn engine_error(context: &str, err: EngineError) -> CliError {
    match err {
        EngineError::Codec(_) | EngineError::Json(_) => {
            CliError::new(DATA_INVALID, format!("{context}: {err}"))
        }
        EngineError::Collaborator(_) | EngineError::Detached(_) => {
            CliError::new(FAILURE, format!("{context}: {err}"))
        }
        EngineError::Store { .. } => CliError::new(INTERNAL, format!("{context}: {err}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_is_usage_error() {
        let err = io_error("open", io::Error::from(io::ErrorKind::NotFound));
        assert_eq!(err.code, USAGE);
        assert!(err.message.starts_with("open: "));
    }

    #[test]
    fn invalid_profile_is_data_invalid() {
        let err = mapping_error(
            "load",
            MappingError::InvalidProfile {
                source_name: "a.mapping.json".into(),
                message: "bad".into(),
            },
        );
        assert_eq!(err.code, DATA_INVALID);
    }
}
