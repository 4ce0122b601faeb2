use crate::value::TypeTag;

/// Errors that can occur while encoding outbound DataPoint commands.
///
/// Decoding never fails: malformed ingress degrades to fewer records.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// The record payload does not fit the 16-bit length field.
    #[error("payload too large ({size} bytes, max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    /// The value cannot be represented with the requested type tag.
    #[error("value of kind {found} cannot be encoded as {expected:?}")]
    TypeMismatch {
        expected: TypeTag,
        found: &'static str,
    },

    /// DataPoint id outside the addressable range.
    #[error("datapoint id {0} out of range (1..=200)")]
    InvalidId(u8),
}

pub type Result<T> = std::result::Result<T, CodecError>;
