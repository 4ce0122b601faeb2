//! DataPoint value codec and multi-strategy frame decoder.
//!
//! Vendor DataPoint traffic is tunneled inside a mesh cluster with framing that
//! varies by firmware revision. Every record on the wire is:
//! - a 1-byte DataPoint id (meaningful range 1..=200)
//! - a 1-byte type ordinal (raw, bool, value, string, enum, bitmap)
//! - a 2-byte big-endian payload length
//! - the payload
//!
//! The header in front of the first record is unknown, so [`FrameDecoder`]
//! tries several offsets and falls back to scanning. Decoding never fails.

pub mod cluster;
pub mod decoder;
pub mod error;
pub mod record;
pub mod value;
pub mod writer;

pub use cluster::{cluster_name, command, is_datapoint_cluster, TUYA_DP};
pub use decoder::{
    DecodeMethod, Decoded, DecoderConfig, FrameDecoder, ParsingStrategy, StrategyMemo, STRATEGIES,
};
pub use error::{CodecError, Result};
pub use record::{encode_record, is_valid_id, DataPointRecord, MAX_ID, MIN_ID, RECORD_HEADER_SIZE};
pub use value::{decode, decode_slice, encode, DpValue, TypeTag};
pub use writer::{CommandWriter, OutboundCommand, COMMAND_HEADER_SIZE};
