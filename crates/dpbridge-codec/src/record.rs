use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{CodecError, Result};
use crate::value::{self, DpValue, TypeTag};

/// Record header: id (1) + type (1) + length (2, big-endian).
pub const RECORD_HEADER_SIZE: usize = 4;

/// Lowest DataPoint id considered meaningful.
pub const MIN_ID: u8 = 1;

/// Highest DataPoint id considered meaningful. Larger ids are noise.
pub const MAX_ID: u8 = 200;

/// Returns true if `id` falls inside the meaningful DataPoint range.
pub fn is_valid_id(id: u8) -> bool {
    (MIN_ID..=MAX_ID).contains(&id)
}

/// A single typed DataPoint recovered from a frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataPointRecord {
    pub id: u8,
    pub type_tag: TypeTag,
    /// Always equal to `payload.len()`.
    pub length: u16,
    pub payload: Bytes,
}

impl DataPointRecord {
    /// Create a record, deriving `length` from the payload.
    ///
    /// Payloads longer than `u16::MAX` are rejected.
    pub fn new(id: u8, type_tag: TypeTag, payload: impl Into<Bytes>) -> Result<Self> {
        let payload = payload.into();
        let length = u16::try_from(payload.len()).map_err(|_| CodecError::PayloadTooLarge {
            size: payload.len(),
            max: u16::MAX as usize,
        })?;
        Ok(Self {
            id,
            type_tag,
            length,
            payload,
        })
    }

    /// Build a record by encoding `value` under `type_tag`.
    pub fn from_value(id: u8, type_tag: TypeTag, value: &DpValue) -> Result<Self> {
        if !is_valid_id(id) {
            return Err(CodecError::InvalidId(id));
        }
        Self::new(id, type_tag, value::encode(type_tag, value)?)
    }

    /// Decode the payload into a typed value.
    pub fn value(&self) -> DpValue {
        value::decode(self.type_tag, &self.payload)
    }

    /// Total size on the wire (header + payload).
    pub fn wire_size(&self) -> usize {
        RECORD_HEADER_SIZE + self.payload.len()
    }
}

/// Encode a record into its wire layout.
///
/// ```text
/// ┌────────┬──────────┬──────────────┬──────────────────┐
/// │ Id (1B)│ Type (1B)│ Length (2B BE)│ Payload (Length) │
/// └────────┴──────────┴──────────────┴──────────────────┘
/// ```
pub fn encode_record(record: &DataPointRecord, dst: &mut BytesMut) {
    dst.reserve(record.wire_size());
    dst.put_u8(record.id);
    dst.put_u8(record.type_tag.as_wire());
    dst.put_u16(record.length);
    dst.put_slice(&record.payload);
}

/// Attempt to read one well-formed record at `offset`.
///
/// Returns `None` when the id or type ordinal is out of range, when the
/// declared length exceeds `max_length`, or when the payload would run past
/// the end of `src`.
pub(crate) fn read_record(src: &Bytes, offset: usize, max_length: Option<u16>) -> Option<DataPointRecord> {
    let header_end = offset.checked_add(RECORD_HEADER_SIZE)?;
    if header_end > src.len() {
        return None;
    }

    let id = src[offset];
    if !is_valid_id(id) {
        return None;
    }
    let type_tag = TypeTag::from_wire(src[offset + 1])?;
    let length = u16::from_be_bytes([src[offset + 2], src[offset + 3]]);
    if max_length.is_some_and(|max| length > max) {
        return None;
    }

    let end = header_end + length as usize;
    if end > src.len() {
        return None;
    }

    Some(DataPointRecord {
        id,
        type_tag,
        length,
        payload: src.slice(header_end..end),
    })
}
