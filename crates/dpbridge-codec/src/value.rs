use bytes::{BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize, Serializer};

use crate::error::{CodecError, Result};

/// Wire type of a DataPoint record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum TypeTag {
    Raw = 0,
    Bool = 1,
    Value = 2,
    String = 3,
    Enum = 4,
    Bitmap = 5,
}

impl TypeTag {
    /// Highest ordinal a well-formed record may carry.
    pub const MAX_ORDINAL: u8 = 5;

    /// Map a wire ordinal to a type tag.
    pub fn from_wire(ordinal: u8) -> Option<Self> {
        match ordinal {
            0 => Some(Self::Raw),
            1 => Some(Self::Bool),
            2 => Some(Self::Value),
            3 => Some(Self::String),
            4 => Some(Self::Enum),
            5 => Some(Self::Bitmap),
            _ => None,
        }
    }

    /// Wire ordinal of this tag.
    pub fn as_wire(self) -> u8 {
        self as u8
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Raw => "raw",
            Self::Bool => "bool",
            Self::Value => "value",
            Self::String => "string",
            Self::Enum => "enum",
            Self::Bitmap => "bitmap",
        }
    }
}

/// A decoded DataPoint value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum DpValue {
    Raw(#[serde(serialize_with = "serialize_raw")] Bytes),
    Bool(bool),
    Value(i32),
    String(String),
    Enum(u8),
    Bitmap(u32),
}

impl DpValue {
    /// Short name of the variant, used in diagnostics.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Raw(_) => "raw",
            Self::Bool(_) => "bool",
            Self::Value(_) => "value",
            Self::String(_) => "string",
            Self::Enum(_) => "enum",
            Self::Bitmap(_) => "bitmap",
        }
    }

    /// The type tag this value encodes to by default.
    pub fn type_tag(&self) -> TypeTag {
        match self {
            Self::Raw(_) => TypeTag::Raw,
            Self::Bool(_) => TypeTag::Bool,
            Self::Value(_) => TypeTag::Value,
            Self::String(_) => TypeTag::String,
            Self::Enum(_) => TypeTag::Enum,
            Self::Bitmap(_) => TypeTag::Bitmap,
        }
    }

    /// Integer view of numeric-like variants.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Bool(b) => Some(i64::from(*b)),
            Self::Value(v) => Some(i64::from(*v)),
            Self::Enum(e) => Some(i64::from(*e)),
            Self::Bitmap(b) => Some(i64::from(*b)),
            Self::Raw(_) | Self::String(_) => None,
        }
    }

    /// Boolean view: bools directly, numeric variants as `!= 0`.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            other => other.as_i64().map(|v| v != 0),
        }
    }

    /// True for variants that carry a measured quantity rather than a state.
    pub fn is_numeric(&self) -> bool {
        matches!(self, Self::Value(_) | Self::Bitmap(_))
    }
}

fn serialize_raw<S: Serializer>(bytes: &Bytes, serializer: S) -> std::result::Result<S::Ok, S::Error> {
    serializer.collect_seq(bytes.iter())
}

/// Decode a record payload according to its type tag.
///
/// Never fails: payloads of unexpected width degrade to a best-effort value.
pub fn decode(tag: TypeTag, payload: &Bytes) -> DpValue {
    match tag {
        TypeTag::Raw => DpValue::Raw(payload.clone()),
        TypeTag::Bool => DpValue::Bool(payload.first().is_some_and(|b| *b != 0)),
        TypeTag::Value => DpValue::Value(read_signed_be(payload)),
        TypeTag::String => DpValue::String(decode_string(payload)),
        TypeTag::Enum => DpValue::Enum(payload.first().copied().unwrap_or(0)),
        TypeTag::Bitmap => match payload.len() {
            1 | 2 | 4 => DpValue::Bitmap(read_unsigned_be(payload)),
            _ => DpValue::Raw(payload.clone()),
        },
    }
}

/// Decode from a borrowed slice (copies the payload).
pub fn decode_slice(tag: TypeTag, payload: &[u8]) -> DpValue {
    decode(tag, &Bytes::copy_from_slice(payload))
}

/// Encode a value for transmission under the given type tag.
///
/// Numeric and boolean variants are coerced across tags where the meaning is
/// unambiguous; `Value` always encodes as 4 bytes.
pub fn encode(tag: TypeTag, value: &DpValue) -> Result<Bytes> {
    let mismatch = || CodecError::TypeMismatch {
        expected: tag,
        found: value.kind(),
    };

    let mut out = BytesMut::with_capacity(4);
    match (tag, value) {
        (TypeTag::Raw, DpValue::Raw(bytes)) => return Ok(bytes.clone()),
        (TypeTag::Raw, DpValue::String(s)) => out.put_slice(s.as_bytes()),
        (TypeTag::Bool, v) => out.put_u8(u8::from(v.as_bool().ok_or_else(mismatch)?)),
        (TypeTag::Value, DpValue::Bitmap(bits)) => out.put_u32(*bits),
        (TypeTag::Value, v) => {
            let n = v.as_i64().ok_or_else(mismatch)?;
            let n = i32::try_from(n).map_err(|_| mismatch())?;
            out.put_i32(n);
        }
        (TypeTag::String, DpValue::String(s)) => out.put_slice(s.as_bytes()),
        (TypeTag::Enum, v) => {
            let n = v.as_i64().ok_or_else(mismatch)?;
            out.put_u8(u8::try_from(n).map_err(|_| mismatch())?);
        }
        (TypeTag::Bitmap, v) => {
            let n = v.as_i64().ok_or_else(mismatch)?;
            let bits = u32::try_from(n).map_err(|_| mismatch())?;
            if bits <= 0xFF {
                out.put_u8(bits as u8);
            } else if bits <= 0xFFFF {
                out.put_u16(bits as u16);
            } else {
                out.put_u32(bits);
            }
        }
        _ => return Err(mismatch()),
    }
    Ok(out.freeze())
}

fn read_signed_be(payload: &[u8]) -> i32 {
    let width = payload.len().min(4);
    if width == 0 {
        return 0;
    }
    let tail = &payload[payload.len() - width..];
    let raw = tail.iter().fold(0u32, |acc, b| (acc << 8) | u32::from(*b));
    let shift = 32 - (width as u32 * 8);
    ((raw << shift) as i32) >> shift
}

fn read_unsigned_be(payload: &[u8]) -> u32 {
    payload.iter().fold(0u32, |acc, b| (acc << 8) | u32::from(*b))
}

fn decode_string(payload: &[u8]) -> String {
    let end = payload
        .iter()
        .rposition(|b| *b != 0)
        .map_or(0, |last| last + 1);
    String::from_utf8_lossy(&payload[..end]).into_owned()
}
