use bytes::{BufMut, Bytes, BytesMut};

use crate::cluster::command;
use crate::error::Result;
use crate::record::{encode_record, DataPointRecord};
use crate::value::{DpValue, TypeTag};

/// Egress header: command (1) + sequence (2, big-endian) = 3 bytes.
pub const COMMAND_HEADER_SIZE: usize = 3;

/// An outbound DP-cluster command ready for the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundCommand {
    pub command: u8,
    pub sequence: u16,
    pub body: Bytes,
}

impl OutboundCommand {
    /// Serialize to the byte layout handed to the transport.
    ///
    /// ```text
    /// ┌──────────────┬─────────────────┬──────────────┐
    /// │ Command (1B) │ Sequence (2B BE)│ Body          │
    /// └──────────────┴─────────────────┴──────────────┘
    /// ```
    pub fn to_bytes(&self) -> Bytes {
        let mut dst = BytesMut::with_capacity(self.wire_size());
        dst.put_u8(self.command);
        dst.put_u16(self.sequence);
        dst.put_slice(&self.body);
        dst.freeze()
    }

    pub fn wire_size(&self) -> usize {
        COMMAND_HEADER_SIZE + self.body.len()
    }
}

/// Builds outbound DP commands with a wrapping sequence counter.
#[derive(Debug, Clone, Default)]
pub struct CommandWriter {
    sequence: u16,
}

impl CommandWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start numbering from an explicit sequence.
    pub fn with_sequence(sequence: u16) -> Self {
        Self { sequence }
    }

    /// The sequence number the next command will carry.
    pub fn peek_sequence(&self) -> u16 {
        self.sequence
    }

    /// Write a single DataPoint.
    pub fn set_datapoint(&mut self, id: u8, tag: TypeTag, value: &DpValue) -> Result<OutboundCommand> {
        self.set_datapoints(&[(id, tag, value.clone())])
    }

    /// Write several DataPoints in one request.
    pub fn set_datapoints(&mut self, points: &[(u8, TypeTag, DpValue)]) -> Result<OutboundCommand> {
        let mut body = BytesMut::new();
        for (id, tag, value) in points {
            let record = DataPointRecord::from_value(*id, *tag, value)?;
            encode_record(&record, &mut body);
        }
        Ok(self.build(command::DATA_REQUEST, body.freeze()))
    }

    /// Ask the device to report every DataPoint it has.
    pub fn query_all(&mut self) -> OutboundCommand {
        self.build(command::DATA_QUERY, Bytes::new())
    }

    /// Ask the device MCU for its firmware version.
    pub fn mcu_version_request(&mut self) -> OutboundCommand {
        self.build(command::MCU_VERSION_REQUEST, Bytes::new())
    }

    /// Answer a device-initiated time request with an encoded time payload.
    pub fn time_response(&mut self, payload: &[u8]) -> OutboundCommand {
        self.build(command::MCU_SYNC_TIME, Bytes::copy_from_slice(payload))
    }

    fn build(&mut self, command: u8, body: Bytes) -> OutboundCommand {
        let sequence = self.sequence;
        self.sequence = self.sequence.wrapping_add(1);
        OutboundCommand {
            command,
            sequence,
            body,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::FrameDecoder;

    #[test]
    fn set_datapoint_layout() {
        let mut writer = CommandWriter::with_sequence(0x0102);
        let cmd = writer
            .set_datapoint(1, TypeTag::Bool, &DpValue::Bool(true))
            .unwrap();

        assert_eq!(cmd.command, command::DATA_REQUEST);
        assert_eq!(
            cmd.to_bytes().as_ref(),
            &[0x00, 0x01, 0x02, 0x01, 0x01, 0x00, 0x01, 0x01]
        );
        assert_eq!(writer.peek_sequence(), 0x0103);
    }

    #[test]
    fn sequence_wraps() {
        let mut writer = CommandWriter::with_sequence(u16::MAX);
        assert_eq!(writer.query_all().sequence, u16::MAX);
        assert_eq!(writer.query_all().sequence, 0);
    }

    #[test]
    fn written_records_are_decodable_behind_the_header() {
        let mut writer = CommandWriter::new();
        let cmd = writer
            .set_datapoints(&[
                (2, TypeTag::Value, DpValue::Value(-55)),
                (4, TypeTag::Enum, DpValue::Enum(1)),
            ])
            .unwrap();

        let decoded = FrameDecoder::new().decode(&cmd.to_bytes());
        assert_eq!(decoded.method.header_offset(), Some(3));
        assert_eq!(decoded.records.len(), 2);
        assert_eq!(decoded.records[0].value(), DpValue::Value(-55));
        assert_eq!(decoded.records[1].value(), DpValue::Enum(1));
    }

    #[test]
    fn time_response_carries_payload() {
        let mut writer = CommandWriter::new();
        let cmd = writer.time_response(&[1, 2, 3, 4]);
        assert_eq!(cmd.command, command::MCU_SYNC_TIME);
        assert_eq!(cmd.wire_size(), COMMAND_HEADER_SIZE + 4);
    }

    #[test]
    fn invalid_id_is_rejected() {
        let mut writer = CommandWriter::new();
        assert!(writer
            .set_datapoint(201, TypeTag::Bool, &DpValue::Bool(true))
            .is_err());
    }
}
