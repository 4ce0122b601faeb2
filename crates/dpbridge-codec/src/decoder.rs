use bytes::Bytes;

use crate::record::{read_record, DataPointRecord, RECORD_HEADER_SIZE};

/// Largest record length the byte-scan fallback will accept.
pub const DEFAULT_SCAN_MAX_LENGTH: u16 = 32;

/// A hypothesis about where DataPoint records begin inside a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParsingStrategy {
    pub name: &'static str,
    pub header_offset: usize,
}

/// Observed vendor framing variants, in priority order.
pub const STRATEGIES: [ParsingStrategy; 5] = [
    ParsingStrategy {
        name: "status-seq-cmd-status-count",
        header_offset: 5,
    },
    ParsingStrategy {
        name: "seq-cmd-count",
        header_offset: 4,
    },
    ParsingStrategy {
        name: "seq-cmd",
        header_offset: 3,
    },
    ParsingStrategy {
        name: "seq",
        header_offset: 2,
    },
    ParsingStrategy {
        name: "bare",
        header_offset: 0,
    },
];

/// Look up the named strategy for a header offset.
pub fn strategy_for_offset(offset: usize) -> Option<&'static ParsingStrategy> {
    STRATEGIES.iter().find(|s| s.header_offset == offset)
}

/// How a frame's records were recovered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeMethod {
    /// A fixed-offset walk produced the records.
    Strategy(&'static ParsingStrategy),
    /// Byte-by-byte scan found the records.
    Scan,
    /// Nothing recognizable in the frame.
    Nothing,
}

impl DecodeMethod {
    pub fn header_offset(&self) -> Option<usize> {
        match self {
            Self::Strategy(strategy) => Some(strategy.header_offset),
            Self::Scan | Self::Nothing => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Strategy(strategy) => strategy.name,
            Self::Scan => "scan",
            Self::Nothing => "none",
        }
    }
}

/// Output of a decode call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decoded {
    pub records: Vec<DataPointRecord>,
    pub method: DecodeMethod,
    /// True if the per-device memo short-circuited the ordered search.
    pub from_memo: bool,
}

impl Decoded {
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Configuration for the frame decoder.
#[derive(Debug, Clone)]
pub struct DecoderConfig {
    /// Fall back to a byte-by-byte scan when no strategy matches.
    pub scan_fallback: bool,
    /// Length cap applied to records found by scanning.
    pub scan_max_length: u16,
}

impl Default for DecoderConfig {
    fn default() -> Self {
        Self {
            scan_fallback: true,
            scan_max_length: DEFAULT_SCAN_MAX_LENGTH,
        }
    }
}

/// Per-device memory of the header offset that last produced the most records.
///
/// A soft cache: it only decides which walk is tried first.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StrategyMemo {
    best: Option<(usize, usize)>,
}

impl StrategyMemo {
    pub fn new() -> Self {
        Self::default()
    }

    /// Offset to try first, if any.
    pub fn hint(&self) -> Option<usize> {
        self.best.map(|(offset, _)| offset)
    }

    /// Record count achieved by the remembered offset.
    pub fn best_count(&self) -> usize {
        self.best.map_or(0, |(_, count)| count)
    }

    fn record_win(&mut self, offset: usize, count: usize) {
        match self.best {
            Some((remembered, best)) if remembered != offset && count < best => {}
            _ => self.best = Some((offset, count)),
        }
    }

    fn forget(&mut self) {
        self.best = None;
    }
}

/// Recovers DataPoint records from ambiguously framed buffers.
#[derive(Debug, Clone, Default)]
pub struct FrameDecoder {
    config: DecoderConfig,
}

impl FrameDecoder {
    /// Create a decoder with default configuration.
    pub fn new() -> Self {
        Self::with_config(DecoderConfig::default())
    }

    /// Create a decoder with explicit configuration.
    pub fn with_config(config: DecoderConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &DecoderConfig {
        &self.config
    }

    /// Decode a raw frame using the ordered strategies, then the scan fallback.
    ///
    /// Never fails; an unrecognizable frame yields no records.
    pub fn decode(&self, buffer: &[u8]) -> Decoded {
        self.decode_bytes(&Bytes::copy_from_slice(buffer))
    }

    /// Decode, trying the memo's offset first.
    ///
    /// The memo result is only trusted when its walk consumes the buffer
    /// exactly; otherwise the full ordered search runs.
    ///
    /// A frame that parses cleanly at more than one offset keeps the device's
    /// established framing even when a higher-priority offset would also
    /// parse it, so results can differ from [`FrameDecoder::decode`].
    pub fn decode_with_memo(&self, buffer: &[u8], memo: &mut StrategyMemo) -> Decoded {
        let src = Bytes::copy_from_slice(buffer);

        if let Some(offset) = memo.hint() {
            let (records, end) = walk(&src, offset);
            if !records.is_empty() && end == src.len() {
                if let Some(strategy) = strategy_for_offset(offset) {
                    memo.record_win(offset, records.len());
                    return Decoded {
                        records,
                        method: DecodeMethod::Strategy(strategy),
                        from_memo: true,
                    };
                }
            }
            if records.is_empty() {
                memo.forget();
            }
        }

        let decoded = self.decode_bytes(&src);
        if let Some(offset) = decoded.method.header_offset() {
            memo.record_win(offset, decoded.records.len());
        }
        decoded
    }

    fn decode_bytes(&self, src: &Bytes) -> Decoded {
        for strategy in STRATEGIES.iter() {
            let (records, _) = walk(src, strategy.header_offset);
            if !records.is_empty() {
                tracing::trace!(
                    strategy = strategy.name,
                    records = records.len(),
                    "frame decoded"
                );
                return Decoded {
                    records,
                    method: DecodeMethod::Strategy(strategy),
                    from_memo: false,
                };
            }
        }

        if self.config.scan_fallback {
            let records = scan(src, self.config.scan_max_length);
            if !records.is_empty() {
                tracing::debug!(
                    len = src.len(),
                    records = records.len(),
                    "no framing strategy matched; recovered records by scanning"
                );
                return Decoded {
                    records,
                    method: DecodeMethod::Scan,
                    from_memo: false,
                };
            }
        }

        tracing::debug!(len = src.len(), "frame contained no datapoint records");
        Decoded {
            records: Vec::new(),
            method: DecodeMethod::Nothing,
            from_memo: false,
        }
    }
}

/// Walk consecutive records from `start`; stop at the first invalid one.
///
/// Returns the records and the offset where the walk stopped.
fn walk(src: &Bytes, start: usize) -> (Vec<DataPointRecord>, usize) {
    let mut records = Vec::new();
    let mut offset = start;
    while let Some(record) = read_record(src, offset, None) {
        offset += record.wire_size();
        records.push(record);
    }
    (records, offset)
}

fn scan(src: &Bytes, max_length: u16) -> Vec<DataPointRecord> {
    let mut records = Vec::new();
    let mut offset = 0usize;
    while offset + RECORD_HEADER_SIZE <= src.len() {
        match read_record(src, offset, Some(max_length)) {
            Some(record) => {
                offset += record.wire_size();
                records.push(record);
            }
            None => offset += 1,
        }
    }
    records
}

#[cfg(test)]
mod tests {
    use bytes::BytesMut;
    use proptest::prelude::*;

    use super::*;
    use crate::record::encode_record;
    use crate::value::{DpValue, TypeTag};

    fn frame_with_header(header: &[u8], records: &[DataPointRecord]) -> Vec<u8> {
        let mut buf = BytesMut::new();
        buf.extend_from_slice(header);
        for record in records {
            encode_record(record, &mut buf);
        }
        buf.to_vec()
    }

    fn sample_records() -> Vec<DataPointRecord> {
        vec![
            DataPointRecord::from_value(1, TypeTag::Value, &DpValue::Value(-100)).unwrap(),
            DataPointRecord::from_value(2, TypeTag::Value, &DpValue::Value(48)).unwrap(),
            DataPointRecord::from_value(4, TypeTag::Value, &DpValue::Value(87)).unwrap(),
        ]
    }

    #[test]
    fn bare_single_bool_record() {
        let decoded = FrameDecoder::new().decode(&[0x01, 0x01, 0x00, 0x01, 0x01]);

        assert_eq!(decoded.records.len(), 1);
        let record = &decoded.records[0];
        assert_eq!(record.id, 1);
        assert_eq!(record.type_tag, TypeTag::Bool);
        assert_eq!(record.value(), DpValue::Bool(true));
        assert_eq!(decoded.method.header_offset(), Some(0));
    }

    #[test]
    fn full_header_frame_yields_every_record() {
        let records = sample_records();
        let frame = frame_with_header(&[0x00, 0x12, 0x34, 0x02, 0x03], &records);

        let decoded = FrameDecoder::new().decode(&frame);
        assert_eq!(decoded.method.header_offset(), Some(5));
        assert_eq!(decoded.records, records);
    }

    #[test]
    fn seq_only_header_is_found_after_higher_offsets_fail() {
        let records = sample_records();
        let frame = frame_with_header(&[0xFF, 0xFF], &records);

        let decoded = FrameDecoder::new().decode(&frame);
        assert_eq!(decoded.method.header_offset(), Some(2));
        assert_eq!(decoded.records.len(), 3);
    }

    #[test]
    fn truncated_tail_ends_walk_without_error() {
        let records = sample_records();
        let mut frame = frame_with_header(&[0x00, 0x01, 0x02, 0x02, 0x02], &records);
        frame.extend_from_slice(&[0x05, 0x02, 0x00, 0x04, 0x00]);

        let decoded = FrameDecoder::new().decode(&frame);
        assert_eq!(decoded.records.len(), 3);
    }

    #[test]
    fn scan_recovers_record_from_noise() {
        let mut frame = vec![0xFF, 0xEE, 0xDD, 0xCC, 0xBB, 0xAA, 0x99];
        frame.extend_from_slice(&[0x0F, 0x02, 0x00, 0x01, 0x2E]);
        frame.push(0xFE);

        let decoded = FrameDecoder::new().decode(&frame);
        assert_eq!(decoded.method, DecodeMethod::Scan);
        assert_eq!(decoded.records.len(), 1);
        assert_eq!(decoded.records[0].id, 15);
        assert_eq!(decoded.records[0].value(), DpValue::Value(46));
    }

    #[test]
    fn scan_disabled_returns_nothing() {
        let frame = [0xFF, 0xEE, 0xDD, 0xCC, 0xBB, 0xAA, 0x99, 0x0F, 0x02, 0x00, 0x01, 0x2E, 0xFE];
        let decoder = FrameDecoder::with_config(DecoderConfig {
            scan_fallback: false,
            ..DecoderConfig::default()
        });
        let decoded = decoder.decode(&frame);
        assert!(decoded.is_empty());
        assert_eq!(decoded.method, DecodeMethod::Nothing);
    }

    #[test]
    fn empty_and_tiny_buffers_yield_nothing() {
        let decoder = FrameDecoder::new();
        assert!(decoder.decode(&[]).is_empty());
        assert!(decoder.decode(&[0x01, 0x01, 0x00]).is_empty());
    }

    #[test]
    fn memo_remembers_winning_offset() {
        let decoder = FrameDecoder::new();
        let mut memo = StrategyMemo::new();
        let frame = frame_with_header(&[0xFF, 0xFF], &sample_records());

        let first = decoder.decode_with_memo(&frame, &mut memo);
        assert!(!first.from_memo);
        assert_eq!(memo.hint(), Some(2));
        assert_eq!(memo.best_count(), 3);

        let second = decoder.decode_with_memo(&frame, &mut memo);
        assert!(second.from_memo);
        assert_eq!(second.records, first.records);
    }

    #[test]
    fn memo_partial_walk_falls_back_to_ordered_search() {
        let decoder = FrameDecoder::new();
        let mut memo = StrategyMemo::new();
        let bare = frame_with_header(&[], &sample_records()[..1]);
        decoder.decode_with_memo(&bare, &mut memo);
        assert_eq!(memo.hint(), Some(0));

        let records = sample_records();
        let framed = frame_with_header(&[0x00, 0x12, 0x34, 0x02, 0x03], &records);
        let decoded = decoder.decode_with_memo(&framed, &mut memo);
        assert!(!decoded.from_memo);
        assert_eq!(decoded.records, records);
        assert_eq!(memo.hint(), Some(5));
    }

    #[test]
    fn memo_keeps_established_offset_for_ambiguous_frame() {
        let decoder = FrameDecoder::new();
        let mut memo = StrategyMemo::new();
        let bare = frame_with_header(&[], &sample_records()[..1]);
        decoder.decode_with_memo(&bare, &mut memo);
        assert_eq!(memo.hint(), Some(0));

        // Parses as a raw dp 1 at offset 0, or as a header plus dp 2 at offset 5.
        let frame = [
            0x01, 0x00, 0x00, 0x01, 0x00, 0x02, 0x02, 0x00, 0x04, 0x00, 0x00, 0x00, 0x30,
        ];
        let ordered: Vec<u8> = decoder.decode(&frame).records.iter().map(|r| r.id).collect();
        assert_eq!(ordered, vec![2]);

        let remembered = decoder.decode_with_memo(&frame, &mut memo);
        assert!(remembered.from_memo);
        assert_eq!(remembered.method.header_offset(), Some(0));
        let ids: Vec<u8> = remembered.records.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![1, 2]);
    }

    proptest! {
        #[test]
        fn arbitrary_bytes_never_panic(buf in proptest::collection::vec(any::<u8>(), 0..256)) {
            let decoder = FrameDecoder::new();
            let mut memo = StrategyMemo::new();
            let decoded = decoder.decode_with_memo(&buf, &mut memo);
            for record in &decoded.records {
                prop_assert!(crate::record::is_valid_id(record.id));
                prop_assert_eq!(record.length as usize, record.payload.len());
            }
        }

        #[test]
        fn offset_five_frames_decode_completely(
            header in proptest::collection::vec(any::<u8>(), 5),
            values in proptest::collection::vec((1u8..=200, any::<i32>()), 1..6),
        ) {
            let records: Vec<DataPointRecord> = values
                .iter()
                .map(|(id, v)| DataPointRecord::from_value(*id, TypeTag::Value, &DpValue::Value(*v)).unwrap())
                .collect();
            let frame = frame_with_header(&header, &records);
            let decoded = FrameDecoder::new().decode(&frame);
            prop_assert_eq!(decoded.records, records);
        }
    }
}
