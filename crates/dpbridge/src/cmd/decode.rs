use dpbridge_codec::{DecoderConfig, DpValue, FrameDecoder};
use dpbridge_mapping::universal;
use serde::Serialize;

use crate::cmd::DecodeArgs;
use crate::exit::{CliError, CliResult, DATA_INVALID, SUCCESS};
use crate::output::{self, OutputFormat};

#[derive(Debug, Serialize)]
struct RecordOutput {
    id: u8,
    #[serde(rename = "type")]
    type_name: &'static str,
    length: u16,
    value: DpValue,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    candidates: Vec<&'static str>,
}

#[derive(Debug, Serialize)]
struct DecodeOutput {
    input_size: usize,
    method: &'static str,
    header_offset: Option<usize>,
    records: Vec<RecordOutput>,
}

pub fn run(args: DecodeArgs, format: OutputFormat) -> CliResult<i32> {
    let buffer = output::parse_hex(&args.hex)
        .map_err(|err| CliError::new(DATA_INVALID, format!("invalid hex payload: {err}")))?;
    let result = decode(&buffer, !args.no_scan, args.candidates);
    print_decode(&result, format);
    Ok(SUCCESS)
}

fn decode(buffer: &[u8], scan_fallback: bool, with_candidates: bool) -> DecodeOutput {
    let decoder = FrameDecoder::with_config(DecoderConfig {
        scan_fallback,
        ..DecoderConfig::default()
    });
    let decoded = decoder.decode(buffer);
    let records = decoded
        .records
        .iter()
        .map(|record| RecordOutput {
            id: record.id,
            type_name: record.type_tag.name(),
            length: record.length,
            value: record.value(),
            candidates: if with_candidates {
                universal::candidates(record.id)
                    .iter()
                    .map(|candidate| candidate.attribute)
                    .collect()
            } else {
                Vec::new()
            },
        })
        .collect();
    DecodeOutput {
        input_size: buffer.len(),
        method: decoded.method.name(),
        header_offset: decoded.method.header_offset(),
        records,
    }
}

fn print_decode(out: &DecodeOutput, format: OutputFormat) {
    match format {
        OutputFormat::Json => output::print_json(out),
        OutputFormat::Table => {
            let mut table = output::table(vec!["DP", "TYPE", "LEN", "VALUE", "CANDIDATES"]);
            for record in &out.records {
                table.add_row(vec![
                    record.id.to_string(),
                    record.type_name.to_string(),
                    record.length.to_string(),
                    output::value_text(&record.value),
                    record.candidates.join(", "),
                ]);
            }
            println!("method: {} ({} bytes)", out.method, out.input_size);
            println!("{table}");
        }
        OutputFormat::Pretty => {
            println!(
                "method={} offset={} records={}",
                out.method,
                out.header_offset
                    .map_or_else(|| "-".to_string(), |offset| offset.to_string()),
                out.records.len()
            );
            for record in &out.records {
                println!(
                    "  dp={} type={} len={} value={}",
                    record.id,
                    record.type_name,
                    record.length,
                    output::value_text(&record.value)
                );
            }
        }
        OutputFormat::Raw => {
            for record in &out.records {
                println!("{} {}", record.id, output::value_text(&record.value));
            }
        }
    }
}
