use chrono::{DateTime, Utc};
use dpbridge_timesync::{
    build_payload_with_clock, fallback_chain, matching_rule, select_format, HostOffsetSource,
    LocalClock, TimeSyncFormat,
};
use serde::Serialize;

use crate::cmd::TimesyncArgs;
use crate::exit::{CliError, CliResult, SUCCESS, USAGE};
use crate::output::{self, OutputFormat};

#[derive(Debug, Serialize)]
struct TimesyncOutput {
    format: String,
    rule: Option<&'static str>,
    utc: String,
    tz_offset_minutes: i32,
    dst: bool,
    payload: String,
    payload_size: usize,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    chain: Vec<String>,
}

pub fn run(args: TimesyncArgs, format: OutputFormat) -> CliResult<i32> {
    let (time_format, rule) = match args.format_label.as_deref() {
        Some(label) => (
            label
                .parse::<TimeSyncFormat>()
                .map_err(|err| CliError::new(USAGE, err.to_string()))?,
            None,
        ),
        None => (
            select_format(&args.model, &args.manufacturer),
            matching_rule(&args.model, &args.manufacturer).map(|rule| rule.name),
        ),
    };

    let utc = match args.at.as_deref() {
        Some(at) => DateTime::parse_from_rfc3339(at)
            .map(|t| t.with_timezone(&Utc))
            .map_err(|err| CliError::new(USAGE, format!("invalid --at value {at:?}: {err}")))?,
        None => Utc::now(),
    };
    let clock = match args.tz_offset {
        Some(offset) => LocalClock::new(utc, offset),
        None => LocalClock::observe(utc, &HostOffsetSource),
    };

    let out = build(time_format, rule, &clock, args.chain);
    print_timesync(&out, format);
    Ok(SUCCESS)
}

fn build(
    time_format: TimeSyncFormat,
    rule: Option<&'static str>,
    clock: &LocalClock,
    with_chain: bool,
) -> TimesyncOutput {
    let payload = build_payload_with_clock(time_format, clock);
    TimesyncOutput {
        format: time_format.to_string(),
        rule,
        utc: clock.utc.to_rfc3339(),
        tz_offset_minutes: clock.offset_minutes,
        dst: clock.dst,
        payload: hex::encode(&payload),
        payload_size: payload.len(),
        chain: if with_chain {
            fallback_chain(time_format)
                .iter()
                .map(ToString::to_string)
                .collect()
        } else {
            Vec::new()
        },
    }
}

fn print_timesync(out: &TimesyncOutput, format: OutputFormat) {
    match format {
        OutputFormat::Json => output::print_json(out),
        OutputFormat::Table | OutputFormat::Pretty => {
            println!("  Format:     {}", out.format);
            println!("  Rule:       {}", out.rule.unwrap_or("(default)"));
            println!("  UTC:        {}", out.utc);
            println!(
                "  Offset:     {:+} min{}",
                out.tz_offset_minutes,
                if out.dst { " (dst)" } else { "" }
            );
            println!("  Payload:    {} ({} bytes)", out.payload, out.payload_size);
            if !out.chain.is_empty() {
                let mut table = output::table(vec!["#", "FALLBACK"]);
                for (index, label) in out.chain.iter().enumerate() {
                    table.add_row(vec![(index + 1).to_string(), label.clone()]);
                }
                println!("{table}");
            }
        }
        OutputFormat::Raw => println!("{}", out.payload),
    }
}
