use std::collections::BTreeMap;

use dpbridge_engine::{EngineConfig, PowerSource, RetryPolicy};
use dpbridge_timesync::{HostOffsetSource, OffsetSource, FALLBACK_ORDER};
use serde::Serialize;

use crate::cmd::EnvinfoArgs;
use crate::exit::{CliResult, SUCCESS};
use crate::output::{self, OutputFormat};

const ENV_VARS: [&str; 4] = ["DPBRIDGE_PROFILE_DIR", "DPBRIDGE_LOG_LEVEL", "TZ", "RUST_LOG"];

#[derive(Debug, Serialize)]
struct EngineDefaults {
    decision_window_secs: u64,
    request_spacing_ms: u64,
    time_reply_repeat_ms: u64,
    time_formats: usize,
    battery_retry: RetryPolicy,
    mains_retry: RetryPolicy,
}

#[derive(Debug, Serialize)]
struct EnvInfoOutput {
    version: &'static str,
    target: &'static str,
    os: &'static str,
    arch: &'static str,
    host_utc_offset_minutes: i32,
    features: Vec<&'static str>,
    engine: EngineDefaults,
    environment: BTreeMap<&'static str, Option<String>>,
}

pub fn run(_args: EnvinfoArgs, format: OutputFormat) -> CliResult<i32> {
    let environment = ENV_VARS
        .iter()
        .map(|name| (*name, std::env::var(name).ok()))
        .collect();

    let out = EnvInfoOutput {
        version: env!("CARGO_PKG_VERSION"),
        target: option_env!("DPBRIDGE_BUILD_TARGET").unwrap_or("unknown"),
        os: std::env::consts::OS,
        arch: std::env::consts::ARCH,
        host_utc_offset_minutes: HostOffsetSource.offset_minutes_at(chrono::Utc::now()),
        features: active_features(),
        engine: engine_defaults(&EngineConfig::default()),
        environment,
    };

    print_envinfo(&out, format);
    Ok(SUCCESS)
}

fn engine_defaults(config: &EngineConfig) -> EngineDefaults {
    EngineDefaults {
        decision_window_secs: config.arbitration.window.as_secs(),
        request_spacing_ms: config.request_spacing.as_millis() as u64,
        time_reply_repeat_ms: config.timesync.double_send_delay.as_millis() as u64,
        time_formats: FALLBACK_ORDER.len(),
        battery_retry: RetryPolicy::for_power(PowerSource::Battery),
        mains_retry: RetryPolicy::for_power(PowerSource::Mains),
    }
}

fn active_features() -> Vec<&'static str> {
    [
        ("engine", cfg!(feature = "engine")),
        ("async", cfg!(feature = "async")),
        ("cli", cfg!(feature = "cli")),
    ]
    .into_iter()
    .filter_map(|(name, on)| on.then_some(name))
    .collect()
}

fn retry_text(policy: &RetryPolicy) -> String {
    format!(
        "{} attempts, {}s timeout",
        policy.max_attempts,
        policy.timeout.as_secs()
    )
}

fn print_envinfo(out: &EnvInfoOutput, format: OutputFormat) {
    match format {
        OutputFormat::Json => output::print_json(out),
        OutputFormat::Table | OutputFormat::Pretty => {
            println!("dpbridge {} ({})", out.version, out.target);
            println!("  Platform:       {} ({})", out.os, out.arch);
            println!("  UTC offset:     {:+} min", out.host_utc_offset_minutes);
            println!("  Features:       {}", out.features.join(", "));
            println!("  Decide after:   {}s", out.engine.decision_window_secs);
            println!("  Write spacing:  {}ms", out.engine.request_spacing_ms);
            println!("  Time reply:     repeated after {}ms", out.engine.time_reply_repeat_ms);
            println!("  Time formats:   {}", out.engine.time_formats);
            println!("  Battery retry:  {}", retry_text(&out.engine.battery_retry));
            println!("  Mains retry:    {}", retry_text(&out.engine.mains_retry));

            let mut table = output::table(vec!["VARIABLE", "VALUE"]);
            for (name, value) in &out.environment {
                table.add_row(vec![
                    name.to_string(),
                    value.clone().unwrap_or_else(|| "(not set)".to_string()),
                ]);
            }
            println!("{table}");
        }
        OutputFormat::Raw => println!("{}", out.version),
    }
}
