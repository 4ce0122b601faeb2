use clap::{Args, Subcommand};
use std::path::PathBuf;

use crate::exit::CliResult;
use crate::output::OutputFormat;

pub mod check;
pub mod decode;
pub mod envinfo;
pub mod replay;
pub mod timesync;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Decode a hex-encoded DataPoint cluster payload.
    Decode(DecodeArgs),
    /// Build a time-sync reply payload.
    Timesync(TimesyncArgs),
    /// Feed a JSON-lines event capture through the engine.
    Replay(ReplayArgs),
    /// Validate a directory of mapping profiles.
    Check(CheckArgs),
    /// Show version information.
    Version(VersionArgs),
    /// Print build and environment diagnostics.
    Envinfo(EnvinfoArgs),
}

pub fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Decode(args) => decode::run(args, format),
        Command::Timesync(args) => timesync::run(args, format),
        Command::Replay(args) => replay::run(args, format),
        Command::Check(args) => check::run(args, format),
        Command::Version(args) => version::run(args),
        Command::Envinfo(args) => envinfo::run(args, format),
    }
}

#[derive(Args, Debug)]
pub struct DecodeArgs {
    /// Payload as hex (whitespace and `:` separators are ignored).
    pub hex: String,
    /// Do not fall back to scanning when no header offset matches.
    #[arg(long)]
    pub no_scan: bool,
    /// Also show the universal-catalogue attribute candidates per record.
    #[arg(long)]
    pub candidates: bool,
}

#[derive(Args, Debug)]
pub struct TimesyncArgs {
    /// Device model string used for format selection.
    #[arg(long, default_value = "", conflicts_with = "format_label")]
    pub model: String,
    /// Device manufacturer string used for format selection.
    #[arg(long, default_value = "", conflicts_with = "format_label")]
    pub manufacturer: String,
    /// Use this format instead of selecting one (e.g. `mcu-header`, `dual-1970`).
    #[arg(long, value_name = "LABEL")]
    pub format_label: Option<String>,
    /// Encode this instant (RFC 3339) instead of now.
    #[arg(long, value_name = "RFC3339")]
    pub at: Option<String>,
    /// UTC offset in minutes. Defaults to the host offset.
    #[arg(long, allow_hyphen_values = true)]
    pub tz_offset: Option<i32>,
    /// Also print the fallback chain.
    #[arg(long)]
    pub chain: bool,
}

#[derive(Args, Debug)]
pub struct ReplayArgs {
    /// JSON-lines capture, one event per line.
    pub file: PathBuf,
    /// Attributes every replayed device exposes (comma-separated).
    /// Default: every attribute in the universal catalogue.
    #[arg(long, value_delimiter = ',')]
    pub capabilities: Vec<String>,
    /// Directory of `*.mapping.json` profiles.
    #[arg(long, value_name = "DIR", env = "DPBRIDGE_PROFILE_DIR")]
    pub profiles: Option<PathBuf>,
    /// Persist device state as JSON files in this directory.
    #[arg(long, value_name = "DIR")]
    pub state_dir: Option<PathBuf>,
    /// Do not settle arbitration at the end of the capture.
    #[arg(long)]
    pub no_decide: bool,
}

#[derive(Args, Debug)]
pub struct CheckArgs {
    /// Directory of `*.mapping.json` profiles.
    pub dir: PathBuf,
    /// Reject unknown fields in profile documents.
    #[arg(long)]
    pub strict: bool,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}

#[derive(Args, Debug, Default)]
pub struct EnvinfoArgs {}
