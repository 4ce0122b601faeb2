use std::collections::BTreeMap;
use std::io::BufRead;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use dpbridge_engine::{
    Collaborators, DeferredAction, DeviceEngine, DeviceIdentity, EngineConfig, EngineStatus,
    IngressEvent, JsonFileStateStore, LinearBatteryOracle, MemorySender, MemorySink,
    MemoryStateStore, PowerSource, RecordedWrite, StateStore, StaticCapabilities,
};
use dpbridge_mapping::{attr, DeviceProfile, ProfileRegistry};
use dpbridge_timesync::SystemClock;
use serde::{Deserialize, Serialize};

use crate::cmd::ReplayArgs;
use crate::exit::{engine_error, io_error, mapping_error, CliResult, SUCCESS};
use crate::output::{self, OutputFormat};

/// One line of a capture file.
#[derive(Debug, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum ReplayEvent {
    Attach {
        device: String,
        #[serde(default)]
        model: String,
        #[serde(default)]
        manufacturer: String,
        #[serde(default)]
        power: PowerSource,
        /// Profile key; defaults to the device id.
        #[serde(default)]
        profile: Option<String>,
    },
    Frame {
        device: String,
        cluster: u16,
        /// Hex-encoded cluster payload.
        payload: String,
    },
    TimeRequest {
        device: String,
        /// Milliseconds since capture start.
        #[serde(default)]
        at_ms: Option<u64>,
    },
    Decide {
        device: String,
    },
    Force {
        device: String,
        #[serde(default = "default_active")]
        active: bool,
    },
}

fn default_active() -> bool {
    true
}

const DEFAULT_CAPABILITIES: &[&str] = &[
    attr::ONOFF,
    attr::ALARM_MOTION,
    attr::ALARM_CONTACT,
    attr::ALARM_WATER,
    attr::ALARM_SMOKE,
    attr::ALARM_BATTERY,
    attr::MEASURE_TEMPERATURE,
    attr::MEASURE_HUMIDITY,
    attr::MEASURE_LUMINANCE,
    attr::MEASURE_BATTERY,
    attr::MEASURE_CURRENT,
    attr::MEASURE_POWER,
    attr::MEASURE_VOLTAGE,
    attr::TARGET_TEMPERATURE,
];

#[derive(Debug, Serialize)]
struct ReplayOutput {
    events: usize,
    skipped: usize,
    sent_commands: usize,
    devices: Vec<EngineStatus>,
    writes: Vec<RecordedWrite>,
}

struct Replay {
    collab: Collaborators,
    sink: Arc<MemorySink>,
    sender: Arc<MemorySender>,
    registry: Option<ProfileRegistry>,
    config: EngineConfig,
    engines: BTreeMap<String, DeviceEngine>,
    start: Instant,
    events: usize,
    skipped: usize,
}

impl Replay {
    fn new(
        capabilities: StaticCapabilities,
        store: Arc<dyn StateStore>,
        registry: Option<ProfileRegistry>,
    ) -> Self {
        let sink = Arc::new(MemorySink::default());
        let sender = Arc::new(MemorySender::default());
        let collab = Collaborators {
            sink: sink.clone(),
            sender: sender.clone(),
            capabilities: Arc::new(capabilities),
            battery: Arc::new(LinearBatteryOracle),
            store,
            clock: Arc::new(SystemClock),
        };
        Self {
            collab,
            sink,
            sender,
            registry,
            config: EngineConfig::default(),
            engines: BTreeMap::new(),
            start: Instant::now(),
            events: 0,
            skipped: 0,
        }
    }

    fn attach(&mut self, identity: DeviceIdentity, profile_key: Option<&str>) {
        if let Some(previous) = self.engines.remove(&identity.id) {
            previous.detach();
        }
        let key = profile_key.unwrap_or(&identity.id).to_string();
        let profile = find_profile(self.registry.as_ref(), &key);
        if profile.is_none() && profile_key.is_some() {
            tracing::warn!(device = %identity.id, profile = %key, "mapping profile not found");
        }
        let id = identity.id.clone();
        let (engine, _) =
            DeviceEngine::attach(identity, profile, self.collab.clone(), self.config.clone());
        self.engines.insert(id, engine);
    }

    /// The device's engine, attached with a blank identity on first sight.
    fn engine(&mut self, device: &str) -> &mut DeviceEngine {
        let Self {
            engines,
            registry,
            collab,
            config,
            ..
        } = self;
        engines.entry(device.to_string()).or_insert_with(|| {
            let (engine, _) = DeviceEngine::attach(
                DeviceIdentity::new(device, "", ""),
                find_profile(registry.as_ref(), device),
                collab.clone(),
                config.clone(),
            );
            engine
        })
    }

    fn line(&mut self, number: usize, line: &str) {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            return;
        }
        let event: ReplayEvent = match serde_json::from_str(line) {
            Ok(event) => event,
            Err(err) => {
                tracing::warn!(line = number, error = %err, "skipping malformed event");
                self.skipped += 1;
                return;
            }
        };
        if self.apply(number, event) {
            self.events += 1;
        } else {
            self.skipped += 1;
        }
    }

    /// Returns false when the event was rejected.
    fn apply(&mut self, number: usize, event: ReplayEvent) -> bool {
        match event {
            ReplayEvent::Attach {
                device,
                model,
                manufacturer,
                power,
                profile,
            } => {
                let identity = DeviceIdentity::new(device, model, manufacturer).with_power(power);
                self.attach(identity, profile.as_deref());
            }
            ReplayEvent::Frame {
                device,
                cluster,
                payload,
            } => match output::parse_hex(&payload) {
                Ok(bytes) => {
                    let now = Instant::now();
                    let deferred = self.engine(&device).handle(
                        IngressEvent::Frame {
                            cluster,
                            payload: Bytes::from(bytes),
                        },
                        now,
                    );
                    self.run_sends(&device, deferred.into_iter().map(|d| d.action));
                }
                Err(err) => {
                    tracing::warn!(line = number, %device, error = %err, "skipping frame with bad hex");
                    return false;
                }
            },
            ReplayEvent::TimeRequest { device, at_ms } => {
                let now = match at_ms {
                    Some(ms) => self.start + Duration::from_millis(ms),
                    None => Instant::now(),
                };
                let deferred = self.engine(&device).handle(IngressEvent::TimeRequest, now);
                self.run_sends(&device, deferred.into_iter().map(|d| d.action));
            }
            ReplayEvent::Decide { device } => {
                self.engine(&device).decide();
            }
            ReplayEvent::Force { device, active } => {
                self.engine(&device).set_forced_active(active);
            }
        }
        true
    }

    /// Captures have no wall clock, so deferred sends go out right away.
    /// Timers for arbitration and query retries are dropped.
    fn run_sends(&mut self, device: &str, actions: impl Iterator<Item = DeferredAction>) {
        let engine = self.engine(device);
        for action in actions {
            if matches!(action, DeferredAction::Send { .. }) {
                engine.run(action);
            }
        }
    }

    fn finish(mut self, decide: bool) -> ReplayOutput {
        if decide {
            for engine in self.engines.values_mut() {
                engine.decide();
            }
        }
        let devices = self.engines.values().map(DeviceEngine::status).collect();
        for (_, engine) in std::mem::take(&mut self.engines) {
            engine.detach();
        }
        ReplayOutput {
            events: self.events,
            skipped: self.skipped,
            sent_commands: self.sender.sent().len(),
            devices,
            writes: self.sink.writes(),
        }
    }
}

pub fn run(args: ReplayArgs, format: OutputFormat) -> CliResult<i32> {
    let capabilities = if args.capabilities.is_empty() {
        StaticCapabilities::all(DEFAULT_CAPABILITIES.iter().copied())
    } else {
        StaticCapabilities::all(args.capabilities.iter().map(String::as_str))
    };
    let store: Arc<dyn StateStore> = match &args.state_dir {
        Some(dir) => Arc::new(
            JsonFileStateStore::open(dir).map_err(|err| engine_error("open state dir", err))?,
        ),
        None => Arc::new(MemoryStateStore::default()),
    };
    let registry = args
        .profiles
        .as_deref()
        .map(load_profiles)
        .transpose()?;

    let file = std::fs::File::open(&args.file)
        .map_err(|err| io_error(&format!("open {}", args.file.display()), err))?;
    let mut replay = Replay::new(capabilities, store, registry);
    for (index, line) in std::io::BufReader::new(file).lines().enumerate() {
        let line = line.map_err(|err| io_error("read capture", err))?;
        replay.line(index + 1, &line);
    }

    let out = replay.finish(!args.no_decide);
    print_replay(&out, format);
    Ok(SUCCESS)
}

fn find_profile(registry: Option<&ProfileRegistry>, key: &str) -> Option<Arc<DeviceProfile>> {
    registry
        .and_then(|registry| registry.get(key))
        .map(|profile| Arc::new(profile.clone()))
}

fn load_profiles(dir: &Path) -> CliResult<ProfileRegistry> {
    let registry = ProfileRegistry::from_directory(dir)
        .map_err(|err| mapping_error(&format!("load profiles from {}", dir.display()), err))?;
    tracing::info!(dir = %dir.display(), profiles = registry.len(), "mapping profiles loaded");
    Ok(registry)
}

fn print_replay(out: &ReplayOutput, format: OutputFormat) {
    match format {
        OutputFormat::Json => output::print_json(out),
        OutputFormat::Table => {
            let mut devices = output::table(vec![
                "DEVICE", "MODE", "ZCL", "DP", "RECORDS", "ROUTED", "UNKNOWN", "TIME FORMAT",
            ]);
            for status in &out.devices {
                devices.add_row(vec![
                    status.device.clone(),
                    status.mode.to_string(),
                    status.zcl_hits.to_string(),
                    status.tuya_hits.to_string(),
                    status.stats.records.to_string(),
                    status.stats.routed.to_string(),
                    status.stats.unknown.to_string(),
                    status.time_format.clone(),
                ]);
            }
            println!("{devices}");

            let mut writes = output::table(vec!["DEVICE", "ATTRIBUTE", "VALUE"]);
            for write in &out.writes {
                writes.add_row(vec![
                    write.device.clone(),
                    write.attribute.clone(),
                    write.value.to_string(),
                ]);
            }
            println!("{writes}");
            println!(
                "events: {}  skipped: {}  sent: {}",
                out.events, out.skipped, out.sent_commands
            );
        }
        OutputFormat::Pretty => {
            for status in &out.devices {
                println!(
                    "device={} mode={} zcl={} dp={} routed={} unknown={}",
                    status.device,
                    status.mode,
                    status.zcl_hits,
                    status.tuya_hits,
                    status.stats.routed,
                    status.stats.unknown
                );
            }
            for write in &out.writes {
                println!("  {} {} = {}", write.device, write.attribute, write.value);
            }
        }
        OutputFormat::Raw => {
            for write in &out.writes {
                println!("{}\t{}\t{}", write.device, write.attribute, write.value);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use dpbridge_engine::ArbitrationMode;
    use dpbridge_mapping::AttributeValue;

    use super::*;

    fn replay_lines(lines: &[&str]) -> ReplayOutput {
        let mut replay = Replay::new(
            StaticCapabilities::all(DEFAULT_CAPABILITIES.iter().copied()),
            Arc::new(MemoryStateStore::default()),
            None,
        );
        for (index, line) in lines.iter().enumerate() {
            replay.line(index + 1, line);
        }
        replay.finish(true)
    }

    #[test]
    fn datapoint_only_device_routes_and_decides() {
        let out = replay_lines(&[
            r#"{"kind":"attach","device":"th-1","model":"TS0601","manufacturer":"_TZE200_x"}"#,
            r#"{"kind":"frame","device":"th-1","cluster":61184,"payload":"0000010200 0202000400000030"}"#,
        ]);
        assert_eq!(out.events, 2);
        assert_eq!(out.devices[0].mode, ArbitrationMode::TuyaOnly);
        assert_eq!(out.writes.len(), 1);
        assert_eq!(out.writes[0].attribute, "measure_humidity");
        assert_eq!(out.writes[0].value, AttributeValue::Number(48.0));
    }

    #[test]
    fn time_request_sends_both_replies() {
        let out = replay_lines(&[r#"{"kind":"time_request","device":"trv-1","at_ms":0}"#]);
        assert_eq!(out.sent_commands, 2);
    }

    #[test]
    fn malformed_lines_are_skipped() {
        let out = replay_lines(&[
            "# comment",
            "",
            "{not json",
            r#"{"kind":"frame","device":"x","cluster":61184,"payload":"zz"}"#,
            r#"{"kind":"frame","device":"x","cluster":6,"payload":"00"}"#,
        ]);
        assert_eq!(out.events, 1);
        assert_eq!(out.skipped, 2);
        assert_eq!(out.devices[0].mode, ArbitrationMode::ZclOnly);
    }
}
