use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use dpbridge_codec::{
    is_datapoint_cluster, CommandWriter, DecoderConfig, DpValue, FrameDecoder, OutboundCommand,
    StrategyMemo, TypeTag, TUYA_DP,
};
use dpbridge_mapping::DeviceProfile;
use dpbridge_timesync::{build_payload_with_clock, select_format};
use serde::{Deserialize, Serialize};

use crate::arbiter::{ArbitrationConfig, ArbitrationMode, Protocol, ProtocolArbiter};
use crate::collab::Collaborators;
use crate::error::Result;
use crate::retry::{PowerSource, QueryState, QueryTracker, RetryPolicy, RetryStep};
use crate::router::{DataPointRouter, RouteOutcome};
use crate::state::PersistedDeviceState;
use crate::timesync::{TimeSyncPolicy, TimeSyncTracker};

/// Default spacing between consecutive outbound DataPoint requests.
pub const DEFAULT_REQUEST_SPACING: Duration = Duration::from_millis(200);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceIdentity {
    pub id: String,
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub manufacturer: String,
    #[serde(default)]
    pub power: PowerSource,
}

impl DeviceIdentity {
    pub fn new(id: impl Into<String>, model: impl Into<String>, manufacturer: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            model: model.into(),
            manufacturer: manufacturer.into(),
            power: PowerSource::default(),
        }
    }

    pub fn with_power(mut self, power: PowerSource) -> Self {
        self.power = power;
        self
    }
}

/// Tunables for one [`DeviceEngine`].
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub decoder: DecoderConfig,
    pub arbitration: ArbitrationConfig,
    pub timesync: TimeSyncPolicy,
    pub request_spacing: Duration,
    /// Overrides the power-source default when set.
    pub retry: Option<RetryPolicy>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            decoder: DecoderConfig::default(),
            arbitration: ArbitrationConfig::default(),
            timesync: TimeSyncPolicy::default(),
            request_spacing: DEFAULT_REQUEST_SPACING,
            retry: None,
        }
    }
}

/// Canonical events delivered by the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngressEvent {
    /// A cluster payload with the ZCL header already stripped.
    Frame { cluster: u16, payload: Bytes },
    /// The device asked for the current time.
    TimeRequest,
}

/// Work the caller must run after `delay`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeferredAction {
    Send { cluster: u16, bytes: Bytes },
    Decide,
    QueryTimeout { attempt: u32 },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Deferred {
    pub delay: Duration,
    pub action: DeferredAction,
}

impl Deferred {
    fn send(delay: Duration, command: &OutboundCommand) -> Self {
        Self {
            delay,
            action: DeferredAction::Send {
                cluster: TUYA_DP,
                bytes: command.to_bytes(),
            },
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FrameStats {
    pub frames: u64,
    pub records: u64,
    pub empty_frames: u64,
    pub scanned_frames: u64,
    pub memo_hits: u64,
    pub routed: u64,
    pub settings: u64,
    pub dropped: u64,
    pub unknown: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UnknownSummary {
    pub dp: u8,
    pub count: u64,
    pub last: DpValue,
}

/// Point-in-time view of a device engine.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EngineStatus {
    pub device: String,
    pub model: String,
    pub manufacturer: String,
    pub power: PowerSource,
    pub mode: ArbitrationMode,
    pub decided: bool,
    pub forced_active: bool,
    pub zcl_hits: u32,
    pub tuya_hits: u32,
    pub profile: Option<String>,
    pub strategy_offset: Option<usize>,
    pub time_format: String,
    pub time_format_index: usize,
    pub query: QueryState,
    pub stats: FrameStats,
    pub unknown: Vec<UnknownSummary>,
}

/// Synchronous per-device facade tying the decoder to arbitration and routing.
///
/// Never blocks: delayed work comes back as [`Deferred`] values for the caller
/// (or [`DeviceActor`](crate::DeviceActor)) to schedule.
pub struct DeviceEngine {
    identity: DeviceIdentity,
    config: EngineConfig,
    collab: Collaborators,
    profile_key: Option<String>,
    decoder: FrameDecoder,
    memo: StrategyMemo,
    arbiter: ProtocolArbiter,
    router: DataPointRouter,
    writer: CommandWriter,
    timesync: TimeSyncTracker,
    query: QueryTracker,
    stats: FrameStats,
}

impl DeviceEngine {
    /// Bind a device, restoring persisted state.
    ///
    /// Returns the engine and the initial deferred work (the arbitration
    /// timer when the device is still undecided).
    pub fn attach(
        identity: DeviceIdentity,
        profile: Option<Arc<DeviceProfile>>,
        collab: Collaborators,
        config: EngineConfig,
    ) -> (Self, Vec<Deferred>) {
        let profile_key = profile.as_ref().map(|p| p.device.clone());
        let profile = profile.unwrap_or_else(|| Arc::new(DeviceProfile::new(identity.id.clone())));
        let router = DataPointRouter::new(
            identity.id.clone(),
            profile,
            Arc::clone(&collab.capabilities),
            Arc::clone(&collab.battery),
        );
        let primary = select_format(&identity.model, &identity.manufacturer);
        let retry = config
            .retry
            .unwrap_or_else(|| RetryPolicy::for_power(identity.power));

        let mut engine = Self {
            decoder: FrameDecoder::with_config(config.decoder.clone()),
            memo: StrategyMemo::new(),
            arbiter: ProtocolArbiter::with_config(config.arbitration),
            router,
            writer: CommandWriter::new(),
            timesync: TimeSyncTracker::new(primary, config.timesync),
            query: QueryTracker::new(retry),
            stats: FrameStats::default(),
            profile_key,
            identity,
            config,
            collab,
        };

        match engine.collab.store.load(&engine.identity.id) {
            Ok(Some(saved)) => engine.restore(&saved),
            Ok(None) => {}
            Err(err) => {
                tracing::warn!(device = %engine.identity.id, error = %err, "failed to load persisted state")
            }
        }

        tracing::info!(
            device = %engine.identity.id,
            mode = %engine.arbiter.mode(),
            time_format = %engine.timesync.current(),
            "device attached"
        );

        let deferred = engine.decision_timer().into_iter().collect();
        (engine, deferred)
    }

    fn restore(&mut self, saved: &PersistedDeviceState) {
        self.arbiter.restore(saved.mode, saved.forced_active);
        if let Some(format) = saved.time_format {
            if !self.timesync.restore(format) {
                tracing::debug!(device = %self.identity.id, %format, "persisted time format not in chain");
            }
        }
        if saved.profile.is_some() && saved.profile != self.profile_key {
            tracing::info!(
                device = %self.identity.id,
                previous = ?saved.profile,
                current = ?self.profile_key,
                "mapping profile changed since last attach"
            );
        }
    }

    fn decision_timer(&self) -> Option<Deferred> {
        (!self.arbiter.is_decided()).then(|| Deferred {
            delay: self.arbiter.config().window,
            action: DeferredAction::Decide,
        })
    }

    pub fn identity(&self) -> &DeviceIdentity {
        &self.identity
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn arbiter(&self) -> &ProtocolArbiter {
        &self.arbiter
    }

    pub fn router(&self) -> &DataPointRouter {
        &self.router
    }

    /// Dispatch a canonical ingress event.
    pub fn handle(&mut self, event: IngressEvent, now: Instant) -> Vec<Deferred> {
        match event {
            IngressEvent::Frame { cluster, payload } => {
                self.on_raw_frame(cluster, &payload);
                Vec::new()
            }
            IngressEvent::TimeRequest => self.on_time_request(now),
        }
    }

    /// Feed one cluster payload. Never fails.
    pub fn on_raw_frame(&mut self, cluster: u16, buffer: &[u8]) {
        if !is_datapoint_cluster(cluster) {
            self.arbiter.register_hit(Protocol::Zcl);
            return;
        }

        let decoded = self.decoder.decode_with_memo(buffer, &mut self.memo);
        self.stats.frames += 1;
        self.stats.records += decoded.records.len() as u64;
        if decoded.from_memo {
            self.stats.memo_hits += 1;
        }
        match decoded.method.header_offset() {
            _ if decoded.is_empty() => {
                self.stats.empty_frames += 1;
                tracing::debug!(device = %self.identity.id, len = buffer.len(), "no datapoints in frame");
                return;
            }
            None => self.stats.scanned_frames += 1,
            Some(_) => {}
        }

        for _ in &decoded.records {
            self.arbiter.register_hit(Protocol::Tuya);
        }
        if self.query.on_report() {
            tracing::debug!(device = %self.identity.id, "datapoint report settled pending query");
        }

        if !self.arbiter.accepts(Protocol::Tuya) {
            tracing::debug!(
                device = %self.identity.id,
                mode = %self.arbiter.mode(),
                records = decoded.records.len(),
                "datapoint path disabled, records not routed"
            );
            return;
        }

        for record in &decoded.records {
            let value = record.value();
            let outcome = self.router.route(record.id, &value);
            match &outcome {
                RouteOutcome::Routed { .. } => self.stats.routed += 1,
                RouteOutcome::SettingOnly => self.stats.settings += 1,
                RouteOutcome::Dropped { reason } => {
                    self.stats.dropped += 1;
                    tracing::debug!(device = %self.identity.id, dp = record.id, reason, "datapoint dropped");
                }
                RouteOutcome::Unknown => self.stats.unknown += 1,
            }
            for write in outcome.writes() {
                if let Err(err) =
                    self.collab
                        .sink
                        .write_attribute(&self.identity.id, &write.attribute, &write.value)
                {
                    tracing::warn!(
                        device = %self.identity.id,
                        dp = record.id,
                        attribute = %write.attribute,
                        error = %err,
                        "attribute write failed"
                    );
                }
            }
        }
    }

    /// Answer a device time request: once now, once more after the double-send delay.
    pub fn on_time_request(&mut self, now: Instant) -> Vec<Deferred> {
        let (format, advanced) = self.timesync.on_request(now);
        if advanced {
            self.persist();
        }
        let clock = self.collab.clock.now();
        let payload = build_payload_with_clock(format, &clock);
        let command = self.writer.time_response(&payload);
        tracing::debug!(device = %self.identity.id, %format, len = payload.len(), "answering time request");

        self.send_now(&command);
        vec![Deferred::send(self.timesync.policy().double_send_delay, &command)]
    }

    /// Ask the device to report all DataPoints, with retries per power source.
    ///
    /// A failed send is logged; the timeout is armed regardless.
    pub fn query_datapoints(&mut self) -> Result<Vec<Deferred>> {
        let attempt = self.query.start();
        let command = self.writer.query_all();
        // The timeout stays armed so a lost first attempt is retried.
        self.send_now(&command);
        Ok(vec![Deferred {
            delay: self.query.policy().timeout,
            action: DeferredAction::QueryTimeout { attempt },
        }])
    }

    /// Write DataPoints, one command each, spaced by `request_spacing`.
    ///
    /// All values are encoded before anything is sent.
    pub fn write_datapoints(&mut self, points: &[(u8, TypeTag, DpValue)]) -> Result<Vec<Deferred>> {
        let mut commands = Vec::with_capacity(points.len());
        let mut writer = self.writer.clone();
        for (id, tag, value) in points {
            commands.push(writer.set_datapoint(*id, *tag, value)?);
        }
        self.writer = writer;

        let mut deferred = Vec::new();
        for (index, command) in commands.iter().enumerate() {
            if index == 0 {
                self.send_now(command);
            } else {
                let delay = self.config.request_spacing.saturating_mul(index as u32);
                deferred.push(Deferred::send(delay, command));
            }
        }
        Ok(deferred)
    }

    /// Run a previously returned deferred action.
    pub fn run(&mut self, action: DeferredAction) -> Vec<Deferred> {
        match action {
            DeferredAction::Send { cluster, bytes } => {
                if let Err(err) = self.collab.sender.send_bytes(&self.identity.id, cluster, &bytes) {
                    tracing::warn!(device = %self.identity.id, cluster, error = %err, "deferred send failed");
                }
                Vec::new()
            }
            DeferredAction::Decide => self.decide(),
            DeferredAction::QueryTimeout { attempt } => self.on_query_timeout(attempt),
        }
    }

    /// Settle arbitration. While nothing has been seen the timer is re-armed.
    pub fn decide(&mut self) -> Vec<Deferred> {
        let was_decided = self.arbiter.is_decided();
        self.arbiter.decide();
        if self.arbiter.is_decided() && !was_decided {
            self.persist();
        }
        self.decision_timer().into_iter().collect()
    }

    pub fn set_forced_active(&mut self, forced: bool) {
        self.arbiter.set_forced_active(forced);
        self.persist();
    }

    pub fn override_mode(&mut self, mode: ArbitrationMode) {
        self.arbiter.override_mode(mode);
        self.persist();
    }

    fn on_query_timeout(&mut self, attempt: u32) -> Vec<Deferred> {
        match self.query.on_timeout(attempt, &mut rand::thread_rng()) {
            RetryStep::Retry { attempt, delay } => {
                tracing::debug!(device = %self.identity.id, attempt, ?delay, "query timed out, retrying");
                let command = self.writer.query_all();
                vec![
                    Deferred::send(delay, &command),
                    Deferred {
                        delay: delay + self.query.policy().timeout,
                        action: DeferredAction::QueryTimeout { attempt },
                    },
                ]
            }
            RetryStep::GiveUp => {
                tracing::info!(device = %self.identity.id, "query retries exhausted, waiting for passive report");
                Vec::new()
            }
            RetryStep::Stale => Vec::new(),
        }
    }

    fn send_now(&self, command: &OutboundCommand) {
        if let Err(err) = self
            .collab
            .sender
            .send_bytes(&self.identity.id, TUYA_DP, &command.to_bytes())
        {
            tracing::warn!(device = %self.identity.id, command = command.command, error = %err, "send failed");
        }
    }

    /// State that would be persisted right now.
    pub fn persisted_state(&self) -> PersistedDeviceState {
        let state = self.arbiter.state();
        PersistedDeviceState {
            mode: state.mode,
            forced_active: state.forced_active,
            profile: self.profile_key.clone(),
            time_format: (self.timesync.index() > 0).then(|| self.timesync.current()),
        }
    }

    fn persist(&self) {
        if let Err(err) = self
            .collab
            .store
            .save(&self.identity.id, &self.persisted_state())
        {
            tracing::warn!(device = %self.identity.id, error = %err, "failed to persist device state");
        }
    }

    pub fn status(&self) -> EngineStatus {
        let state = self.arbiter.state();
        EngineStatus {
            device: self.identity.id.clone(),
            model: self.identity.model.clone(),
            manufacturer: self.identity.manufacturer.clone(),
            power: self.identity.power,
            mode: state.mode,
            decided: state.decided,
            forced_active: state.forced_active,
            zcl_hits: state.zcl_hits,
            tuya_hits: state.tuya_hits,
            profile: self.profile_key.clone(),
            strategy_offset: self.memo.hint(),
            time_format: self.timesync.current().to_string(),
            time_format_index: self.timesync.index(),
            query: self.query.state(),
            stats: self.stats,
            unknown: self
                .router
                .unknown()
                .iter()
                .map(|(dp, entry)| UnknownSummary {
                    dp,
                    count: entry.count,
                    last: entry.last.clone(),
                })
                .collect(),
        }
    }

    /// Unbind the device. Decided state is persisted.
    pub fn detach(self) -> PersistedDeviceState {
        let state = self.persisted_state();
        if self.arbiter.is_decided() {
            self.persist();
        }
        tracing::info!(device = %self.identity.id, mode = %state.mode, "device detached");
        state
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::{TimeZone, Utc};
    use dpbridge_codec::{cluster, command, encode_record, DataPointRecord};
    use dpbridge_mapping::{attr, AttributeValue, DpMapping, Transform};
    use dpbridge_timesync::{parse_payload, FixedClock, LocalClock, TimeSyncFormat};

    use super::*;
    use crate::collab::{
        CollabError, LinearBatteryOracle, MemorySender, MemorySink, StaticCapabilities, WireSender,
    };
    use crate::state::{MemoryStateStore, StateStore};

    struct Harness {
        sink: Arc<MemorySink>,
        sender: Arc<MemorySender>,
        store: Arc<MemoryStateStore>,
        collab: Collaborators,
    }

    fn harness(attributes: &[&str]) -> Harness {
        let sink = Arc::new(MemorySink::default());
        let sender = Arc::new(MemorySender::default());
        let store = Arc::new(MemoryStateStore::default());
        let clock = LocalClock::new(
            Utc.with_ymd_and_hms(2024, 3, 10, 14, 30, 15).single().unwrap(),
            60,
        );
        let collab = Collaborators {
            sink: sink.clone(),
            sender: sender.clone(),
            capabilities: Arc::new(StaticCapabilities::all(attributes.iter().copied())),
            battery: Arc::new(LinearBatteryOracle),
            store: store.clone(),
            clock: Arc::new(FixedClock(clock)),
        };
        Harness {
            sink,
            sender,
            store,
            collab,
        }
    }

    struct OfflineSender;

    impl WireSender for OfflineSender {
        fn send_bytes(
            &self,
            _device: &str,
            _cluster: u16,
            _bytes: &[u8],
        ) -> std::result::Result<(), CollabError> {
            Err(CollabError::Unavailable("radio down".to_string()))
        }
    }

    fn offline(h: &Harness) -> Collaborators {
        Collaborators {
            sender: Arc::new(OfflineSender),
            ..h.collab.clone()
        }
    }

    fn identity() -> DeviceIdentity {
        DeviceIdentity::new("0x00124b0001", "TS0601", "_TZE200_sensor")
    }

    /// Five-byte header followed by the given records.
    fn report(records: &[(u8, TypeTag, DpValue)]) -> Vec<u8> {
        let mut body = bytes::BytesMut::from(&[0x00, 0x00, 0x01, 0x02, 0x00][..]);
        for (id, tag, value) in records {
            encode_record(&DataPointRecord::from_value(*id, *tag, value).unwrap(), &mut body);
        }
        body.to_vec()
    }

    #[test]
    fn attach_arms_decision_timer() {
        let h = harness(&[]);
        let (engine, deferred) =
            DeviceEngine::attach(identity(), None, h.collab.clone(), EngineConfig::default());
        assert_eq!(engine.arbiter().mode(), ArbitrationMode::Undecided);
        assert_eq!(
            deferred,
            vec![Deferred {
                delay: Duration::from_secs(900),
                action: DeferredAction::Decide
            }]
        );
    }

    #[test]
    fn silent_device_rearms_then_decides_on_first_datapoint() {
        let h = harness(&[attr::MEASURE_TEMPERATURE]);
        let (mut engine, _) =
            DeviceEngine::attach(identity(), None, h.collab.clone(), EngineConfig::default());

        let rearmed = engine.run(DeferredAction::Decide);
        assert_eq!(engine.arbiter().mode(), ArbitrationMode::Undecided);
        assert_eq!(rearmed.len(), 1);

        engine.on_raw_frame(TUYA_DP, &[0x01, 0x01, 0x00, 0x01, 0x01]);
        assert!(engine.run(DeferredAction::Decide).is_empty());
        assert_eq!(engine.arbiter().mode(), ArbitrationMode::TuyaOnly);
        assert_eq!(
            h.store.load("0x00124b0001").unwrap().map(|s| s.mode),
            Some(ArbitrationMode::TuyaOnly)
        );
    }

    #[test]
    fn frames_route_through_layers_and_write_attributes() {
        let h = harness(&[
            attr::MEASURE_TEMPERATURE,
            attr::MEASURE_HUMIDITY,
            attr::MEASURE_BATTERY,
        ]);
        let profile = Arc::new(DeviceProfile::new("acme:th01").with_mapping(DpMapping::new(
            1,
            attr::MEASURE_TEMPERATURE,
            Transform::scale(10.0),
        )));
        let (mut engine, _) =
            DeviceEngine::attach(identity(), Some(profile), h.collab.clone(), EngineConfig::default());

        engine.on_raw_frame(
            TUYA_DP,
            &report(&[
                (1, TypeTag::Value, DpValue::Value(215)),
                (2, TypeTag::Value, DpValue::Value(48)),
                (15, TypeTag::Value, DpValue::Value(46)),
            ]),
        );

        assert_eq!(h.sink.last(attr::MEASURE_TEMPERATURE), Some(AttributeValue::Number(21.5)));
        assert_eq!(h.sink.last(attr::MEASURE_HUMIDITY), Some(AttributeValue::Number(48.0)));
        assert_eq!(h.sink.last(attr::MEASURE_BATTERY), Some(AttributeValue::Number(46.0)));

        let status = engine.status();
        assert_eq!(status.tuya_hits, 3);
        assert_eq!(status.stats.routed, 3);
        assert_eq!(status.strategy_offset, Some(5));
        assert_eq!(status.profile.as_deref(), Some("acme:th01"));
    }

    #[test]
    fn zcl_only_device_decodes_but_does_not_route() {
        let h = harness(&[attr::ONOFF]);
        let (mut engine, _) =
            DeviceEngine::attach(identity(), None, h.collab.clone(), EngineConfig::default());
        engine.on_raw_frame(cluster::ON_OFF, &[0x00]);
        engine.decide();
        assert_eq!(engine.arbiter().mode(), ArbitrationMode::ZclOnly);

        engine.on_raw_frame(TUYA_DP, &[0x01, 0x01, 0x00, 0x01, 0x01]);
        assert!(h.sink.writes().is_empty());
        assert_eq!(engine.status().stats.records, 1);

        engine.set_forced_active(true);
        assert_eq!(engine.arbiter().mode(), ArbitrationMode::HybridForced);
        engine.on_raw_frame(TUYA_DP, &[0x01, 0x01, 0x00, 0x01, 0x01]);
        assert_eq!(h.sink.last(attr::ONOFF), Some(AttributeValue::Bool(true)));
    }

    #[test]
    fn persisted_mode_is_restored_on_attach() {
        let h = harness(&[]);
        h.store
            .save(
                "0x00124b0001",
                &PersistedDeviceState {
                    mode: ArbitrationMode::Hybrid,
                    forced_active: false,
                    profile: None,
                    time_format: Some(TimeSyncFormat::Gateway),
                },
            )
            .unwrap();
        let (engine, deferred) =
            DeviceEngine::attach(identity(), None, h.collab.clone(), EngineConfig::default());
        assert!(deferred.is_empty());
        assert_eq!(engine.arbiter().mode(), ArbitrationMode::Hybrid);
        assert_eq!(engine.status().time_format, "gateway");
    }

    #[test]
    fn time_request_sends_twice() {
        let h = harness(&[]);
        let (mut engine, _) =
            DeviceEngine::attach(identity(), None, h.collab.clone(), EngineConfig::default());

        let deferred = engine.handle(IngressEvent::TimeRequest, Instant::now());
        let sent = h.sender.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].cluster, TUYA_DP);
        assert_eq!(sent[0].bytes[0], command::MCU_SYNC_TIME);

        // TS0601 with a _TZE200_ manufacturer answers with dual epochs.
        let payload = &sent[0].bytes[3..];
        let parsed = parse_payload(
            TimeSyncFormat::DualEpoch {
                base: dpbridge_timesync::EpochBase::Unix1970,
            },
            payload,
        )
        .unwrap();
        assert_eq!(
            parsed.utc,
            Some(Utc.with_ymd_and_hms(2024, 3, 10, 14, 30, 15).single().unwrap())
        );

        assert_eq!(deferred.len(), 1);
        assert_eq!(deferred[0].delay, Duration::from_millis(200));
        match &deferred[0].action {
            DeferredAction::Send { bytes, .. } => assert_eq!(bytes.as_ref(), sent[0].bytes.as_slice()),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn repeated_time_requests_advance_and_persist_format() {
        let h = harness(&[]);
        let (mut engine, _) =
            DeviceEngine::attach(identity(), None, h.collab.clone(), EngineConfig::default());
        let start = Instant::now();
        for s in 0..4 {
            engine.on_time_request(start + Duration::from_secs(s * 5));
        }
        assert_eq!(engine.status().time_format_index, 1);
        assert!(h.store.load("0x00124b0001").unwrap().unwrap().time_format.is_some());
    }

    #[test]
    fn write_datapoints_spaces_commands() {
        let h = harness(&[]);
        let (mut engine, _) =
            DeviceEngine::attach(identity(), None, h.collab.clone(), EngineConfig::default());
        let deferred = engine
            .write_datapoints(&[
                (1, TypeTag::Bool, DpValue::Bool(true)),
                (2, TypeTag::Value, DpValue::Value(220)),
                (4, TypeTag::Enum, DpValue::Enum(1)),
            ])
            .unwrap();
        assert_eq!(h.sender.sent().len(), 1);
        let delays: Vec<_> = deferred.iter().map(|d| d.delay).collect();
        assert_eq!(delays, vec![Duration::from_millis(200), Duration::from_millis(400)]);
    }

    #[test]
    fn write_datapoints_validates_before_sending() {
        let h = harness(&[]);
        let (mut engine, _) =
            DeviceEngine::attach(identity(), None, h.collab.clone(), EngineConfig::default());
        let result = engine.write_datapoints(&[
            (1, TypeTag::Bool, DpValue::Bool(true)),
            (250, TypeTag::Bool, DpValue::Bool(true)),
        ]);
        assert!(result.is_err());
        assert!(h.sender.sent().is_empty());
    }

    #[test]
    fn battery_query_retries_then_waits_passively() {
        let h = harness(&[]);
        let identity = identity().with_power(PowerSource::Battery);
        let (mut engine, _) =
            DeviceEngine::attach(identity, None, h.collab.clone(), EngineConfig::default());

        let first = engine.query_datapoints().unwrap();
        assert_eq!(first[0].delay, Duration::from_secs(5));

        let retry = engine.run(first[0].action.clone());
        assert_eq!(retry.len(), 2);
        let timeout = retry[1].action.clone();
        assert!(engine.run(timeout).is_empty());
        assert_eq!(engine.status().query, QueryState::AwaitingPassiveReport);

        engine.on_raw_frame(TUYA_DP, &[0x01, 0x01, 0x00, 0x01, 0x01]);
        assert_eq!(engine.status().query, QueryState::Idle);
    }

    #[test]
    fn failed_query_send_still_arms_retry() {
        let h = harness(&[]);
        let identity = identity().with_power(PowerSource::Battery);
        let (mut engine, _) =
            DeviceEngine::attach(identity, None, offline(&h), EngineConfig::default());

        let first = engine.query_datapoints().unwrap();
        assert_eq!(
            first,
            vec![Deferred {
                delay: Duration::from_secs(5),
                action: DeferredAction::QueryTimeout { attempt: 1 },
            }]
        );
        assert_eq!(engine.status().query, QueryState::Pending { attempt: 1 });

        let retry = engine.run(first[0].action.clone());
        assert_eq!(retry.len(), 2);
        assert!(matches!(retry[1].action, DeferredAction::QueryTimeout { attempt: 2 }));
    }

    #[test]
    fn failed_write_send_keeps_spaced_followups() {
        let h = harness(&[]);
        let (mut engine, _) =
            DeviceEngine::attach(identity(), None, offline(&h), EngineConfig::default());
        let deferred = engine
            .write_datapoints(&[
                (1, TypeTag::Bool, DpValue::Bool(true)),
                (2, TypeTag::Value, DpValue::Value(220)),
            ])
            .unwrap();
        assert_eq!(deferred.len(), 1);
        assert_eq!(deferred[0].delay, Duration::from_millis(200));
    }

    #[test]
    fn battery_dp_without_capability_writes_nothing() {
        let h = harness(&[attr::MEASURE_HUMIDITY]);
        let (mut engine, _) =
            DeviceEngine::attach(identity(), None, h.collab.clone(), EngineConfig::default());
        engine.on_raw_frame(
            TUYA_DP,
            &[0x00, 0x00, 0x01, 0x02, 0x00, 0x0F, 0x02, 0x00, 0x04, 0x00, 0x00, 0x00, 0x2E],
        );
        assert!(h.sink.writes().is_empty());
        let status = engine.status();
        assert_eq!(status.stats.dropped, 1);
        assert_eq!(status.stats.routed, 0);
    }

    #[test]
    fn unknown_datapoints_show_in_status() {
        let h = harness(&[]);
        let (mut engine, _) =
            DeviceEngine::attach(identity(), None, h.collab.clone(), EngineConfig::default());
        engine.on_raw_frame(TUYA_DP, &report(&[(150, TypeTag::Enum, DpValue::Enum(3))]));
        let status = engine.status();
        assert_eq!(status.stats.unknown, 1);
        assert_eq!(status.unknown[0].dp, 150);
        assert_eq!(status.unknown[0].last, DpValue::Enum(3));
    }
}
