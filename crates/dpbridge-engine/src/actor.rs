//! Actor-per-device runtime on tokio.
//!
//! Each attached device gets one task owning its [`DeviceEngine`]. Callers
//! talk to it through a cloneable [`DeviceHandle`]; deferred work returned by
//! the engine is slept on in small timer tasks that post back into the inbox.

use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use dpbridge_codec::{DpValue, TypeTag};
use dpbridge_mapping::DeviceProfile;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::arbiter::ArbitrationMode;
use crate::collab::Collaborators;
use crate::engine::{
    Deferred, DeferredAction, DeviceEngine, DeviceIdentity, EngineConfig, EngineStatus,
    IngressEvent,
};
use crate::error::{EngineError, Result};
use crate::state::PersistedDeviceState;

/// Bounded inbox size per device.
pub const INBOX_CAPACITY: usize = 256;

enum Command {
    Event(IngressEvent),
    Deferred(DeferredAction),
    Status(oneshot::Sender<EngineStatus>),
    SetForcedActive(bool),
    OverrideMode(ArbitrationMode),
    Query(oneshot::Sender<Result<()>>),
    Write(Vec<(u8, TypeTag, DpValue)>, oneshot::Sender<Result<()>>),
    Detach(oneshot::Sender<PersistedDeviceState>),
}

/// Owns one [`DeviceEngine`] inside a tokio task.
pub struct DeviceActor {
    engine: DeviceEngine,
    inbox: mpsc::Receiver<Command>,
    outbox: mpsc::WeakSender<Command>,
    shutdown: CancellationToken,
}

impl DeviceActor {
    /// Attach a device and start its task.
    ///
    /// Cancelling `shutdown` stops the task; decided state is persisted on the way out.
    pub fn spawn(
        identity: DeviceIdentity,
        profile: Option<Arc<DeviceProfile>>,
        collab: Collaborators,
        config: EngineConfig,
        shutdown: CancellationToken,
    ) -> (DeviceHandle, JoinHandle<()>) {
        let device = identity.id.clone();
        let (engine, initial) = DeviceEngine::attach(identity, profile, collab, config);
        let (tx, rx) = mpsc::channel(INBOX_CAPACITY);
        let actor = Self {
            engine,
            inbox: rx,
            outbox: tx.downgrade(),
            shutdown: shutdown.clone(),
        };
        let task = tokio::spawn(actor.run(initial));
        let handle = DeviceHandle {
            device,
            tx,
            shutdown,
        };
        (handle, task)
    }

    async fn run(mut self, initial: Vec<Deferred>) {
        self.schedule(initial);

        let reply = loop {
            let command = tokio::select! {
                biased;
                () = self.shutdown.cancelled() => None,
                command = self.inbox.recv() => command,
            };
            match command {
                None => break None,
                Some(Command::Detach(reply)) => break Some(reply),
                Some(command) => {
                    let deferred = self.apply(command);
                    self.schedule(deferred);
                }
            }
        };

        let state = self.engine.detach();
        if let Some(reply) = reply {
            let _ = reply.send(state);
        }
    }

    fn apply(&mut self, command: Command) -> Vec<Deferred> {
        let engine = &mut self.engine;
        match command {
            Command::Event(event) => engine.handle(event, tokio::time::Instant::now().into_std()),
            Command::Deferred(action) => engine.run(action),
            Command::Status(reply) => {
                let _ = reply.send(engine.status());
                Vec::new()
            }
            Command::SetForcedActive(forced) => {
                engine.set_forced_active(forced);
                Vec::new()
            }
            Command::OverrideMode(mode) => {
                engine.override_mode(mode);
                Vec::new()
            }
            Command::Query(reply) => split_reply(engine.query_datapoints(), reply),
            Command::Write(points, reply) => split_reply(engine.write_datapoints(&points), reply),
            Command::Detach(_) => Vec::new(),
        }
    }

    fn schedule(&self, deferred: Vec<Deferred>) {
        for Deferred { delay, action } in deferred {
            let outbox = self.outbox.clone();
            let shutdown = self.shutdown.clone();
            tokio::spawn(async move {
                tokio::select! {
                    () = shutdown.cancelled() => {}
                    () = tokio::time::sleep(delay) => {
                        if let Some(tx) = outbox.upgrade() {
                            let _ = tx.send(Command::Deferred(action)).await;
                        }
                    }
                }
            });
        }
    }
}

fn split_reply(result: Result<Vec<Deferred>>, reply: oneshot::Sender<Result<()>>) -> Vec<Deferred> {
    match result {
        Ok(deferred) => {
            let _ = reply.send(Ok(()));
            deferred
        }
        Err(err) => {
            let _ = reply.send(Err(err));
            Vec::new()
        }
    }
}

/// Cloneable address of a running [`DeviceActor`].
#[derive(Debug, Clone)]
pub struct DeviceHandle {
    device: String,
    tx: mpsc::Sender<Command>,
    shutdown: CancellationToken,
}

impl std::fmt::Debug for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Event(_) => "event",
            Self::Deferred(_) => "deferred",
            Self::Status(_) => "status",
            Self::SetForcedActive(_) => "set_forced_active",
            Self::OverrideMode(_) => "override_mode",
            Self::Query(_) => "query",
            Self::Write(..) => "write",
            Self::Detach(_) => "detach",
        };
        f.write_str(name)
    }
}

impl DeviceHandle {
    pub fn device(&self) -> &str {
        &self.device
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    async fn send(&self, command: Command) -> Result<()> {
        self.tx
            .send(command)
            .await
            .map_err(|_| EngineError::Detached(self.device.clone()))
    }

    async fn request<T>(&self, make: impl FnOnce(oneshot::Sender<T>) -> Command) -> Result<T> {
        let (reply, rx) = oneshot::channel();
        self.send(make(reply)).await?;
        rx.await.map_err(|_| EngineError::Detached(self.device.clone()))
    }

    /// Deliver a cluster payload (ZCL header stripped).
    pub async fn frame(&self, cluster: u16, payload: impl Into<Bytes>) -> Result<()> {
        self.send(Command::Event(IngressEvent::Frame {
            cluster,
            payload: payload.into(),
        }))
        .await
    }

    pub async fn time_request(&self) -> Result<()> {
        self.send(Command::Event(IngressEvent::TimeRequest)).await
    }

    pub async fn status(&self) -> Result<EngineStatus> {
        self.request(Command::Status).await
    }

    pub async fn set_forced_active(&self, forced: bool) -> Result<()> {
        self.send(Command::SetForcedActive(forced)).await
    }

    pub async fn override_mode(&self, mode: ArbitrationMode) -> Result<()> {
        self.send(Command::OverrideMode(mode)).await
    }

    /// Start a query-all; retries run inside the actor.
    pub async fn query(&self) -> Result<()> {
        self.request(Command::Query).await?
    }

    pub async fn write(&self, points: Vec<(u8, TypeTag, DpValue)>) -> Result<()> {
        self.request(|reply| Command::Write(points, reply)).await?
    }

    /// Stop the actor and return what it persisted.
    pub async fn detach(self) -> Result<PersistedDeviceState> {
        let state = self.request(Command::Detach).await?;
        self.shutdown.cancel();
        Ok(state)
    }
}

/// Owns the actors of all attached devices.
pub struct EngineHub {
    collab: Collaborators,
    config: EngineConfig,
    shutdown: CancellationToken,
    devices: HashMap<String, (DeviceHandle, JoinHandle<()>)>,
}

impl EngineHub {
    pub fn new(collab: Collaborators, config: EngineConfig) -> Self {
        Self {
            collab,
            config,
            shutdown: CancellationToken::new(),
            devices: HashMap::new(),
        }
    }

    /// Attach a device. An existing actor for the same id is detached first.
    pub async fn attach(
        &mut self,
        identity: DeviceIdentity,
        profile: Option<Arc<DeviceProfile>>,
    ) -> Result<DeviceHandle> {
        if self.devices.contains_key(&identity.id) {
            self.detach(&identity.id).await?;
        }
        let id = identity.id.clone();
        let (handle, task) = DeviceActor::spawn(
            identity,
            profile,
            self.collab.clone(),
            self.config.clone(),
            self.shutdown.child_token(),
        );
        self.devices.insert(id, (handle.clone(), task));
        Ok(handle)
    }

    pub fn get(&self, device: &str) -> Option<&DeviceHandle> {
        self.devices.get(device).map(|(handle, _)| handle)
    }

    pub fn devices(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.devices.keys().map(String::as_str).collect();
        ids.sort_unstable();
        ids
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    /// Detach one device, returning its final state. `None` if not attached.
    pub async fn detach(&mut self, device: &str) -> Result<Option<PersistedDeviceState>> {
        let Some((handle, task)) = self.devices.remove(device) else {
            return Ok(None);
        };
        let state = handle.detach().await?;
        let _ = task.await;
        Ok(Some(state))
    }

    /// Cancel every actor and wait for them to finish.
    pub async fn shutdown(mut self) {
        self.shutdown.cancel();
        for (device, (_, task)) in self.devices.drain() {
            if let Err(err) = task.await {
                tracing::warn!(%device, error = %err, "device actor ended abnormally");
            }
        }
    }
}
