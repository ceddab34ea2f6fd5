// ── Engine abstraction ──
//
// Composition root for one settings location. Owns the settings snapshot,
// the assignment table and the live entities; bridges push events into the
// device store and the sync router, and routes commands to the transport.

use std::sync::Arc;

use arc_swap::ArcSwap;
use chrono::Utc;
use dashmap::DashMap;
use strum::Display;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{Mutex, broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use capmesh_api::{CommandTransport, DeviceEvent};

use crate::allocator::{Allocator, AssignmentTable};
use crate::command::{self, Command, CommandEnvelope, CommandResult, EntityCommand};
use crate::config::EngineConfig;
use crate::descriptor::Descriptor;
use crate::entity::{EntityRuntime, EntitySnapshot, SnapshotOptions};
use crate::error::{CoreError, ResolutionMiss};
use crate::host::EntityHost;
use crate::model::{Device, Platform};
use crate::resolver::{Resolver, identifier_vars};
use crate::settings::{SettingsSnapshot, SettingsSource, SettingsStore};
use crate::store::DeviceStore;
use crate::sync::{SyncRouter, SyncState};
use crate::template;

// ── EngineState ──────────────────────────────────────────────────────

/// Lifecycle state observable by consumers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum EngineState {
    Stopped,
    Starting,
    Running,
}

// ── Engine ───────────────────────────────────────────────────────────

/// The main entry point for consumers.
///
/// Cheaply cloneable via `Arc<EngineInner>`. [`start()`](Self::start)
/// loads settings, allocates capabilities, registers entities with the
/// host and spawns the event bridge, refresh and command tasks.
#[derive(Clone)]
pub struct Engine {
    inner: Arc<EngineInner>,
}

struct EngineInner {
    config: EngineConfig,
    settings: SettingsStore,
    store: Arc<DeviceStore>,
    assignments: ArcSwap<AssignmentTable>,
    entities: DashMap<String, Arc<EntityRuntime>>,
    router: SyncRouter,
    transport: Arc<dyn CommandTransport>,
    host: Arc<dyn EntityHost>,
    state: watch::Sender<EngineState>,
    command_tx: Mutex<mpsc::Sender<CommandEnvelope>>,
    command_rx: Mutex<Option<mpsc::Receiver<CommandEnvelope>>>,
    cancel: CancellationToken,
    /// Child token for the current run; cancelled on stop, replaced on start.
    cancel_child: Mutex<CancellationToken>,
    task_handles: Mutex<Vec<JoinHandle<()>>>,
    /// Setup, teardown and reload never interleave.
    lifecycle: Mutex<()>,
    /// Non-fatal problems hit during start or reload.
    warnings: Mutex<Vec<String>>,
}

impl Engine {
    /// Create an engine. Does NOT start it.
    pub fn new(
        config: EngineConfig,
        source: Arc<dyn SettingsSource>,
        store: Arc<DeviceStore>,
        transport: Arc<dyn CommandTransport>,
        host: Arc<dyn EntityHost>,
    ) -> Self {
        let (state, _) = watch::channel(EngineState::Stopped);
        let (command_tx, command_rx) = mpsc::channel(config.command_queue_size.max(1));
        let cancel = CancellationToken::new();
        let cancel_child = cancel.child_token();
        let settings = SettingsStore::new(source, config.location.clone());

        Self {
            inner: Arc::new(EngineInner {
                config,
                settings,
                store,
                assignments: ArcSwap::from_pointee(AssignmentTable::default()),
                entities: DashMap::new(),
                router: SyncRouter::new(),
                transport,
                host,
                state,
                command_tx: Mutex::new(command_tx),
                command_rx: Mutex::new(Some(command_rx)),
                cancel,
                cancel_child: Mutex::new(cancel_child),
                task_handles: Mutex::new(Vec::new()),
                lifecycle: Mutex::new(()),
                warnings: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    pub fn store(&self) -> &Arc<DeviceStore> {
        &self.inner.store
    }

    // ── Lifecycle ────────────────────────────────────────────────────

    /// Load settings, set up every enabled platform and spawn the
    /// background tasks.
    ///
    /// A malformed settings document does not fail the start: the engine
    /// runs with the unset snapshot and the problem is reported through
    /// [`take_warnings()`](Self::take_warnings).
    pub async fn start(&self) -> Result<(), CoreError> {
        let _guard = self.inner.lifecycle.lock().await;
        if *self.inner.state.borrow() != EngineState::Stopped {
            return Err(CoreError::Internal("engine is already started".into()));
        }
        self.inner.state.send_replace(EngineState::Starting);

        let child = self.inner.cancel.child_token();
        *self.inner.cancel_child.lock().await = child.clone();

        // Subscribe before setup so no event published meanwhile is lost.
        let events = self.inner.store.events().subscribe();
        let refresh_rx = self.inner.router.attach_queue();

        if let Err(e) = self.load_settings().await {
            debug!(error = %e, "starting with unset settings");
        }

        if self.inner.config.resetting_entities {
            if let Err(e) = self.inner.host.reset(&self.inner.config.location).await {
                warn!(location = %self.inner.config.location, error = %e, "entity reset failed (non-fatal)");
                self.inner.warnings.lock().await.push(format!("entity reset failed: {e}"));
            }
        }

        self.setup_platforms().await;

        let mut handles = self.inner.task_handles.lock().await;
        handles.push(tokio::spawn(event_bridge_task(self.clone(), events, child.clone())));
        handles.push(tokio::spawn(refresh_task(self.clone(), refresh_rx, child)));
        if let Some(rx) = self.inner.command_rx.lock().await.take() {
            handles.push(tokio::spawn(command_processor_task(self.clone(), rx)));
        }
        drop(handles);

        self.inner.state.send_replace(EngineState::Running);
        info!(
            location = %self.inner.config.location,
            entities = self.inner.entities.len(),
            "engine started"
        );
        Ok(())
    }

    /// Cancel background tasks, unregister every entity and return to
    /// [`Stopped`](EngineState::Stopped). The engine can be started again.
    pub async fn stop(&self) {
        let _guard = self.inner.lifecycle.lock().await;

        // Cancel the child token (not the parent, so start works again).
        self.inner.cancel_child.lock().await.cancel();

        let mut handles = self.inner.task_handles.lock().await;
        for handle in handles.drain(..) {
            let _ = handle.await;
        }
        drop(handles);

        self.teardown().await;
        self.inner.router.detach_queue();

        // Recreate the command channel; the previous receiver was consumed
        // by the command processor task.
        {
            let (tx, rx) = mpsc::channel(self.inner.config.command_queue_size.max(1));
            *self.inner.command_tx.lock().await = tx;
            *self.inner.command_rx.lock().await = Some(rx);
        }

        self.inner.state.send_replace(EngineState::Stopped);
        info!(location = %self.inner.config.location, "engine stopped");
    }

    /// Reload the settings document and rebuild every entity from it.
    ///
    /// The new snapshot and assignment table are swapped in atomically.
    /// Entities captured their descriptor at setup, so a refresh already
    /// under way finishes against the old one. A malformed document leaves
    /// the engine running with no entities and is returned as an error.
    pub async fn reload(&self) -> Result<(), CoreError> {
        let _guard = self.inner.lifecycle.lock().await;
        if *self.inner.state.borrow() != EngineState::Running {
            return Err(CoreError::EngineStopped);
        }

        let result = self.load_settings().await;
        self.teardown().await;
        self.setup_platforms().await;
        info!(
            location = %self.inner.config.location,
            entities = self.inner.entities.len(),
            "settings reloaded"
        );
        result
    }

    async fn load_settings(&self) -> Result<(), CoreError> {
        let location = &self.inner.config.location;
        match self.inner.settings.load(location) {
            Ok(_) => Ok(()),
            Err(e) => {
                error!(location = %location, error = %e, "settings unavailable, continuing with empty settings");
                self.inner.settings.replace(SettingsSnapshot::unset(location.clone()));
                self.inner.warnings.lock().await.push(e.to_string());
                Err(e)
            }
        }
    }

    // ── Platform setup ───────────────────────────────────────────────

    async fn setup_platforms(&self) {
        let settings = self.inner.settings.snapshot();
        let devices = self.inner.store.devices_snapshot();

        let allocator = Allocator::from_settings(&settings, &self.inner.config.platform_priority);
        let table = Arc::new(allocator.assign_all(devices.iter()));
        self.inner.assignments.store(Arc::clone(&table));
        debug!(devices = devices.len(), assigned = table.len(), "capabilities allocated");

        let mut registered = 0_usize;
        for &platform in allocator.priority() {
            for (device, descriptor) in settings.capability_settings_for(platform, &devices) {
                if !table.is_assigned(&device.id, &descriptor.key(), platform) {
                    debug!(
                        device_id = %device.id,
                        key = %descriptor.key(),
                        platform = %platform,
                        "capability not assigned to this platform, skipping"
                    );
                    continue;
                }
                if self.register_entity(platform, &device, descriptor, &settings).await {
                    registered += 1;
                }
            }
        }

        info!(location = %settings.location(), entities = registered, "platforms set up");
    }

    async fn register_entity(
        &self,
        platform: Platform,
        device: &Arc<Device>,
        descriptor: Arc<Descriptor>,
        settings: &SettingsSnapshot,
    ) -> bool {
        let parent = descriptor
            .parent_entity_id
            .as_deref()
            .map(|p| template::render(p, &identifier_vars(device, &descriptor)));

        let mut entity = EntityRuntime::new(platform, device, descriptor, settings.default_entity_id_format());
        if let Some(parent) = parent {
            match self.inner.host.device_info_for(&parent) {
                Some(info) => entity = entity.with_device_info(info),
                None => warn!(
                    unique_id = entity.unique_id(),
                    parent = %parent,
                    "parent entity is not registered, keeping own device info"
                ),
            }
        }

        let unique_id = entity.unique_id().to_owned();
        if self.inner.entities.contains_key(&unique_id) {
            warn!(unique_id = %unique_id, platform = %platform, "duplicate entity, skipping");
            return false;
        }

        let entity = Arc::new(entity);
        if let Err(e) = self.inner.host.register(Arc::clone(&entity)).await {
            warn!(unique_id = %unique_id, error = %e, "host rejected entity");
            return false;
        }
        self.inner.entities.insert(unique_id.clone(), Arc::clone(&entity));
        self.inner.router.track(&entity);

        let initial = match self.snapshot_of(&entity) {
            Ok(snapshot) => {
                entity.mark_synced(Utc::now());
                snapshot
            }
            Err(miss) => {
                debug!(unique_id = %unique_id, reason = %miss, "entity starts unavailable");
                EntitySnapshot::unavailable()
            }
        };
        self.inner.host.write_state(&unique_id, &initial);
        debug!(unique_id = %unique_id, entity_id = entity.entity_id(), platform = %platform, "entity registered");
        true
    }

    async fn teardown(&self) {
        let ids: Vec<String> = self.inner.entities.iter().map(|e| e.key().clone()).collect();
        for unique_id in ids {
            self.inner.router.untrack(&unique_id);
            self.inner.entities.remove(&unique_id);
            if let Err(e) = self.inner.host.unregister(&unique_id).await {
                warn!(unique_id = %unique_id, error = %e, "unregister failed (non-fatal)");
            }
        }
        self.inner.router.clear();
    }

    // ── Synchronization ──────────────────────────────────────────────

    fn snapshot_options(&self) -> SnapshotOptions {
        SnapshotOptions {
            syntax_property: self.inner.config.enable_syntax_property,
        }
    }

    fn snapshot_of(&self, entity: &EntityRuntime) -> Result<EntitySnapshot, ResolutionMiss> {
        let device = self
            .inner
            .store
            .device(entity.device_id())
            .ok_or(ResolutionMiss::UnknownDevice)?;
        entity.compute_snapshot(&device, &*self.inner.store, self.snapshot_options())
    }

    fn handle_event(&self, event: &DeviceEvent) {
        if self.inner.store.apply_event(event) {
            self.inner.router.route(event);
        }
    }

    fn mark_all_stale(&self) {
        let ids: Vec<String> = self.inner.entities.iter().map(|e| e.key().clone()).collect();
        for unique_id in ids {
            self.inner.router.mark_stale(&unique_id);
        }
    }

    /// Recompute one stale entity and push it to the host. A miss keeps
    /// the last displayed state.
    fn refresh_entity(&self, unique_id: &str) {
        let router = &self.inner.router;
        if !router.begin_refresh(unique_id) {
            return;
        }
        let entity = self.inner.entities.get(unique_id).map(|e| Arc::clone(e.value()));
        if let Some(entity) = entity {
            match self.snapshot_of(&entity) {
                Ok(snapshot) => {
                    self.inner.host.write_state(unique_id, &snapshot);
                    entity.mark_synced(Utc::now());
                }
                Err(miss) => warn!(unique_id, reason = %miss, "refresh failed, keeping last state"),
            }
        }
        router.finish_refresh(unique_id);
    }

    // ── Command execution ────────────────────────────────────────────

    /// Execute a command.
    ///
    /// Sends the command through the internal channel to the command
    /// processor task and awaits the result.
    pub async fn execute(&self, cmd: Command) -> Result<CommandResult, CoreError> {
        if *self.inner.state.borrow() != EngineState::Running {
            return Err(CoreError::EngineStopped);
        }

        let (tx, rx) = oneshot::channel();
        let command_tx = self.inner.command_tx.lock().await.clone();

        command_tx
            .send(CommandEnvelope {
                command: cmd,
                response_tx: tx,
            })
            .await
            .map_err(|_| CoreError::EngineStopped)?;

        rx.await.map_err(|_| CoreError::EngineStopped)?
    }

    /// Shorthand for [`execute`](Self::execute) with an entity command.
    pub async fn send_command(&self, cmd: EntityCommand) -> Result<CommandResult, CoreError> {
        self.execute(cmd.into()).await
    }

    /// Write the entity's current state right after a command was accepted.
    fn write_optimistic(&self, entity: &EntityRuntime) {
        match self.snapshot_of(entity) {
            Ok(snapshot) => self.inner.host.write_state(entity.unique_id(), &snapshot),
            Err(miss) => debug!(unique_id = entity.unique_id(), reason = %miss, "no optimistic state"),
        }
    }

    // ── State observation ────────────────────────────────────────────

    pub fn state(&self) -> watch::Receiver<EngineState> {
        self.inner.state.subscribe()
    }

    pub fn settings(&self) -> Arc<SettingsSnapshot> {
        self.inner.settings.snapshot()
    }

    pub fn assignments(&self) -> Arc<AssignmentTable> {
        self.inner.assignments.load_full()
    }

    pub fn entity(&self, unique_id: &str) -> Option<Arc<EntityRuntime>> {
        self.inner.entities.get(unique_id).map(|e| Arc::clone(e.value()))
    }

    /// Every live entity, ordered by unique id.
    pub fn entities(&self) -> Vec<Arc<EntityRuntime>> {
        let mut all: Vec<_> = self.inner.entities.iter().map(|e| Arc::clone(e.value())).collect();
        all.sort_by(|a, b| a.unique_id().cmp(b.unique_id()));
        all
    }

    pub fn sync_state(&self, unique_id: &str) -> Option<SyncState> {
        self.inner.router.state(unique_id)
    }

    /// Run `f` with a resolver bound to a live entity and its device.
    pub fn with_resolver<R>(&self, unique_id: &str, f: impl FnOnce(&Resolver<'_>) -> R) -> Result<R, CoreError> {
        let entity = self.entity(unique_id).ok_or_else(|| CoreError::EntityNotFound {
            unique_id: unique_id.to_owned(),
        })?;
        let device = self
            .inner
            .store
            .device(entity.device_id())
            .ok_or_else(|| CoreError::DeviceNotFound {
                device_id: entity.device_id().to_string(),
            })?;
        let resolver = entity.resolver(&device, &*self.inner.store);
        Ok(f(&resolver))
    }

    /// Drain warnings accumulated during start or reload.
    pub async fn take_warnings(&self) -> Vec<String> {
        std::mem::take(&mut *self.inner.warnings.lock().await)
    }
}

// ── Background tasks ─────────────────────────────────────────────────

/// Push events -> device store -> sync router.
async fn event_bridge_task(
    engine: Engine,
    mut rx: broadcast::Receiver<Arc<DeviceEvent>>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            result = rx.recv() => {
                match result {
                    Ok(event) => engine.handle_event(&event),
                    Err(RecvError::Lagged(n)) => {
                        warn!(skipped = n, "event bridge lagged, refreshing every entity");
                        engine.mark_all_stale();
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        }
    }
}

async fn refresh_task(engine: Engine, mut rx: mpsc::UnboundedReceiver<String>, cancel: CancellationToken) {
    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            unique_id = rx.recv() => {
                let Some(unique_id) = unique_id else { break };
                engine.refresh_entity(&unique_id);
            }
        }
    }
}

/// Process commands from the mpsc channel one at a time.
async fn command_processor_task(engine: Engine, mut rx: mpsc::Receiver<CommandEnvelope>) {
    let cancel = engine.inner.cancel_child.lock().await.clone();

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            envelope = rx.recv() => {
                let Some(envelope) = envelope else { break };
                let result = route_command(&engine, envelope.command).await;
                let _ = envelope.response_tx.send(result);
            }
        }
    }
}

// ── Command routing ──────────────────────────────────────────────────

async fn route_command(engine: &Engine, cmd: Command) -> Result<CommandResult, CoreError> {
    match cmd {
        Command::Entity(cmd) => {
            let entity = engine.entity(&cmd.unique_id).ok_or_else(|| CoreError::EntityNotFound {
                unique_id: cmd.unique_id.clone(),
            })?;
            let request = command::prepare(&entity, &cmd)?;
            let device_id = entity.device_id().clone();
            debug!(
                unique_id = %cmd.unique_id,
                device_id = %device_id,
                capability = %request.capability,
                command = %request.command,
                "sending command"
            );
            engine
                .inner
                .transport
                .send_command(&device_id.to_string(), &request)
                .await?;
            engine.write_optimistic(&entity);
            Ok(CommandResult::Sent { device_id, request })
        }
        Command::Raw { device_id, request } => {
            if !engine.inner.store.contains_device(&device_id) {
                return Err(CoreError::DeviceNotFound {
                    device_id: device_id.to_string(),
                });
            }
            engine
                .inner
                .transport
                .send_command(&device_id.to_string(), &request)
                .await?;
            Ok(CommandResult::Sent { device_id, request })
        }
    }
}
