// Shared collaborators for the engine integration tests.
#![allow(clippy::unwrap_used, dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::watch;

use capmesh_api::{CommandRequest, CommandTransport, Error};
use capmesh_core::{
    CoreError, Device, DeviceInfo, DeviceStore, Engine, EngineConfig, EntityHost, EntityRuntime,
    EntitySnapshot, MemorySettingsSource, SettingsSource,
};

pub const LOCATION: &str = "home";

// ── Host ────────────────────────────────────────────────────────────

pub struct RecordingHost {
    pub registered: Mutex<Vec<Arc<EntityRuntime>>>,
    pub unregistered: Mutex<Vec<String>>,
    pub states: Mutex<HashMap<String, EntitySnapshot>>,
    pub device_infos: Mutex<HashMap<String, DeviceInfo>>,
    pub resets: Mutex<Vec<String>>,
    writes: watch::Sender<u64>,
}

impl Default for RecordingHost {
    fn default() -> Self {
        Self {
            registered: Mutex::default(),
            unregistered: Mutex::default(),
            states: Mutex::default(),
            device_infos: Mutex::default(),
            resets: Mutex::default(),
            writes: watch::channel(0).0,
        }
    }
}

impl RecordingHost {
    pub fn state(&self, unique_id: &str) -> Option<EntitySnapshot> {
        self.states.lock().unwrap().get(unique_id).cloned()
    }

    pub fn write_count(&self) -> u64 {
        *self.writes.borrow()
    }

    /// Wait until the host shows `expected` as the state of `unique_id`.
    pub async fn wait_for_state(&self, unique_id: &str, expected: &Value) {
        let mut rx = self.writes.subscribe();
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                if self.state(unique_id).is_some_and(|s| &s.state == expected) {
                    return;
                }
                rx.changed().await.unwrap();
            }
        })
        .await
        .unwrap_or_else(|_| panic!("{unique_id} never reached {expected}"));
    }
}

#[async_trait]
impl EntityHost for RecordingHost {
    async fn register(&self, entity: Arc<EntityRuntime>) -> Result<(), CoreError> {
        self.device_infos
            .lock()
            .unwrap()
            .insert(entity.entity_id().to_owned(), entity.device_info().clone());
        self.registered.lock().unwrap().push(entity);
        Ok(())
    }

    async fn unregister(&self, unique_id: &str) -> Result<(), CoreError> {
        self.registered.lock().unwrap().retain(|e| e.unique_id() != unique_id);
        self.states.lock().unwrap().remove(unique_id);
        self.unregistered.lock().unwrap().push(unique_id.to_owned());
        Ok(())
    }

    fn write_state(&self, unique_id: &str, snapshot: &EntitySnapshot) {
        self.states
            .lock()
            .unwrap()
            .insert(unique_id.to_owned(), snapshot.clone());
        self.writes.send_modify(|n| *n += 1);
    }

    fn device_info_for(&self, entity_id: &str) -> Option<DeviceInfo> {
        self.device_infos.lock().unwrap().get(entity_id).cloned()
    }

    async fn reset(&self, location: &str) -> Result<(), CoreError> {
        self.resets.lock().unwrap().push(location.to_owned());
        Ok(())
    }
}

// ── Transport ───────────────────────────────────────────────────────

#[derive(Default)]
pub struct RecordingTransport {
    pub sent: Mutex<Vec<(String, CommandRequest)>>,
    pub reject: AtomicBool,
}

impl RecordingTransport {
    pub fn sent(&self) -> Vec<(String, CommandRequest)> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl CommandTransport for RecordingTransport {
    async fn send_command(&self, device_id: &str, request: &CommandRequest) -> Result<(), Error> {
        if self.reject.load(Ordering::SeqCst) {
            return Err(Error::CommandRejected {
                device_id: device_id.to_owned(),
                message: "rejected by test transport".into(),
            });
        }
        self.sent
            .lock()
            .unwrap()
            .push((device_id.to_owned(), request.clone()));
        Ok(())
    }
}

// ── Harness ─────────────────────────────────────────────────────────

pub struct Harness {
    pub engine: Engine,
    pub source: Arc<MemorySettingsSource>,
    pub store: Arc<DeviceStore>,
    pub host: Arc<RecordingHost>,
    pub transport: Arc<RecordingTransport>,
}

impl Harness {
    pub fn new(settings: &str, devices: Vec<Device>) -> Self {
        Self::with_config(EngineConfig::new(LOCATION), settings, devices)
    }

    pub fn with_config(config: EngineConfig, settings: &str, devices: Vec<Device>) -> Self {
        let source = Arc::new(MemorySettingsSource::new());
        if !settings.is_empty() {
            source.insert(LOCATION, settings);
        }
        let store = Arc::new(DeviceStore::default());
        for device in devices {
            store.upsert_device(device);
        }
        let host = Arc::new(RecordingHost::default());
        let transport = Arc::new(RecordingTransport::default());
        let settings_source: Arc<dyn SettingsSource> = source.clone();
        let command_transport: Arc<dyn CommandTransport> = transport.clone();
        let entity_host: Arc<dyn EntityHost> = host.clone();
        let engine = Engine::new(
            config,
            settings_source,
            Arc::clone(&store),
            command_transport,
            entity_host,
        );
        Self {
            engine,
            source,
            store,
            host,
            transport,
        }
    }

    /// The live entity bound to `capability` on `device_id`.
    pub fn entity_of(&self, device_id: &str, capability: &str) -> Arc<EntityRuntime> {
        self.engine
            .entities()
            .into_iter()
            .find(|e| e.device_id().to_string() == device_id && e.descriptor().capability == capability)
            .unwrap_or_else(|| panic!("no entity for {device_id}/{capability}"))
    }
}
