//! In-memory device and status store.
//!
//! [`DeviceStore`] is the engine's device-status collaborator: it keeps the
//! device list (with capability indexes), one status tree per device, and
//! the [`EventHub`] push events arrive through. Resolution reads go through
//! its [`StatusLookup`] impl.

mod collection;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::sync::watch;
use tracing::debug;

use capmesh_api::{DeviceEvent, DevicePayload, DeviceStatus, EventHub, Status};

use crate::model::{Device, DeviceId};
use crate::resolver::StatusLookup;

use collection::KeyedCollection;

pub struct DeviceStore {
    devices: KeyedCollection<DeviceId, Device>,
    statuses: DashMap<DeviceId, DeviceStatus>,
    events: EventHub,
    last_event: watch::Sender<Option<DateTime<Utc>>>,
}

impl Default for DeviceStore {
    fn default() -> Self {
        Self::new(EventHub::new())
    }
}

impl DeviceStore {
    pub fn new(events: EventHub) -> Self {
        let (last_event, _) = watch::channel(None);
        Self {
            devices: KeyedCollection::new(),
            statuses: DashMap::new(),
            events,
            last_event,
        }
    }

    // ── Devices ──────────────────────────────────────────────────────

    /// Insert or replace a device. Returns `true` if it was new.
    pub fn upsert_device(&self, device: Device) -> bool {
        self.devices.upsert(device.id.clone(), device)
    }

    /// Insert a device from its vendor payload, with an optional initial
    /// status payload.
    pub fn upsert_payload(&self, payload: &DevicePayload, status: Option<DeviceStatus>) -> DeviceId {
        let device = Device::from(payload);
        let id = device.id.clone();
        if let Some(status) = status {
            self.statuses.insert(id.clone(), status);
        }
        self.upsert_device(device);
        id
    }

    pub fn remove_device(&self, id: &DeviceId) -> Option<Arc<Device>> {
        self.statuses.remove(id);
        self.devices.remove(id)
    }

    pub fn device(&self, id: &DeviceId) -> Option<Arc<Device>> {
        self.devices.get(id)
    }

    pub fn contains_device(&self, id: &DeviceId) -> bool {
        self.devices.contains(id)
    }

    /// Every device, ordered by id.
    pub fn devices_snapshot(&self) -> Arc<Vec<Arc<Device>>> {
        self.devices.snapshot()
    }

    pub fn device_count(&self) -> usize {
        self.devices.len()
    }

    pub fn clear(&self) {
        self.devices.clear();
        self.statuses.clear();
    }

    // ── Status ───────────────────────────────────────────────────────

    /// Replace a device's whole status tree.
    pub fn set_status(&self, id: &DeviceId, status: DeviceStatus) {
        self.statuses.insert(id.clone(), status);
    }

    /// A copy of a device's status tree.
    pub fn status_of(&self, id: &DeviceId) -> Option<DeviceStatus> {
        self.statuses.get(id).map(|s| s.value().clone())
    }

    /// Patch status from a push event. Returns `false` when the device is
    /// not known, in which case nothing is stored.
    pub fn apply_event(&self, event: &DeviceEvent) -> bool {
        let id = DeviceId::from(event.device_id.as_str());
        if !self.devices.contains(&id) {
            debug!(device_id = %id, "event for unknown device");
            return false;
        }
        self.statuses.entry(id).or_default().apply_attribute_update(
            &event.component_id,
            &event.capability,
            &event.attribute,
            event.value.clone(),
            event.unit.clone(),
            event.data.clone(),
        );
        self.last_event.send_replace(Some(Utc::now()));
        true
    }

    // ── Events ───────────────────────────────────────────────────────

    /// The push-event hub. Transports publish here.
    pub fn events(&self) -> &EventHub {
        &self.events
    }

    /// When the last push event was applied.
    pub fn last_event(&self) -> watch::Receiver<Option<DateTime<Utc>>> {
        self.last_event.subscribe()
    }
}

impl StatusLookup for DeviceStore {
    fn status(&self, device: &DeviceId, component: &str, capability: &str, attribute: &str) -> Option<Status> {
        self.statuses
            .get(device)?
            .get(component, capability, attribute)
            .cloned()
    }
}
