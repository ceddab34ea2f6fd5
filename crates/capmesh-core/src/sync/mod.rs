//! Push-event routing.
//!
//! The [`SyncRouter`] decides which entities a push event affects. Each
//! tracked entity moves through `Idle -> Stale -> Refreshing -> Idle`:
//!
//! - An event whose `(component, capability)` an entity watches marks it
//!   `Stale` and schedules one refresh. Further events before the refresh
//!   starts coalesce into it.
//! - An event arriving while an entity is `Refreshing` marks it `Stale`
//!   again and schedules another refresh, so the newer value is never lost.
//! - Entities that do not watch the pair are left alone.

use std::collections::BTreeSet;
use std::sync::Arc;

use arc_swap::ArcSwapOption;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use strum::{Display, EnumString};
use tokio::sync::mpsc;
use tracing::{debug, trace};

use capmesh_api::DeviceEvent;

use crate::entity::EntityRuntime;
use crate::model::{CapabilityKey, DeviceId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "snake_case")]
pub enum SyncState {
    Idle,
    Stale,
    Refreshing,
}

#[derive(Debug)]
struct Tracked {
    device_id: DeviceId,
    watched: BTreeSet<CapabilityKey>,
    state: SyncState,
    last_event: Option<DateTime<Utc>>,
}

#[derive(Default)]
pub struct SyncRouter {
    entities: DashMap<String, Tracked>,
    /// device -> unique ids, in tracking order.
    by_device: DashMap<DeviceId, Vec<String>>,
    refresh_tx: ArcSwapOption<mpsc::UnboundedSender<String>>,
}

impl SyncRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a fresh refresh queue. Scheduled unique ids arrive on the
    /// returned receiver; any previous queue is dropped.
    pub fn attach_queue(&self) -> mpsc::UnboundedReceiver<String> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.refresh_tx.store(Some(Arc::new(tx)));
        rx
    }

    pub fn detach_queue(&self) {
        self.refresh_tx.store(None);
    }

    // ── Tracking ─────────────────────────────────────────────────────

    pub fn track(&self, entity: &EntityRuntime) {
        let unique_id = entity.unique_id().to_owned();
        let previous = self.entities.insert(
            unique_id.clone(),
            Tracked {
                device_id: entity.device_id().clone(),
                watched: entity.watched().clone(),
                state: SyncState::Idle,
                last_event: None,
            },
        );
        if previous.is_none() {
            self.by_device
                .entry(entity.device_id().clone())
                .or_default()
                .push(unique_id);
        }
    }

    pub fn untrack(&self, unique_id: &str) {
        let Some((_, tracked)) = self.entities.remove(unique_id) else {
            return;
        };
        let now_empty = self.by_device.get_mut(&tracked.device_id).is_some_and(|mut ids| {
            ids.retain(|id| id != unique_id);
            ids.is_empty()
        });
        if now_empty {
            self.by_device.remove_if(&tracked.device_id, |_, ids| ids.is_empty());
        }
    }

    pub fn clear(&self) {
        self.entities.clear();
        self.by_device.clear();
    }

    pub fn tracked_count(&self) -> usize {
        self.entities.len()
    }

    pub fn state(&self, unique_id: &str) -> Option<SyncState> {
        self.entities.get(unique_id).map(|t| t.state)
    }

    pub fn last_event(&self, unique_id: &str) -> Option<DateTime<Utc>> {
        self.entities.get(unique_id).and_then(|t| t.last_event)
    }

    // ── Routing ──────────────────────────────────────────────────────

    /// Route one push event. Returns the unique ids it marked stale.
    pub fn route(&self, event: &DeviceEvent) -> Vec<String> {
        let device_id = DeviceId::from(event.device_id.as_str());
        let Some(candidates) = self.by_device.get(&device_id).map(|ids| ids.clone()) else {
            trace!(device_id = %device_id, "event for untracked device");
            return Vec::new();
        };

        let key = CapabilityKey::new(&event.component_id, &event.capability);
        let now = Utc::now();
        let mut matched = Vec::new();

        for unique_id in candidates {
            let schedule = {
                let Some(mut tracked) = self.entities.get_mut(&unique_id) else {
                    continue;
                };
                if !tracked.watched.contains(&key) {
                    continue;
                }
                let previous = tracked.state;
                tracked.state = SyncState::Stale;
                tracked.last_event = Some(now);
                previous != SyncState::Stale
            };

            if schedule {
                self.enqueue(&unique_id);
            }
            matched.push(unique_id);
        }

        if matched.is_empty() {
            debug!(device_id = %device_id, key = %key, attribute = %event.attribute, "event matched no entity");
        }
        matched
    }

    /// `Stale -> Refreshing`. Returns `false` when the entity is gone or
    /// no longer stale, in which case the refresh should be skipped.
    pub fn begin_refresh(&self, unique_id: &str) -> bool {
        match self.entities.get_mut(unique_id) {
            Some(mut t) if t.state == SyncState::Stale => {
                t.state = SyncState::Refreshing;
                true
            }
            _ => false,
        }
    }

    /// `Refreshing -> Idle`. An entity re-marked stale during the refresh
    /// stays stale; its next refresh is already queued.
    pub fn finish_refresh(&self, unique_id: &str) {
        if let Some(mut t) = self.entities.get_mut(unique_id) {
            if t.state == SyncState::Refreshing {
                t.state = SyncState::Idle;
            }
        }
    }

    /// Mark an entity stale outside of event routing (e.g. after a command).
    pub fn mark_stale(&self, unique_id: &str) {
        let schedule = match self.entities.get_mut(unique_id) {
            Some(mut t) => {
                let previous = t.state;
                t.state = SyncState::Stale;
                previous != SyncState::Stale
            }
            None => false,
        };
        if schedule {
            self.enqueue(unique_id);
        }
    }

    fn enqueue(&self, unique_id: &str) {
        if let Some(tx) = &*self.refresh_tx.load() {
            if tx.send(unique_id.to_owned()).is_err() {
                debug!(unique_id, "refresh queue closed");
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::descriptor::Descriptor;
    use crate::model::{Device, Platform};
    use crate::template::DEFAULT_ENTITY_ID_FORMAT;

    fn entity(device: &Device, raw: &serde_json::Value) -> EntityRuntime {
        let d = Arc::new(Descriptor::parse(raw).unwrap());
        EntityRuntime::new(Platform::Switch, device, d, DEFAULT_ENTITY_ID_FORMAT)
    }

    fn device() -> Device {
        Device::new("d1", "Thermostat")
            .with_capability("main", "switch")
            .with_capability("main", "thermostatMode")
    }

    #[test]
    fn stale_transitions_and_coalescing() {
        let router = SyncRouter::new();
        let mut rx = router.attach_queue();
        let e = entity(&device(), &json!({ "capability": "switch", "attribute": "switch" }));
        router.track(&e);
        let id = e.unique_id().to_owned();

        let event = DeviceEvent::new("d1", "main", "switch", "switch", json!("on"));
        assert_eq!(router.route(&event), vec![id.clone()]);
        assert_eq!(router.state(&id), Some(SyncState::Stale));
        assert!(router.last_event(&id).is_some());

        // Second event before the refresh runs coalesces.
        router.route(&event);
        assert_eq!(rx.try_recv().unwrap(), id);
        assert!(rx.try_recv().is_err());

        assert!(router.begin_refresh(&id));
        assert!(!router.begin_refresh(&id));
        router.finish_refresh(&id);
        assert_eq!(router.state(&id), Some(SyncState::Idle));
    }

    #[test]
    fn event_during_refresh_reschedules() {
        let router = SyncRouter::new();
        let mut rx = router.attach_queue();
        let e = entity(&device(), &json!({ "capability": "switch", "attribute": "switch" }));
        router.track(&e);
        let id = e.unique_id().to_owned();
        let event = DeviceEvent::new("d1", "main", "switch", "switch", json!("on"));

        router.route(&event);
        rx.try_recv().unwrap();
        assert!(router.begin_refresh(&id));

        router.route(&event);
        router.finish_refresh(&id);
        assert_eq!(router.state(&id), Some(SyncState::Stale));
        assert_eq!(rx.try_recv().unwrap(), id);
    }

    #[test]
    fn untracked_and_unrelated_events() {
        let router = SyncRouter::new();
        let e = entity(&device(), &json!({ "capability": "switch", "attribute": "switch" }));
        router.track(&e);

        assert!(router.route(&DeviceEvent::new("d2", "main", "switch", "switch", json!("on"))).is_empty());
        assert!(router.route(&DeviceEvent::new("d1", "sub", "switch", "switch", json!("on"))).is_empty());
        assert_eq!(router.state(e.unique_id()), Some(SyncState::Idle));
    }

    #[test]
    fn untrack_cleans_device_index() {
        let router = SyncRouter::new();
        let e = entity(&device(), &json!({ "capability": "switch", "attribute": "switch" }));
        router.track(&e);
        router.track(&e);
        assert_eq!(router.tracked_count(), 1);

        router.untrack(e.unique_id());
        assert_eq!(router.tracked_count(), 0);
        assert!(router.route(&DeviceEvent::new("d1", "main", "switch", "switch", json!("on"))).is_empty());
    }

    #[test]
    fn mark_stale_schedules_once() {
        let router = SyncRouter::new();
        let mut rx = router.attach_queue();
        let e = entity(&device(), &json!({ "capability": "switch", "attribute": "switch" }));
        router.track(&e);

        router.mark_stale(e.unique_id());
        router.mark_stale(e.unique_id());
        assert_eq!(rx.try_recv().unwrap(), e.unique_id());
        assert!(rx.try_recv().is_err());
        router.mark_stale("unknown");
    }
}
