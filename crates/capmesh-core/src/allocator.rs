// ── Capability allocation ──
//
// Single-pass draw-down: platforms are asked in priority order which of the
// *remaining* capabilities they claim. Claimed capabilities leave the pool
// and are never revisited. Whatever is left at the end stays unassigned.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, error, warn};

use crate::model::{CapabilityKey, Device, DeviceId, Platform};
use crate::settings::SettingsSnapshot;

/// A claim predicate failed. The platform claims nothing this pass.
#[derive(Debug, Clone, Error)]
#[error("{0}")]
pub struct ClaimError(pub String);

/// Per-platform capability-matching predicate.
pub trait CapabilityClaim: Send + Sync {
    /// Which of `remaining` this platform takes for `device`.
    fn claim(
        &self,
        device: &Arc<Device>,
        remaining: &BTreeSet<CapabilityKey>,
    ) -> Result<BTreeSet<CapabilityKey>, ClaimError>;
}

/// Claims whatever the settings snapshot declares for the platform.
pub struct SettingsClaim {
    snapshot: Arc<SettingsSnapshot>,
    platform: Platform,
}

impl SettingsClaim {
    pub fn new(snapshot: Arc<SettingsSnapshot>, platform: Platform) -> Self {
        Self { snapshot, platform }
    }
}

impl CapabilityClaim for SettingsClaim {
    fn claim(
        &self,
        device: &Arc<Device>,
        remaining: &BTreeSet<CapabilityKey>,
    ) -> Result<BTreeSet<CapabilityKey>, ClaimError> {
        Ok(self
            .snapshot
            .declared_keys(self.platform, device)
            .intersection(remaining)
            .cloned()
            .collect())
    }
}

// ── Assignments ──────────────────────────────────────────────────────

/// `(component, capability) -> platform` for one device.
pub type DeviceAssignment = BTreeMap<CapabilityKey, Platform>;

/// Assignments for every device, built in one pass and never patched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AssignmentTable {
    devices: BTreeMap<DeviceId, DeviceAssignment>,
}

impl AssignmentTable {
    pub fn device(&self, device_id: &DeviceId) -> Option<&DeviceAssignment> {
        self.devices.get(device_id)
    }

    pub fn platform_for(&self, device_id: &DeviceId, key: &CapabilityKey) -> Option<Platform> {
        self.devices.get(device_id)?.get(key).copied()
    }

    pub fn is_assigned(&self, device_id: &DeviceId, key: &CapabilityKey, platform: Platform) -> bool {
        self.platform_for(device_id, key) == Some(platform)
    }

    /// Pairs assigned to `platform` on one device.
    pub fn get_assigned(&self, device_id: &DeviceId, platform: Platform) -> Vec<CapabilityKey> {
        self.devices
            .get(device_id)
            .map(|a| {
                a.iter()
                    .filter(|(_, p)| **p == platform)
                    .map(|(k, _)| k.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Whether `platform` received anything on any device.
    pub fn any_assigned(&self, platform: Platform) -> bool {
        self.devices.values().any(|a| a.values().any(|p| *p == platform))
    }

    pub fn len(&self) -> usize {
        self.devices.values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// ── Allocator ────────────────────────────────────────────────────────

pub struct Allocator {
    priority: Vec<Platform>,
    claims: BTreeMap<Platform, Arc<dyn CapabilityClaim>>,
    ignored: BTreeSet<String>,
}

impl Allocator {
    pub fn new(priority: impl IntoIterator<Item = Platform>) -> Self {
        Self {
            priority: priority.into_iter().collect(),
            claims: BTreeMap::new(),
            ignored: BTreeSet::new(),
        }
    }

    /// The settings-driven allocator: every platform in `priority` claims
    /// what the snapshot declares for it.
    pub fn from_settings(snapshot: &Arc<SettingsSnapshot>, priority: &[Platform]) -> Self {
        let enabled = snapshot.enabled_platforms();
        let mut allocator = Self::new(priority.iter().copied().filter(|p| enabled.contains(p)))
            .ignore_capabilities(snapshot.ignore_capabilities().iter().cloned());
        for platform in enabled {
            allocator = allocator.with_claim(platform, SettingsClaim::new(Arc::clone(snapshot), platform));
        }
        allocator
    }

    #[must_use]
    pub fn with_claim(mut self, platform: Platform, claim: impl CapabilityClaim + 'static) -> Self {
        self.claims.insert(platform, Arc::new(claim));
        self
    }

    #[must_use]
    pub fn ignore_capabilities(mut self, capabilities: impl IntoIterator<Item = String>) -> Self {
        self.ignored.extend(capabilities);
        self
    }

    pub fn priority(&self) -> &[Platform] {
        &self.priority
    }

    /// Draw down `capabilities` for one device.
    pub fn assign(&self, device: &Arc<Device>, capabilities: &BTreeSet<CapabilityKey>) -> DeviceAssignment {
        let mut remaining: BTreeSet<CapabilityKey> = capabilities
            .iter()
            .filter(|k| !self.ignored.contains(&k.capability))
            .cloned()
            .collect();
        let mut assignment = DeviceAssignment::new();

        for platform in &self.priority {
            if remaining.is_empty() {
                break;
            }
            let Some(claim) = self.claims.get(platform) else {
                continue;
            };
            let claimed = match claim.claim(device, &remaining) {
                Ok(claimed) => claimed,
                Err(e) => {
                    warn!(device_id = %device.id, platform = %platform, error = %e, "claim predicate failed");
                    continue;
                }
            };

            for key in claimed {
                // A predicate may only take from what it was offered.
                if !remaining.remove(&key) {
                    if let Some(owner) = assignment.get(&key) {
                        error!(
                            device_id = %device.id,
                            key = %key,
                            owner = %owner,
                            claimant = %platform,
                            "allocation conflict: capability already assigned"
                        );
                    } else {
                        debug!(device_id = %device.id, key = %key, platform = %platform, "claim outside offered set ignored");
                    }
                    continue;
                }
                assignment.insert(key, *platform);
            }
        }

        assignment
    }

    /// Assign every device's full capability set.
    pub fn assign_all<'a>(&self, devices: impl IntoIterator<Item = &'a Arc<Device>>) -> AssignmentTable {
        let devices = devices
            .into_iter()
            .map(|device| (device.id.clone(), self.assign(device, &device.capabilities.keys())))
            .collect();
        AssignmentTable { devices }
    }
}
