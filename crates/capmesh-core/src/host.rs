// ── Host entity framework boundary ──

use std::sync::Arc;

use async_trait::async_trait;

use crate::entity::{DeviceInfo, EntityRuntime, EntitySnapshot};
use crate::error::CoreError;

/// The framework that displays entities.
#[async_trait]
pub trait EntityHost: Send + Sync {
    async fn register(&self, entity: Arc<EntityRuntime>) -> Result<(), CoreError>;

    async fn unregister(&self, unique_id: &str) -> Result<(), CoreError>;

    /// Push a new display state. Also used for optimistic writes after a
    /// command succeeds.
    fn write_state(&self, unique_id: &str, snapshot: &EntitySnapshot);

    /// Registry entry of an already registered entity, by address. Backs
    /// `parent_entity_id`.
    fn device_info_for(&self, _entity_id: &str) -> Option<DeviceInfo> {
        None
    }

    /// Drop every entity previously registered for `location`.
    async fn reset(&self, _location: &str) -> Result<(), CoreError> {
        Ok(())
    }
}
