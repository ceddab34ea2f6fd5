//! Capability-to-entity resolution and synchronization engine.
//!
//! This crate turns devices that expose vendor *capabilities* into typed,
//! addressable host entities, driven by a declarative settings document,
//! and keeps those entities in step with the device push-event stream:
//!
//! - **[`Engine`]**: composition root for one settings location.
//!   [`start()`](Engine::start) loads settings, allocates capabilities,
//!   registers entities with the [`EntityHost`], then spawns the event
//!   bridge, refresh and command tasks. [`reload()`](Engine::reload) swaps
//!   in a new settings snapshot and rebuilds every entity.
//!
//! - **[`SettingsStore`]**: loads the YAML document through a
//!   [`SettingsSource`] (writing a skeleton when none exists) and keeps an
//!   immutable [`SettingsSnapshot`] behind an atomic swap.
//!
//! - **[`Allocator`]**: greedy draw-down of each device's
//!   `(component, capability)` pairs across platforms in priority order, so
//!   no pair is ever claimed twice.
//!
//! - **[`Descriptor`] / [`Resolver`]**: per-entity bindings with literal,
//!   indirect, templated and mapped field values, resolved against live
//!   status into a `Result<_, ResolutionMiss>` the caller defaults.
//!
//! - **[`SyncRouter`]**: routes each push event only to the entities that
//!   watch its `(component, capability)` and coalesces their refreshes.
//!
//! - **[`Command`]**: typed writes routed through an `mpsc` channel to the
//!   engine's command processor and on to the [`CommandTransport`].
//!
//! [`CommandTransport`]: capmesh_api::CommandTransport

pub mod allocator;
pub mod command;
pub mod config;
pub mod descriptor;
pub mod engine;
pub mod entity;
pub mod error;
pub mod host;
pub mod model;
pub mod resolver;
pub mod settings;
pub mod store;
pub mod sync;
pub mod template;

// ── Primary re-exports ──────────────────────────────────────────────
pub use allocator::{
    Allocator, AssignmentTable, CapabilityClaim, ClaimError, DeviceAssignment, SettingsClaim,
};
pub use command::{Command, CommandResult, EntityCommand};
pub use config::EngineConfig;
pub use descriptor::{ArgumentSpec, CommandSpec, Descriptor, DescriptorError, FieldValue};
pub use engine::{Engine, EngineState};
pub use entity::{DeviceInfo, EntityRuntime, EntitySnapshot, SnapshotOptions};
pub use error::{ArgumentTypeError, CoreError, ResolutionMiss};
pub use host::EntityHost;
pub use model::{CapabilityIndex, CapabilityKey, Device, DeviceId, PLATFORMS, Platform};
pub use resolver::{ArgumentType, MappingTable, Resolver, StatusLookup};
pub use settings::{
    MemorySettingsSource, SKELETON, SettingsDocument, SettingsSnapshot, SettingsSource,
    SettingsStore,
};
pub use store::DeviceStore;
pub use sync::{SyncRouter, SyncState};
pub use template::{DEFAULT_ENTITY_ID_FORMAT, UNIQUE_ID_FORMAT, TemplateVars};
