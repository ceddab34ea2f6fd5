//! Settings: the per-location document declaring which entities exist.
//!
//! [`SettingsDocument`] is the serde mirror of the file,
//! [`SettingsSnapshot`] the parsed immutable view, and [`SettingsStore`] the
//! swap point the engine reads through.

pub mod document;
pub mod snapshot;
pub mod store;

pub use document::{DeviceSection, GlobalSection, SKELETON, SettingsDocument};
pub use snapshot::{DeviceSettings, SettingsSnapshot};
pub use store::{MemorySettingsSource, SettingsSource, SettingsStore};
