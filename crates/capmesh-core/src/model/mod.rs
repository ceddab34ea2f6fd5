//! Domain model.

pub mod device;
pub mod device_id;
pub mod platform;

pub use device::{CapabilityIndex, CapabilityKey, Device};
pub use device_id::DeviceId;
pub use platform::{PLATFORMS, Platform};
