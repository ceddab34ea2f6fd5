//! Collaborator boundary for the capmesh engine.
//!
//! Everything here describes the outside world as the engine sees it:
//!
//! - **[`DevicePayload`]**: a device listing with its components and the
//!   capabilities each component exposes.
//! - **[`DeviceStatus`]**: the live `component → capability → attribute`
//!   status tree, replaced by full payloads and patched by push events.
//! - **[`EventHub`]**: push-event ingestion and broadcast fan-out.
//! - **[`CommandTransport`]**: the trait a vendor transport implements to
//!   carry commands to devices.

pub mod device;
pub mod error;
pub mod event;
pub mod status;
pub mod transport;

pub use device::{CapabilityRef, ComponentPayload, DevicePayload, MAIN_COMPONENT};
pub use error::Error;
pub use event::{DeviceEvent, EventHub};
pub use status::{DeviceStatus, Status};
pub use transport::{CommandRequest, CommandTransport};
