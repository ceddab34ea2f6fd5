// Command transport boundary.
//
// The engine never talks to a vendor cloud directly. Whatever carries
// commands to devices implements `CommandTransport`; timeouts and retries
// belong to the implementation.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Error;

/// A single command addressed to one capability of one component.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandRequest {
    pub component: String,
    pub capability: String,
    pub command: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub arguments: Vec<Value>,
}

impl CommandRequest {
    pub fn new(
        component: impl Into<String>,
        capability: impl Into<String>,
        command: impl Into<String>,
        arguments: Vec<Value>,
    ) -> Self {
        Self {
            component: component.into(),
            capability: capability.into(),
            command: command.into(),
            arguments,
        }
    }

    /// Wire body for a command batch: `{ "commands": [ ... ] }`.
    pub fn batch_body(requests: &[Self]) -> Value {
        serde_json::json!({ "commands": requests })
    }
}

/// Carries commands to devices.
#[async_trait]
pub trait CommandTransport: Send + Sync {
    /// Send one command. `Ok(())` means the device (or its cloud) accepted it;
    /// confirmation of the resulting state arrives later as a push event.
    async fn send_command(&self, device_id: &str, request: &CommandRequest) -> Result<(), Error>;
}
