use thiserror::Error;

/// Top-level error type for the `capmesh-api` crate.
///
/// Covers the failure modes of the collaborator boundary: payload decoding
/// and command transport. `capmesh-core` maps these into user-facing errors.
#[derive(Debug, Error)]
pub enum Error {
    // ── Transport ───────────────────────────────────────────────────
    /// The device (or its cloud) refused the command.
    #[error("Command rejected for device {device_id}: {message}")]
    CommandRejected { device_id: String, message: String },

    /// The device could not be reached.
    #[error("Device unreachable: {device_id}")]
    Unreachable { device_id: String },

    /// Request timed out inside the transport.
    #[error("Request timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    /// Any other transport-level failure, already rendered to text.
    #[error("Transport error: {0}")]
    Transport(String),

    // ── Data ────────────────────────────────────────────────────────
    /// JSON deserialization failed, with the raw body for debugging.
    #[error("Deserialization error: {message}")]
    Deserialization { message: String, body: String },

    /// Payload parsed as JSON but does not have the expected shape.
    #[error("Malformed payload: {0}")]
    MalformedPayload(String),
}

impl Error {
    /// Returns `true` if this is a transient error worth retrying.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Timeout { .. } | Self::Unreachable { .. })
    }

    pub(crate) fn deserialization(err: &serde_json::Error, body: &str) -> Self {
        Self::Deserialization {
            message: err.to_string(),
            body: body.to_owned(),
        }
    }
}
