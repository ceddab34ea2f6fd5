// ── Runtime engine configuration ──
//
// These types describe *how* the engine runs for one location. They never
// touch disk: the config crate builds an `EngineConfig` from layered options
// and hands it in.

use crate::model::{PLATFORMS, Platform};

const DEFAULT_COMMAND_QUEUE_SIZE: usize = 64;

/// Configuration for one engine instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Settings location key (one settings document per location).
    pub location: String,
    /// Draw-down order. Platforms missing here never claim anything.
    pub platform_priority: Vec<Platform>,
    /// Expose each descriptor as written under a `syntax` attribute.
    pub enable_syntax_property: bool,
    /// Unregister everything previously registered for the location before
    /// the first setup.
    pub resetting_entities: bool,
    /// Bound of the command channel.
    pub command_queue_size: usize,
}

impl EngineConfig {
    pub fn new(location: impl Into<String>) -> Self {
        Self {
            location: location.into(),
            ..Self::default()
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            location: "default".into(),
            platform_priority: PLATFORMS.to_vec(),
            enable_syntax_property: false,
            resetting_entities: false,
            command_queue_size: DEFAULT_COMMAND_QUEUE_SIZE,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_use_full_priority() {
        let config = EngineConfig::new("home");
        assert_eq!(config.location, "home");
        assert_eq!(config.platform_priority.first(), Some(&Platform::Climate));
        assert_eq!(config.platform_priority.len(), PLATFORMS.len());
        assert_eq!(config.command_queue_size, 64);
    }
}
