//! Disk-facing configuration for capmesh.
//!
//! Engine options layered from defaults, a TOML file and `CAPMESH_`
//! environment variables, translated to `capmesh_core::EngineConfig`; the
//! YAML settings-file source; and tracing initialisation. The core crate
//! never reads files, everything that does lives here.

mod logging;
mod source;

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use capmesh_core::{EngineConfig, PLATFORMS, Platform};

pub use logging::init_tracing;
pub use source::FileSettingsSource;

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("failed to serialize options: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("options loading failed: {0}")]
    Figment(Box<figment::Error>),

    #[error("tracing setup failed: {0}")]
    Tracing(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

fn invalid(field: &str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Validation {
        field: field.into(),
        reason: reason.into(),
    }
}

// ── Options ─────────────────────────────────────────────────────────

/// Top-level engine options.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct EngineOptions {
    /// Where settings documents live. Defaults to the platform data dir.
    pub settings_dir: Option<PathBuf>,

    /// Settings location key; the document is `<settings_dir>/<location>.yaml`.
    pub location: String,

    /// Expose each descriptor as written under a `syntax` attribute.
    pub enable_syntax_property: bool,

    /// Unregister every entity of the location before the first setup.
    pub resetting_entities: bool,

    /// Bound of the engine command channel.
    pub command_queue_size: usize,

    /// Draw-down order, most specific first.
    pub platform_priority: Vec<Platform>,

    pub logging: LoggingOptions,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            settings_dir: None,
            location: "default".into(),
            enable_syntax_property: false,
            resetting_entities: false,
            command_queue_size: 64,
            platform_priority: PLATFORMS.to_vec(),
            logging: LoggingOptions::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingOptions {
    /// `EnvFilter` directive used when `RUST_LOG` is unset.
    pub level: String,

    /// Also write logs to this file (non-blocking).
    pub file: Option<PathBuf>,
}

impl Default for LoggingOptions {
    fn default() -> Self {
        Self {
            level: "info".into(),
            file: None,
        }
    }
}

impl EngineOptions {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.location.trim().is_empty() {
            return Err(invalid("location", "must not be empty"));
        }
        if self.location.contains(['/', '\\']) || self.location.starts_with('.') {
            return Err(invalid("location", "must be a plain name"));
        }
        if self.command_queue_size == 0 {
            return Err(invalid("command_queue_size", "must be at least 1"));
        }
        let mut seen = BTreeSet::new();
        if let Some(dup) = self.platform_priority.iter().find(|p| !seen.insert(**p)) {
            return Err(invalid("platform_priority", format!("'{dup}' is listed twice")));
        }
        Ok(())
    }

    /// Resolved settings directory.
    pub fn settings_dir(&self) -> PathBuf {
        self.settings_dir.clone().unwrap_or_else(default_settings_dir)
    }

    /// The settings-file source for these options.
    pub fn settings_source(&self) -> FileSettingsSource {
        FileSettingsSource::new(self.settings_dir())
    }

    pub fn to_engine_config(&self) -> EngineConfig {
        EngineConfig {
            location: self.location.clone(),
            platform_priority: self.platform_priority.clone(),
            enable_syntax_property: self.enable_syntax_property,
            resetting_entities: self.resetting_entities,
            command_queue_size: self.command_queue_size,
        }
    }
}

// ── Paths ───────────────────────────────────────────────────────────

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("org", "capmesh", "capmesh")
}

/// Resolve the options file path via XDG / platform conventions.
pub fn config_path() -> PathBuf {
    project_dirs().map_or_else(
        || dirs_fallback().join("config.toml"),
        |dirs| dirs.config_dir().join("config.toml"),
    )
}

fn default_settings_dir() -> PathBuf {
    project_dirs().map_or_else(
        || dirs_fallback().join("settings"),
        |dirs| dirs.data_dir().join("settings"),
    )
}

fn dirs_fallback() -> PathBuf {
    let mut p = PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()));
    p.push(".config");
    p.push("capmesh");
    p
}

// ── Loading / saving ────────────────────────────────────────────────

/// Load options from the canonical path and the environment.
pub fn load_options() -> Result<EngineOptions, ConfigError> {
    load_options_from(&config_path())
}

/// Load options: defaults, then `path` (if present), then `CAPMESH_*`
/// variables (`__` separates nested keys, e.g. `CAPMESH_LOGGING__LEVEL`).
pub fn load_options_from(path: &Path) -> Result<EngineOptions, ConfigError> {
    let options: EngineOptions = Figment::new()
        .merge(Serialized::defaults(EngineOptions::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed("CAPMESH_").split("__"))
        .extract()?;
    options.validate()?;
    Ok(options)
}

/// Serialize options to TOML at `path`, creating parent directories.
pub fn save_options(options: &EngineOptions, path: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let text = toml::to_string_pretty(options)?;
    std::fs::write(path, text)?;
    Ok(())
}
