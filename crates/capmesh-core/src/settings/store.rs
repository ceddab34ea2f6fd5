// ── Settings store ──
//
// Holds the current snapshot for one location behind an `ArcSwap`.
// Readers grab an `Arc` and keep a consistent view for as long as they
// hold it, no matter how many reloads happen meanwhile.

use std::sync::Arc;

use arc_swap::ArcSwap;
use dashmap::DashMap;
use tracing::{error, info};

use crate::error::CoreError;

use super::document::{SKELETON, SettingsDocument};
use super::snapshot::SettingsSnapshot;

/// Where settings documents live. One document per location key.
pub trait SettingsSource: Send + Sync {
    /// The document text, or `None` if the location has none yet.
    fn read(&self, location: &str) -> Result<Option<String>, CoreError>;

    /// Create the document for `location` with the given contents.
    fn create(&self, location: &str, contents: &str) -> Result<(), CoreError>;
}

/// In-memory source for embedding and tests.
#[derive(Debug, Default)]
pub struct MemorySettingsSource {
    documents: DashMap<String, String>,
}

impl MemorySettingsSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, location: impl Into<String>, text: impl Into<String>) {
        self.documents.insert(location.into(), text.into());
    }

    pub fn get(&self, location: &str) -> Option<String> {
        self.documents.get(location).map(|d| d.value().clone())
    }
}

impl SettingsSource for MemorySettingsSource {
    fn read(&self, location: &str) -> Result<Option<String>, CoreError> {
        Ok(self.get(location))
    }

    fn create(&self, location: &str, contents: &str) -> Result<(), CoreError> {
        self.insert(location, contents);
        Ok(())
    }
}

pub struct SettingsStore {
    source: Arc<dyn SettingsSource>,
    current: ArcSwap<SettingsSnapshot>,
}

impl SettingsStore {
    pub fn new(source: Arc<dyn SettingsSource>, location: impl Into<String>) -> Self {
        Self {
            source,
            current: ArcSwap::from_pointee(SettingsSnapshot::unset(location)),
        }
    }

    /// Load (or reload) the document for `location` and swap in a new
    /// snapshot.
    ///
    /// A missing document is created from the skeleton and read back. A
    /// malformed document leaves the store unset and returns
    /// [`CoreError::ConfigParse`].
    pub fn load(&self, location: &str) -> Result<Arc<SettingsSnapshot>, CoreError> {
        let text = match self.source.read(location)? {
            Some(text) => text,
            None => {
                info!(location, "no settings document, writing skeleton");
                self.source.create(location, SKELETON)?;
                self.source
                    .read(location)?
                    .ok_or_else(|| CoreError::ConfigSource {
                        location: location.to_owned(),
                        message: "skeleton document was not readable after creation".into(),
                    })?
            }
        };

        let document = match SettingsDocument::from_yaml(&text) {
            Ok(doc) => doc,
            Err(e) => {
                error!(location, error = %e, "settings document is malformed");
                self.current.store(Arc::new(SettingsSnapshot::unset(location)));
                return Err(CoreError::ConfigParse {
                    location: location.to_owned(),
                    message: e.to_string(),
                });
            }
        };

        let snapshot = Arc::new(SettingsSnapshot::from_document(location, &document));
        self.current.store(Arc::clone(&snapshot));
        info!(
            location,
            capabilities = snapshot.capabilities().len(),
            devices = snapshot.device_settings().len(),
            "settings loaded"
        );
        Ok(snapshot)
    }

    /// The current snapshot.
    pub fn snapshot(&self) -> Arc<SettingsSnapshot> {
        self.current.load_full()
    }

    /// Replace the snapshot directly, bypassing the source.
    pub fn replace(&self, snapshot: SettingsSnapshot) {
        self.current.store(Arc::new(snapshot));
    }

    pub fn is_loaded(&self) -> bool {
        self.current.load().is_loaded()
    }
}
