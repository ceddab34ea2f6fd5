// ── YAML settings files ──
//
// One document per location at `<dir>/<location>.yaml`. The directory is
// created on first write, so a fresh install self-heals into the skeleton.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tracing::debug;

use capmesh_core::{CoreError, SettingsSource};

#[derive(Debug, Clone)]
pub struct FileSettingsSource {
    dir: PathBuf,
}

impl FileSettingsSource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Document path for `location`. Locations that could leave the
    /// directory are rejected.
    pub fn path_for(&self, location: &str) -> Result<PathBuf, CoreError> {
        if location.is_empty() || location.contains(['/', '\\']) || location.starts_with('.') {
            return Err(CoreError::ConfigSource {
                location: location.to_owned(),
                message: "location must be a plain name".into(),
            });
        }
        Ok(self.dir.join(format!("{location}.yaml")))
    }
}

fn io_error(location: &str, path: &Path, err: &std::io::Error) -> CoreError {
    CoreError::ConfigSource {
        location: location.to_owned(),
        message: format!("{}: {err}", path.display()),
    }
}

impl SettingsSource for FileSettingsSource {
    fn read(&self, location: &str) -> Result<Option<String>, CoreError> {
        let path = self.path_for(location)?;
        match std::fs::read_to_string(&path) {
            Ok(text) => {
                debug!(path = %path.display(), "settings document read");
                Ok(Some(text))
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(io_error(location, &path, &e)),
        }
    }

    fn create(&self, location: &str, contents: &str) -> Result<(), CoreError> {
        let path = self.path_for(location)?;
        std::fs::create_dir_all(&self.dir).map_err(|e| io_error(location, &self.dir, &e))?;
        std::fs::write(&path, contents).map_err(|e| io_error(location, &path, &e))?;
        debug!(path = %path.display(), "settings document created");
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn missing_document_reads_as_none() {
        let dir = tempfile::tempdir().unwrap();
        let source = FileSettingsSource::new(dir.path().join("never-created"));
        assert_eq!(source.read("home").unwrap(), None);
    }

    #[test]
    fn create_makes_directories() {
        let dir = tempfile::tempdir().unwrap();
        let source = FileSettingsSource::new(dir.path().join("a").join("b"));
        source.create("home", "devices: []\n").unwrap();
        assert_eq!(source.read("home").unwrap().as_deref(), Some("devices: []\n"));
        assert!(dir.path().join("a/b/home.yaml").is_file());
    }

    #[test]
    fn escaping_locations_are_rejected() {
        let source = FileSettingsSource::new("/nonexistent");
        for bad in ["", "../home", "a/b", ".hidden"] {
            assert!(matches!(source.read(bad), Err(CoreError::ConfigSource { .. })), "{bad}");
        }
    }
}
