//! Suppression state file

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use thiserror::Error;
use tracing::{debug, warn};

/// Persistence errors
#[derive(Debug, Error)]
pub enum PersistError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Malformed state file: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// One persisted entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedEntry {
    pub suppressed: bool,
    pub last_state: String,
    pub last_seen: i64,
}

/// JSON file holding the whole suppression map.
///
/// Saves carry a version; a save older than the last one written is skipped,
/// so concurrent writers cannot roll the file back.
pub struct StateFile {
    path: PathBuf,
    written: Mutex<u64>,
}

impl StateFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            written: Mutex::new(0),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the file; a missing file is an empty map
    pub fn load(&self) -> Result<BTreeMap<String, PersistedEntry>, PersistError> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(BTreeMap::new()),
            Err(source) => {
                return Err(PersistError::Io {
                    path: self.path.clone(),
                    source,
                })
            }
        };
        if raw.trim().is_empty() {
            return Ok(BTreeMap::new());
        }
        Ok(serde_json::from_str(&raw)?)
    }

    /// Write `snapshot` (temp file + rename) unless a newer version was written
    pub fn save(
        &self,
        version: u64,
        snapshot: &BTreeMap<String, PersistedEntry>,
    ) -> Result<bool, PersistError> {
        let mut written = self.written.lock().unwrap_or_else(|e| e.into_inner());
        if version < *written {
            debug!("Skipping stale state snapshot v{} (have v{})", version, *written);
            return Ok(false);
        }

        let body = serde_json::to_vec_pretty(snapshot)?;
        let io_err = |source| PersistError::Io {
            path: self.path.clone(),
            source,
        };
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(io_err)?;
        }
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, body).map_err(io_err)?;
        if let Err(e) = fs::rename(&tmp, &self.path) {
            warn!("Could not replace {}: {}", self.path.display(), e);
            let _ = fs::remove_file(&tmp);
            return Err(io_err(e));
        }

        *written = version;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(suppressed: bool) -> PersistedEntry {
        PersistedEntry {
            suppressed,
            last_state: "down".to_string(),
            last_seen: 1_700_000_000,
        }
    }

    #[test]
    fn test_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let file = StateFile::new(dir.path().join("absent.json"));
        assert!(file.load().unwrap().is_empty());
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let file = StateFile::new(dir.path().join("nested/state.json"));

        let mut snapshot = BTreeMap::new();
        snapshot.insert("h|id:abc".to_string(), entry(true));
        assert!(file.save(1, &snapshot).unwrap());

        let loaded = file.load().unwrap();
        assert_eq!(loaded.get("h|id:abc"), Some(&entry(true)));
        assert!(!dir.path().join("nested/state.json.tmp").exists());
    }

    #[test]
    fn test_stale_version_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let file = StateFile::new(dir.path().join("state.json"));

        let mut newer = BTreeMap::new();
        newer.insert("k".to_string(), entry(true));
        let mut older = BTreeMap::new();
        older.insert("k".to_string(), entry(false));

        assert!(file.save(5, &newer).unwrap());
        assert!(!file.save(4, &older).unwrap());
        assert_eq!(file.load().unwrap().get("k"), Some(&entry(true)));
    }

    #[test]
    fn test_malformed_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        fs::write(&path, "{not json").unwrap();
        assert!(matches!(
            StateFile::new(&path).load(),
            Err(PersistError::Malformed(_))
        ));
    }
}
