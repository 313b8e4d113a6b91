//! Database manifest for the structured backend.

use crate::error::{BackendError, BackendResult};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Manifest format tag. Bumped only on incompatible layout changes.
pub const MANIFEST_FORMAT: u32 = 1;

/// File name of the manifest within a database directory.
pub const MANIFEST_FILE: &str = "MANIFEST";

/// Temporary file for atomic manifest writes.
const MANIFEST_TEMP: &str = "MANIFEST.tmp";

/// Metadata for one structured database: its schema version and the set of
/// stores it contains.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    /// Layout format tag, [`MANIFEST_FORMAT`].
    pub format: u32,
    /// Current schema version of the database.
    pub version: u32,
    /// Names of the stores in this database, sorted.
    pub stores: Vec<String>,
}

impl Manifest {
    /// Creates a fresh manifest at the given version with no stores.
    #[must_use]
    pub fn new(version: u32) -> Self {
        Self {
            format: MANIFEST_FORMAT,
            version,
            stores: Vec::new(),
        }
    }

    /// Loads the manifest from a database directory, or `None` if the
    /// database is new.
    ///
    /// # Errors
    ///
    /// Returns an error on I/O failure or an incompatible format tag.
    pub fn load(dir: &Path) -> BackendResult<Option<Self>> {
        let path = dir.join(MANIFEST_FILE);
        if !path.exists() {
            return Ok(None);
        }

        let data = fs::read(&path)?;
        let manifest: Self = serde_json::from_slice(&data)
            .map_err(|e| BackendError::corrupted(format!("manifest unreadable: {e}")))?;

        if manifest.format != MANIFEST_FORMAT {
            return Err(BackendError::corrupted(format!(
                "manifest format {} is not supported (expected {})",
                manifest.format, MANIFEST_FORMAT
            )));
        }

        Ok(Some(manifest))
    }

    /// Persists the manifest atomically (temp file + rename).
    ///
    /// # Errors
    ///
    /// Returns an error on I/O failure.
    pub fn save(&self, dir: &Path) -> BackendResult<()> {
        let tmp = dir.join(MANIFEST_TEMP);
        let data = serde_json::to_vec_pretty(self)
            .map_err(|e| BackendError::corrupted(format!("manifest unwritable: {e}")))?;
        fs::write(&tmp, data)?;
        fs::rename(&tmp, dir.join(MANIFEST_FILE))?;
        Ok(())
    }

    /// True if the manifest lists the named store.
    #[must_use]
    pub fn has_store(&self, store: &str) -> bool {
        self.stores.iter().any(|s| s == store)
    }

    /// Adds a store, keeping the list sorted. Returns false if present.
    pub fn add_store(&mut self, store: &str) -> bool {
        if self.has_store(store) {
            return false;
        }
        self.stores.push(store.to_string());
        self.stores.sort();
        true
    }

    /// Removes a store. Returns false if it was not listed.
    pub fn remove_store(&mut self, store: &str) -> bool {
        let before = self.stores.len();
        self.stores.retain(|s| s != store);
        self.stores.len() != before
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn save_and_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let mut manifest = Manifest::new(3);
        manifest.add_store("songs");
        manifest.add_store("artists");
        manifest.save(dir.path()).unwrap();

        let loaded = Manifest::load(dir.path()).unwrap().unwrap();
        assert_eq!(loaded, manifest);
        assert_eq!(loaded.stores, vec!["artists", "songs"]);
    }

    #[test]
    fn missing_manifest_is_none() {
        let dir = tempfile::tempdir().unwrap();
        assert!(Manifest::load(dir.path()).unwrap().is_none());
    }

    #[test]
    fn unsupported_format_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(MANIFEST_FILE),
            r#"{"format": 99, "version": 1, "stores": []}"#,
        )
        .unwrap();
        let err = Manifest::load(dir.path()).unwrap_err();
        assert!(matches!(err, BackendError::Corrupted { .. }));
    }

    #[test]
    fn add_store_is_idempotent() {
        let mut manifest = Manifest::new(1);
        assert!(manifest.add_store("kv"));
        assert!(!manifest.add_store("kv"));
        assert!(manifest.remove_store("kv"));
        assert!(!manifest.remove_store("kv"));
    }
}
