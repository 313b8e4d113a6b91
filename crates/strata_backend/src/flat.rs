//! Flat key-prefix backend, the fallback of last resort.
//!
//! All databases of this backend share one flat map file, `flat.kv`, under
//! the root directory: a JSON object of full key to serialized value. Keys
//! are namespaced `{name}/{key}`, with an extra `{store}/` segment when the
//! store is not the default one. Clear, key listing, iteration and drops
//! all scan the flat space and filter by prefix.
//!
//! Every operation re-reads the file under an advisory lock and mutations
//! rewrite it atomically, so databases sharing the file never clobber each
//! other. On init the backend probes that a write actually succeeds and
//! refuses to initialize when it does not (read-only roots, zero quota),
//! letting driver negotiation move on.

use crate::backend::{Backend, BackendConfig, DropTarget, Visitor, DEFAULT_STORE_NAME};
use crate::error::{BackendError, BackendResult};
use fs2::FileExt;
use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::path::PathBuf;
use strata_codec::{deserialize, serialize, Value};

const DATA_FILE: &str = "flat.kv";
const LOCK_FILE: &str = "flat.kv.lock";
const TEMP_FILE: &str = "flat.kv.tmp";
const PROBE_KEY: &str = "_strata_support_test";

/// Flat prefixed-key backend over a single shared map file.
pub struct FlatBackend {
    name: String,
    root_dir: PathBuf,
    closed: bool,
}

impl FlatBackend {
    /// Creates a handle for the database named by the configuration.
    ///
    /// No files are touched until [`Backend::ensure_store`] runs its
    /// usability probe.
    #[must_use]
    pub fn open(cfg: &BackendConfig) -> Self {
        Self {
            name: cfg.name.clone(),
            root_dir: cfg.root_dir.clone(),
            closed: false,
        }
    }

    fn check_open(&self) -> BackendResult<()> {
        if self.closed {
            return Err(BackendError::stale("backend handle is closed"));
        }
        Ok(())
    }

    /// Takes the exclusive flat-file lock for the duration of one
    /// operation. Released when the returned handle drops.
    fn lock(&self) -> BackendResult<File> {
        let lock = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(self.root_dir.join(LOCK_FILE))?;
        lock.lock_exclusive()?;
        Ok(lock)
    }

    fn load(&self) -> BackendResult<BTreeMap<String, String>> {
        match fs::read(self.root_dir.join(DATA_FILE)) {
            Ok(data) => serde_json::from_slice(&data)
                .map_err(|e| BackendError::corrupted(format!("flat map unreadable: {e}"))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(BTreeMap::new()),
            Err(e) => Err(e.into()),
        }
    }

    fn save(&self, entries: &BTreeMap<String, String>) -> BackendResult<()> {
        let tmp = self.root_dir.join(TEMP_FILE);
        let data = serde_json::to_vec(entries)
            .map_err(|e| BackendError::corrupted(format!("flat map unwritable: {e}")))?;
        fs::write(&tmp, data)?;
        fs::rename(&tmp, self.root_dir.join(DATA_FILE))?;
        Ok(())
    }

    fn key_prefix(&self, store: &str) -> String {
        prefix_for(&self.name, store)
    }

    fn full_key(&self, store: &str, key: &str) -> String {
        format!("{}{}", self.key_prefix(store), key)
    }
}

fn prefix_for(name: &str, store: &str) -> String {
    if store == DEFAULT_STORE_NAME {
        format!("{name}/")
    } else {
        format!("{name}/{store}/")
    }
}

impl Backend for FlatBackend {
    fn ensure_store(&mut self, store: &str, _version: u32) -> BackendResult<()> {
        self.check_open()?;

        // Usability probe: an accessible flat file is not enough, a write
        // must actually stick (read-only roots report success on open but
        // fail here).
        let probe = || -> BackendResult<()> {
            fs::create_dir_all(&self.root_dir)?;
            let _guard = self.lock()?;
            let mut entries = self.load()?;
            entries.insert(self.full_key(store, PROBE_KEY), "1".to_string());
            self.save(&entries)?;
            entries.remove(&self.full_key(store, PROBE_KEY));
            self.save(&entries)?;
            Ok(())
        };

        probe().map_err(|e| BackendError::unusable(format!("write probe failed: {e}")))
    }

    fn get(&mut self, store: &str, key: &str) -> BackendResult<Option<Value>> {
        self.check_open()?;
        let _guard = self.lock()?;
        let entries = self.load()?;
        match entries.get(&self.full_key(store, key)) {
            Some(text) => Ok(Some(deserialize(text)?)),
            None => Ok(None),
        }
    }

    fn set(&mut self, store: &str, key: &str, value: &Value) -> BackendResult<()> {
        self.check_open()?;
        let text = serialize(value)?;
        let _guard = self.lock()?;
        let mut entries = self.load()?;
        entries.insert(self.full_key(store, key), text);
        self.save(&entries)
    }

    fn remove(&mut self, store: &str, key: &str) -> BackendResult<()> {
        self.check_open()?;
        let _guard = self.lock()?;
        let mut entries = self.load()?;
        entries.remove(&self.full_key(store, key));
        self.save(&entries)
    }

    fn clear(&mut self, store: &str) -> BackendResult<()> {
        self.check_open()?;
        let prefix = self.key_prefix(store);
        let _guard = self.lock()?;
        let mut entries = self.load()?;
        entries.retain(|key, _| !key.starts_with(&prefix));
        self.save(&entries)
    }

    fn length(&mut self, store: &str) -> BackendResult<usize> {
        Ok(self.keys(store)?.len())
    }

    fn key_at(&mut self, store: &str, index: usize) -> BackendResult<Option<String>> {
        Ok(self.keys(store)?.into_iter().nth(index))
    }

    fn keys(&mut self, store: &str) -> BackendResult<Vec<String>> {
        self.check_open()?;
        let prefix = self.key_prefix(store);
        let _guard = self.lock()?;
        let entries = self.load()?;
        Ok(entries
            .keys()
            .filter_map(|key| key.strip_prefix(&prefix).map(str::to_string))
            .collect())
    }

    fn iterate(&mut self, store: &str, visitor: &mut Visitor<'_>) -> BackendResult<Option<Value>> {
        self.check_open()?;
        let prefix = self.key_prefix(store);
        let entries = {
            let _guard = self.lock()?;
            self.load()?
        };

        // The index counts only keys in our namespace, not file position.
        let mut iteration = 0u64;
        for (full_key, text) in &entries {
            let Some(key) = full_key.strip_prefix(&prefix) else {
                continue;
            };
            iteration += 1;
            let value = deserialize(text)?;
            if let Some(result) = visitor(value, key, iteration) {
                return Ok(Some(result));
            }
        }
        Ok(None)
    }

    fn close(&mut self) {
        self.closed = true;
    }

    fn drop_instance(&mut self, target: &DropTarget) -> BackendResult<()> {
        self.check_open()?;
        let prefix = match &target.store_name {
            Some(store) => prefix_for(&target.name, store),
            None => format!("{}/", target.name),
        };

        let _guard = self.lock()?;
        let mut entries = self.load()?;
        entries.retain(|key, _| !key.starts_with(&prefix));
        self.save(&entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    fn open(dir: &Path, name: &str) -> FlatBackend {
        let mut backend = FlatBackend::open(&BackendConfig::new(name, dir));
        backend.ensure_store(DEFAULT_STORE_NAME, 1).unwrap();
        backend
    }

    #[test]
    fn set_get_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let mut b = open(dir.path(), "testdb");
        b.set(DEFAULT_STORE_NAME, "a", &Value::text("hello")).unwrap();
        assert_eq!(
            b.get(DEFAULT_STORE_NAME, "a").unwrap(),
            Some(Value::text("hello"))
        );
        assert_eq!(b.get(DEFAULT_STORE_NAME, "missing").unwrap(), None);
    }

    #[test]
    fn default_store_prefix_omits_store_segment() {
        let dir = tempfile::tempdir().unwrap();
        let mut b = open(dir.path(), "testdb");
        b.set(DEFAULT_STORE_NAME, "a", &Value::text("1")).unwrap();

        let data = fs::read_to_string(dir.path().join(DATA_FILE)).unwrap();
        assert!(data.contains("testdb/a"));

        b.ensure_store("custom", 1).unwrap();
        b.set("custom", "a", &Value::text("2")).unwrap();
        let data = fs::read_to_string(dir.path().join(DATA_FILE)).unwrap();
        assert!(data.contains("testdb/custom/a"));
    }

    #[test]
    fn databases_are_isolated_by_prefix() {
        let dir = tempfile::tempdir().unwrap();
        let mut a = open(dir.path(), "alpha");
        let mut b = open(dir.path(), "beta");

        a.set(DEFAULT_STORE_NAME, "k", &Value::text("from-a")).unwrap();
        b.set(DEFAULT_STORE_NAME, "k", &Value::text("from-b")).unwrap();

        assert_eq!(
            a.get(DEFAULT_STORE_NAME, "k").unwrap(),
            Some(Value::text("from-a"))
        );
        assert_eq!(a.keys(DEFAULT_STORE_NAME).unwrap(), vec!["k"]);

        a.clear(DEFAULT_STORE_NAME).unwrap();
        assert_eq!(a.length(DEFAULT_STORE_NAME).unwrap(), 0);
        assert_eq!(
            b.get(DEFAULT_STORE_NAME, "k").unwrap(),
            Some(Value::text("from-b"))
        );
    }

    #[test]
    fn keys_are_sorted_and_stripped() {
        let dir = tempfile::tempdir().unwrap();
        let mut b = open(dir.path(), "testdb");
        for key in ["zebra", "apple"] {
            b.set(DEFAULT_STORE_NAME, key, &Value::text(key)).unwrap();
        }
        assert_eq!(b.keys(DEFAULT_STORE_NAME).unwrap(), vec!["apple", "zebra"]);
        assert_eq!(
            b.key_at(DEFAULT_STORE_NAME, 1).unwrap().as_deref(),
            Some("zebra")
        );
    }

    #[test]
    fn iterate_counts_only_own_namespace() {
        let dir = tempfile::tempdir().unwrap();
        let mut other = open(dir.path(), "other");
        other
            .set(DEFAULT_STORE_NAME, "noise", &Value::text("x"))
            .unwrap();

        let mut b = open(dir.path(), "testdb");
        for key in ["a", "b"] {
            b.set(DEFAULT_STORE_NAME, key, &Value::text(key)).unwrap();
        }

        let mut seen = Vec::new();
        b.iterate(DEFAULT_STORE_NAME, &mut |_value, key, index| {
            seen.push((key.to_string(), index));
            None
        })
        .unwrap();
        assert_eq!(seen, vec![("a".to_string(), 1), ("b".to_string(), 2)]);
    }

    #[test]
    fn binary_values_roundtrip_as_text() {
        let dir = tempfile::tempdir().unwrap();
        let mut b = open(dir.path(), "testdb");
        let value = Value::Buffer(vec![0, 127, 255]);
        b.set(DEFAULT_STORE_NAME, "bin", &value).unwrap();
        assert_eq!(b.get(DEFAULT_STORE_NAME, "bin").unwrap(), Some(value));
    }

    #[test]
    fn unusable_root_fails_probe() {
        let dir = tempfile::tempdir().unwrap();
        // A file where the root directory should be: nothing can be
        // created beneath it.
        let bogus_root = dir.path().join("occupied");
        fs::write(&bogus_root, b"not a directory").unwrap();

        let mut backend = FlatBackend::open(&BackendConfig::new("testdb", &bogus_root));
        let err = backend.ensure_store(DEFAULT_STORE_NAME, 1).unwrap_err();
        assert!(matches!(err, BackendError::Unusable { .. }));
    }

    #[test]
    fn drop_instance_scopes_by_prefix() {
        let dir = tempfile::tempdir().unwrap();
        let mut b = open(dir.path(), "testdb");
        b.ensure_store("songs", 1).unwrap();
        b.set(DEFAULT_STORE_NAME, "a", &Value::text("1")).unwrap();
        b.set("songs", "b", &Value::text("2")).unwrap();

        b.drop_instance(&DropTarget {
            name: "testdb".into(),
            store_name: Some("songs".into()),
        })
        .unwrap();
        assert_eq!(b.get("songs", "b").unwrap(), None);
        assert_eq!(
            b.get(DEFAULT_STORE_NAME, "a").unwrap(),
            Some(Value::text("1"))
        );

        b.drop_instance(&DropTarget {
            name: "testdb".into(),
            store_name: None,
        })
        .unwrap();
        assert_eq!(b.get(DEFAULT_STORE_NAME, "a").unwrap(), None);
    }
}
