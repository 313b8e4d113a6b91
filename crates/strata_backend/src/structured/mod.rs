//! Structured backend: directory of append-only per-store logs.
//!
//! The preferred backend. Each database is a directory under the root:
//!
//! ```text
//! <root>/<name>/
//! ├─ MANIFEST        # schema version + store registry
//! ├─ LOCK            # advisory lock for single-writer access
//! └─ <store>.log     # one append-only record log per store
//! ```
//!
//! Every store log is replayed into an in-memory index on first use; keys
//! iterate in sorted order, which is this backend's native order. Binary
//! values are written as compact frames when the binary probe succeeds and
//! fall back to the text serializer otherwise.

mod log;
mod manifest;

use self::log::{append_record, replay, LogRecord, Payload};
use self::manifest::Manifest;
use crate::backend::{Backend, BackendConfig, DropTarget, Visitor};
use crate::error::{BackendError, BackendResult};
use fs2::FileExt;
use std::collections::{BTreeMap, HashMap};
use std::fs::{self, File, OpenOptions};
use std::io::{Seek, SeekFrom};
use std::path::{Path, PathBuf};
use strata_codec::{decode_frame, deserialize, encode_frame, serialize, Value};
use tracing::{debug, warn};

const LOCK_FILE: &str = "LOCK";
const PROBE_FILE: &str = ".binprobe";

/// Minimum record count before a log is considered for compaction.
const COMPACT_MIN_RECORDS: usize = 64;

struct StoreState {
    file: File,
    index: BTreeMap<String, Payload>,
}

/// Structured log-file backend.
pub struct StructuredBackend {
    name: String,
    root_dir: PathBuf,
    dir: PathBuf,
    /// Advisory lock; `None` once the handle is closed.
    lock: Option<File>,
    manifest: Manifest,
    stores: HashMap<String, StoreState>,
    supports_binary: bool,
}

impl StructuredBackend {
    /// Opens (creating as needed) the database named by the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError::Connection`] if another process holds the
    /// database lock, and I/O or corruption errors from reading the
    /// manifest.
    pub fn open(cfg: &BackendConfig) -> BackendResult<Self> {
        let dir = cfg.root_dir.join(sanitize_component(&cfg.name));
        fs::create_dir_all(&dir)?;

        let lock_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(dir.join(LOCK_FILE))?;
        if lock_file.try_lock_exclusive().is_err() {
            return Err(BackendError::connection(format!(
                "database {:?} is locked by another process",
                cfg.name
            )));
        }

        let manifest = Manifest::load(&dir)?.unwrap_or_else(|| Manifest::new(cfg.version.max(1)));

        let supports_binary = if cfg.force_text_payloads {
            false
        } else {
            probe_binary(&dir)
        };
        if !supports_binary {
            debug!(name = %cfg.name, "binary payloads routed through the text serializer");
        }

        Ok(Self {
            name: cfg.name.clone(),
            root_dir: cfg.root_dir.clone(),
            dir,
            lock: Some(lock_file),
            manifest,
            stores: HashMap::new(),
            supports_binary,
        })
    }

    /// True when the binary probe found native binary support.
    #[must_use]
    pub const fn supports_binary(&self) -> bool {
        self.supports_binary
    }

    fn check_open(&self) -> BackendResult<()> {
        if self.lock.is_none() {
            return Err(BackendError::stale("backend handle is closed"));
        }
        Ok(())
    }

    fn log_path(&self, store: &str) -> PathBuf {
        self.dir.join(format!("{}.log", sanitize_component(store)))
    }

    fn load_store(&mut self, store: &str) -> BackendResult<()> {
        let path = self.log_path(store);
        let data = match fs::read(&path) {
            Ok(d) => d,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(e.into()),
        };

        let replayed = replay(&data);
        let torn = replayed.valid_len < data.len() as u64;
        if torn {
            warn!(
                store,
                valid = replayed.valid_len,
                len = data.len(),
                "log tail is torn; truncating to the last valid record"
            );
        }

        let mut index = BTreeMap::new();
        for record in replayed.records.iter() {
            match record {
                LogRecord::Put { key, payload } => {
                    index.insert(key.clone(), payload.clone());
                }
                LogRecord::Remove { key } => {
                    index.remove(key);
                }
            }
        }
        let total_records = replayed.records.len();
        let compacted = total_records >= COMPACT_MIN_RECORDS && index.len() * 2 < total_records;
        if compacted {
            debug!(store, live = index.len(), total = total_records, "compacting log");
            rewrite_log(&path, &index)?;
        }

        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;
        if torn && !compacted {
            file.set_len(replayed.valid_len)?;
        }
        file.seek(SeekFrom::End(0))?;

        self.stores
            .insert(store.to_string(), StoreState { file, index });
        Ok(())
    }

    fn state(&mut self, store: &str) -> BackendResult<&mut StoreState> {
        self.check_open()?;
        if !self.stores.contains_key(store) {
            let version = self.manifest.version;
            self.ensure_store(store, version)?;
        }
        self.stores
            .get_mut(store)
            .ok_or_else(|| BackendError::stale("store vanished during load"))
    }

    fn decode(payload: &Payload) -> BackendResult<Value> {
        match payload {
            Payload::Text(s) => Ok(deserialize(s)?),
            Payload::Frame(b) => Ok(decode_frame(b)?),
        }
    }

    fn encode(&self, value: &Value) -> BackendResult<Payload> {
        if value.is_binary() && self.supports_binary {
            Ok(Payload::Frame(encode_frame(value)?))
        } else {
            Ok(Payload::Text(serialize(value)?))
        }
    }
}

impl Backend for StructuredBackend {
    fn ensure_store(&mut self, store: &str, version: u32) -> BackendResult<()> {
        self.check_open()?;

        let mut changed = false;
        if version > self.manifest.version {
            debug!(
                name = %self.name,
                from = self.manifest.version,
                to = version,
                "upgrading database version"
            );
            self.manifest.version = version;
            changed = true;
        } else if version < self.manifest.version {
            warn!(
                name = %self.name,
                on_disk = self.manifest.version,
                requested = version,
                "database cannot be downgraded; keeping the on-disk version"
            );
        }

        if !self.manifest.has_store(store) {
            // Creating a store in an existing database is a schema change.
            if !self.manifest.stores.is_empty() {
                self.manifest.version += 1;
            }
            self.manifest.add_store(store);
            changed = true;
        }

        if changed {
            self.manifest.save(&self.dir)?;
        }

        if !self.stores.contains_key(store) {
            self.load_store(store)?;
        }
        Ok(())
    }

    fn get(&mut self, store: &str, key: &str) -> BackendResult<Option<Value>> {
        let state = self.state(store)?;
        match state.index.get(key) {
            Some(payload) => Ok(Some(Self::decode(payload)?)),
            None => Ok(None),
        }
    }

    fn set(&mut self, store: &str, key: &str, value: &Value) -> BackendResult<()> {
        let payload = self.encode(value)?;
        let state = self.state(store)?;
        append_record(
            &mut state.file,
            &LogRecord::Put {
                key: key.to_string(),
                payload: payload.clone(),
            },
        )?;
        state.index.insert(key.to_string(), payload);
        Ok(())
    }

    fn remove(&mut self, store: &str, key: &str) -> BackendResult<()> {
        let state = self.state(store)?;
        append_record(
            &mut state.file,
            &LogRecord::Remove {
                key: key.to_string(),
            },
        )?;
        state.index.remove(key);
        Ok(())
    }

    fn clear(&mut self, store: &str) -> BackendResult<()> {
        let state = self.state(store)?;
        state.file.set_len(0)?;
        state.file.seek(SeekFrom::Start(0))?;
        state.index.clear();
        Ok(())
    }

    fn length(&mut self, store: &str) -> BackendResult<usize> {
        Ok(self.state(store)?.index.len())
    }

    fn key_at(&mut self, store: &str, index: usize) -> BackendResult<Option<String>> {
        Ok(self.state(store)?.index.keys().nth(index).cloned())
    }

    fn keys(&mut self, store: &str) -> BackendResult<Vec<String>> {
        Ok(self.state(store)?.index.keys().cloned().collect())
    }

    fn iterate(&mut self, store: &str, visitor: &mut Visitor<'_>) -> BackendResult<Option<Value>> {
        // Decode into a snapshot first: the index cannot be borrowed while
        // the visitor runs, and the visitor must observe a stable view.
        let entries: Vec<(String, Payload)> = self
            .state(store)?
            .index
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        for (i, (key, payload)) in entries.iter().enumerate() {
            let value = Self::decode(payload)?;
            if let Some(result) = visitor(value, key, (i + 1) as u64) {
                return Ok(Some(result));
            }
        }
        Ok(None)
    }

    fn close(&mut self) {
        self.stores.clear();
        self.lock = None;
    }

    fn drop_instance(&mut self, target: &DropTarget) -> BackendResult<()> {
        if target.name != self.name {
            // Foreign database: operate through a transient handle.
            let cfg = BackendConfig::new(&target.name, &self.root_dir);
            let mut other = Self::open(&cfg)?;
            return other.drop_instance(target);
        }

        match &target.store_name {
            Some(store) => {
                self.check_open()?;
                self.stores.remove(store);
                let path = self.log_path(store);
                match fs::remove_file(&path) {
                    Ok(()) => {}
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                    Err(e) => return Err(e.into()),
                }
                if self.manifest.remove_store(store) {
                    // Sharing facades upgrade past the dropped store on
                    // their next reconnect.
                    self.manifest.version += 1;
                    self.manifest.save(&self.dir)?;
                }
                Ok(())
            }
            None => {
                self.close();
                match fs::remove_dir_all(&self.dir) {
                    Ok(()) => Ok(()),
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
                    Err(e) => Err(e.into()),
                }
            }
        }
    }
}

fn rewrite_log(path: &Path, index: &BTreeMap<String, Payload>) -> BackendResult<()> {
    let tmp = path.with_extension("log.tmp");
    {
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&tmp)?;
        for (key, payload) in index {
            append_record(
                &mut file,
                &LogRecord::Put {
                    key: key.clone(),
                    payload: payload.clone(),
                },
            )?;
        }
        file.sync_all()?;
    }
    fs::rename(&tmp, path)?;
    Ok(())
}

/// Probes whether the database directory accepts raw binary payloads.
///
/// Performed once per open; a write-and-read-back of a small frame. The
/// result is cached on the backend for its lifetime.
fn probe_binary(dir: &Path) -> bool {
    let probe = dir.join(PROBE_FILE);
    let Ok(frame) = encode_frame(&Value::Buffer(vec![0xAB, 0xCD])) else {
        return false;
    };
    let ok = fs::write(&probe, &frame).is_ok()
        && fs::read(&probe).map(|data| data == frame).unwrap_or(false);
    let _ = fs::remove_file(&probe);
    ok
}

fn sanitize_component(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect()
}
