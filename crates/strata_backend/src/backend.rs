//! Backend trait definition and shared configuration types.

use crate::error::{BackendError, BackendResult};
use std::path::{Path, PathBuf};
use strata_codec::Value;

/// Default store name; the flat backend omits its prefix segment for it.
pub const DEFAULT_STORE_NAME: &str = "keyvaluepairs";

/// Iteration visitor: receives `(value, key, index)` with `index` starting
/// at 1 and counting only visited entries. Returning `Some` stops the
/// iteration early; that value becomes the iteration result.
pub type Visitor<'a> = dyn FnMut(Value, &str, u64) -> Option<Value> + Send + 'a;

/// Configuration a backend receives when it is opened.
///
/// This is the backend-facing subset of the facade's store configuration;
/// one instance describes one named database.
#[derive(Debug, Clone)]
pub struct BackendConfig {
    /// Database identifier. Becomes a directory, file, or key-prefix
    /// segment depending on the backend.
    pub name: String,
    /// Directory under which every backend places its files.
    pub root_dir: PathBuf,
    /// Requested schema version.
    pub version: u32,
    /// Byte quota hint; applied by the SQL backend only.
    pub size: u64,
    /// Free-text description; not interpreted.
    pub description: String,
    /// Forces the structured backend's binary probe to report no native
    /// binary support, routing binary values through the text serializer.
    pub force_text_payloads: bool,
}

impl BackendConfig {
    /// Creates a configuration for the given database name and root.
    pub fn new(name: impl Into<String>, root_dir: impl AsRef<Path>) -> Self {
        Self {
            name: name.into(),
            root_dir: root_dir.as_ref().to_path_buf(),
            version: 1,
            size: 4_980_736,
            description: String::new(),
            force_text_payloads: false,
        }
    }
}

/// Target of a `drop_instance` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DropTarget {
    /// Database to drop from.
    pub name: String,
    /// Store to drop; `None` drops the entire database.
    pub store_name: Option<String>,
}

/// One storage technology behind the uniform operation contract.
///
/// Implementations are owned exclusively by a connection-manager worker,
/// which serializes every call; methods therefore take `&mut self` and no
/// internal locking is required.
///
/// # Invariants
///
/// - `set` followed by `get` on the same store and key returns the value
/// - `key_at`, `keys` and `iterate` share one backend-native order
/// - `iterate` passes 1-based indices counting only visited entries
/// - a failed operation leaves the store observably unchanged
pub trait Backend: Send {
    /// Makes the named store usable at the requested version, creating it
    /// and upgrading the database version as needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be created or the database
    /// cannot be upgraded.
    fn ensure_store(&mut self, store: &str, version: u32) -> BackendResult<()>;

    /// Reads the value stored under `key`, or `None`.
    ///
    /// # Errors
    ///
    /// Returns an error on backend failure or a corrupt stored value.
    fn get(&mut self, store: &str, key: &str) -> BackendResult<Option<Value>>;

    /// Stores `value` under `key`, replacing any existing entry.
    ///
    /// # Errors
    ///
    /// Returns an error on backend failure, including quota exhaustion.
    fn set(&mut self, store: &str, key: &str, value: &Value) -> BackendResult<()>;

    /// Deletes the entry under `key`; deleting a missing key succeeds.
    ///
    /// # Errors
    ///
    /// Returns an error on backend failure.
    fn remove(&mut self, store: &str, key: &str) -> BackendResult<()>;

    /// Deletes every entry in the store.
    ///
    /// # Errors
    ///
    /// Returns an error on backend failure.
    fn clear(&mut self, store: &str) -> BackendResult<()>;

    /// Returns the number of entries in the store.
    ///
    /// # Errors
    ///
    /// Returns an error on backend failure.
    fn length(&mut self, store: &str) -> BackendResult<usize>;

    /// Returns the key at `index` in backend-native order, or `None` when
    /// out of range.
    ///
    /// # Errors
    ///
    /// Returns an error on backend failure.
    fn key_at(&mut self, store: &str, index: usize) -> BackendResult<Option<String>>;

    /// Returns every key in backend-native order.
    ///
    /// # Errors
    ///
    /// Returns an error on backend failure.
    fn keys(&mut self, store: &str) -> BackendResult<Vec<String>>;

    /// Visits every entry in backend-native order until the visitor stops
    /// the iteration by returning `Some`.
    ///
    /// # Errors
    ///
    /// Returns an error on backend failure or a corrupt stored value.
    fn iterate(&mut self, store: &str, visitor: &mut Visitor<'_>) -> BackendResult<Option<Value>>;

    /// Drops the backend's cached handles. The next operation fails with a
    /// stale-handle error, prompting the connection manager to reopen.
    fn close(&mut self);

    /// Deletes a store, or a whole database when `target.store_name` is
    /// `None`.
    ///
    /// Optional; the default fails with [`BackendError::NotImplemented`].
    ///
    /// # Errors
    ///
    /// Returns an error if the target cannot be deleted.
    fn drop_instance(&mut self, target: &DropTarget) -> BackendResult<()> {
        let _ = target;
        Err(BackendError::not_implemented("drop_instance"))
    }
}
