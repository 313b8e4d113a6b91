//! Thin typed wrapper: serde round-trips over the facade.

use crate::error::{StoreError, StoreResult};
use crate::store::Store;
use serde::de::DeserializeOwned;
use serde::Serialize;
use strata_codec::{CodecError, Value};

/// A typed convenience layer over a [`Store`].
///
/// `put` serializes any `Serialize` type to a JSON value; `get`
/// deserializes back. A missing key and a stored JSON `null` both read as
/// `None`, so callers get one uniform "nothing there" answer.
pub struct JsonStore {
    store: Store,
}

impl JsonStore {
    /// Wraps a store.
    #[must_use]
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    /// The wrapped store, for operations the wrapper does not cover.
    #[must_use]
    pub fn store(&self) -> &Store {
        &self.store
    }

    /// Reads and deserializes the value under `key`.
    ///
    /// # Errors
    ///
    /// Returns an error when the stored value is not JSON or does not
    /// deserialize into `T`.
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> StoreResult<Option<T>> {
        match self.store.get(key).await? {
            None => Ok(None),
            Some(Value::Json(serde_json::Value::Null)) => Ok(None),
            Some(Value::Json(json)) => Ok(Some(serde_json::from_value(json)?)),
            Some(other) => Err(StoreError::Codec(CodecError::decoding_failed(format!(
                "expected a JSON value, found {}",
                other.kind_name()
            )))),
        }
    }

    /// Serializes and stores `value` under `key`.
    ///
    /// # Errors
    ///
    /// Returns an error when serialization or the write fails.
    pub async fn put<T: Serialize>(&self, key: &str, value: &T) -> StoreResult<()> {
        let json = serde_json::to_value(value)?;
        self.store.set(key, Value::Json(json)).await
    }

    /// Deletes the entry under `key`.
    ///
    /// # Errors
    ///
    /// Returns a backend error.
    pub async fn del(&self, key: &str) -> StoreResult<()> {
        self.store.remove(key).await
    }

    /// Deletes every entry in the store.
    ///
    /// # Errors
    ///
    /// Returns a backend error.
    pub async fn clear(&self) -> StoreResult<()> {
        self.store.clear().await
    }
}
