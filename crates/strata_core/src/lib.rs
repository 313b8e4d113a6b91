//! # Strata Core
//!
//! A layered key-value store with driver negotiation and fallback.
//!
//! Applications hold a [`Store`]: whole-value get/set/remove keyed by
//! string within one named store of one named database. The store selects
//! the first supported driver from an ordered preference list (structured
//! log-file store, then SQLite, then a flat prefixed-key file) and
//! forwards every operation to a per-database connection worker that
//! guarantees total operation ordering and recovers stale connections with
//! a single reconnect-and-retry.
//!
//! ## Quick start
//!
//! ```no_run
//! # async fn demo() -> strata_core::StoreResult<()> {
//! use strata_core::{Registries, Store, StoreConfig, Value};
//!
//! let registries = Registries::new();
//! let store = Store::new(
//!     registries,
//!     StoreConfig::new()
//!         .name("appdb")
//!         .store_name("kv")
//!         .root_dir("/var/lib/app"),
//! );
//!
//! store.set("answer", Value::from(42i64)).await?;
//! assert_eq!(store.get("answer").await?, Some(Value::from(42i64)));
//! # Ok(())
//! # }
//! ```
//!
//! Two stores configured with the same `{name, store_name}` share one
//! connection and observe each other's writes in issue order.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod context;
mod error;
mod json;
mod registry;
mod store;

pub use config::{sanitize_store_name, StoreConfig, StoreOptions};
pub use context::ConnectionRegistry;
pub use error::{StoreError, StoreResult};
pub use json::JsonStore;
pub use registry::{
    default_driver_order, DriverProvider, DriverRegistry, FLAT_DRIVER, SQL_DRIVER,
    STRUCTURED_DRIVER,
};
pub use store::{Registries, Store};

// Re-exported so consumers and custom drivers need no direct dependency
// on the lower crates.
pub use strata_backend::{
    Backend, BackendConfig, BackendError, BackendResult, DropTarget, Visitor,
};
pub use strata_codec::{Blob, CodecError, CodecResult, Value};
