//! # Strata Backend
//!
//! Storage backend contract and implementations for strata.
//!
//! A backend is one storage technology behind the uniform key-value
//! operation contract: whole-value get/set/remove keyed by string within a
//! named store of a named database. Backends do not select themselves and
//! do not queue operations; driver negotiation and per-database ordering
//! live in `strata_core`.
//!
//! ## Available backends
//!
//! - [`StructuredBackend`] - directory of append-only per-store logs with a
//!   versioned manifest; the preferred backend
//! - [`SqlBackend`] - one SQLite file per database, one table per store
//! - [`FlatBackend`] - a single flat map file shared by every database,
//!   namespaced by key prefix; the fallback of last resort
//!
//! ## Example
//!
//! ```no_run
//! use strata_backend::{Backend, BackendConfig, StructuredBackend};
//! use strata_codec::Value;
//!
//! let cfg = BackendConfig::new("appdb", "/var/lib/app");
//! let mut backend = StructuredBackend::open(&cfg).unwrap();
//! backend.ensure_store("kv", 1).unwrap();
//! backend.set("kv", "greeting", &Value::text("hello")).unwrap();
//! assert_eq!(backend.get("kv", "greeting").unwrap(), Some(Value::text("hello")));
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod error;
mod flat;
mod sql;
mod structured;

pub use backend::{Backend, BackendConfig, DropTarget, Visitor, DEFAULT_STORE_NAME};
pub use error::{BackendError, BackendResult};
pub use flat::FlatBackend;
pub use sql::SqlBackend;
pub use structured::StructuredBackend;
