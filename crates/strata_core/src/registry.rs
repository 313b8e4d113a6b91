//! Driver registry and the built-in driver providers.
//!
//! A driver provider knows how to test one backend for environment support
//! and how to open it. The registry is an explicit instance: construct it
//! once (usually via [`crate::Registries`]) and share it by reference; no
//! process-global state is assumed.

use crate::config::StoreConfig;
use crate::error::{StoreError, StoreResult};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fs;
use std::sync::Arc;
use strata_backend::{Backend, BackendResult, FlatBackend, SqlBackend, StructuredBackend};
use tracing::warn;

/// Id of the structured log-file driver, the preferred backend.
pub const STRUCTURED_DRIVER: &str = "structured-db";

/// Id of the relational SQLite driver.
pub const SQL_DRIVER: &str = "relational-sql";

/// Id of the flat key-prefix driver, the fallback of last resort.
pub const FLAT_DRIVER: &str = "flat-kv";

/// The built-in driver preference order.
#[must_use]
pub fn default_driver_order() -> Vec<String> {
    vec![
        STRUCTURED_DRIVER.to_string(),
        SQL_DRIVER.to_string(),
        FLAT_DRIVER.to_string(),
    ]
}

/// A backend factory: one registered driver.
///
/// The operation contract itself is enforced by the [`Backend`] trait, so
/// a provider cannot be missing required operations; compliance checking
/// at registration reduces to id validity.
pub trait DriverProvider: Send + Sync {
    /// Stable driver id used in preference lists.
    fn id(&self) -> &str;

    /// Whether this driver can work in the current environment for the
    /// given configuration.
    fn supported(&self, config: &StoreConfig) -> bool;

    /// Opens the backend for the configured database.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be opened.
    fn open(&self, config: &StoreConfig) -> BackendResult<Box<dyn Backend>>;
}

/// Registry of driver providers, keyed by id.
pub struct DriverRegistry {
    providers: RwLock<HashMap<String, Arc<dyn DriverProvider>>>,
}

impl Default for DriverRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl DriverRegistry {
    /// Creates a registry with the built-in drivers pre-registered.
    #[must_use]
    pub fn new() -> Self {
        let registry = Self {
            providers: RwLock::new(HashMap::new()),
        };
        for provider in [
            Arc::new(StructuredProvider) as Arc<dyn DriverProvider>,
            Arc::new(SqlProvider),
            Arc::new(FlatProvider),
        ] {
            // Built-ins always pass the compliance check.
            let _ = registry.register(provider);
        }
        registry
    }

    /// Registers a driver provider.
    ///
    /// Re-registering an existing id overwrites it with a logged notice.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::DriverCompliance`] for an empty or
    /// whitespace-only id.
    pub fn register(&self, provider: Arc<dyn DriverProvider>) -> StoreResult<()> {
        let id = provider.id().trim().to_string();
        if id.is_empty() {
            return Err(StoreError::compliance("driver id must not be empty"));
        }

        let mut providers = self.providers.write();
        if providers.contains_key(&id) {
            warn!(driver = %id, "redefining driver");
        }
        providers.insert(id, provider);
        Ok(())
    }

    /// Looks up a provider by id.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::DriverNotFound`] for an unregistered id.
    pub fn get(&self, id: &str) -> StoreResult<Arc<dyn DriverProvider>> {
        self.providers
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::DriverNotFound { id: id.to_string() })
    }

    /// Whether the driver is registered and supported for this config.
    #[must_use]
    pub fn is_supported(&self, id: &str, config: &StoreConfig) -> bool {
        self.providers
            .read()
            .get(id)
            .map(|p| p.supported(config))
            .unwrap_or(false)
    }

    /// Filters a preference list down to supported drivers, preserving
    /// order.
    #[must_use]
    pub fn supported_from_list<S: AsRef<str>>(
        &self,
        ids: &[S],
        config: &StoreConfig,
    ) -> Vec<String> {
        ids.iter()
            .map(|id| id.as_ref())
            .filter(|id| self.is_supported(id, config))
            .map(str::to_string)
            .collect()
    }
}

struct StructuredProvider;

impl DriverProvider for StructuredProvider {
    fn id(&self) -> &str {
        STRUCTURED_DRIVER
    }

    fn supported(&self, config: &StoreConfig) -> bool {
        // The root must be creatable; the open itself settles the rest.
        fs::create_dir_all(&config.root_dir).is_ok()
    }

    fn open(&self, config: &StoreConfig) -> BackendResult<Box<dyn Backend>> {
        Ok(Box::new(StructuredBackend::open(&config.backend_config())?))
    }
}

struct SqlProvider;

impl DriverProvider for SqlProvider {
    fn id(&self) -> &str {
        SQL_DRIVER
    }

    fn supported(&self, config: &StoreConfig) -> bool {
        fs::create_dir_all(&config.root_dir).is_ok()
    }

    fn open(&self, config: &StoreConfig) -> BackendResult<Box<dyn Backend>> {
        Ok(Box::new(SqlBackend::open(&config.backend_config())?))
    }
}

struct FlatProvider;

impl DriverProvider for FlatProvider {
    fn id(&self) -> &str {
        FLAT_DRIVER
    }

    fn supported(&self, _config: &StoreConfig) -> bool {
        // Always claimed; the init-time write probe is the real check.
        true
    }

    fn open(&self, config: &StoreConfig) -> BackendResult<Box<dyn Backend>> {
        Ok(Box::new(FlatBackend::open(&config.backend_config())))
    }
}
