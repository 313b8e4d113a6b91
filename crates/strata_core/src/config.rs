//! Store configuration.

use crate::error::{StoreError, StoreResult};
use crate::registry;
use std::path::PathBuf;
use strata_backend::{BackendConfig, DEFAULT_STORE_NAME};

/// Configuration for one store facade.
///
/// `name` identifies the database, `store_name` the store within it; two
/// facades with the same pair observe the same entries. The `driver` list
/// is the ordered driver preference used when none is selected explicitly.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Database identifier.
    pub name: String,
    /// Store (table) identifier. Sanitized to `[A-Za-z0-9_]`.
    pub store_name: String,
    /// Schema version, starting at 1.
    pub version: u32,
    /// Byte quota hint; applied by the SQL backend only.
    pub size: u64,
    /// Free-text description; not interpreted.
    pub description: String,
    /// Ordered driver preference.
    pub driver: Vec<String>,
    /// Directory under which backends place their files.
    pub root_dir: PathBuf,
    /// Forces the structured backend to treat binary payloads as text.
    ///
    /// Exercises the serializer fallback path; mainly useful in tests.
    pub force_text_payloads: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            name: "strata".to_string(),
            store_name: DEFAULT_STORE_NAME.to_string(),
            version: 1,
            // Just under 5 MB.
            size: 4_980_736,
            description: String::new(),
            driver: registry::default_driver_order(),
            root_dir: PathBuf::from("strata-data"),
            force_text_payloads: false,
        }
    }
}

impl StoreConfig {
    /// Creates a configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the database name.
    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Sets the store name (sanitized to `[A-Za-z0-9_]`).
    #[must_use]
    pub fn store_name(mut self, store_name: impl Into<String>) -> Self {
        self.store_name = sanitize_store_name(&store_name.into());
        self
    }

    /// Sets the schema version.
    #[must_use]
    pub const fn version(mut self, version: u32) -> Self {
        self.version = version;
        self
    }

    /// Sets the byte quota hint.
    #[must_use]
    pub const fn size(mut self, size: u64) -> Self {
        self.size = size;
        self
    }

    /// Sets the description.
    #[must_use]
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Sets the ordered driver preference.
    #[must_use]
    pub fn driver(mut self, driver: Vec<String>) -> Self {
        self.driver = driver;
        self
    }

    /// Sets the root directory for backend files.
    #[must_use]
    pub fn root_dir(mut self, root_dir: impl Into<PathBuf>) -> Self {
        self.root_dir = root_dir.into();
        self
    }

    /// The backend-facing view of this configuration.
    #[must_use]
    pub fn backend_config(&self) -> BackendConfig {
        BackendConfig {
            name: self.name.clone(),
            root_dir: self.root_dir.clone(),
            version: self.version,
            size: self.size,
            description: self.description.clone(),
            force_text_payloads: self.force_text_payloads,
        }
    }

    /// Merges recognized options into this configuration.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Config`] for an invalid version.
    pub fn apply(&mut self, options: StoreOptions) -> StoreResult<()> {
        if let Some(version) = options.version {
            if version == 0 {
                return Err(StoreError::config("version must be at least 1"));
            }
            self.version = version;
        }
        if let Some(name) = options.name {
            self.name = name;
        }
        if let Some(store_name) = options.store_name {
            self.store_name = sanitize_store_name(&store_name);
        }
        if let Some(size) = options.size {
            self.size = size;
        }
        if let Some(description) = options.description {
            self.description = description;
        }
        if let Some(driver) = options.driver {
            self.driver = driver;
        }
        if let Some(root_dir) = options.root_dir {
            self.root_dir = root_dir;
        }
        Ok(())
    }
}

/// Partial configuration for [`crate::Store::configure`]; unset fields are
/// left untouched.
#[derive(Debug, Clone, Default)]
pub struct StoreOptions {
    /// New database name.
    pub name: Option<String>,
    /// New store name.
    pub store_name: Option<String>,
    /// New schema version.
    pub version: Option<u32>,
    /// New quota hint.
    pub size: Option<u64>,
    /// New description.
    pub description: Option<String>,
    /// New driver preference; triggers re-selection when set.
    pub driver: Option<Vec<String>>,
    /// New root directory.
    pub root_dir: Option<PathBuf>,
}

/// Replaces every character outside `[A-Za-z0-9_]` with an underscore.
#[must_use]
pub fn sanitize_store_name(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect()
}
