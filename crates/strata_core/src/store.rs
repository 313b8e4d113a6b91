//! The store facade.

use crate::config::{StoreConfig, StoreOptions};
use crate::context::{ConnectionRegistry, DbContext, Op, OpReply};
use crate::error::{StoreError, StoreResult};
use crate::registry::DriverRegistry;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use strata_backend::{BackendError, DropTarget};
use strata_codec::Value;
use tracing::{debug, warn};

/// The process-wide registries a store needs: drivers and connections.
///
/// Construct once at startup and pass into every [`Store`]; nothing here
/// is an implicit singleton, so tests can run isolated worlds.
pub struct Registries {
    drivers: DriverRegistry,
    connections: ConnectionRegistry,
}

impl Registries {
    /// Creates the registries with the built-in drivers registered.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            drivers: DriverRegistry::new(),
            connections: ConnectionRegistry::new(),
        })
    }

    /// The driver registry.
    #[must_use]
    pub fn drivers(&self) -> &DriverRegistry {
        &self.drivers
    }

    /// The connection registry.
    #[must_use]
    pub fn connections(&self) -> &ConnectionRegistry {
        &self.connections
    }
}

struct Selected {
    context: DbContext,
}

/// A handle to one store of one database.
///
/// The facade selects a driver (negotiating down the preference list),
/// owns the configuration, and forwards every operation to the database's
/// shared connection context once readiness is established. All operations
/// are futures; failures come back as [`StoreError`] values, never panics.
///
/// # Example
///
/// ```no_run
/// # async fn demo() -> strata_core::StoreResult<()> {
/// use strata_core::{Registries, Store, StoreConfig, Value};
///
/// let registries = Registries::new();
/// let store = Store::new(
///     registries,
///     StoreConfig::new().name("appdb").store_name("kv").root_dir("/var/lib/app"),
/// );
///
/// store.set("greeting", Value::text("hello")).await?;
/// assert_eq!(store.get("greeting").await?, Some(Value::text("hello")));
/// # Ok(())
/// # }
/// ```
pub struct Store {
    registries: Arc<Registries>,
    config: RwLock<StoreConfig>,
    state: tokio::sync::Mutex<Option<Selected>>,
    selected_id: RwLock<Option<String>>,
    ready: AtomicBool,
}

impl Store {
    /// Creates a store over the given registries and configuration.
    ///
    /// No driver is selected and nothing touches storage until the first
    /// operation (or an explicit [`Store::set_driver`] / [`Store::ready`]).
    #[must_use]
    pub fn new(registries: Arc<Registries>, config: StoreConfig) -> Self {
        Self {
            registries,
            config: RwLock::new(config),
            state: tokio::sync::Mutex::new(None),
            selected_id: RwLock::new(None),
            ready: AtomicBool::new(false),
        }
    }

    /// Creates another store sharing this one's registries.
    #[must_use]
    pub fn create_instance(&self, config: StoreConfig) -> Self {
        Self::new(Arc::clone(&self.registries), config)
    }

    /// Merges configuration options.
    ///
    /// Supplying a `driver` list triggers re-selection immediately.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Config`] once the store has become ready, or
    /// for invalid option values.
    pub async fn configure(&self, options: StoreOptions) -> StoreResult<()> {
        if self.ready.load(Ordering::SeqCst) {
            return Err(StoreError::config(
                "cannot change configuration after the store has been used",
            ));
        }

        let driver = options.driver.clone();
        self.config.write().apply(options)?;

        if let Some(prefs) = driver {
            self.set_driver(&prefs).await?;
        }
        Ok(())
    }

    /// Selects the first supported driver from the list, trying each in
    /// order until one initializes.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NoAvailableDriver`] when none of the
    /// requested drivers is supported or all fail to initialize.
    pub async fn set_driver<S: AsRef<str>>(&self, drivers: &[S]) -> StoreResult<()> {
        let mut state = self.state.lock().await;
        self.select(&mut state, drivers).await
    }

    /// Resolves once driver selection and the backend's readiness chain
    /// are both satisfied. Every operation awaits this internally.
    ///
    /// # Errors
    ///
    /// Returns the driver-selection error when negotiation fails.
    pub async fn ready(&self) -> StoreResult<()> {
        self.active().await.map(|_| ())
    }

    /// The id of the selected driver, if selection has happened.
    #[must_use]
    pub fn driver(&self) -> Option<String> {
        self.selected_id.read().clone()
    }

    /// A snapshot of the current configuration.
    #[must_use]
    pub fn config(&self) -> StoreConfig {
        self.config.read().clone()
    }

    /// Reads the value under `key`, or `None` when absent.
    ///
    /// # Errors
    ///
    /// Returns a backend or codec error.
    pub async fn get(&self, key: &str) -> StoreResult<Option<Value>> {
        let (context, store) = self.active().await?;
        match context
            .request(Op::Get {
                store,
                key: key.to_string(),
            })
            .await?
        {
            OpReply::Value(v) => Ok(v),
            _ => Err(reply_mismatch()),
        }
    }

    /// Stores `value` under `key`, replacing any existing entry.
    ///
    /// # Errors
    ///
    /// Returns a backend or codec error, including quota exhaustion.
    pub async fn set(&self, key: &str, value: impl Into<Value>) -> StoreResult<()> {
        let (context, store) = self.active().await?;
        match context
            .request(Op::Set {
                store,
                key: key.to_string(),
                value: value.into(),
            })
            .await?
        {
            OpReply::Unit => Ok(()),
            _ => Err(reply_mismatch()),
        }
    }

    /// Deletes the entry under `key`; deleting a missing key succeeds.
    ///
    /// # Errors
    ///
    /// Returns a backend error.
    pub async fn remove(&self, key: &str) -> StoreResult<()> {
        let (context, store) = self.active().await?;
        match context
            .request(Op::Remove {
                store,
                key: key.to_string(),
            })
            .await?
        {
            OpReply::Unit => Ok(()),
            _ => Err(reply_mismatch()),
        }
    }

    /// Deletes every entry in this store.
    ///
    /// # Errors
    ///
    /// Returns a backend error.
    pub async fn clear(&self) -> StoreResult<()> {
        let (context, store) = self.active().await?;
        match context.request(Op::Clear { store }).await? {
            OpReply::Unit => Ok(()),
            _ => Err(reply_mismatch()),
        }
    }

    /// The number of entries in this store.
    ///
    /// # Errors
    ///
    /// Returns a backend error.
    pub async fn length(&self) -> StoreResult<usize> {
        let (context, store) = self.active().await?;
        match context.request(Op::Length { store }).await? {
            OpReply::Length(n) => Ok(n),
            _ => Err(reply_mismatch()),
        }
    }

    /// The key at `index` in backend-native order, or `None` when out of
    /// range.
    ///
    /// # Errors
    ///
    /// Returns a backend error.
    pub async fn key_at(&self, index: usize) -> StoreResult<Option<String>> {
        let (context, store) = self.active().await?;
        match context.request(Op::KeyAt { store, index }).await? {
            OpReply::Key(k) => Ok(k),
            _ => Err(reply_mismatch()),
        }
    }

    /// Every key in backend-native order.
    ///
    /// # Errors
    ///
    /// Returns a backend error.
    pub async fn keys(&self) -> StoreResult<Vec<String>> {
        let (context, store) = self.active().await?;
        match context.request(Op::Keys { store }).await? {
            OpReply::Keys(keys) => Ok(keys),
            _ => Err(reply_mismatch()),
        }
    }

    /// Visits every entry in backend-native order as
    /// `visitor(value, key, index)` with `index` starting at 1. The
    /// iteration stops early when the visitor returns `Some`, which
    /// becomes the result.
    ///
    /// # Errors
    ///
    /// Returns a backend or codec error.
    pub async fn iterate<F>(&self, visitor: F) -> StoreResult<Option<Value>>
    where
        F: FnMut(Value, &str, u64) -> Option<Value> + Send + 'static,
    {
        let (context, store) = self.active().await?;
        match context
            .request(Op::Iterate {
                store,
                visitor: Box::new(visitor),
            })
            .await?
        {
            OpReply::Iterated(result) => Ok(result),
            _ => Err(reply_mismatch()),
        }
    }

    /// Deletes a store, or a whole database when `store_name` is `None`
    /// in the target. With no target, drops this facade's own store.
    ///
    /// # Errors
    ///
    /// Returns a backend error.
    pub async fn drop_instance(&self, target: Option<DropTarget>) -> StoreResult<()> {
        let target = target.unwrap_or_else(|| {
            let config = self.config.read();
            DropTarget {
                name: config.name.clone(),
                store_name: Some(config.store_name.clone()),
            }
        });

        let (context, _store) = self.active().await?;
        match context.request(Op::Drop { target }).await? {
            OpReply::Unit => Ok(()),
            _ => Err(reply_mismatch()),
        }
    }

    async fn active(&self) -> StoreResult<(DbContext, String)> {
        let mut state = self.state.lock().await;
        if state.is_none() {
            let prefs = self.config.read().driver.clone();
            self.select(&mut state, &prefs).await?;
        }
        let selected = state.as_ref().ok_or(StoreError::NoAvailableDriver)?;
        Ok((
            selected.context.clone(),
            self.config.read().store_name.clone(),
        ))
    }

    async fn select<S: AsRef<str>>(
        &self,
        state: &mut Option<Selected>,
        drivers: &[S],
    ) -> StoreResult<()> {
        let config = self.config.read().clone();
        let supported = self
            .registries
            .drivers()
            .supported_from_list(drivers, &config);

        for id in supported {
            let Ok(provider) = self.registries.drivers().get(&id) else {
                continue;
            };
            let context = self.registries.connections().context(&provider, &config);
            let init = context
                .request(Op::Init {
                    store: config.store_name.clone(),
                    version: config.version,
                })
                .await;

            match init {
                Ok(_) => {
                    debug!(driver = %id, database = %config.name, "driver selected");
                    self.config.write().driver = vec![id.clone()];
                    *self.selected_id.write() = Some(id);
                    *state = Some(Selected { context });
                    self.ready.store(true, Ordering::SeqCst);
                    return Ok(());
                }
                Err(e) => {
                    warn!(
                        driver = %id,
                        error = %e,
                        "driver failed to initialize; trying the next one"
                    );
                }
            }
        }

        Err(StoreError::NoAvailableDriver)
    }
}

fn reply_mismatch() -> StoreError {
    StoreError::Backend(BackendError::connection(
        "connection worker returned a mismatched reply",
    ))
}
