//! Per-database connection contexts and their worker tasks.
//!
//! One [`DbContext`] exists per (driver, root, database name); every facade
//! pointing at that database shares it. The context is the sending half of
//! an operation queue. The single consumer, the worker task, owns the
//! backend handle exclusively. Draining jobs in channel order gives the
//! total-ordering guarantee: an operation enqueued before another always
//! completes first, across facades.
//!
//! The worker also runs the connection state machine. A job failing with a
//! stale-handle error makes it drop the handle, reopen through the driver
//! provider, re-establish every ensured store, and retry the job exactly
//! once before surfacing the failure.

use crate::config::StoreConfig;
use crate::error::{StoreError, StoreResult};
use crate::registry::DriverProvider;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use strata_backend::{Backend, BackendError, BackendResult, DropTarget};
use strata_codec::Value;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

/// Boxed iteration visitor shipped to the worker.
pub(crate) type IterVisitor = Box<dyn FnMut(Value, &str, u64) -> Option<Value> + Send>;

/// One queued operation.
pub(crate) enum Op {
    /// Make a store usable at a version (driver init / readiness).
    Init {
        /// Store to ensure.
        store: String,
        /// Requested schema version.
        version: u32,
    },
    /// Read a value.
    Get {
        /// Store name.
        store: String,
        /// Entry key.
        key: String,
    },
    /// Write a value.
    Set {
        /// Store name.
        store: String,
        /// Entry key.
        key: String,
        /// Value to store.
        value: Value,
    },
    /// Delete a key.
    Remove {
        /// Store name.
        store: String,
        /// Entry key.
        key: String,
    },
    /// Delete every entry of a store.
    Clear {
        /// Store name.
        store: String,
    },
    /// Count entries.
    Length {
        /// Store name.
        store: String,
    },
    /// Key at an index in backend-native order.
    KeyAt {
        /// Store name.
        store: String,
        /// Zero-based index.
        index: usize,
    },
    /// Every key in backend-native order.
    Keys {
        /// Store name.
        store: String,
    },
    /// Visit entries until the visitor stops.
    Iterate {
        /// Store name.
        store: String,
        /// The visitor closure.
        visitor: IterVisitor,
    },
    /// Delete a store or database.
    Drop {
        /// What to delete.
        target: DropTarget,
    },
}

/// Reply to a queued operation.
pub(crate) enum OpReply {
    /// Operation completed with no payload.
    Unit,
    /// A read value.
    Value(Option<Value>),
    /// An entry count.
    Length(usize),
    /// A key lookup.
    Key(Option<String>),
    /// A key listing.
    Keys(Vec<String>),
    /// An iteration result (early-exit value).
    Iterated(Option<Value>),
}

struct Job {
    op: Op,
    reply: oneshot::Sender<StoreResult<OpReply>>,
}

/// Shared handle to one database's operation queue.
#[derive(Clone)]
pub(crate) struct DbContext {
    sender: mpsc::UnboundedSender<Job>,
}

impl DbContext {
    /// Enqueues an operation and awaits its reply.
    pub(crate) async fn request(&self, op: Op) -> StoreResult<OpReply> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(Job { op, reply: tx })
            .map_err(|_| worker_gone())?;
        rx.await.map_err(|_| worker_gone())?
    }
}

fn worker_gone() -> StoreError {
    StoreError::Backend(BackendError::connection("connection worker terminated"))
}

/// Registry of live database contexts.
///
/// Construct once per process (usually via [`crate::Registries`]) and
/// inject into every facade. Contexts live until process exit; explicit
/// database deletion closes the underlying handle but keeps the queue, so
/// the next operation reopens from scratch.
pub struct ConnectionRegistry {
    contexts: Mutex<HashMap<ContextKey, DbContext>>,
}

#[derive(Hash, PartialEq, Eq)]
struct ContextKey {
    driver: String,
    root_dir: PathBuf,
    name: String,
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionRegistry {
    /// Creates an empty connection registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            contexts: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the context for the configured database, spawning its
    /// worker on first use.
    pub(crate) fn context(
        &self,
        provider: &Arc<dyn DriverProvider>,
        config: &StoreConfig,
    ) -> DbContext {
        let key = ContextKey {
            driver: provider.id().to_string(),
            root_dir: config.root_dir.clone(),
            name: config.name.clone(),
        };

        let mut contexts = self.contexts.lock();
        if let Some(context) = contexts.get(&key) {
            return context.clone();
        }

        let (sender, receiver) = mpsc::unbounded_channel();
        let worker = Worker {
            provider: Arc::clone(provider),
            config: config.clone(),
            backend: None,
            state: ConnectionState::Closed,
            ensured: HashMap::new(),
        };
        tokio::spawn(worker.run(receiver));

        let context = DbContext { sender };
        contexts.insert(key, context.clone());
        context
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConnectionState {
    Closed,
    Opening,
    Open,
    Reconnecting,
}

struct Worker {
    provider: Arc<dyn DriverProvider>,
    config: StoreConfig,
    backend: Option<Box<dyn Backend>>,
    state: ConnectionState,
    /// Stores ensured on this connection, re-established after reconnect.
    ensured: HashMap<String, u32>,
}

impl Worker {
    async fn run(mut self, mut receiver: mpsc::UnboundedReceiver<Job>) {
        while let Some(job) = receiver.recv().await {
            let result = self.execute(job.op);
            // A dropped caller is not an error; the operation completed.
            let _ = job.reply.send(result);
        }
        debug!(database = %self.config.name, "connection worker shutting down");
    }

    fn execute(&mut self, mut op: Op) -> StoreResult<OpReply> {
        self.open_if_needed()?;

        match self.apply(&mut op) {
            Err(e) if e.is_stale() => {
                warn!(
                    database = %self.config.name,
                    error = %e,
                    "stale connection; reopening and retrying once"
                );
                self.state = ConnectionState::Reconnecting;
                self.backend = None;
                self.open_if_needed()?;
                self.apply(&mut op).map_err(Into::into)
            }
            result => result.map_err(Into::into),
        }
    }

    fn open_if_needed(&mut self) -> StoreResult<()> {
        if self.backend.is_some() {
            return Ok(());
        }

        let reconnecting = self.state == ConnectionState::Reconnecting;
        self.state = ConnectionState::Opening;
        match self.try_open() {
            Ok(backend) => {
                self.backend = Some(backend);
                self.state = ConnectionState::Open;
                if reconnecting {
                    debug!(database = %self.config.name, "connection re-established");
                }
                Ok(())
            }
            Err(e) => {
                self.state = ConnectionState::Closed;
                Err(e.into())
            }
        }
    }

    fn try_open(&self) -> BackendResult<Box<dyn Backend>> {
        let mut backend = self.provider.open(&self.config)?;
        // Every store this connection had ensured comes back at its
        // version, so sharing facades observe the fresh handle upgraded.
        for (store, version) in &self.ensured {
            backend.ensure_store(store, *version)?;
        }
        Ok(backend)
    }

    fn apply(&mut self, op: &mut Op) -> BackendResult<OpReply> {
        let backend = self
            .backend
            .as_mut()
            .ok_or_else(|| BackendError::stale("no open connection"))?;

        match op {
            Op::Init { store, version } => {
                backend.ensure_store(store, *version)?;
                self.ensured.insert(store.clone(), *version);
                Ok(OpReply::Unit)
            }
            Op::Get { store, key } => backend.get(store, key).map(OpReply::Value),
            Op::Set { store, key, value } => {
                backend.set(store, key, value).map(|()| OpReply::Unit)
            }
            Op::Remove { store, key } => backend.remove(store, key).map(|()| OpReply::Unit),
            Op::Clear { store } => backend.clear(store).map(|()| OpReply::Unit),
            Op::Length { store } => backend.length(store).map(OpReply::Length),
            Op::KeyAt { store, index } => backend.key_at(store, *index).map(OpReply::Key),
            Op::Keys { store } => backend.keys(store).map(OpReply::Keys),
            Op::Iterate { store, visitor } => {
                backend.iterate(store, visitor.as_mut()).map(OpReply::Iterated)
            }
            Op::Drop { target } => {
                backend.drop_instance(target)?;
                if target.name == self.config.name {
                    match &target.store_name {
                        // Whole database gone: the handle is closed; the
                        // next operation reopens from scratch.
                        None => {
                            self.ensured.clear();
                            self.backend = None;
                            self.state = ConnectionState::Closed;
                        }
                        Some(store) => {
                            self.ensured.remove(store);
                        }
                    }
                }
                Ok(OpReply::Unit)
            }
        }
    }
}
