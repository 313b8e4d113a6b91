//! Integration tests for the store facade, driver negotiation, shared
//! connection contexts, and stale-handle recovery.

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use strata_backend::{Backend, BackendResult, DropTarget, StructuredBackend, Visitor};
use strata_core::{
    DriverProvider, JsonStore, Registries, Store, StoreConfig, StoreError, StoreOptions,
    StoreResult, Value, FLAT_DRIVER, SQL_DRIVER, STRUCTURED_DRIVER,
};

fn test_config(root: &Path) -> StoreConfig {
    StoreConfig::new()
        .name("testdb")
        .store_name("kv")
        .version(1)
        .root_dir(root)
}

fn store_on(registries: &Arc<Registries>, root: &Path) -> Store {
    Store::new(Arc::clone(registries), test_config(root))
}

async fn run_contract_scenario(driver: &str) -> StoreResult<()> {
    let dir = tempfile::tempdir().unwrap();
    let registries = Registries::new();
    let store = store_on(&registries, dir.path());
    store.set_driver(&[driver]).await?;
    assert_eq!(store.driver().as_deref(), Some(driver));

    store
        .set("a", Value::Json(serde_json::json!({"x": 1})))
        .await?;
    assert_eq!(
        store.get("a").await?,
        Some(Value::Json(serde_json::json!({"x": 1})))
    );
    assert_eq!(store.length().await?, 1);
    assert_eq!(store.key_at(0).await?.as_deref(), Some("a"));
    assert_eq!(store.keys().await?, vec!["a"]);

    store
        .drop_instance(Some(DropTarget {
            name: "testdb".into(),
            store_name: Some("kv".into()),
        }))
        .await?;
    assert_eq!(store.get("a").await?, None);
    Ok(())
}

#[tokio::test]
async fn contract_scenario_structured() {
    run_contract_scenario(STRUCTURED_DRIVER).await.unwrap();
}

#[tokio::test]
async fn contract_scenario_sql() {
    run_contract_scenario(SQL_DRIVER).await.unwrap();
}

#[tokio::test]
async fn contract_scenario_flat() {
    run_contract_scenario(FLAT_DRIVER).await.unwrap();
}

#[tokio::test]
async fn remove_and_clear() {
    let dir = tempfile::tempdir().unwrap();
    let registries = Registries::new();
    let store = store_on(&registries, dir.path());

    store.set("a", Value::text("1")).await.unwrap();
    store.set("b", Value::text("2")).await.unwrap();

    store.remove("a").await.unwrap();
    assert_eq!(store.get("a").await.unwrap(), None);

    store.clear().await.unwrap();
    assert!(store.keys().await.unwrap().is_empty());
    assert_eq!(store.length().await.unwrap(), 0);
}

#[tokio::test]
async fn stored_null_reads_back_as_null() {
    let dir = tempfile::tempdir().unwrap();
    let registries = Registries::new();
    let store = store_on(&registries, dir.path());

    store.set("nothing", Value::null()).await.unwrap();
    assert_eq!(store.get("nothing").await.unwrap(), Some(Value::null()));
}

#[tokio::test]
async fn binary_values_roundtrip() {
    let dir = tempfile::tempdir().unwrap();
    let registries = Registries::new();
    let store = store_on(&registries, dir.path());

    let value = Value::Float64(vec![1.5, -2.25, 1e100]);
    store.set("samples", value.clone()).await.unwrap();
    assert_eq!(store.get("samples").await.unwrap(), Some(value));
}

#[tokio::test]
async fn facades_sharing_a_database_observe_each_other() {
    let dir = tempfile::tempdir().unwrap();
    let registries = Registries::new();
    let a = store_on(&registries, dir.path());
    let b = a.create_instance(test_config(dir.path()));

    a.set("x", Value::from(1i64)).await.unwrap();
    assert_eq!(b.get("x").await.unwrap(), Some(Value::from(1i64)));

    b.remove("x").await.unwrap();
    assert_eq!(a.get("x").await.unwrap(), None);
}

#[tokio::test]
async fn unsupported_driver_rejects() {
    let dir = tempfile::tempdir().unwrap();
    let registries = Registries::new();
    let store = store_on(&registries, dir.path());

    let err = store.set_driver(&["no-such-driver"]).await.unwrap_err();
    assert!(matches!(err, StoreError::NoAvailableDriver));
}

#[tokio::test]
async fn negotiation_falls_through_to_supported_driver() {
    let dir = tempfile::tempdir().unwrap();
    let registries = Registries::new();
    let store = store_on(&registries, dir.path());

    store
        .set_driver(&["no-such-driver", FLAT_DRIVER])
        .await
        .unwrap();
    assert_eq!(store.driver().as_deref(), Some(FLAT_DRIVER));

    store.set("k", Value::text("v")).await.unwrap();
    assert_eq!(store.get("k").await.unwrap(), Some(Value::text("v")));
}

#[tokio::test]
async fn iterate_early_exit_and_indices() {
    let dir = tempfile::tempdir().unwrap();
    let registries = Registries::new();
    let store = store_on(&registries, dir.path());

    for key in ["a", "b", "c"] {
        store.set(key, Value::text(key)).await.unwrap();
    }

    let result = store
        .iterate(|_value, key, index| {
            assert!(index >= 1);
            if key == "b" {
                Some(Value::text("found-b"))
            } else {
                None
            }
        })
        .await
        .unwrap();
    assert_eq!(result, Some(Value::text("found-b")));

    let full = store.iterate(|_value, _key, _index| None).await.unwrap();
    assert_eq!(full, None);
}

#[tokio::test]
async fn configure_is_frozen_after_first_use() {
    let dir = tempfile::tempdir().unwrap();
    let registries = Registries::new();
    let store = store_on(&registries, dir.path());

    store
        .configure(StoreOptions {
            description: Some("song cache".into()),
            ..StoreOptions::default()
        })
        .await
        .unwrap();

    store.set("k", Value::text("v")).await.unwrap();

    let err = store
        .configure(StoreOptions {
            name: Some("other".into()),
            ..StoreOptions::default()
        })
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::Config { .. }));
}

#[tokio::test]
async fn dropping_the_database_leaves_an_empty_one_behind() {
    let dir = tempfile::tempdir().unwrap();
    let registries = Registries::new();
    let store = store_on(&registries, dir.path());

    store.set("a", Value::text("1")).await.unwrap();
    store
        .drop_instance(Some(DropTarget {
            name: "testdb".into(),
            store_name: None,
        }))
        .await
        .unwrap();

    // The connection reopens from scratch on the next operation.
    assert_eq!(store.get("a").await.unwrap(), None);
    store.set("b", Value::text("2")).await.unwrap();
    assert_eq!(store.length().await.unwrap(), 1);
}

#[tokio::test]
async fn json_wrapper_roundtrip() {
    #[derive(serde::Serialize, serde::Deserialize, PartialEq, Debug)]
    struct Track {
        title: String,
        liked: bool,
    }

    let dir = tempfile::tempdir().unwrap();
    let registries = Registries::new();
    let wrapper = JsonStore::new(store_on(&registries, dir.path()));

    let track = Track {
        title: "Paranoid Android".into(),
        liked: true,
    };
    wrapper.put("track:1", &track).await.unwrap();
    assert_eq!(wrapper.get::<Track>("track:1").await.unwrap(), Some(track));

    wrapper.del("track:1").await.unwrap();
    assert_eq!(wrapper.get::<Track>("track:1").await.unwrap(), None);
}

// ---------------------------------------------------------------------------
// Stale-handle recovery
// ---------------------------------------------------------------------------

/// Delegating backend that fails reads with a stale error while armed.
struct FlakyBackend {
    inner: StructuredBackend,
    failures: Arc<AtomicUsize>,
}

impl FlakyBackend {
    fn take_failure(&self) -> bool {
        self.failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

impl Backend for FlakyBackend {
    fn ensure_store(&mut self, store: &str, version: u32) -> BackendResult<()> {
        self.inner.ensure_store(store, version)
    }

    fn get(&mut self, store: &str, key: &str) -> BackendResult<Option<Value>> {
        if self.take_failure() {
            return Err(strata_backend::BackendError::stale("simulated stale handle"));
        }
        self.inner.get(store, key)
    }

    fn set(&mut self, store: &str, key: &str, value: &Value) -> BackendResult<()> {
        self.inner.set(store, key, value)
    }

    fn remove(&mut self, store: &str, key: &str) -> BackendResult<()> {
        self.inner.remove(store, key)
    }

    fn clear(&mut self, store: &str) -> BackendResult<()> {
        self.inner.clear(store)
    }

    fn length(&mut self, store: &str) -> BackendResult<usize> {
        self.inner.length(store)
    }

    fn key_at(&mut self, store: &str, index: usize) -> BackendResult<Option<String>> {
        self.inner.key_at(store, index)
    }

    fn keys(&mut self, store: &str) -> BackendResult<Vec<String>> {
        self.inner.keys(store)
    }

    fn iterate(&mut self, store: &str, visitor: &mut Visitor<'_>) -> BackendResult<Option<Value>> {
        self.inner.iterate(store, visitor)
    }

    fn close(&mut self) {
        self.inner.close();
    }

    fn drop_instance(&mut self, target: &DropTarget) -> BackendResult<()> {
        self.inner.drop_instance(target)
    }
}

struct FlakyProvider {
    opens: Arc<AtomicUsize>,
    failures: Arc<AtomicUsize>,
}

impl DriverProvider for FlakyProvider {
    fn id(&self) -> &str {
        "flaky-structured"
    }

    fn supported(&self, _config: &StoreConfig) -> bool {
        true
    }

    fn open(&self, config: &StoreConfig) -> BackendResult<Box<dyn Backend>> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FlakyBackend {
            inner: StructuredBackend::open(&config.backend_config())?,
            failures: Arc::clone(&self.failures),
        }))
    }
}

#[tokio::test]
async fn stale_handle_is_recovered_with_one_retry() {
    let dir = tempfile::tempdir().unwrap();
    let registries = Registries::new();
    let opens = Arc::new(AtomicUsize::new(0));
    let failures = Arc::new(AtomicUsize::new(0));

    registries
        .drivers()
        .register(Arc::new(FlakyProvider {
            opens: Arc::clone(&opens),
            failures: Arc::clone(&failures),
        }))
        .unwrap();

    let store = store_on(&registries, dir.path());
    store.set_driver(&["flaky-structured"]).await.unwrap();
    store.set("a", Value::text("kept")).await.unwrap();
    assert_eq!(opens.load(Ordering::SeqCst), 1);

    // One transient stale failure: the caller still sees success.
    failures.store(1, Ordering::SeqCst);
    assert_eq!(store.get("a").await.unwrap(), Some(Value::text("kept")));
    assert_eq!(opens.load(Ordering::SeqCst), 2, "exactly one reconnect");

    // And the connection stays healthy afterwards.
    assert_eq!(store.get("a").await.unwrap(), Some(Value::text("kept")));
    assert_eq!(opens.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn second_consecutive_stale_failure_surfaces() {
    let dir = tempfile::tempdir().unwrap();
    let registries = Registries::new();
    let opens = Arc::new(AtomicUsize::new(0));
    let failures = Arc::new(AtomicUsize::new(0));

    registries
        .drivers()
        .register(Arc::new(FlakyProvider {
            opens: Arc::clone(&opens),
            failures: Arc::clone(&failures),
        }))
        .unwrap();

    let store = store_on(&registries, dir.path());
    store.set_driver(&["flaky-structured"]).await.unwrap();
    store.set("a", Value::text("kept")).await.unwrap();

    // The retry itself fails too: the error must surface, not loop.
    failures.store(2, Ordering::SeqCst);
    let err = store.get("a").await.unwrap_err();
    assert!(matches!(
        err,
        StoreError::Backend(e) if e.is_stale()
    ));
}
