//! Exchange storage, live subscriptions and HAR export

mod exchange_store;
mod har;

pub use exchange_store::{ExchangeStore, StoreEvent, DATABASE_FILE};
pub use har::{exchanges_to_har, export_har_to_path};

use crate::models::Exchange;
use futures::future::BoxFuture;
use futures::FutureExt;
use once_cell::sync::Lazy;
use std::sync::{Arc, Mutex};

static STORE: Lazy<Mutex<Option<Arc<ExchangeStore>>>> = Lazy::new(|| Mutex::new(None));

/// The two store operations the capture pipeline needs.
pub trait ExchangeRepository: Send + Sync {
    /// Persist a new record, returning its assigned identity
    fn insert_exchange<'a>(&'a self, exchange: &'a Exchange) -> BoxFuture<'a, anyhow::Result<i64>>;
    /// Overwrite the record with the same identity
    fn update_exchange<'a>(&'a self, exchange: &'a Exchange) -> BoxFuture<'a, anyhow::Result<()>>;
}

impl ExchangeRepository for ExchangeStore {
    fn insert_exchange<'a>(&'a self, exchange: &'a Exchange) -> BoxFuture<'a, anyhow::Result<i64>> {
        self.insert(exchange).boxed()
    }

    fn update_exchange<'a>(&'a self, exchange: &'a Exchange) -> BoxFuture<'a, anyhow::Result<()>> {
        self.update(exchange).boxed()
    }
}

/// Open the process-wide store under `storage_path`, or return the one already open.
///
/// Concurrent first calls still produce a single handle. Later calls ignore
/// `storage_path`.
pub fn init_exchange_store(storage_path: &str) -> anyhow::Result<Arc<ExchangeStore>> {
    let mut guard = STORE
        .lock()
        .map_err(|e| anyhow::anyhow!("lock poisoned: {}", e))?;
    if let Some(store) = guard.as_ref() {
        return Ok(Arc::clone(store));
    }
    let store = Arc::new(ExchangeStore::open(storage_path)?);
    *guard = Some(Arc::clone(&store));
    Ok(store)
}

/// The process-wide store, if [`init_exchange_store`] has run
pub fn shared_store() -> anyhow::Result<Arc<ExchangeStore>> {
    let guard = STORE
        .lock()
        .map_err(|e| anyhow::anyhow!("lock poisoned: {}", e))?;
    guard
        .clone()
        .ok_or_else(|| anyhow::anyhow!("exchange store not initialized"))
}

/// Reset the store for testing purposes. This allows tests to re-initialize
/// with a fresh storage path.
#[cfg(test)]
pub fn reset_store_for_tests(storage_path: &str) -> anyhow::Result<Arc<ExchangeStore>> {
    let mut guard = STORE
        .lock()
        .map_err(|e| anyhow::anyhow!("lock poisoned: {}", e))?;
    *guard = None;
    let store = Arc::new(ExchangeStore::open(storage_path)?);
    *guard = Some(Arc::clone(&store));
    Ok(store)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use tempfile::tempdir;

    #[test]
    #[serial]
    fn shared_store_is_initialised_once() {
        let first_dir = tempdir().expect("temp dir");
        let second_dir = tempdir().expect("temp dir");
        let first = reset_store_for_tests(first_dir.path().to_str().unwrap()).expect("reset");

        let again = init_exchange_store(second_dir.path().to_str().unwrap()).expect("init");
        assert!(Arc::ptr_eq(&first, &again));
        assert!(Arc::ptr_eq(&first, &shared_store().expect("shared")));
        assert!(!second_dir.path().join(DATABASE_FILE).exists());
    }

    #[test]
    #[serial]
    fn concurrent_first_use_yields_one_handle() {
        let dir = tempdir().expect("temp dir");
        let path = dir.path().to_str().unwrap().to_string();
        {
            let mut guard = STORE.lock().unwrap();
            *guard = None;
        }

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let path = path.clone();
                std::thread::spawn(move || init_exchange_store(&path).expect("init"))
            })
            .collect();
        let stores: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert!(stores.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));
    }

    #[tokio::test]
    async fn repository_seam_delegates_to_store() {
        let dir = tempdir().expect("temp dir");
        let store = ExchangeStore::open(dir.path().to_str().unwrap()).expect("open");
        let repo: &dyn ExchangeRepository = &store;

        let id = repo
            .insert_exchange(&Exchange::default())
            .await
            .expect("insert");
        let updated = Exchange {
            id,
            response_code: 204,
            ..Exchange::default()
        };
        repo.update_exchange(&updated).await.expect("update");
        assert_eq!(store.query(id).await.unwrap().unwrap().response_code, 204);
    }
}
