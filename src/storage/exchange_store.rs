use crate::models::{Exchange, UNASSIGNED_ID};
use anyhow::Context;
use chrono::Utc;
use futures::stream::{self, BoxStream, StreamExt};
use rusqlite::{params, Connection, OptionalExtension};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast::{self, error::RecvError};

/// File name of the exchange database inside the storage directory
pub const DATABASE_FILE: &str = "http_monitor.sqlite";
const EVENT_CAPACITY: usize = 256;
const MAX_RECENT: u32 = 10_000;

/// Change notifications fanned out to live subscriptions
#[derive(Debug, Clone)]
pub enum StoreEvent {
    /// A record was inserted or updated
    Upserted(Exchange),
    /// Every record was deleted
    Cleared,
    /// Some records aged out
    Pruned,
}

pub struct ExchangeStore {
    db: Arc<Mutex<Connection>>,
    db_path: PathBuf,
    events: broadcast::Sender<StoreEvent>,
}

impl ExchangeStore {
    /// Open (or create) the exchange database under `base_path`.
    pub fn open(base_path: &str) -> anyhow::Result<Self> {
        let dir = Path::new(base_path);
        if !dir.exists() {
            fs::create_dir_all(dir)
                .with_context(|| format!("creating storage directory {:?}", dir))?;
        }
        let db_path = dir.join(DATABASE_FILE);
        let conn = Connection::open(&db_path)
            .with_context(|| format!("opening database at {:?}", db_path))?;
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS exchanges (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                request_date INTEGER,
                method TEXT,
                host TEXT,
                path TEXT,
                response_code INTEGER,
                data TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_exchanges_request_date
                ON exchanges(request_date);
            ",
        )?;

        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Ok(Self {
            db: Arc::new(Mutex::new(conn)),
            db_path,
            events,
        })
    }

    /// Persist a new record and return its identity.
    ///
    /// An unassigned id lets SQLite pick the next one; an explicit id must not exist yet.
    pub async fn insert(&self, exchange: &Exchange) -> anyhow::Result<i64> {
        let payload = serde_json::to_string(exchange)?;
        let record = exchange.clone();
        let id = run(&self.db, move |conn| {
            let explicit_id = (record.id != UNASSIGNED_ID).then_some(record.id);
            conn.execute(
                "INSERT INTO exchanges
                   (id, request_date, method, host, path, response_code, data)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    explicit_id,
                    record.request_date,
                    record.method,
                    record.host,
                    record.path,
                    record.response_code,
                    payload
                ],
            )
            .context("inserting exchange")?;
            Ok(conn.last_insert_rowid())
        })
        .await?;

        self.publish(StoreEvent::Upserted(Exchange {
            id,
            ..exchange.clone()
        }));
        Ok(id)
    }

    /// Replace the stored record with the same identity.
    pub async fn update(&self, exchange: &Exchange) -> anyhow::Result<()> {
        let payload = serde_json::to_string(exchange)?;
        let record = exchange.clone();
        let changed = run(&self.db, move |conn| {
            conn.execute(
                "UPDATE exchanges
                    SET request_date = ?2, method = ?3, host = ?4, path = ?5,
                        response_code = ?6, data = ?7
                  WHERE id = ?1",
                params![
                    record.id,
                    record.request_date,
                    record.method,
                    record.host,
                    record.path,
                    record.response_code,
                    payload
                ],
            )
            .context("updating exchange")
        })
        .await?;

        if changed == 0 {
            anyhow::bail!("exchange {} not found", exchange.id);
        }
        self.publish(StoreEvent::Upserted(exchange.clone()));
        Ok(())
    }

    /// Point lookup by identity
    pub async fn query(&self, id: i64) -> anyhow::Result<Option<Exchange>> {
        fetch_one(&self.db, id).await
    }

    /// Newest records first, at most `limit` of them
    pub async fn list_recent(&self, limit: u32) -> anyhow::Result<Vec<Exchange>> {
        fetch_recent(&self.db, limit).await
    }

    /// Every record, oldest first
    pub async fn list_all(&self) -> anyhow::Result<Vec<Exchange>> {
        run(&self.db, |conn| {
            let mut stmt = conn.prepare("SELECT id, data FROM exchanges ORDER BY id ASC")?;
            let mut rows = stmt.query([])?;
            let mut out = Vec::new();
            while let Some(row) = rows.next()? {
                out.push(decode_row(row)?);
            }
            Ok(out)
        })
        .await
    }

    /// Live view of one record.
    ///
    /// Yields the current value first, then every change to it. `None` means the
    /// record does not exist (never inserted, cleared, or pruned).
    pub async fn subscribe(&self, id: i64) -> anyhow::Result<BoxStream<'static, Option<Exchange>>> {
        let rx = self.events.subscribe();
        let current = self.query(id).await?;
        let db = Arc::clone(&self.db);

        let updates = stream::unfold((rx, db), move |(mut rx, db)| async move {
            loop {
                let next = match rx.recv().await {
                    Ok(StoreEvent::Upserted(exchange)) if exchange.id == id => Some(exchange),
                    Ok(StoreEvent::Upserted(_)) => continue,
                    Ok(StoreEvent::Cleared) => None,
                    Ok(StoreEvent::Pruned) | Err(RecvError::Lagged(_)) => {
                        match fetch_one(&db, id).await {
                            Ok(exchange) => exchange,
                            Err(err) => {
                                tracing::warn!("Refreshing exchange {} failed: {}", id, err);
                                continue;
                            }
                        }
                    }
                    Err(RecvError::Closed) => return None,
                };
                return Some((next, (rx, db)));
            }
        });

        Ok(stream::once(async move { current }).chain(updates).boxed())
    }

    /// Live view of the newest `limit` records, re-listed after every change.
    pub async fn subscribe_recent(
        &self,
        limit: u32,
    ) -> anyhow::Result<BoxStream<'static, Vec<Exchange>>> {
        let rx = self.events.subscribe();
        let current = self.list_recent(limit).await?;
        let db = Arc::clone(&self.db);

        let updates = stream::unfold((rx, db), move |(mut rx, db)| async move {
            loop {
                match rx.recv().await {
                    Ok(_) | Err(RecvError::Lagged(_)) => {}
                    Err(RecvError::Closed) => return None,
                }
                match fetch_recent(&db, limit).await {
                    Ok(list) => return Some((list, (rx, db))),
                    Err(err) => tracing::warn!("Refreshing recent exchanges failed: {}", err),
                }
            }
        });

        Ok(stream::once(async move { current }).chain(updates).boxed())
    }

    /// Delete every record and reclaim space
    pub async fn delete_all(&self) -> anyhow::Result<u64> {
        let deleted = run(&self.db, |conn| {
            let count = conn.execute("DELETE FROM exchanges", [])?;
            conn.execute_batch("VACUUM")?;
            Ok(count as u64)
        })
        .await?;

        tracing::info!("Cleared {} exchanges from database", deleted);
        self.publish(StoreEvent::Cleared);
        Ok(deleted)
    }

    /// Delete records whose request is older than `days` days
    pub async fn prune_older_than(&self, days: u32) -> anyhow::Result<u64> {
        let cutoff_ms = Utc::now().timestamp_millis() - i64::from(days) * 24 * 60 * 60 * 1000;
        let deleted = run(&self.db, move |conn| {
            let count = conn.execute(
                "DELETE FROM exchanges WHERE request_date < ?1",
                params![cutoff_ms],
            )?;
            if count > 0 {
                conn.execute_batch("VACUUM")?;
            }
            Ok(count as u64)
        })
        .await?;

        if deleted > 0 {
            tracing::info!("Pruned {} exchanges older than {} days", deleted, days);
            self.publish(StoreEvent::Pruned);
        }
        Ok(deleted)
    }

    pub async fn count(&self) -> anyhow::Result<u64> {
        run(&self.db, |conn| {
            let count: i64 = conn.query_row("SELECT COUNT(*) FROM exchanges", [], |row| row.get(0))?;
            Ok(count.max(0) as u64)
        })
        .await
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    fn publish(&self, event: StoreEvent) {
        // No receivers is fine
        let _ = self.events.send(event);
    }
}

/// Run a statement batch on the blocking pool with the connection locked.
async fn run<T, F>(db: &Arc<Mutex<Connection>>, f: F) -> anyhow::Result<T>
where
    T: Send + 'static,
    F: FnOnce(&Connection) -> anyhow::Result<T> + Send + 'static,
{
    let db = Arc::clone(db);
    tokio::task::spawn_blocking(move || {
        let conn = db
            .lock()
            .map_err(|e| anyhow::anyhow!("db mutex poisoned: {}", e))?;
        f(&conn)
    })
    .await
    .context("database task failed")?
}

async fn fetch_one(db: &Arc<Mutex<Connection>>, id: i64) -> anyhow::Result<Option<Exchange>> {
    run(db, move |conn| {
        let data: Option<String> = conn
            .query_row("SELECT data FROM exchanges WHERE id = ?1", params![id], |row| {
                row.get(0)
            })
            .optional()?;
        data.map(|data| -> anyhow::Result<Exchange> {
            let exchange: Exchange = serde_json::from_str(&data)?;
            Ok(Exchange { id, ..exchange })
        })
        .transpose()
    })
    .await
}

async fn fetch_recent(db: &Arc<Mutex<Connection>>, limit: u32) -> anyhow::Result<Vec<Exchange>> {
    let capped_limit = i64::from(limit.clamp(1, MAX_RECENT));
    run(db, move |conn| {
        let mut stmt = conn.prepare("SELECT id, data FROM exchanges ORDER BY id DESC LIMIT ?1")?;
        let mut rows = stmt.query(params![capped_limit])?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            out.push(decode_row(row)?);
        }
        Ok(out)
    })
    .await
}

// The id column is authoritative; the JSON payload may predate the assigned id.
fn decode_row(row: &rusqlite::Row<'_>) -> anyhow::Result<Exchange> {
    let id: i64 = row.get(0)?;
    let data: String = row.get(1)?;
    let exchange: Exchange = serde_json::from_str(&data)?;
    Ok(Exchange { id, ..exchange })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::UNKNOWN_RESPONSE_CODE;
    use std::time::Duration;
    use tempfile::tempdir;

    fn sample(path: &str, request_date: i64) -> Exchange {
        Exchange {
            url: format!("https://example.com{path}"),
            scheme: "https".into(),
            host: "example.com".into(),
            path: path.into(),
            method: "GET".into(),
            request_date,
            ..Exchange::default()
        }
    }

    fn open_store(dir: &tempfile::TempDir) -> ExchangeStore {
        ExchangeStore::open(dir.path().to_str().unwrap()).expect("store opens")
    }

    async fn next_item<T>(stream: &mut BoxStream<'static, T>) -> T {
        tokio::time::timeout(Duration::from_secs(5), stream.next())
            .await
            .expect("stream produced an item in time")
            .expect("stream still open")
    }

    #[tokio::test]
    async fn insert_assigns_identity_and_query_returns_it() {
        let dir = tempdir().expect("temp dir");
        let store = open_store(&dir);

        let first = store.insert(&sample("/a", 1_000)).await.expect("insert a");
        let second = store.insert(&sample("/b", 2_000)).await.expect("insert b");
        assert!(first > 0);
        assert!(second > first);

        let stored = store.query(first).await.expect("query ok").expect("present");
        assert_eq!(stored.id, first);
        assert_eq!(stored.path, "/a");
        assert_eq!(stored.response_code, UNKNOWN_RESPONSE_CODE);
        assert!(store.query(9_999).await.expect("query ok").is_none());
        assert!(store.db_path().ends_with(DATABASE_FILE));
    }

    #[tokio::test]
    async fn update_keeps_identity_and_rejects_unknown_ids() {
        let dir = tempdir().expect("temp dir");
        let store = open_store(&dir);

        let id = store.insert(&sample("/a", 1_000)).await.expect("insert");
        let completed = Exchange {
            id,
            response_code: 200,
            response_message: "OK".into(),
            ..sample("/a", 1_000)
        };
        store.update(&completed).await.expect("update");
        assert_eq!(store.count().await.expect("count"), 1);
        let stored = store.query(id).await.expect("query").expect("present");
        assert_eq!(stored, completed);

        let missing = Exchange {
            id: id + 100,
            ..completed
        };
        assert!(store.update(&missing).await.is_err());
    }

    #[tokio::test]
    async fn list_recent_is_newest_first_and_limited() {
        let dir = tempdir().expect("temp dir");
        let store = open_store(&dir);
        for i in 0..5 {
            store
                .insert(&sample(&format!("/{i}"), 1_000 + i))
                .await
                .expect("insert");
        }

        let recent = store.list_recent(3).await.expect("list");
        let paths: Vec<_> = recent.iter().map(|e| e.path.as_str()).collect();
        assert_eq!(paths, vec!["/4", "/3", "/2"]);

        let all = store.list_all().await.expect("list all");
        assert_eq!(all.first().map(|e| e.path.as_str()), Some("/0"));
        assert_eq!(all.len(), 5);
    }

    #[tokio::test]
    async fn delete_all_empties_the_table() {
        let dir = tempdir().expect("temp dir");
        let store = open_store(&dir);
        store.insert(&sample("/a", 1_000)).await.expect("insert");
        store.insert(&sample("/b", 1_000)).await.expect("insert");

        assert_eq!(store.delete_all().await.expect("clear"), 2);
        assert_eq!(store.count().await.expect("count"), 0);
    }

    #[tokio::test]
    async fn prune_removes_only_old_records() {
        let dir = tempdir().expect("temp dir");
        let store = open_store(&dir);
        let now = Utc::now().timestamp_millis();
        let old = store
            .insert(&sample("/old", now - 10 * 24 * 60 * 60 * 1000))
            .await
            .expect("insert old");
        let fresh = store.insert(&sample("/fresh", now)).await.expect("insert fresh");

        assert_eq!(store.prune_older_than(5).await.expect("prune"), 1);
        assert!(store.query(old).await.expect("query").is_none());
        assert!(store.query(fresh).await.expect("query").is_some());
    }

    #[tokio::test]
    async fn subscribe_follows_one_record() {
        let dir = tempdir().expect("temp dir");
        let store = open_store(&dir);
        let id = store.insert(&sample("/watched", 1_000)).await.expect("insert");

        let mut stream = store.subscribe(id).await.expect("subscribe");
        let initial = next_item(&mut stream).await.expect("present");
        assert_eq!(initial.response_code, UNKNOWN_RESPONSE_CODE);

        store.insert(&sample("/other", 1_000)).await.expect("insert other");
        let done = Exchange {
            id,
            response_code: 201,
            ..sample("/watched", 1_000)
        };
        store.update(&done).await.expect("update");
        let updated = next_item(&mut stream).await.expect("present");
        assert_eq!(updated.response_code, 201);

        store.delete_all().await.expect("clear");
        assert!(next_item(&mut stream).await.is_none());
    }

    #[tokio::test]
    async fn subscribe_recent_relists_on_change() {
        let dir = tempdir().expect("temp dir");
        let store = open_store(&dir);

        let mut stream = store.subscribe_recent(300).await.expect("subscribe");
        assert!(next_item(&mut stream).await.is_empty());

        store.insert(&sample("/a", 1_000)).await.expect("insert");
        let list = next_item(&mut stream).await;
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].path, "/a");

        store.delete_all().await.expect("clear");
        assert!(next_item(&mut stream).await.is_empty());
    }

    #[tokio::test]
    async fn records_survive_reopen() {
        let dir = tempdir().expect("temp dir");
        let id = {
            let store = open_store(&dir);
            store.insert(&sample("/persisted", 1_000)).await.expect("insert")
        };
        let store = open_store(&dir);
        let stored = store.query(id).await.expect("query").expect("present");
        assert_eq!(stored.path, "/persisted");
    }
}
