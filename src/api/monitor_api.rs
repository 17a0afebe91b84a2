use crate::capture::MonitorInterceptor;
use crate::format::{self, summary};
use crate::models::{path_with_query, status, Exchange, ExchangeStatus, HeaderPair};
use crate::notify::{RollingNotifier, SummaryNotifier, DEFAULT_BUFFER_SIZE};
use crate::storage::{self, ExchangeStore};
use crate::transport::{MonitoredClient, ReqwestTransport};
use crate::VERSION;
use anyhow::Context;
use futures::future;
use futures::stream::{BoxStream, StreamExt};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::level_filters::LevelFilter;

/// Rows shown by the list view
pub const DEFAULT_RECENT_LIMIT: u32 = 300;

/// Get the version of the monitor library
pub fn get_version() -> String {
    VERSION.to_string()
}

const LOG_FILE_PREFIX: &str = "http_monitor";

/// Install the process-wide `tracing` subscriber.
///
/// Debug builds write to stderr. Release builds write a daily rolling file under
/// `<storage_path>/logs`. Returns `false` when a subscriber was already installed.
pub fn init_core(storage_path: Option<String>) -> anyhow::Result<bool> {
    let subscriber = tracing_subscriber::fmt().with_max_level(resolve_log_level());

    let installed = if cfg!(debug_assertions) {
        subscriber.try_init().is_ok()
    } else {
        let log_dir = storage_path
            .map(PathBuf::from)
            .unwrap_or_default()
            .join("logs");
        std::fs::create_dir_all(&log_dir)
            .with_context(|| format!("creating log directory {}", log_dir.display()))?;
        let appender = tracing_appender::rolling::daily(&log_dir, LOG_FILE_PREFIX);
        let (writer, guard) = tracing_appender::non_blocking(appender);
        let installed = subscriber.with_writer(writer).try_init().is_ok();
        if installed {
            // The writer thread flushes until process exit.
            std::mem::forget(guard);
        }
        installed
    };

    if installed {
        tracing::info!("HTTP monitor {} logging at {}", VERSION, resolve_log_level());
    }
    Ok(installed)
}

/// Level named by `RUST_LOG`, `INFO` when unset or unrecognised.
pub fn resolve_log_level() -> LevelFilter {
    std::env::var("RUST_LOG")
        .ok()
        .and_then(|value| parse_level(&value))
        .unwrap_or(LevelFilter::INFO)
}

fn parse_level(value: &str) -> Option<LevelFilter> {
    let level = match value.trim().to_ascii_lowercase().as_str() {
        "off" => LevelFilter::OFF,
        "error" => LevelFilter::ERROR,
        "warn" | "warning" => LevelFilter::WARN,
        "info" => LevelFilter::INFO,
        "debug" => LevelFilter::DEBUG,
        "trace" => LevelFilter::TRACE,
        _ => return None,
    };
    Some(level)
}

/// Monitor configuration
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// Directory holding the database (and release-mode logs)
    pub storage_path: String,
    /// When false, the interceptor only forwards calls
    pub enabled: bool,
    /// Entries kept by the rolling notification
    pub notification_buffer_size: usize,
    /// Rows in the list view
    pub recent_limit: u32,
    /// Drop exchanges older than this many days on open
    pub prune_days: Option<u32>,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            storage_path: "./".to_string(),
            enabled: true,
            notification_buffer_size: DEFAULT_BUFFER_SIZE,
            recent_limit: DEFAULT_RECENT_LIMIT,
            prune_days: None,
        }
    }
}

/// One row of the exchange list
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListItem {
    pub id: i64,
    pub status: ExchangeStatus,
    /// "...", the response code, or "!!!"
    pub code_label: String,
    pub path_with_query: String,
    /// "scheme://host"
    pub origin: String,
    pub request_time: String,
    pub duration: String,
    pub total_size: String,
}

impl From<&Exchange> for ListItem {
    fn from(exchange: &Exchange) -> Self {
        Self {
            id: exchange.id,
            status: status(exchange),
            code_label: summary::response_code_label(exchange),
            path_with_query: path_with_query(exchange),
            origin: format!("{}://{}", exchange.scheme, exchange.host),
            request_time: format::format_date_short(exchange.request_date),
            duration: summary::request_duration(exchange),
            total_size: summary::total_size(exchange),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetailTab {
    Overview,
    Request,
    Response,
}

impl DetailTab {
    pub const ALL: [DetailTab; 3] = [DetailTab::Overview, DetailTab::Request, DetailTab::Response];

    pub fn title(&self) -> &'static str {
        match self {
            DetailTab::Overview => "Overview",
            DetailTab::Request => "Request",
            DetailTab::Response => "Response",
        }
    }
}

/// Headers plus pretty-printed body for one side of the exchange
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageView {
    pub headers: Vec<HeaderPair>,
    pub body: String,
}

/// Everything the detail screen shows for one exchange
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetailView {
    pub id: i64,
    /// "METHOD  path?query"
    pub title: String,
    pub tabs: Vec<DetailTab>,
    pub overview: Vec<HeaderPair>,
    pub request: MessageView,
    pub response: MessageView,
}

impl From<&Exchange> for DetailView {
    fn from(exchange: &Exchange) -> Self {
        Self {
            id: exchange.id,
            title: format!("{}  {}", exchange.method, path_with_query(exchange)),
            tabs: DetailTab::ALL.to_vec(),
            overview: format::build_overview(exchange),
            request: MessageView {
                headers: exchange.request_headers.clone(),
                body: format::format_body(&exchange.request_body, &exchange.request_content_type),
            },
            response: MessageView {
                headers: exchange.response_headers.clone(),
                body: format::format_body(
                    &exchange.response_body,
                    &exchange.response_content_type,
                ),
            },
        }
    }
}

/// The monitor service: store, notifier and interceptor wired from one config.
pub struct Monitor {
    store: Arc<ExchangeStore>,
    notifier: Arc<RollingNotifier>,
    interceptor: MonitorInterceptor,
    recent_limit: u32,
}

impl Monitor {
    /// Open the shared store under `config.storage_path` and build the service.
    pub async fn open(config: MonitorConfig) -> anyhow::Result<Self> {
        let store = storage::init_exchange_store(&config.storage_path)?;
        if let Some(days) = config.prune_days {
            store.prune_older_than(days).await?;
        }
        Ok(Self::with_store(store, &config))
    }

    /// Build the service around an explicitly constructed store.
    pub fn with_store(store: Arc<ExchangeStore>, config: &MonitorConfig) -> Self {
        let notifier = Arc::new(RollingNotifier::new(config.notification_buffer_size));
        let interceptor = if config.enabled {
            MonitorInterceptor::new(store.clone(), notifier.clone())
        } else {
            MonitorInterceptor::pass_through()
        };
        Self {
            store,
            notifier,
            interceptor,
            recent_limit: config.recent_limit,
        }
    }

    pub fn interceptor(&self) -> MonitorInterceptor {
        self.interceptor.clone()
    }

    /// A client whose calls are all recorded by this monitor
    pub fn client(&self, transport: ReqwestTransport) -> MonitoredClient {
        MonitoredClient::new(self.interceptor(), transport)
    }

    pub fn store(&self) -> &Arc<ExchangeStore> {
        &self.store
    }

    pub fn notifier(&self) -> &Arc<RollingNotifier> {
        &self.notifier
    }

    pub async fn recent(&self) -> anyhow::Result<Vec<ListItem>> {
        let exchanges = self.store.list_recent(self.recent_limit).await?;
        Ok(exchanges.iter().map(ListItem::from).collect())
    }

    /// Live list rows, newest first
    pub async fn watch_list(&self) -> anyhow::Result<BoxStream<'static, Vec<ListItem>>> {
        let stream = self.store.subscribe_recent(self.recent_limit).await?;
        Ok(stream
            .map(|exchanges| exchanges.iter().map(ListItem::from).collect())
            .boxed())
    }

    pub async fn detail(&self, id: i64) -> anyhow::Result<Option<DetailView>> {
        Ok(self.store.query(id).await?.as_ref().map(DetailView::from))
    }

    /// Live detail view; repeats of an unchanged view are skipped.
    pub async fn watch_detail(
        &self,
        id: i64,
    ) -> anyhow::Result<BoxStream<'static, Option<DetailView>>> {
        let stream = self.store.subscribe(id).await?;
        let mut last: Option<Option<DetailView>> = None;
        Ok(stream
            .map(|exchange| exchange.as_ref().map(DetailView::from))
            .filter_map(move |view| {
                let changed = last.as_ref() != Some(&view);
                if changed {
                    last = Some(view.clone());
                }
                future::ready(changed.then_some(view))
            })
            .boxed())
    }

    /// Plain-text rendering of one exchange, `None` when it does not exist
    pub async fn share_text(&self, id: i64) -> anyhow::Result<Option<String>> {
        Ok(self
            .store
            .query(id)
            .await?
            .as_ref()
            .map(format::build_share_text))
    }

    /// Delete every exchange and reset the notification.
    pub async fn clear_all(&self) -> anyhow::Result<u64> {
        let deleted = self.store.delete_all().await?;
        self.notifier.clear_buffer()?;
        self.notifier.dismiss()?;
        Ok(deleted)
    }

    /// Write all captured exchanges, oldest first, as a HAR file.
    pub async fn export_har(&self, output_path: impl AsRef<Path>) -> anyhow::Result<usize> {
        let exchanges = self.store.list_all().await?;
        storage::export_har_to_path(exchanges, output_path)
            .await
            .context("exporting HAR")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::{RequestBody, ResponseBody};
    use crate::models::UNKNOWN_RESPONSE_CODE;
    use http::{Request, Response};
    use serial_test::serial;
    use std::time::Duration;
    use tempfile::tempdir;

    fn monitor_in(dir: &tempfile::TempDir) -> Monitor {
        let store = Arc::new(ExchangeStore::open(dir.path().to_str().unwrap()).expect("open"));
        Monitor::with_store(store, &MonitorConfig::default())
    }

    async fn capture_ok(monitor: &Monitor, uri: &str, body: &'static str) {
        let request = Request::get(uri).body(RequestBody::empty()).unwrap();
        monitor
            .interceptor()
            .intercept(request, |_| async move {
                Ok::<_, std::io::Error>(
                    Response::builder()
                        .status(200)
                        .header("content-type", "application/json")
                        .body(ResponseBody::full(body))
                        .unwrap(),
                )
            })
            .await
            .expect("call ok");
    }

    #[test]
    fn default_config() {
        let config = MonitorConfig::default();
        assert_eq!(config.storage_path, "./");
        assert!(config.enabled);
        assert_eq!(config.notification_buffer_size, 10);
        assert_eq!(config.recent_limit, 300);
        assert_eq!(config.prune_days, None);
    }

    #[test]
    fn log_level_names() {
        assert_eq!(parse_level(" Debug "), Some(LevelFilter::DEBUG));
        assert_eq!(parse_level("off"), Some(LevelFilter::OFF));
        assert_eq!(parse_level("verbose"), None);
    }

    #[test]
    #[serial]
    fn logging_installs_once() {
        assert!(init_core(None).expect("first init"));
        assert!(!init_core(None).expect("second init"));
    }

    #[test]
    #[serial]
    fn log_level_follows_rust_log() {
        std::env::set_var("RUST_LOG", "WARNING");
        assert_eq!(resolve_log_level(), LevelFilter::WARN);
        std::env::set_var("RUST_LOG", "nonsense");
        assert_eq!(resolve_log_level(), LevelFilter::INFO);
        std::env::remove_var("RUST_LOG");
        assert_eq!(resolve_log_level(), LevelFilter::INFO);
    }

    #[tokio::test]
    async fn list_and_detail_views() {
        let dir = tempdir().expect("temp dir");
        let monitor = monitor_in(&dir);
        capture_ok(&monitor, "https://api.example.com/users?page=1", "{\"users\":[]}").await;

        let rows = monitor.recent().await.expect("recent");
        assert_eq!(rows.len(), 1);
        let row = &rows[0];
        assert_eq!(row.status, ExchangeStatus::Complete);
        assert_eq!(row.code_label, "200");
        assert_eq!(row.path_with_query, "/users?page=1");
        assert_eq!(row.origin, "https://api.example.com");
        assert!(row.duration.ends_with(" ms"));

        let detail = monitor.detail(row.id).await.expect("detail").expect("present");
        assert_eq!(detail.title, "GET  /users?page=1");
        assert_eq!(detail.tabs, DetailTab::ALL.to_vec());
        assert_eq!(detail.overview.len(), 13);
        assert_eq!(detail.response.body, "{\n  \"users\": []\n}");
        assert!(monitor.detail(row.id + 1).await.expect("detail").is_none());
    }

    #[tokio::test]
    async fn clear_all_empties_store_and_notification() {
        let dir = tempdir().expect("temp dir");
        let monitor = monitor_in(&dir);
        capture_ok(&monitor, "https://x.test/a", "{}").await;
        capture_ok(&monitor, "https://x.test/b", "{}").await;
        assert_eq!(monitor.notifier().current().expect("shown").total, 2);

        assert_eq!(monitor.clear_all().await.expect("clear"), 2);
        assert!(monitor.recent().await.expect("recent").is_empty());
        assert!(monitor.notifier().current().is_none());
    }

    #[tokio::test]
    async fn share_text_by_id() {
        let dir = tempdir().expect("temp dir");
        let monitor = monitor_in(&dir);
        capture_ok(&monitor, "https://x.test/share", "{\"k\":\"v\"}").await;
        let id = monitor.recent().await.expect("recent")[0].id;

        let text = monitor.share_text(id).await.expect("share").expect("present");
        assert!(text.starts_with("Url : https://x.test/share\n"));
        assert!(text.ends_with("{\n  \"k\": \"v\"\n}"));
        assert!(monitor.share_text(id + 1).await.expect("share").is_none());
    }

    #[tokio::test]
    async fn watch_detail_follows_the_exchange() {
        let dir = tempdir().expect("temp dir");
        let monitor = monitor_in(&dir);
        let pending = Exchange {
            method: "GET".into(),
            path: "/slow".into(),
            ..Exchange::default()
        };
        let id = monitor.store().insert(&pending).await.expect("insert");

        let mut views = monitor.watch_detail(id).await.expect("watch");
        let first = views.next().await.expect("open").expect("present");
        assert_eq!(first.overview[3].value, "Requesting");
        assert_eq!(first.title, "GET  /slow");

        let done = Exchange {
            id,
            response_code: 204,
            response_message: "No Content".into(),
            ..pending
        };
        monitor.store().update(&done).await.expect("update");
        let second = tokio::time::timeout(Duration::from_secs(5), views.next())
            .await
            .expect("in time")
            .expect("open")
            .expect("present");
        assert_eq!(second.overview[4].value, "204 No Content");
    }

    #[tokio::test]
    async fn watch_list_emits_rows() {
        let dir = tempdir().expect("temp dir");
        let monitor = monitor_in(&dir);
        let mut rows = monitor.watch_list().await.expect("watch");
        assert!(rows.next().await.expect("open").is_empty());

        monitor
            .store()
            .insert(&Exchange {
                path: "/live".into(),
                ..Exchange::default()
            })
            .await
            .expect("insert");
        let listed = tokio::time::timeout(Duration::from_secs(5), rows.next())
            .await
            .expect("in time")
            .expect("open");
        assert_eq!(listed[0].path_with_query, "/live");
        assert_eq!(listed[0].code_label, "...");
    }

    #[tokio::test]
    async fn disabled_monitor_records_nothing() {
        let dir = tempdir().expect("temp dir");
        let store = Arc::new(ExchangeStore::open(dir.path().to_str().unwrap()).expect("open"));
        let config = MonitorConfig {
            enabled: false,
            ..MonitorConfig::default()
        };
        let monitor = Monitor::with_store(store, &config);
        assert!(!monitor.interceptor().is_enabled());
        capture_ok(&monitor, "https://x.test/ignored", "{}").await;
        assert_eq!(monitor.store().count().await.expect("count"), 0);
    }

    #[tokio::test]
    async fn export_har_writes_every_exchange() {
        let dir = tempdir().expect("temp dir");
        let monitor = monitor_in(&dir);
        capture_ok(&monitor, "https://x.test/one", "{}").await;
        capture_ok(&monitor, "https://x.test/two", "{}").await;

        let path = dir.path().join("export.har");
        assert_eq!(monitor.export_har(&path).await.expect("export"), 2);
        assert!(path.exists());
    }

    #[tokio::test]
    #[serial]
    async fn open_uses_the_shared_store_and_prunes() {
        let dir = tempdir().expect("temp dir");
        let path = dir.path().to_str().unwrap().to_string();
        let shared = storage::reset_store_for_tests(&path).expect("reset");
        let stale = Exchange {
            request_date: 1,
            response_code: UNKNOWN_RESPONSE_CODE,
            ..Exchange::default()
        };
        shared.insert(&stale).await.expect("insert stale");

        let monitor = Monitor::open(MonitorConfig {
            storage_path: path,
            prune_days: Some(5),
            ..MonitorConfig::default()
        })
        .await
        .expect("open");
        assert!(Arc::ptr_eq(monitor.store(), &shared));
        assert_eq!(monitor.store().count().await.expect("count"), 0);
    }
}
