//! Live summary notification of captured traffic
//!
//! The pipeline only knows the [`SummaryNotifier`] seam. [`RollingNotifier`]
//! keeps the newest entries and publishes a ready-to-render
//! [`NotificationContent`] that a host UI can present however it likes.

use crate::format::summary::notification_text;
use crate::models::Exchange;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use tokio::sync::watch;

pub const DEFAULT_BUFFER_SIZE: usize = 10;
const HEADLINE: &str = "Recording HTTP activity";

/// Identifies one intercepted call across all of its notifications.
///
/// Issued before the store assigns an id, so calls whose inserts fail still
/// get entries of their own. Later calls get larger ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CallId(u64);

impl CallId {
    pub fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        CallId(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

/// Receives every state change of every captured exchange.
pub trait SummaryNotifier: Send + Sync {
    /// Record or refresh the entry for this call and republish
    fn show(&self, call: CallId, exchange: &Exchange) -> anyhow::Result<()>;
    /// Forget all buffered entries
    fn clear_buffer(&self) -> anyhow::Result<()>;
    /// Withdraw the published notification
    fn dismiss(&self) -> anyhow::Result<()>;
}

/// What a rendered notification should show
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct NotificationContent {
    pub headline: String,
    /// Line for the most recently shown exchange
    pub summary: String,
    /// Buffered lines, newest exchange first
    pub lines: Vec<String>,
    /// Distinct exchanges shown since the buffer was last cleared
    pub total: u64,
}

#[derive(Default)]
struct Buffer {
    entries: BTreeMap<CallId, String>,
    total: u64,
}

/// Keeps the lines of the newest `capacity` calls.
pub struct RollingNotifier {
    capacity: usize,
    buffer: Mutex<Buffer>,
    content: watch::Sender<Option<NotificationContent>>,
}

impl RollingNotifier {
    pub fn new(capacity: usize) -> Self {
        let (content, _) = watch::channel(None);
        Self {
            capacity: capacity.max(1),
            buffer: Mutex::new(Buffer::default()),
            content,
        }
    }

    /// Follow the published content; `None` means nothing is shown.
    pub fn subscribe(&self) -> watch::Receiver<Option<NotificationContent>> {
        self.content.subscribe()
    }

    pub fn current(&self) -> Option<NotificationContent> {
        self.content.borrow().clone()
    }

    fn lock(&self) -> anyhow::Result<std::sync::MutexGuard<'_, Buffer>> {
        self.buffer
            .lock()
            .map_err(|e| anyhow::anyhow!("notification buffer poisoned: {}", e))
    }
}

impl Default for RollingNotifier {
    fn default() -> Self {
        Self::new(DEFAULT_BUFFER_SIZE)
    }
}

impl SummaryNotifier for RollingNotifier {
    fn show(&self, call: CallId, exchange: &Exchange) -> anyhow::Result<()> {
        let line = notification_text(exchange);
        let content = {
            let mut buffer = self.lock()?;
            if buffer.entries.insert(call, line.clone()).is_none() {
                buffer.total += 1;
            }
            while buffer.entries.len() > self.capacity {
                buffer.entries.pop_first();
            }
            NotificationContent {
                headline: HEADLINE.to_string(),
                summary: line,
                lines: buffer.entries.values().rev().cloned().collect(),
                total: buffer.total,
            }
        };
        self.content.send_replace(Some(content));
        Ok(())
    }

    fn clear_buffer(&self) -> anyhow::Result<()> {
        let mut buffer = self.lock()?;
        buffer.entries.clear();
        buffer.total = 0;
        Ok(())
    }

    fn dismiss(&self) -> anyhow::Result<()> {
        self.content.send_replace(None);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exchange(path: &str, code: i32) -> Exchange {
        Exchange {
            path: path.into(),
            response_code: code,
            ..Exchange::default()
        }
    }

    #[test]
    fn updates_replace_the_entry_in_place() {
        let notifier = RollingNotifier::new(10);
        let (a, b) = (CallId::next(), CallId::next());
        notifier.show(a, &exchange("/a", -1024)).unwrap();
        notifier.show(b, &exchange("/b", -1024)).unwrap();
        notifier.show(a, &exchange("/a", 200)).unwrap();

        let content = notifier.current().expect("published");
        assert_eq!(content.headline, HEADLINE);
        assert_eq!(content.summary, "200 /a");
        assert_eq!(content.lines, vec![".../b".to_string(), "200 /a".to_string()]);
        assert_eq!(content.total, 2);
    }

    #[test]
    fn buffer_keeps_only_the_newest_entries() {
        let notifier = RollingNotifier::new(3);
        for n in 1..=5 {
            notifier.show(CallId::next(), &exchange(&format!("/{n}"), 200)).unwrap();
        }
        let content = notifier.current().expect("published");
        assert_eq!(content.lines, vec!["200 /5", "200 /4", "200 /3"]);
        assert_eq!(content.total, 5);
    }

    #[test]
    fn clear_and_dismiss() {
        let notifier = RollingNotifier::default();
        let mut rx = notifier.subscribe();
        notifier.show(CallId::next(), &exchange("/a", 200)).unwrap();
        assert!(rx.has_changed().unwrap());
        assert!(rx.borrow_and_update().is_some());

        notifier.clear_buffer().unwrap();
        notifier.dismiss().unwrap();
        assert!(notifier.current().is_none());

        notifier.show(CallId::next(), &exchange("/b", 404)).unwrap();
        let content = notifier.current().expect("published");
        assert_eq!(content.lines, vec!["404 /b"]);
        assert_eq!(content.total, 1);
    }

    #[test]
    fn calls_without_store_ids_keep_separate_entries() {
        let notifier = RollingNotifier::new(10);
        let (first, second) = (CallId::next(), CallId::next());
        notifier.show(first, &exchange("/a", -1024)).unwrap();
        notifier.show(second, &exchange("/b", -1024)).unwrap();

        let stored = Exchange {
            id: 7,
            ..exchange("/a", 200)
        };
        notifier.show(first, &stored).unwrap();

        let content = notifier.current().expect("published");
        assert_eq!(content.lines, vec![".../b", "200 /a"]);
        assert_eq!(content.total, 2);
    }
}
