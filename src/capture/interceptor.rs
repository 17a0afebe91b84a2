//! The capture pipeline.
//!
//! Wraps one downstream call: snapshot the request, persist it as in flight,
//! run the call, fold in the response or failure, persist again and refresh the
//! notification. The caller always gets the call's own outcome back.

use crate::capture::body::{RequestBody, ResponseBody};
use crate::capture::snapshot::{build_initial, finish, CallOutcome};
use crate::models::{status, Exchange, UNASSIGNED_ID};
use crate::notify::{CallId, SummaryNotifier};
use crate::storage::ExchangeRepository;
use futures::FutureExt;
use http::{Request, Response};
use std::fmt::Display;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

#[derive(Clone)]
struct Capture {
    store: Arc<dyn ExchangeRepository>,
    notifier: Arc<dyn SummaryNotifier>,
}

/// Records every call it wraps without ever changing the call's outcome.
#[derive(Clone)]
pub struct MonitorInterceptor {
    capture: Option<Capture>,
}

impl MonitorInterceptor {
    pub fn new(store: Arc<dyn ExchangeRepository>, notifier: Arc<dyn SummaryNotifier>) -> Self {
        Self {
            capture: Some(Capture { store, notifier }),
        }
    }

    /// An interceptor that records nothing and only forwards calls.
    pub fn pass_through() -> Self {
        Self { capture: None }
    }

    pub fn is_enabled(&self) -> bool {
        self.capture.is_some()
    }

    /// Run `proceed` for `request`, recording the exchange on the side.
    ///
    /// `Err(e)` from `proceed` is returned as is. An `Ok` response comes back
    /// with the same status, headers and body bytes, though a streaming body
    /// may have been buffered for inspection.
    pub async fn intercept<F, Fut, E>(
        &self,
        request: Request<RequestBody>,
        proceed: F,
    ) -> Result<Response<ResponseBody>, E>
    where
        F: FnOnce(Request<RequestBody>) -> Fut,
        Fut: Future<Output = Result<Response<ResponseBody>, E>>,
        E: Display,
    {
        let Some(capture) = &self.capture else {
            return proceed(request).await;
        };

        let call = CallId::next();
        let started = capture.record_start(call, &request).await;
        let mut outcome = proceed(request).await;
        if let Some(prior) = started {
            capture.record_outcome(call, prior, &mut outcome).await;
        }
        outcome
    }
}

impl Capture {
    async fn record_start(
        &self,
        call: CallId,
        request: &Request<RequestBody>,
    ) -> Option<Exchange> {
        let mut exchange = match panic::catch_unwind(AssertUnwindSafe(|| build_initial(request))) {
            Ok(exchange) => exchange,
            Err(_) => {
                tracing::warn!("Snapshotting request panicked; call will not be recorded");
                return None;
            }
        };

        let inserted = guarded("insert", async { self.store.insert_exchange(&exchange).await }).await;
        if let Some(id) = inserted {
            exchange.id = id;
        }
        self.notify(call, &exchange);
        Some(exchange)
    }

    async fn record_outcome<E: Display>(
        &self,
        call: CallId,
        prior: Exchange,
        outcome: &mut Result<Response<ResponseBody>, E>,
    ) {
        let finished = AssertUnwindSafe(async {
            let call = match outcome {
                Ok(response) => CallOutcome::Response(response),
                Err(err) => CallOutcome::Failure(err.to_string()),
            };
            finish(&prior, call).await
        })
        .catch_unwind()
        .await;
        let mut exchange = match finished {
            Ok(exchange) => exchange,
            Err(_) => {
                tracing::warn!("Recording outcome of exchange {} panicked", prior.id);
                return;
            }
        };

        if exchange.id == UNASSIGNED_ID {
            let inserted = guarded("insert", async { self.store.insert_exchange(&exchange).await }).await;
            if let Some(id) = inserted {
                exchange.id = id;
            }
        } else {
            guarded("update", async { self.store.update_exchange(&exchange).await }).await;
        }
        self.notify(call, &exchange);

        tracing::debug!(
            "Captured #{} {} {} -> {}",
            exchange.id,
            exchange.method,
            exchange.url,
            status(&exchange)
        );
    }

    fn notify(&self, call: CallId, exchange: &Exchange) {
        match panic::catch_unwind(AssertUnwindSafe(|| self.notifier.show(call, exchange))) {
            Ok(Ok(())) => {}
            Ok(Err(err)) => tracing::warn!("Notification for exchange {} failed: {:#}", exchange.id, err),
            Err(_) => tracing::warn!("Notification for exchange {} panicked", exchange.id),
        }
    }
}

/// Await a store operation, logging and discarding errors and panics.
async fn guarded<T, Fut>(operation: &str, fut: Fut) -> Option<T>
where
    Fut: Future<Output = anyhow::Result<T>>,
{
    match AssertUnwindSafe(fut).catch_unwind().await {
        Ok(Ok(value)) => Some(value),
        Ok(Err(err)) => {
            tracing::warn!("Exchange {} failed: {:#}", operation, err);
            None
        }
        Err(_) => {
            tracing::warn!("Exchange {} panicked", operation);
            None
        }
    }
}
