//! Capture pipeline
//!
//! Everything between the host HTTP client's call chain and the exchange store:
//! body sniffing, response materialization, snapshot building and the
//! interceptor that ties them together.

pub mod body;
pub mod decompress;
pub mod interceptor;
pub mod sniffer;
pub mod snapshot;

pub use body::{BoxError, CallMetadata, Handshake, RequestBody, ResponseBody};
pub use interceptor::MonitorInterceptor;
pub use snapshot::CallOutcome;

use thiserror::Error;

/// Failures while inspecting a body. Never surfaced to the intercepted caller.
#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("reading response body: {0}")]
    BodyRead(#[source] BoxError),
    #[error("decompressing gzip body: {0}")]
    Decompress(#[source] std::io::Error),
}
