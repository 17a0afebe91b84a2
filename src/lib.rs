//! # HTTP Monitor
//!
//! In-app HTTP traffic inspector. An interceptor sits in the client's call
//! chain, records every request/response pair into a local SQLite database and
//! keeps a rolling live summary, without ever touching what the real caller
//! sends or receives.
//!
//! ## Features
//!
//! - Capture pipeline that observes calls and never interferes with them
//! - Text/binary sniffing and gzip inspection of response bodies
//! - Exchange storage with live per-record and recent-list subscriptions
//! - Formatted list/detail views, share text and HAR export
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                 Host application / UI                    │
//! ├─────────────────────────────────────────────────────────┤
//! │                api::monitor_api::Monitor                  │
//! ├─────────────────────────────────────────────────────────┤
//! │  ┌──────────┐  ┌───────────┐  ┌─────────┐  ┌─────────┐  │
//! │  │Transport │──│Interceptor│──│ Storage │  │ Notify  │  │
//! │  │(reqwest) │  │ (capture) │  │(SQLite) │  │(rolling)│  │
//! │  └──────────┘  └───────────┘  └─────────┘  └─────────┘  │
//! └─────────────────────────────────────────────────────────┘
//! ```

pub mod api;
pub mod capture;
pub mod format;
pub mod models;
pub mod notify;
pub mod storage;
pub mod transport;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
