//! Display formatting for captured exchanges
//!
//! Pretty-printed bodies, header blocks, the overview table and the plain-text
//! share format. Nothing here mutates or persists anything.

pub mod summary;
pub mod xml;

use crate::models::{Exchange, HeaderPair};
use chrono::{Local, TimeZone};

const SHORT_DATE: &str = "%m-%d %H:%M:%S";
const FULL_DATE: &str = "%Y-%m-%d %H:%M:%S %3f";

/// `MM-dd HH:mm:ss` in local time
pub fn format_date_short(epoch_ms: i64) -> String {
    format_local(epoch_ms, SHORT_DATE)
}

/// `yyyy-MM-dd HH:mm:ss SSS` in local time
pub fn format_date_full(epoch_ms: i64) -> String {
    format_local(epoch_ms, FULL_DATE)
}

fn format_local(epoch_ms: i64, pattern: &str) -> String {
    Local
        .timestamp_millis_opt(epoch_ms)
        .earliest()
        .map(|dt| dt.format(pattern).to_string())
        .unwrap_or_default()
}

pub fn format_bytes(size: u64) -> String {
    if size < 1024 {
        format!("{}B", size)
    } else if size < 1024 * 1024 {
        format!("{:.1}KB", size as f64 / 1024.0)
    } else {
        format!("{:.1}MB", size as f64 / (1024.0 * 1024.0))
    }
}

/// One `name : value` line per header, in stored order.
pub fn format_headers(headers: &[HeaderPair]) -> String {
    let mut out = String::new();
    for header in headers {
        out.push_str(&header.name);
        out.push_str(" : ");
        out.push_str(&header.value);
        out.push('\n');
    }
    out
}

/// Pretty-print a body preview according to its content type.
///
/// JSON keeps its key order; XML is re-indented. Anything that fails to parse
/// is returned unchanged.
pub fn format_body(body: &str, content_type: &str) -> String {
    if body.trim().is_empty() {
        return String::new();
    }
    let content_type = content_type.to_ascii_lowercase();
    if content_type.contains("json") {
        pretty_json(body)
    } else if content_type.contains("xml") {
        xml::pretty_print(body).unwrap_or_else(|err| {
            tracing::trace!("Leaving XML body unformatted: {}", err);
            body.to_string()
        })
    } else {
        body.to_string()
    }
}

fn pretty_json(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .and_then(|value| serde_json::to_string_pretty(&value))
        .unwrap_or_else(|_| body.to_string())
}

/// The overview table shown first in the detail view and the share text.
pub fn build_overview(exchange: &Exchange) -> Vec<HeaderPair> {
    vec![
        HeaderPair::new("Url", exchange.url.as_str()),
        HeaderPair::new("Method", exchange.method.as_str()),
        HeaderPair::new("Protocol", exchange.protocol.as_str()),
        HeaderPair::new("State", crate::models::status(exchange).to_string()),
        HeaderPair::new("Response", summary::response_summary(exchange)),
        HeaderPair::new("TlsVersion", exchange.response_tls_version.as_str()),
        HeaderPair::new("CipherSuite", exchange.response_cipher_suite.as_str()),
        HeaderPair::new("Request Time", format_date_full(exchange.request_date)),
        HeaderPair::new("Response Time", format_date_full(exchange.response_date)),
        HeaderPair::new("Duration", summary::request_duration(exchange)),
        HeaderPair::new("Request Size", format_bytes(exchange.request_content_length)),
        HeaderPair::new("Response Size", format_bytes(exchange.response_content_length)),
        HeaderPair::new("Total Size", summary::total_size(exchange)),
    ]
}

/// Plain-text rendering of a whole exchange for copy/share.
pub fn build_share_text(exchange: &Exchange) -> String {
    let mut out = format_headers(&build_overview(exchange));
    out.push('\n');
    out.push_str("----------Request----------");
    out.push_str("\n\n");
    out.push_str(&format_headers(&exchange.request_headers));
    out.push_str(&format_body(
        &exchange.request_body,
        &exchange.request_content_type,
    ));
    out.push_str("\n\n");
    out.push_str("----------Response----------");
    out.push_str("\n\n");
    out.push_str(&format_headers(&exchange.response_headers));
    out.push_str(&format_body(
        &exchange.response_body,
        &exchange.response_content_type,
    ));
    out
}
