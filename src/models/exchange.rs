//! HTTP exchange model
//!
//! Represents a single HTTP request/response (or request/failure) cycle captured
//! by the monitor interceptor.

use serde::{Deserialize, Serialize};

/// Identity of an exchange that has not been persisted yet.
pub const UNASSIGNED_ID: i64 = 0;

/// Response code of an exchange that is still waiting for its response.
pub const UNKNOWN_RESPONSE_CODE: i32 = -1024;

/// A single header line. Header collections keep wire order and duplicates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeaderPair {
    pub name: String,
    pub value: String,
}

impl HeaderPair {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// Lifecycle state of an exchange, derived from its stored fields
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExchangeStatus {
    /// Request sent, no response yet
    Requesting,
    /// Response received
    Complete,
    /// The call failed
    Failed,
}

impl ExchangeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExchangeStatus::Requesting => "Requesting",
            ExchangeStatus::Complete => "Complete",
            ExchangeStatus::Failed => "Failed",
        }
    }
}

impl std::fmt::Display for ExchangeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Represents one captured HTTP exchange
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Exchange {
    /// Store-assigned identity ([`UNASSIGNED_ID`] until first insert)
    pub id: i64,

    /// Full request URL
    pub url: String,
    /// URL scheme (http or https)
    pub scheme: String,
    /// Host name
    pub host: String,
    /// Encoded path
    pub path: String,
    /// Encoded query, empty when absent
    pub query: String,
    /// Negotiated protocol (e.g. "http/1.1", "h2")
    pub protocol: String,
    /// HTTP method
    pub method: String,

    // Request data
    pub request_headers: Vec<HeaderPair>,
    /// Request body preview (lossy, display only)
    pub request_body: String,
    pub request_content_type: String,
    pub request_content_length: u64,
    /// When the request was sent, milliseconds since epoch
    pub request_date: i64,

    // Response data
    pub response_headers: Vec<HeaderPair>,
    /// Response body preview (lossy, display only)
    pub response_body: String,
    pub response_content_type: String,
    pub response_content_length: u64,
    /// When the response was received, milliseconds since epoch (0 until known)
    pub response_date: i64,
    /// TLS protocol version, empty without a handshake
    pub response_tls_version: String,
    /// TLS cipher suite, empty without a handshake
    pub response_cipher_suite: String,
    pub response_code: i32,
    pub response_message: String,

    /// Failure description when the call failed
    pub error: Option<String>,
}

impl Default for Exchange {
    fn default() -> Self {
        Self {
            id: UNASSIGNED_ID,
            url: String::new(),
            scheme: String::new(),
            host: String::new(),
            path: String::new(),
            query: String::new(),
            protocol: String::new(),
            method: String::new(),
            request_headers: Vec::new(),
            request_body: String::new(),
            request_content_type: String::new(),
            request_content_length: 0,
            request_date: 0,
            response_headers: Vec::new(),
            response_body: String::new(),
            response_content_type: String::new(),
            response_content_length: 0,
            response_date: 0,
            response_tls_version: String::new(),
            response_cipher_suite: String::new(),
            response_code: UNKNOWN_RESPONSE_CODE,
            response_message: String::new(),
            error: None,
        }
    }
}

/// Derive the lifecycle state of an exchange.
pub fn status(exchange: &Exchange) -> ExchangeStatus {
    if exchange.error.is_some() {
        ExchangeStatus::Failed
    } else if exchange.response_code == UNKNOWN_RESPONSE_CODE {
        ExchangeStatus::Requesting
    } else {
        ExchangeStatus::Complete
    }
}

/// Path followed by `?query` when a query is present.
pub fn path_with_query(exchange: &Exchange) -> String {
    if exchange.query.trim().is_empty() {
        exchange.path.clone()
    } else {
        format!("{}?{}", exchange.path, exchange.query)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_exchange_is_requesting() {
        let exchange = Exchange::default();
        assert_eq!(status(&exchange), ExchangeStatus::Requesting);
        assert_eq!(exchange.id, UNASSIGNED_ID);
    }

    #[test]
    fn error_wins_over_response_code() {
        let exchange = Exchange {
            response_code: 200,
            error: Some("boom".into()),
            ..Exchange::default()
        };
        assert_eq!(status(&exchange), ExchangeStatus::Failed);
    }

    #[test]
    fn known_code_is_complete() {
        let exchange = Exchange {
            response_code: 404,
            ..Exchange::default()
        };
        assert_eq!(status(&exchange), ExchangeStatus::Complete);
    }

    #[test]
    fn path_with_query_skips_blank_query() {
        let mut exchange = Exchange {
            path: "/a".into(),
            query: "  ".into(),
            ..Exchange::default()
        };
        assert_eq!(path_with_query(&exchange), "/a");
        exchange.query = "x=1".into();
        assert_eq!(path_with_query(&exchange), "/a?x=1");
    }
}
