//! Snapshot building
//!
//! Turns an outgoing request into a fresh [`Exchange`] and folds the call's
//! outcome into a second, completed copy of it.

use crate::capture::body::{CallMetadata, RequestBody, ResponseBody};
use crate::capture::decompress::materialize_body;
use crate::capture::sniffer::{decode_text, has_unknown_encoding, looks_like_text};
use crate::models::{Exchange, HeaderPair};
use chrono::Utc;
use http::header::{CONTENT_LENGTH, CONTENT_TYPE, TRANSFER_ENCODING};
use http::{HeaderMap, HeaderName, Request, Response, StatusCode, Version};

pub const ENCODED_BODY_OMITTED: &str = "(encoded body omitted)";
pub const DUPLEX_BODY_OMITTED: &str = "(duplex request body omitted)";
pub const ONE_SHOT_BODY_OMITTED: &str = "(one-shot body omitted)";
pub const BINARY_BODY_OMITTED: &str = "(binary body omitted)";
pub const UNREADABLE_BODY_OMITTED: &str = "(unreadable body omitted)";

/// What the downstream call produced: exactly one of a response or a failure.
#[derive(Debug)]
pub enum CallOutcome<'a> {
    Response(&'a mut Response<ResponseBody>),
    Failure(String),
}

/// Snapshot an outgoing request before it is sent.
pub fn build_initial(request: &Request<RequestBody>) -> Exchange {
    let uri = request.uri();
    let headers = request.headers();
    let body = request.body();
    let content_type = header_str(headers, &CONTENT_TYPE).unwrap_or_default();

    let request_content_length = match body {
        RequestBody::Empty => 0,
        RequestBody::Full(bytes) => bytes.len() as u64,
        RequestBody::OneShot(_) | RequestBody::Duplex(_) => declared_length(headers).unwrap_or(0),
    };

    Exchange {
        url: uri.to_string(),
        scheme: uri.scheme_str().unwrap_or_default().to_string(),
        host: uri.host().unwrap_or_default().to_string(),
        path: uri.path().to_string(),
        query: uri.query().unwrap_or_default().to_string(),
        method: request.method().as_str().to_string(),
        request_headers: header_pairs(headers),
        request_body: request_body_preview(body, headers, &content_type),
        request_content_type: content_type,
        request_content_length,
        request_date: now_millis(),
        ..Exchange::default()
    }
}

fn request_body_preview(body: &RequestBody, headers: &HeaderMap, content_type: &str) -> String {
    if body.is_empty() {
        return String::new();
    }
    if has_unknown_encoding(headers) {
        return ENCODED_BODY_OMITTED.to_string();
    }
    match body {
        RequestBody::Empty => String::new(),
        RequestBody::Duplex(_) => DUPLEX_BODY_OMITTED.to_string(),
        RequestBody::OneShot(_) => ONE_SHOT_BODY_OMITTED.to_string(),
        RequestBody::Full(bytes) => {
            if looks_like_text(bytes) {
                decode_text(bytes, content_type)
            } else {
                BINARY_BODY_OMITTED.to_string()
            }
        }
    }
}

/// Fold a received response into a copy of `prior`.
///
/// Timestamps, the sent request headers and TLS details come from the
/// transport's [`CallMetadata`] when it is attached to the response.
pub async fn augment_with_response(
    response: &mut Response<ResponseBody>,
    prior: &Exchange,
) -> Exchange {
    let meta = response
        .extensions()
        .get::<CallMetadata>()
        .cloned()
        .unwrap_or_default();
    let status = response.status();
    let protocol = protocol_name(response.version()).to_string();
    let response_headers = header_pairs(response.headers());
    let content_type = header_str(response.headers(), &CONTENT_TYPE).unwrap_or_default();
    let declared = declared_length(response.headers());

    let (response_body, response_content_length) =
        response_body_preview(response, &prior.method, &content_type, declared).await;

    let request_headers = meta
        .request_headers
        .as_ref()
        .map(header_pairs)
        .unwrap_or_else(|| prior.request_headers.clone());
    let request_date = if meta.sent_request_at_ms > 0 {
        meta.sent_request_at_ms
    } else {
        prior.request_date
    };
    let response_date = if meta.received_response_at_ms > 0 {
        meta.received_response_at_ms
    } else {
        now_millis()
    };
    let response_message = meta
        .reason
        .clone()
        .or_else(|| status.canonical_reason().map(String::from))
        .unwrap_or_default();
    let (response_tls_version, response_cipher_suite) = meta
        .handshake
        .map(|h| (h.tls_version, h.cipher_suite))
        .unwrap_or_default();

    Exchange {
        request_date,
        response_date,
        protocol,
        response_code: i32::from(status.as_u16()),
        response_message,
        response_tls_version,
        response_cipher_suite,
        request_headers,
        response_headers,
        response_content_type: content_type,
        response_content_length,
        response_body,
        ..prior.clone()
    }
}

async fn response_body_preview(
    response: &mut Response<ResponseBody>,
    method: &str,
    content_type: &str,
    declared: Option<u64>,
) -> (String, u64) {
    let declared_len = declared.unwrap_or(0);
    if response.body().is_absent() || !promises_body(method, response.status(), response.headers())
    {
        return (String::new(), declared_len);
    }
    if has_unknown_encoding(response.headers()) {
        return (ENCODED_BODY_OMITTED.to_string(), declared_len);
    }

    match materialize_body(response).await {
        Ok(body) => {
            let length = body.content_length(declared);
            let preview = if !looks_like_text(&body.bytes) {
                BINARY_BODY_OMITTED.to_string()
            } else if length != 0 {
                decode_text(&body.bytes, content_type)
            } else {
                ENCODED_BODY_OMITTED.to_string()
            };
            (preview, length)
        }
        Err(err) => {
            tracing::debug!("Response body not inspectable: {}", err);
            (UNREADABLE_BODY_OMITTED.to_string(), declared_len)
        }
    }
}

/// Copy of `prior` that records the call failure and nothing else.
pub fn with_failure(prior: &Exchange, description: impl Into<String>) -> Exchange {
    Exchange {
        error: Some(description.into()),
        ..prior.clone()
    }
}

/// Build the final snapshot for whichever outcome the call produced.
pub async fn finish(prior: &Exchange, outcome: CallOutcome<'_>) -> Exchange {
    match outcome {
        CallOutcome::Response(response) => augment_with_response(response, prior).await,
        CallOutcome::Failure(description) => with_failure(prior, description),
    }
}

/// Whether a response with this status is expected to carry a body.
fn promises_body(method: &str, status: StatusCode, headers: &HeaderMap) -> bool {
    if method.eq_ignore_ascii_case("HEAD") {
        return false;
    }
    let code = status.as_u16();
    if !status.is_informational()
        && code != StatusCode::NO_CONTENT.as_u16()
        && code != StatusCode::NOT_MODIFIED.as_u16()
    {
        return true;
    }
    declared_length(headers).is_some()
        || header_str(headers, &TRANSFER_ENCODING)
            .map(|v| v.eq_ignore_ascii_case("chunked"))
            .unwrap_or(false)
}

fn protocol_name(version: Version) -> &'static str {
    match version {
        Version::HTTP_09 => "http/0.9",
        Version::HTTP_10 => "http/1.0",
        Version::HTTP_11 => "http/1.1",
        Version::HTTP_2 => "h2",
        Version::HTTP_3 => "h3",
        _ => "",
    }
}

pub(crate) fn header_pairs(headers: &HeaderMap) -> Vec<HeaderPair> {
    headers
        .iter()
        .map(|(name, value)| {
            HeaderPair::new(
                name.as_str(),
                String::from_utf8_lossy(value.as_bytes()).into_owned(),
            )
        })
        .collect()
}

fn header_str(headers: &HeaderMap, name: &HeaderName) -> Option<String> {
    headers
        .get(name)
        .map(|v| String::from_utf8_lossy(v.as_bytes()).trim().to_string())
}

fn declared_length(headers: &HeaderMap) -> Option<u64> {
    header_str(headers, &CONTENT_LENGTH).and_then(|v| v.parse::<u64>().ok())
}

pub(crate) fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}
