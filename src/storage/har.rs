use anyhow::{anyhow, Context};
use chrono::{TimeZone, Utc};
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::path::Path;

use crate::models::{Exchange, HeaderPair, UNKNOWN_RESPONSE_CODE};

const HAR_VERSION: &str = "1.2";
const CREATOR_NAME: &str = "HTTP Monitor";
const CREATOR_VERSION: &str = env!("CARGO_PKG_VERSION");
const DEFAULT_MIME_TYPE: &str = "application/octet-stream";

#[derive(Serialize)]
struct HarLog<'a> {
    log: HarLogInner<'a>,
}

#[derive(Serialize)]
struct HarLogInner<'a> {
    version: &'static str,
    creator: HarCreator<'a>,
    entries: Vec<HarEntry>,
}

#[derive(Serialize)]
struct HarCreator<'a> {
    name: &'a str,
    version: &'a str,
}

#[derive(Serialize)]
struct HarEntry {
    #[serde(rename = "startedDateTime")]
    started_datetime: String,
    time: i64,
    request: HarRequest,
    response: HarResponse,
    cache: HashMap<String, Value>,
    timings: HarTimings,
    #[serde(skip_serializing_if = "Option::is_none", rename = "_error")]
    error: Option<String>,
}

#[derive(Serialize)]
struct HarRequest {
    method: String,
    url: String,
    #[serde(rename = "httpVersion")]
    http_version: String,
    headers: Vec<HarHeader>,
    #[serde(rename = "queryString")]
    query_string: Vec<HarHeader>,
    cookies: Vec<Value>,
    #[serde(rename = "headersSize")]
    headers_size: i64,
    #[serde(rename = "bodySize")]
    body_size: i64,
    #[serde(skip_serializing_if = "Option::is_none", rename = "postData")]
    post_data: Option<HarPostData>,
}

#[derive(Serialize)]
struct HarResponse {
    status: i64,
    #[serde(rename = "statusText")]
    status_text: String,
    #[serde(rename = "httpVersion")]
    http_version: String,
    headers: Vec<HarHeader>,
    cookies: Vec<Value>,
    content: HarContent,
    #[serde(rename = "redirectURL")]
    redirect_url: String,
    #[serde(rename = "headersSize")]
    headers_size: i64,
    #[serde(rename = "bodySize")]
    body_size: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
struct HarHeader {
    name: String,
    value: String,
}

#[derive(Serialize)]
struct HarPostData {
    #[serde(rename = "mimeType")]
    mime_type: String,
    text: String,
}

#[derive(Serialize)]
struct HarContent {
    size: i64,
    #[serde(rename = "mimeType")]
    mime_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    text: Option<String>,
}

#[derive(Serialize)]
struct HarTimings {
    send: i64,
    wait: i64,
    receive: i64,
}

/// Render captured exchanges as a HAR 1.2 log.
///
/// Bodies are the stored display previews, so placeholders such as
/// "(binary body omitted)" appear verbatim.
pub fn exchanges_to_har(exchanges: &[Exchange]) -> anyhow::Result<Value> {
    let entries = exchanges.iter().map(HarEntry::from).collect();
    serde_json::to_value(HarLog {
        log: HarLogInner {
            version: HAR_VERSION,
            creator: HarCreator {
                name: CREATOR_NAME,
                version: CREATOR_VERSION,
            },
            entries,
        },
    })
    .context("serializing HAR log")
}

impl HarEntry {
    fn from(exchange: &Exchange) -> Self {
        let started_datetime = Utc
            .timestamp_millis_opt(exchange.request_date)
            .single()
            .unwrap_or_else(Utc::now)
            .to_rfc3339();
        let time = if exchange.response_date > 0 && exchange.request_date > 0 {
            (exchange.response_date - exchange.request_date).max(0)
        } else {
            0
        };
        Self {
            started_datetime,
            time,
            request: HarRequest::from(exchange),
            response: HarResponse::from(exchange),
            cache: HashMap::new(),
            timings: HarTimings {
                send: 0,
                wait: time,
                receive: 0,
            },
            error: exchange.error.clone(),
        }
    }
}

impl HarRequest {
    fn from(exchange: &Exchange) -> Self {
        let post_data = (!exchange.request_body.is_empty()).then(|| HarPostData {
            mime_type: mime_or_default(&exchange.request_content_type),
            text: exchange.request_body.clone(),
        });
        Self {
            method: exchange.method.clone(),
            url: exchange.url.clone(),
            http_version: exchange.protocol.clone(),
            headers: har_headers(&exchange.request_headers),
            query_string: split_query(&exchange.query),
            cookies: Vec::new(),
            headers_size: -1,
            body_size: exchange.request_content_length as i64,
            post_data,
        }
    }
}

impl HarResponse {
    fn from(exchange: &Exchange) -> Self {
        let status = if exchange.response_code == UNKNOWN_RESPONSE_CODE {
            0
        } else {
            i64::from(exchange.response_code)
        };
        let size = exchange.response_content_length as i64;
        Self {
            status,
            status_text: exchange.response_message.clone(),
            http_version: exchange.protocol.clone(),
            headers: har_headers(&exchange.response_headers),
            cookies: Vec::new(),
            content: HarContent {
                size,
                mime_type: mime_or_default(&exchange.response_content_type),
                text: (!exchange.response_body.is_empty()).then(|| exchange.response_body.clone()),
            },
            redirect_url: header_value(&exchange.response_headers, "location").unwrap_or_default(),
            headers_size: -1,
            body_size: size,
        }
    }
}

fn har_headers(headers: &[HeaderPair]) -> Vec<HarHeader> {
    headers
        .iter()
        .map(|h| HarHeader {
            name: h.name.clone(),
            value: h.value.clone(),
        })
        .collect()
}

fn header_value(headers: &[HeaderPair], name: &str) -> Option<String> {
    headers
        .iter()
        .find(|h| h.name.eq_ignore_ascii_case(name))
        .map(|h| h.value.clone())
}

fn mime_or_default(content_type: &str) -> String {
    if content_type.is_empty() {
        DEFAULT_MIME_TYPE.to_string()
    } else {
        content_type.to_string()
    }
}

fn split_query(query: &str) -> Vec<HarHeader> {
    query
        .split('&')
        .filter(|segment| !segment.is_empty())
        .map(|segment| {
            let (name, value) = segment.split_once('=').unwrap_or((segment, ""));
            HarHeader {
                name: percent_decode(name),
                value: percent_decode(value),
            }
        })
        .collect()
}

fn percent_decode(input: &str) -> String {
    let bytes = input.as_bytes();
    let mut output = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'%' if i + 2 < bytes.len() => {
                if let (Some(h), Some(l)) = (hex_value(bytes[i + 1]), hex_value(bytes[i + 2])) {
                    output.push(h << 4 | l);
                    i += 3;
                    continue;
                }
                output.push(b'%');
                i += 1;
            }
            b'+' => {
                output.push(b' ');
                i += 1;
            }
            byte => {
                output.push(byte);
                i += 1;
            }
        }
    }
    String::from_utf8_lossy(&output).into_owned()
}

fn hex_value(byte: u8) -> Option<u8> {
    match byte {
        b'0'..=b'9' => Some(byte - b'0'),
        b'a'..=b'f' => Some(byte - b'a' + 10),
        b'A'..=b'F' => Some(byte - b'A' + 10),
        _ => None,
    }
}

/// Write a HAR file for `exchanges`, returning how many entries were written.
pub async fn export_har_to_path(
    exchanges: Vec<Exchange>,
    output_path: impl AsRef<Path>,
) -> anyhow::Result<usize> {
    if exchanges.is_empty() {
        return Err(anyhow!("No exchanges to export"));
    }
    let value = exchanges_to_har(&exchanges)?;
    let json = serde_json::to_string_pretty(&value)?;
    tokio::fs::write(output_path, json)
        .await
        .context("writing HAR file")?;
    Ok(exchanges.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn completed() -> Exchange {
        Exchange {
            id: 3,
            url: "https://api.example.com/search?q=caf%C3%A9&page=2".into(),
            scheme: "https".into(),
            host: "api.example.com".into(),
            path: "/search".into(),
            query: "q=caf%C3%A9&page=2".into(),
            protocol: "h2".into(),
            method: "GET".into(),
            request_headers: vec![HeaderPair::new("accept", "application/json")],
            request_date: 1_700_000_000_000,
            response_headers: vec![HeaderPair::new("content-type", "application/json")],
            response_body: "{\"ok\":true}".into(),
            response_content_type: "application/json".into(),
            response_content_length: 11,
            response_date: 1_700_000_000_120,
            response_code: 200,
            response_message: "OK".into(),
            ..Exchange::default()
        }
    }

    #[test]
    fn har_entry_carries_request_and_response() {
        let har = exchanges_to_har(&[completed()]).expect("har");
        assert_eq!(har["log"]["version"], "1.2");
        let entry = &har["log"]["entries"][0];
        assert_eq!(entry["time"], 120);
        assert_eq!(entry["request"]["method"], "GET");
        assert_eq!(entry["request"]["httpVersion"], "h2");
        assert_eq!(entry["request"]["queryString"][0]["name"], "q");
        assert_eq!(entry["request"]["queryString"][0]["value"], "café");
        assert!(entry["request"].get("postData").is_none());
        assert_eq!(entry["response"]["status"], 200);
        assert_eq!(entry["response"]["content"]["text"], "{\"ok\":true}");
        assert_eq!(entry["response"]["content"]["size"], 11);
        assert!(entry.get("_error").is_none());
    }

    #[test]
    fn failed_exchange_has_zero_status_and_error() {
        let failed = Exchange {
            response_code: UNKNOWN_RESPONSE_CODE,
            response_date: 0,
            response_body: String::new(),
            error: Some("connection reset".into()),
            ..completed()
        };
        let har = exchanges_to_har(&[failed]).expect("har");
        let entry = &har["log"]["entries"][0];
        assert_eq!(entry["response"]["status"], 0);
        assert_eq!(entry["time"], 0);
        assert_eq!(entry["_error"], "connection reset");
        assert!(entry["response"]["content"].get("text").is_none());
    }

    #[tokio::test]
    async fn export_writes_file_and_rejects_empty_input() {
        let dir = tempdir().expect("temp dir");
        let path = dir.path().join("capture.har");
        assert!(export_har_to_path(Vec::new(), &path).await.is_err());

        let written = export_har_to_path(vec![completed()], &path)
            .await
            .expect("export");
        assert_eq!(written, 1);
        let contents = std::fs::read_to_string(&path).expect("read back");
        let parsed: Value = serde_json::from_str(&contents).expect("valid json");
        assert_eq!(parsed["log"]["entries"].as_array().map(Vec::len), Some(1));
    }
}
