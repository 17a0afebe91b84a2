//! Content sniffing: text vs binary, and which content encodings we can show.

use http::header::CONTENT_ENCODING;
use http::HeaderMap;

/// Bytes of the body inspected by [`looks_like_text`]
const PREFIX_BYTES: usize = 64;
/// Code points decoded from that prefix
const MAX_CODE_POINTS: usize = 16;

/// Heuristically decide whether a body is UTF-8 text.
///
/// Only the first 64 bytes are examined, and at most 16 code points of them.
/// Any control character other than whitespace means binary, and so does a
/// malformed or truncated UTF-8 sequence.
pub fn looks_like_text(buffer: &[u8]) -> bool {
    let mut rest = &buffer[..buffer.len().min(PREFIX_BYTES)];
    for _ in 0..MAX_CODE_POINTS {
        if rest.is_empty() {
            break;
        }
        let Some((ch, width)) = decode_code_point(rest) else {
            return false;
        };
        if ch.is_control() && !is_control_whitespace(ch) {
            return false;
        }
        rest = &rest[width..];
    }
    true
}

fn decode_code_point(bytes: &[u8]) -> Option<(char, usize)> {
    let width = match bytes[0] {
        0x00..=0x7F => 1,
        0xC2..=0xDF => 2,
        0xE0..=0xEF => 3,
        0xF0..=0xF4 => 4,
        _ => return None,
    };
    if bytes.len() < width {
        return None;
    }
    let ch = std::str::from_utf8(&bytes[..width]).ok()?.chars().next()?;
    Some((ch, width))
}

// JVM whitespace among the C0 controls: TAB LF VT FF CR and the FS/GS/RS/US separators.
fn is_control_whitespace(ch: char) -> bool {
    matches!(ch, '\t' | '\n' | '\u{0B}' | '\u{0C}' | '\r' | '\u{1C}'..='\u{1F}')
}

/// Content-Encoding as declared; the last value wins when the header repeats.
fn content_encoding(headers: &HeaderMap) -> Option<&http::HeaderValue> {
    headers.get_all(CONTENT_ENCODING).iter().last()
}

/// True when the body is encoded with something other than identity or gzip.
pub fn has_unknown_encoding(headers: &HeaderMap) -> bool {
    match content_encoding(headers) {
        None => false,
        Some(value) => match value.to_str() {
            Ok(encoding) => {
                let encoding = encoding.trim();
                !encoding.eq_ignore_ascii_case("identity") && !encoding.eq_ignore_ascii_case("gzip")
            }
            Err(_) => true,
        },
    }
}

pub fn has_supported_encoding(headers: &HeaderMap) -> bool {
    !has_unknown_encoding(headers)
}

pub fn is_gzipped(headers: &HeaderMap) -> bool {
    content_encoding(headers)
        .and_then(|value| value.to_str().ok())
        .map(|encoding| encoding.trim().eq_ignore_ascii_case("gzip"))
        .unwrap_or(false)
}

/// Decode body bytes for display using the charset of `content_type` (UTF-8 by default).
pub fn decode_text(bytes: &[u8], content_type: &str) -> String {
    match charset_of(content_type).as_deref() {
        Some("iso-8859-1") | Some("latin1") | Some("us-ascii") | Some("ascii") => {
            bytes.iter().map(|&b| b as char).collect()
        }
        _ => String::from_utf8_lossy(bytes).into_owned(),
    }
}

fn charset_of(content_type: &str) -> Option<String> {
    content_type.split(';').skip(1).find_map(|param| {
        let (name, value) = param.split_once('=')?;
        if name.trim().eq_ignore_ascii_case("charset") {
            Some(value.trim().trim_matches('"').to_ascii_lowercase())
        } else {
            None
        }
    })
}
