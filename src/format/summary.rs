//! Short, human-facing texts derived from a stored exchange.

use crate::format::format_bytes;
use crate::models::{path_with_query, status, Exchange, ExchangeStatus};

/// One-line state of an exchange for the live notification.
pub fn notification_text(exchange: &Exchange) -> String {
    let target = path_with_query(exchange);
    match status(exchange) {
        ExchangeStatus::Requesting => format!("...{target}"),
        ExchangeStatus::Complete => format!("{} {target}", exchange.response_code),
        ExchangeStatus::Failed => format!("!!!{target}"),
    }
}

/// "200 OK", the failure text, or nothing while in flight
pub fn response_summary(exchange: &Exchange) -> String {
    match status(exchange) {
        ExchangeStatus::Requesting => String::new(),
        ExchangeStatus::Complete => {
            format!("{} {}", exchange.response_code, exchange.response_message)
        }
        ExchangeStatus::Failed => exchange.error.clone().unwrap_or_default(),
    }
}

pub fn response_code_label(exchange: &Exchange) -> String {
    match status(exchange) {
        ExchangeStatus::Requesting => "...".to_string(),
        ExchangeStatus::Complete => exchange.response_code.to_string(),
        ExchangeStatus::Failed => "!!!".to_string(),
    }
}

/// Round-trip time, only for completed exchanges with both timestamps
pub fn request_duration(exchange: &Exchange) -> String {
    if exchange.request_date <= 0 || exchange.response_date <= 0 {
        return String::new();
    }
    match status(exchange) {
        ExchangeStatus::Complete => {
            format!("{} ms", exchange.response_date - exchange.request_date)
        }
        ExchangeStatus::Requesting | ExchangeStatus::Failed => String::new(),
    }
}

pub fn total_size(exchange: &Exchange) -> String {
    match status(exchange) {
        ExchangeStatus::Complete => format_bytes(
            exchange
                .request_content_length
                .saturating_add(exchange.response_content_length),
        ),
        ExchangeStatus::Requesting | ExchangeStatus::Failed => String::new(),
    }
}
