//! HTTP Monitor API
//!
//! The service facade a host application talks to: logging setup,
//! configuration and the [`monitor_api::Monitor`] service object.

pub mod monitor_api;
