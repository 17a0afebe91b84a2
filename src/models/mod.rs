//! Data models for the HTTP monitor
//!
//! These models are shared by the capture pipeline, the store and the view layer.

pub mod exchange;

pub use exchange::*;
