//! SeferEt workflow service — library crate for integration testing.
//!
//! Re-exports modules needed by integration tests in `tests/`.

pub mod broadcast;
pub mod cache;
pub mod config;
pub mod errors;
pub mod jobs;
pub mod listings;
pub mod metrics;
pub mod models;
pub mod notify;
pub mod store;
pub mod workflow;
