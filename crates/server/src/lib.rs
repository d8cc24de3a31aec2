//! HTTP API server for the dokhub document hub.
//!
//! This crate provides:
//! - Streaming upload ingestion with validation, checksums and retrying metadata writes
//! - File listing, download and deletion
//! - Organizations and memberships
//! - Signed, time-limited share links with an audit trail
//! - Admin endpoints (users, tokens, cleanup, stats)

pub mod auth;
pub mod bootstrap;
pub mod error;
pub mod handlers;
pub mod ingest;
pub mod metrics;
pub mod routes;
pub mod state;

pub use auth::TraceId;
pub use error::ApiError;
pub use ingest::{IngestOutcome, IngestRequest, Ingestor};
pub use routes::create_router;
pub use state::AppState;
