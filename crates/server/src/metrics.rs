//! Prometheus metrics for the dokhub server.
//!
//! Counters cover the upload pipeline (accepted files, rejections by reason,
//! metadata retries, compensated blobs) and share link traffic.
//!
//! The `/metrics` endpoint is unauthenticated. It exposes aggregate counts
//! only, never file names or user IDs, but should still be restricted to
//! the scraper at the network level.

use axum::http::StatusCode;
use axum::response::IntoResponse;
use prometheus::{
    self, Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, Opts, Registry,
    TextEncoder,
};
use std::sync::{LazyLock, Once};

/// Global Prometheus registry for all metrics.
pub static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

// Upload pipeline
pub static FILES_UPLOADED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "dokhub_files_uploaded_total",
        "Total number of files stored and linked to a metadata record",
    )
    .expect("metric creation failed")
});

pub static FILES_DEDUPLICATED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "dokhub_files_deduplicated_total",
        "Uploads answered with an existing record for the same idempotency key",
    )
    .expect("metric creation failed")
});

pub static BYTES_UPLOADED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "dokhub_bytes_uploaded_total",
        "Total bytes of accepted uploads",
    )
    .expect("metric creation failed")
});

pub static UPLOAD_REJECTIONS: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "dokhub_upload_rejections_total",
            "Uploads rejected by the validation policy, by reason",
        ),
        &["reason"],
    )
    .expect("metric creation failed")
});

pub static METADATA_WRITE_RETRIES: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "dokhub_metadata_write_retries_total",
        "Metadata writes retried after a transient failure",
    )
    .expect("metric creation failed")
});

pub static ORPHAN_BLOBS_DELETED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "dokhub_orphan_blobs_deleted_total",
        "Blobs deleted because their metadata record could not be written",
    )
    .expect("metric creation failed")
});

pub static INGEST_DURATION: LazyLock<Histogram> = LazyLock::new(|| {
    Histogram::with_opts(
        HistogramOpts::new(
            "dokhub_ingest_duration_seconds",
            "Time from first byte to linked metadata record",
        )
        .buckets(vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0]),
    )
    .expect("metric creation failed")
});

// Share links
pub static SHARES_GENERATED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "dokhub_shares_generated_total",
        "Total number of share links generated",
    )
    .expect("metric creation failed")
});

pub static SHARES_ACCESSED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "dokhub_shares_accessed_total",
        "Total number of successful share link downloads",
    )
    .expect("metric creation failed")
});

pub static SHARES_EXPIRED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "dokhub_shares_expired_total",
        "Share links moved to expired by cleanup or on access",
    )
    .expect("metric creation failed")
});

/// Guard to ensure metrics are only registered once.
static REGISTER_ONCE: Once = Once::new();

/// Register all metrics with the global registry.
///
/// Idempotent, so tests and embedded routers can call it freely.
pub fn register_metrics() {
    REGISTER_ONCE.call_once(|| {
        let collectors: Vec<Box<dyn prometheus::core::Collector>> = vec![
            Box::new(FILES_UPLOADED.clone()),
            Box::new(FILES_DEDUPLICATED.clone()),
            Box::new(BYTES_UPLOADED.clone()),
            Box::new(UPLOAD_REJECTIONS.clone()),
            Box::new(METADATA_WRITE_RETRIES.clone()),
            Box::new(ORPHAN_BLOBS_DELETED.clone()),
            Box::new(INGEST_DURATION.clone()),
            Box::new(SHARES_GENERATED.clone()),
            Box::new(SHARES_ACCESSED.clone()),
            Box::new(SHARES_EXPIRED.clone()),
        ];
        for collector in collectors {
            REGISTRY
                .register(collector)
                .expect("metric registration failed");
        }
    });
}

/// GET /metrics - Prometheus metrics endpoint.
pub async fn metrics_handler() -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();

    let mut buffer = Vec::new();
    match encoder.encode(&metric_families, &mut buffer) {
        Ok(()) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
            buffer,
        ),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            [("content-type", "text/plain; charset=utf-8")],
            format!("Failed to encode metrics: {e}").into_bytes(),
        ),
    }
}

/// Count an upload rejected by the policy.
pub fn record_upload_rejection(reason: &str) {
    UPLOAD_REJECTIONS.with_label_values(&[reason]).inc();
}
