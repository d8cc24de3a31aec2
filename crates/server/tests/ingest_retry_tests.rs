//! Tests for retrying metadata writes during ingestion.

mod common;

use async_trait::async_trait;
use bytes::Bytes;
use common::fixtures::{pdf_content, sha256_hash};
use dokhub_core::{RetryPolicy, UploadMetadata, UploadPolicy};
use dokhub_metadata::models::{FileEvent, FileFilter, FileRow, StorageTotals, UserRow};
use dokhub_metadata::repos::{FileRepo, UserRepo};
use dokhub_metadata::{MetadataError, MetadataResult, SqliteStore};
use dokhub_server::{ApiError, IngestRequest, Ingestor};
use dokhub_storage::{FilesystemBackend, ObjectStore};
use std::convert::Infallible;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use tempfile::TempDir;
use time::OffsetDateTime;
use uuid::Uuid;

/// How `FlakyRepo::insert_file` fails before delegating.
#[derive(Clone, Copy)]
enum Failure {
    Timeout,
    Constraint,
}

/// A file repository whose inserts fail a fixed number of times.
struct FlakyRepo {
    inner: Arc<SqliteStore>,
    failures_left: AtomicU32,
    failure: Failure,
    insert_calls: AtomicU32,
}

impl FlakyRepo {
    fn new(inner: Arc<SqliteStore>, failures: u32, failure: Failure) -> Self {
        Self {
            inner,
            failures_left: AtomicU32::new(failures),
            failure,
            insert_calls: AtomicU32::new(0),
        }
    }

    fn insert_calls(&self) -> u32 {
        self.insert_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl FileRepo for FlakyRepo {
    async fn insert_file(&self, file: &FileRow) -> MetadataResult<bool> {
        self.insert_calls.fetch_add(1, Ordering::SeqCst);
        let failing = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(match self.failure {
                Failure::Timeout => MetadataError::Timeout(Duration::from_millis(5)),
                Failure::Constraint => {
                    MetadataError::Constraint("CHECK constraint failed: files".to_string())
                }
            });
        }
        self.inner.insert_file(file).await
    }

    async fn get_file(&self, file_id: Uuid) -> MetadataResult<Option<FileRow>> {
        self.inner.get_file(file_id).await
    }

    async fn get_file_by_idempotency_key(
        &self,
        owner_id: Uuid,
        key: &str,
    ) -> MetadataResult<Option<FileRow>> {
        self.inner.get_file_by_idempotency_key(owner_id, key).await
    }

    async fn list_files(&self, filter: &FileFilter) -> MetadataResult<Vec<FileRow>> {
        self.inner.list_files(filter).await
    }

    async fn delete_file(&self, file_id: Uuid) -> MetadataResult<bool> {
        self.inner.delete_file(file_id).await
    }

    async fn record_file_event(&self, file_id: Uuid, event: FileEvent) -> MetadataResult<()> {
        self.inner.record_file_event(file_id, event).await
    }

    async fn storage_totals(&self) -> MetadataResult<StorageTotals> {
        self.inner.storage_totals().await
    }
}

struct Harness {
    storage: Arc<dyn ObjectStore>,
    metadata: Arc<SqliteStore>,
    owner_id: Uuid,
    _temp: TempDir,
}

async fn harness() -> Harness {
    let temp = tempfile::tempdir().unwrap();
    let storage: Arc<dyn ObjectStore> = Arc::new(
        FilesystemBackend::new(temp.path().join("storage"))
            .await
            .unwrap(),
    );
    let metadata = Arc::new(
        SqliteStore::new(&temp.path().join("metadata.db"), None)
            .await
            .unwrap(),
    );

    let now = OffsetDateTime::now_utc();
    let owner_id = Uuid::new_v4();
    metadata
        .create_user(&UserRow {
            user_id: owner_id,
            username: "ingrid".to_string(),
            display_name: None,
            email: None,
            role: "user".to_string(),
            disabled: false,
            created_at: now,
            updated_at: now,
        })
        .await
        .unwrap();

    Harness {
        storage,
        metadata,
        owner_id,
        _temp: temp,
    }
}

fn fast_retry(max_attempts: u32) -> RetryPolicy {
    RetryPolicy {
        max_attempts,
        initial_backoff: Duration::from_millis(1),
        max_backoff: Duration::from_millis(5),
        multiplier: 2.0,
    }
}

fn request(owner_id: Uuid, data: &Bytes) -> IngestRequest {
    IngestRequest {
        owner_id,
        org_id: None,
        file_name: "Laboppgave.pdf".to_string(),
        content_type: Some("application/pdf".to_string()),
        declared_size: Some(data.len() as u64),
        expected_sha256: None,
        idempotency_key: None,
        metadata: UploadMetadata::default(),
    }
}

fn body(data: Bytes) -> impl futures::Stream<Item = Result<Bytes, Infallible>> + Send {
    futures::stream::iter(vec![Ok(data)])
}

#[tokio::test]
async fn test_transient_failures_are_retried() {
    let h = harness().await;
    let repo = Arc::new(FlakyRepo::new(h.metadata.clone(), 2, Failure::Timeout));
    let ingestor = Ingestor::new(
        h.storage.clone(),
        repo.clone(),
        UploadPolicy::default(),
        fast_retry(3),
    );

    let data = pdf_content(7, 4096);
    let outcome = ingestor
        .ingest(request(h.owner_id, &data), body(data.clone()))
        .await
        .unwrap();

    assert_eq!(repo.insert_calls(), 3);
    assert!(!outcome.deduplicated);
    assert_eq!(outcome.file.sha256, sha256_hash(&data));

    let stored = h
        .metadata
        .get_file(outcome.file.file_id)
        .await
        .unwrap()
        .expect("record should exist after retries");
    assert_eq!(stored.storage_path, outcome.file.storage_path);
    assert!(h.storage.exists(&stored.storage_path).await.unwrap());
}

#[tokio::test]
async fn test_exhausted_retries_remove_blob() {
    let h = harness().await;
    let repo = Arc::new(FlakyRepo::new(h.metadata.clone(), 5, Failure::Timeout));
    let ingestor = Ingestor::new(
        h.storage.clone(),
        repo.clone(),
        UploadPolicy::default(),
        fast_retry(3),
    );

    let data = pdf_content(8, 2048);
    let err = ingestor
        .ingest(request(h.owner_id, &data), body(data))
        .await
        .unwrap_err();

    assert!(matches!(err, ApiError::MetadataUnavailable(_)), "{err:?}");
    assert_eq!(repo.insert_calls(), 3);
    assert!(h.storage.list("").await.unwrap().is_empty());
    assert_eq!(h.metadata.storage_totals().await.unwrap().files, 0);
}

#[tokio::test]
async fn test_permanent_failure_is_not_retried() {
    let h = harness().await;
    let repo = Arc::new(FlakyRepo::new(h.metadata.clone(), 1, Failure::Constraint));
    let ingestor = Ingestor::new(
        h.storage.clone(),
        repo.clone(),
        UploadPolicy::default(),
        fast_retry(5),
    );

    let data = pdf_content(9, 1024);
    let err = ingestor
        .ingest(request(h.owner_id, &data), body(data))
        .await
        .unwrap_err();

    assert!(matches!(err, ApiError::MetadataUnavailable(_)), "{err:?}");
    assert_eq!(repo.insert_calls(), 1);
    assert!(h.storage.list("").await.unwrap().is_empty());
}
