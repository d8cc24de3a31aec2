//! File repository.

use crate::error::MetadataResult;
use crate::models::{FileEvent, FileFilter, FileRow, StorageTotals};
use async_trait::async_trait;
use uuid::Uuid;

/// Repository for file records.
#[async_trait]
pub trait FileRepo: Send + Sync {
    /// Insert a file record.
    ///
    /// Returns `false` without writing when a record with the same
    /// idempotency key already exists. A duplicate storage path is a
    /// `Constraint` error.
    async fn insert_file(&self, file: &FileRow) -> MetadataResult<bool>;

    async fn get_file(&self, file_id: Uuid) -> MetadataResult<Option<FileRow>>;

    async fn get_file_by_idempotency_key(
        &self,
        owner_id: Uuid,
        key: &str,
    ) -> MetadataResult<Option<FileRow>>;

    /// Files matching the filter, newest first.
    async fn list_files(&self, filter: &FileFilter) -> MetadataResult<Vec<FileRow>>;

    /// Delete a file record. Returns false if it did not exist.
    async fn delete_file(&self, file_id: Uuid) -> MetadataResult<bool>;

    /// Bump download or share counters.
    async fn record_file_event(&self, file_id: Uuid, event: FileEvent) -> MetadataResult<()>;

    /// Total file count and bytes.
    async fn storage_totals(&self) -> MetadataResult<StorageTotals>;
}
