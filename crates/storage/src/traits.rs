//! Object store trait definition.

use crate::error::StorageResult;
use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
use std::pin::Pin;
use time::OffsetDateTime;

/// A stream of bytes for reading blob contents.
pub type ByteStream = Pin<Box<dyn Stream<Item = StorageResult<Bytes>> + Send>>;

/// Blob storage for uploaded files.
///
/// Keys are `/`-separated relative paths as produced by
/// [`dokhub_core::storage_path`]. Writes become visible atomically: a
/// reader never observes a partially written blob under its final key.
#[async_trait]
pub trait ObjectStore: Send + Sync + 'static {
    /// Check if an object exists.
    async fn exists(&self, key: &str) -> StorageResult<bool>;

    /// Get object metadata.
    async fn head(&self, key: &str) -> StorageResult<ObjectMeta>;

    /// Read an object fully into memory.
    async fn get(&self, key: &str) -> StorageResult<Bytes>;

    /// Read an object as a stream.
    async fn get_stream(&self, key: &str) -> StorageResult<ByteStream>;

    /// Write an object, replacing any existing one.
    async fn put(&self, key: &str, data: Bytes) -> StorageResult<()>;

    /// Start a streaming write. Nothing is visible under `key` until
    /// [`StreamingUpload::finish`] succeeds.
    async fn put_stream(
        &self,
        key: &str,
        content_type: Option<&str>,
    ) -> StorageResult<Box<dyn StreamingUpload>>;

    /// Delete an object. Missing objects yield `NotFound`.
    async fn delete(&self, key: &str) -> StorageResult<()>;

    /// List keys under a prefix.
    async fn list(&self, prefix: &str) -> StorageResult<Vec<String>>;

    /// Copy an object to a new key.
    async fn copy(&self, from: &str, to: &str) -> StorageResult<()>;

    /// Short backend name for logs and metrics labels.
    fn backend_name(&self) -> &'static str;

    /// Verify the backend is reachable and writable.
    async fn health_check(&self) -> StorageResult<()> {
        Ok(())
    }
}

/// Object metadata.
#[derive(Clone, Debug)]
pub struct ObjectMeta {
    pub size: u64,
    pub last_modified: Option<OffsetDateTime>,
    pub content_type: Option<String>,
}

/// A streaming write in progress.
#[async_trait]
pub trait StreamingUpload: Send {
    /// Append a chunk.
    async fn write(&mut self, data: Bytes) -> StorageResult<()>;

    /// Commit the object and return the number of bytes written.
    async fn finish(self: Box<Self>) -> StorageResult<u64>;

    /// Discard everything written so far.
    async fn abort(self: Box<Self>) -> StorageResult<()>;
}
