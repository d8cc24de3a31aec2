//! Sharing audit log repository.

use crate::error::MetadataResult;
use crate::models::{AuditFilter, AuditLogRow};
use async_trait::async_trait;

#[async_trait]
pub trait AuditRepo: Send + Sync {
    async fn append_audit(&self, entry: &AuditLogRow) -> MetadataResult<()>;

    /// Entries matching the filter, newest first.
    async fn list_audit(&self, filter: &AuditFilter) -> MetadataResult<Vec<AuditLogRow>>;
}
