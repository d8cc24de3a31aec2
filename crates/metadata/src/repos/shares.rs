//! Share link repository.

use crate::error::MetadataResult;
use crate::models::ShareRow;
use async_trait::async_trait;
use time::OffsetDateTime;
use uuid::Uuid;

#[async_trait]
pub trait ShareRepo: Send + Sync {
    async fn create_share(&self, share: &ShareRow) -> MetadataResult<()>;

    async fn get_share(&self, share_id: Uuid) -> MetadataResult<Option<ShareRow>>;

    /// Revoke an active share. Returns false if it was not active.
    async fn revoke_share(
        &self,
        share_id: Uuid,
        revoked_by: Uuid,
        revoked_at: OffsetDateTime,
    ) -> MetadataResult<bool>;

    /// Mark one share expired.
    async fn mark_share_expired(&self, share_id: Uuid) -> MetadataResult<()>;

    /// Expire every active share whose deadline has passed, returning their IDs.
    async fn expire_shares(&self, now: OffsetDateTime) -> MetadataResult<Vec<Uuid>>;

    /// Count an access.
    async fn record_share_access(
        &self,
        share_id: Uuid,
        accessed_at: OffsetDateTime,
    ) -> MetadataResult<()>;

    /// Shares of a file, newest first.
    async fn list_shares_for_file(&self, file_id: Uuid) -> MetadataResult<Vec<ShareRow>>;

    async fn count_active_shares(&self) -> MetadataResult<u64>;
}
