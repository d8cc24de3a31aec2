//! User repository.

use crate::error::MetadataResult;
use crate::models::UserRow;
use async_trait::async_trait;
use time::OffsetDateTime;
use uuid::Uuid;

#[async_trait]
pub trait UserRepo: Send + Sync {
    /// Create a user. Duplicate usernames yield `AlreadyExists`.
    async fn create_user(&self, user: &UserRow) -> MetadataResult<()>;

    async fn get_user(&self, user_id: Uuid) -> MetadataResult<Option<UserRow>>;

    async fn get_user_by_username(&self, username: &str) -> MetadataResult<Option<UserRow>>;

    /// All users ordered by username.
    async fn list_users(&self) -> MetadataResult<Vec<UserRow>>;

    /// Change a user's hub role. Returns false if the user does not exist.
    async fn set_user_role(
        &self,
        user_id: Uuid,
        role: &str,
        updated_at: OffsetDateTime,
    ) -> MetadataResult<bool>;

    /// Enable or disable a user. Returns false if the user does not exist.
    async fn set_user_disabled(
        &self,
        user_id: Uuid,
        disabled: bool,
        updated_at: OffsetDateTime,
    ) -> MetadataResult<bool>;

    async fn count_users(&self) -> MetadataResult<u64>;
}
