//! Organization and membership repository.

use crate::error::MetadataResult;
use crate::models::{MemberFilter, MemberRow, MemberUpdate, OrganizationRow};
use async_trait::async_trait;
use time::OffsetDateTime;
use uuid::Uuid;

#[async_trait]
pub trait OrganizationRepo: Send + Sync {
    /// Create an organization together with its first admin, atomically.
    /// A taken join code yields `AlreadyExists`.
    async fn create_organization(
        &self,
        org: &OrganizationRow,
        creator: &MemberRow,
    ) -> MetadataResult<()>;

    async fn get_organization(&self, org_id: Uuid) -> MetadataResult<Option<OrganizationRow>>;

    async fn get_organization_by_code(
        &self,
        org_code: &str,
    ) -> MetadataResult<Option<OrganizationRow>>;

    /// Organizations where the user is an active member, by name.
    async fn list_organizations_for_user(
        &self,
        user_id: Uuid,
    ) -> MetadataResult<Vec<OrganizationRow>>;

    async fn count_organizations(&self) -> MetadataResult<u64>;

    /// Delete an organization and its memberships.
    async fn delete_organization(&self, org_id: Uuid) -> MetadataResult<bool>;

    /// Add a member. An existing membership yields `AlreadyExists`; an active
    /// member beyond the organization's `max_members` yields `Conflict`.
    async fn add_member(&self, member: &MemberRow) -> MetadataResult<()>;

    async fn get_member(&self, org_id: Uuid, user_id: Uuid) -> MetadataResult<Option<MemberRow>>;

    async fn list_members(
        &self,
        org_id: Uuid,
        filter: &MemberFilter,
    ) -> MetadataResult<Vec<MemberRow>>;

    /// Apply a partial update and return the new row, or `None` if absent.
    ///
    /// Refused with `Conflict` when it would take away the last active admin.
    async fn update_member(
        &self,
        org_id: Uuid,
        user_id: Uuid,
        update: &MemberUpdate,
        updated_at: OffsetDateTime,
    ) -> MetadataResult<Option<MemberRow>>;

    /// Returns `false` if absent; `Conflict` if this is the last active admin.
    async fn remove_member(&self, org_id: Uuid, user_id: Uuid) -> MetadataResult<bool>;

    async fn count_active_members(&self, org_id: Uuid) -> MetadataResult<u64>;

    /// Active members holding the admin role.
    async fn count_admins(&self, org_id: Uuid) -> MetadataResult<u64>;
}
