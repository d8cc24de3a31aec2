//! Database models mapping to the metadata schema.

use sqlx::FromRow;
use time::OffsetDateTime;
use uuid::Uuid;

/// User account.
#[derive(Debug, Clone, FromRow)]
pub struct UserRow {
    pub user_id: Uuid,
    pub username: String,
    pub display_name: Option<String>,
    pub email: Option<String>,
    /// `user` or `admin`.
    pub role: String,
    pub disabled: bool,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

/// API token. Only the sha256 of the secret is stored.
#[derive(Debug, Clone, FromRow)]
pub struct TokenRow {
    pub token_id: Uuid,
    pub user_id: Uuid,
    pub token_hash: String,
    pub scopes: String, // JSON array
    pub expires_at: Option<OffsetDateTime>,
    pub revoked_at: Option<OffsetDateTime>,
    pub created_at: OffsetDateTime,
    pub last_used_at: Option<OffsetDateTime>,
    pub description: Option<String>,
}

/// Uploaded file and its classification.
#[derive(Debug, Clone, FromRow)]
pub struct FileRow {
    pub file_id: Uuid,
    pub owner_id: Uuid,
    pub org_id: Option<Uuid>,
    /// Name as supplied by the uploader.
    pub original_name: String,
    pub storage_path: String,
    pub size_bytes: i64,
    pub content_type: Option<String>,
    /// Hex sha256 of the stored bytes.
    pub sha256: String,
    pub category: String,
    pub tags: String, // JSON array
    pub course_code: Option<String>,
    pub description: Option<String>,
    pub semester: Option<String>,
    pub subject: Option<String>,
    pub folder: String,
    pub is_public: bool,
    pub gdpr_compliant: bool,
    pub data_location: String,
    pub idempotency_key: Option<String>,
    pub download_count: i64,
    pub share_count: i64,
    pub last_shared_at: Option<OffsetDateTime>,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

impl FileRow {
    /// Decode the stored tag list. Malformed JSON yields no tags.
    pub fn tag_list(&self) -> Vec<String> {
        serde_json::from_str(&self.tags).unwrap_or_default()
    }
}

/// Filter for file listings. `None` fields match everything.
#[derive(Debug, Clone)]
pub struct FileFilter {
    pub owner_id: Option<Uuid>,
    pub org_id: Option<Uuid>,
    pub category: Option<String>,
    pub course_code: Option<String>,
    pub tag: Option<String>,
    pub limit: i64,
    pub offset: i64,
}

impl Default for FileFilter {
    fn default() -> Self {
        Self {
            owner_id: None,
            org_id: None,
            category: None,
            course_code: None,
            tag: None,
            limit: 100,
            offset: 0,
        }
    }
}

/// Counter updates applied to a file row.
#[derive(Debug, Clone, Copy)]
pub enum FileEvent {
    Downloaded,
    Shared { at: OffsetDateTime },
}

/// Aggregate blob usage.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StorageTotals {
    pub files: u64,
    pub bytes: u64,
}

/// Organization record.
#[derive(Debug, Clone, FromRow)]
pub struct OrganizationRow {
    pub org_id: Uuid,
    pub name: String,
    pub org_type: String,
    pub description: Option<String>,
    pub course_code: Option<String>,
    /// Join code, unique across organizations.
    pub org_code: String,
    pub max_members: i64,
    pub is_public: bool,
    pub created_by: Uuid,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

/// Membership of a user in an organization.
#[derive(Debug, Clone, FromRow)]
pub struct MemberRow {
    pub org_id: Uuid,
    pub user_id: Uuid,
    pub role: String,
    pub status: String,
    pub invited_by: Option<Uuid>,
    pub joined_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

/// Filter for member listings.
#[derive(Debug, Clone, Default)]
pub struct MemberFilter {
    pub role: Option<String>,
    pub status: Option<String>,
}

/// Partial update of a membership.
#[derive(Debug, Clone, Default)]
pub struct MemberUpdate {
    pub role: Option<String>,
    pub status: Option<String>,
}

/// Signed share link. The URL itself is never stored, only a short hash.
#[derive(Debug, Clone, FromRow)]
pub struct ShareRow {
    pub share_id: Uuid,
    pub file_id: Uuid,
    pub shared_by: Uuid,
    pub storage_path: String,
    pub signed_url_hash: String,
    pub purpose: String,
    pub status: String,
    pub expires_at: OffsetDateTime,
    pub created_at: OffsetDateTime,
    pub revoked_at: Option<OffsetDateTime>,
    pub revoked_by: Option<Uuid>,
    pub access_count: i64,
    pub last_accessed_at: Option<OffsetDateTime>,
    pub client_ip: Option<String>,
    pub user_agent: Option<String>,
}

/// Entry in the sharing audit trail.
#[derive(Debug, Clone, FromRow)]
pub struct AuditLogRow {
    pub audit_id: Uuid,
    pub action: String,
    pub share_id: Option<Uuid>,
    pub file_id: Option<Uuid>,
    pub user_id: Option<Uuid>,
    pub details: String, // JSON object
    pub client_ip: Option<String>,
    pub user_agent: Option<String>,
    pub retention_period: String,
    pub created_at: OffsetDateTime,
}

/// Filter for audit listings.
#[derive(Debug, Clone)]
pub struct AuditFilter {
    pub action: Option<String>,
    pub file_id: Option<Uuid>,
    pub share_id: Option<Uuid>,
    pub limit: i64,
}

impl Default for AuditFilter {
    fn default() -> Self {
        Self {
            action: None,
            file_id: None,
            share_id: None,
            limit: 100,
        }
    }
}
