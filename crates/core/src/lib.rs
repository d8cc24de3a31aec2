//! Core domain types and shared logic for dokhub.
//!
//! This crate defines the data model used across all other crates:
//! - Upload validation policy and content sniffing
//! - Auto-categorization, filename tags and course-code extraction
//! - Storage path generation
//! - Organizations, roles and permissions
//! - Share links and audit actions
//! - Token scopes and authorization
//! - Retry policy for metadata writes

pub mod classify;
pub mod config;
pub mod error;
pub mod file;
pub mod hash;
pub mod org;
pub mod path;
pub mod policy;
pub mod retry;
pub mod share;
pub mod token;

pub use classify::{Classification, categorize, classify, extract_course_code, is_valid_course_code};
pub use error::{Error, Result};
pub use file::{FileCategory, FileId, UploadMetadata, UserId};
pub use hash::{ContentHash, ContentHasher};
pub use org::{MemberRole, MemberStatus, OrgId, OrgType, OrganizationDraft, Permission};
pub use path::{StorageOwner, sanitize_file_name, storage_path};
pub use policy::{FileCandidate, UploadPolicy, ValidationReport};
pub use retry::RetryPolicy;
pub use share::{AuditAction, ShareClaims, ShareId, ShareStatus};
pub use token::{Token, TokenId, TokenScope, UserRole};

/// Default maximum size of a single uploaded file: 50 MiB.
pub const DEFAULT_MAX_FILE_SIZE: u64 = 50 * 1024 * 1024;

/// Default maximum number of files accepted in one batch.
pub const DEFAULT_MAX_FILES_PER_BATCH: usize = 10;

/// Data residency recorded on every ingested file.
pub const DATA_LOCATION_EU: &str = "EU";
