//! Error types for the core domain.

use thiserror::Error;

/// Core domain error type.
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid file name: {0}")]
    InvalidFileName(String),

    #[error("file is empty")]
    EmptyFile,

    #[error("file too large: {size} bytes (max {max})")]
    FileTooLarge { size: u64, max: u64 },

    #[error("file type not allowed: .{0}")]
    DisallowedExtension(String),

    #[error("content type not allowed: {0}")]
    DisallowedContentType(String),

    #[error("content does not match extension: .{extension} looks like {detected}")]
    ContentMismatch { extension: String, detected: String },

    #[error("executable content is not allowed ({0})")]
    ExecutableContent(String),

    #[error("too many files: {count} (max {max})")]
    TooManyFiles { count: usize, max: usize },

    #[error("invalid folder: {0}")]
    InvalidFolder(String),

    #[error("invalid course code: {0}")]
    InvalidCourseCode(String),

    #[error("invalid organization: {}", .0.join("; "))]
    InvalidOrganization(Vec<String>),

    #[error("invalid role: {0}")]
    InvalidRole(String),

    #[error("invalid expiration: {0}")]
    InvalidExpiration(String),

    #[error("invalid identifier: {0}")]
    InvalidId(String),

    #[error("invalid hash: {0}")]
    InvalidHash(String),

    #[error("hash mismatch: expected {expected}, got {actual}")]
    HashMismatch { expected: String, actual: String },

    #[error("invalid token: {0}")]
    InvalidToken(String),
}

impl Error {
    /// Short machine-readable reason, used for metric labels and API codes.
    pub fn reason(&self) -> &'static str {
        match self {
            Self::InvalidFileName(_) => "invalid_file_name",
            Self::EmptyFile => "empty_file",
            Self::FileTooLarge { .. } => "file_too_large",
            Self::DisallowedExtension(_) => "disallowed_extension",
            Self::DisallowedContentType(_) => "disallowed_content_type",
            Self::ContentMismatch { .. } => "content_mismatch",
            Self::ExecutableContent(_) => "executable_content",
            Self::TooManyFiles { .. } => "too_many_files",
            Self::InvalidFolder(_) => "invalid_folder",
            Self::InvalidCourseCode(_) => "invalid_course_code",
            Self::InvalidOrganization(_) => "invalid_organization",
            Self::InvalidRole(_) => "invalid_role",
            Self::InvalidExpiration(_) => "invalid_expiration",
            Self::InvalidId(_) => "invalid_id",
            Self::InvalidHash(_) => "invalid_hash",
            Self::HashMismatch { .. } => "checksum_mismatch",
            Self::InvalidToken(_) => "invalid_token",
        }
    }
}

/// Result type alias for core operations.
pub type Result<T> = std::result::Result<T, Error>;
