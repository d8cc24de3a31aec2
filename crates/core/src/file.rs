//! File identity, categories and user-supplied upload metadata.

use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident, $label:literal) => {
        $(#[$meta])*
        #[derive(
            Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, ::serde::Serialize, ::serde::Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(::uuid::Uuid);

        impl $name {
            /// Generate a new random identifier.
            pub fn new() -> Self {
                Self(::uuid::Uuid::new_v4())
            }

            /// Parse from a string.
            pub fn parse(s: &str) -> $crate::Result<Self> {
                ::uuid::Uuid::parse_str(s)
                    .map(Self)
                    .map_err(|e| $crate::Error::InvalidId(format!("invalid {}: {e}", $label)))
            }

            /// Wrap an existing UUID.
            pub fn from_uuid(id: ::uuid::Uuid) -> Self {
                Self(id)
            }

            /// Get the underlying UUID.
            pub fn as_uuid(&self) -> &::uuid::Uuid {
                &self.0
            }

            /// Consume into the underlying UUID.
            pub fn into_uuid(self) -> ::uuid::Uuid {
                self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl ::std::fmt::Debug for $name {
            fn fmt(&self, f: &mut ::std::fmt::Formatter<'_>) -> ::std::fmt::Result {
                write!(f, "{}({})", stringify!($name), self.0)
            }
        }

        impl ::std::fmt::Display for $name {
            fn fmt(&self, f: &mut ::std::fmt::Formatter<'_>) -> ::std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<::uuid::Uuid> for $name {
            fn from(id: ::uuid::Uuid) -> Self {
                Self(id)
            }
        }
    };
}

pub(crate) use uuid_id;

uuid_id!(
    /// Unique identifier for an uploaded file.
    FileId,
    "file id"
);

uuid_id!(
    /// Unique identifier for a user account.
    UserId,
    "user id"
);

/// Coarse file category derived from the extension.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileCategory {
    Documents,
    Spreadsheets,
    Presentations,
    Images,
    Cad,
    Code,
    Archives,
    Other,
}

impl FileCategory {
    /// All categories, in display order.
    pub const ALL: [FileCategory; 8] = [
        Self::Documents,
        Self::Spreadsheets,
        Self::Presentations,
        Self::Images,
        Self::Cad,
        Self::Code,
        Self::Archives,
        Self::Other,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Documents => "documents",
            Self::Spreadsheets => "spreadsheets",
            Self::Presentations => "presentations",
            Self::Images => "images",
            Self::Cad => "cad",
            Self::Code => "code",
            Self::Archives => "archives",
            Self::Other => "other",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.as_str() == s)
    }
}

impl fmt::Display for FileCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Optional metadata a user attaches to an upload.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct UploadMetadata {
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub semester: Option<String>,
    #[serde(default)]
    pub subject: Option<String>,
    #[serde(default)]
    pub course_code: Option<String>,
    /// Raw comma-separated tag list as typed by the user.
    #[serde(default)]
    pub tags: Option<String>,
    #[serde(default)]
    pub is_public: bool,
    #[serde(default)]
    pub folder: Option<String>,
}

/// Split a comma-separated tag string, trimming and dropping empty entries.
pub fn parse_tags(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|tag| !tag.is_empty())
        .map(str::to_string)
        .collect()
}

/// Lowercased extension after the last dot, if any.
pub fn file_extension(name: &str) -> Option<String> {
    let (stem, ext) = name.rsplit_once('.')?;
    if stem.is_empty() || ext.is_empty() {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}
