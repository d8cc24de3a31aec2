//! Storage path generation.

use crate::error::{Error, Result};
use crate::file::{FileId, UserId};
use crate::org::OrgId;

/// Folder used when the uploader does not pick one.
pub const DEFAULT_FOLDER: &str = "uploads";

const MAX_SANITIZED_LEN: usize = 128;
const MAX_FOLDER_SEGMENT_LEN: usize = 64;

/// Who a stored object belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StorageOwner {
    User(UserId),
    Organization(OrgId),
}

/// Make a user-supplied file name safe for use in an object key.
///
/// Keeps ASCII alphanumerics and `._-`, replaces everything else with `_`,
/// collapses repeated underscores and dots, and caps the length while keeping the
/// extension.
pub fn sanitize_file_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for c in name.chars() {
        let mapped = if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
            c
        } else {
            '_'
        };
        if matches!(mapped, '_' | '.') && out.ends_with(mapped) {
            continue;
        }
        out.push(mapped);
    }

    let trimmed = out.trim_matches(|c| c == '_' || c == '.');
    let mut out = if trimmed.is_empty() {
        "file".to_string()
    } else {
        trimmed.to_string()
    };

    if out.len() > MAX_SANITIZED_LEN {
        out = match out.rsplit_once('.') {
            Some((stem, ext)) if ext.len() < 16 => {
                let keep = MAX_SANITIZED_LEN.saturating_sub(ext.len() + 1);
                format!("{}.{ext}", &stem[..keep.min(stem.len())])
            }
            _ => out[..MAX_SANITIZED_LEN].to_string(),
        };
    }
    out
}

/// Check a folder name chosen by the uploader.
pub fn validate_folder(folder: &str) -> Result<()> {
    if folder.is_empty() {
        return Err(Error::InvalidFolder("folder is empty".to_string()));
    }
    for segment in folder.split('/') {
        if segment.is_empty() || segment == "." || segment == ".." {
            return Err(Error::InvalidFolder(format!(
                "invalid segment in '{folder}'"
            )));
        }
        if segment.len() > MAX_FOLDER_SEGMENT_LEN {
            return Err(Error::InvalidFolder(format!(
                "segment '{segment}' exceeds {MAX_FOLDER_SEGMENT_LEN} characters"
            )));
        }
        if !segment
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '_')
        {
            return Err(Error::InvalidFolder(format!(
                "segment '{segment}' may only contain a-z, 0-9, '-' and '_'"
            )));
        }
    }
    Ok(())
}

/// Build the object key for a new upload.
///
/// - user: `{folder}/{user_id}/{millis}_{id8}_{name}`
/// - organization: `organizations/{org_id}/{folder}/{millis}_{id8}_{name}`
pub fn storage_path(
    owner: StorageOwner,
    folder: Option<&str>,
    file_id: FileId,
    name: &str,
    timestamp_millis: i128,
) -> Result<String> {
    let folder = folder.unwrap_or(DEFAULT_FOLDER);
    validate_folder(folder)?;

    let id = file_id.as_uuid().simple().to_string();
    let leaf = format!("{timestamp_millis}_{}_{}", &id[..8], sanitize_file_name(name));

    Ok(match owner {
        StorageOwner::User(user_id) => format!("{folder}/{user_id}/{leaf}"),
        StorageOwner::Organization(org_id) => {
            format!("organizations/{org_id}/{folder}/{leaf}")
        }
    })
}
