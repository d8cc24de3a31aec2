//! Time-limited share links and the sharing audit trail.

use crate::error::{Error, Result};
use crate::file::uuid_id;
use crate::hash::ContentHash;
use serde::{Deserialize, Serialize};
use std::fmt;

uuid_id!(
    /// Unique identifier for a share link.
    ShareId,
    "share id"
);

/// Expiration used when the caller does not ask for one.
pub const DEFAULT_EXPIRATION_HOURS: u32 = 24;

/// Longest allowed share lifetime (one week).
pub const MAX_EXPIRATION_HOURS: u32 = 168;

/// Purpose recorded when none is given.
pub const DEFAULT_SHARE_PURPOSE: &str = "external_sharing";

/// Retention period stamped on audit entries.
pub const AUDIT_RETENTION_PERIOD: &str = "7_years";

/// Lifecycle of a share link.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ShareStatus {
    Active,
    Revoked,
    Expired,
}

impl ShareStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Revoked => "revoked",
            Self::Expired => "expired",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(Self::Active),
            "revoked" => Some(Self::Revoked),
            "expired" => Some(Self::Expired),
            _ => None,
        }
    }
}

impl fmt::Display for ShareStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Actions recorded in the sharing audit log.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditAction {
    Generated,
    Revoked,
    Accessed,
    Cleanup,
    Error,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Generated => "generated",
            Self::Revoked => "revoked",
            Self::Accessed => "accessed",
            Self::Cleanup => "cleanup",
            Self::Error => "error",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "generated" => Some(Self::Generated),
            "revoked" => Some(Self::Revoked),
            "accessed" => Some(Self::Accessed),
            "cleanup" => Some(Self::Cleanup),
            "error" => Some(Self::Error),
            _ => None,
        }
    }
}

/// Check a requested share lifetime and return it in hours.
pub fn validate_expiration_hours(hours: Option<i64>, max_hours: u32) -> Result<u32> {
    let hours = hours.unwrap_or(i64::from(DEFAULT_EXPIRATION_HOURS));
    if hours < 1 || hours > i64::from(max_hours) {
        return Err(Error::InvalidExpiration(format!(
            "Utløpstid må være mellom 1 og {max_hours} timer"
        )));
    }
    Ok(hours as u32)
}

/// Short digest of a signed URL, stored instead of the URL itself.
pub fn url_hash(url: &str) -> String {
    ContentHash::compute(url.as_bytes()).short_hex(16)
}

/// The facts a share signature commits to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ShareClaims {
    pub share_id: ShareId,
    pub storage_path: String,
    pub expires_at_unix: i64,
}

impl ShareClaims {
    /// Canonical byte string that gets signed.
    pub fn fingerprint(&self) -> String {
        format!(
            "dokhub-share:1:{}:{}:{}",
            self.share_id, self.storage_path, self.expires_at_unix
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expiration_defaults_and_bounds() {
        assert_eq!(validate_expiration_hours(None, 168).unwrap(), 24);
        assert_eq!(validate_expiration_hours(Some(1), 168).unwrap(), 1);
        assert_eq!(validate_expiration_hours(Some(168), 168).unwrap(), 168);
        assert!(validate_expiration_hours(Some(0), 168).is_err());
        assert!(validate_expiration_hours(Some(169), 168).is_err());
        assert!(validate_expiration_hours(Some(-5), 168).is_err());
        assert!(validate_expiration_hours(Some(48), 24).is_err());
    }

    #[test]
    fn test_url_hash_is_16_hex_chars() {
        let hash = url_hash("https://hub.example/v1/public/shares/abc?sig=x");
        assert_eq!(hash.len(), 16);
        assert!(hash.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(hash, url_hash("https://hub.example/other"));
    }

    #[test]
    fn test_fingerprint_format() {
        let share_id = ShareId::new();
        let claims = ShareClaims {
            share_id,
            storage_path: "uploads/u/1_a.pdf".to_string(),
            expires_at_unix: 1_700_000_000,
        };
        assert_eq!(
            claims.fingerprint(),
            format!("dokhub-share:1:{share_id}:uploads/u/1_a.pdf:1700000000")
        );
    }

    #[test]
    fn test_status_parse() {
        for status in [ShareStatus::Active, ShareStatus::Revoked, ShareStatus::Expired] {
            assert_eq!(ShareStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(ShareStatus::parse("paused"), None);
    }
}
