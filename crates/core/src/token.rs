//! Users, API tokens and authorization scopes.

use crate::file::{UserId, uuid_id};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use time::OffsetDateTime;

uuid_id!(
    /// Unique identifier for a token.
    TokenId,
    "token id"
);

/// Token scopes for authorization.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TokenScope {
    /// List, download and share own files; read organizations.
    #[serde(rename = "files:read")]
    FilesRead,
    /// Upload and delete files; manage organizations and shares.
    #[serde(rename = "files:write")]
    FilesWrite,
    /// Hub administration: users, tokens, cleanup, audit.
    #[serde(rename = "hub:admin")]
    HubAdmin,
}

impl TokenScope {
    /// Parse from string.
    pub fn parse(s: &str) -> crate::Result<Self> {
        match s {
            "files:read" => Ok(Self::FilesRead),
            "files:write" => Ok(Self::FilesWrite),
            "hub:admin" => Ok(Self::HubAdmin),
            _ => Err(crate::Error::InvalidToken(format!("unknown scope: {s}"))),
        }
    }

    /// Get the string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FilesRead => "files:read",
            Self::FilesWrite => "files:write",
            Self::HubAdmin => "hub:admin",
        }
    }

    /// Check if this scope implies another scope.
    pub fn implies(&self, other: &Self) -> bool {
        match self {
            Self::HubAdmin => true,
            Self::FilesWrite => matches!(other, Self::FilesWrite | Self::FilesRead),
            Self::FilesRead => matches!(other, Self::FilesRead),
        }
    }
}

impl fmt::Display for TokenScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Hub-wide role of a user account.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserRole {
    User,
    Admin,
}

impl UserRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Admin => "admin",
        }
    }

    /// Unknown stored values are treated as a regular user.
    pub fn parse(s: &str) -> Self {
        match s {
            "admin" => Self::Admin,
            _ => Self::User,
        }
    }
}

/// A validated token with its metadata.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Token {
    /// Token identifier.
    pub id: TokenId,
    /// User the token acts for.
    pub user_id: UserId,
    /// Granted scopes.
    pub scopes: HashSet<TokenScope>,
    /// When the token expires.
    #[serde(with = "time::serde::rfc3339::option")]
    pub expires_at: Option<OffsetDateTime>,
    /// When the token was revoked (if revoked).
    #[serde(with = "time::serde::rfc3339::option")]
    pub revoked_at: Option<OffsetDateTime>,
    /// When the token was created.
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    pub description: Option<String>,
}

impl Token {
    pub fn is_revoked(&self) -> bool {
        self.revoked_at.is_some()
    }

    pub fn is_expired(&self) -> bool {
        self.expires_at
            .is_some_and(|expires_at| OffsetDateTime::now_utc() > expires_at)
    }

    /// Check if the token is valid (not expired or revoked).
    pub fn is_valid(&self) -> bool {
        !self.is_revoked() && !self.is_expired()
    }

    /// Check if the token has a specific scope.
    pub fn has_scope(&self, scope: TokenScope) -> bool {
        self.scopes.iter().any(|s| s.implies(&scope))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn token_with(scopes: &[TokenScope]) -> Token {
        Token {
            id: TokenId::new(),
            user_id: UserId::new(),
            scopes: scopes.iter().copied().collect(),
            expires_at: None,
            revoked_at: None,
            created_at: OffsetDateTime::now_utc(),
            description: None,
        }
    }

    #[test]
    fn test_scope_implies() {
        assert!(TokenScope::HubAdmin.implies(&TokenScope::FilesRead));
        assert!(TokenScope::HubAdmin.implies(&TokenScope::FilesWrite));
        assert!(TokenScope::HubAdmin.implies(&TokenScope::HubAdmin));

        assert!(TokenScope::FilesWrite.implies(&TokenScope::FilesRead));
        assert!(!TokenScope::FilesWrite.implies(&TokenScope::HubAdmin));

        assert!(TokenScope::FilesRead.implies(&TokenScope::FilesRead));
        assert!(!TokenScope::FilesRead.implies(&TokenScope::FilesWrite));
    }

    #[test]
    fn test_scope_parse() {
        for scope in [
            TokenScope::FilesRead,
            TokenScope::FilesWrite,
            TokenScope::HubAdmin,
        ] {
            assert_eq!(TokenScope::parse(scope.as_str()).unwrap(), scope);
        }
        assert!(TokenScope::parse("cache:read").is_err());
    }

    #[test]
    fn test_token_validity() {
        let mut token = token_with(&[TokenScope::FilesWrite]);
        assert!(token.is_valid());
        assert!(token.has_scope(TokenScope::FilesRead));
        assert!(!token.has_scope(TokenScope::HubAdmin));

        token.expires_at = Some(OffsetDateTime::now_utc() - time::Duration::seconds(1));
        assert!(token.is_expired());
        assert!(!token.is_valid());

        token.expires_at = None;
        token.revoked_at = Some(OffsetDateTime::now_utc());
        assert!(!token.is_valid());
    }

    #[test]
    fn test_user_role_parse() {
        assert_eq!(UserRole::parse("admin"), UserRole::Admin);
        assert_eq!(UserRole::parse("user"), UserRole::User);
        assert_eq!(UserRole::parse("superuser"), UserRole::User);
    }
}
