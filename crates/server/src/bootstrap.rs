//! Admin account and token initialization.

use anyhow::{Result, bail};
use dokhub_core::config::AdminConfig;
use dokhub_core::token::{TokenScope, UserRole};
use dokhub_metadata::MetadataStore;
use dokhub_metadata::models::{TokenRow, UserRow};
use time::OffsetDateTime;
use uuid::Uuid;

/// Username of the bootstrap administrator.
pub const ADMIN_USERNAME: &str = "admin";

/// Normalize a configured token hash to 64 lowercase hex characters.
fn normalize_token_hash(raw: &str) -> Result<String> {
    let hash = raw.strip_prefix("sha256:").unwrap_or(raw).to_lowercase();
    if hash.len() != 64 || !hash.chars().all(|c| c.is_ascii_hexdigit()) {
        bail!("invalid admin token_hash: expected 64 hex chars");
    }
    Ok(hash)
}

/// Make sure the bootstrap `admin` user exists with the admin role.
async fn ensure_admin_user(metadata: &dyn MetadataStore, config: &AdminConfig) -> Result<Uuid> {
    let now = OffsetDateTime::now_utc();

    if let Some(user) = metadata.get_user_by_username(ADMIN_USERNAME).await? {
        if UserRole::parse(&user.role) != UserRole::Admin {
            metadata
                .set_user_role(user.user_id, UserRole::Admin.as_str(), now)
                .await?;
            tracing::warn!(user_id = %user.user_id, "Restored admin role on bootstrap user");
        }
        if user.disabled {
            metadata.set_user_disabled(user.user_id, false, now).await?;
            tracing::warn!(user_id = %user.user_id, "Re-enabled bootstrap admin user");
        }
        return Ok(user.user_id);
    }

    let user = UserRow {
        user_id: Uuid::new_v4(),
        username: ADMIN_USERNAME.to_string(),
        display_name: Some(config.display_name.clone()),
        email: None,
        role: UserRole::Admin.as_str().to_string(),
        disabled: false,
        created_at: now,
        updated_at: now,
    };
    metadata.create_user(&user).await?;
    tracing::info!(user_id = %user.user_id, "Admin user created");
    Ok(user.user_id)
}

/// Ensure the configured admin token exists, rotating the previous one if needed.
///
/// On first start this also creates the `admin` user. If the token hash
/// changes between restarts, the previous bootstrap token is revoked and a
/// new one is created with the new hash.
pub async fn ensure_admin_token(metadata: &dyn MetadataStore, config: &AdminConfig) -> Result<()> {
    let hash = normalize_token_hash(&config.token_hash)?;
    let admin_id = ensure_admin_user(metadata, config).await?;

    if let Some(existing) = metadata.get_token_by_hash(&hash).await? {
        if existing.revoked_at.is_some() {
            bail!(
                "admin token hash matches a revoked token (id={}); use a new token hash",
                existing.token_id
            );
        }
        let now = OffsetDateTime::now_utc();
        if let Some(expires_at) = existing.expires_at
            && expires_at <= now
        {
            bail!(
                "admin token hash matches an expired token (id={}, expired={}); \
                 use a new token hash",
                existing.token_id,
                expires_at
            );
        }
        if existing.user_id != admin_id {
            bail!(
                "admin token hash belongs to another user's token (id={})",
                existing.token_id
            );
        }
        metadata.set_bootstrap_token_id(existing.token_id).await?;
        tracing::debug!("Admin token already exists");
        return Ok(());
    }

    let now = OffsetDateTime::now_utc();
    if let Some(prev_id) = metadata.get_bootstrap_token_id().await? {
        metadata.revoke_token(prev_id, now).await?;
        tracing::info!(token_id = %prev_id, "Previous admin token revoked");
    }

    let token = TokenRow {
        token_id: Uuid::new_v4(),
        user_id: admin_id,
        token_hash: hash,
        scopes: serde_json::to_string(&[TokenScope::HubAdmin.as_str()])?,
        expires_at: None,
        revoked_at: None,
        created_at: now,
        last_used_at: None,
        description: config.token_description.clone(),
    };

    metadata.create_token(&token).await?;
    metadata.set_bootstrap_token_id(token.token_id).await?;
    tracing::info!(token_id = %token.token_id, "Admin token created");

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_token_hash() {
        let hex = "AB".repeat(32);
        assert_eq!(
            normalize_token_hash(&format!("sha256:{hex}")).unwrap(),
            "ab".repeat(32)
        );
        assert!(normalize_token_hash("sha256:abc").is_err());
        assert!(normalize_token_hash(&"g".repeat(64)).is_err());
    }
}
