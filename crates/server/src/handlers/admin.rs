//! Administrative endpoints.

use crate::auth::{hash_token, require_auth};
use crate::error::{ApiError, ApiResult};
use crate::handlers::common::{format_optional, format_timestamp, parse_uuid, read_json};
use crate::handlers::shares::expire_overdue_shares;
use crate::state::AppState;
use axum::Json;
use axum::extract::{Path, Query, Request, State};
use axum::http::StatusCode;
use dokhub_core::AuditAction;
use dokhub_core::token::{TokenScope, UserRole};
use dokhub_metadata::models::{AuditFilter, AuditLogRow, TokenRow, UserRow};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

const MAX_USERNAME_LEN: usize = 64;
const MAX_AUDIT_LIMIT: i64 = 1000;

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub storage: &'static str,
    pub metadata: &'static str,
}

/// GET /v1/health - Storage and metadata health.
///
/// Unauthenticated so load balancers and probes can use it.
pub async fn health_check(State(state): State<AppState>) -> ApiResult<Json<HealthResponse>> {
    if let Err(e) = state.storage.health_check().await {
        tracing::error!(error = %e, "Storage health check failed");
        return Err(ApiError::ServiceUnavailable(format!("storage: {e}")));
    }
    if let Err(e) = state.metadata.health_check().await {
        tracing::error!(error = %e, "Metadata health check failed");
        return Err(ApiError::ServiceUnavailable(format!("metadata: {e}")));
    }

    Ok(Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        storage: "ok",
        metadata: "ok",
    }))
}

/// A user account as returned by the API.
#[derive(Debug, Serialize)]
pub struct UserResponse {
    pub user_id: String,
    pub username: String,
    pub display_name: Option<String>,
    pub email: Option<String>,
    pub role: String,
    pub disabled: bool,
    pub created_at: String,
}

impl UserResponse {
    fn from_row(row: &UserRow) -> ApiResult<Self> {
        Ok(Self {
            user_id: row.user_id.to_string(),
            username: row.username.clone(),
            display_name: row.display_name.clone(),
            email: row.email.clone(),
            role: row.role.clone(),
            disabled: row.disabled,
            created_at: format_timestamp(row.created_at)?,
        })
    }
}

/// Create user request.
#[derive(Debug, Deserialize)]
pub struct CreateUserRequest {
    pub username: String,
    pub display_name: Option<String>,
    pub email: Option<String>,
    /// `user` (default) or `admin`.
    pub role: Option<String>,
    /// Issue a token for the new user in the same call.
    #[serde(default)]
    pub issue_token: bool,
    pub scopes: Option<Vec<String>>,
    pub expires_in_secs: Option<u64>,
}

#[derive(Debug, Serialize)]
pub struct CreateUserResponse {
    pub user: UserResponse,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<CreateTokenResponse>,
}

/// Create token request.
#[derive(Debug, Deserialize)]
pub struct CreateTokenRequest {
    pub user_id: String,
    pub scopes: Vec<String>,
    pub expires_in_secs: Option<u64>,
    pub description: Option<String>,
}

/// Create token response. The secret is only ever returned here.
#[derive(Debug, Serialize)]
pub struct CreateTokenResponse {
    pub token_id: String,
    pub token_secret: String,
    pub expires_at: Option<String>,
}

/// Token listing response.
#[derive(Debug, Serialize)]
pub struct TokenInfo {
    pub token_id: String,
    pub user_id: String,
    pub scopes: Vec<String>,
    pub expires_at: Option<String>,
    pub revoked_at: Option<String>,
    pub created_at: String,
    pub last_used_at: Option<String>,
    pub description: Option<String>,
}

fn validate_username(username: &str) -> ApiResult<String> {
    let username = username.trim().to_lowercase();
    let valid_chars = username
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'));
    if username.len() < 2 || username.len() > MAX_USERNAME_LEN || !valid_chars {
        return Err(ApiError::BadRequest(format!(
            "username must be 2-{MAX_USERNAME_LEN} characters of a-z, 0-9, '.', '_' or '-'"
        )));
    }
    Ok(username)
}

fn parse_user_role(role: Option<&str>) -> ApiResult<UserRole> {
    match role {
        None | Some("user") => Ok(UserRole::User),
        Some("admin") => Ok(UserRole::Admin),
        Some(other) => Err(ApiError::BadRequest(format!("invalid role: {other}"))),
    }
}

/// Parse requested scopes, rejecting unknown ones and admin scope for non-admins.
fn parse_scopes(scopes: &[String], user: &UserRow) -> ApiResult<Vec<TokenScope>> {
    if scopes.is_empty() {
        return Err(ApiError::BadRequest("at least one scope is required".to_string()));
    }
    let mut parsed = Vec::with_capacity(scopes.len());
    for scope in scopes {
        let scope = TokenScope::parse(scope)
            .map_err(|_| ApiError::BadRequest(format!("invalid scope: {scope}")))?;
        if scope == TokenScope::HubAdmin && UserRole::parse(&user.role) != UserRole::Admin {
            return Err(ApiError::BadRequest(
                "hub:admin scope requires a user with the admin role".to_string(),
            ));
        }
        if !parsed.contains(&scope) {
            parsed.push(scope);
        }
    }
    Ok(parsed)
}

fn generate_token_secret() -> String {
    use base64::Engine;
    use rand::RngCore;
    let mut bytes = [0u8; 32];
    rand::rng().fill_bytes(&mut bytes);
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes)
}

async fn issue_token(
    state: &AppState,
    user: &UserRow,
    scopes: &[TokenScope],
    expires_in_secs: Option<u64>,
    description: Option<String>,
) -> ApiResult<CreateTokenResponse> {
    let token_secret = generate_token_secret();
    let now = OffsetDateTime::now_utc();
    let expires_at = match expires_in_secs {
        Some(secs) => {
            let secs_i64: i64 = secs.try_into().map_err(|_| {
                ApiError::BadRequest(format!("expires_in_secs too large: {secs}"))
            })?;
            Some(now + time::Duration::seconds(secs_i64))
        }
        None => None,
    };

    let scope_names: Vec<&str> = scopes.iter().map(|s| s.as_str()).collect();
    let scopes_json = serde_json::to_string(&scope_names)
        .map_err(|e| ApiError::Internal(format!("failed to serialize scopes: {e}")))?;

    let token_row = TokenRow {
        token_id: Uuid::new_v4(),
        user_id: user.user_id,
        token_hash: hash_token(&token_secret),
        scopes: scopes_json,
        expires_at,
        revoked_at: None,
        created_at: now,
        last_used_at: None,
        description,
    };
    state.metadata.create_token(&token_row).await?;

    tracing::info!(
        token_id = %token_row.token_id,
        user_id = %user.user_id,
        scopes = ?scope_names,
        "Token issued"
    );

    Ok(CreateTokenResponse {
        token_id: token_row.token_id.to_string(),
        token_secret,
        expires_at: format_optional(expires_at)?,
    })
}

/// POST /v1/admin/users - Create a user, optionally with a token.
pub async fn create_user(
    State(state): State<AppState>,
    req: Request,
) -> ApiResult<(StatusCode, Json<CreateUserResponse>)> {
    let auth = require_auth(&req)?.clone();
    auth.require_admin()?;

    let body: CreateUserRequest = read_json(req, state.json_limit()).await?;
    let username = validate_username(&body.username)?;
    let role = parse_user_role(body.role.as_deref())?;

    if state.metadata.get_user_by_username(&username).await?.is_some() {
        return Err(ApiError::Conflict(format!("username taken: {username}")));
    }

    let now = OffsetDateTime::now_utc();
    let user = UserRow {
        user_id: Uuid::new_v4(),
        username,
        display_name: body.display_name.filter(|s| !s.trim().is_empty()),
        email: body.email.filter(|s| !s.trim().is_empty()),
        role: role.as_str().to_string(),
        disabled: false,
        created_at: now,
        updated_at: now,
    };

    let scopes = match &body.scopes {
        Some(requested) => parse_scopes(requested, &user)?,
        None => vec![TokenScope::FilesRead, TokenScope::FilesWrite],
    };

    state.metadata.create_user(&user).await?;
    tracing::info!(
        user_id = %user.user_id,
        username = %user.username,
        created_by = %auth.user_id(),
        "User created"
    );

    let token = if body.issue_token {
        Some(issue_token(&state, &user, &scopes, body.expires_in_secs, None).await?)
    } else {
        None
    };

    Ok((
        StatusCode::CREATED,
        Json(CreateUserResponse {
            user: UserResponse::from_row(&user)?,
            token,
        }),
    ))
}

/// GET /v1/admin/users
pub async fn list_users(
    State(state): State<AppState>,
    req: Request,
) -> ApiResult<Json<Vec<UserResponse>>> {
    let auth = require_auth(&req)?;
    auth.require_admin()?;

    let users = state.metadata.list_users().await?;
    let response: ApiResult<Vec<UserResponse>> = users.iter().map(UserResponse::from_row).collect();
    Ok(Json(response?))
}

#[derive(Debug, Deserialize)]
pub struct MakeAdminRequest {
    pub user_id: Option<String>,
}

/// POST /v1/admin/make-admin - Grant the admin role to a user.
pub async fn make_admin(
    State(state): State<AppState>,
    req: Request,
) -> ApiResult<Json<UserResponse>> {
    let auth = require_auth(&req)?.clone();
    auth.require_admin()?;

    let body: MakeAdminRequest = read_json(req, state.json_limit()).await?;
    let user_id = match body.user_id.as_deref().map(str::trim) {
        Some(id) if !id.is_empty() => parse_uuid(id, "user_id")?,
        _ => return Err(ApiError::BadRequest("user_id is required".to_string())),
    };

    let updated = state
        .metadata
        .set_user_role(user_id, UserRole::Admin.as_str(), OffsetDateTime::now_utc())
        .await?;
    if !updated {
        return Err(ApiError::NotFound(format!("user not found: {user_id}")));
    }

    let user = state
        .metadata
        .get_user(user_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("user not found: {user_id}")))?;

    tracing::info!(user_id = %user_id, granted_by = %auth.user_id(), "Admin role granted");
    Ok(Json(UserResponse::from_row(&user)?))
}

/// POST /v1/admin/tokens - Create a new token for a user.
pub async fn create_token(
    State(state): State<AppState>,
    req: Request,
) -> ApiResult<(StatusCode, Json<CreateTokenResponse>)> {
    let auth = require_auth(&req)?.clone();
    auth.require_admin()?;

    let body: CreateTokenRequest = read_json(req, state.json_limit()).await?;
    let user_id = parse_uuid(&body.user_id, "user_id")?;
    let user = state
        .metadata
        .get_user(user_id)
        .await?
        .ok_or_else(|| ApiError::BadRequest(format!("user not found: {user_id}")))?;
    if user.disabled {
        return Err(ApiError::BadRequest(format!("user is disabled: {user_id}")));
    }

    let scopes = parse_scopes(&body.scopes, &user)?;
    let response = issue_token(
        &state,
        &user,
        &scopes,
        body.expires_in_secs,
        body.description,
    )
    .await?;

    Ok((StatusCode::CREATED, Json(response)))
}

#[derive(Debug, Default, Deserialize)]
pub struct ListTokensQuery {
    pub user_id: Option<String>,
}

/// GET /v1/admin/tokens - List tokens.
pub async fn list_tokens(
    State(state): State<AppState>,
    Query(query): Query<ListTokensQuery>,
    req: Request,
) -> ApiResult<Json<Vec<TokenInfo>>> {
    let auth = require_auth(&req)?;
    auth.require_admin()?;

    let user_filter = query
        .user_id
        .as_deref()
        .map(|id| parse_uuid(id, "user_id"))
        .transpose()?;

    let tokens = state.metadata.list_tokens(user_filter).await?;

    let response: ApiResult<Vec<TokenInfo>> = tokens
        .into_iter()
        .map(|token| {
            let scopes: Vec<String> = serde_json::from_str(&token.scopes)
                .map_err(|e| ApiError::Internal(format!("invalid token scopes: {e}")))?;
            Ok(TokenInfo {
                token_id: token.token_id.to_string(),
                user_id: token.user_id.to_string(),
                scopes,
                expires_at: format_optional(token.expires_at)?,
                revoked_at: format_optional(token.revoked_at)?,
                created_at: format_timestamp(token.created_at)?,
                last_used_at: format_optional(token.last_used_at)?,
                description: token.description,
            })
        })
        .collect();

    Ok(Json(response?))
}

/// DELETE /v1/admin/tokens/{token_id} - Revoke a token.
pub async fn revoke_token(
    State(state): State<AppState>,
    Path(token_id): Path<String>,
    req: Request,
) -> ApiResult<StatusCode> {
    let auth = require_auth(&req)?;
    auth.require_admin()?;

    let token_id = parse_uuid(&token_id, "token id")?;
    if !state
        .metadata
        .revoke_token(token_id, OffsetDateTime::now_utc())
        .await?
    {
        return Err(ApiError::NotFound(format!(
            "token not found or already revoked: {token_id}"
        )));
    }

    tracing::info!(token_id = %token_id, revoked_by = %auth.user_id(), "Token revoked");
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Serialize)]
pub struct CleanupResponse {
    pub expired: usize,
    pub share_ids: Vec<String>,
}

/// POST /v1/admin/shares/cleanup - Expire overdue share links now.
pub async fn cleanup_shares(
    State(state): State<AppState>,
    req: Request,
) -> ApiResult<Json<CleanupResponse>> {
    let auth = require_auth(&req)?;
    auth.require_admin()?;

    let expired = expire_overdue_shares(&state).await?;
    Ok(Json(CleanupResponse {
        expired: expired.len(),
        share_ids: expired.iter().map(Uuid::to_string).collect(),
    }))
}

#[derive(Debug, Default, Deserialize)]
pub struct AuditQuery {
    pub action: Option<String>,
    pub file_id: Option<String>,
    pub share_id: Option<String>,
    pub limit: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct AuditEntryResponse {
    pub audit_id: String,
    pub action: String,
    pub share_id: Option<String>,
    pub file_id: Option<String>,
    pub user_id: Option<String>,
    pub details: serde_json::Value,
    pub client_ip: Option<String>,
    pub user_agent: Option<String>,
    pub retention_period: String,
    pub created_at: String,
}

impl AuditEntryResponse {
    fn from_row(row: AuditLogRow) -> ApiResult<Self> {
        let details = serde_json::from_str(&row.details)
            .unwrap_or_else(|_| serde_json::Value::String(row.details.clone()));
        Ok(Self {
            audit_id: row.audit_id.to_string(),
            action: row.action,
            share_id: row.share_id.map(|id| id.to_string()),
            file_id: row.file_id.map(|id| id.to_string()),
            user_id: row.user_id.map(|id| id.to_string()),
            details,
            client_ip: row.client_ip,
            user_agent: row.user_agent,
            retention_period: row.retention_period,
            created_at: format_timestamp(row.created_at)?,
        })
    }
}

/// GET /v1/admin/audit - Sharing audit trail, newest first.
pub async fn list_audit(
    State(state): State<AppState>,
    Query(query): Query<AuditQuery>,
    req: Request,
) -> ApiResult<Json<Vec<AuditEntryResponse>>> {
    let auth = require_auth(&req)?;
    auth.require_admin()?;

    let action = match query.action.as_deref() {
        Some(a) => Some(
            AuditAction::parse(a)
                .ok_or_else(|| ApiError::BadRequest(format!("invalid action: {a}")))?
                .as_str()
                .to_string(),
        ),
        None => None,
    };
    let filter = AuditFilter {
        action,
        file_id: query
            .file_id
            .as_deref()
            .map(|id| parse_uuid(id, "file_id"))
            .transpose()?,
        share_id: query
            .share_id
            .as_deref()
            .map(|id| parse_uuid(id, "share_id"))
            .transpose()?,
        limit: query.limit.unwrap_or(100).clamp(1, MAX_AUDIT_LIMIT),
    };

    let rows = state.metadata.list_audit(&filter).await?;
    let response: ApiResult<Vec<AuditEntryResponse>> =
        rows.into_iter().map(AuditEntryResponse::from_row).collect();
    Ok(Json(response?))
}

/// Hub-wide counters.
#[derive(Debug, Serialize)]
pub struct StatsResponse {
    pub users: u64,
    pub files: u64,
    pub total_bytes: u64,
    pub organizations: u64,
    pub active_shares: u64,
}

/// GET /v1/admin/stats
pub async fn get_stats(
    State(state): State<AppState>,
    req: Request,
) -> ApiResult<Json<StatsResponse>> {
    let auth = require_auth(&req)?;
    auth.require_admin()?;

    let totals = state.metadata.storage_totals().await?;
    Ok(Json(StatsResponse {
        users: state.metadata.count_users().await?,
        files: totals.files,
        total_bytes: totals.bytes,
        organizations: state.metadata.count_organizations().await?,
        active_shares: state.metadata.count_active_shares().await?,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(role: UserRole) -> UserRow {
        let now = OffsetDateTime::now_utc();
        UserRow {
            user_id: Uuid::new_v4(),
            username: "ola".to_string(),
            display_name: None,
            email: None,
            role: role.as_str().to_string(),
            disabled: false,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_validate_username() {
        assert_eq!(validate_username("  Ola.Nordmann ").unwrap(), "ola.nordmann");
        assert!(validate_username("x").is_err());
        assert!(validate_username("ola nordmann").is_err());
        assert!(validate_username(&"a".repeat(MAX_USERNAME_LEN + 1)).is_err());
    }

    #[test]
    fn test_parse_user_role() {
        assert_eq!(parse_user_role(None).unwrap(), UserRole::User);
        assert_eq!(parse_user_role(Some("admin")).unwrap(), UserRole::Admin);
        assert!(parse_user_role(Some("root")).is_err());
    }

    #[test]
    fn test_parse_scopes() {
        let regular = user(UserRole::User);
        let scopes = parse_scopes(
            &["files:read".to_string(), "files:read".to_string()],
            &regular,
        )
        .unwrap();
        assert_eq!(scopes, vec![TokenScope::FilesRead]);

        assert!(parse_scopes(&[], &regular).is_err());
        assert!(parse_scopes(&["cache:read".to_string()], &regular).is_err());
        assert!(parse_scopes(&["hub:admin".to_string()], &regular).is_err());
        assert!(parse_scopes(&["hub:admin".to_string()], &user(UserRole::Admin)).is_ok());
    }

    #[test]
    fn test_generate_token_secret() {
        let a = generate_token_secret();
        let b = generate_token_secret();
        assert_eq!(a.len(), 43);
        assert_ne!(a, b);
    }
}
