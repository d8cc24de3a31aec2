//! Shared handler helpers.

use crate::auth::AuthenticatedUser;
use crate::error::{ApiError, ApiResult};
use crate::state::AppState;
use axum::extract::{ConnectInfo, Request};
use axum::http::header::USER_AGENT;
use dokhub_core::AuditAction;
use dokhub_core::org::{MemberRole, MemberStatus, Permission};
use dokhub_core::share::AUDIT_RETENTION_PERIOD;
use dokhub_metadata::models::{AuditLogRow, FileRow, MemberRow, OrganizationRow};
use serde::de::DeserializeOwned;
use std::net::SocketAddr;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use uuid::Uuid;

/// Client-supplied header values are cut to this many characters.
const MAX_CLIENT_FIELD_LEN: usize = 512;

/// Read and parse a JSON request body.
pub async fn read_json<T: DeserializeOwned>(req: Request, limit: usize) -> ApiResult<T> {
    let bytes = axum::body::to_bytes(req.into_body(), limit)
        .await
        .map_err(|e| ApiError::BadRequest(format!("failed to read body: {e}")))?;
    serde_json::from_slice(&bytes).map_err(|e| ApiError::BadRequest(format!("invalid JSON: {e}")))
}

/// Parse a UUID path or body parameter.
pub fn parse_uuid(value: &str, what: &str) -> ApiResult<Uuid> {
    Uuid::parse_str(value.trim()).map_err(|e| ApiError::BadRequest(format!("invalid {what}: {e}")))
}

/// Format a timestamp as RFC 3339.
pub fn format_timestamp(ts: OffsetDateTime) -> ApiResult<String> {
    ts.format(&Rfc3339)
        .map_err(|e| ApiError::Internal(format!("failed to format timestamp: {e}")))
}

pub fn format_optional(ts: Option<OffsetDateTime>) -> ApiResult<Option<String>> {
    ts.map(format_timestamp).transpose()
}

/// Who is calling, as recorded on shares and audit entries.
#[derive(Clone, Debug, Default)]
pub struct ClientContext {
    pub ip: Option<String>,
    pub user_agent: Option<String>,
}

impl ClientContext {
    /// The first `x-forwarded-for` hop wins over the socket address.
    pub fn from_request(req: &Request) -> Self {
        let forwarded = req
            .headers()
            .get("x-forwarded-for")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(',').next())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string);
        let ip = forwarded.or_else(|| {
            req.extensions()
                .get::<ConnectInfo<SocketAddr>>()
                .map(|ConnectInfo(addr)| addr.ip().to_string())
        });
        let user_agent = req
            .headers()
            .get(USER_AGENT)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        Self {
            ip: ip.map(truncate),
            user_agent: user_agent.map(truncate),
        }
    }
}

fn truncate(value: String) -> String {
    if value.chars().count() <= MAX_CLIENT_FIELD_LEN {
        value
    } else {
        value.chars().take(MAX_CLIENT_FIELD_LEN).collect()
    }
}

/// Load a file record or fail with 404.
pub async fn load_file(state: &AppState, file_id: Uuid) -> ApiResult<FileRow> {
    state
        .metadata
        .get_file(file_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("file not found: {file_id}")))
}

/// The caller's active membership in an organization, if any.
pub async fn active_role(
    state: &AppState,
    org_id: Uuid,
    user_id: Uuid,
) -> ApiResult<Option<(MemberRow, MemberRole)>> {
    let member = state.metadata.get_member(org_id, user_id).await?;
    Ok(member
        .filter(|m| MemberStatus::parse(&m.status) == Some(MemberStatus::Active))
        .map(|m| {
            let role = MemberRole::parse_or_default(&m.role);
            (m, role)
        }))
}

/// Require the caller to be an active member of an existing organization.
pub async fn require_membership(
    state: &AppState,
    org_id: Uuid,
    auth: &AuthenticatedUser,
) -> ApiResult<(OrganizationRow, MemberRole)> {
    let org = state
        .metadata
        .get_organization(org_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("organization not found: {org_id}")))?;
    let (_, role) = active_role(state, org_id, auth.user_id())
        .await?
        .ok_or_else(|| {
            ApiError::Forbidden("not an active member of this organization".to_string())
        })?;
    Ok((org, role))
}

/// Require an org permission for the caller.
pub async fn require_permission(
    state: &AppState,
    org_id: Uuid,
    auth: &AuthenticatedUser,
    permission: Permission,
) -> ApiResult<(OrganizationRow, MemberRole)> {
    let (org, role) = require_membership(state, org_id, auth).await?;
    if !role.has_permission(permission) {
        return Err(ApiError::Forbidden(format!(
            "role {} lacks permission {}",
            role.as_str(),
            permission.as_str()
        )));
    }
    Ok((org, role))
}

/// Owner, hub admin, or an active member of the file's organization.
pub async fn can_read_file(
    state: &AppState,
    auth: &AuthenticatedUser,
    file: &FileRow,
) -> ApiResult<bool> {
    if file.owner_id == auth.user_id() || auth.is_admin() {
        return Ok(true);
    }
    match file.org_id {
        Some(org_id) => Ok(active_role(state, org_id, auth.user_id()).await?.is_some()),
        None => Ok(false),
    }
}

/// Owner, hub admin, or an org member allowed to manage files.
pub async fn can_manage_file(
    state: &AppState,
    auth: &AuthenticatedUser,
    file: &FileRow,
) -> ApiResult<bool> {
    if file.owner_id == auth.user_id() || auth.is_admin() {
        return Ok(true);
    }
    match file.org_id {
        Some(org_id) => Ok(active_role(state, org_id, auth.user_id())
            .await?
            .is_some_and(|(_, role)| role.has_permission(Permission::ManageFiles))),
        None => Ok(false),
    }
}

/// An entry for the sharing audit trail.
#[derive(Debug, Clone)]
pub struct AuditEvent {
    pub action: AuditAction,
    pub share_id: Option<Uuid>,
    pub file_id: Option<Uuid>,
    pub user_id: Option<Uuid>,
    pub details: serde_json::Value,
}

impl AuditEvent {
    pub fn new(action: AuditAction) -> Self {
        Self {
            action,
            share_id: None,
            file_id: None,
            user_id: None,
            details: serde_json::Value::Object(Default::default()),
        }
    }

    pub fn share(mut self, share_id: Uuid) -> Self {
        self.share_id = Some(share_id);
        self
    }

    pub fn file(mut self, file_id: Uuid) -> Self {
        self.file_id = Some(file_id);
        self
    }

    pub fn user(mut self, user_id: Uuid) -> Self {
        self.user_id = Some(user_id);
        self
    }

    pub fn details(mut self, details: serde_json::Value) -> Self {
        self.details = details;
        self
    }
}

/// Append an audit entry. Failures are logged and never surface to the caller.
pub async fn record_audit(state: &AppState, event: AuditEvent, client: &ClientContext) {
    let entry = AuditLogRow {
        audit_id: Uuid::new_v4(),
        action: event.action.as_str().to_string(),
        share_id: event.share_id,
        file_id: event.file_id,
        user_id: event.user_id,
        details: event.details.to_string(),
        client_ip: client.ip.clone(),
        user_agent: client.user_agent.clone(),
        retention_period: AUDIT_RETENTION_PERIOD.to_string(),
        created_at: OffsetDateTime::now_utc(),
    };

    if let Err(e) = state.metadata.append_audit(&entry).await {
        tracing::warn!(
            action = %entry.action,
            share_id = ?entry.share_id,
            error = %e,
            "Failed to write audit entry"
        );
    }
}
