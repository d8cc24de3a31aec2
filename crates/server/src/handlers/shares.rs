//! Share link endpoints and the expiry sweep.
//!
//! A share link is `/v1/public/shares/{id}?expires=<unix>&sig=<base64url>`.
//! The signature covers the share id, the blob path and the expiry, so a
//! link cannot be retargeted or extended. Only a short hash of the URL is
//! stored.

use crate::auth::{AuthenticatedUser, require_auth};
use crate::error::{ApiError, ApiResult};
use crate::handlers::common::{
    AuditEvent, ClientContext, can_read_file, format_optional, format_timestamp, load_file,
    parse_uuid, read_json, record_audit,
};
use crate::handlers::files::blob_response;
use crate::metrics::{SHARES_ACCESSED, SHARES_EXPIRED, SHARES_GENERATED};
use crate::state::AppState;
use axum::Json;
use axum::extract::{Path, Query, Request, State};
use axum::http::StatusCode;
use axum::response::Response;
use dokhub_core::share::{DEFAULT_SHARE_PURPOSE, url_hash, validate_expiration_hours};
use dokhub_core::token::TokenScope;
use dokhub_core::{AuditAction, DATA_LOCATION_EU, ShareClaims, ShareId, ShareStatus};
use dokhub_metadata::models::{FileEvent, FileRow, ShareRow};
use serde::{Deserialize, Serialize};
use serde_json::json;
use time::OffsetDateTime;
use uuid::Uuid;

const MAX_PURPOSE_LEN: usize = 200;

#[derive(Debug, Deserialize)]
pub struct CreateShareRequest {
    pub file_id: String,
    pub expiration_hours: Option<i64>,
    pub purpose: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct CreateShareResponse {
    pub share_id: String,
    pub signed_url: String,
    pub expires_at: String,
    pub file_name: String,
    pub file_size: u64,
    pub valid_for: String,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct ShareResponse {
    pub share_id: String,
    pub file_id: String,
    pub shared_by: String,
    pub purpose: String,
    /// Effective status: an active share past its deadline reads as expired.
    pub status: String,
    pub expires_at: String,
    pub created_at: String,
    pub revoked_at: Option<String>,
    pub access_count: u64,
    pub last_accessed_at: Option<String>,
}

impl ShareResponse {
    fn from_row(row: &ShareRow, now: OffsetDateTime) -> ApiResult<Self> {
        Ok(Self {
            share_id: row.share_id.to_string(),
            file_id: row.file_id.to_string(),
            shared_by: row.shared_by.to_string(),
            purpose: row.purpose.clone(),
            status: effective_status(row, now).as_str().to_string(),
            expires_at: format_timestamp(row.expires_at)?,
            created_at: format_timestamp(row.created_at)?,
            revoked_at: format_optional(row.revoked_at)?,
            access_count: row.access_count.max(0) as u64,
            last_accessed_at: format_optional(row.last_accessed_at)?,
        })
    }
}

/// Stored status, with overdue active shares reported as expired.
pub fn effective_status(row: &ShareRow, now: OffsetDateTime) -> ShareStatus {
    match ShareStatus::parse(&row.status) {
        Some(ShareStatus::Active) if row.expires_at <= now => ShareStatus::Expired,
        Some(status) => status,
        None => ShareStatus::Expired,
    }
}

/// Public link for a share, absolute when a base URL is configured.
pub fn share_url(base: Option<&str>, share_id: ShareId, expires: i64, sig: &str) -> String {
    let base = base.map(|b| b.trim_end_matches('/')).unwrap_or("");
    format!("{base}/v1/public/shares/{share_id}?expires={expires}&sig={sig}")
}

/// Run the share preconditions in order and return the file and lifetime.
async fn check_share_request(
    state: &AppState,
    auth: &AuthenticatedUser,
    body: &CreateShareRequest,
) -> ApiResult<(FileRow, u32)> {
    let file = load_file(state, parse_uuid(&body.file_id, "file_id")?).await?;

    if !can_read_file(state, auth, &file).await? {
        return Err(ApiError::Forbidden(
            "only the owner or members of the file's organization may share it".to_string(),
        ));
    }

    if !file.gdpr_compliant || file.data_location != DATA_LOCATION_EU {
        return Err(ApiError::GdprPrecondition(format!(
            "file {} is not stored under EU data protection rules",
            file.file_id
        )));
    }

    if !state.storage.exists(&file.storage_path).await? {
        return Err(ApiError::NotFound(format!(
            "file content missing from storage: {}",
            file.file_id
        )));
    }

    let hours = validate_expiration_hours(
        Some(
            body.expiration_hours
                .unwrap_or(i64::from(state.config.sharing.default_expiration_hours)),
        ),
        state.config.sharing.max_expiration_hours,
    )?;

    if let Some(purpose) = &body.purpose
        && purpose.chars().count() > MAX_PURPOSE_LEN
    {
        return Err(ApiError::BadRequest(format!(
            "purpose must be at most {MAX_PURPOSE_LEN} characters"
        )));
    }

    state.require_signer()?;
    Ok((file, hours))
}

/// POST /v1/shares - Generate a signed, time-limited link to a file.
pub async fn create_share(
    State(state): State<AppState>,
    req: Request,
) -> ApiResult<(StatusCode, Json<CreateShareResponse>)> {
    let auth = require_auth(&req)?.clone();
    auth.require_scope(TokenScope::FilesWrite)?;
    let client = ClientContext::from_request(&req);

    let body: CreateShareRequest = read_json(req, state.json_limit()).await?;

    let (file, hours) = match check_share_request(&state, &auth, &body).await {
        Ok(checked) => checked,
        Err(e) => {
            let mut event = AuditEvent::new(AuditAction::Error)
                .user(auth.user_id())
                .details(json!({
                    "operation": "generate",
                    "code": e.code(),
                    "message": e.to_string(),
                }));
            if let Ok(file_id) = Uuid::parse_str(body.file_id.trim()) {
                event = event.file(file_id);
            }
            record_audit(&state, event, &client).await;
            return Err(e);
        }
    };
    let signer = state.require_signer()?;

    let now = OffsetDateTime::now_utc();
    let expires_unix = now.unix_timestamp() + i64::from(hours) * 3600;
    let expires_at = OffsetDateTime::from_unix_timestamp(expires_unix)
        .map_err(|e| ApiError::Internal(format!("invalid expiry: {e}")))?;

    let share_id = ShareId::new();
    let claims = ShareClaims {
        share_id,
        storage_path: file.storage_path.clone(),
        expires_at_unix: expires_unix,
    };
    let signature = signer.sign(&claims);
    let signed_url = share_url(
        state.config.server.public_base_url.as_deref(),
        share_id,
        expires_unix,
        &signature,
    );
    let purpose = body
        .purpose
        .as_deref()
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .unwrap_or(DEFAULT_SHARE_PURPOSE)
        .to_string();

    let share = ShareRow {
        share_id: share_id.into_uuid(),
        file_id: file.file_id,
        shared_by: auth.user_id(),
        storage_path: file.storage_path.clone(),
        signed_url_hash: url_hash(&signed_url),
        purpose: purpose.clone(),
        status: ShareStatus::Active.as_str().to_string(),
        expires_at,
        created_at: now,
        revoked_at: None,
        revoked_by: None,
        access_count: 0,
        last_accessed_at: None,
        client_ip: client.ip.clone(),
        user_agent: client.user_agent.clone(),
    };
    state.metadata.create_share(&share).await?;

    record_audit(
        &state,
        AuditEvent::new(AuditAction::Generated)
            .share(share.share_id)
            .file(file.file_id)
            .user(auth.user_id())
            .details(json!({
                "purpose": purpose,
                "expiration_hours": hours,
                "file_name": file.original_name,
            })),
        &client,
    )
    .await;

    if let Err(e) = state
        .metadata
        .record_file_event(file.file_id, FileEvent::Shared { at: now })
        .await
    {
        tracing::warn!(file_id = %file.file_id, error = %e, "Failed to update share stats");
    }

    SHARES_GENERATED.inc();
    tracing::info!(
        share_id = %share_id,
        file_id = %file.file_id,
        user_id = %auth.user_id(),
        hours,
        "Share link generated"
    );

    Ok((
        StatusCode::CREATED,
        Json(CreateShareResponse {
            share_id: share_id.to_string(),
            signed_url,
            expires_at: format_timestamp(expires_at)?,
            file_name: file.original_name.clone(),
            file_size: file.size_bytes.max(0) as u64,
            valid_for: format!("{hours} timer"),
            message: format!("Delingslenke opprettet. Lenken er gyldig i {hours} timer."),
        }),
    ))
}

/// GET /v1/files/{file_id}/shares
pub async fn list_file_shares(
    State(state): State<AppState>,
    Path(file_id): Path<String>,
    req: Request,
) -> ApiResult<Json<Vec<ShareResponse>>> {
    let auth = require_auth(&req)?.clone();
    auth.require_scope(TokenScope::FilesRead)?;

    let file = load_file(&state, parse_uuid(&file_id, "file id")?).await?;
    if file.owner_id != auth.user_id() && !auth.is_admin() {
        return Err(ApiError::Forbidden(
            "only the owner may list a file's shares".to_string(),
        ));
    }

    let now = OffsetDateTime::now_utc();
    let shares = state.metadata.list_shares_for_file(file.file_id).await?;
    let response: ApiResult<Vec<ShareResponse>> = shares
        .iter()
        .map(|row| ShareResponse::from_row(row, now))
        .collect();
    Ok(Json(response?))
}

/// POST /v1/shares/{share_id}/revoke
pub async fn revoke_share(
    State(state): State<AppState>,
    Path(share_id): Path<String>,
    req: Request,
) -> ApiResult<Json<ShareResponse>> {
    let auth = require_auth(&req)?.clone();
    auth.require_scope(TokenScope::FilesWrite)?;
    let client = ClientContext::from_request(&req);

    let share_id = parse_uuid(&share_id, "share id")?;
    let share = state
        .metadata
        .get_share(share_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("share not found: {share_id}")))?;

    let file_owner = state
        .metadata
        .get_file(share.file_id)
        .await?
        .map(|f| f.owner_id);
    let allowed = share.shared_by == auth.user_id()
        || file_owner == Some(auth.user_id())
        || auth.is_admin();
    if !allowed {
        return Err(ApiError::Forbidden(
            "only the sharer or the file owner may revoke this share".to_string(),
        ));
    }

    let now = OffsetDateTime::now_utc();
    if ShareStatus::parse(&share.status) != Some(ShareStatus::Active)
        || !state
            .metadata
            .revoke_share(share_id, auth.user_id(), now)
            .await?
    {
        return Err(ApiError::Conflict(format!(
            "share is not active ({})",
            share.status
        )));
    }

    record_audit(
        &state,
        AuditEvent::new(AuditAction::Revoked)
            .share(share_id)
            .file(share.file_id)
            .user(auth.user_id()),
        &client,
    )
    .await;
    tracing::info!(share_id = %share_id, user_id = %auth.user_id(), "Share revoked");

    let updated = state
        .metadata
        .get_share(share_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("share not found: {share_id}")))?;
    Ok(Json(ShareResponse::from_row(&updated, now)?))
}

#[derive(Debug, Default, Deserialize)]
pub struct PublicShareQuery {
    pub expires: Option<i64>,
    pub sig: Option<String>,
}

/// Signature and expiry-parameter check for a public link.
fn verify_link(state: &AppState, share: &ShareRow, query: &PublicShareQuery) -> ApiResult<()> {
    let signer = state.require_signer()?;
    let (Some(expires), Some(sig)) = (query.expires, query.sig.as_deref()) else {
        return Err(ApiError::Forbidden(
            "share link is missing its signature".to_string(),
        ));
    };

    let claims = ShareClaims {
        share_id: ShareId::from_uuid(share.share_id),
        storage_path: share.storage_path.clone(),
        expires_at_unix: expires,
    };
    signer.verify(&claims, sig)?;

    if expires != share.expires_at.unix_timestamp() {
        return Err(ApiError::Forbidden(
            "share link does not match this share".to_string(),
        ));
    }
    Ok(())
}

/// GET /v1/public/shares/{share_id} - Serve a file through a signed link.
pub async fn access_share(
    State(state): State<AppState>,
    Path(share_id): Path<String>,
    Query(query): Query<PublicShareQuery>,
    req: Request,
) -> ApiResult<Response> {
    let client = ClientContext::from_request(&req);
    let share_id = parse_uuid(&share_id, "share id")?;
    let share = state
        .metadata
        .get_share(share_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("share not found: {share_id}")))?;

    if let Err(e) = verify_link(&state, &share, &query) {
        record_audit(
            &state,
            AuditEvent::new(AuditAction::Error)
                .share(share_id)
                .file(share.file_id)
                .details(json!({
                    "operation": "access",
                    "code": e.code(),
                    "message": e.to_string(),
                })),
            &client,
        )
        .await;
        return Err(e);
    }

    let now = OffsetDateTime::now_utc();
    match effective_status(&share, now) {
        ShareStatus::Active => {}
        ShareStatus::Revoked => {
            return Err(ApiError::Gone("Delingslenken er trukket tilbake".to_string()));
        }
        ShareStatus::Expired => {
            if ShareStatus::parse(&share.status) == Some(ShareStatus::Active)
                && let Err(e) = state.metadata.mark_share_expired(share_id).await
            {
                tracing::warn!(share_id = %share_id, error = %e, "Failed to mark share expired");
            }
            return Err(ApiError::Gone("Delingslenken har utløpt".to_string()));
        }
    }

    let file = state
        .metadata
        .get_file(share.file_id)
        .await?
        .ok_or_else(|| ApiError::Gone("the shared file no longer exists".to_string()))?;
    let stream = state.storage.get_stream(&share.storage_path).await?;

    if let Err(e) = state.metadata.record_share_access(share_id, now).await {
        tracing::warn!(share_id = %share_id, error = %e, "Failed to count share access");
    }
    record_audit(
        &state,
        AuditEvent::new(AuditAction::Accessed)
            .share(share_id)
            .file(share.file_id),
        &client,
    )
    .await;
    SHARES_ACCESSED.inc();

    Ok(blob_response(&file, stream))
}

/// Expire every overdue active share and audit the sweep.
pub async fn expire_overdue_shares(state: &AppState) -> ApiResult<Vec<Uuid>> {
    let expired = state
        .metadata
        .expire_shares(OffsetDateTime::now_utc())
        .await?;

    if !expired.is_empty() {
        SHARES_EXPIRED.inc_by(expired.len() as u64);
        record_audit(
            state,
            AuditEvent::new(AuditAction::Cleanup).details(json!({
                "expired_count": expired.len(),
                "share_ids": expired,
            })),
            &ClientContext::default(),
        )
        .await;
        tracing::info!(count = expired.len(), "Expired overdue share links");
    }

    Ok(expired)
}
