//! Authentication-related endpoints.

use crate::auth::require_auth;
use crate::error::ApiResult;
use crate::handlers::common::format_optional;
use crate::state::AppState;
use axum::Json;
use axum::extract::{Request, State};
use serde::Serialize;

/// Response for the authenticated caller.
#[derive(Debug, Serialize)]
pub struct WhoamiResponse {
    pub token_id: String,
    pub user_id: String,
    pub username: String,
    pub display_name: Option<String>,
    pub role: String,
    pub scopes: Vec<String>,
    pub expires_at: Option<String>,
    pub signing_key_name: Option<String>,
}

/// GET /v1/auth/whoami - Return token and user identity.
pub async fn whoami(
    State(state): State<AppState>,
    req: Request,
) -> ApiResult<Json<WhoamiResponse>> {
    let auth = require_auth(&req)?;
    let token = &auth.token;

    let mut scopes: Vec<String> = token
        .scopes
        .iter()
        .map(|s| s.as_str().to_string())
        .collect();
    scopes.sort();

    Ok(Json(WhoamiResponse {
        token_id: token.id.to_string(),
        user_id: auth.user.user_id.to_string(),
        username: auth.user.username.clone(),
        display_name: auth.user.display_name.clone(),
        role: auth.role().as_str().to_string(),
        scopes,
        expires_at: format_optional(token.expires_at)?,
        signing_key_name: state
            .signer
            .as_ref()
            .map(|signer| signer.key_name().to_string()),
    }))
}
