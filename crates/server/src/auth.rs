//! Authentication and authorization middleware.

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;
use axum::extract::{Request, State};
use axum::http::HeaderValue;
use axum::http::header::AUTHORIZATION;
use axum::middleware::Next;
use axum::response::Response;
use dokhub_core::token::{Token, TokenId, TokenScope, UserRole};
use dokhub_core::UserId;
use dokhub_metadata::models::{TokenRow, UserRow};
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use time::OffsetDateTime;
use tracing::Instrument;
use uuid::Uuid;

/// Header carrying the request correlation ID.
pub const TRACE_ID_HEADER: &str = "x-trace-id";

/// Longer client trace IDs are truncated.
const MAX_TRACE_ID_LEN: usize = 128;

/// Trace ID for request correlation.
#[derive(Clone, Debug)]
pub struct TraceId(pub String);

impl TraceId {
    /// Generate a new random trace ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Create a trace ID from a client-provided value.
    ///
    /// Keeps printable ASCII only, capped at [`MAX_TRACE_ID_LEN`] characters.
    pub fn from_client(value: &str) -> Self {
        let sanitized: String = value
            .chars()
            .take(MAX_TRACE_ID_LEN)
            .filter(|c| c.is_ascii_graphic())
            .collect();

        if sanitized.is_empty() {
            Self::new()
        } else {
            Self(sanitized)
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for TraceId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TraceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Authenticated request extension.
#[derive(Clone, Debug)]
pub struct AuthenticatedUser {
    /// The validated token.
    pub token: Token,
    /// The account the token acts for.
    pub user: UserRow,
}

impl AuthenticatedUser {
    pub fn user_id(&self) -> Uuid {
        self.user.user_id
    }

    pub fn role(&self) -> UserRole {
        UserRole::parse(&self.user.role)
    }

    /// Check if the token has a specific scope.
    pub fn has_scope(&self, scope: TokenScope) -> bool {
        self.token.has_scope(scope)
    }

    /// Hub administrators need both the admin role and an admin-scoped token.
    pub fn is_admin(&self) -> bool {
        self.role() == UserRole::Admin && self.has_scope(TokenScope::HubAdmin)
    }

    /// Require a specific scope, returning an error if not present.
    pub fn require_scope(&self, scope: TokenScope) -> ApiResult<()> {
        if self.has_scope(scope) {
            Ok(())
        } else {
            Err(ApiError::Forbidden(format!(
                "missing required scope: {scope}"
            )))
        }
    }

    /// Require hub administrator rights.
    pub fn require_admin(&self) -> ApiResult<()> {
        self.require_scope(TokenScope::HubAdmin)?;
        if self.role() != UserRole::Admin {
            return Err(ApiError::Forbidden(
                "administrator role required".to_string(),
            ));
        }
        Ok(())
    }
}

/// Extract bearer token from Authorization header.
/// The "Bearer" scheme is case-insensitive (RFC 6750).
fn extract_bearer_token(req: &Request) -> Option<&str> {
    req.headers()
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| {
            if v.len() >= 7 && v[..7].eq_ignore_ascii_case("bearer ") {
                Some(v[7..].trim())
            } else {
                None
            }
        })
}

/// Extract trace ID from the `x-trace-id` header or generate a new one.
fn extract_or_generate_trace_id(req: &Request) -> TraceId {
    req.headers()
        .get(TRACE_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(TraceId::from_client)
        .unwrap_or_else(TraceId::new)
}

/// Hash a token secret for storage lookup (lowercase hex sha256).
pub fn hash_token(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}

/// Convert a stored token row into a domain token.
///
/// Unknown scopes are dropped with a warning.
pub fn token_from_row(row: &TokenRow) -> ApiResult<Token> {
    let scopes: Vec<String> = serde_json::from_str(&row.scopes)
        .map_err(|e| ApiError::Internal(format!("invalid token scopes: {e}")))?;

    let scopes: HashSet<TokenScope> = scopes
        .iter()
        .filter_map(|s| match TokenScope::parse(s) {
            Ok(scope) => Some(scope),
            Err(_) => {
                tracing::warn!(
                    token_id = %row.token_id,
                    invalid_scope = %s,
                    "Token contains invalid scope, ignoring"
                );
                None
            }
        })
        .collect();

    Ok(Token {
        id: TokenId::from_uuid(row.token_id),
        user_id: UserId::from_uuid(row.user_id),
        scopes,
        expires_at: row.expires_at,
        revoked_at: row.revoked_at,
        created_at: row.created_at,
        description: row.description.clone(),
    })
}

/// Resolve a bearer secret to an authenticated user.
///
/// Returns `Ok(None)` for unknown tokens; handlers that need a caller
/// reject the request later through [`require_auth`].
async fn authenticate(state: &AppState, secret: &str) -> ApiResult<Option<AuthenticatedUser>> {
    let Some(row) = state.metadata.get_token_by_hash(&hash_token(secret)).await? else {
        return Ok(None);
    };

    let token = token_from_row(&row)?;
    if !token.is_valid() {
        return Err(ApiError::Unauthorized(
            "token expired or revoked".to_string(),
        ));
    }

    let user = state
        .metadata
        .get_user(row.user_id)
        .await?
        .ok_or_else(|| ApiError::Unauthorized("token owner no longer exists".to_string()))?;
    if user.disabled {
        return Err(ApiError::Unauthorized("user account is disabled".to_string()));
    }

    // Last-used tracking is best effort.
    let metadata = state.metadata.clone();
    let token_id = row.token_id;
    tokio::spawn(async move {
        if let Err(e) = metadata
            .touch_token(token_id, OffsetDateTime::now_utc())
            .await
        {
            tracing::warn!(token_id = %token_id, error = %e, "Failed to record token use");
        }
    });

    Ok(Some(AuthenticatedUser { token, user }))
}

/// Authentication middleware that validates tokens and sets up trace context.
///
/// The trace ID is echoed back in the `x-trace-id` response header.
pub async fn auth_middleware(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let trace_id = extract_or_generate_trace_id(&req);
    let span = tracing::info_span!("request", trace_id = %trace_id);
    let header = HeaderValue::from_str(trace_id.as_str()).ok();
    req.extensions_mut().insert(trace_id);

    let result = async {
        if let Some(secret) = extract_bearer_token(&req)
            && let Some(auth) = authenticate(&state, secret).await?
        {
            req.extensions_mut().insert(auth);
        }
        Ok::<_, ApiError>(next.run(req).await)
    }
    .instrument(span)
    .await;

    let mut response = match result {
        Ok(response) => response,
        Err(e) => axum::response::IntoResponse::into_response(e),
    };
    if let Some(value) = header {
        response.headers_mut().insert(TRACE_ID_HEADER, value);
    }
    Ok(response)
}

/// Require authentication (token must be present).
pub fn require_auth(req: &Request) -> ApiResult<&AuthenticatedUser> {
    req.extensions()
        .get::<AuthenticatedUser>()
        .ok_or_else(|| ApiError::Unauthorized("authentication required".to_string()))
}

/// Get the trace ID from request extensions.
pub fn get_trace_id(req: &Request) -> Option<&TraceId> {
    req.extensions().get::<TraceId>()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(role: &str) -> UserRow {
        let now = OffsetDateTime::now_utc();
        UserRow {
            user_id: Uuid::new_v4(),
            username: "kari".to_string(),
            display_name: None,
            email: None,
            role: role.to_string(),
            disabled: false,
            created_at: now,
            updated_at: now,
        }
    }

    fn auth(role: &str, scopes: &[TokenScope]) -> AuthenticatedUser {
        let user = user(role);
        AuthenticatedUser {
            token: Token {
                id: TokenId::new(),
                user_id: UserId::from_uuid(user.user_id),
                scopes: scopes.iter().copied().collect(),
                expires_at: None,
                revoked_at: None,
                created_at: OffsetDateTime::now_utc(),
                description: None,
            },
            user,
        }
    }

    #[test]
    fn test_trace_id_sanitized() {
        let id = TraceId::from_client("abc\n\u{7f}def ghi");
        assert_eq!(id.as_str(), "abcdefghi");

        let long = "x".repeat(500);
        assert_eq!(TraceId::from_client(&long).as_str().len(), MAX_TRACE_ID_LEN);

        // Nothing printable left: a fresh UUID is used instead.
        assert_eq!(TraceId::from_client("\n\n").as_str().len(), 36);
    }

    #[test]
    fn test_hash_token_is_lowercase_hex() {
        assert_eq!(
            hash_token("test-admin-token"),
            "17d6bfe05d1b1fb7bc499f8e3f639c7b3eda4c40f321eef8887a0c04c89a99c5"
        );
    }

    #[test]
    fn test_require_admin_needs_role_and_scope() {
        assert!(auth("admin", &[TokenScope::HubAdmin]).require_admin().is_ok());
        assert!(auth("admin", &[TokenScope::FilesWrite]).require_admin().is_err());
        assert!(auth("user", &[TokenScope::HubAdmin]).require_admin().is_err());
        assert!(!auth("user", &[TokenScope::HubAdmin]).is_admin());
    }

    #[test]
    fn test_require_scope() {
        let caller = auth("user", &[TokenScope::FilesRead]);
        assert!(caller.require_scope(TokenScope::FilesRead).is_ok());
        assert!(matches!(
            caller.require_scope(TokenScope::FilesWrite),
            Err(ApiError::Forbidden(_))
        ));
    }

    #[test]
    fn test_token_from_row_drops_unknown_scopes() {
        let now = OffsetDateTime::now_utc();
        let row = TokenRow {
            token_id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            token_hash: "h".to_string(),
            scopes: r#"["files:read","cache:admin"]"#.to_string(),
            expires_at: None,
            revoked_at: None,
            created_at: now,
            last_used_at: None,
            description: None,
        };
        let token = token_from_row(&row).unwrap();
        assert_eq!(token.scopes.len(), 1);
        assert!(token.has_scope(TokenScope::FilesRead));
    }
}
