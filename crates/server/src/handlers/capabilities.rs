//! Capability discovery endpoint.

use crate::error::ApiResult;
use crate::state::AppState;
use axum::Json;
use axum::extract::State;
use dokhub_core::FileCategory;
use dokhub_core::org::{MAX_MEMBERS_LIMIT, MemberRole, OrgType};
use serde::Serialize;

/// Capabilities response.
#[derive(Debug, Serialize)]
pub struct CapabilitiesResponse {
    /// Maximum size of one uploaded file in bytes.
    pub max_file_size: u64,
    /// Maximum number of files in one batch.
    pub max_files_per_batch: usize,
    /// Accepted file extensions, without the dot.
    pub allowed_extensions: Vec<String>,
    pub categories: Vec<&'static str>,
    pub organization_types: Vec<&'static str>,
    pub member_roles: Vec<&'static str>,
    pub max_members: u32,
    /// Whether share links can be generated.
    pub sharing_enabled: bool,
    pub default_share_hours: u32,
    pub max_share_hours: u32,
    /// API version.
    pub api_version: &'static str,
}

/// GET /v1/capabilities
pub async fn get_capabilities(
    State(state): State<AppState>,
) -> ApiResult<Json<CapabilitiesResponse>> {
    let policy = state.ingestor.policy();
    Ok(Json(CapabilitiesResponse {
        max_file_size: policy.max_file_size,
        max_files_per_batch: policy.max_files_per_batch,
        allowed_extensions: policy.allowed_extensions.iter().cloned().collect(),
        categories: FileCategory::ALL.iter().map(|c| c.as_str()).collect(),
        organization_types: OrgType::ALL.iter().map(|t| t.as_str()).collect(),
        member_roles: MemberRole::ALL.iter().map(|r| r.as_str()).collect(),
        max_members: MAX_MEMBERS_LIMIT,
        sharing_enabled: state.signer.is_some(),
        default_share_hours: state.config.sharing.default_expiration_hours,
        max_share_hours: state.config.sharing.max_expiration_hours,
        api_version: "v1",
    }))
}
