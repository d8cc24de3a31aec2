//! Organization and membership endpoints.

use crate::auth::{AuthenticatedUser, require_auth};
use crate::error::{ApiError, ApiResult};
use crate::handlers::common::{
    active_role, format_timestamp, parse_uuid, read_json, require_membership, require_permission,
};
use crate::handlers::files::{ListFilesQuery, ListFilesResponse, file_list};
use crate::state::AppState;
use axum::Json;
use axum::extract::{Path, Query, Request, State};
use axum::http::StatusCode;
use dokhub_core::org::{
    DEFAULT_MAX_MEMBERS, MemberRole, MemberStatus, OrganizationDraft, Permission,
    generate_org_code,
};
use dokhub_core::token::TokenScope;
use dokhub_metadata::MetadataError;
use dokhub_metadata::models::{MemberFilter, MemberRow, MemberUpdate, OrganizationRow};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

/// Attempts at finding an unused join code.
const ORG_CODE_ATTEMPTS: usize = 5;

#[derive(Debug, Serialize)]
pub struct OrganizationResponse {
    pub org_id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub org_type: String,
    pub description: Option<String>,
    pub course_code: Option<String>,
    pub org_code: String,
    pub max_members: i64,
    pub is_public: bool,
    pub created_by: String,
    pub created_at: String,
    /// The caller's role, when they are a member.
    pub role: Option<String>,
}

impl OrganizationResponse {
    fn new(row: &OrganizationRow, role: Option<MemberRole>) -> ApiResult<Self> {
        Ok(Self {
            org_id: row.org_id.to_string(),
            name: row.name.clone(),
            org_type: row.org_type.clone(),
            description: row.description.clone(),
            course_code: row.course_code.clone(),
            org_code: row.org_code.clone(),
            max_members: row.max_members,
            is_public: row.is_public,
            created_by: row.created_by.to_string(),
            created_at: format_timestamp(row.created_at)?,
            role: role.map(|r| r.as_str().to_string()),
        })
    }
}

#[derive(Debug, Serialize)]
pub struct OrganizationDetailResponse {
    #[serde(flatten)]
    pub organization: OrganizationResponse,
    pub member_count: u64,
}

#[derive(Debug, Serialize)]
pub struct MemberResponse {
    pub user_id: String,
    pub username: Option<String>,
    pub display_name: Option<String>,
    pub role: String,
    pub status: String,
    pub invited_by: Option<String>,
    pub joined_at: String,
}

async fn member_response(state: &AppState, row: &MemberRow) -> ApiResult<MemberResponse> {
    let user = state.metadata.get_user(row.user_id).await?;
    Ok(MemberResponse {
        user_id: row.user_id.to_string(),
        username: user.as_ref().map(|u| u.username.clone()),
        display_name: user.and_then(|u| u.display_name),
        role: row.role.clone(),
        status: row.status.clone(),
        invited_by: row.invited_by.map(|id| id.to_string()),
        joined_at: format_timestamp(row.joined_at)?,
    })
}

/// Turn a refused guarded write into a readable 409.
fn guard_conflict(message: &str) -> impl FnOnce(MetadataError) -> ApiError + '_ {
    move |err| match err {
        MetadataError::Conflict(_) => ApiError::Conflict(message.to_string()),
        other => other.into(),
    }
}

const LAST_ADMIN: &str = "an organization must keep at least one active admin";

fn new_member(
    org_id: Uuid,
    user_id: Uuid,
    role: MemberRole,
    invited_by: Option<Uuid>,
    now: OffsetDateTime,
) -> MemberRow {
    MemberRow {
        org_id,
        user_id,
        role: role.as_str().to_string(),
        status: MemberStatus::Active.as_str().to_string(),
        invited_by,
        joined_at: now,
        updated_at: now,
    }
}

/// POST /v1/orgs - Create an organization. The creator becomes its admin.
pub async fn create_organization(
    State(state): State<AppState>,
    req: Request,
) -> ApiResult<(StatusCode, Json<OrganizationResponse>)> {
    let auth = require_auth(&req)?.clone();
    auth.require_scope(TokenScope::FilesWrite)?;

    let draft: OrganizationDraft = read_json(req, state.json_limit()).await?;
    let org_type = draft.validate()?;

    let now = OffsetDateTime::now_utc();
    let org_id = Uuid::new_v4();
    let creator = new_member(org_id, auth.user_id(), MemberRole::Admin, None, now);

    for attempt in 1..=ORG_CODE_ATTEMPTS {
        let org = OrganizationRow {
            org_id,
            name: draft.name.trim().to_string(),
            org_type: org_type.as_str().to_string(),
            description: draft.description.clone(),
            course_code: draft
                .course_code
                .as_deref()
                .map(|c| c.trim().to_ascii_uppercase()),
            org_code: generate_org_code(org_type, &draft.name),
            max_members: i64::from(draft.max_members.unwrap_or(DEFAULT_MAX_MEMBERS)),
            is_public: draft.is_public,
            created_by: auth.user_id(),
            created_at: now,
            updated_at: now,
        };

        match state.metadata.create_organization(&org, &creator).await {
            Ok(()) => {
                tracing::info!(
                    org_id = %org.org_id,
                    org_code = %org.org_code,
                    user_id = %auth.user_id(),
                    "Organization created"
                );
                return Ok((
                    StatusCode::CREATED,
                    Json(OrganizationResponse::new(&org, Some(MemberRole::Admin))?),
                ));
            }
            Err(MetadataError::AlreadyExists(_)) => {
                tracing::debug!(attempt, org_code = %org.org_code, "Organization code taken");
            }
            Err(e) => return Err(e.into()),
        }
    }

    Err(ApiError::Conflict(
        "could not allocate a unique organization code".to_string(),
    ))
}

/// GET /v1/orgs - Organizations the caller is an active member of.
pub async fn list_organizations(
    State(state): State<AppState>,
    req: Request,
) -> ApiResult<Json<Vec<OrganizationResponse>>> {
    let auth = require_auth(&req)?.clone();
    auth.require_scope(TokenScope::FilesRead)?;

    let orgs = state
        .metadata
        .list_organizations_for_user(auth.user_id())
        .await?;

    let mut response = Vec::with_capacity(orgs.len());
    for org in &orgs {
        let role = active_role(&state, org.org_id, auth.user_id())
            .await?
            .map(|(_, role)| role);
        response.push(OrganizationResponse::new(org, role)?);
    }
    Ok(Json(response))
}

/// GET /v1/orgs/{org_id}
pub async fn get_organization(
    State(state): State<AppState>,
    Path(org_id): Path<String>,
    req: Request,
) -> ApiResult<Json<OrganizationDetailResponse>> {
    let auth = require_auth(&req)?.clone();
    auth.require_scope(TokenScope::FilesRead)?;

    let org_id = parse_uuid(&org_id, "organization id")?;
    let (org, role) = require_membership(&state, org_id, &auth).await?;
    let member_count = state.metadata.count_active_members(org_id).await?;

    Ok(Json(OrganizationDetailResponse {
        organization: OrganizationResponse::new(&org, Some(role))?,
        member_count,
    }))
}

#[derive(Debug, Deserialize)]
pub struct JoinOrganizationRequest {
    pub org_code: String,
}

/// POST /v1/orgs/join - Join by code as a student.
pub async fn join_organization(
    State(state): State<AppState>,
    req: Request,
) -> ApiResult<(StatusCode, Json<OrganizationResponse>)> {
    let auth = require_auth(&req)?.clone();
    auth.require_scope(TokenScope::FilesWrite)?;

    let body: JoinOrganizationRequest = read_json(req, state.json_limit()).await?;
    let code = body.org_code.trim().to_uppercase();
    if code.is_empty() {
        return Err(ApiError::BadRequest("org_code is required".to_string()));
    }

    let org = state
        .metadata
        .get_organization_by_code(&code)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("no organization with code {code}")))?;

    if let Some(existing) = state.metadata.get_member(org.org_id, auth.user_id()).await? {
        return Err(match MemberStatus::parse(&existing.status) {
            Some(MemberStatus::Active) => {
                ApiError::Conflict("already a member of this organization".to_string())
            }
            _ => ApiError::Forbidden("membership is suspended".to_string()),
        });
    }

    let member = new_member(
        org.org_id,
        auth.user_id(),
        MemberRole::Student,
        None,
        OffsetDateTime::now_utc(),
    );
    let full = format!("organization is full ({} members)", org.max_members);
    state
        .metadata
        .add_member(&member)
        .await
        .map_err(guard_conflict(&full))?;

    tracing::info!(org_id = %org.org_id, user_id = %auth.user_id(), "Joined organization");
    Ok((
        StatusCode::CREATED,
        Json(OrganizationResponse::new(&org, Some(MemberRole::Student))?),
    ))
}

#[derive(Debug, Default, Deserialize)]
pub struct ListMembersQuery {
    pub role: Option<String>,
    pub status: Option<String>,
}

/// GET /v1/orgs/{org_id}/members
pub async fn list_members(
    State(state): State<AppState>,
    Path(org_id): Path<String>,
    Query(query): Query<ListMembersQuery>,
    req: Request,
) -> ApiResult<Json<Vec<MemberResponse>>> {
    let auth = require_auth(&req)?.clone();
    auth.require_scope(TokenScope::FilesRead)?;

    let org_id = parse_uuid(&org_id, "organization id")?;
    require_permission(&state, org_id, &auth, Permission::ViewMembers).await?;

    let role = query
        .role
        .as_deref()
        .map(MemberRole::parse)
        .transpose()?
        .map(|r| r.as_str().to_string());
    let status = match query.status.as_deref() {
        Some(s) => Some(
            MemberStatus::parse(s)
                .ok_or_else(|| ApiError::BadRequest(format!("invalid status: {s}")))?
                .as_str()
                .to_string(),
        ),
        None => None,
    };

    let rows = state
        .metadata
        .list_members(org_id, &MemberFilter { role, status })
        .await?;

    let mut members = Vec::with_capacity(rows.len());
    for row in &rows {
        members.push(member_response(&state, row).await?);
    }
    Ok(Json(members))
}

#[derive(Debug, Deserialize)]
pub struct InviteMemberRequest {
    pub user_id: Option<String>,
    pub username: Option<String>,
    pub role: Option<String>,
}

async fn resolve_invitee(state: &AppState, body: &InviteMemberRequest) -> ApiResult<Uuid> {
    let user = match (&body.user_id, &body.username) {
        (Some(id), _) => {
            let id = parse_uuid(id, "user_id")?;
            state.metadata.get_user(id).await?
        }
        (None, Some(username)) => state.metadata.get_user_by_username(username.trim()).await?,
        (None, None) => {
            return Err(ApiError::BadRequest(
                "user_id or username is required".to_string(),
            ));
        }
    };
    let user = user.ok_or_else(|| ApiError::NotFound("user not found".to_string()))?;
    if user.disabled {
        return Err(ApiError::BadRequest("user is disabled".to_string()));
    }
    Ok(user.user_id)
}

fn check_role_assignment(role: MemberRole, assigner: MemberRole) -> ApiResult<()> {
    if role.is_privileged() && !assigner.has_permission(Permission::ManageMembers) {
        return Err(ApiError::Forbidden(format!(
            "only organization admins may assign the {role} role"
        )));
    }
    Ok(())
}

/// POST /v1/orgs/{org_id}/members - Add a user to the organization.
pub async fn invite_member(
    State(state): State<AppState>,
    Path(org_id): Path<String>,
    req: Request,
) -> ApiResult<(StatusCode, Json<MemberResponse>)> {
    let auth = require_auth(&req)?.clone();
    auth.require_scope(TokenScope::FilesWrite)?;

    let org_id = parse_uuid(&org_id, "organization id")?;
    let (org, caller_role) =
        require_permission(&state, org_id, &auth, Permission::InviteMembers).await?;

    let body: InviteMemberRequest = read_json(req, state.json_limit()).await?;
    let role = match body.role.as_deref() {
        Some(r) => MemberRole::parse(r)?,
        None => MemberRole::Medlem,
    };
    check_role_assignment(role, caller_role)?;

    let user_id = resolve_invitee(&state, &body).await?;
    if state.metadata.get_member(org_id, user_id).await?.is_some() {
        return Err(ApiError::Conflict(
            "user is already a member of this organization".to_string(),
        ));
    }
    let member = new_member(
        org_id,
        user_id,
        role,
        Some(auth.user_id()),
        OffsetDateTime::now_utc(),
    );
    let full = format!("organization is full ({} members)", org.max_members);
    state
        .metadata
        .add_member(&member)
        .await
        .map_err(guard_conflict(&full))?;

    tracing::info!(
        org_id = %org_id,
        user_id = %user_id,
        role = %role,
        invited_by = %auth.user_id(),
        "Member added"
    );
    Ok((
        StatusCode::CREATED,
        Json(member_response(&state, &member).await?),
    ))
}

#[derive(Debug, Deserialize)]
pub struct UpdateMemberRequest {
    pub role: Option<String>,
    pub status: Option<String>,
}

/// PATCH /v1/orgs/{org_id}/members/{user_id}
pub async fn update_member(
    State(state): State<AppState>,
    Path((org_id, user_id)): Path<(String, String)>,
    req: Request,
) -> ApiResult<Json<MemberResponse>> {
    let auth = require_auth(&req)?.clone();
    auth.require_scope(TokenScope::FilesWrite)?;

    let org_id = parse_uuid(&org_id, "organization id")?;
    let user_id = parse_uuid(&user_id, "user id")?;
    require_permission(&state, org_id, &auth, Permission::ManageMembers).await?;

    let body: UpdateMemberRequest = read_json(req, state.json_limit()).await?;
    let role = body.role.as_deref().map(MemberRole::parse).transpose()?;
    let status = match body.status.as_deref() {
        Some(s) => Some(
            MemberStatus::parse(s)
                .ok_or_else(|| ApiError::BadRequest(format!("invalid status: {s}")))?,
        ),
        None => None,
    };
    if role.is_none() && status.is_none() {
        return Err(ApiError::BadRequest(
            "nothing to update: give role and/or status".to_string(),
        ));
    }

    let update = MemberUpdate {
        role: role.map(|r| r.as_str().to_string()),
        status: status.map(|s| s.as_str().to_string()),
    };
    let updated = state
        .metadata
        .update_member(org_id, user_id, &update, OffsetDateTime::now_utc())
        .await
        .map_err(guard_conflict(LAST_ADMIN))?
        .ok_or_else(|| ApiError::NotFound(format!("member not found: {user_id}")))?;

    tracing::info!(
        org_id = %org_id,
        user_id = %user_id,
        role = %updated.role,
        status = %updated.status,
        "Member updated"
    );
    Ok(Json(member_response(&state, &updated).await?))
}

/// DELETE /v1/orgs/{org_id}/members/{user_id} - Remove a member, or leave.
pub async fn remove_member(
    State(state): State<AppState>,
    Path((org_id, user_id)): Path<(String, String)>,
    req: Request,
) -> ApiResult<StatusCode> {
    let auth = require_auth(&req)?.clone();
    auth.require_scope(TokenScope::FilesWrite)?;

    let org_id = parse_uuid(&org_id, "organization id")?;
    let user_id = parse_uuid(&user_id, "user id")?;
    authorize_removal(&state, org_id, user_id, &auth).await?;

    let removed = state
        .metadata
        .remove_member(org_id, user_id)
        .await
        .map_err(guard_conflict(LAST_ADMIN))?;
    if !removed {
        return Err(ApiError::NotFound(format!("member not found: {user_id}")));
    }

    tracing::info!(
        org_id = %org_id,
        user_id = %user_id,
        removed_by = %auth.user_id(),
        "Member removed"
    );
    Ok(StatusCode::NO_CONTENT)
}

/// Members may always leave; removing someone else needs `manage_members`.
async fn authorize_removal(
    state: &AppState,
    org_id: Uuid,
    user_id: Uuid,
    auth: &AuthenticatedUser,
) -> ApiResult<()> {
    if user_id == auth.user_id() {
        require_membership(state, org_id, auth).await?;
    } else {
        require_permission(state, org_id, auth, Permission::ManageMembers).await?;
    }
    Ok(())
}

/// GET /v1/orgs/{org_id}/files
pub async fn list_organization_files(
    State(state): State<AppState>,
    Path(org_id): Path<String>,
    Query(query): Query<ListFilesQuery>,
    req: Request,
) -> ApiResult<Json<ListFilesResponse>> {
    let auth = require_auth(&req)?.clone();
    auth.require_scope(TokenScope::FilesRead)?;

    let org_id = parse_uuid(&org_id, "organization id")?;
    require_membership(&state, org_id, &auth).await?;

    let mut filter = query.to_filter()?;
    filter.org_id = Some(org_id);

    let rows = state.metadata.list_files(&filter).await?;
    Ok(Json(ListFilesResponse {
        files: file_list(&rows)?,
        limit: filter.limit,
        offset: filter.offset,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn refused_writes_become_conflicts() {
        let err = guard_conflict(LAST_ADMIN)(MetadataError::Conflict("guard".into()));
        assert!(matches!(err, ApiError::Conflict(ref m) if m == LAST_ADMIN));

        let err = guard_conflict(LAST_ADMIN)(MetadataError::NotFound("member".into()));
        assert_eq!(err.status_code(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn privileged_roles_need_manage_members() {
        assert!(check_role_assignment(MemberRole::Admin, MemberRole::Admin).is_ok());
        assert!(check_role_assignment(MemberRole::Student, MemberRole::Laerer).is_ok());
        assert!(matches!(
            check_role_assignment(MemberRole::Moderator, MemberRole::Laerer),
            Err(ApiError::Forbidden(_))
        ));
        assert!(matches!(
            check_role_assignment(MemberRole::Admin, MemberRole::Moderator),
            Err(ApiError::Forbidden(_))
        ));
    }
}
