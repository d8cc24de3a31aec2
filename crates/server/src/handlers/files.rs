//! File endpoints: validation, upload, listing, download and deletion.

use crate::auth::require_auth;
use crate::error::{ApiError, ApiResult};
use crate::handlers::common::{
    can_manage_file, can_read_file, format_optional, format_timestamp, load_file, parse_uuid,
    read_json, require_membership, require_permission,
};
use crate::ingest::IngestRequest;
use crate::state::AppState;
use axum::Json;
use axum::body::Body;
use axum::extract::{Path, Query, Request, State};
use axum::http::header::{CONTENT_DISPOSITION, CONTENT_LENGTH, CONTENT_TYPE};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use dokhub_core::org::Permission;
use dokhub_core::token::TokenScope;
use dokhub_core::{ContentHash, FileCandidate, FileCategory, UploadMetadata, classify};
use dokhub_metadata::models::{FileEvent, FileFilter, FileRow};
use dokhub_storage::{ByteStream, StorageError};
use futures::StreamExt;
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, percent_decode_str, utf8_percent_encode};
use serde::{Deserialize, Serialize};

/// Header carrying the file name of a streamed upload.
pub const FILE_NAME_HEADER: &str = "x-file-name";
/// Header carrying the hex sha256 the client computed.
pub const CONTENT_SHA256_HEADER: &str = "x-content-sha256";
pub const IDEMPOTENCY_KEY_HEADER: &str = "idempotency-key";

const MAX_IDEMPOTENCY_KEY_LEN: usize = 128;
const MAX_LIST_LIMIT: i64 = 500;
const DEFAULT_LIST_LIMIT: i64 = 100;

/// RFC 5987 attr-char set for `filename*`.
const FILENAME_ENCODE_SET: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'!')
    .remove(b'#')
    .remove(b'$')
    .remove(b'&')
    .remove(b'+')
    .remove(b'-')
    .remove(b'.')
    .remove(b'^')
    .remove(b'_')
    .remove(b'`')
    .remove(b'|')
    .remove(b'~');

/// A stored file as returned by the API.
#[derive(Debug, Serialize)]
pub struct FileResponse {
    pub file_id: String,
    pub owner_id: String,
    pub org_id: Option<String>,
    pub name: String,
    pub size_bytes: u64,
    pub content_type: Option<String>,
    pub sha256: String,
    pub category: String,
    pub tags: Vec<String>,
    pub course_code: Option<String>,
    pub description: Option<String>,
    pub semester: Option<String>,
    pub subject: Option<String>,
    pub folder: String,
    pub is_public: bool,
    pub gdpr_compliant: bool,
    pub data_location: String,
    pub download_count: u64,
    pub share_count: u64,
    pub last_shared_at: Option<String>,
    pub created_at: String,
}

impl FileResponse {
    pub fn from_row(row: &FileRow) -> ApiResult<Self> {
        Ok(Self {
            file_id: row.file_id.to_string(),
            owner_id: row.owner_id.to_string(),
            org_id: row.org_id.map(|id| id.to_string()),
            name: row.original_name.clone(),
            size_bytes: row.size_bytes.max(0) as u64,
            content_type: row.content_type.clone(),
            sha256: row.sha256.clone(),
            category: row.category.clone(),
            tags: row.tag_list(),
            course_code: row.course_code.clone(),
            description: row.description.clone(),
            semester: row.semester.clone(),
            subject: row.subject.clone(),
            folder: row.folder.clone(),
            is_public: row.is_public,
            gdpr_compliant: row.gdpr_compliant,
            data_location: row.data_location.clone(),
            download_count: row.download_count.max(0) as u64,
            share_count: row.share_count.max(0) as u64,
            last_shared_at: format_optional(row.last_shared_at)?,
            created_at: format_timestamp(row.created_at)?,
        })
    }
}

pub fn file_list(rows: &[FileRow]) -> ApiResult<Vec<FileResponse>> {
    rows.iter().map(FileResponse::from_row).collect()
}

/// Validate request: a batch of candidates and the metadata they will carry.
#[derive(Debug, Deserialize)]
pub struct ValidateFilesRequest {
    pub files: Vec<FileCandidate>,
    #[serde(default)]
    pub metadata: UploadMetadata,
}

/// Classification preview for one candidate.
#[derive(Debug, Serialize)]
pub struct FilePreview {
    pub name: String,
    pub category: FileCategory,
    pub tags: Vec<String>,
    pub course_code: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ValidateFilesResponse {
    pub is_valid: bool,
    pub errors: Vec<String>,
    pub files: Vec<FilePreview>,
}

/// POST /v1/files/validate - Check a batch against the upload policy.
pub async fn validate_files(
    State(state): State<AppState>,
    req: Request,
) -> ApiResult<Json<ValidateFilesResponse>> {
    let auth = require_auth(&req)?.clone();
    auth.require_scope(TokenScope::FilesRead)?;

    let body: ValidateFilesRequest = read_json(req, state.json_limit()).await?;
    let report = state.ingestor.policy().validate_batch(&body.files);

    let files = body
        .files
        .iter()
        .map(|candidate| {
            let classification = classify(&candidate.name, &body.metadata);
            FilePreview {
                name: candidate.name.clone(),
                category: classification.category,
                tags: classification.tags,
                course_code: classification.course_code,
            }
        })
        .collect();

    Ok(Json(ValidateFilesResponse {
        is_valid: report.is_valid,
        errors: report.errors,
        files,
    }))
}

/// Upload metadata carried in the query string.
#[derive(Debug, Default, Deserialize)]
pub struct UploadQuery {
    pub name: Option<String>,
    pub description: Option<String>,
    pub semester: Option<String>,
    pub subject: Option<String>,
    pub course_code: Option<String>,
    pub tags: Option<String>,
    #[serde(default)]
    pub is_public: bool,
    pub folder: Option<String>,
    pub org_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct UploadResponse {
    pub file: FileResponse,
    pub deduplicated: bool,
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> ApiResult<Option<&'a str>> {
    headers
        .get(name)
        .map(|v| {
            v.to_str()
                .map(str::trim)
                .map_err(|_| ApiError::BadRequest(format!("invalid {name} header")))
        })
        .transpose()
}

/// File name from the header (percent-decoded) or the `name` query parameter.
fn upload_file_name(headers: &HeaderMap, query: &UploadQuery) -> ApiResult<String> {
    if let Some(raw) = header_str(headers, FILE_NAME_HEADER)? {
        let decoded = percent_decode_str(raw)
            .decode_utf8()
            .map_err(|_| ApiError::BadRequest(format!("{FILE_NAME_HEADER} is not UTF-8")))?;
        return Ok(decoded.into_owned());
    }
    query
        .name
        .clone()
        .ok_or_else(|| ApiError::BadRequest(format!("missing {FILE_NAME_HEADER} header")))
}

fn upload_content_type(headers: &HeaderMap) -> ApiResult<Option<String>> {
    Ok(header_str(headers, CONTENT_TYPE.as_str())?
        .and_then(|v| v.split(';').next())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_ascii_lowercase))
}

fn idempotency_key(headers: &HeaderMap) -> ApiResult<Option<String>> {
    let Some(key) = header_str(headers, IDEMPOTENCY_KEY_HEADER)? else {
        return Ok(None);
    };
    if key.is_empty() {
        return Ok(None);
    }
    if key.len() > MAX_IDEMPOTENCY_KEY_LEN || !key.chars().all(|c| c.is_ascii_graphic()) {
        return Err(ApiError::BadRequest(format!(
            "{IDEMPOTENCY_KEY_HEADER} must be at most {MAX_IDEMPOTENCY_KEY_LEN} printable characters"
        )));
    }
    Ok(Some(key.to_string()))
}

/// POST /v1/files - Stream one file into the hub.
pub async fn upload_file(
    State(state): State<AppState>,
    Query(query): Query<UploadQuery>,
    req: Request,
) -> ApiResult<(StatusCode, Json<UploadResponse>)> {
    let auth = require_auth(&req)?.clone();
    auth.require_scope(TokenScope::FilesWrite)?;

    let headers = req.headers();
    let file_name = upload_file_name(headers, &query)?;
    let content_type = upload_content_type(headers)?;
    let declared_size = header_str(headers, CONTENT_LENGTH.as_str())?
        .map(|v| {
            v.parse::<u64>()
                .map_err(|_| ApiError::BadRequest("invalid content-length".to_string()))
        })
        .transpose()?;
    let expected_sha256 = header_str(headers, CONTENT_SHA256_HEADER)?
        .map(ContentHash::from_hex)
        .transpose()?;
    let idempotency_key = idempotency_key(headers)?;

    let org_id = match query.org_id.as_deref().filter(|s| !s.trim().is_empty()) {
        Some(raw) => {
            let org_id = parse_uuid(raw, "org_id")?;
            require_permission(&state, org_id, &auth, Permission::UploadFiles).await?;
            Some(org_id)
        }
        None => None,
    };

    let request = IngestRequest {
        owner_id: auth.user_id(),
        org_id,
        file_name,
        content_type,
        declared_size,
        expected_sha256,
        idempotency_key,
        metadata: UploadMetadata {
            description: query.description,
            semester: query.semester,
            subject: query.subject,
            course_code: query.course_code,
            tags: query.tags,
            is_public: query.is_public,
            folder: query.folder,
        },
    };

    let body = req.into_body().into_data_stream();
    let outcome = state.ingestor.ingest(request, body).await?;

    let status = if outcome.deduplicated {
        StatusCode::OK
    } else {
        StatusCode::CREATED
    };
    Ok((
        status,
        Json(UploadResponse {
            file: FileResponse::from_row(&outcome.file)?,
            deduplicated: outcome.deduplicated,
        }),
    ))
}

/// Filters for file listings.
#[derive(Debug, Default, Deserialize)]
pub struct ListFilesQuery {
    pub category: Option<String>,
    pub course_code: Option<String>,
    pub tag: Option<String>,
    pub org_id: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

impl ListFilesQuery {
    /// Convert into a repository filter. Ownership and org scoping are set by the caller.
    pub fn to_filter(&self) -> ApiResult<FileFilter> {
        if let Some(category) = &self.category
            && FileCategory::parse(category).is_none()
        {
            return Err(ApiError::BadRequest(format!("unknown category: {category}")));
        }
        Ok(FileFilter {
            owner_id: None,
            org_id: None,
            category: self.category.clone(),
            course_code: self.course_code.clone(),
            tag: self.tag.clone(),
            limit: self
                .limit
                .unwrap_or(DEFAULT_LIST_LIMIT)
                .clamp(1, MAX_LIST_LIMIT),
            offset: self.offset.unwrap_or(0).max(0),
        })
    }
}

#[derive(Debug, Serialize)]
pub struct ListFilesResponse {
    pub files: Vec<FileResponse>,
    pub limit: i64,
    pub offset: i64,
}

/// GET /v1/files - The caller's files, or an organization's when `org_id` is given.
pub async fn list_files(
    State(state): State<AppState>,
    Query(query): Query<ListFilesQuery>,
    req: Request,
) -> ApiResult<Json<ListFilesResponse>> {
    let auth = require_auth(&req)?.clone();
    auth.require_scope(TokenScope::FilesRead)?;

    let mut filter = query.to_filter()?;
    match query.org_id.as_deref().filter(|s| !s.trim().is_empty()) {
        Some(raw) => {
            let org_id = parse_uuid(raw, "org_id")?;
            require_membership(&state, org_id, &auth).await?;
            filter.org_id = Some(org_id);
        }
        None => filter.owner_id = Some(auth.user_id()),
    }

    let rows = state.metadata.list_files(&filter).await?;
    Ok(Json(ListFilesResponse {
        files: file_list(&rows)?,
        limit: filter.limit,
        offset: filter.offset,
    }))
}

/// GET /v1/files/{file_id}
pub async fn get_file(
    State(state): State<AppState>,
    Path(file_id): Path<String>,
    req: Request,
) -> ApiResult<Json<FileResponse>> {
    let auth = require_auth(&req)?.clone();
    auth.require_scope(TokenScope::FilesRead)?;

    let file = load_file(&state, parse_uuid(&file_id, "file id")?).await?;
    if !can_read_file(&state, &auth, &file).await? {
        return Err(ApiError::Forbidden("no access to this file".to_string()));
    }
    Ok(Json(FileResponse::from_row(&file)?))
}

/// `Content-Disposition` with an ASCII fallback and an RFC 5987 UTF-8 name.
pub fn content_disposition(name: &str) -> String {
    let fallback: String = name
        .chars()
        .map(|c| {
            if (c.is_ascii_graphic() && c != '"' && c != '\\') || c == ' ' {
                c
            } else {
                '_'
            }
        })
        .collect();
    let encoded = utf8_percent_encode(name, FILENAME_ENCODE_SET);
    format!("attachment; filename=\"{fallback}\"; filename*=UTF-8''{encoded}")
}

/// Stream a stored blob back with its size, type and name.
pub fn blob_response(file: &FileRow, stream: ByteStream) -> Response {
    let body_stream = stream.map(|result| result.map_err(|e| std::io::Error::other(e.to_string())));
    let content_type = file
        .content_type
        .clone()
        .unwrap_or_else(|| "application/octet-stream".to_string());

    (
        StatusCode::OK,
        [
            (CONTENT_TYPE, content_type),
            (CONTENT_LENGTH, file.size_bytes.max(0).to_string()),
            (CONTENT_DISPOSITION, content_disposition(&file.original_name)),
        ],
        Body::from_stream(body_stream),
    )
        .into_response()
}

/// GET /v1/files/{file_id}/content
pub async fn download_file(
    State(state): State<AppState>,
    Path(file_id): Path<String>,
    req: Request,
) -> ApiResult<Response> {
    let auth = require_auth(&req)?.clone();
    auth.require_scope(TokenScope::FilesRead)?;

    let file = load_file(&state, parse_uuid(&file_id, "file id")?).await?;
    if !can_read_file(&state, &auth, &file).await? {
        return Err(ApiError::Forbidden("no access to this file".to_string()));
    }

    let stream = state.storage.get_stream(&file.storage_path).await?;

    if let Err(e) = state
        .metadata
        .record_file_event(file.file_id, FileEvent::Downloaded)
        .await
    {
        tracing::warn!(file_id = %file.file_id, error = %e, "Failed to record download");
    }

    Ok(blob_response(&file, stream))
}

/// DELETE /v1/files/{file_id}
pub async fn delete_file(
    State(state): State<AppState>,
    Path(file_id): Path<String>,
    req: Request,
) -> ApiResult<StatusCode> {
    let auth = require_auth(&req)?.clone();
    auth.require_scope(TokenScope::FilesWrite)?;

    let file = load_file(&state, parse_uuid(&file_id, "file id")?).await?;
    if !can_manage_file(&state, &auth, &file).await? {
        return Err(ApiError::Forbidden(
            "only the owner or an organization moderator may delete this file".to_string(),
        ));
    }

    match state.storage.delete(&file.storage_path).await {
        Ok(()) => {}
        Err(StorageError::NotFound(_)) => {
            tracing::warn!(
                file_id = %file.file_id,
                storage_path = %file.storage_path,
                "Blob already missing while deleting file"
            );
        }
        Err(e) => return Err(e.into()),
    }

    if !state.metadata.delete_file(file.file_id).await? {
        return Err(ApiError::NotFound(format!("file not found: {}", file.file_id)));
    }

    tracing::info!(file_id = %file.file_id, user_id = %auth.user_id(), "File deleted");
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn content_disposition_encodes_non_ascii() {
        let value = content_disposition("Øving 3 \"løsning\".pdf");
        assert!(value.starts_with("attachment; filename=\"_ving 3 _l_sning_.pdf\""));
        assert!(value.contains("filename*=UTF-8''%C3%98ving%203%20%22l%C3%B8sning%22.pdf"));
        assert!(HeaderValue::from_str(&value).is_ok());
    }

    #[test]
    fn file_name_header_is_percent_decoded() {
        let mut headers = HeaderMap::new();
        headers.insert(FILE_NAME_HEADER, HeaderValue::from_static("R%C3%B8ntgen.png"));
        let name = upload_file_name(&headers, &UploadQuery::default()).unwrap();
        assert_eq!(name, "Røntgen.png");
    }

    #[test]
    fn file_name_falls_back_to_query() {
        let query = UploadQuery {
            name: Some("notat.txt".to_string()),
            ..Default::default()
        };
        assert_eq!(
            upload_file_name(&HeaderMap::new(), &query).unwrap(),
            "notat.txt"
        );
        assert!(upload_file_name(&HeaderMap::new(), &UploadQuery::default()).is_err());
    }

    #[test]
    fn content_type_parameters_are_dropped() {
        let mut headers = HeaderMap::new();
        headers.insert(
            CONTENT_TYPE,
            HeaderValue::from_static("Text/Plain; charset=utf-8"),
        );
        assert_eq!(
            upload_content_type(&headers).unwrap().as_deref(),
            Some("text/plain")
        );
    }

    #[test]
    fn idempotency_key_rules() {
        let mut headers = HeaderMap::new();
        assert_eq!(idempotency_key(&headers).unwrap(), None);

        headers.insert(IDEMPOTENCY_KEY_HEADER, HeaderValue::from_static("abc-123"));
        assert_eq!(idempotency_key(&headers).unwrap().as_deref(), Some("abc-123"));

        let long = "k".repeat(MAX_IDEMPOTENCY_KEY_LEN + 1);
        headers.insert(IDEMPOTENCY_KEY_HEADER, HeaderValue::from_str(&long).unwrap());
        assert!(idempotency_key(&headers).is_err());
    }

    #[test]
    fn list_query_clamps_and_checks_category() {
        let filter = ListFilesQuery {
            limit: Some(10_000),
            offset: Some(-4),
            ..Default::default()
        }
        .to_filter()
        .unwrap();
        assert_eq!(filter.limit, MAX_LIST_LIMIT);
        assert_eq!(filter.offset, 0);

        let err = ListFilesQuery {
            category: Some("music".to_string()),
            ..Default::default()
        }
        .to_filter()
        .unwrap_err();
        assert!(matches!(err, ApiError::BadRequest(_)));
    }
}
