use anyhow::{Context, Result};
use dokhub_core::ContentHash;
use futures::TryStreamExt;
use percent_encoding::{NON_ALPHANUMERIC, utf8_percent_encode};
use reqwest::header::{CONTENT_LENGTH, CONTENT_TYPE};
use reqwest::{StatusCode, Url};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use std::future::Future;
use std::path::Path;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_util::io::ReaderStream;

const FILE_NAME_HEADER: &str = "x-file-name";
const CONTENT_SHA256_HEADER: &str = "x-content-sha256";
const IDEMPOTENCY_KEY_HEADER: &str = "idempotency-key";

/// A non-2xx answer from the server.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{message} ({code}, HTTP {status})")]
pub struct ApiError {
    pub status: u16,
    pub code: String,
    pub message: String,
}

#[derive(Deserialize)]
struct ErrorBody {
    code: String,
    message: String,
}

impl ApiError {
    /// Build from a response body, falling back to the raw text when the
    /// body is not a `{code, message}` object.
    pub fn from_body(status: StatusCode, body: &str) -> Self {
        match serde_json::from_str::<ErrorBody>(body) {
            Ok(parsed) => Self {
                status: status.as_u16(),
                code: parsed.code,
                message: parsed.message,
            },
            Err(_) => Self {
                status: status.as_u16(),
                code: "http_error".to_string(),
                message: if body.trim().is_empty() {
                    status
                        .canonical_reason()
                        .unwrap_or("request failed")
                        .to_string()
                } else {
                    body.trim().to_string()
                },
            },
        }
    }
}

#[derive(Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    base_url: Url,
    token: Option<String>,
    max_retries: u32,
    retry_delay: Duration,
}

impl ApiClient {
    pub fn new(base_url: &str, token: Option<&str>) -> Result<Self> {
        let base_url = Url::parse(base_url).context("invalid server URL")?;
        Ok(Self {
            http: reqwest::Client::new(),
            base_url,
            token: token.map(str::to_string),
            max_retries: 3,
            retry_delay: Duration::from_millis(500),
        })
    }

    /// Override how transient failures are retried.
    pub fn with_retry(mut self, max_retries: u32, delay: Duration) -> Self {
        self.max_retries = max_retries;
        self.retry_delay = delay;
        self
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn url(&self, path: &str) -> Result<Url> {
        self.base_url.join(path).context("failed to build API URL")
    }

    fn authorized(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => req.bearer_auth(token),
            None => req,
        }
    }

    fn require_token(&self) -> Result<()> {
        if self.token.is_none() {
            anyhow::bail!("no token given: use --token or set DOKHUB_TOKEN");
        }
        Ok(())
    }

    /// Retry `make_request` on transport errors and 5xx answers, with a
    /// doubling delay. 4xx answers come back immediately.
    async fn retry<F, Fut>(&self, mut make_request: F) -> Result<reqwest::Response>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<reqwest::Response>>,
    {
        let mut attempt = 0;
        loop {
            let delay = self.retry_delay * 2u32.saturating_pow(attempt);
            match make_request().await {
                Ok(response) if response.status().is_server_error() => {
                    if attempt >= self.max_retries {
                        return Ok(response);
                    }
                    tracing::warn!(
                        status = %response.status(),
                        delay_ms = delay.as_millis() as u64,
                        "Server error, retrying"
                    );
                }
                Ok(response) => return Ok(response),
                Err(e) if e.downcast_ref::<reqwest::Error>().is_some() => {
                    if attempt >= self.max_retries {
                        return Err(e);
                    }
                    tracing::warn!(
                        error = %e,
                        delay_ms = delay.as_millis() as u64,
                        "Request failed, retrying"
                    );
                }
                Err(e) => return Err(e),
            }
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }

    async fn check(response: reqwest::Response) -> Result<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(ApiError::from_body(status, &body).into())
    }

    async fn get_json<T: DeserializeOwned>(&self, url: Url) -> Result<T> {
        let response = self
            .retry(|| self.send(self.http.get(url.clone())))
            .await?;
        Ok(Self::check(response).await?.json::<T>().await?)
    }

    async fn send(&self, req: reqwest::RequestBuilder) -> Result<reqwest::Response> {
        Ok(self.authorized(req).send().await?)
    }

    async fn send_json<T: DeserializeOwned>(&self, req: reqwest::RequestBuilder) -> Result<T> {
        let response = self.send(req).await?;
        Ok(Self::check(response).await?.json::<T>().await?)
    }

    async fn send_empty(&self, req: reqwest::RequestBuilder) -> Result<()> {
        let response = self.send(req).await?;
        Self::check(response).await?;
        Ok(())
    }

    pub async fn capabilities(&self) -> Result<CapabilitiesResponse> {
        self.get_json(self.url("/v1/capabilities")?).await
    }

    pub async fn whoami(&self) -> Result<WhoamiResponse> {
        self.require_token()?;
        self.get_json(self.url("/v1/auth/whoami")?).await
    }

    /// Stream a local file to the server.
    ///
    /// The checksum is computed in a first pass so the server can verify the
    /// body. Retries reuse `idempotency_key`, so a lost response never
    /// creates a second record.
    pub async fn upload_file(
        &self,
        path: &Path,
        options: &UploadOptions,
        idempotency_key: &str,
    ) -> Result<UploadResponse> {
        self.require_token()?;
        let name = options
            .name
            .clone()
            .or_else(|| path.file_name().map(|n| n.to_string_lossy().into_owned()))
            .ok_or_else(|| anyhow::anyhow!("cannot derive a file name from {}", path.display()))?;
        let (size, sha256) = hash_file(path).await?;
        let content_type = guess_content_type(&name);

        let mut url = self.url("/v1/files")?;
        options.append_query(&mut url);
        let encoded_name = utf8_percent_encode(&name, NON_ALPHANUMERIC).to_string();
        let sha256 = sha256.to_hex();

        let response = self
            .retry(move || {
                let request = self
                    .http
                    .post(url.clone())
                    .header(CONTENT_TYPE, content_type)
                    .header(CONTENT_LENGTH, size)
                    .header(FILE_NAME_HEADER, encoded_name.clone())
                    .header(CONTENT_SHA256_HEADER, sha256.clone())
                    .header(IDEMPOTENCY_KEY_HEADER, idempotency_key);
                async move {
                    let file = tokio::fs::File::open(path)
                        .await
                        .with_context(|| format!("failed to open {}", path.display()))?;
                    let body = reqwest::Body::wrap_stream(ReaderStream::new(file));
                    self.send(request.body(body)).await
                }
            })
            .await?;
        Ok(Self::check(response).await?.json().await?)
    }

    pub async fn list_files(&self, query: &FileQuery) -> Result<ListFilesResponse> {
        self.require_token()?;
        let mut url = self.url("/v1/files")?;
        query.append_query(&mut url);
        self.get_json(url).await
    }

    pub async fn get_file(&self, id: &str) -> Result<FileInfo> {
        self.require_token()?;
        self.get_json(self.url(&format!("/v1/files/{id}"))?).await
    }

    /// Download a file's content into `dest`. Returns the bytes written.
    pub async fn download_file(&self, id: &str, dest: &Path) -> Result<u64> {
        self.require_token()?;
        let url = self.url(&format!("/v1/files/{id}/content"))?;
        let response = self
            .retry(|| self.send(self.http.get(url.clone())))
            .await?;
        let response = Self::check(response).await?;

        let mut file = tokio::fs::File::create(dest)
            .await
            .with_context(|| format!("failed to create {}", dest.display()))?;
        let mut stream = response.bytes_stream();
        let mut written = 0u64;
        while let Some(chunk) = stream.try_next().await? {
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        file.flush().await?;
        Ok(written)
    }

    pub async fn delete_file(&self, id: &str) -> Result<()> {
        self.require_token()?;
        let url = self.url(&format!("/v1/files/{id}"))?;
        self.send_empty(self.http.delete(url)).await
    }

    pub async fn create_share(&self, req: &CreateShareRequest) -> Result<CreateShareResponse> {
        self.require_token()?;
        let url = self.url("/v1/shares")?;
        self.send_json(self.http.post(url).json(req)).await
    }

    pub async fn revoke_share(&self, id: &str) -> Result<ShareInfo> {
        self.require_token()?;
        let url = self.url(&format!("/v1/shares/{id}/revoke"))?;
        self.send_json(self.http.post(url)).await
    }

    pub async fn create_org(&self, req: &CreateOrgRequest) -> Result<OrgInfo> {
        self.require_token()?;
        let url = self.url("/v1/orgs")?;
        self.send_json(self.http.post(url).json(req)).await
    }

    pub async fn list_orgs(&self) -> Result<Vec<OrgInfo>> {
        self.require_token()?;
        self.get_json(self.url("/v1/orgs")?).await
    }

    pub async fn join_org(&self, org_code: &str) -> Result<OrgInfo> {
        self.require_token()?;
        let url = self.url("/v1/orgs/join")?;
        let body = serde_json::json!({ "org_code": org_code });
        self.send_json(self.http.post(url).json(&body)).await
    }

    pub async fn list_members(&self, org_id: &str, role: Option<&str>) -> Result<Vec<MemberInfo>> {
        self.require_token()?;
        let mut url = self.url(&format!("/v1/orgs/{org_id}/members"))?;
        if let Some(role) = role {
            url.query_pairs_mut().append_pair("role", role);
        }
        self.get_json(url).await
    }
}

/// Size and sha256 of a local file, read in one streaming pass.
pub async fn hash_file(path: &Path) -> Result<(u64, ContentHash)> {
    let mut file = tokio::fs::File::open(path)
        .await
        .with_context(|| format!("failed to open {}", path.display()))?;
    let mut hasher = ContentHash::hasher();
    let mut buf = vec![0u8; 64 * 1024];
    let mut size = 0u64;
    loop {
        let n = file.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
        size += n as u64;
    }
    Ok((size, hasher.finalize()))
}

/// MIME type for an upload, by extension.
pub fn guess_content_type(name: &str) -> &'static str {
    let ext = name
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "pdf" => "application/pdf",
        "doc" => "application/msword",
        "docx" => "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        "xls" => "application/vnd.ms-excel",
        "xlsx" => "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
        "ppt" => "application/vnd.ms-powerpoint",
        "pptx" => "application/vnd.openxmlformats-officedocument.presentationml.presentation",
        "odt" => "application/vnd.oasis.opendocument.text",
        "ods" => "application/vnd.oasis.opendocument.spreadsheet",
        "odp" => "application/vnd.oasis.opendocument.presentation",
        "rtf" => "application/rtf",
        "txt" | "md" => "text/plain",
        "csv" => "text/csv",
        "html" => "text/html",
        "css" => "text/css",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "svg" => "image/svg+xml",
        "bmp" => "image/bmp",
        "webp" => "image/webp",
        "zip" => "application/zip",
        "gz" => "application/gzip",
        "tar" => "application/x-tar",
        "7z" => "application/x-7z-compressed",
        "rar" => "application/vnd.rar",
        "json" => "application/json",
        "xml" => "application/xml",
        "yaml" | "yml" => "application/yaml",
        _ => "application/octet-stream",
    }
}

// =============================================================================
// Request/response types (mirrored from server handlers)
// =============================================================================

/// Upload metadata sent as query parameters.
#[derive(Debug, Clone, Default)]
pub struct UploadOptions {
    /// Overrides the local file name.
    pub name: Option<String>,
    pub org_id: Option<String>,
    pub folder: Option<String>,
    pub description: Option<String>,
    pub semester: Option<String>,
    pub subject: Option<String>,
    pub course_code: Option<String>,
    pub tags: Option<String>,
    pub is_public: bool,
}

impl UploadOptions {
    fn append_query(&self, url: &mut Url) {
        let mut pairs = url.query_pairs_mut();
        let fields = [
            ("org_id", &self.org_id),
            ("folder", &self.folder),
            ("description", &self.description),
            ("semester", &self.semester),
            ("subject", &self.subject),
            ("course_code", &self.course_code),
            ("tags", &self.tags),
        ];
        for (key, value) in fields {
            if let Some(value) = value {
                pairs.append_pair(key, value);
            }
        }
        if self.is_public {
            pairs.append_pair("is_public", "true");
        }
        drop(pairs);
        if url.query() == Some("") {
            url.set_query(None);
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct FileQuery {
    pub org_id: Option<String>,
    pub category: Option<String>,
    pub course_code: Option<String>,
    pub tag: Option<String>,
    pub limit: Option<u32>,
}

impl FileQuery {
    fn append_query(&self, url: &mut Url) {
        let limit = self.limit.map(|l| l.to_string());
        let fields = [
            ("org_id", self.org_id.as_ref()),
            ("category", self.category.as_ref()),
            ("course_code", self.course_code.as_ref()),
            ("tag", self.tag.as_ref()),
            ("limit", limit.as_ref()),
        ];
        if fields.iter().all(|(_, v)| v.is_none()) {
            return;
        }
        let mut pairs = url.query_pairs_mut();
        for (key, value) in fields {
            if let Some(value) = value {
                pairs.append_pair(key, value);
            }
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CapabilitiesResponse {
    pub max_file_size: u64,
    pub max_files_per_batch: usize,
    pub allowed_extensions: Vec<String>,
    pub sharing_enabled: bool,
    pub default_share_hours: u32,
    pub max_share_hours: u32,
}

#[derive(Debug, Serialize, Deserialize)]
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

#[derive(Debug, Serialize, Deserialize)]
pub struct FileInfo {
    pub file_id: String,
    pub owner_id: String,
    pub org_id: Option<String>,
    pub name: String,
    pub size_bytes: u64,
    pub content_type: Option<String>,
    pub sha256: String,
    pub category: String,
    #[serde(default)]
    pub tags: Vec<String>,
    pub course_code: Option<String>,
    pub description: Option<String>,
    pub semester: Option<String>,
    pub subject: Option<String>,
    pub folder: String,
    pub is_public: bool,
    pub download_count: u64,
    pub share_count: u64,
    pub created_at: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct UploadResponse {
    pub file: FileInfo,
    pub deduplicated: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ListFilesResponse {
    pub files: Vec<FileInfo>,
    pub limit: i64,
    pub offset: i64,
}

#[derive(Debug, Serialize)]
pub struct CreateShareRequest {
    pub file_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expiration_hours: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub purpose: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CreateShareResponse {
    pub share_id: String,
    pub signed_url: String,
    pub expires_at: String,
    pub file_name: String,
    pub file_size: u64,
    pub valid_for: String,
    pub message: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ShareInfo {
    pub share_id: String,
    pub file_id: String,
    pub purpose: String,
    pub status: String,
    pub expires_at: String,
    pub revoked_at: Option<String>,
    pub access_count: u64,
}

#[derive(Debug, Serialize)]
pub struct CreateOrgRequest {
    pub name: String,
    #[serde(rename = "type")]
    pub org_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub course_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_members: Option<u32>,
    pub is_public: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct OrgInfo {
    pub org_id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub org_type: String,
    pub description: Option<String>,
    pub course_code: Option<String>,
    pub org_code: String,
    pub max_members: i64,
    pub is_public: bool,
    pub role: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MemberInfo {
    pub user_id: String,
    pub username: Option<String>,
    pub display_name: Option<String>,
    pub role: String,
    pub status: String,
    pub joined_at: String,
}
