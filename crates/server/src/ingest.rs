//! Upload ingestion pipeline.
//!
//! A file goes through these steps:
//! 1. policy validation of name, declared size and MIME type
//! 2. classification and storage path generation
//! 3. idempotency lookup
//! 4. streaming into the object store with sniffing, hashing and size limits
//! 5. checksum verification
//! 6. metadata write with retry
//!
//! A record only exists once its blob has been fully written and verified.
//! Every failure after bytes were written removes the blob again.

use crate::error::{ApiError, ApiResult};
use crate::metrics::{
    BYTES_UPLOADED, FILES_DEDUPLICATED, FILES_UPLOADED, INGEST_DURATION, METADATA_WRITE_RETRIES,
    ORPHAN_BLOBS_DELETED, record_upload_rejection,
};
use bytes::Bytes;
use dokhub_core::path::DEFAULT_FOLDER;
use dokhub_core::policy::SNIFF_LEN;
use dokhub_core::{
    ContentHash, DATA_LOCATION_EU, Error as CoreError, FileCandidate, FileId, OrgId, RetryPolicy,
    StorageOwner, UploadMetadata, UploadPolicy, UserId, classify, storage_path,
};
use dokhub_metadata::MetadataError;
use dokhub_metadata::models::FileRow;
use dokhub_metadata::repos::FileRepo;
use dokhub_storage::{ObjectStore, StreamingUpload};
use futures::{Stream, StreamExt};
use std::fmt::Display;
use std::sync::Arc;
use std::time::Instant;
use time::OffsetDateTime;
use uuid::Uuid;

/// Everything known about an upload before its bytes arrive.
#[derive(Clone, Debug)]
pub struct IngestRequest {
    pub owner_id: Uuid,
    pub org_id: Option<Uuid>,
    pub file_name: String,
    pub content_type: Option<String>,
    /// `Content-Length` of the body, when the client sent one.
    pub declared_size: Option<u64>,
    pub expected_sha256: Option<ContentHash>,
    pub idempotency_key: Option<String>,
    pub metadata: UploadMetadata,
}

/// Result of a successful ingest.
#[derive(Clone, Debug)]
pub struct IngestOutcome {
    pub file: FileRow,
    /// True when an earlier upload with the same idempotency key was returned.
    pub deduplicated: bool,
}

/// Streams uploads into object storage and links them to metadata records.
pub struct Ingestor {
    storage: Arc<dyn ObjectStore>,
    files: Arc<dyn FileRepo>,
    policy: UploadPolicy,
    retry: RetryPolicy,
}

/// Bytes written so far and what was learned from them.
struct Streamed {
    size: u64,
    sha256: ContentHash,
}

impl Ingestor {
    pub fn new(
        storage: Arc<dyn ObjectStore>,
        files: Arc<dyn FileRepo>,
        policy: UploadPolicy,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            storage,
            files,
            policy,
            retry,
        }
    }

    pub fn policy(&self) -> &UploadPolicy {
        &self.policy
    }

    /// Run the full pipeline for one file.
    #[tracing::instrument(
        skip(self, request, body),
        fields(owner_id = %request.owner_id, file_name = %request.file_name)
    )]
    pub async fn ingest<S, E>(&self, request: IngestRequest, body: S) -> ApiResult<IngestOutcome>
    where
        S: Stream<Item = Result<Bytes, E>> + Send,
        E: Display + Send,
    {
        let started = Instant::now();

        self.validate(&request).inspect_err(|e| {
            record_upload_rejection(e.reason());
        })?;

        if let Some(key) = request.idempotency_key.as_deref()
            && let Some(existing) = self
                .files
                .get_file_by_idempotency_key(request.owner_id, key)
                .await?
        {
            tracing::info!(file_id = %existing.file_id, "Upload deduplicated by idempotency key");
            FILES_DEDUPLICATED.inc();
            return Ok(IngestOutcome {
                file: existing,
                deduplicated: true,
            });
        }

        let file_id = FileId::new();
        let now = OffsetDateTime::now_utc();
        let owner = match request.org_id {
            Some(org_id) => StorageOwner::Organization(OrgId::from_uuid(org_id)),
            None => StorageOwner::User(UserId::from_uuid(request.owner_id)),
        };
        let folder = request
            .metadata
            .folder
            .as_deref()
            .map(str::trim)
            .filter(|f| !f.is_empty())
            .unwrap_or(DEFAULT_FOLDER)
            .to_string();
        let key = storage_path(
            owner,
            Some(&folder),
            file_id,
            &request.file_name,
            now.unix_timestamp_nanos() / 1_000_000,
        )?;

        if self.storage.exists(&key).await? {
            return Err(ApiError::Conflict(format!(
                "storage path already in use: {key}"
            )));
        }

        let upload = self
            .storage
            .put_stream(&key, request.content_type.as_deref())
            .await?;
        let streamed = self.stream_body(&key, upload, &request, body).await?;

        if let Some(expected) = &request.expected_sha256
            && let Err(e) = streamed.sha256.verify(expected)
        {
            tracing::warn!(
                key = %key,
                expected = %expected.to_hex(),
                actual = %streamed.sha256.to_hex(),
                "Upload checksum mismatch"
            );
            record_upload_rejection(e.reason());
            self.discard_blob(&key).await;
            return Err(e.into());
        }

        let classification = classify(&request.file_name, &request.metadata);
        let row = FileRow {
            file_id: file_id.into_uuid(),
            owner_id: request.owner_id,
            org_id: request.org_id,
            original_name: request.file_name.clone(),
            storage_path: key.clone(),
            size_bytes: i64::try_from(streamed.size)
                .map_err(|_| ApiError::Internal("file size overflows i64".to_string()))?,
            content_type: request.content_type.clone(),
            sha256: streamed.sha256.to_hex(),
            category: classification.category.as_str().to_string(),
            tags: serde_json::to_string(&classification.tags)
                .map_err(|e| ApiError::Internal(format!("failed to encode tags: {e}")))?,
            course_code: classification.course_code,
            description: request.metadata.description.clone(),
            semester: request.metadata.semester.clone(),
            subject: request.metadata.subject.clone(),
            folder,
            is_public: request.metadata.is_public,
            gdpr_compliant: true,
            data_location: DATA_LOCATION_EU.to_string(),
            idempotency_key: request.idempotency_key.clone(),
            download_count: 0,
            share_count: 0,
            last_shared_at: None,
            created_at: now,
            updated_at: now,
        };

        let outcome = match self.link_record(&row).await {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::error!(key = %key, error = %e, "Metadata write failed, removing blob");
                if self.discard_blob(&key).await {
                    ORPHAN_BLOBS_DELETED.inc();
                }
                return Err(ApiError::MetadataUnavailable(e.to_string()));
            }
        };

        if outcome.deduplicated {
            // Another request with the same key won; our copy is surplus.
            self.discard_blob(&key).await;
            FILES_DEDUPLICATED.inc();
        } else {
            FILES_UPLOADED.inc();
            BYTES_UPLOADED.inc_by(streamed.size);
            INGEST_DURATION.observe(started.elapsed().as_secs_f64());
            tracing::info!(
                file_id = %row.file_id,
                key = %key,
                size = streamed.size,
                category = %row.category,
                "File stored"
            );
        }

        Ok(outcome)
    }

    /// Checks that need no bytes.
    fn validate(&self, request: &IngestRequest) -> dokhub_core::Result<()> {
        match request.declared_size {
            Some(size) => self.policy.validate_file(&FileCandidate::new(
                request.file_name.as_str(),
                size,
                request.content_type.as_deref(),
            )),
            None => {
                self.policy.validate_name(&request.file_name)?;
                self.policy
                    .validate_content_type(request.content_type.as_deref())
            }
        }?;

        if let Some(folder) = request.metadata.folder.as_deref()
            && !folder.trim().is_empty()
        {
            dokhub_core::path::validate_folder(folder.trim())?;
        }
        Ok(())
    }

    /// Write the body into `upload`, finishing it on success and aborting it
    /// on any failure.
    async fn stream_body<S, E>(
        &self,
        key: &str,
        mut upload: Box<dyn StreamingUpload>,
        request: &IngestRequest,
        body: S,
    ) -> ApiResult<Streamed>
    where
        S: Stream<Item = Result<Bytes, E>> + Send,
        E: Display + Send,
    {
        match self.write_all(upload.as_mut(), request, body).await {
            Ok(streamed) => {
                let written = upload.finish().await?;
                if written != streamed.size {
                    self.discard_blob(key).await;
                    return Err(ApiError::Internal(format!(
                        "storage reported {written} bytes, streamed {}",
                        streamed.size
                    )));
                }
                Ok(streamed)
            }
            Err(e) => {
                if let Err(abort_err) = upload.abort().await {
                    tracing::warn!(error = %abort_err, "Failed to abort upload");
                }
                if let ApiError::Core(core) = &e {
                    record_upload_rejection(core.reason());
                }
                Err(e)
            }
        }
    }

    async fn write_all<S, E>(
        &self,
        upload: &mut dyn StreamingUpload,
        request: &IngestRequest,
        body: S,
    ) -> ApiResult<Streamed>
    where
        S: Stream<Item = Result<Bytes, E>> + Send,
        E: Display + Send,
    {
        let max = self.policy.max_file_size;
        let mut body = std::pin::pin!(body);
        let mut hasher = ContentHash::hasher();
        let mut head: Vec<u8> = Vec::new();
        let mut sniffed = !self.policy.sniff_content;
        let mut size: u64 = 0;

        while let Some(chunk) = body.next().await {
            let chunk =
                chunk.map_err(|e| ApiError::BadRequest(format!("failed to read body: {e}")))?;
            if chunk.is_empty() {
                continue;
            }

            size += chunk.len() as u64;
            if size > max {
                return Err(CoreError::FileTooLarge { size, max }.into());
            }

            if !sniffed {
                let take = (SNIFF_LEN - head.len()).min(chunk.len());
                head.extend_from_slice(&chunk[..take]);
                if head.len() >= SNIFF_LEN {
                    self.policy.check_content(&request.file_name, &head)?;
                    sniffed = true;
                }
            }

            hasher.update(&chunk);
            upload.write(chunk).await?;
        }

        if size == 0 {
            return Err(CoreError::EmptyFile.into());
        }
        if !sniffed {
            self.policy.check_content(&request.file_name, &head)?;
        }
        if let Some(declared) = request.declared_size
            && declared != size
        {
            return Err(ApiError::BadRequest(format!(
                "body has {size} bytes but {declared} were declared"
            )));
        }

        Ok(Streamed {
            size,
            sha256: hasher.finalize(),
        })
    }

    /// Insert the record, retrying transient failures with backoff.
    async fn link_record(&self, row: &FileRow) -> Result<IngestOutcome, MetadataError> {
        let attempts = self.retry.attempts();
        let mut attempt = 1;

        loop {
            match self.files.insert_file(row).await {
                Ok(true) => {
                    return Ok(IngestOutcome {
                        file: row.clone(),
                        deduplicated: false,
                    });
                }
                Ok(false) => {
                    // Lost an idempotency race; hand back the winner.
                    let key = row.idempotency_key.as_deref().ok_or_else(|| {
                        MetadataError::Internal("insert ignored without idempotency key".into())
                    })?;
                    let existing = self
                        .files
                        .get_file_by_idempotency_key(row.owner_id, key)
                        .await?
                        .ok_or_else(|| {
                            MetadataError::Internal(format!(
                                "idempotency key {key} conflicted but no record exists"
                            ))
                        })?;
                    return Ok(IngestOutcome {
                        file: existing,
                        deduplicated: true,
                    });
                }
                Err(e) if e.is_retryable() && attempt < attempts => {
                    let delay = self.retry.backoff_for(attempt);
                    METADATA_WRITE_RETRIES.inc();
                    tracing::warn!(
                        file_id = %row.file_id,
                        attempt,
                        max_attempts = attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Metadata write failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Best-effort blob removal. Returns true if the blob is gone.
    async fn discard_blob(&self, key: &str) -> bool {
        match self.storage.delete(key).await {
            Ok(()) => true,
            Err(e) => {
                tracing::error!(key = %key, error = %e, "Failed to delete blob, it is now orphaned");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dokhub_metadata::models::FileFilter;
    use dokhub_metadata::SqliteStore;
    use dokhub_metadata::repos::UserRepo;
    use dokhub_storage::FilesystemBackend;
    use std::convert::Infallible;
    use tempfile::TempDir;

    struct Harness {
        ingestor: Ingestor,
        storage: Arc<dyn ObjectStore>,
        metadata: Arc<SqliteStore>,
        owner_id: Uuid,
        _temp: TempDir,
    }

    async fn harness(policy: UploadPolicy) -> Harness {
        let temp = tempfile::tempdir().unwrap();
        let storage: Arc<dyn ObjectStore> =
            Arc::new(FilesystemBackend::new(temp.path().join("blobs")).await.unwrap());
        let metadata = Arc::new(
            SqliteStore::new(&temp.path().join("metadata.db"), None)
                .await
                .unwrap(),
        );

        let now = OffsetDateTime::now_utc();
        let owner_id = Uuid::new_v4();
        metadata
            .create_user(&dokhub_metadata::models::UserRow {
                user_id: owner_id,
                username: "ola".to_string(),
                display_name: None,
                email: None,
                role: "user".to_string(),
                disabled: false,
                created_at: now,
                updated_at: now,
            })
            .await
            .unwrap();

        let ingestor = Ingestor::new(
            storage.clone(),
            metadata.clone(),
            policy,
            RetryPolicy::no_retry(),
        );
        Harness {
            ingestor,
            storage,
            metadata,
            owner_id,
            _temp: temp,
        }
    }

    fn request(owner_id: Uuid, name: &str, size: Option<u64>) -> IngestRequest {
        IngestRequest {
            owner_id,
            org_id: None,
            file_name: name.to_string(),
            content_type: Some("text/plain".to_string()),
            declared_size: size,
            expected_sha256: None,
            idempotency_key: None,
            metadata: UploadMetadata::default(),
        }
    }

    fn body(parts: &[&'static [u8]]) -> impl Stream<Item = Result<Bytes, Infallible>> + Send {
        futures::stream::iter(
            parts
                .iter()
                .map(|p| Ok(Bytes::from_static(p)))
                .collect::<Vec<_>>(),
        )
    }

    async fn stored_keys(h: &Harness) -> Vec<String> {
        h.storage.list("").await.unwrap()
    }

    #[tokio::test]
    async fn test_ingest_stores_blob_and_record() {
        let h = harness(UploadPolicy::default()).await;
        let mut req = request(h.owner_id, "TKT4140_oblig2.txt", Some(11));
        req.metadata.tags = Some("Fysikk, lab".to_string());

        let outcome = h
            .ingestor
            .ingest(req, body(&[b"hello ", b"world"]))
            .await
            .unwrap();

        assert!(!outcome.deduplicated);
        let file = outcome.file;
        assert_eq!(file.size_bytes, 11);
        assert_eq!(file.sha256, ContentHash::compute(b"hello world").to_hex());
        assert_eq!(file.category, "documents");
        assert_eq!(file.course_code.as_deref(), Some("TKT4140"));
        assert_eq!(file.tag_list(), vec!["fysikk", "lab", "assignment"]);
        assert!(file.gdpr_compliant);
        assert_eq!(file.data_location, "EU");
        assert!(file.storage_path.starts_with(&format!("uploads/{}/", h.owner_id)));
        assert!(file.storage_path.ends_with("_TKT4140_oblig2.txt"));

        assert_eq!(
            h.storage.get(&file.storage_path).await.unwrap().as_ref(),
            b"hello world"
        );
        assert!(h.metadata.get_file(file.file_id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_rejected_extension_never_touches_storage() {
        let h = harness(UploadPolicy::default()).await;
        let err = h
            .ingestor
            .ingest(request(h.owner_id, "setup.exe", Some(4)), body(&[b"MZ\0\0"]))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "disallowed_extension");
        assert!(stored_keys(&h).await.is_empty());
    }

    #[tokio::test]
    async fn test_oversized_body_aborts() {
        let policy = UploadPolicy {
            max_file_size: 8,
            ..UploadPolicy::default()
        };
        let h = harness(policy).await;

        // Without Content-Length the limit is enforced while streaming.
        let err = h
            .ingestor
            .ingest(request(h.owner_id, "notes.txt", None), body(&[b"12345", b"67890"]))
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), axum::http::StatusCode::PAYLOAD_TOO_LARGE);
        assert!(stored_keys(&h).await.is_empty());
    }

    #[tokio::test]
    async fn test_empty_body_rejected() {
        let h = harness(UploadPolicy::default()).await;
        let err = h
            .ingestor
            .ingest(request(h.owner_id, "notes.txt", None), body(&[]))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "empty_file");
        assert_eq!(err.status_code(), axum::http::StatusCode::BAD_REQUEST);
        assert!(stored_keys(&h).await.is_empty());
    }

    #[tokio::test]
    async fn test_sniffed_executable_rejected() {
        let h = harness(UploadPolicy::default()).await;
        let mut elf = b"\x7fELF\x02\x01\x01\0".to_vec();
        elf.resize(64, 0);
        let elf: &'static [u8] = Box::leak(elf.into_boxed_slice());

        let err = h
            .ingestor
            .ingest(request(h.owner_id, "report.pdf", None), body(&[elf]))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "executable_content");
        assert!(stored_keys(&h).await.is_empty());
    }

    #[tokio::test]
    async fn test_checksum_mismatch_removes_blob() {
        let h = harness(UploadPolicy::default()).await;
        let mut req = request(h.owner_id, "notes.txt", Some(5));
        req.expected_sha256 = Some(ContentHash::compute(b"other"));

        let err = h.ingestor.ingest(req, body(&[b"hello"])).await.unwrap_err();
        assert_eq!(err.code(), "checksum_mismatch");
        assert!(stored_keys(&h).await.is_empty());
        assert!(
            h.metadata
                .list_files(&FileFilter::default())
                .await
                .unwrap()
                .is_empty()
        );
    }

    #[tokio::test]
    async fn test_declared_size_must_match_body() {
        let h = harness(UploadPolicy::default()).await;
        let err = h
            .ingestor
            .ingest(request(h.owner_id, "notes.txt", Some(3)), body(&[b"hello"]))
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), axum::http::StatusCode::BAD_REQUEST);
        assert!(stored_keys(&h).await.is_empty());
    }

    #[tokio::test]
    async fn test_idempotency_key_returns_existing_record() {
        let h = harness(UploadPolicy::default()).await;
        let mut req = request(h.owner_id, "notes.txt", Some(5));
        req.idempotency_key = Some("batch-1/notes.txt".to_string());

        let first = h
            .ingestor
            .ingest(req.clone(), body(&[b"hello"]))
            .await
            .unwrap();
        let second = h.ingestor.ingest(req, body(&[b"hello"])).await.unwrap();

        assert!(!first.deduplicated);
        assert!(second.deduplicated);
        assert_eq!(first.file.file_id, second.file.file_id);
        assert_eq!(stored_keys(&h).await.len(), 1);
    }

    #[tokio::test]
    async fn test_invalid_folder_rejected() {
        let h = harness(UploadPolicy::default()).await;
        let mut req = request(h.owner_id, "notes.txt", Some(5));
        req.metadata.folder = Some("../escape".to_string());
        let err = h.ingestor.ingest(req, body(&[b"hello"])).await.unwrap_err();
        assert_eq!(err.code(), "invalid_folder");
    }
}
