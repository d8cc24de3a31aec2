//! Application state shared across handlers.

use crate::ingest::Ingestor;
use dokhub_core::config::AppConfig;
use dokhub_core::{RetryPolicy, UploadPolicy};
use dokhub_metadata::MetadataStore;
use dokhub_signer::ShareSigner;
use dokhub_storage::ObjectStore;
use std::sync::Arc;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration.
    pub config: Arc<AppConfig>,
    /// Object storage backend.
    pub storage: Arc<dyn ObjectStore>,
    /// Metadata store.
    pub metadata: Arc<dyn MetadataStore>,
    /// Share link signer. Sharing is unavailable without one.
    pub signer: Option<Arc<ShareSigner>>,
    /// Upload pipeline.
    pub ingestor: Arc<Ingestor>,
}

impl AppState {
    /// Create a new application state, wiring the upload pipeline from config.
    pub fn new(
        config: AppConfig,
        storage: Arc<dyn ObjectStore>,
        metadata: Arc<dyn MetadataStore>,
        signer: Option<ShareSigner>,
    ) -> Self {
        let ingestor = Ingestor::new(
            storage.clone(),
            metadata.clone(),
            UploadPolicy::from_config(&config.upload),
            RetryPolicy::from_config(&config.retry),
        );
        Self::with_ingestor(config, storage, metadata, signer, ingestor)
    }

    /// Create state around a prebuilt pipeline.
    pub fn with_ingestor(
        config: AppConfig,
        storage: Arc<dyn ObjectStore>,
        metadata: Arc<dyn MetadataStore>,
        signer: Option<ShareSigner>,
        ingestor: Ingestor,
    ) -> Self {
        Self {
            config: Arc::new(config),
            storage,
            metadata,
            signer: signer.map(Arc::new),
            ingestor: Arc::new(ingestor),
        }
    }

    /// Maximum size of a JSON request body.
    pub fn json_limit(&self) -> usize {
        self.config.server.max_json_body_bytes
    }

    /// The configured signer, or 503 when sharing is disabled.
    pub fn require_signer(&self) -> crate::error::ApiResult<&ShareSigner> {
        self.signer.as_deref().ok_or_else(|| {
            crate::error::ApiError::ServiceUnavailable(
                "share links are disabled: no signing key configured".to_string(),
            )
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dokhub_metadata::SqliteStore;
    use dokhub_storage::FilesystemBackend;
    use tempfile::tempdir;

    async fn build_state(config: AppConfig, signer: Option<ShareSigner>) -> (tempfile::TempDir, AppState) {
        let temp = tempdir().unwrap();
        let storage: Arc<dyn ObjectStore> =
            Arc::new(FilesystemBackend::new(temp.path().join("blobs")).await.unwrap());
        let metadata: Arc<dyn MetadataStore> = Arc::new(
            SqliteStore::new(&temp.path().join("metadata.db"), None)
                .await
                .unwrap(),
        );
        let state = AppState::new(config, storage, metadata, signer);
        (temp, state)
    }

    #[tokio::test]
    async fn ingestor_uses_configured_policy() {
        let mut config = AppConfig::for_testing();
        config.upload.max_file_size = 1234;
        config.upload.allowed_extensions = vec![".PDF".to_string()];

        let (_temp, state) = build_state(config, None).await;
        let policy = state.ingestor.policy();
        assert_eq!(policy.max_file_size, 1234);
        assert!(policy.allowed_extensions.contains("pdf"));
        assert_eq!(policy.allowed_extensions.len(), 1);
    }

    #[tokio::test]
    async fn require_signer_without_key_is_unavailable() {
        let (_temp, state) = build_state(AppConfig::for_testing(), None).await;
        let err = state.require_signer().unwrap_err();
        assert_eq!(err.code(), "service_unavailable");

        let (_temp, state) =
            build_state(AppConfig::for_testing(), Some(ShareSigner::generate("k"))).await;
        assert_eq!(state.require_signer().unwrap().key_name(), "k");
    }
}
