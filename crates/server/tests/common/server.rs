//! Server test utilities.

use super::fixtures::sha256_hash;
use dokhub_core::config::{AppConfig, MetadataConfig, StorageConfig};
use dokhub_metadata::models::{TokenRow, UserRow};
use dokhub_metadata::{MetadataStore, SqliteStore};
use dokhub_server::bootstrap::ensure_admin_token;
use dokhub_server::{AppState, create_router};
use dokhub_signer::ShareSigner;
use dokhub_storage::{FilesystemBackend, ObjectStore};
use std::sync::Arc;
use tempfile::TempDir;
use time::OffsetDateTime;
use uuid::Uuid;

/// Raw secret of the bootstrap admin token in [`AppConfig::for_testing`].
#[allow(dead_code)]
pub const ADMIN_TOKEN: &str = "test-admin-token";

/// A regular account with a token, created directly in the metadata store.
#[allow(dead_code)]
#[derive(Clone, Debug)]
pub struct TestUser {
    pub user_id: Uuid,
    pub username: String,
    pub token: String,
}

/// A test server wrapper with all dependencies.
/// Note: #[allow(dead_code)] because each test file compiles common/ separately.
#[allow(dead_code)]
pub struct TestServer {
    pub router: axum::Router,
    pub state: AppState,
    _temp_dir: TempDir,
}

#[allow(dead_code)]
impl TestServer {
    /// Create a new test server with temporary storage and no share signer.
    pub async fn new() -> Self {
        Self::build(|_| {}, None).await
    }

    /// Create a test server that can sign share links.
    pub async fn with_signer() -> Self {
        Self::build(|_| {}, Some(ShareSigner::generate("dokhub-test-1"))).await
    }

    /// Create a test server with custom config modifications.
    pub async fn with_config<F>(modifier: F) -> Self
    where
        F: FnOnce(&mut AppConfig),
    {
        Self::build(modifier, Some(ShareSigner::generate("dokhub-test-1"))).await
    }

    async fn build<F>(modifier: F, signer: Option<ShareSigner>) -> Self
    where
        F: FnOnce(&mut AppConfig),
    {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp directory");

        let storage_path = temp_dir.path().join("storage");
        std::fs::create_dir_all(&storage_path).expect("Failed to create storage directory");
        let storage: Arc<dyn ObjectStore> = Arc::new(
            FilesystemBackend::new(&storage_path)
                .await
                .expect("Failed to create storage backend"),
        );

        let db_path = temp_dir.path().join("metadata.db");
        let metadata: Arc<dyn MetadataStore> = Arc::new(
            SqliteStore::new(&db_path, None)
                .await
                .expect("Failed to create metadata store"),
        );

        let mut config = AppConfig::for_testing();
        config.storage = StorageConfig::Filesystem {
            path: storage_path.clone(),
        };
        config.metadata = MetadataConfig::Sqlite {
            path: db_path,
            query_timeout_secs: None,
        };
        modifier(&mut config);

        ensure_admin_token(metadata.as_ref(), &config.admin)
            .await
            .expect("Failed to bootstrap admin token");

        let state = AppState::new(config, storage, metadata, signer);
        let router = create_router(state.clone());

        Self {
            router,
            state,
            _temp_dir: temp_dir,
        }
    }

    /// Get access to the underlying metadata.
    pub fn metadata(&self) -> Arc<dyn MetadataStore> {
        self.state.metadata.clone()
    }

    /// Get access to the underlying object store.
    pub fn storage(&self) -> Arc<dyn ObjectStore> {
        self.state.storage.clone()
    }

    /// Create a user with a `files:write` token.
    pub async fn create_user(&self, username: &str) -> TestUser {
        self.create_user_with_scopes(username, "user", &["files:write"])
            .await
    }

    /// Create a user and a token with the given role and scopes.
    pub async fn create_user_with_scopes(
        &self,
        username: &str,
        role: &str,
        scopes: &[&str],
    ) -> TestUser {
        let now = OffsetDateTime::now_utc();
        let user = UserRow {
            user_id: Uuid::new_v4(),
            username: username.to_string(),
            display_name: Some(format!("Test {username}")),
            email: None,
            role: role.to_string(),
            disabled: false,
            created_at: now,
            updated_at: now,
        };
        self.metadata()
            .create_user(&user)
            .await
            .expect("Failed to create user");

        let raw_token = format!("test-token-{}", Uuid::new_v4());
        let token = TokenRow {
            token_id: Uuid::new_v4(),
            user_id: user.user_id,
            token_hash: sha256_hash(raw_token.as_bytes()),
            scopes: serde_json::to_string(scopes).expect("Failed to encode scopes"),
            expires_at: None,
            revoked_at: None,
            created_at: now,
            last_used_at: None,
            description: Some("Test Token".to_string()),
        };
        self.metadata()
            .create_token(&token)
            .await
            .expect("Failed to create token");

        TestUser {
            user_id: user.user_id,
            username: user.username,
            token: raw_token,
        }
    }
}
