//! Configuration types shared across crates.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Server configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Externally reachable base URL, used for absolute share links.
    /// Share links are relative when unset.
    #[serde(default)]
    pub public_base_url: Option<String>,
    /// Limit for JSON request bodies.
    #[serde(default = "default_max_json_body_bytes")]
    pub max_json_body_bytes: usize,
    /// Enable the /metrics endpoint for Prometheus scraping.
    /// The endpoint is unauthenticated; restrict it at the network level.
    #[serde(default = "default_metrics_enabled")]
    pub metrics_enabled: bool,
}

fn default_bind() -> String {
    "127.0.0.1:8080".to_string()
}

fn default_max_json_body_bytes() -> usize {
    1024 * 1024
}

fn default_metrics_enabled() -> bool {
    true
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            public_base_url: None,
            max_json_body_bytes: default_max_json_body_bytes(),
            metrics_enabled: default_metrics_enabled(),
        }
    }
}

impl ServerConfig {
    pub fn validate(&self) -> Result<(), String> {
        if let Some(url) = &self.public_base_url
            && !(url.starts_with("http://") || url.starts_with("https://"))
        {
            return Err(format!(
                "server.public_base_url must start with http:// or https://, got '{url}'"
            ));
        }
        if self.max_json_body_bytes == 0 {
            return Err("server.max_json_body_bytes cannot be 0".to_string());
        }
        Ok(())
    }
}

/// Admin token configuration.
///
/// The admin token provides initial access to create users and tokens. If the
/// token hash changes between restarts, the previous admin token is revoked
/// and a new one is created.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AdminConfig {
    /// Pre-computed hash of the admin token (SHA256 hex, 64 characters,
    /// optionally prefixed with `sha256:`).
    /// Generate with: `echo -n "your-secret-token" | sha256sum`
    pub token_hash: String,
    /// Display name of the bootstrap admin user.
    #[serde(default = "default_admin_name")]
    pub display_name: String,
    /// Description for the admin token.
    pub token_description: Option<String>,
}

fn default_admin_name() -> String {
    "admin".to_string()
}

impl AdminConfig {
    /// Create a test configuration with a dummy token hash.
    ///
    /// **For testing only.** The hash is deterministic but not a real token.
    pub fn for_testing() -> Self {
        Self {
            // SHA256 of "test-admin-token"
            token_hash: "17d6bfe05d1b1fb7bc499f8e3f639c7b3eda4c40f321eef8887a0c04c89a99c5"
                .to_string(),
            display_name: default_admin_name(),
            token_description: Some("Test admin token".to_string()),
        }
    }
}

/// Storage backend configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StorageConfig {
    /// Local filesystem storage.
    Filesystem {
        /// Root directory for storage.
        path: PathBuf,
    },
    /// S3-compatible storage (AWS, MinIO, Supabase Storage).
    S3 {
        /// Bucket name.
        bucket: String,
        /// Optional endpoint URL for S3-compatible services.
        endpoint: Option<String>,
        /// AWS region.
        region: Option<String>,
        /// Optional key prefix.
        prefix: Option<String>,
        /// Access key ID. Falls back to AWS_ACCESS_KEY_ID when unset.
        access_key_id: Option<String>,
        /// Secret access key. Falls back to AWS_SECRET_ACCESS_KEY when unset.
        secret_access_key: Option<String>,
        /// Force path-style URLs (`endpoint/bucket/key`).
        /// Required for MinIO and Supabase Storage.
        #[serde(default)]
        force_path_style: bool,
    },
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self::Filesystem {
            path: PathBuf::from("./data/storage"),
        }
    }
}

impl StorageConfig {
    /// Validate storage configuration invariants.
    pub fn validate(&self) -> Result<(), String> {
        match self {
            StorageConfig::S3 {
                bucket,
                access_key_id,
                secret_access_key,
                ..
            } => {
                if bucket.trim().is_empty() {
                    return Err("s3 config requires a bucket name".to_string());
                }
                match (access_key_id.as_ref(), secret_access_key.as_ref()) {
                    (Some(_), Some(_)) | (None, None) => Ok(()),
                    _ => Err(
                        "s3 config requires both access_key_id and secret_access_key when either is set"
                            .to_string(),
                    ),
                }
            }
            StorageConfig::Filesystem { .. } => Ok(()),
        }
    }
}

/// Metadata store configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum MetadataConfig {
    /// SQLite database.
    Sqlite {
        /// Database file path.
        path: PathBuf,
        /// Upper bound in seconds for file writes and listings.
        #[serde(default = "default_sqlite_query_timeout_secs")]
        query_timeout_secs: Option<u64>,
    },
}

fn default_sqlite_query_timeout_secs() -> Option<u64> {
    Some(30)
}

impl Default for MetadataConfig {
    fn default() -> Self {
        Self::Sqlite {
            path: PathBuf::from("./data/metadata.db"),
            query_timeout_secs: default_sqlite_query_timeout_secs(),
        }
    }
}

impl MetadataConfig {
    pub fn validate(&self) -> Result<(), String> {
        match self {
            MetadataConfig::Sqlite {
                query_timeout_secs: Some(0),
                ..
            } => Err("metadata.query_timeout_secs cannot be 0".to_string()),
            MetadataConfig::Sqlite { .. } => Ok(()),
        }
    }
}

/// Share link signing configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SigningConfig {
    /// Key name embedded in the secret key string.
    pub key_name: String,
    /// Where the private key comes from.
    pub private_key: PrivateKeyConfig,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum PrivateKeyConfig {
    /// Read the key from a file.
    File { path: PathBuf },
    /// Read the key from an environment variable.
    Env { var: String },
    /// Key given inline (not recommended).
    Value { key: String },
    /// Generate an ephemeral key at startup. Links die with the process.
    Generate,
}

/// Upload validation policy configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct UploadConfig {
    #[serde(default = "default_max_file_size")]
    pub max_file_size: u64,
    #[serde(default = "default_max_files_per_batch")]
    pub max_files_per_batch: usize,
    #[serde(default = "default_allowed_extensions")]
    pub allowed_extensions: Vec<String>,
    /// Inspect leading bytes and reject content that contradicts the extension.
    #[serde(default = "default_sniff_content")]
    pub sniff_content: bool,
}

fn default_max_file_size() -> u64 {
    crate::DEFAULT_MAX_FILE_SIZE
}

fn default_max_files_per_batch() -> usize {
    crate::DEFAULT_MAX_FILES_PER_BATCH
}

fn default_allowed_extensions() -> Vec<String> {
    crate::policy::DEFAULT_ALLOWED_EXTENSIONS
        .iter()
        .map(|e| (*e).to_string())
        .collect()
}

fn default_sniff_content() -> bool {
    true
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            max_file_size: default_max_file_size(),
            max_files_per_batch: default_max_files_per_batch(),
            allowed_extensions: default_allowed_extensions(),
            sniff_content: default_sniff_content(),
        }
    }
}

impl UploadConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.max_file_size == 0 {
            return Err("upload.max_file_size cannot be 0".to_string());
        }
        if self.max_files_per_batch == 0 {
            return Err("upload.max_files_per_batch cannot be 0".to_string());
        }
        if self.allowed_extensions.is_empty() {
            return Err("upload.allowed_extensions cannot be empty".to_string());
        }
        Ok(())
    }
}

/// Metadata write retry configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_backoff_ms() -> u64 {
    100
}

fn default_max_backoff_ms() -> u64 {
    2000
}

fn default_multiplier() -> f64 {
    2.0
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            multiplier: default_multiplier(),
        }
    }
}

impl RetryConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.max_attempts == 0 || self.max_attempts > 10 {
            return Err(format!(
                "retry.max_attempts must be between 1 and 10, got {}",
                self.max_attempts
            ));
        }
        if !self.multiplier.is_finite() || self.multiplier < 1.0 {
            return Err(format!(
                "retry.multiplier must be >= 1.0, got {}",
                self.multiplier
            ));
        }
        if self.max_backoff_ms < self.initial_backoff_ms {
            return Err("retry.max_backoff_ms must be >= retry.initial_backoff_ms".to_string());
        }
        Ok(())
    }
}

/// Share link configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SharingConfig {
    #[serde(default = "default_expiration_hours")]
    pub default_expiration_hours: u32,
    #[serde(default = "default_max_expiration_hours")]
    pub max_expiration_hours: u32,
    /// Interval of the background expiry sweep. 0 disables it.
    #[serde(default = "default_cleanup_interval_secs")]
    pub cleanup_interval_secs: u64,
}

fn default_expiration_hours() -> u32 {
    crate::share::DEFAULT_EXPIRATION_HOURS
}

fn default_max_expiration_hours() -> u32 {
    crate::share::MAX_EXPIRATION_HOURS
}

fn default_cleanup_interval_secs() -> u64 {
    3600
}

impl Default for SharingConfig {
    fn default() -> Self {
        Self {
            default_expiration_hours: default_expiration_hours(),
            max_expiration_hours: default_max_expiration_hours(),
            cleanup_interval_secs: default_cleanup_interval_secs(),
        }
    }
}

impl SharingConfig {
    pub fn cleanup_interval(&self) -> Option<std::time::Duration> {
        (self.cleanup_interval_secs > 0)
            .then(|| std::time::Duration::from_secs(self.cleanup_interval_secs))
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.max_expiration_hours == 0
            || self.max_expiration_hours > crate::share::MAX_EXPIRATION_HOURS
        {
            return Err(format!(
                "sharing.max_expiration_hours must be between 1 and {}",
                crate::share::MAX_EXPIRATION_HOURS
            ));
        }
        if self.default_expiration_hours == 0
            || self.default_expiration_hours > self.max_expiration_hours
        {
            return Err(
                "sharing.default_expiration_hours must be between 1 and max_expiration_hours"
                    .to_string(),
            );
        }
        Ok(())
    }
}

/// Full application configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub metadata: MetadataConfig,
    /// Admin token configuration (required).
    pub admin: AdminConfig,
    /// Share link signing (optional; sharing is disabled without it).
    pub signing: Option<SigningConfig>,
    #[serde(default)]
    pub upload: UploadConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub sharing: SharingConfig,
}

impl AppConfig {
    /// Create a test configuration with sensible defaults.
    ///
    /// **For testing only.** Uses filesystem storage, SQLite metadata,
    /// and a dummy admin token.
    pub fn for_testing() -> Self {
        Self {
            server: ServerConfig::default(),
            storage: StorageConfig::default(),
            metadata: MetadataConfig::default(),
            admin: AdminConfig::for_testing(),
            signing: None,
            upload: UploadConfig::default(),
            retry: RetryConfig {
                initial_backoff_ms: 1,
                max_backoff_ms: 5,
                ..RetryConfig::default()
            },
            sharing: SharingConfig::default(),
        }
    }

    /// Validate every section, stopping at the first error.
    pub fn validate(&self) -> Result<(), String> {
        self.server.validate()?;
        self.storage.validate()?;
        self.metadata.validate()?;
        self.upload.validate()?;
        self.retry.validate()?;
        self.sharing.validate()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        AppConfig::for_testing().validate().unwrap();
    }

    #[test]
    fn test_minimal_toml() {
        let config: AppConfig = toml::from_str(
            r#"
            [admin]
            token_hash = "sha256:17d6bfe05d1b1fb7bc499f8e3f639c7b3eda4c40f321eef8887a0c04c89a99c5"
            "#,
        )
        .unwrap();
        assert_eq!(config.upload.max_file_size, 50 * 1024 * 1024);
        assert_eq!(config.upload.max_files_per_batch, 10);
        assert!(config.upload.allowed_extensions.contains(&"dwg".to_string()));
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.sharing.default_expiration_hours, 24);
        assert_eq!(config.admin.display_name, "admin");
        assert!(config.signing.is_none());
        config.validate().unwrap();
    }

    #[test]
    fn test_full_toml() {
        let config: AppConfig = toml::from_str(
            r#"
            [server]
            bind = "0.0.0.0:9000"
            public_base_url = "https://hub.example.no"

            [storage]
            type = "s3"
            bucket = "documents"
            endpoint = "https://project.supabase.co/storage/v1/s3"
            region = "eu-north-1"
            force_path_style = true

            [metadata]
            type = "sqlite"
            path = "/var/lib/dokhub/metadata.db"

            [admin]
            token_hash = "abc"

            [signing]
            key_name = "hub-1"
            private_key = { type = "env", var = "DOKHUB_SIGNING_KEY" }

            [upload]
            max_file_size = 1048576
            allowed_extensions = ["pdf", ".TXT"]

            [sharing]
            cleanup_interval_secs = 0
            "#,
        )
        .unwrap();
        assert!(matches!(
            config.storage,
            StorageConfig::S3 { force_path_style: true, .. }
        ));
        assert!(matches!(
            config.signing.as_ref().map(|s| &s.private_key),
            Some(PrivateKeyConfig::Env { .. })
        ));
        assert!(config.sharing.cleanup_interval().is_none());
        config.validate().unwrap();
    }

    #[test]
    fn test_partial_s3_credentials_rejected() {
        let storage = StorageConfig::S3 {
            bucket: "b".to_string(),
            endpoint: None,
            region: None,
            prefix: None,
            access_key_id: Some("key".to_string()),
            secret_access_key: None,
            force_path_style: false,
        };
        assert!(storage.validate().is_err());
    }

    #[test]
    fn test_retry_validation() {
        let mut retry = RetryConfig::default();
        assert!(retry.validate().is_ok());
        retry.multiplier = 0.5;
        assert!(retry.validate().is_err());
        retry = RetryConfig {
            max_attempts: 0,
            ..RetryConfig::default()
        };
        assert!(retry.validate().is_err());
    }

    #[test]
    fn test_sharing_validation() {
        let sharing = SharingConfig {
            default_expiration_hours: 200,
            ..SharingConfig::default()
        };
        assert!(sharing.validate().is_err());
        let sharing = SharingConfig {
            max_expiration_hours: 500,
            ..SharingConfig::default()
        };
        assert!(sharing.validate().is_err());
    }

    #[test]
    fn test_public_base_url_must_be_http() {
        let server = ServerConfig {
            public_base_url: Some("hub.example.no".to_string()),
            ..ServerConfig::default()
        };
        assert!(server.validate().is_err());
    }
}
