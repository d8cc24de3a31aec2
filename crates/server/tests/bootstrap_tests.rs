//! Tests for bootstrap admin initialization behavior.

mod common;

use axum::http::StatusCode;
use common::fixtures::sha256_hash;
use common::{ADMIN_TOKEN, TestServer, json_request};
use dokhub_core::config::AdminConfig;
use dokhub_metadata::models::TokenRow;
use dokhub_server::bootstrap::{ADMIN_USERNAME, ensure_admin_token};
use time::{Duration, OffsetDateTime};
use uuid::Uuid;

fn admin_config(raw_token: &str) -> AdminConfig {
    AdminConfig {
        token_hash: sha256_hash(raw_token.as_bytes()),
        display_name: "Hub-administrator".to_string(),
        token_description: Some("Bootstrap admin token".to_string()),
    }
}

#[tokio::test]
async fn test_bootstrap_creates_admin_user_and_token() {
    let server = TestServer::new().await;

    let admin = server
        .metadata()
        .get_user_by_username(ADMIN_USERNAME)
        .await
        .unwrap()
        .expect("admin user should exist");
    assert_eq!(admin.role, "admin");
    assert!(!admin.disabled);

    let hash = sha256_hash(ADMIN_TOKEN.as_bytes());
    let token = server
        .metadata()
        .get_token_by_hash(&hash)
        .await
        .unwrap()
        .expect("admin token should exist");
    assert_eq!(token.user_id, admin.user_id);
    assert_eq!(token.scopes, r#"["hub:admin"]"#);
    assert_eq!(
        server.metadata().get_bootstrap_token_id().await.unwrap(),
        Some(token.token_id)
    );
}

#[tokio::test]
async fn test_bootstrap_is_idempotent() {
    let server = TestServer::new().await;
    let metadata = server.metadata();
    let config = AdminConfig::for_testing();

    ensure_admin_token(metadata.as_ref(), &config).await.unwrap();
    ensure_admin_token(metadata.as_ref(), &config).await.unwrap();

    let users = metadata.list_users().await.unwrap();
    assert_eq!(users.len(), 1);
    let tokens = metadata.list_tokens(Some(users[0].user_id)).await.unwrap();
    assert_eq!(tokens.len(), 1);
    assert!(tokens[0].revoked_at.is_none());

    let (status, _) =
        json_request(&server.router, "GET", "/v1/auth/whoami", None, Some(ADMIN_TOKEN)).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_bootstrap_accepts_prefixed_uppercase_hash() {
    let server = TestServer::new().await;
    let mut config = AdminConfig::for_testing();
    config.token_hash = format!("sha256:{}", config.token_hash.to_uppercase());

    ensure_admin_token(server.metadata().as_ref(), &config)
        .await
        .unwrap();

    let admin = server
        .metadata()
        .get_user_by_username(ADMIN_USERNAME)
        .await
        .unwrap()
        .unwrap();
    let tokens = server.metadata().list_tokens(Some(admin.user_id)).await.unwrap();
    assert_eq!(tokens.len(), 1);
}

#[tokio::test]
async fn test_bootstrap_rejects_malformed_hash() {
    let server = TestServer::new().await;
    let mut config = AdminConfig::for_testing();
    config.token_hash = "not-a-hash".to_string();

    assert!(
        ensure_admin_token(server.metadata().as_ref(), &config)
            .await
            .is_err()
    );
}

#[tokio::test]
async fn test_bootstrap_rotation_revokes_previous_token() {
    let server = TestServer::new().await;
    let rotated = "rotated-admin-token";

    ensure_admin_token(server.metadata().as_ref(), &admin_config(rotated))
        .await
        .unwrap();

    let (status, _) =
        json_request(&server.router, "GET", "/v1/auth/whoami", None, Some(ADMIN_TOKEN)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, body) =
        json_request(&server.router, "GET", "/v1/auth/whoami", None, Some(rotated)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["username"], ADMIN_USERNAME);

    let old = server
        .metadata()
        .get_token_by_hash(&sha256_hash(ADMIN_TOKEN.as_bytes()))
        .await
        .unwrap()
        .unwrap();
    assert!(old.revoked_at.is_some());

    // Rotating back to a revoked hash must fail loudly.
    let err = ensure_admin_token(server.metadata().as_ref(), &AdminConfig::for_testing())
        .await
        .unwrap_err();
    assert!(err.to_string().contains("revoked"));
}

#[tokio::test]
async fn test_bootstrap_rejects_expired_hash() {
    let server = TestServer::new().await;
    let raw = "expired-admin-token";
    let admin = server
        .metadata()
        .get_user_by_username(ADMIN_USERNAME)
        .await
        .unwrap()
        .unwrap();

    let now = OffsetDateTime::now_utc();
    server
        .metadata()
        .create_token(&TokenRow {
            token_id: Uuid::new_v4(),
            user_id: admin.user_id,
            token_hash: sha256_hash(raw.as_bytes()),
            scopes: r#"["hub:admin"]"#.to_string(),
            expires_at: Some(now - Duration::hours(1)),
            revoked_at: None,
            created_at: now - Duration::days(1),
            last_used_at: None,
            description: None,
        })
        .await
        .unwrap();

    let err = ensure_admin_token(server.metadata().as_ref(), &admin_config(raw))
        .await
        .unwrap_err();
    assert!(err.to_string().contains("expired"));
}

#[tokio::test]
async fn test_bootstrap_rejects_hash_of_other_users_token() {
    let server = TestServer::new().await;
    let user = server.create_user("kari").await;

    let err = ensure_admin_token(server.metadata().as_ref(), &admin_config(&user.token))
        .await
        .unwrap_err();
    assert!(err.to_string().contains("another user"));
}

#[tokio::test]
async fn test_bootstrap_restores_admin_role_and_enables_user() {
    let server = TestServer::new().await;
    let metadata = server.metadata();
    let admin = metadata
        .get_user_by_username(ADMIN_USERNAME)
        .await
        .unwrap()
        .unwrap();

    let now = OffsetDateTime::now_utc();
    metadata.set_user_role(admin.user_id, "user", now).await.unwrap();
    metadata
        .set_user_disabled(admin.user_id, true, now)
        .await
        .unwrap();

    let (status, _) =
        json_request(&server.router, "GET", "/v1/auth/whoami", None, Some(ADMIN_TOKEN)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    ensure_admin_token(metadata.as_ref(), &AdminConfig::for_testing())
        .await
        .unwrap();

    let restored = metadata.get_user(admin.user_id).await.unwrap().unwrap();
    assert_eq!(restored.role, "admin");
    assert!(!restored.disabled);

    let (status, body) =
        json_request(&server.router, "GET", "/v1/admin/stats", None, Some(ADMIN_TOKEN)).await;
    assert_eq!(status, StatusCode::OK, "{body}");
}
