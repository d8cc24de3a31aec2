//! Integration tests for the admin API.

mod common;

use axum::http::StatusCode;
use common::fixtures::text_content;
use common::{ADMIN_TOKEN, TestServer, Upload, json_request, upload};
use serde_json::json;

#[tokio::test]
async fn test_admin_endpoints_require_admin() {
    let server = TestServer::new().await;
    let user = server.create_user("ola").await;
    // Admin role without the admin scope is not enough.
    let half_admin = server
        .create_user_with_scopes("halv", "admin", &["files:write"])
        .await;

    for token in [user.token.as_str(), half_admin.token.as_str()] {
        let (status, _) =
            json_request(&server.router, "GET", "/v1/admin/users", None, Some(token)).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        let (status, _) =
            json_request(&server.router, "GET", "/v1/admin/stats", None, Some(token)).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
    }

    let (status, _) = json_request(&server.router, "GET", "/v1/admin/users", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_create_user_with_token() {
    let server = TestServer::new().await;

    let (status, body) = json_request(
        &server.router,
        "POST",
        "/v1/admin/users",
        Some(json!({
            "username": "  Kari.Nordmann ",
            "display_name": "Kari Nordmann",
            "email": "kari@example.no",
            "issue_token": true
        })),
        Some(ADMIN_TOKEN),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    assert_eq!(body["user"]["username"], "kari.nordmann");
    assert_eq!(body["user"]["role"], "user");
    assert_eq!(body["user"]["disabled"], false);
    let secret = body["token"]["token_secret"].as_str().unwrap().to_string();
    assert!(body["token"]["expires_at"].is_null());

    let (status, me) =
        json_request(&server.router, "GET", "/v1/auth/whoami", None, Some(&secret)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(me["username"], "kari.nordmann");
    assert_eq!(me["scopes"], json!(["files:read", "files:write"]));

    let (status, _) = json_request(
        &server.router,
        "POST",
        "/v1/admin/users",
        Some(json!({"username": "kari.nordmann"})),
        Some(ADMIN_TOKEN),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, body) = json_request(
        &server.router,
        "POST",
        "/v1/admin/users",
        Some(json!({"username": "kari nordmann"})),
        Some(ADMIN_TOKEN),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "bad_request");

    let (status, _) = json_request(
        &server.router,
        "POST",
        "/v1/admin/users",
        Some(json!({"username": "superbruker", "role": "root"})),
        Some(ADMIN_TOKEN),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, users) =
        json_request(&server.router, "GET", "/v1/admin/users", None, Some(ADMIN_TOKEN)).await;
    assert_eq!(status, StatusCode::OK);
    let names: Vec<&str> = users
        .as_array()
        .unwrap()
        .iter()
        .map(|u| u["username"].as_str().unwrap())
        .collect();
    assert_eq!(names, vec!["admin", "kari.nordmann"]);
}

#[tokio::test]
async fn test_create_user_without_token_and_invalid_json() {
    let server = TestServer::new().await;

    let (status, body) = json_request(
        &server.router,
        "POST",
        "/v1/admin/users",
        Some(json!({"username": "per"})),
        Some(ADMIN_TOKEN),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert!(body.get("token").is_none());

    let (status, _) = json_request(
        &server.router,
        "POST",
        "/v1/admin/users",
        Some(json!({"display_name": "no username"})),
        Some(ADMIN_TOKEN),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_make_admin() {
    let server = TestServer::new().await;
    let user = server.create_user("ola").await;

    let (status, body) = json_request(
        &server.router,
        "POST",
        "/v1/admin/make-admin",
        Some(json!({"user_id": user.user_id.to_string()})),
        Some(ADMIN_TOKEN),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["role"], "admin");

    let (status, _) = json_request(
        &server.router,
        "POST",
        "/v1/admin/make-admin",
        Some(json!({})),
        Some(ADMIN_TOKEN),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = json_request(
        &server.router,
        "POST",
        "/v1/admin/make-admin",
        Some(json!({"user_id": uuid::Uuid::new_v4().to_string()})),
        Some(ADMIN_TOKEN),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    // The promoted user can now receive an admin-scoped token.
    let (status, token) = json_request(
        &server.router,
        "POST",
        "/v1/admin/tokens",
        Some(json!({"user_id": user.user_id.to_string(), "scopes": ["hub:admin"]})),
        Some(ADMIN_TOKEN),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let secret = token["token_secret"].as_str().unwrap();
    let (status, _) =
        json_request(&server.router, "GET", "/v1/admin/stats", None, Some(secret)).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_token_lifecycle() {
    let server = TestServer::new().await;
    let user = server.create_user("ola").await;

    let (status, body) = json_request(
        &server.router,
        "POST",
        "/v1/admin/tokens",
        Some(json!({"user_id": user.user_id.to_string(), "scopes": ["hub:admin"]})),
        Some(ADMIN_TOKEN),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["message"].as_str().unwrap().contains("hub:admin"));

    for scopes in [json!([]), json!(["files:delete"])] {
        let (status, _) = json_request(
            &server.router,
            "POST",
            "/v1/admin/tokens",
            Some(json!({"user_id": user.user_id.to_string(), "scopes": scopes})),
            Some(ADMIN_TOKEN),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    let (status, _) = json_request(
        &server.router,
        "POST",
        "/v1/admin/tokens",
        Some(json!({"user_id": uuid::Uuid::new_v4().to_string(), "scopes": ["files:read"]})),
        Some(ADMIN_TOKEN),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, created) = json_request(
        &server.router,
        "POST",
        "/v1/admin/tokens",
        Some(json!({
            "user_id": user.user_id.to_string(),
            "scopes": ["files:read"],
            "expires_in_secs": 3600,
            "description": "CLI på laptop"
        })),
        Some(ADMIN_TOKEN),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert!(created["expires_at"].is_string());
    let token_id = created["token_id"].as_str().unwrap().to_string();
    let secret = created["token_secret"].as_str().unwrap().to_string();

    let (status, me) =
        json_request(&server.router, "GET", "/v1/auth/whoami", None, Some(&secret)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(me["token_id"], token_id);

    let (status, tokens) = json_request(
        &server.router,
        "GET",
        &format!("/v1/admin/tokens?user_id={}", user.user_id),
        None,
        Some(ADMIN_TOKEN),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let tokens = tokens.as_array().unwrap();
    assert_eq!(tokens.len(), 2);
    assert!(tokens
        .iter()
        .any(|t| t["token_id"] == token_id.as_str() && t["description"] == "CLI på laptop"));

    let uri = format!("/v1/admin/tokens/{token_id}");
    let (status, _) = json_request(&server.router, "DELETE", &uri, None, Some(ADMIN_TOKEN)).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let (status, _) = json_request(&server.router, "DELETE", &uri, None, Some(ADMIN_TOKEN)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) =
        json_request(&server.router, "GET", "/v1/auth/whoami", None, Some(&secret)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_stats() {
    let server = TestServer::new().await;
    let user = server.create_user("ola").await;

    for (i, len) in [100usize, 250].into_iter().enumerate() {
        let name = format!("notat{i}.txt");
        let (status, _) = upload(
            &server.router,
            &user.token,
            Upload::new(&name, "text/plain", text_content(i as u64, len)),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
    }
    json_request(
        &server.router,
        "POST",
        "/v1/orgs",
        Some(json!({"name": "Statistikk", "type": "emne"})),
        Some(&user.token),
    )
    .await;

    let (status, stats) =
        json_request(&server.router, "GET", "/v1/admin/stats", None, Some(ADMIN_TOKEN)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(stats["users"], 2);
    assert_eq!(stats["files"], 2);
    assert_eq!(stats["total_bytes"], 350);
    assert_eq!(stats["organizations"], 1);
    assert_eq!(stats["active_shares"], 0);
}

#[tokio::test]
async fn test_audit_filters() {
    let server = TestServer::new().await;

    let (status, entries) =
        json_request(&server.router, "GET", "/v1/admin/audit", None, Some(ADMIN_TOKEN)).await;
    assert_eq!(status, StatusCode::OK);
    assert!(entries.as_array().unwrap().is_empty());

    let (status, _) = json_request(
        &server.router,
        "GET",
        "/v1/admin/audit?action=deleted",
        None,
        Some(ADMIN_TOKEN),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = json_request(
        &server.router,
        "GET",
        "/v1/admin/audit?file_id=nope",
        None,
        Some(ADMIN_TOKEN),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}
