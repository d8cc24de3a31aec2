//! Route configuration.

use crate::auth::auth_middleware;
use crate::handlers;
use crate::metrics::metrics_handler;
use crate::state::AppState;
use axum::Router;
use axum::middleware;
use axum::routing::{delete, get, patch, post};
use tower_http::trace::TraceLayer;

/// Create the application router.
pub fn create_router(state: AppState) -> Router {
    let api_routes = Router::new()
        // Discovery and health (unauthenticated)
        .route("/v1/capabilities", get(handlers::get_capabilities))
        .route("/v1/health", get(handlers::health_check))
        .route("/v1/auth/whoami", get(handlers::whoami))
        // Files
        .route("/v1/files/validate", post(handlers::validate_files))
        .route(
            "/v1/files",
            post(handlers::upload_file).get(handlers::list_files),
        )
        .route(
            "/v1/files/{file_id}",
            get(handlers::get_file).delete(handlers::delete_file),
        )
        .route("/v1/files/{file_id}/content", get(handlers::download_file))
        .route("/v1/files/{file_id}/shares", get(handlers::list_file_shares))
        // Organizations
        .route(
            "/v1/orgs",
            post(handlers::create_organization).get(handlers::list_organizations),
        )
        .route("/v1/orgs/join", post(handlers::join_organization))
        .route("/v1/orgs/{org_id}", get(handlers::get_organization))
        .route(
            "/v1/orgs/{org_id}/members",
            get(handlers::list_members).post(handlers::invite_member),
        )
        .route(
            "/v1/orgs/{org_id}/members/{user_id}",
            patch(handlers::update_member).delete(handlers::remove_member),
        )
        .route(
            "/v1/orgs/{org_id}/files",
            get(handlers::list_organization_files),
        )
        // Sharing
        .route("/v1/shares", post(handlers::create_share))
        .route("/v1/shares/{share_id}/revoke", post(handlers::revoke_share))
        .route(
            "/v1/public/shares/{share_id}",
            get(handlers::access_share),
        )
        // Admin endpoints (admin role and hub:admin scope)
        .route(
            "/v1/admin/users",
            post(handlers::create_user).get(handlers::list_users),
        )
        .route("/v1/admin/make-admin", post(handlers::make_admin))
        .route(
            "/v1/admin/tokens",
            post(handlers::create_token).get(handlers::list_tokens),
        )
        .route(
            "/v1/admin/tokens/{token_id}",
            delete(handlers::revoke_token),
        )
        .route("/v1/admin/shares/cleanup", post(handlers::cleanup_shares))
        .route("/v1/admin/audit", get(handlers::list_audit))
        .route("/v1/admin/stats", get(handlers::get_stats));

    let mut router = Router::new().merge(api_routes);

    // When enabled, restrict /metrics at the network level.
    if state.config.server.metrics_enabled {
        let metrics_routes = Router::new().route("/metrics", get(metrics_handler));
        router = router.merge(metrics_routes);
    }

    router
        // Auth middleware (validates token and sets AuthenticatedUser extension)
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
