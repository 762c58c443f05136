use std::sync::Arc;

use axum::{
    middleware as axum_middleware,
    routing::{delete, get, post, put},
    Json, Router,
};
use utoipa::OpenApi;

pub mod auth;
pub mod error;
pub mod middleware;
pub mod models;
pub mod rate_limit;
pub mod routes;
pub mod state;

use error::ApiError;
use models::*;
use state::AppState;

#[utoipa::path(
    get,
    path = "/health",
    responses((status = 200, description = "Service is healthy", body = HealthResponse))
)]
async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        timestamp: chrono::Utc::now().to_rfc3339(),
    })
}

#[derive(OpenApi)]
#[openapi(
    paths(
        health_check,
        routes::agent::fetch_config,
        routes::enroll::enroll,
        routes::webhook::patterns,
        routes::webhook::verify,
        routes::webhook::revoke,
        routes::admin::create_client,
        routes::admin::get_client,
        routes::admin::set_client_blocked,
        routes::admin::set_client_notes,
        routes::admin::set_lighthouse_public_ip,
        routes::admin::archive_client,
        routes::admin::add_client_to_group,
        routes::admin::remove_client_from_group,
        routes::admin::assign_ruleset_to_client,
        routes::admin::unassign_ruleset_from_client,
        routes::admin::create_group,
        routes::admin::list_groups,
        routes::admin::rename_group,
        routes::admin::delete_group,
        routes::admin::create_ruleset,
        routes::admin::get_ruleset,
        routes::admin::delete_ruleset,
        routes::admin::list_rules,
        routes::admin::put_rule,
        routes::admin::remove_rule,
        routes::admin::create_ip_pool,
        routes::admin::get_ip_pool,
        routes::admin::create_ip_group,
        routes::admin::allocate_ip,
        routes::admin::release_ip,
        routes::admin::create_ca,
        routes::admin::import_ca,
        routes::admin::get_ca,
        routes::admin::get_ca_chain,
        routes::admin::activate_ca,
        routes::admin::revoke_certificate,
        routes::admin::issue_token,
        routes::admin::issue_enrollment_code,
        routes::admin::list_audit_log,
    ),
    components(schemas(
        HealthResponse,
        ClientConfigRequest,
        ClientConfigResponse,
        SecretScanningPattern,
        SecretScanningItem,
        SecretScanningVerifyResult,
        SecretScanningRevokeResult,
        EnrollRequest,
        EnrollResponse,
        CreateClientRequest,
        SetBlockedRequest,
        SetNotesRequest,
        SetLighthousePublicIpRequest,
        GroupMembershipRequest,
        RulesetAssignmentRequest,
        CreateGroupRequest,
        RenameGroupRequest,
        CreateRulesetRequest,
        PutRuleRequest,
        CreateIpPoolRequest,
        CreateIpGroupRequest,
        AllocateIpRequest,
        CreateCaRequest,
        ImportCaRequest,
        IssuedTokenResponse,
        IssueEnrollmentCodeRequest,
        IssuedEnrollmentCodeResponse,
        AuditEvent,
        ApiError,
        meshctl_store::models::Client,
        meshctl_store::models::Group,
        meshctl_store::models::FirewallRule,
        meshctl_store::models::FirewallRuleset,
        meshctl_store::models::IpPool,
        meshctl_store::models::IpGroup,
        meshctl_store::models::IpAssignment,
        meshctl_store::models::CertificateAuthority,
    ))
)]
struct ApiDoc;

/// Assembles the full HTTP surface: the public node-agent/enrollment/webhook
/// routes, the JWT-gated admin-intent surface, `/health`, `/metrics`,
/// Swagger UI, and the teacher's middleware layering order (metrics,
/// logging, security headers, cors — outermost to innermost).
pub fn create_router(state: Arc<AppState>) -> Router {
    let public_routes = Router::new()
        .route("/health", get(health_check))
        .route("/client/config", post(routes::agent::fetch_config))
        .route("/enroll", post(routes::enroll::enroll))
        .route("/secret-scanning/verify", post(routes::webhook::verify))
        .route("/secret-scanning/revoke", post(routes::webhook::revoke));

    let admin_routes = Router::new()
        .route("/admin/clients", post(routes::admin::create_client))
        .route(
            "/admin/clients/:client_id",
            get(routes::admin::get_client).delete(routes::admin::archive_client),
        )
        .route("/admin/clients/:client_id/blocked", put(routes::admin::set_client_blocked))
        .route("/admin/clients/:client_id/notes", put(routes::admin::set_client_notes))
        .route(
            "/admin/clients/:client_id/lighthouse-public-ip",
            put(routes::admin::set_lighthouse_public_ip),
        )
        .route(
            "/admin/clients/:client_id/groups",
            post(routes::admin::add_client_to_group),
        )
        .route(
            "/admin/clients/:client_id/groups/:group_id",
            delete(routes::admin::remove_client_from_group),
        )
        .route(
            "/admin/clients/:client_id/rulesets",
            post(routes::admin::assign_ruleset_to_client),
        )
        .route(
            "/admin/clients/:client_id/rulesets/:ruleset_id",
            delete(routes::admin::unassign_ruleset_from_client),
        )
        .route("/admin/clients/:client_id/tokens", post(routes::admin::issue_token))
        .route(
            "/admin/clients/:client_id/enrollment-codes",
            post(routes::admin::issue_enrollment_code),
        )
        .route("/admin/groups", post(routes::admin::create_group).get(routes::admin::list_groups))
        .route(
            "/admin/groups/:group_id",
            put(routes::admin::rename_group).delete(routes::admin::delete_group),
        )
        .route("/admin/rulesets", post(routes::admin::create_ruleset))
        .route(
            "/admin/rulesets/:ruleset_id",
            get(routes::admin::get_ruleset).delete(routes::admin::delete_ruleset),
        )
        .route(
            "/admin/rulesets/:ruleset_id/rules",
            get(routes::admin::list_rules).put(routes::admin::put_rule),
        )
        .route(
            "/admin/rulesets/:ruleset_id/rules/:rule_id",
            delete(routes::admin::remove_rule),
        )
        .route("/admin/ip-pools", post(routes::admin::create_ip_pool))
        .route("/admin/ip-pools/:pool_id", get(routes::admin::get_ip_pool))
        .route("/admin/ip-pools/:pool_id/groups", post(routes::admin::create_ip_group))
        .route("/admin/ip-assignments", post(routes::admin::allocate_ip))
        .route("/admin/ip-assignments/:assignment_id", delete(routes::admin::release_ip))
        .route("/admin/cas", post(routes::admin::create_ca))
        .route("/admin/cas/import", post(routes::admin::import_ca))
        .route("/admin/cas/chain", get(routes::admin::get_ca_chain))
        .route("/admin/cas/:ca_id", get(routes::admin::get_ca))
        .route("/admin/cas/:ca_id/activate", post(routes::admin::activate_ca))
        .route(
            "/admin/certificates/:cert_id/revoke",
            post(routes::admin::revoke_certificate),
        )
        .route("/admin/audit-log", get(routes::admin::list_audit_log))
        .layer(axum_middleware::from_fn(middleware::auth::jwt_auth_middleware))
        .layer(axum::Extension(state.clone()));

    let well_known_routes = Router::new().route(
        "/.well-known/secret-scanning.json",
        get(routes::webhook::patterns),
    );

    let api_routes = Router::new().merge(public_routes).merge(admin_routes);

    Router::new()
        .merge(utoipa_swagger_ui::SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .nest("/v1", api_routes)
        .merge(well_known_routes)
        .merge(middleware::metrics::create_metrics_router())
        .layer(axum_middleware::from_fn(middleware::metrics::metrics_middleware))
        .layer(axum_middleware::from_fn(middleware::logging::request_tracing_middleware))
        .layer(axum_middleware::from_fn(middleware::headers::security_headers_middleware))
        .layer(middleware::cors::create_cors_layer())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn health_check_reports_healthy() {
        let response = health_check().await;
        assert_eq!(response.status, "healthy");
    }
}
