//! Admin-intent surface (spec §6.4): CRUD for Client/Group/Ruleset/IPPool/
//! IPGroup/CA/Token/EnrollmentCode, set-signing-CA, revoke-certificate, and
//! audit-entry listing. Every handler here sits behind `jwt_auth_middleware`
//! (see [`crate::routes::admin_routes`]) and requires an [`AuthUser`],
//! mirroring how the teacher gates its own `/admin/...` routes.

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::Deserialize;
use uuid::Uuid;

use crate::auth::AuthUser;
use crate::error::ApiResult;
use crate::models::*;
use crate::state::AppState;
use meshctl_store::models::{CertificateAuthority, Client, FirewallRule, FirewallRuleset, Group, IpAssignment, IpGroup, IpPool};

// ---- clients ----

#[utoipa::path(
    post,
    path = "/v1/admin/clients",
    request_body = CreateClientRequest,
    responses((status = 201, description = "Client created", body = Client)),
    security(("bearer_auth" = []))
)]
pub async fn create_client(
    State(state): State<Arc<AppState>>,
    _auth: AuthUser,
    Json(request): Json<CreateClientRequest>,
) -> ApiResult<(axum::http::StatusCode, Json<Client>)> {
    let client = meshctl_store::client_repo::create(
        &state.db,
        &request.name,
        &request.owner,
        request.is_lighthouse,
        request.public_ip,
    )
    .await?;

    Ok((axum::http::StatusCode::CREATED, Json(client)))
}

#[utoipa::path(
    get,
    path = "/v1/admin/clients/{client_id}",
    responses((status = 200, description = "Client", body = Client)),
    security(("bearer_auth" = []))
)]
pub async fn get_client(
    State(state): State<Arc<AppState>>,
    _auth: AuthUser,
    Path(client_id): Path<Uuid>,
) -> ApiResult<Json<Client>> {
    Ok(Json(meshctl_store::client_repo::get(&state.db, client_id).await?))
}

#[utoipa::path(
    put,
    path = "/v1/admin/clients/{client_id}/blocked",
    request_body = SetBlockedRequest,
    responses((status = 200, description = "Client updated", body = Client)),
    security(("bearer_auth" = []))
)]
pub async fn set_client_blocked(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Path(client_id): Path<Uuid>,
    Json(request): Json<SetBlockedRequest>,
) -> ApiResult<Json<Client>> {
    let client = meshctl_store::client_repo::set_blocked(&state.db, client_id, request.is_blocked).await?;

    meshctl_store::tokens::record_audit_event(
        &state.db,
        "client.blocked_set",
        &client_id.to_string(),
        serde_json::json!({ "is_blocked": request.is_blocked, "operator": auth.username }),
    )
    .await;

    Ok(Json(client))
}

#[utoipa::path(
    put,
    path = "/v1/admin/clients/{client_id}/notes",
    request_body = SetNotesRequest,
    responses((status = 200, description = "Client updated", body = Client)),
    security(("bearer_auth" = []))
)]
pub async fn set_client_notes(
    State(state): State<Arc<AppState>>,
    _auth: AuthUser,
    Path(client_id): Path<Uuid>,
    Json(request): Json<SetNotesRequest>,
) -> ApiResult<Json<Client>> {
    Ok(Json(
        meshctl_store::client_repo::set_notes(&state.db, client_id, request.notes.as_deref()).await?,
    ))
}

#[utoipa::path(
    put,
    path = "/v1/admin/clients/{client_id}/lighthouse-public-ip",
    request_body = SetLighthousePublicIpRequest,
    responses((status = 200, description = "Client updated", body = Client)),
    security(("bearer_auth" = []))
)]
pub async fn set_lighthouse_public_ip(
    State(state): State<Arc<AppState>>,
    _auth: AuthUser,
    Path(client_id): Path<Uuid>,
    Json(request): Json<SetLighthousePublicIpRequest>,
) -> ApiResult<Json<Client>> {
    Ok(Json(
        meshctl_store::client_repo::set_lighthouse_public_ip(&state.db, client_id, request.public_ip).await?,
    ))
}

#[utoipa::path(
    delete,
    path = "/v1/admin/clients/{client_id}",
    responses((status = 204, description = "Client archived")),
    security(("bearer_auth" = []))
)]
pub async fn archive_client(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Path(client_id): Path<Uuid>,
) -> ApiResult<axum::http::StatusCode> {
    meshctl_store::client_repo::archive(&state.db, client_id).await?;

    meshctl_store::tokens::record_audit_event(
        &state.db,
        "client.archived",
        &client_id.to_string(),
        serde_json::json!({ "operator": auth.username }),
    )
    .await;

    Ok(axum::http::StatusCode::NO_CONTENT)
}

#[utoipa::path(
    post,
    path = "/v1/admin/clients/{client_id}/groups",
    request_body = GroupMembershipRequest,
    responses((status = 204, description = "Client added to group")),
    security(("bearer_auth" = []))
)]
pub async fn add_client_to_group(
    State(state): State<Arc<AppState>>,
    _auth: AuthUser,
    Path(client_id): Path<Uuid>,
    Json(request): Json<GroupMembershipRequest>,
) -> ApiResult<axum::http::StatusCode> {
    meshctl_store::client_repo::add_to_group(&state.db, client_id, request.group_id).await?;
    Ok(axum::http::StatusCode::NO_CONTENT)
}

#[utoipa::path(
    delete,
    path = "/v1/admin/clients/{client_id}/groups/{group_id}",
    responses((status = 204, description = "Client removed from group")),
    security(("bearer_auth" = []))
)]
pub async fn remove_client_from_group(
    State(state): State<Arc<AppState>>,
    _auth: AuthUser,
    Path((client_id, group_id)): Path<(Uuid, Uuid)>,
) -> ApiResult<axum::http::StatusCode> {
    meshctl_store::client_repo::remove_from_group(&state.db, client_id, group_id).await?;
    Ok(axum::http::StatusCode::NO_CONTENT)
}

#[utoipa::path(
    post,
    path = "/v1/admin/clients/{client_id}/rulesets",
    request_body = RulesetAssignmentRequest,
    responses((status = 204, description = "Ruleset assigned")),
    security(("bearer_auth" = []))
)]
pub async fn assign_ruleset_to_client(
    State(state): State<Arc<AppState>>,
    _auth: AuthUser,
    Path(client_id): Path<Uuid>,
    Json(request): Json<RulesetAssignmentRequest>,
) -> ApiResult<axum::http::StatusCode> {
    meshctl_store::client_repo::assign_ruleset(&state.db, client_id, request.ruleset_id).await?;
    Ok(axum::http::StatusCode::NO_CONTENT)
}

#[utoipa::path(
    delete,
    path = "/v1/admin/clients/{client_id}/rulesets/{ruleset_id}",
    responses((status = 204, description = "Ruleset unassigned")),
    security(("bearer_auth" = []))
)]
pub async fn unassign_ruleset_from_client(
    State(state): State<Arc<AppState>>,
    _auth: AuthUser,
    Path((client_id, ruleset_id)): Path<(Uuid, Uuid)>,
) -> ApiResult<axum::http::StatusCode> {
    meshctl_store::client_repo::unassign_ruleset(&state.db, client_id, ruleset_id).await?;
    Ok(axum::http::StatusCode::NO_CONTENT)
}

// ---- groups ----

#[utoipa::path(
    post,
    path = "/v1/admin/groups",
    request_body = CreateGroupRequest,
    responses((status = 201, description = "Group created", body = Group)),
    security(("bearer_auth" = []))
)]
pub async fn create_group(
    State(state): State<Arc<AppState>>,
    _auth: AuthUser,
    Json(request): Json<CreateGroupRequest>,
) -> ApiResult<(axum::http::StatusCode, Json<Group>)> {
    let group = meshctl_store::group_repo::create(&state.db, &request.name, &request.owner).await?;
    Ok((axum::http::StatusCode::CREATED, Json(group)))
}

#[utoipa::path(
    get,
    path = "/v1/admin/groups",
    responses((status = 200, description = "Groups", body = [Group])),
    security(("bearer_auth" = []))
)]
pub async fn list_groups(State(state): State<Arc<AppState>>, _auth: AuthUser) -> ApiResult<Json<Vec<Group>>> {
    Ok(Json(meshctl_store::group_repo::list(&state.db).await?))
}

#[utoipa::path(
    put,
    path = "/v1/admin/groups/{group_id}",
    request_body = RenameGroupRequest,
    responses((status = 200, description = "Group renamed", body = Group)),
    security(("bearer_auth" = []))
)]
pub async fn rename_group(
    State(state): State<Arc<AppState>>,
    _auth: AuthUser,
    Path(group_id): Path<Uuid>,
    Json(request): Json<RenameGroupRequest>,
) -> ApiResult<Json<Group>> {
    Ok(Json(meshctl_store::group_repo::rename(&state.db, group_id, &request.name).await?))
}

#[utoipa::path(
    delete,
    path = "/v1/admin/groups/{group_id}",
    responses((status = 204, description = "Group deleted")),
    security(("bearer_auth" = []))
)]
pub async fn delete_group(
    State(state): State<Arc<AppState>>,
    _auth: AuthUser,
    Path(group_id): Path<Uuid>,
) -> ApiResult<axum::http::StatusCode> {
    meshctl_store::group_repo::delete(&state.db, group_id).await?;
    Ok(axum::http::StatusCode::NO_CONTENT)
}

// ---- firewall rulesets ----

#[utoipa::path(
    post,
    path = "/v1/admin/rulesets",
    request_body = CreateRulesetRequest,
    responses((status = 201, description = "Ruleset created", body = FirewallRuleset)),
    security(("bearer_auth" = []))
)]
pub async fn create_ruleset(
    State(state): State<Arc<AppState>>,
    _auth: AuthUser,
    Json(request): Json<CreateRulesetRequest>,
) -> ApiResult<(axum::http::StatusCode, Json<FirewallRuleset>)> {
    let ruleset = meshctl_store::firewall_repo::create_ruleset(&state.db, &request.name, &request.owner).await?;
    Ok((axum::http::StatusCode::CREATED, Json(ruleset)))
}

#[utoipa::path(
    get,
    path = "/v1/admin/rulesets/{ruleset_id}",
    responses((status = 200, description = "Ruleset", body = FirewallRuleset)),
    security(("bearer_auth" = []))
)]
pub async fn get_ruleset(
    State(state): State<Arc<AppState>>,
    _auth: AuthUser,
    Path(ruleset_id): Path<Uuid>,
) -> ApiResult<Json<FirewallRuleset>> {
    Ok(Json(meshctl_store::firewall_repo::get_ruleset(&state.db, ruleset_id).await?))
}

#[utoipa::path(
    delete,
    path = "/v1/admin/rulesets/{ruleset_id}",
    responses((status = 204, description = "Ruleset deleted")),
    security(("bearer_auth" = []))
)]
pub async fn delete_ruleset(
    State(state): State<Arc<AppState>>,
    _auth: AuthUser,
    Path(ruleset_id): Path<Uuid>,
) -> ApiResult<axum::http::StatusCode> {
    meshctl_store::firewall_repo::delete_ruleset(&state.db, ruleset_id).await?;
    Ok(axum::http::StatusCode::NO_CONTENT)
}

#[utoipa::path(
    get,
    path = "/v1/admin/rulesets/{ruleset_id}/rules",
    responses((status = 200, description = "Rules", body = [FirewallRule])),
    security(("bearer_auth" = []))
)]
pub async fn list_rules(
    State(state): State<Arc<AppState>>,
    _auth: AuthUser,
    Path(ruleset_id): Path<Uuid>,
) -> ApiResult<Json<Vec<FirewallRule>>> {
    Ok(Json(meshctl_store::firewall_repo::rules_for_ruleset(&state.db, ruleset_id).await?))
}

#[utoipa::path(
    put,
    path = "/v1/admin/rulesets/{ruleset_id}/rules",
    request_body = PutRuleRequest,
    responses((status = 200, description = "Rule upserted", body = FirewallRule)),
    security(("bearer_auth" = []))
)]
pub async fn put_rule(
    State(state): State<Arc<AppState>>,
    _auth: AuthUser,
    Path(ruleset_id): Path<Uuid>,
    Json(request): Json<PutRuleRequest>,
) -> ApiResult<Json<FirewallRule>> {
    let rule = meshctl_store::firewall_repo::put_rule(
        &state.db,
        ruleset_id,
        request.position,
        request.direction,
        &request.port,
        request.proto,
        &request.selector,
    )
    .await?;

    Ok(Json(rule))
}

#[utoipa::path(
    delete,
    path = "/v1/admin/rulesets/{ruleset_id}/rules/{rule_id}",
    responses((status = 204, description = "Rule removed")),
    security(("bearer_auth" = []))
)]
pub async fn remove_rule(
    State(state): State<Arc<AppState>>,
    _auth: AuthUser,
    Path((ruleset_id, rule_id)): Path<(Uuid, Uuid)>,
) -> ApiResult<axum::http::StatusCode> {
    meshctl_store::firewall_repo::remove_rule(&state.db, ruleset_id, rule_id).await?;
    Ok(axum::http::StatusCode::NO_CONTENT)
}

// ---- IP pools, IP groups, assignments ----

#[utoipa::path(
    post,
    path = "/v1/admin/ip-pools",
    request_body = CreateIpPoolRequest,
    responses((status = 201, description = "IP pool created", body = IpPool)),
    security(("bearer_auth" = []))
)]
pub async fn create_ip_pool(
    State(state): State<Arc<AppState>>,
    _auth: AuthUser,
    Json(request): Json<CreateIpPoolRequest>,
) -> ApiResult<(axum::http::StatusCode, Json<IpPool>)> {
    let cidr: ipnet::IpNet = request
        .cidr
        .parse()
        .map_err(|e| crate::error::ApiError::bad_request(format!("invalid cidr: {e}")))?;

    let pool = meshctl_store::ip_repo::create_pool(&state.db, cidr, &request.description).await?;
    Ok((axum::http::StatusCode::CREATED, Json(pool)))
}

#[utoipa::path(
    get,
    path = "/v1/admin/ip-pools/{pool_id}",
    responses((status = 200, description = "IP pool", body = IpPool)),
    security(("bearer_auth" = []))
)]
pub async fn get_ip_pool(
    State(state): State<Arc<AppState>>,
    _auth: AuthUser,
    Path(pool_id): Path<Uuid>,
) -> ApiResult<Json<IpPool>> {
    Ok(Json(meshctl_store::ip_repo::get_pool(&state.db, pool_id).await?))
}

#[utoipa::path(
    post,
    path = "/v1/admin/ip-pools/{pool_id}/groups",
    request_body = CreateIpGroupRequest,
    responses((status = 201, description = "IP group created", body = IpGroup)),
    security(("bearer_auth" = []))
)]
pub async fn create_ip_group(
    State(state): State<Arc<AppState>>,
    _auth: AuthUser,
    Path(pool_id): Path<Uuid>,
    Json(request): Json<CreateIpGroupRequest>,
) -> ApiResult<(axum::http::StatusCode, Json<IpGroup>)> {
    let group = meshctl_store::ip_repo::create_ip_group(
        &state.db,
        pool_id,
        &request.name,
        request.start_ip,
        request.end_ip,
    )
    .await?;

    Ok((axum::http::StatusCode::CREATED, Json(group)))
}

#[utoipa::path(
    post,
    path = "/v1/admin/ip-assignments",
    request_body = AllocateIpRequest,
    responses((status = 201, description = "IP allocated", body = IpAssignment)),
    security(("bearer_auth" = []))
)]
pub async fn allocate_ip(
    State(state): State<Arc<AppState>>,
    _auth: AuthUser,
    Json(request): Json<AllocateIpRequest>,
) -> ApiResult<(axum::http::StatusCode, Json<IpAssignment>)> {
    let assignment = meshctl_store::ip_repo::allocate(
        &state.db,
        request.client_id,
        request.pool_id,
        request.ip_group_id,
        request.requested_ip,
        request.is_primary,
    )
    .await?;

    Ok((axum::http::StatusCode::CREATED, Json(assignment)))
}

#[utoipa::path(
    delete,
    path = "/v1/admin/ip-assignments/{assignment_id}",
    responses((status = 204, description = "IP assignment released")),
    security(("bearer_auth" = []))
)]
pub async fn release_ip(
    State(state): State<Arc<AppState>>,
    _auth: AuthUser,
    Path(assignment_id): Path<Uuid>,
) -> ApiResult<axum::http::StatusCode> {
    meshctl_store::ip_repo::release(&state.db, assignment_id).await?;
    Ok(axum::http::StatusCode::NO_CONTENT)
}

// ---- certificate authorities ----

#[utoipa::path(
    post,
    path = "/v1/admin/cas",
    request_body = CreateCaRequest,
    responses((status = 201, description = "CA created", body = CertificateAuthority)),
    security(("bearer_auth" = []))
)]
pub async fn create_ca(
    State(state): State<Arc<AppState>>,
    _auth: AuthUser,
    Json(request): Json<CreateCaRequest>,
) -> ApiResult<(axum::http::StatusCode, Json<CertificateAuthority>)> {
    let ca = meshctl_store::ca_repo::create_ca(&state.db, &request.name, request.not_before, request.not_after).await?;
    Ok((axum::http::StatusCode::CREATED, Json(ca)))
}

#[utoipa::path(
    post,
    path = "/v1/admin/cas/import",
    request_body = ImportCaRequest,
    responses((status = 201, description = "CA imported", body = CertificateAuthority)),
    security(("bearer_auth" = []))
)]
pub async fn import_ca(
    State(state): State<Arc<AppState>>,
    _auth: AuthUser,
    Json(request): Json<ImportCaRequest>,
) -> ApiResult<(axum::http::StatusCode, Json<CertificateAuthority>)> {
    let ca = meshctl_store::ca_repo::import_ca(
        &state.db,
        &request.name,
        &request.public_cert_pem,
        request.private_key_pem.as_deref(),
    )
    .await?;

    Ok((axum::http::StatusCode::CREATED, Json(ca)))
}

#[utoipa::path(
    get,
    path = "/v1/admin/cas/{ca_id}",
    responses((status = 200, description = "CA", body = CertificateAuthority)),
    security(("bearer_auth" = []))
)]
pub async fn get_ca(
    State(state): State<Arc<AppState>>,
    _auth: AuthUser,
    Path(ca_id): Path<Uuid>,
) -> ApiResult<Json<CertificateAuthority>> {
    Ok(Json(meshctl_store::ca_repo::get(&state.db, ca_id).await?))
}

#[utoipa::path(
    get,
    path = "/v1/admin/cas/chain",
    responses((status = 200, description = "Active CA chain", body = [CertificateAuthority])),
    security(("bearer_auth" = []))
)]
pub async fn get_ca_chain(State(state): State<Arc<AppState>>, _auth: AuthUser) -> ApiResult<Json<Vec<CertificateAuthority>>> {
    Ok(Json(meshctl_store::ca_repo::get_active_ca_chain(&state.db).await?))
}

#[utoipa::path(
    post,
    path = "/v1/admin/cas/{ca_id}/activate",
    responses((status = 200, description = "CA activated as current signer", body = CertificateAuthority)),
    security(("bearer_auth" = []))
)]
pub async fn activate_ca(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Path(ca_id): Path<Uuid>,
) -> ApiResult<Json<CertificateAuthority>> {
    let ca = meshctl_store::ca_repo::activate(&state.db, ca_id).await?;

    meshctl_store::tokens::record_audit_event(
        &state.db,
        "ca.activated",
        &ca_id.to_string(),
        serde_json::json!({ "name": ca.name, "operator": auth.username }),
    )
    .await;

    Ok(Json(ca))
}

// ---- certificates ----

#[utoipa::path(
    post,
    path = "/v1/admin/certificates/{cert_id}/revoke",
    responses((status = 204, description = "Certificate revoked")),
    security(("bearer_auth" = []))
)]
pub async fn revoke_certificate(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Path(cert_id): Path<Uuid>,
) -> ApiResult<axum::http::StatusCode> {
    meshctl_store::cert_repo::revoke(&state.db, cert_id).await?;

    meshctl_store::tokens::record_audit_event(
        &state.db,
        "certificate.revoked",
        &cert_id.to_string(),
        serde_json::json!({ "operator": auth.username }),
    )
    .await;

    Ok(axum::http::StatusCode::NO_CONTENT)
}

// ---- tokens & enrollment codes ----

#[utoipa::path(
    post,
    path = "/v1/admin/clients/{client_id}/tokens",
    responses((status = 201, description = "Token issued", body = IssuedTokenResponse)),
    security(("bearer_auth" = []))
)]
pub async fn issue_token(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Path(client_id): Path<Uuid>,
) -> ApiResult<(axum::http::StatusCode, Json<IssuedTokenResponse>)> {
    let issued = meshctl_store::tokens::issue(&state.db, client_id, &state.token_pepper.0).await?;

    meshctl_store::tokens::record_audit_event(
        &state.db,
        "token.issued",
        &client_id.to_string(),
        serde_json::json!({ "token_prefix": issued.token.token_prefix, "operator": auth.username }),
    )
    .await;

    Ok((
        axum::http::StatusCode::CREATED,
        Json(IssuedTokenResponse {
            id: issued.token.id,
            token_prefix: issued.token.token_prefix,
            plaintext: issued.plaintext,
        }),
    ))
}

#[utoipa::path(
    post,
    path = "/v1/admin/clients/{client_id}/enrollment-codes",
    request_body = IssueEnrollmentCodeRequest,
    responses((status = 201, description = "Enrollment code issued", body = IssuedEnrollmentCodeResponse)),
    security(("bearer_auth" = []))
)]
pub async fn issue_enrollment_code(
    State(state): State<Arc<AppState>>,
    _auth: AuthUser,
    Path(client_id): Path<Uuid>,
    Json(request): Json<IssueEnrollmentCodeRequest>,
) -> ApiResult<(axum::http::StatusCode, Json<IssuedEnrollmentCodeResponse>)> {
    let (record, plaintext) = meshctl_store::tokens::issue_enrollment_code(
        &state.db,
        client_id,
        request.device_hint.as_deref(),
        request.expires_at,
        &state.token_pepper.0,
    )
    .await?;

    Ok((
        axum::http::StatusCode::CREATED,
        Json(IssuedEnrollmentCodeResponse {
            id: record.id,
            plaintext,
            expires_at: record.expires_at,
        }),
    ))
}

// ---- audit log ----

#[derive(Debug, Deserialize)]
pub struct AuditQuery {
    #[serde(default = "default_audit_limit")]
    pub limit: i64,
}

fn default_audit_limit() -> i64 {
    100
}

#[utoipa::path(
    get,
    path = "/v1/admin/audit-log",
    responses((status = 200, description = "Recent audit entries", body = [AuditEvent])),
    security(("bearer_auth" = []))
)]
pub async fn list_audit_log(
    State(state): State<Arc<AppState>>,
    _auth: AuthUser,
    Query(query): Query<AuditQuery>,
) -> ApiResult<Json<Vec<AuditEvent>>> {
    let rows = meshctl_store::tokens::list_audit_events(&state.db, query.limit).await?;

    let events = rows
        .into_iter()
        .map(|(id, event_kind, subject, detail, created_at)| AuditEvent {
            id,
            event_kind,
            subject,
            detail,
            created_at,
        })
        .collect();

    Ok(Json(events))
}
