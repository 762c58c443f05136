//! Wire DTOs for every route this crate exposes: the agent distribution
//! protocol (§6.1), the leak-scanner webhook (§6.2), enrollment (§4.7), and
//! the admin-intent surface (§6.4).

use std::net::IpAddr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

#[derive(Debug, Serialize, ToSchema)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub timestamp: String,
}

// ---- §6.1 agent distribution protocol ----

#[derive(Debug, Deserialize, ToSchema)]
pub struct ClientConfigRequest {
    pub token: String,
    /// PEM-encoded SubjectPublicKeyInfo for the node's local keypair.
    pub public_key: String,
    pub client_version: Option<String>,
    pub nebula_version: Option<String>,
}

/// The three artifacts the agent writes atomically to disk, plus enough
/// metadata to restart the local dataplane only when they actually changed.
/// The agent, not this server, owns the private key and the on-disk paths;
/// `key_path` only echoes where the agent told us its keypair lives.
#[derive(Debug, Serialize, ToSchema)]
pub struct ClientConfigResponse {
    pub config: String,
    pub client_cert_pem: String,
    pub ca_chain_pems: Vec<String>,
    pub cert_not_before: DateTime<Utc>,
    pub cert_not_after: DateTime<Utc>,
    pub lighthouse: bool,
    pub key_path: String,
}

// ---- §6.2 leak-scanner integration ----

#[derive(Debug, Serialize, ToSchema)]
pub struct SecretScanningPattern {
    #[serde(rename = "type")]
    pub kind: String,
    pub pattern: String,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct SecretScanningItem {
    #[serde(rename = "type")]
    pub kind: String,
    pub token: String,
    pub url: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct SecretScanningVerifyResult {
    pub token_prefix: String,
    pub active: bool,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct SecretScanningRevokeResult {
    pub revoked_count: u64,
}

// ---- §4.7 enrollment ----

#[derive(Debug, Deserialize, ToSchema)]
pub struct EnrollRequest {
    pub code: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct EnrollResponse {
    pub client_id: Uuid,
    pub token: String,
}

// ---- §6.4 admin-intent surface ----

#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateClientRequest {
    pub name: String,
    pub owner: String,
    pub is_lighthouse: bool,
    #[schema(value_type = Option<String>)]
    pub public_ip: Option<IpAddr>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct SetBlockedRequest {
    pub is_blocked: bool,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct SetNotesRequest {
    pub notes: Option<String>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct SetLighthousePublicIpRequest {
    #[schema(value_type = String)]
    pub public_ip: IpAddr,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct GroupMembershipRequest {
    pub group_id: Uuid,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct RulesetAssignmentRequest {
    pub ruleset_id: Uuid,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateGroupRequest {
    pub name: String,
    pub owner: String,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct RenameGroupRequest {
    pub name: String,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateRulesetRequest {
    pub name: String,
    pub owner: String,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct PutRuleRequest {
    pub position: i32,
    #[schema(value_type = String)]
    pub direction: meshctl_store::models::Direction,
    pub port: String,
    #[schema(value_type = String)]
    pub proto: meshctl_store::models::Proto,
    #[schema(value_type = Object)]
    pub selector: meshctl_store::models::Selector,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateIpPoolRequest {
    pub cidr: String,
    pub description: String,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateIpGroupRequest {
    pub name: String,
    #[schema(value_type = String)]
    pub start_ip: IpAddr,
    #[schema(value_type = String)]
    pub end_ip: IpAddr,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct AllocateIpRequest {
    pub client_id: Uuid,
    pub pool_id: Uuid,
    pub ip_group_id: Option<Uuid>,
    #[schema(value_type = Option<String>)]
    pub requested_ip: Option<IpAddr>,
    pub is_primary: bool,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateCaRequest {
    pub name: String,
    pub not_before: DateTime<Utc>,
    pub not_after: DateTime<Utc>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct ImportCaRequest {
    pub name: String,
    pub public_cert_pem: String,
    pub private_key_pem: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct IssuedTokenResponse {
    pub id: Uuid,
    pub token_prefix: String,
    /// Returned exactly once, at issuance.
    pub plaintext: String,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct IssueEnrollmentCodeRequest {
    pub device_hint: Option<String>,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct IssuedEnrollmentCodeResponse {
    pub id: Uuid,
    pub plaintext: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct AuditEvent {
    pub id: Uuid,
    pub event_kind: String,
    pub subject: String,
    pub detail: serde_json::Value,
    pub created_at: DateTime<Utc>,
}
