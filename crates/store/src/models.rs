use chrono::{DateTime, Utc};
use ipnet::IpNet;
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use utoipa::ToSchema;
use uuid::Uuid;

#[derive(Debug, Clone, sqlx::FromRow, Serialize, ToSchema)]
pub struct CertificateAuthority {
    pub id: Uuid,
    pub name: String,
    pub not_before: DateTime<Utc>,
    pub not_after: DateTime<Utc>,
    pub public_cert_pem: String,
    #[serde(skip_serializing)]
    #[schema(write_only)]
    pub private_key_pem: Option<String>,
    pub fingerprint_sha256: String,
    pub can_sign: bool,
    pub include_in_chain: bool,
    pub is_current: bool,
    pub is_previous: bool,
    pub demoted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl CertificateAuthority {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.not_after <= now
    }

    pub fn to_material(&self) -> meshctl_pki::CaMaterial {
        meshctl_pki::CaMaterial {
            name: self.name.clone(),
            public_cert_pem: self.public_cert_pem.clone(),
            private_key_pem: self.private_key_pem.clone(),
            not_before: self.not_before,
            not_after: self.not_after,
            fingerprint_sha256: self.fingerprint_sha256.clone(),
        }
    }
}

#[derive(Debug, Clone, sqlx::FromRow, Serialize, ToSchema)]
pub struct Client {
    pub id: Uuid,
    pub name: String,
    pub owner: String,
    pub is_lighthouse: bool,
    #[schema(value_type = Option<String>)]
    pub public_ip: Option<IpAddr>,
    pub is_blocked: bool,
    pub notes: Option<String>,
    pub config_dirty_at: DateTime<Utc>,
    pub last_delivered_at: Option<DateTime<Utc>>,
    pub reported_client_version: Option<String>,
    pub reported_nebula_version: Option<String>,
    pub archived_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Client {
    /// An archived client is treated as blocked for distribution purposes
    /// (spec §4.3 supplement) without losing its policy/IP/cert rows.
    pub fn is_effectively_blocked(&self) -> bool {
        self.is_blocked || self.archived_at.is_some()
    }
}

#[derive(Debug, Clone, sqlx::FromRow, Serialize, ToSchema)]
pub struct Group {
    pub id: Uuid,
    pub name: String,
    pub parent_id: Option<Uuid>,
    pub owner: String,
}

impl Group {
    /// Returns the implied parent path of a colon-separated group name, if
    /// any (`"a:b:c"` implies parent `"a:b"`).
    pub fn parent_path(name: &str) -> Option<&str> {
        name.rsplit_once(':').map(|(parent, _)| parent)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "lowercase")]
pub enum Direction {
    Inbound,
    Outbound,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "lowercase")]
pub enum Proto {
    Tcp,
    Udp,
    Icmp,
    Any,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Selector {
    Host(String),
    Cidr(String),
    Groups(Vec<String>),
    CaName(String),
    CaSha(String),
}

impl Selector {
    pub fn kind(&self) -> &'static str {
        match self {
            Selector::Host(_) => "host",
            Selector::Cidr(_) => "cidr",
            Selector::Groups(_) => "groups",
            Selector::CaName(_) => "ca_name",
            Selector::CaSha(_) => "ca_sha",
        }
    }

    pub fn value_string(&self) -> String {
        match self {
            Selector::Host(v) | Selector::Cidr(v) | Selector::CaName(v) | Selector::CaSha(v) => {
                v.clone()
            }
            Selector::Groups(groups) => groups.join(","),
        }
    }

    pub fn from_kind_value(kind: &str, value: &str) -> Option<Self> {
        match kind {
            "host" => Some(Selector::Host(value.to_string())),
            "cidr" => Some(Selector::Cidr(value.to_string())),
            "groups" => Some(Selector::Groups(
                value.split(',').map(str::to_string).collect(),
            )),
            "ca_name" => Some(Selector::CaName(value.to_string())),
            "ca_sha" => Some(Selector::CaSha(value.to_string())),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct FirewallRule {
    pub id: Uuid,
    pub ruleset_id: Uuid,
    pub position: i32,
    #[schema(value_type = String)]
    pub direction: Direction,
    pub port: String,
    #[schema(value_type = String)]
    pub proto: Proto,
    #[schema(value_type = Object)]
    pub selector: Selector,
}

#[derive(Debug, Clone, sqlx::FromRow, Serialize, ToSchema)]
pub struct FirewallRuleset {
    pub id: Uuid,
    pub name: String,
    pub owner: String,
}

#[derive(Debug, Clone, sqlx::FromRow, Serialize, ToSchema)]
pub struct IpPool {
    pub id: Uuid,
    pub cidr: String,
    pub description: String,
}

impl IpPool {
    /// Parses the stored CIDR text. Only fails for rows written outside the
    /// repository layer, since [`crate::ip_repo::create_pool`] validates the
    /// network before it is ever persisted.
    pub fn network(&self) -> Result<IpNet, ipnet::AddrParseError> {
        self.cidr.parse()
    }
}

#[derive(Debug, Clone, sqlx::FromRow, Serialize, ToSchema)]
pub struct IpGroup {
    pub id: Uuid,
    pub pool_id: Uuid,
    pub name: String,
    #[schema(value_type = String)]
    pub start_ip: IpAddr,
    #[schema(value_type = String)]
    pub end_ip: IpAddr,
}

#[derive(Debug, Clone, sqlx::FromRow, Serialize, ToSchema)]
pub struct IpAssignment {
    pub id: Uuid,
    pub client_id: Uuid,
    pub pool_id: Uuid,
    pub ip_group_id: Option<Uuid>,
    #[schema(value_type = String)]
    pub ip_address: IpAddr,
    pub is_primary: bool,
}

#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct ClientCertificate {
    pub id: Uuid,
    pub client_id: Uuid,
    pub issuing_ca_id: Uuid,
    pub fingerprint_sha256: String,
    pub cert_pem: String,
    pub not_before: DateTime<Utc>,
    pub not_after: DateTime<Utc>,
    pub issued_for_ip_cidr: String,
    pub issued_for_groups_hash: String,
    pub revoked: bool,
    pub revoked_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct ClientToken {
    pub id: Uuid,
    pub client_id: Uuid,
    #[serde(skip_serializing)]
    pub token_hash: String,
    pub token_prefix: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct EnrollmentCode {
    pub id: Uuid,
    pub client_id: Uuid,
    #[serde(skip_serializing)]
    pub code_hash: String,
    pub device_hint: Option<String>,
    pub expires_at: DateTime<Utc>,
    pub used_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// A client with the relations C4 needs to assemble a bundle, loaded in one
/// repeatable-read snapshot (spec §5 "reads in C4 use a single repeatable
/// snapshot").
#[derive(Debug, Clone)]
pub struct ClientWithRelations {
    pub client: Client,
    pub groups: Vec<Group>,
    pub rulesets: Vec<(FirewallRuleset, Vec<FirewallRule>)>,
    pub primary_assignment: Option<IpAssignment>,
    pub pool: Option<IpPool>,
}
