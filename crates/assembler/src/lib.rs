//! Config Assembler (C4): produces the per-client bundle — YAML config,
//! host certificate, and CA chain — from the current policy and cert
//! state, minting or reusing a certificate as needed (spec §4.4).

pub mod config;
pub mod error;

use chrono::{DateTime, Duration, Utc};
use sha2::{Digest, Sha256};
use sqlx::PgPool;
use uuid::Uuid;

pub use error::{Error, Result};

/// Tunables from spec §4.4/§4.5 defaults, threaded in by the caller (the
/// `server` crate's `AppState`, or a test harness) rather than hardcoded
/// here.
#[derive(Debug, Clone)]
pub struct AssemblerSettings {
    pub cert_validity: Duration,
    pub renew_before: Duration,
    pub lighthouse_port: u16,
    pub punchy: bool,
}

impl Default for AssemblerSettings {
    fn default() -> Self {
        Self {
            cert_validity: Duration::days(180),
            renew_before: Duration::days(90),
            lighthouse_port: 4242,
            punchy: true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AssembledBundle {
    pub config_yaml: String,
    pub client_cert_pem: String,
    pub ca_chain_pems: Vec<String>,
    pub cert_not_before: DateTime<Utc>,
    pub cert_not_after: DateTime<Utc>,
    pub is_lighthouse: bool,
    pub expected_private_key_path: String,
}

/// Stable hash over the sorted set of group names (spec's "Groups-hash"
/// glossary entry and §4.4 step 2), hex-encoded SHA-256.
pub fn groups_hash(group_names: &[String]) -> String {
    let mut sorted = group_names.to_vec();
    sorted.sort();
    let mut hasher = Sha256::new();
    for name in &sorted {
        hasher.update(name.as_bytes());
        hasher.update(b"\0");
    }
    hex::encode(hasher.finalize())
}

/// Assembles a bundle for `client_id` against the agent-supplied
/// `spki_der` public key. Follows spec §4.4 steps 1–6 in order.
pub async fn assemble(
    pool: &PgPool,
    client_id: Uuid,
    spki_der: Vec<u8>,
    settings: &AssemblerSettings,
    now: DateTime<Utc>,
) -> Result<AssembledBundle> {
    // Step 1: load client with relations, active signing CA, CA chain.
    let relations = meshctl_store::client_repo::get_client_with_relations(pool, client_id).await?;

    if relations.client.is_effectively_blocked() {
        return Err(Error::Forbidden);
    }

    let assignment = relations.primary_assignment.as_ref().ok_or(Error::Conflict)?;
    let ip_pool = relations.pool.as_ref().ok_or(Error::Conflict)?;
    let network = ip_pool
        .network()
        .map_err(|e| Error::Transient(format!("pool {} has an unparsable cidr: {e}", ip_pool.id)))?;

    let signing_ca = meshctl_store::ca_repo::get_signing_ca(pool)
        .await
        .map_err(|e| match e {
            meshctl_store::Error::ServiceUnavailable => Error::ServiceUnavailable,
            other => Error::Store(other),
        })?;

    // Step 2: groups-hash and ip_cidr.
    let group_names: Vec<String> = relations.groups.iter().map(|g| g.name.clone()).collect();
    let hash = groups_hash(&group_names);
    let ip_cidr = meshctl_ipam::with_prefix(network, assignment.ip_address);

    // Step 3: reuse or mint the client certificate.
    let cert = resolve_certificate(
        pool,
        client_id,
        &relations.client.name,
        &signing_ca,
        spki_der,
        assignment.ip_address,
        network.prefix_len(),
        &group_names,
        &ip_cidr,
        &hash,
        settings,
        now,
    )
    .await?;

    // Step 4: build the YAML config.
    let lighthouses = meshctl_store::client_repo::get_lighthouses_for_pool(pool, ip_pool.id).await?;
    let mut static_host_map = std::collections::BTreeMap::new();
    let mut lighthouse_hosts = Vec::new();
    for (lh_client, lh_assignment) in &lighthouses {
        if lh_client.id == client_id {
            continue; // a lighthouse advertises but does not target itself
        }
        let Some(public_ip) = lh_client.public_ip else {
            continue;
        };
        static_host_map.insert(
            lh_assignment.ip_address.to_string(),
            vec![format!("{public_ip}:{}", settings.lighthouse_port)],
        );
        lighthouse_hosts.push(lh_assignment.ip_address.to_string());
    }

    let yaml_config = config::NebulaConfig {
        pki: config::PkiSection::default(),
        static_host_map,
        lighthouse: config::LighthouseSection::new(relations.client.is_lighthouse, lighthouse_hosts),
        punchy: config::PunchySection::new(settings.punchy),
        firewall: config::build_firewall_section(&relations.rulesets),
        groups: {
            let mut g = group_names.clone();
            g.sort();
            g
        },
    };

    let config_yaml = serde_yaml::to_string(&yaml_config)?;

    // Step 5: CA chain, order-stable by CA id.
    let chain = meshctl_store::ca_repo::get_active_ca_chain(pool).await?;
    let ca_chain_pems = chain.into_iter().map(|ca| ca.public_cert_pem).collect();

    // Step 6: stamp delivery. `config_dirty_at` is intentionally left
    // untouched (spec §4.4 step 6) — the agent, not the server, decides
    // whether the delivered bundle changed anything on disk.
    meshctl_store::client_repo::stamp_delivered(pool, client_id).await?;

    Ok(AssembledBundle {
        config_yaml,
        client_cert_pem: cert.cert_pem,
        ca_chain_pems,
        cert_not_before: cert.not_before,
        cert_not_after: cert.not_after,
        is_lighthouse: relations.client.is_lighthouse,
        expected_private_key_path: config::PkiSection::default().key,
    })
}

#[allow(clippy::too_many_arguments)]
async fn resolve_certificate(
    pool: &PgPool,
    client_id: Uuid,
    common_name: &str,
    signing_ca: &meshctl_store::models::CertificateAuthority,
    spki_der: Vec<u8>,
    assigned_ip: std::net::IpAddr,
    prefix_len: u8,
    group_names: &[String],
    ip_cidr: &str,
    groups_hash: &str,
    settings: &AssemblerSettings,
    now: DateTime<Utc>,
) -> Result<meshctl_store::models::ClientCertificate> {
    if let Some(existing) = meshctl_store::cert_repo::find_reusable(
        pool,
        client_id,
        signing_ca.id,
        ip_cidr,
        groups_hash,
        now,
        settings.renew_before,
    )
    .await?
    {
        return Ok(existing);
    }

    // Mint fresh, retrying once on signer failure per spec §4.1/§5.
    let mut attempt = 0;
    let signed = loop {
        attempt += 1;
        let material = signing_ca.to_material();
        match meshctl_pki::sign_client_cert(
            &material,
            spki_der.clone(),
            common_name,
            assigned_ip,
            prefix_len,
            group_names,
            now,
            now + settings.cert_validity,
        ) {
            Ok(signed) => break signed,
            Err(err) if attempt < 2 => {
                tracing::warn!(%err, client = common_name, "signer failed, retrying once");
                continue;
            }
            Err(err) => return Err(Error::Transient(err.to_string())),
        }
    };

    let fingerprint = meshctl_pki::fingerprint(&signed.cert_pem)?;

    let inserted = meshctl_store::cert_repo::insert_if_still_current(
        pool,
        client_id,
        signing_ca.id,
        &fingerprint,
        &signed.cert_pem,
        signed.not_before,
        signed.not_after,
        ip_cidr,
        groups_hash,
    )
    .await?;

    Ok(inserted)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn groups_hash_is_order_independent() {
        let a = groups_hash(&["env:prod".to_string(), "role:api".to_string()]);
        let b = groups_hash(&["role:api".to_string(), "env:prod".to_string()]);
        assert_eq!(a, b);
    }

    #[test]
    fn groups_hash_distinguishes_membership() {
        let a = groups_hash(&["env:prod".to_string()]);
        let b = groups_hash(&["env:staging".to_string()]);
        assert_ne!(a, b);
    }

    #[test]
    fn empty_groups_hash_is_stable() {
        let a = groups_hash(&[]);
        let b = groups_hash(&[]);
        assert_eq!(a, b);
    }
}
