use std::net::IpAddr;

use chrono::{DateTime, Utc};

use crate::ca::CaMaterial;
use crate::error::{Error, Result};

/// Private-enterprise OID under which the sorted group-name list is
/// embedded as a custom extension (DER OCTET STRING of UTF-8 JSON). Lets an
/// agent or auditor recover group membership from the cert alone without a
/// side channel back to the policy store.
const GROUPS_EXTENSION_OID: &[u64] = &[1, 3, 6, 1, 4, 1, 61166, 1, 1];

/// Wraps a caller-supplied SubjectPublicKeyInfo so `rcgen` can sign a
/// certificate binding it without ever touching (or requiring) the
/// matching private key.
pub struct ClientPublicKey {
    spki_der: Vec<u8>,
    algorithm: &'static rcgen::SignatureAlgorithm,
}

impl ClientPublicKey {
    pub fn from_spki_der(spki_der: Vec<u8>) -> Result<Self> {
        let algorithm = rcgen::SignatureAlgorithm::from_subject_public_key_info(&spki_der)
            .map_err(|e| Error::KeyParseFailure(format!("unsupported public key: {e}")))?;
        Ok(Self { spki_der, algorithm })
    }
}

impl rcgen::PublicKeyData for ClientPublicKey {
    fn der_bytes(&self) -> &[u8] {
        &self.spki_der
    }

    fn algorithm(&self) -> &rcgen::SignatureAlgorithm {
        self.algorithm
    }
}

/// Result of a successful signing operation.
pub struct SignedCert {
    pub cert_pem: String,
    pub not_before: DateTime<Utc>,
    pub not_after: DateTime<Utc>,
}

/// Mints a leaf certificate binding `common_name` (the client's stable
/// name), `assigned_ip` with its overlay prefix length, and the sorted
/// `group_names`, signed by `signing_ca`.
///
/// The caller (the `store`/`assembler` crates) is responsible for the
/// idempotent-reuse decision described in spec §4.1 — this function always
/// mints a fresh certificate when called.
pub fn sign_client_cert(
    signing_ca: &CaMaterial,
    spki_der: Vec<u8>,
    common_name: &str,
    assigned_ip: IpAddr,
    ip_prefix_len: u8,
    group_names: &[String],
    not_before: DateTime<Utc>,
    not_after: DateTime<Utc>,
) -> Result<SignedCert> {
    let (ca_cert, ca_key) = crate::ca::load_signing_ca(signing_ca)?;

    let public_key = ClientPublicKey::from_spki_der(spki_der)?;

    let mut sorted_groups = group_names.to_vec();
    sorted_groups.sort();
    let groups_json = serde_json::to_vec(&sorted_groups)
        .map_err(|e| Error::KeyParseFailure(format!("failed to encode group list: {e}")))?;

    let mut params = rcgen::CertificateParams::default();
    params
        .distinguished_name
        .push(rcgen::DnType::CommonName, common_name);
    params.subject_alt_names = vec![rcgen::SanType::IpAddress(assigned_ip)];
    params.not_before = to_offset_date_time(not_before)?;
    params.not_after = to_offset_date_time(not_after)?;
    params.is_ca = rcgen::IsCa::ExplicitNoCa;
    params
        .custom_extensions
        .push(rcgen::CustomExtension::from_oid_content(
            GROUPS_EXTENSION_OID,
            groups_json,
        ));
    // `ip_prefix_len` is carried alongside the SAN in the config bundle
    // rather than in the certificate itself (nothing in X.509 encodes a
    // prefix length on an IP SAN); recorded here only to document why the
    // parameter exists on this signature.
    let _ = ip_prefix_len;

    let cert = params
        .signed_by(&public_key, &ca_cert, &ca_key)
        .map_err(|e| Error::SignerUnavailable(format!("failed to sign client certificate: {e}")))?;

    tracing::info!(
        common_name,
        ca = signing_ca.name,
        groups = sorted_groups.len(),
        "signed client certificate"
    );

    Ok(SignedCert {
        cert_pem: cert.pem(),
        not_before,
        not_after,
    })
}

fn to_offset_date_time(dt: DateTime<Utc>) -> Result<time::OffsetDateTime> {
    time::OffsetDateTime::from_unix_timestamp(dt.timestamp())
        .map_err(|e| Error::KeyParseFailure(format!("invalid timestamp: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ca::create_ca;
    use chrono::Duration;

    fn test_spki() -> Vec<u8> {
        // A throwaway ed25519 key pair's public SPKI, generated purely to
        // exercise the signing path in tests.
        let kp = rcgen::KeyPair::generate().unwrap();
        kp.public_key_der()
    }

    #[test]
    fn sign_binds_common_name_ip_and_groups() {
        let now = Utc::now();
        let ca = create_ca("ca-a", now, now + Duration::days(540)).unwrap();

        let signed = sign_client_cert(
            &ca,
            test_spki(),
            "node-1",
            "10.100.0.1".parse().unwrap(),
            16,
            &["env:prod".to_string(), "role:api".to_string()],
            now,
            now + Duration::days(180),
        )
        .unwrap();

        assert!(signed.cert_pem.contains("BEGIN CERTIFICATE"));
    }

    #[test]
    fn sign_fails_without_ca_private_key() {
        let now = Utc::now();
        let ca = create_ca("ca-a", now, now + Duration::days(540)).unwrap();
        let imported = crate::ca::import_ca("ca-a", &ca.public_cert_pem, None).unwrap();

        let result = sign_client_cert(
            &imported,
            test_spki(),
            "node-1",
            "10.100.0.1".parse().unwrap(),
            16,
            &[],
            now,
            now + Duration::days(180),
        );
        assert!(result.is_err());
    }
}
