use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};

use crate::error::{Error, Result};

/// The cryptographic material for a certificate authority, independent of
/// any lifecycle state (`is_current`/`is_previous`/`include_in_chain`) —
/// those are policy-store concerns, not crypto-engine concerns.
#[derive(Debug, Clone)]
pub struct CaMaterial {
    pub name: String,
    pub public_cert_pem: String,
    /// Absent when this CA was imported without its private key (a CA whose
    /// signing material lives elsewhere and which this deployment only
    /// trusts, never signs with).
    pub private_key_pem: Option<String>,
    pub not_before: DateTime<Utc>,
    pub not_after: DateTime<Utc>,
    pub fingerprint_sha256: String,
}

/// Generates a new self-signed CA with the given validity window.
///
/// Mirrors `claudefs_transport::tls::generate_self_signed_ca`, generalized
/// to caller-supplied validity instead of a hardcoded window.
pub fn create_ca(
    name: &str,
    not_before: DateTime<Utc>,
    not_after: DateTime<Utc>,
) -> Result<CaMaterial> {
    let key_pair = rcgen::KeyPair::generate()
        .map_err(|e| Error::KeyParseFailure(format!("failed to generate CA key: {e}")))?;

    let mut params = rcgen::CertificateParams::default();
    params.is_ca = rcgen::IsCa::Ca(rcgen::BasicConstraints::Unconstrained);
    params.distinguished_name.push(rcgen::DnType::CommonName, name);
    params.not_before = to_offset_date_time(not_before)?;
    params.not_after = to_offset_date_time(not_after)?;

    let cert = params
        .self_signed(&key_pair)
        .map_err(|e| Error::SignerUnavailable(format!("failed to self-sign CA: {e}")))?;

    let public_cert_pem = cert.pem();
    let private_key_pem = key_pair.serialize_pem();
    let fingerprint_sha256 = fingerprint_der(cert.der());

    tracing::info!(ca = name, %fingerprint_sha256, "created CA");

    Ok(CaMaterial {
        name: name.to_string(),
        public_cert_pem,
        private_key_pem: Some(private_key_pem),
        not_before,
        not_after,
        fingerprint_sha256,
    })
}

/// Imports an externally generated CA certificate, optionally with its
/// private key. Validity bounds and fingerprint are derived from the
/// certificate itself via `x509-parser`, never trusted from the caller.
pub fn import_ca(
    name: &str,
    public_cert_pem: &str,
    private_key_pem: Option<&str>,
) -> Result<CaMaterial> {
    // Round-trip through rcgen to confirm the PEM is a well-formed CA cert
    // before we accept it; this also validates a supplied key actually
    // matches the certificate when both are given.
    let params = rcgen::CertificateParams::from_ca_cert_pem(public_cert_pem)
        .map_err(|e| Error::KeyParseFailure(format!("invalid CA certificate PEM: {e}")))?;

    if let Some(key_pem) = private_key_pem {
        let key_pair = rcgen::KeyPair::from_pem(key_pem)
            .map_err(|e| Error::KeyParseFailure(format!("invalid CA private key PEM: {e}")))?;
        params
            .clone()
            .self_signed(&key_pair)
            .map_err(|e| Error::KeyParseFailure(format!("private key does not match CA cert: {e}")))?;
    }

    let (_, pem_block) = x509_parser::pem::parse_x509_pem(public_cert_pem.as_bytes())
        .map_err(|e| Error::KeyParseFailure(format!("failed to parse CA PEM block: {e}")))?;
    let x509 = pem_block
        .parse_x509()
        .map_err(|e| Error::KeyParseFailure(format!("failed to parse CA x509: {e}")))?;

    let not_before = asn1_time_to_chrono(x509.validity().not_before.to_datetime())?;
    let not_after = asn1_time_to_chrono(x509.validity().not_after.to_datetime())?;
    let fingerprint_sha256 = fingerprint_der(pem_block.contents.as_slice());

    tracing::info!(ca = name, %fingerprint_sha256, has_key = private_key_pem.is_some(), "imported CA");

    Ok(CaMaterial {
        name: name.to_string(),
        public_cert_pem: public_cert_pem.to_string(),
        private_key_pem: private_key_pem.map(str::to_string),
        not_before,
        not_after,
        fingerprint_sha256,
    })
}

/// SHA-256 fingerprint over the DER-encoded certificate, hex-encoded.
pub fn fingerprint(cert_pem: &str) -> Result<String> {
    let (_, pem_block) = x509_parser::pem::parse_x509_pem(cert_pem.as_bytes())
        .map_err(|e| Error::KeyParseFailure(format!("failed to parse certificate PEM: {e}")))?;
    Ok(fingerprint_der(pem_block.contents.as_slice()))
}

fn fingerprint_der(der: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(der);
    hex::encode(hasher.finalize())
}

/// Verifies that `leaf_pem` chains to one of `chain_pems` (direct issuer
/// match by signature, not full path building — the mesh only ever has a
/// one-level CA hierarchy, never intermediates).
pub fn verify_chain(leaf_pem: &str, chain_pems: &[String]) -> Result<()> {
    let (_, leaf_block) = x509_parser::pem::parse_x509_pem(leaf_pem.as_bytes())
        .map_err(|e| Error::KeyParseFailure(format!("failed to parse leaf certificate: {e}")))?;
    let leaf = leaf_block
        .parse_x509()
        .map_err(|e| Error::KeyParseFailure(format!("failed to parse leaf x509: {e}")))?;

    for ca_pem in chain_pems {
        let (_, ca_block) = match x509_parser::pem::parse_x509_pem(ca_pem.as_bytes()) {
            Ok(v) => v,
            Err(_) => continue,
        };
        let ca_cert = match ca_block.parse_x509() {
            Ok(v) => v,
            Err(_) => continue,
        };

        if leaf.issuer() == ca_cert.subject() && leaf.verify_signature(Some(ca_cert.public_key())).is_ok() {
            return Ok(());
        }
    }

    Err(Error::ChainVerificationFailed(
        "no CA in the supplied chain issued this certificate".to_string(),
    ))
}

/// Reconstructs the `rcgen` certificate + key pair needed to sign new
/// leaves, from stored PEM. Only callable for a CA with `can_sign=true`
/// (enforced by the `store` crate before invoking this).
pub fn load_signing_ca(material: &CaMaterial) -> Result<(rcgen::Certificate, rcgen::KeyPair)> {
    let key_pem = material
        .private_key_pem
        .as_deref()
        .ok_or_else(|| Error::InvalidCaState("CA has no private key available to sign with".into()))?;

    let key_pair = rcgen::KeyPair::from_pem(key_pem)
        .map_err(|e| Error::KeyParseFailure(format!("failed to parse CA private key: {e}")))?;

    let params = rcgen::CertificateParams::from_ca_cert_pem(&material.public_cert_pem)
        .map_err(|e| Error::KeyParseFailure(format!("failed to parse CA certificate: {e}")))?;

    let cert = params
        .self_signed(&key_pair)
        .map_err(|e| Error::SignerUnavailable(format!("failed to reconstruct CA certificate: {e}")))?;

    Ok((cert, key_pair))
}

fn to_offset_date_time(dt: DateTime<Utc>) -> Result<time::OffsetDateTime> {
    time::OffsetDateTime::from_unix_timestamp(dt.timestamp())
        .map_err(|e| Error::KeyParseFailure(format!("invalid timestamp: {e}")))
}

fn asn1_time_to_chrono(t: time::OffsetDateTime) -> Result<DateTime<Utc>> {
    DateTime::<Utc>::from_timestamp(t.unix_timestamp(), 0)
        .ok_or_else(|| Error::KeyParseFailure("certificate timestamp out of range".into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn create_ca_round_trips_through_fingerprint() {
        let now = Utc::now();
        let ca = create_ca("mesh-root", now, now + Duration::days(540)).unwrap();
        assert!(ca.public_cert_pem.contains("BEGIN CERTIFICATE"));
        assert!(ca.private_key_pem.unwrap().contains("BEGIN PRIVATE KEY"));
        assert_eq!(fingerprint(&ca.public_cert_pem).unwrap(), ca.fingerprint_sha256);
    }

    #[test]
    fn import_without_key_yields_no_signing_material() {
        let now = Utc::now();
        let ca = create_ca("mesh-root", now, now + Duration::days(540)).unwrap();
        let imported = import_ca("mesh-root", &ca.public_cert_pem, None).unwrap();
        assert!(imported.private_key_pem.is_none());
        assert_eq!(imported.fingerprint_sha256, ca.fingerprint_sha256);
    }

    #[test]
    fn import_rejects_mismatched_key() {
        let now = Utc::now();
        let ca_a = create_ca("ca-a", now, now + Duration::days(30)).unwrap();
        let ca_b = create_ca("ca-b", now, now + Duration::days(30)).unwrap();
        let result = import_ca("ca-a", &ca_a.public_cert_pem, ca_b.private_key_pem.as_deref());
        assert!(result.is_err());
    }
}
