//! Cert Engine: all asymmetric-crypto operations for the mesh control plane.
//!
//! This crate owns key-material parsing, CA self-signing/import, client
//! leaf-certificate signing against a caller-supplied public key, and
//! fingerprint/chain-verification helpers. It holds no policy state (CA
//! activation, client lifecycle) — that lives in `meshctl-store`.

pub mod ca;
pub mod error;
pub mod sign;

pub use ca::{create_ca, fingerprint, import_ca, load_signing_ca, verify_chain, CaMaterial};
pub use error::{Error, Result};
pub use sign::{sign_client_cert, ClientPublicKey, SignedCert};
