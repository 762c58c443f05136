/// Error taxonomy for all asymmetric-crypto operations.
///
/// A parse failure is fatal to the calling operation and leaves no state
/// changed. A `SignerUnavailable` does not imply the CA itself is bad; the
/// caller decides whether to retry (the `store` crate retries once before
/// surfacing `Transient` to its own callers).
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("failed to parse key material: {0}")]
    KeyParseFailure(String),

    #[error("signer invocation failed: {0}")]
    SignerUnavailable(String),

    #[error("CA is not in a state that permits this operation: {0}")]
    InvalidCaState(String),

    #[error("certificate chain verification failed: {0}")]
    ChainVerificationFailed(String),
}

pub type Result<T> = std::result::Result<T, Error>;
