/// Failure semantics for bundle assembly, matching spec §4.4 verbatim: a
/// missing signing CA is `ServiceUnavailable`, a blocked client is
/// `Forbidden`, a client with no primary IP is `Conflict`, and a cert-mint
/// failure that survives one inline retry is `Transient`.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("client is blocked")]
    Forbidden,

    #[error("client has no primary IP assignment")]
    Conflict,

    #[error("no signing CA is configured")]
    ServiceUnavailable,

    #[error("transient failure assembling bundle, caller may retry: {0}")]
    Transient(String),

    #[error(transparent)]
    Store(#[from] meshctl_store::Error),

    #[error("failed to serialize config: {0}")]
    Serialize(#[from] serde_yaml::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl From<meshctl_pki::Error> for Error {
    fn from(err: meshctl_pki::Error) -> Self {
        Error::Transient(err.to_string())
    }
}

impl From<meshctl_ipam::Error> for Error {
    fn from(err: meshctl_ipam::Error) -> Self {
        Error::Transient(err.to_string())
    }
}
