/// Error taxonomy shared by every policy-store operation, matching spec §7.
///
/// The `server` crate maps each variant to an `ApiError` constructor; this
/// crate never knows about HTTP status codes.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("no signing CA is configured")]
    ServiceUnavailable,

    #[error("transient failure, caller may retry: {0}")]
    Transient(String),

    #[error(transparent)]
    Database(#[from] sqlx::Error),

    #[error(transparent)]
    Pki(#[from] meshctl_pki::Error),

    #[error(transparent)]
    Ipam(#[from] meshctl_ipam::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
