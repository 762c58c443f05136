#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Store(#[from] meshctl_store::Error),

    #[error(transparent)]
    Pki(#[from] meshctl_pki::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
