use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProofError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Invalid key: {0}")]
    InvalidKey(String),
    #[error("Unknown key id: {0}")]
    UnknownKey(String),
    #[error("Unsupported algorithm: {0}")]
    UnsupportedAlgorithm(String),
    #[error("Invalid hash: {0}")]
    InvalidHash(String),
    #[error("Signing failed: {0}")]
    SigningFailed(String),
    #[error("Remote signer timed out after {0}s")]
    Timeout(u64),
    #[error("Remote signer error: {0}")]
    Remote(String),
}

pub type Result<T> = std::result::Result<T, ProofError>;
