use thiserror::Error;

/// Errors produced by the in-memory store and its supporting types.
#[derive(Debug, Error)]
pub enum CacherError {
    #[error("unable to decode json: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("not a valid uuid for id: {0}")]
    InvalidId(String),

    #[error("failed to parse ip: {0}")]
    InvalidIp(String),

    #[error("failed to parse mac: {0}")]
    InvalidMac(String),

    #[error("DB is not ready")]
    NotReady,
}

pub type Result<T> = std::result::Result<T, CacherError>;
