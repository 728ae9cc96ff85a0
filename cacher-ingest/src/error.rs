use thiserror::Error;

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("failed to fetch page: {0}")]
    Fetch(#[from] reqwest::Error),

    #[error(transparent)]
    Store(#[from] cacher_core::CacherError),

    #[error("failed to decode upstream response: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("ingest cancelled by a concurrent failure")]
    Cancelled,
}
