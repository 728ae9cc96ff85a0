use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

/// Errors that can cross the request surface. Distinct from
/// `cacher_core::CacherError`/`cacher_ingest::IngestError`: those are
/// internal failure types, this is what callers actually see.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error(transparent)]
    Store(#[from] cacher_core::CacherError),

    #[error("DB is not ready")]
    NotReady,
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = match &self {
            ServiceError::NotReady => StatusCode::SERVICE_UNAVAILABLE,
            ServiceError::Store(_) => StatusCode::BAD_REQUEST,
        };
        let body = ErrorBody {
            error: self.to_string(),
        };
        (status, axum::Json(body)).into_response()
    }
}
