use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use tracing::error;

use confab_types::error::Error;

/// Engine errors rendered as HTTP: status code plus a small tagged body.
pub struct ApiError(pub Error);

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::Forbidden(_) => StatusCode::FORBIDDEN,
            Error::Validation(_) => StatusCode::BAD_REQUEST,
            Error::Conflict(_) => StatusCode::CONFLICT,
            Error::Internal(e) => {
                error!("Internal error: {:#}", e);
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        let message = match &self.0 {
            // never leak internals
            Error::Internal(_) => "internal error".to_string(),
            other => other.to_string(),
        };
        let body = Json(serde_json::json!({
            "error": self.0.tag(),
            "message": message,
        }));
        (status, body).into_response()
    }
}

/// Run blocking engine/store work off the async runtime.
pub async fn blocking<T, F>(f: F) -> Result<T, ApiError>
where
    F: FnOnce() -> Result<T, Error> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| {
            error!("spawn_blocking join error: {}", e);
            ApiError(Error::Internal(anyhow::anyhow!("task join error")))
        })?
        .map_err(ApiError)
}
