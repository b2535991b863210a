use axum::{Json, http::StatusCode, response::IntoResponse};
use serde_json::json;
use thiserror::Error;

/// Typed rejections raised by the HTTP layer, turned into a JSON body by
/// [`IntoResponse`] below.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("quantity must be greater than zero")]
    ZeroQuantity,
    #[error("price is required for this order type")]
    MissingPrice,
    #[error("order rejected by the book")]
    Rejected,
    #[error("order {0} not found")]
    NotFound(u64),
    #[error("trader {0} does not own this order")]
    Unauthorized(u64),
}

impl EngineError {
    fn status(&self) -> StatusCode {
        match self {
            EngineError::ZeroQuantity | EngineError::MissingPrice | EngineError::Rejected => {
                StatusCode::BAD_REQUEST
            }
            EngineError::NotFound(_) => StatusCode::NOT_FOUND,
            EngineError::Unauthorized(_) => StatusCode::FORBIDDEN,
        }
    }
}

impl IntoResponse for EngineError {
    fn into_response(self) -> axum::response::Response {
        let status = self.status();
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}
