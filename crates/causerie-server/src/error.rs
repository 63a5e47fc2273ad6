use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

use causerie_shared::EngineError;
use causerie_store::StoreError;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error("Storage error: {0}")]
    Store(#[from] StoreError),

    #[error("Missing or invalid actor header")]
    Unauthenticated,

    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ServerError {
    fn status(&self) -> StatusCode {
        match self {
            ServerError::Engine(e) => match e {
                EngineError::Forbidden(_) | EngineError::NotAMember => StatusCode::FORBIDDEN,
                EngineError::NotFound(_) => StatusCode::NOT_FOUND,
                EngineError::InvalidReference(_) => StatusCode::UNPROCESSABLE_ENTITY,
                EngineError::Invalid(_) => StatusCode::BAD_REQUEST,
                EngineError::Conflict(_) => StatusCode::CONFLICT,
            },
            ServerError::Unauthenticated => StatusCode::UNAUTHORIZED,
            ServerError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ServerError::Store(_) | ServerError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match &self {
            ServerError::Store(e) => {
                tracing::error!(error = %e, "Storage failure");
                "Storage error".to_string()
            }
            ServerError::Internal(e) => {
                tracing::error!(error = %e, "Internal failure");
                "Internal server error".to_string()
            }
            other => other.to_string(),
        };

        let body = serde_json::json!({
            "error": message,
        });

        (status, axum::Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn engine_errors_map_to_statuses() {
        let cases = [
            (EngineError::forbidden("x"), StatusCode::FORBIDDEN),
            (EngineError::NotAMember, StatusCode::FORBIDDEN),
            (EngineError::not_found("x"), StatusCode::NOT_FOUND),
            (EngineError::invalid_reference("x"), StatusCode::UNPROCESSABLE_ENTITY),
            (EngineError::invalid("x"), StatusCode::BAD_REQUEST),
            (EngineError::Conflict("x".into()), StatusCode::CONFLICT),
        ];
        for (error, status) in cases {
            assert_eq!(ServerError::from(error).into_response().status(), status);
        }
    }

    #[test]
    fn internal_details_are_hidden() {
        let response = ServerError::Internal("secret".into()).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
