use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;
use tracing::error;

use orbit_db::StoreError;
use orbit_gateway::AuthError;
use orbit_types::api::ErrorBody;

pub type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error("{0}")]
    BadRequest(String),
    #[error("missing or invalid credential")]
    Unauthorized,
    #[error("{0}")]
    Forbidden(String),
    #[error("background task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
    #[error("password hashing failed: {0}")]
    Hash(String),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            Self::Store(e) => store_status(e),
            Self::Auth(AuthError::InvalidCredential) | Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::Auth(AuthError::AccountLocked) | Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::Auth(AuthError::Store(e)) => store_status(e),
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Auth(_) | Self::Join(_) | Self::Hash(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

fn store_status(e: &StoreError) -> StatusCode {
    match e {
        StoreError::NotFound(_) => StatusCode::NOT_FOUND,
        StoreError::Invalid(_) => StatusCode::BAD_REQUEST,
        StoreError::Conflict(_) => StatusCode::CONFLICT,
        StoreError::Forbidden(_) => StatusCode::FORBIDDEN,
        StoreError::Sqlite(_) | StoreError::LockPoisoned => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = if status == StatusCode::INTERNAL_SERVER_ERROR {
            error!("Request failed: {}", self);
            "internal server error".to_string()
        } else {
            self.to_string()
        };
        (status, Json(ErrorBody { message })).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_errors_map_to_http_status() {
        let cases = [
            (StoreError::NotFound("post".into()), StatusCode::NOT_FOUND),
            (StoreError::Invalid("empty".into()), StatusCode::BAD_REQUEST),
            (StoreError::Conflict("dup".into()), StatusCode::CONFLICT),
            (StoreError::Forbidden("admin".into()), StatusCode::FORBIDDEN),
            (StoreError::LockPoisoned, StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (err, status) in cases {
            assert_eq!(ApiError::from(err).status(), status);
        }
    }

    #[test]
    fn auth_errors_map_to_401_and_403() {
        assert_eq!(ApiError::from(AuthError::InvalidCredential).status(), StatusCode::UNAUTHORIZED);
        assert_eq!(ApiError::from(AuthError::AccountLocked).status(), StatusCode::FORBIDDEN);
        assert_eq!(
            ApiError::from(AuthError::Store(StoreError::NotFound("user".into()))).status(),
            StatusCode::NOT_FOUND
        );
    }
}
