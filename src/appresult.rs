use axum::{http::StatusCode, response::{IntoResponse, Response}, Json};
use serde_json::json;
use tracing::error;

use crate::error::RoomError;

pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug)]
pub struct AppError(pub anyhow::Error);

fn status_of(err: &RoomError) -> StatusCode {
    match err {
        RoomError::Authentication(_) => StatusCode::UNAUTHORIZED,
        RoomError::Authorization(_) => StatusCode::FORBIDDEN,
        RoomError::NotFound(_) => StatusCode::NOT_FOUND,
        RoomError::InvalidState(_) => StatusCode::CONFLICT,
        RoomError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
        RoomError::DuplicateAction(_) => StatusCode::CONFLICT,
        RoomError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        RoomError::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        match self.0.downcast_ref::<RoomError>() {
            Some(err) => (
                status_of(err),
                Json(json!({ "kind": err.kind(), "message": err.to_string() })),
            )
                .into_response(),
            None => {
                error!("{:?}", self.0);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(json!({ "kind": "internal", "message": self.0.to_string() })),
                )
                    .into_response()
            }
        }
    }
}

impl<E> From<E> for AppError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        Self(err.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn room_errors_map_to_statuses() {
        let response = AppError::from(RoomError::NotFound("x".into())).into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let response = AppError::from(RoomError::Authentication("bad token".into())).into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let response = AppError::from(anyhow::anyhow!("boom")).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
