use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

use crate::response::{ApiResponse, Meta};

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Not Found")]
    NotFound,

    #[error("Bad Request {0}")]
    BadRequest(String),

    #[error("Forbidden")]
    Forbidden,

    /// Checkout found no cart rows for the user. No mutation occurred.
    #[error("Cart is empty")]
    EmptyCart,

    /// A cart line asked for more units than the product has. No mutation
    /// occurred, whether this was found at validation or when the conditional
    /// stock decrement lost to a concurrent order.
    #[error("Insufficient stock for product {0}")]
    InsufficientStock(Uuid),

    /// A storage failure interrupted the transactional phase of checkout.
    /// The transaction was rolled back before this surfaced, so the whole
    /// operation is safe to retry.
    #[error("Order could not be persisted")]
    OrderPersistenceFailed,

    /// The snapshot read or transaction begin failed before any domain logic
    /// ran.
    #[error("Storage unavailable")]
    StorageUnavailable,

    #[error("Database error")]
    DbError(#[from] sqlx::Error),

    #[error("ORM error")]
    OrmError(#[from] sea_orm::DbErr),

    #[error("Internal Server Error")]
    Internal(#[from] anyhow::Error),
}

#[derive(Serialize)]
struct ErrorData {
    error: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match &self {
            AppError::NotFound => StatusCode::NOT_FOUND,
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Forbidden => StatusCode::FORBIDDEN,
            AppError::EmptyCart => StatusCode::BAD_REQUEST,
            AppError::InsufficientStock(_) => StatusCode::BAD_REQUEST,
            AppError::OrderPersistenceFailed => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::StorageUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            AppError::DbError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::OrmError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let body = ApiResponse {
            message: self.to_string(),
            data: Some(ErrorData {
                error: self.to_string(),
            }),
            meta: Some(Meta::empty()),
        };

        (status, axum::Json(body)).into_response()
    }
}

pub type AppResult<T> = Result<T, AppError>;
