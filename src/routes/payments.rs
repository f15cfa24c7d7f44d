use axum::{Json, Router, extract::State, http::StatusCode, routing::post};

use crate::{
    dto::payments::RecordPaymentRequest,
    error::AppResult,
    middleware::auth::AuthUser,
    models::Payment,
    response::ApiResponse,
    services::payment_service,
    state::AppState,
};

pub fn router() -> Router<AppState> {
    Router::new().route("/", post(record_payment))
}

#[utoipa::path(
    post,
    path = "/api/payments",
    request_body = RecordPaymentRequest,
    responses(
        (status = 201, description = "Record payment for an order", body = ApiResponse<Payment>),
        (status = 400, description = "Unsupported method or order already paid"),
        (status = 404, description = "Order not found"),
    ),
    security(("bearer_auth" = [])),
    tag = "Payments"
)]
pub async fn record_payment(
    State(state): State<AppState>,
    user: AuthUser,
    Json(payload): Json<RecordPaymentRequest>,
) -> AppResult<(StatusCode, Json<ApiResponse<Payment>>)> {
    let resp = payment_service::record_payment(&state.pool, &user, payload).await?;
    Ok((StatusCode::CREATED, Json(resp)))
}
