use uuid::Uuid;

use crate::{
    audit::log_audit,
    db::DbPool,
    dto::payments::RecordPaymentRequest,
    error::{AppError, AppResult},
    middleware::auth::AuthUser,
    models::Payment,
    response::{ApiResponse, Meta},
};

const METHODS: [&str; 4] = ["cash", "card", "upi", "netbanking"];

/// Record a payment against an existing order. Payments never mutate the
/// order row; status transitions are a separate concern.
pub async fn record_payment(
    pool: &DbPool,
    user: &AuthUser,
    payload: RecordPaymentRequest,
) -> AppResult<ApiResponse<Payment>> {
    let method = payload.method.trim().to_lowercase();
    if !METHODS.contains(&method.as_str()) {
        return Err(AppError::BadRequest("Unsupported payment method".into()));
    }

    let order: Option<(Uuid,)> =
        sqlx::query_as("SELECT id FROM orders WHERE id = $1 AND user_id = $2")
            .bind(payload.order_id)
            .bind(user.user_id)
            .fetch_optional(pool)
            .await?;
    if order.is_none() {
        return Err(AppError::NotFound);
    }

    let already_paid: Option<(Uuid,)> = sqlx::query_as(
        "SELECT id FROM payments WHERE order_id = $1 AND status = 'success'",
    )
    .bind(payload.order_id)
    .fetch_optional(pool)
    .await?;
    if already_paid.is_some() {
        return Err(AppError::BadRequest("Order is already paid".into()));
    }

    let payment: Payment = sqlx::query_as(
        r#"
        INSERT INTO payments (id, order_id, method, status)
        VALUES ($1, $2, $3, 'success')
        RETURNING *
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(payload.order_id)
    .bind(method)
    .fetch_one(pool)
    .await?;

    if let Err(err) = log_audit(
        pool,
        Some(user.user_id),
        "payment_recorded",
        Some("payments"),
        Some(serde_json::json!({ "order_id": payment.order_id, "method": payment.method })),
    )
    .await
    {
        tracing::warn!(error = %err, "audit log failed");
    }

    Ok(ApiResponse::success(
        "Payment successful",
        payment,
        Some(Meta::empty()),
    ))
}
