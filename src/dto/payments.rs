use serde::Deserialize;
use utoipa::ToSchema;
use uuid::Uuid;

#[derive(Debug, Deserialize, ToSchema)]
pub struct RecordPaymentRequest {
    pub order_id: Uuid,
    pub method: String,
}
