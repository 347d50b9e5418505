use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::models::Order;

#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateOrderRequest {
    pub product_id: Uuid,
    pub client_name: String,
    pub client_email: String,
    pub client_phone: String,
    pub client_address: String,
}

/// Returned from order creation: the client follows `checkout_url` to pay.
#[derive(Debug, Serialize, ToSchema)]
pub struct CheckoutCreated {
    pub order_id: Uuid,
    pub checkout_url: String,
    pub session_id: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct OrderList {
    pub items: Vec<Order>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct StatusResponse {
    pub order_id: Uuid,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct UpdateOrderStatusRequest {
    pub status: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct StatusUpdateResponse {
    pub order_id: Uuid,
    pub old_status: String,
    pub new_status: String,
}

/// Result of a manual provider poll: raw provider fields next to the order
/// status that reconciliation settled on.
#[derive(Debug, Serialize, ToSchema)]
pub struct PaymentCheckResponse {
    pub order_id: Uuid,
    pub provider_session_id: String,
    pub provider_payment_status: String,
    pub provider_session_status: String,
    pub order_status: String,
    pub message: String,
}
