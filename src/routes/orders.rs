use axum::{
    Json, Router,
    extract::{Path, Query, State},
    routing::{get, patch, post},
};
use serde::Deserialize;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::{
    dto::orders::{
        CheckoutCreated, CreateOrderRequest, OrderList, PaymentCheckResponse, StatusResponse,
        StatusUpdateResponse, UpdateOrderStatusRequest,
    },
    error::{AppError, AppResult},
    middleware::auth::AuthUser,
    models::Order,
    response::{ApiResponse, Meta},
    routes::params::OrderListQuery,
    services::{
        order_service,
        reconcile_service::{self, CorrelationKey, ObservedOutcome},
    },
    state::AppState,
};

#[derive(Debug, Deserialize, ToSchema)]
pub struct SuccessPageQuery {
    pub session_id: Option<String>,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", post(create_order))
        .route("/", get(list_orders))
        .route("/success", get(order_success))
        .route("/cancel", get(order_cancel))
        .route("/{id}", get(get_order))
        .route("/{id}/status", get(order_status))
        .route("/{id}/status", patch(update_order_status))
        .route("/{id}/payment-check", post(payment_check))
}

#[utoipa::path(
    post,
    path = "/api/orders",
    request_body = CreateOrderRequest,
    responses(
        (status = 200, description = "Order created with a checkout session", body = ApiResponse<CheckoutCreated>),
        (status = 400, description = "Unknown product, out of stock, or below minimum amount"),
        (status = 502, description = "Checkout provider unavailable"),
    ),
    tag = "Orders"
)]
pub async fn create_order(
    State(state): State<AppState>,
    Json(payload): Json<CreateOrderRequest>,
) -> AppResult<Json<ApiResponse<CheckoutCreated>>> {
    let resp = order_service::create_order(&state, payload).await?;
    Ok(Json(resp))
}

#[utoipa::path(
    get,
    path = "/api/orders",
    params(
        ("page" = Option<i64>, Query, description = "Page number, default 1"),
        ("per_page" = Option<i64>, Query, description = "Items per page, default 20"),
        ("status" = Option<String>, Query, description = "Filter by status"),
        ("sort_order" = Option<String>, Query, description = "Sort order: asc, desc")
    ),
    responses(
        (status = 200, description = "List orders (operator only)", body = ApiResponse<OrderList>),
        (status = 403, description = "Forbidden"),
    ),
    security(("bearer_auth" = [])),
    tag = "Orders"
)]
pub async fn list_orders(
    State(state): State<AppState>,
    user: AuthUser,
    Query(query): Query<OrderListQuery>,
) -> AppResult<Json<ApiResponse<OrderList>>> {
    let resp = order_service::list_orders(&state, &user, query).await?;
    Ok(Json(resp))
}

#[utoipa::path(
    get,
    path = "/api/orders/{id}",
    params(
        ("id" = Uuid, Path, description = "Order ID")
    ),
    responses(
        (status = 200, description = "Order detail", body = ApiResponse<Order>),
        (status = 404, description = "Not Found"),
    ),
    tag = "Orders"
)]
pub async fn get_order(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> AppResult<Json<ApiResponse<Order>>> {
    let resp = order_service::get_order(&state, id).await?;
    Ok(Json(resp))
}

#[utoipa::path(
    get,
    path = "/api/orders/{id}/status",
    params(
        ("id" = Uuid, Path, description = "Order ID")
    ),
    responses(
        (status = 200, description = "Order status snapshot", body = ApiResponse<StatusResponse>),
        (status = 404, description = "Not Found"),
    ),
    tag = "Orders"
)]
pub async fn order_status(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> AppResult<Json<ApiResponse<StatusResponse>>> {
    let resp = order_service::order_status(&state, id).await?;
    Ok(Json(resp))
}

#[utoipa::path(
    patch,
    path = "/api/orders/{id}/status",
    params(
        ("id" = Uuid, Path, description = "Order ID")
    ),
    request_body = UpdateOrderStatusRequest,
    responses(
        (status = 200, description = "Status updated", body = ApiResponse<StatusUpdateResponse>),
        (status = 400, description = "Invalid status or illegal transition"),
        (status = 403, description = "Forbidden"),
        (status = 404, description = "Not Found"),
    ),
    security(("bearer_auth" = [])),
    tag = "Orders"
)]
pub async fn update_order_status(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateOrderStatusRequest>,
) -> AppResult<Json<ApiResponse<StatusUpdateResponse>>> {
    let resp = order_service::update_order_status(&state, &user, id, payload).await?;
    Ok(Json(resp))
}

#[utoipa::path(
    post,
    path = "/api/orders/{id}/payment-check",
    params(
        ("id" = Uuid, Path, description = "Order ID")
    ),
    responses(
        (status = 200, description = "Provider queried and order reconciled", body = ApiResponse<PaymentCheckResponse>),
        (status = 400, description = "Order has no checkout session"),
        (status = 403, description = "Forbidden"),
        (status = 404, description = "Not Found"),
        (status = 502, description = "Checkout provider unavailable"),
    ),
    security(("bearer_auth" = [])),
    tag = "Orders"
)]
pub async fn payment_check(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
) -> AppResult<Json<ApiResponse<PaymentCheckResponse>>> {
    let resp = order_service::check_payment(&state, &user, id).await?;
    Ok(Json(resp))
}

/// Landing page for the provider's success redirect. When the session id is
/// present the payment outcome is applied right away instead of waiting for
/// the webhook; any failure here is logged, never shown to the buyer.
#[utoipa::path(
    get,
    path = "/api/orders/success",
    params(
        ("session_id" = Option<String>, Query, description = "Checkout session to verify")
    ),
    responses(
        (status = 200, description = "Order completed"),
    ),
    tag = "Orders"
)]
pub async fn order_success(
    State(state): State<AppState>,
    Query(query): Query<SuccessPageQuery>,
) -> Json<ApiResponse<serde_json::Value>> {
    if let Some(session_id) = query.session_id.as_deref() {
        match state.gateway.retrieve_session(session_id).await {
            Ok(session) => {
                let observed = ObservedOutcome::from_session(
                    session.payment_status.as_deref(),
                    session.status.as_deref(),
                );
                match reconcile_service::reconcile(
                    &state,
                    &CorrelationKey::for_session(session_id),
                    observed,
                )
                .await
                {
                    Ok(outcome) => tracing::info!(
                        order_id = %outcome.order_id,
                        status = %outcome.status,
                        "success page reconciled order"
                    ),
                    Err(AppError::NotFound) => {
                        tracing::warn!(session_id, "success page session matched no order");
                    }
                    Err(err) => {
                        tracing::warn!(session_id, error = %err, "success page reconciliation failed");
                    }
                }
            }
            Err(err) => {
                tracing::warn!(session_id, error = %err, "could not query provider from success page");
            }
        }
    }

    Json(ApiResponse::success(
        "Order completed successfully!",
        serde_json::json!({ "status": "success" }),
        Some(Meta::empty()),
    ))
}

#[utoipa::path(
    get,
    path = "/api/orders/cancel",
    responses(
        (status = 200, description = "Order cancelled page"),
    ),
    tag = "Orders"
)]
pub async fn order_cancel() -> Json<ApiResponse<serde_json::Value>> {
    Json(ApiResponse::success(
        "Order was cancelled.",
        serde_json::json!({ "status": "cancelled" }),
        Some(Meta::empty()),
    ))
}
