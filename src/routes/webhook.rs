use axum::{
    Json, Router,
    body::Bytes,
    extract::State,
    http::HeaderMap,
    routing::post,
};

use crate::{
    error::{AppError, AppResult},
    gateway::{SIGNATURE_HEADER, WebhookEvent},
    response::{ApiResponse, Meta},
    services::reconcile_service::{self, CorrelationKey, ObservedOutcome},
    state::AppState,
};

pub fn router() -> Router<AppState> {
    Router::new().route("/webhook", post(payment_webhook))
}

/// Provider event ingestion. Once the payload is signature-verified and
/// structurally valid the response is always a 200 acknowledgment, even when
/// the event matches no order; anything else would trigger provider retries.
#[utoipa::path(
    post,
    path = "/api/payments/webhook",
    request_body(content = String, description = "Raw signed provider payload"),
    responses(
        (status = 200, description = "Event acknowledged"),
        (status = 400, description = "Missing or invalid signature, or malformed payload"),
    ),
    tag = "Payments"
)]
pub async fn payment_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> AppResult<Json<ApiResponse<serde_json::Value>>> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|value| value.to_str().ok())
        .ok_or_else(|| AppError::BadRequest("Missing signature header".into()))?;

    state
        .gateway
        .verify_signature(&body, signature)
        .map_err(|err| AppError::BadRequest(format!("Invalid webhook signature: {err}")))?;

    let event: WebhookEvent = serde_json::from_slice(&body)
        .map_err(|_| AppError::BadRequest("Invalid payload".into()))?;

    let Some(observed) = ObservedOutcome::from_event(&event) else {
        tracing::debug!(event_type = %event.event_type, "ignoring unhandled webhook event");
        return Ok(acknowledge());
    };

    let key = CorrelationKey::from_event(&event);
    match reconcile_service::reconcile(&state, &key, observed).await {
        Ok(outcome) => {
            tracing::info!(
                event_type = %event.event_type,
                order_id = %outcome.order_id,
                status = %outcome.status,
                changed = outcome.changed,
                "webhook event reconciled"
            );
        }
        // A stale or mis-routed event; acknowledged so the provider stops
        // retrying, but loud enough for operators to notice.
        Err(AppError::NotFound) => {
            tracing::warn!(
                event_type = %event.event_type,
                session_id = ?key.session_id,
                metadata_order_id = ?key.order_id,
                "webhook event matched no order"
            );
        }
        Err(err) => return Err(err),
    }

    Ok(acknowledge())
}

fn acknowledge() -> Json<ApiResponse<serde_json::Value>> {
    Json(ApiResponse::success(
        "Webhook processed",
        serde_json::json!({ "status": "success" }),
        Some(Meta::empty()),
    ))
}
