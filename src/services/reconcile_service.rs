use chrono::Utc;
use sea_orm::sea_query::LockType;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseTransaction, EntityTrait, QueryFilter, QuerySelect, Set,
    TransactionTrait,
};
use uuid::Uuid;

use crate::{
    audit::log_audit,
    entity::orders::{
        ActiveModel as OrderActive, Column as OrderCol, Entity as Orders, Model as OrderModel,
    },
    error::{AppError, AppResult},
    gateway::WebhookEvent,
    lifecycle::{self, OrderStatus},
    services::order_service::parse_stored_status,
    services::product_service::{self, StockConsumption},
    state::AppState,
};

/// Payment outcome as observed from the provider, whichever channel carried
/// it (webhook push, operator poll, success-page check).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObservedOutcome {
    Paid,
    Expired,
    Failed,
    Canceled,
    StillPending,
}

impl ObservedOutcome {
    /// Interpret the live fields of a checkout session.
    pub fn from_session(payment_status: Option<&str>, session_status: Option<&str>) -> Self {
        if payment_status == Some("paid") {
            ObservedOutcome::Paid
        } else if session_status == Some("expired") {
            ObservedOutcome::Expired
        } else {
            ObservedOutcome::StillPending
        }
    }

    /// Map a webhook event type to an outcome. Returns None for event types
    /// this system does not act on.
    pub fn from_event(event: &WebhookEvent) -> Option<Self> {
        let object = &event.data.object;
        match event.event_type.as_str() {
            // A completed session may still be unpaid when an async payment
            // method is settling; the async_payment_* events carry the final word.
            "checkout.session.completed" | "checkout.session.async_payment_succeeded" => {
                Some(Self::from_session(
                    object.payment_status.as_deref(),
                    object.status.as_deref(),
                ))
            }
            "checkout.session.expired" => Some(ObservedOutcome::Expired),
            "checkout.session.async_payment_failed" => Some(ObservedOutcome::Failed),
            "payment_intent.succeeded" => Some(ObservedOutcome::Paid),
            "payment_intent.payment_failed" => Some(ObservedOutcome::Failed),
            "payment_intent.canceled" => Some(ObservedOutcome::Canceled),
            _ => None,
        }
    }
}

/// Keys that map an inbound provider signal to exactly one order: the session
/// id is authoritative, the metadata order id is the fallback.
#[derive(Debug, Clone, Default)]
pub struct CorrelationKey {
    pub session_id: Option<String>,
    pub order_id: Option<Uuid>,
}

impl CorrelationKey {
    pub fn for_session(session_id: impl Into<String>) -> Self {
        Self {
            session_id: Some(session_id.into()),
            order_id: None,
        }
    }

    pub fn for_order(order_id: Uuid) -> Self {
        Self {
            session_id: None,
            order_id: Some(order_id),
        }
    }

    pub fn from_event(event: &WebhookEvent) -> Self {
        Self {
            session_id: event.session_id().map(str::to_string),
            order_id: event.metadata_order_id(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ReconcileOutcome {
    pub order_id: Uuid,
    pub previous_status: OrderStatus,
    pub status: OrderStatus,
    pub changed: bool,
    pub stock_exhausted: bool,
    pub message: String,
}

impl ReconcileOutcome {
    fn unchanged(order_id: Uuid, status: OrderStatus, message: impl Into<String>) -> Self {
        Self {
            order_id,
            previous_status: status,
            status,
            changed: false,
            stock_exhausted: false,
            message: message.into(),
        }
    }
}

/// Apply an externally observed payment outcome to local order state. The
/// single funnel for all three trigger channels.
///
/// The order row is re-read under a row lock inside one transaction, so two
/// concurrent calls for the same order serialize: the loser re-observes the
/// committed state and no-ops. Transition errors from late or duplicated
/// notifications are swallowed into informational no-ops; only a failed
/// correlation (no matching order) is reported to the caller.
pub async fn reconcile(
    state: &AppState,
    key: &CorrelationKey,
    observed: ObservedOutcome,
) -> AppResult<ReconcileOutcome> {
    let txn = state.orm.begin().await?;
    let order = find_order_locked(&txn, key).await?;
    let current = parse_stored_status(&order.status)?;

    let outcome = match observed {
        ObservedOutcome::Paid => settle_paid(&txn, order, current).await?,
        ObservedOutcome::Expired => {
            settle(
                &txn,
                order,
                current,
                OrderStatus::Failed,
                "Checkout session expired",
            )
            .await?
        }
        ObservedOutcome::Failed => {
            settle(&txn, order, current, OrderStatus::Failed, "Payment failed").await?
        }
        ObservedOutcome::Canceled => {
            settle(
                &txn,
                order,
                current,
                OrderStatus::Cancelled,
                "Payment cancelled",
            )
            .await?
        }
        ObservedOutcome::StillPending => {
            ReconcileOutcome::unchanged(order.id, current, "Payment is still pending")
        }
    };
    txn.commit().await?;

    if outcome.changed {
        if let Err(err) = log_audit(
            &state.pool,
            None,
            "order_reconciled",
            Some("orders"),
            Some(serde_json::json!({
                "order_id": outcome.order_id,
                "old_status": outcome.previous_status.as_str(),
                "new_status": outcome.status.as_str(),
                "stock_exhausted": outcome.stock_exhausted,
            })),
        )
        .await
        {
            tracing::warn!(error = %err, "audit log failed");
        }
    }

    Ok(outcome)
}

async fn settle_paid(
    txn: &DatabaseTransaction,
    order: OrderModel,
    current: OrderStatus,
) -> AppResult<ReconcileOutcome> {
    // Duplicate-delivery guard: checked before transition + consume so a
    // second Paid signal touches neither status nor stock.
    if current == OrderStatus::Success {
        return Ok(ReconcileOutcome::unchanged(
            order.id,
            current,
            "Order is already marked as success",
        ));
    }

    let order_id = order.id;
    let product_id = order.product_id;
    match lifecycle::transition(current, OrderStatus::Success) {
        Ok(change) => {
            persist_status(txn, order, change.new_status).await?;
            let stock_exhausted = match product_service::consume_stock(txn, product_id, 1).await? {
                StockConsumption::Consumed => {
                    tracing::info!(
                        order_id = %order_id,
                        product_id = %product_id,
                        "stock consumed for paid order"
                    );
                    false
                }
                StockConsumption::Insufficient => {
                    tracing::warn!(
                        order_id = %order_id,
                        product_id = %product_id,
                        "order paid but product has no stock left"
                    );
                    true
                }
            };
            Ok(ReconcileOutcome {
                order_id,
                previous_status: change.old_status,
                status: change.new_status,
                changed: true,
                stock_exhausted,
                message: if stock_exhausted {
                    "Order marked as success; no stock left to consume".to_string()
                } else {
                    "Order marked as success".to_string()
                },
            })
        }
        Err(err) => {
            tracing::info!(
                order_id = %order_id,
                error = %err,
                "ignoring stale payment notification"
            );
            Ok(ReconcileOutcome::unchanged(
                order_id,
                current,
                format!("Order left in '{current}' status"),
            ))
        }
    }
}

async fn settle(
    txn: &DatabaseTransaction,
    order: OrderModel,
    current: OrderStatus,
    target: OrderStatus,
    reason: &str,
) -> AppResult<ReconcileOutcome> {
    let order_id = order.id;
    match lifecycle::transition(current, target) {
        Ok(change) => {
            persist_status(txn, order, change.new_status).await?;
            tracing::info!(
                order_id = %order_id,
                old_status = %change.old_status,
                new_status = %change.new_status,
                "{reason}"
            );
            Ok(ReconcileOutcome {
                order_id,
                previous_status: change.old_status,
                status: change.new_status,
                changed: true,
                stock_exhausted: false,
                message: format!("{reason}; order marked as '{target}'"),
            })
        }
        Err(err) => {
            tracing::info!(
                order_id = %order_id,
                error = %err,
                "ignoring stale payment notification"
            );
            Ok(ReconcileOutcome::unchanged(
                order_id,
                current,
                format!("Order left in '{current}' status"),
            ))
        }
    }
}

async fn persist_status(
    txn: &DatabaseTransaction,
    order: OrderModel,
    status: OrderStatus,
) -> AppResult<OrderModel> {
    let mut active: OrderActive = order.into();
    active.status = Set(status.as_str().to_string());
    active.updated_at = Set(Utc::now().into());
    Ok(active.update(txn).await?)
}

/// Resolve the correlation key to an order, locking its row for the rest of
/// the transaction. Session id wins; the metadata order id is the fallback.
async fn find_order_locked(
    txn: &DatabaseTransaction,
    key: &CorrelationKey,
) -> AppResult<OrderModel> {
    if let Some(session_id) = key.session_id.as_deref() {
        let found = Orders::find()
            .filter(OrderCol::ProviderSessionId.eq(session_id))
            .lock(LockType::Update)
            .one(txn)
            .await?;
        if let Some(order) = found {
            return Ok(order);
        }
    }
    if let Some(order_id) = key.order_id {
        let found = Orders::find()
            .filter(OrderCol::Id.eq(order_id))
            .lock(LockType::Update)
            .one(txn)
            .await?;
        if let Some(order) = found {
            return Ok(order);
        }
    }
    Err(AppError::NotFound)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(value: serde_json::Value) -> WebhookEvent {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn session_fields_map_to_outcomes() {
        assert_eq!(
            ObservedOutcome::from_session(Some("paid"), Some("complete")),
            ObservedOutcome::Paid
        );
        assert_eq!(
            ObservedOutcome::from_session(Some("unpaid"), Some("expired")),
            ObservedOutcome::Expired
        );
        assert_eq!(
            ObservedOutcome::from_session(Some("unpaid"), Some("open")),
            ObservedOutcome::StillPending
        );
        assert_eq!(
            ObservedOutcome::from_session(None, None),
            ObservedOutcome::StillPending
        );
    }

    #[test]
    fn event_types_map_to_outcomes() {
        let paid = event(serde_json::json!({
            "type": "checkout.session.completed",
            "data": { "object": {
                "id": "cs_1", "object": "checkout.session",
                "payment_status": "paid", "status": "complete"
            } }
        }));
        assert_eq!(ObservedOutcome::from_event(&paid), Some(ObservedOutcome::Paid));

        // Completed but unpaid: an async payment method is still settling.
        let settling = event(serde_json::json!({
            "type": "checkout.session.completed",
            "data": { "object": {
                "id": "cs_1", "object": "checkout.session",
                "payment_status": "unpaid", "status": "complete"
            } }
        }));
        assert_eq!(
            ObservedOutcome::from_event(&settling),
            Some(ObservedOutcome::StillPending)
        );

        let expired = event(serde_json::json!({
            "type": "checkout.session.expired",
            "data": { "object": { "id": "cs_1", "object": "checkout.session" } }
        }));
        assert_eq!(
            ObservedOutcome::from_event(&expired),
            Some(ObservedOutcome::Expired)
        );

        let canceled = event(serde_json::json!({
            "type": "payment_intent.canceled",
            "data": { "object": { "id": "pi_1", "object": "payment_intent" } }
        }));
        assert_eq!(
            ObservedOutcome::from_event(&canceled),
            Some(ObservedOutcome::Canceled)
        );

        let unknown = event(serde_json::json!({
            "type": "invoice.created",
            "data": { "object": { "id": "in_1", "object": "invoice" } }
        }));
        assert_eq!(ObservedOutcome::from_event(&unknown), None);
    }

    #[test]
    fn correlation_key_prefers_session_id_and_keeps_fallback() {
        let evt = event(serde_json::json!({
            "type": "checkout.session.completed",
            "data": { "object": {
                "id": "cs_test_abc", "object": "checkout.session",
                "payment_status": "paid", "status": "complete",
                "metadata": { "order_id": "3fa85f64-5717-4562-b3fc-2c963f66afa6" }
            } }
        }));
        let key = CorrelationKey::from_event(&evt);
        assert_eq!(key.session_id.as_deref(), Some("cs_test_abc"));
        assert_eq!(
            key.order_id,
            Some(Uuid::parse_str("3fa85f64-5717-4562-b3fc-2c963f66afa6").unwrap())
        );
    }
}
