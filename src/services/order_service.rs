use chrono::Utc;
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal_macros::dec;
use sea_orm::ActiveValue::NotSet;
use sea_orm::sea_query::LockType;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, EntityTrait, PaginatorTrait, QueryFilter, QueryOrder,
    QuerySelect, Set, TransactionTrait,
};
use uuid::Uuid;

use crate::{
    audit::log_audit,
    dto::orders::{
        CheckoutCreated, CreateOrderRequest, OrderList, PaymentCheckResponse, StatusResponse,
        StatusUpdateResponse, UpdateOrderStatusRequest,
    },
    entity::{
        orders::{
            ActiveModel as OrderActive, Column as OrderCol, Entity as Orders, Model as OrderModel,
        },
        products::{Entity as Products, Model as ProductModel},
    },
    error::{AppError, AppResult},
    gateway::SessionRequest,
    lifecycle::{self, OrderStatus, TransitionError},
    middleware::auth::{AuthUser, ensure_admin},
    models::Order,
    response::{ApiResponse, Meta},
    routes::params::{OrderListQuery, SortOrder},
    services::product_service::product_summary_from_entity,
    services::reconcile_service::{self, CorrelationKey, ObservedOutcome},
    state::AppState,
};

/// Smallest total the provider will charge, in major units.
const MIN_CHARGE: Decimal = dec!(10.00);

pub async fn create_order(
    state: &AppState,
    payload: CreateOrderRequest,
) -> AppResult<ApiResponse<CheckoutCreated>> {
    let product = Products::find_by_id(payload.product_id)
        .one(&state.orm)
        .await?;
    let product = match product {
        Some(p) => p,
        None => return Err(AppError::BadRequest("Product not found".into())),
    };

    if product.stock <= 0 {
        return Err(AppError::BadRequest("Product is out of stock".into()));
    }

    // Snapshot price and currency; later product edits must not move the total.
    let total = product.price;
    let currency = product.currency.clone();
    if total < MIN_CHARGE {
        return Err(AppError::BadRequest(format!(
            "Order total {total} {currency} is below the minimum chargeable amount of {MIN_CHARGE} {currency}"
        )));
    }
    let amount_minor = to_minor_units(total)?;

    let order_id = Uuid::new_v4();
    let order = OrderActive {
        id: Set(order_id),
        product_id: Set(product.id),
        client_name: Set(payload.client_name.clone()),
        client_email: Set(payload.client_email.clone()),
        client_phone: Set(payload.client_phone),
        client_address: Set(payload.client_address),
        provider_session_id: Set(None),
        status: Set(OrderStatus::Pending.as_str().to_string()),
        total: Set(total),
        currency: Set(currency.clone()),
        created_at: NotSet,
        updated_at: NotSet,
    }
    .insert(&state.orm)
    .await?;

    let request = SessionRequest {
        order_id,
        product_id: product.id,
        product_name: &product.name,
        amount_minor,
        currency: &currency,
        client_name: &payload.client_name,
        client_email: &payload.client_email,
    };

    let session = match state.gateway.create_session(&request).await {
        Ok(session) => session,
        Err(err) => {
            // An order nobody can pay for must not stay pending.
            tracing::error!(order_id = %order_id, error = %err, "checkout session creation failed");
            mark_failed(state, order).await?;
            if let Err(audit_err) = log_audit(
                &state.pool,
                None,
                "order_checkout_failed",
                Some("orders"),
                Some(serde_json::json!({ "order_id": order_id })),
            )
            .await
            {
                tracing::warn!(error = %audit_err, "audit log failed");
            }
            return Err(err.into());
        }
    };

    let mut active: OrderActive = order.into();
    active.provider_session_id = Set(Some(session.id.clone()));
    active.updated_at = Set(Utc::now().into());
    active.update(&state.orm).await?;

    if let Err(err) = log_audit(
        &state.pool,
        None,
        "order_create",
        Some("orders"),
        Some(serde_json::json!({ "order_id": order_id, "session_id": session.id })),
    )
    .await
    {
        tracing::warn!(error = %err, "audit log failed");
    }

    Ok(ApiResponse::success(
        "Order created",
        CheckoutCreated {
            order_id,
            checkout_url: session.url.unwrap_or_default(),
            session_id: session.id,
        },
        Some(Meta::empty()),
    ))
}

pub async fn get_order(state: &AppState, id: Uuid) -> AppResult<ApiResponse<Order>> {
    let found = Orders::find_by_id(id)
        .find_also_related(Products)
        .one(&state.orm)
        .await?;
    let (order, product) = match found {
        Some(pair) => pair,
        None => return Err(AppError::NotFound),
    };

    Ok(ApiResponse::success(
        "Order",
        order_from_entity(order, &require_product(product)?),
        Some(Meta::empty()),
    ))
}

pub async fn order_status(state: &AppState, id: Uuid) -> AppResult<ApiResponse<StatusResponse>> {
    let order = Orders::find_by_id(id).one(&state.orm).await?;
    let order = match order {
        Some(o) => o,
        None => return Err(AppError::NotFound),
    };

    Ok(ApiResponse::success(
        "Order status",
        StatusResponse {
            order_id: order.id,
            status: order.status,
            created_at: order.created_at.with_timezone(&Utc),
            updated_at: order.updated_at.with_timezone(&Utc),
        },
        Some(Meta::empty()),
    ))
}

pub async fn list_orders(
    state: &AppState,
    user: &AuthUser,
    query: OrderListQuery,
) -> AppResult<ApiResponse<OrderList>> {
    ensure_admin(user)?;
    let (page, limit, offset) = query.pagination.normalize();

    let mut condition = Condition::all();
    if let Some(status) = query.status.as_ref().filter(|s| !s.is_empty()) {
        condition = condition.add(OrderCol::Status.eq(status.clone()));
    }

    let total = Orders::find()
        .filter(condition.clone())
        .count(&state.orm)
        .await? as i64;

    let mut finder = Orders::find().filter(condition).find_also_related(Products);
    let sort_order = query.sort_order.unwrap_or(SortOrder::Desc);
    finder = match sort_order {
        SortOrder::Asc => finder.order_by_asc(OrderCol::CreatedAt),
        SortOrder::Desc => finder.order_by_desc(OrderCol::CreatedAt),
    };

    let mut items = Vec::new();
    for (order, product) in finder
        .limit(limit as u64)
        .offset(offset as u64)
        .all(&state.orm)
        .await?
    {
        items.push(order_from_entity(order, &require_product(product)?));
    }

    let meta = Meta::new(page, limit, total);
    Ok(ApiResponse::success(
        "Orders",
        OrderList { items },
        Some(meta),
    ))
}

/// Operator-forced transition. Unlike reconciliation, state-machine errors
/// are surfaced verbatim to the caller.
pub async fn update_order_status(
    state: &AppState,
    user: &AuthUser,
    id: Uuid,
    payload: UpdateOrderStatusRequest,
) -> AppResult<ApiResponse<StatusUpdateResponse>> {
    ensure_admin(user)?;
    let requested = OrderStatus::parse(&payload.status)
        .ok_or_else(|| TransitionError::InvalidStatus(payload.status.clone()))?;

    let txn = state.orm.begin().await?;
    let order = Orders::find_by_id(id)
        .lock(LockType::Update)
        .one(&txn)
        .await?;
    let order = match order {
        Some(o) => o,
        None => return Err(AppError::NotFound),
    };
    let current = parse_stored_status(&order.status)?;

    let change = lifecycle::transition(current, requested)?;

    let mut active: OrderActive = order.into();
    active.status = Set(change.new_status.as_str().to_string());
    active.updated_at = Set(Utc::now().into());
    let order = active.update(&txn).await?;
    txn.commit().await?;

    if let Err(err) = log_audit(
        &state.pool,
        Some(&user.username),
        "order_status_update",
        Some("orders"),
        Some(serde_json::json!({
            "order_id": order.id,
            "old_status": change.old_status.as_str(),
            "new_status": change.new_status.as_str(),
        })),
    )
    .await
    {
        tracing::warn!(error = %err, "audit log failed");
    }

    Ok(ApiResponse::success(
        "Order status updated",
        StatusUpdateResponse {
            order_id: order.id,
            old_status: change.old_status.as_str().to_string(),
            new_status: change.new_status.as_str().to_string(),
        },
        Some(Meta::empty()),
    ))
}

/// Manual poll: ask the provider for the live session status and feed the
/// answer through reconciliation. Provider failures are retryable and leave
/// the order untouched.
pub async fn check_payment(
    state: &AppState,
    user: &AuthUser,
    id: Uuid,
) -> AppResult<ApiResponse<PaymentCheckResponse>> {
    ensure_admin(user)?;
    let order = Orders::find_by_id(id).one(&state.orm).await?;
    let order = match order {
        Some(o) => o,
        None => return Err(AppError::NotFound),
    };
    let session_id = match order.provider_session_id {
        Some(session_id) => session_id,
        None => {
            return Err(AppError::BadRequest(
                "Order has no checkout session to check".into(),
            ));
        }
    };

    let session = state.gateway.retrieve_session(&session_id).await?;
    let observed = ObservedOutcome::from_session(
        session.payment_status.as_deref(),
        session.status.as_deref(),
    );
    let outcome =
        reconcile_service::reconcile(state, &CorrelationKey::for_order(id), observed).await?;

    Ok(ApiResponse::success(
        "Payment status checked",
        PaymentCheckResponse {
            order_id: id,
            provider_session_id: session_id,
            provider_payment_status: session
                .payment_status
                .unwrap_or_else(|| "unknown".to_string()),
            provider_session_status: session.status.unwrap_or_else(|| "unknown".to_string()),
            order_status: outcome.status.as_str().to_string(),
            message: outcome.message,
        },
        Some(Meta::empty()),
    ))
}

async fn mark_failed(state: &AppState, order: OrderModel) -> AppResult<()> {
    let current = parse_stored_status(&order.status)?;
    if let Ok(change) = lifecycle::transition(current, OrderStatus::Failed) {
        let mut active: OrderActive = order.into();
        active.status = Set(change.new_status.as_str().to_string());
        active.updated_at = Set(Utc::now().into());
        active.update(&state.orm).await?;
    }
    Ok(())
}

pub(crate) fn parse_stored_status(raw: &str) -> AppResult<OrderStatus> {
    OrderStatus::parse(raw)
        .ok_or_else(|| AppError::Internal(anyhow::anyhow!("order has unknown status '{raw}'")))
}

fn to_minor_units(total: Decimal) -> AppResult<i64> {
    (total * dec!(100))
        .round_dp(0)
        .to_i64()
        .ok_or_else(|| AppError::BadRequest("Order total is out of range".into()))
}

pub fn order_from_entity(order: OrderModel, product: &ProductModel) -> Order {
    Order {
        id: order.id,
        product: product_summary_from_entity(product),
        client_name: order.client_name,
        client_email: order.client_email,
        client_phone: order.client_phone,
        client_address: order.client_address,
        status: order.status,
        total: order.total,
        currency: order.currency,
        provider_session_id: order.provider_session_id,
        created_at: order.created_at.with_timezone(&Utc),
        updated_at: order.updated_at.with_timezone(&Utc),
    }
}

fn require_product(product: Option<ProductModel>) -> AppResult<ProductModel> {
    product.ok_or_else(|| AppError::Internal(anyhow::anyhow!("order references missing product")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minor_units_round_to_cents() {
        assert_eq!(to_minor_units(dec!(199.99)).unwrap(), 19999);
        assert_eq!(to_minor_units(dec!(45)).unwrap(), 4500);
        assert_eq!(to_minor_units(dec!(89.50)).unwrap(), 8950);
    }

    #[test]
    fn minimum_charge_matches_provider_floor() {
        assert!(dec!(9.99) < MIN_CHARGE);
        assert!(dec!(10.00) >= MIN_CHARGE);
    }
}
