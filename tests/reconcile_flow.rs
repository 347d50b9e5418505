use axum_orders_api::{
    config::{AppConfig, CheckoutConfig},
    db::{create_orm_conn, create_pool, run_migrations},
    dto::orders::UpdateOrderStatusRequest,
    entity::{
        orders::{ActiveModel as OrderActive, Entity as Orders},
        products::{ActiveModel as ProductActive, Entity as Products, Model as ProductModel},
    },
    error::AppError,
    gateway::CheckoutGateway,
    lifecycle::OrderStatus,
    middleware::auth::AuthUser,
    services::{
        order_service,
        reconcile_service::{CorrelationKey, ObservedOutcome, reconcile},
    },
    state::AppState,
};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use sea_orm::ActiveValue::NotSet;
use sea_orm::{ActiveModelTrait, EntityTrait, Set};
use uuid::Uuid;

// Reconciliation flow tests against a real database. Each test seeds its own
// rows, so they can run in parallel and on a shared database.
async fn test_state() -> anyhow::Result<Option<AppState>> {
    let database_url = match std::env::var("TEST_DATABASE_URL")
        .or_else(|_| std::env::var("DATABASE_URL"))
    {
        Ok(url) => url,
        Err(_) => {
            eprintln!(
                "Skipping test: set TEST_DATABASE_URL or DATABASE_URL to run reconciliation flow tests."
            );
            return Ok(None);
        }
    };

    let pool = create_pool(&database_url).await?;
    let orm = create_orm_conn(&database_url).await?;
    run_migrations(&orm).await?;

    let checkout = CheckoutConfig {
        secret_key: "sk_test_dummy".to_string(),
        webhook_secret: "whsec_test_dummy".to_string(),
        api_base: "http://localhost:9".to_string(),
        success_url: "http://localhost:8000/api/orders/success".to_string(),
        cancel_url: "http://localhost:8000/api/orders/cancel".to_string(),
        request_timeout_secs: 1,
    };
    let config = AppConfig {
        database_url: database_url.clone(),
        host: "127.0.0.1".to_string(),
        port: 0,
        jwt_secret: "test-secret".to_string(),
        operator_username: "operator".to_string(),
        operator_password: "operator".to_string(),
        checkout: checkout.clone(),
    };
    let gateway = CheckoutGateway::new(checkout)?;

    Ok(Some(AppState {
        pool,
        orm,
        config,
        gateway,
    }))
}

fn operator() -> AuthUser {
    AuthUser {
        username: "operator".to_string(),
        role: "admin".to_string(),
    }
}

async fn seed_product(
    state: &AppState,
    stock: i32,
    price: Decimal,
) -> anyhow::Result<ProductModel> {
    let product = ProductActive {
        id: Set(Uuid::new_v4()),
        picture: Set(String::new()),
        name: Set(format!("Test Widget {}", Uuid::new_v4().simple())),
        description: Set("A product for testing".to_string()),
        kind: Set("test".to_string()),
        stock: Set(stock),
        price: Set(price),
        currency: Set("MXN".to_string()),
        created_at: NotSet,
        updated_at: NotSet,
    }
    .insert(&state.orm)
    .await?;
    Ok(product)
}

async fn seed_order(
    state: &AppState,
    product_id: Uuid,
    session_id: Option<&str>,
    status: OrderStatus,
) -> anyhow::Result<Uuid> {
    let order = OrderActive {
        id: Set(Uuid::new_v4()),
        product_id: Set(product_id),
        client_name: Set("Test Customer".to_string()),
        client_email: Set("customer@example.com".to_string()),
        client_phone: Set("+521234567890".to_string()),
        client_address: Set("123 Test St".to_string()),
        provider_session_id: Set(session_id.map(str::to_string)),
        status: Set(status.as_str().to_string()),
        total: Set(dec!(199.99)),
        currency: Set("MXN".to_string()),
        created_at: NotSet,
        updated_at: NotSet,
    }
    .insert(&state.orm)
    .await?;
    Ok(order.id)
}

async fn order_status_of(state: &AppState, order_id: Uuid) -> anyhow::Result<String> {
    let order = Orders::find_by_id(order_id)
        .one(&state.orm)
        .await?
        .expect("order should exist");
    Ok(order.status)
}

async fn stock_of(state: &AppState, product_id: Uuid) -> anyhow::Result<i32> {
    let product = Products::find_by_id(product_id)
        .one(&state.orm)
        .await?
        .expect("product should exist");
    Ok(product.stock)
}

fn session_id() -> String {
    format!("cs_test_{}", Uuid::new_v4().simple())
}

#[tokio::test]
async fn paid_reconciliation_is_idempotent() -> anyhow::Result<()> {
    let Some(state) = test_state().await? else {
        return Ok(());
    };
    let product = seed_product(&state, 3, dec!(199.99)).await?;
    let session = session_id();
    let order_id = seed_order(&state, product.id, Some(&session), OrderStatus::Pending).await?;

    let first = reconcile(
        &state,
        &CorrelationKey::for_session(session.clone()),
        ObservedOutcome::Paid,
    )
    .await?;
    assert!(first.changed);
    assert_eq!(first.previous_status, OrderStatus::Pending);
    assert_eq!(first.status, OrderStatus::Success);
    assert!(!first.stock_exhausted);

    // Duplicate delivery: no transition, no second decrement.
    let second = reconcile(
        &state,
        &CorrelationKey::for_session(session),
        ObservedOutcome::Paid,
    )
    .await?;
    assert!(!second.changed);
    assert_eq!(second.status, OrderStatus::Success);

    assert_eq!(order_status_of(&state, order_id).await?, "success");
    assert_eq!(stock_of(&state, product.id).await?, 2);
    Ok(())
}

#[tokio::test]
async fn concurrent_paid_reconciliations_consume_stock_once() -> anyhow::Result<()> {
    let Some(state) = test_state().await? else {
        return Ok(());
    };
    let product = seed_product(&state, 1, dec!(89.50)).await?;
    let session = session_id();
    let order_id = seed_order(&state, product.id, Some(&session), OrderStatus::Pending).await?;

    let key = CorrelationKey::for_session(session);
    let (a, b) = tokio::join!(
        reconcile(&state, &key, ObservedOutcome::Paid),
        reconcile(&state, &key, ObservedOutcome::Paid),
    );
    let (a, b) = (a?, b?);

    // Exactly one call wins the row lock and performs the transition.
    assert!(a.changed ^ b.changed);
    assert_eq!(a.status, OrderStatus::Success);
    assert_eq!(b.status, OrderStatus::Success);

    assert_eq!(order_status_of(&state, order_id).await?, "success");
    assert_eq!(stock_of(&state, product.id).await?, 0);
    Ok(())
}

#[tokio::test]
async fn insufficient_stock_does_not_block_success() -> anyhow::Result<()> {
    let Some(state) = test_state().await? else {
        return Ok(());
    };
    let product = seed_product(&state, 0, dec!(45.00)).await?;
    let session = session_id();
    let order_id = seed_order(&state, product.id, Some(&session), OrderStatus::Pending).await?;

    let outcome = reconcile(
        &state,
        &CorrelationKey::for_session(session),
        ObservedOutcome::Paid,
    )
    .await?;
    assert!(outcome.changed);
    assert_eq!(outcome.status, OrderStatus::Success);
    assert!(outcome.stock_exhausted);

    assert_eq!(order_status_of(&state, order_id).await?, "success");
    assert_eq!(stock_of(&state, product.id).await?, 0);
    Ok(())
}

#[tokio::test]
async fn expired_session_fails_pending_order_for_good() -> anyhow::Result<()> {
    let Some(state) = test_state().await? else {
        return Ok(());
    };
    let product = seed_product(&state, 5, dec!(299.99)).await?;
    let session = session_id();
    let order_id = seed_order(&state, product.id, Some(&session), OrderStatus::Pending).await?;

    let key = CorrelationKey::for_session(session);
    let expired = reconcile(&state, &key, ObservedOutcome::Expired).await?;
    assert!(expired.changed);
    assert_eq!(expired.status, OrderStatus::Failed);

    // A late Paid notification for a terminal order is swallowed into a no-op.
    let late = reconcile(&state, &key, ObservedOutcome::Paid).await?;
    assert!(!late.changed);
    assert_eq!(late.status, OrderStatus::Failed);

    assert_eq!(order_status_of(&state, order_id).await?, "failed");
    assert_eq!(stock_of(&state, product.id).await?, 5);
    Ok(())
}

#[tokio::test]
async fn cancellation_closes_pending_order() -> anyhow::Result<()> {
    let Some(state) = test_state().await? else {
        return Ok(());
    };
    let product = seed_product(&state, 5, dec!(299.99)).await?;
    let session = session_id();
    let order_id = seed_order(&state, product.id, Some(&session), OrderStatus::Pending).await?;

    let outcome = reconcile(
        &state,
        &CorrelationKey::for_session(session),
        ObservedOutcome::Canceled,
    )
    .await?;
    assert!(outcome.changed);
    assert_eq!(outcome.status, OrderStatus::Cancelled);
    assert_eq!(order_status_of(&state, order_id).await?, "cancelled");
    Ok(())
}

#[tokio::test]
async fn operator_transitions_follow_lifecycle() -> anyhow::Result<()> {
    let Some(state) = test_state().await? else {
        return Ok(());
    };
    let product = seed_product(&state, 5, dec!(299.99)).await?;
    let order_id = seed_order(&state, product.id, None, OrderStatus::Success).await?;
    let operator = operator();

    for step in ["sent", "shipped", "delivered"] {
        let response = order_service::update_order_status(
            &state,
            &operator,
            order_id,
            UpdateOrderStatusRequest {
                status: step.to_string(),
            },
        )
        .await?;
        assert_eq!(response.data.unwrap().new_status, step);
    }

    // Delivered is terminal: the operator cannot move the order again.
    let err = order_service::update_order_status(
        &state,
        &operator,
        order_id,
        UpdateOrderStatusRequest {
            status: "sent".to_string(),
        },
    )
    .await
    .unwrap_err();
    assert!(err.to_string().contains("terminal"));

    assert_eq!(order_status_of(&state, order_id).await?, "delivered");
    Ok(())
}

#[tokio::test]
async fn illegal_operator_transition_names_legal_targets() -> anyhow::Result<()> {
    let Some(state) = test_state().await? else {
        return Ok(());
    };
    let product = seed_product(&state, 5, dec!(299.99)).await?;
    let order_id = seed_order(&state, product.id, None, OrderStatus::Pending).await?;

    let err = order_service::update_order_status(
        &state,
        &operator(),
        order_id,
        UpdateOrderStatusRequest {
            status: "shipped".to_string(),
        },
    )
    .await
    .unwrap_err();
    let message = err.to_string();
    assert!(message.contains("'pending'"));
    assert!(message.contains("'shipped'"));
    assert!(message.contains("success, failed, cancelled"));

    let err = order_service::update_order_status(
        &state,
        &operator(),
        order_id,
        UpdateOrderStatusRequest {
            status: "paid".to_string(),
        },
    )
    .await
    .unwrap_err();
    assert!(err.to_string().contains("Invalid order status"));

    assert_eq!(order_status_of(&state, order_id).await?, "pending");
    Ok(())
}

#[tokio::test]
async fn correlation_falls_back_to_metadata_order_id() -> anyhow::Result<()> {
    let Some(state) = test_state().await? else {
        return Ok(());
    };
    let product = seed_product(&state, 2, dec!(89.50)).await?;
    let order_id = seed_order(
        &state,
        product.id,
        Some(&session_id()),
        OrderStatus::Pending,
    )
    .await?;

    // The event carries a session id this backend has never seen, but its
    // metadata still names the order.
    let key = CorrelationKey {
        session_id: Some(session_id()),
        order_id: Some(order_id),
    };
    let outcome = reconcile(&state, &key, ObservedOutcome::Paid).await?;
    assert!(outcome.changed);
    assert_eq!(outcome.order_id, order_id);

    assert_eq!(order_status_of(&state, order_id).await?, "success");
    assert_eq!(stock_of(&state, product.id).await?, 1);
    Ok(())
}

#[tokio::test]
async fn unknown_correlation_reports_not_found() -> anyhow::Result<()> {
    let Some(state) = test_state().await? else {
        return Ok(());
    };

    let key = CorrelationKey {
        session_id: Some(session_id()),
        order_id: Some(Uuid::new_v4()),
    };
    match reconcile(&state, &key, ObservedOutcome::Paid).await {
        Err(AppError::NotFound) => {}
        other => panic!("expected OrderNotFound, got {other:?}"),
    }
    Ok(())
}
