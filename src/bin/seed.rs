use axum_orders_api::{
    config::AppConfig,
    db::{create_orm_conn, create_pool, run_migrations},
};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use uuid::Uuid;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let config = AppConfig::from_env()?;

    let orm = create_orm_conn(&config.database_url).await?;
    run_migrations(&orm).await?;

    let pool = create_pool(&config.database_url).await?;
    seed_products(&pool).await?;

    println!("Seed completed");
    Ok(())
}

async fn seed_products(pool: &sqlx::PgPool) -> anyhow::Result<()> {
    let products: Vec<(&str, &str, &str, i32, Decimal, &str)> = vec![
        (
            "T-Shirt",
            "Comfortable cotton t-shirt",
            "clothing",
            50,
            dec!(299.99),
            "MXN",
        ),
        (
            "Coffee Mug",
            "Ceramic coffee mug",
            "kitchen",
            100,
            dec!(89.50),
            "MXN",
        ),
        (
            "Notebook",
            "Spiral bound notebook",
            "office",
            200,
            dec!(45.00),
            "MXN",
        ),
    ];

    for (name, description, kind, stock, price, currency) in products {
        let existing: Option<(Uuid,)> = sqlx::query_as("SELECT id FROM products WHERE name = $1")
            .bind(name)
            .fetch_optional(pool)
            .await?;
        if existing.is_some() {
            println!("Product already exists: {name}");
            continue;
        }

        sqlx::query(
            r#"
            INSERT INTO products (id, picture, name, description, "type", stock, price, currency)
            VALUES ($1, '', $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(name)
        .bind(description)
        .bind(kind)
        .bind(stock)
        .bind(price)
        .bind(currency)
        .execute(pool)
        .await?;

        println!("Seeded product: {name} - {price} {currency}");
    }

    Ok(())
}
