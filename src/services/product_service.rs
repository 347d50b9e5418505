use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use chrono::Utc;
use sea_orm::ActiveValue::NotSet;
use sea_orm::sea_query::Expr;
use sea_orm::sea_query::extension::postgres::PgExpr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, ConnectionTrait, EntityTrait, PaginatorTrait,
    QueryFilter, QueryOrder, QuerySelect, Set,
};
use uuid::Uuid;

use crate::{
    audit::log_audit,
    dto::products::{CreateProductRequest, ProductList, UpdateProductRequest},
    entity::products::{ActiveModel, Column, Entity as Products, Model as ProductModel},
    error::{AppError, AppResult},
    middleware::auth::{AuthUser, ensure_admin},
    models::{Product, ProductSummary},
    response::{ApiResponse, Meta},
    routes::params::{ProductQuery, ProductSortBy, SortOrder},
    state::AppState,
};

/// Result of a conditional stock decrement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StockConsumption {
    Consumed,
    Insufficient,
}

/// Decrement stock by `quantity` if and only if enough is available, in a
/// single conditional statement. Callers decide what Insufficient means;
/// the reconciliation engine treats it as a warning, never a failure.
pub async fn consume_stock<C: ConnectionTrait>(
    conn: &C,
    product_id: Uuid,
    quantity: i32,
) -> AppResult<StockConsumption> {
    if quantity <= 0 {
        return Err(AppError::BadRequest("quantity must be positive".into()));
    }

    let result = Products::update_many()
        .col_expr(Column::Stock, Expr::col(Column::Stock).sub(quantity))
        .col_expr(Column::UpdatedAt, Expr::value(Utc::now()))
        .filter(Column::Id.eq(product_id))
        .filter(Column::Stock.gte(quantity))
        .exec(conn)
        .await?;

    Ok(if result.rows_affected == 0 {
        StockConsumption::Insufficient
    } else {
        StockConsumption::Consumed
    })
}

pub async fn list_products(
    state: &AppState,
    query: ProductQuery,
) -> AppResult<ApiResponse<ProductList>> {
    let (page, limit, offset) = query.pagination.normalize();
    let mut condition = Condition::all();

    if let Some(search) = query.q.as_ref().filter(|s| !s.is_empty()) {
        let pattern = format!("%{}%", search);
        condition = condition.add(
            Condition::any()
                .add(Expr::col(Column::Name).ilike(pattern.clone()))
                .add(Expr::col(Column::Description).ilike(pattern)),
        );
    }

    if let Some(min_price) = query.min_price {
        condition = condition.add(Column::Price.gte(min_price));
    }

    if let Some(max_price) = query.max_price {
        condition = condition.add(Column::Price.lte(max_price));
    }

    let sort_by = query.sort_by.unwrap_or(ProductSortBy::CreatedAt);
    let sort_order = query.sort_order.unwrap_or(SortOrder::Desc);
    let sort_col = match sort_by {
        ProductSortBy::CreatedAt => Column::CreatedAt,
        ProductSortBy::Price => Column::Price,
        ProductSortBy::Name => Column::Name,
    };

    let mut finder = Products::find().filter(condition);
    finder = match sort_order {
        SortOrder::Asc => finder.order_by_asc(sort_col),
        SortOrder::Desc => finder.order_by_desc(sort_col),
    };

    let total = finder.clone().count(&state.orm).await? as i64;

    let items = finder
        .limit(limit as u64)
        .offset(offset as u64)
        .all(&state.orm)
        .await?
        .into_iter()
        .map(product_from_entity)
        .collect();

    let meta = Meta::new(page, limit, total);
    let data = ProductList { items };
    Ok(ApiResponse::success("Products", data, Some(meta)))
}

pub async fn get_product(state: &AppState, id: Uuid) -> AppResult<ApiResponse<Product>> {
    let result = Products::find_by_id(id)
        .one(&state.orm)
        .await?
        .map(product_from_entity);
    let result = match result {
        Some(p) => p,
        None => return Err(AppError::NotFound),
    };
    Ok(ApiResponse::success("Product", result, None))
}

pub async fn create_product(
    state: &AppState,
    user: &AuthUser,
    payload: CreateProductRequest,
) -> AppResult<ApiResponse<Product>> {
    ensure_admin(user)?;

    if payload.stock < 0 {
        return Err(AppError::BadRequest("stock cannot be negative".into()));
    }
    if payload.price.is_sign_negative() {
        return Err(AppError::BadRequest("price cannot be negative".into()));
    }
    let picture = payload.picture.unwrap_or_default();
    validate_picture(&picture)?;

    let id = Uuid::new_v4();
    let active = ActiveModel {
        id: Set(id),
        picture: Set(picture),
        name: Set(payload.name),
        description: Set(payload.description),
        kind: Set(payload.kind),
        stock: Set(payload.stock),
        price: Set(payload.price),
        currency: Set(payload.currency),
        created_at: NotSet,
        updated_at: NotSet,
    };
    let product = active.insert(&state.orm).await?;

    if let Err(err) = log_audit(
        &state.pool,
        Some(&user.username),
        "product_create",
        Some("products"),
        Some(serde_json::json!({ "product_id": product.id })),
    )
    .await
    {
        tracing::warn!(error = %err, "audit log failed");
    }

    Ok(ApiResponse::success(
        "Product created",
        product_from_entity(product),
        Some(Meta::empty()),
    ))
}

pub async fn update_product(
    state: &AppState,
    user: &AuthUser,
    id: Uuid,
    payload: UpdateProductRequest,
) -> AppResult<ApiResponse<Product>> {
    ensure_admin(user)?;
    let existing = Products::find_by_id(id).one(&state.orm).await?;
    let existing = match existing {
        Some(p) => p,
        None => return Err(AppError::NotFound),
    };

    let mut active: ActiveModel = existing.into();
    if let Some(picture) = payload.picture {
        validate_picture(&picture)?;
        active.picture = Set(picture);
    }
    if let Some(name) = payload.name {
        active.name = Set(name);
    }
    if let Some(description) = payload.description {
        active.description = Set(description);
    }
    if let Some(kind) = payload.kind {
        active.kind = Set(kind);
    }
    if let Some(stock) = payload.stock {
        if stock < 0 {
            return Err(AppError::BadRequest("stock cannot be negative".into()));
        }
        active.stock = Set(stock);
    }
    if let Some(price) = payload.price {
        if price.is_sign_negative() {
            return Err(AppError::BadRequest("price cannot be negative".into()));
        }
        active.price = Set(price);
    }
    if let Some(currency) = payload.currency {
        active.currency = Set(currency);
    }
    active.updated_at = Set(Utc::now().into());

    let product = active.update(&state.orm).await?;

    if let Err(err) = log_audit(
        &state.pool,
        Some(&user.username),
        "product_update",
        Some("products"),
        Some(serde_json::json!({ "product_id": product.id })),
    )
    .await
    {
        tracing::warn!(error = %err, "audit log failed");
    }

    Ok(ApiResponse::success(
        "Updated",
        product_from_entity(product),
        Some(Meta::empty()),
    ))
}

pub async fn delete_product(
    state: &AppState,
    user: &AuthUser,
    id: Uuid,
) -> AppResult<ApiResponse<serde_json::Value>> {
    ensure_admin(user)?;
    let result = Products::delete_by_id(id).exec(&state.orm).await?;

    if result.rows_affected == 0 {
        return Err(AppError::NotFound);
    }

    if let Err(err) = log_audit(
        &state.pool,
        Some(&user.username),
        "product_delete",
        Some("products"),
        Some(serde_json::json!({ "product_id": id })),
    )
    .await
    {
        tracing::warn!(error = %err, "audit log failed");
    }

    Ok(ApiResponse::success(
        "Deleted",
        serde_json::json!({}),
        Some(Meta::empty()),
    ))
}

/// Pictures travel as base64 data-URLs; reject anything else up front.
fn validate_picture(picture: &str) -> AppResult<()> {
    if picture.trim().is_empty() {
        return Ok(());
    }
    if !picture.starts_with("data:image/") {
        return Err(AppError::BadRequest(
            "Picture must be a base64 image starting with 'data:image/'".into(),
        ));
    }
    let encoded = picture
        .split_once(',')
        .map(|(_, data)| data)
        .ok_or_else(|| AppError::BadRequest("Invalid base64 image format".into()))?;
    BASE64
        .decode(encoded)
        .map_err(|_| AppError::BadRequest("Invalid base64 image data".into()))?;
    Ok(())
}

pub fn product_from_entity(model: ProductModel) -> Product {
    Product {
        id: model.id,
        picture: model.picture,
        name: model.name,
        description: model.description,
        kind: model.kind,
        stock: model.stock,
        price: model.price,
        currency: model.currency,
        created_at: model.created_at.with_timezone(&Utc),
        updated_at: model.updated_at.with_timezone(&Utc),
    }
}

pub fn product_summary_from_entity(model: &ProductModel) -> ProductSummary {
    ProductSummary {
        id: model.id,
        name: model.name.clone(),
        price: model.price,
        currency: model.currency.clone(),
        stock: model.stock,
    }
}

#[cfg(test)]
mod tests {
    use super::validate_picture;

    #[test]
    fn empty_picture_is_accepted() {
        assert!(validate_picture("").is_ok());
        assert!(validate_picture("   ").is_ok());
    }

    #[test]
    fn valid_data_url_is_accepted() {
        // 1x1 transparent PNG, truncated is fine as long as base64 decodes.
        assert!(validate_picture("data:image/png;base64,iVBORw0KGgo=").is_ok());
    }

    #[test]
    fn non_data_url_is_rejected() {
        assert!(validate_picture("https://example.com/cat.png").is_err());
    }

    #[test]
    fn bad_base64_is_rejected() {
        assert!(validate_picture("data:image/png;base64,not!!valid??").is_err());
        assert!(validate_picture("data:image/png;base64").is_err());
    }
}
