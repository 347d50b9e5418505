use utoipa::{
    Modify, OpenApi,
    openapi::{
        self,
        OpenApi as OpenApiSpec,
        security::{HttpAuthScheme, HttpBuilder, SecurityScheme},
    },
};
use utoipa_scalar::{Scalar, Servable};

use crate::{
    dto::{
        auth::{LoginRequest, LoginResponse},
        orders::{
            CheckoutCreated, CreateOrderRequest, OrderList, PaymentCheckResponse, StatusResponse,
            StatusUpdateResponse, UpdateOrderStatusRequest,
        },
        products::{CreateProductRequest, ProductList, UpdateProductRequest},
    },
    models::{Order, Product, ProductSummary},
    response::{ApiResponse, Meta},
    routes::{auth, health, orders, params, products, webhook},
};

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut openapi::OpenApi) {
        let components = openapi.components.get_or_insert_with(Default::default);
        components.add_security_scheme(
            "bearer_auth",
            SecurityScheme::Http(
                HttpBuilder::new()
                    .scheme(HttpAuthScheme::Bearer)
                    .bearer_format("JWT")
                    .build(),
            ),
        );
    }
}

#[derive(OpenApi)]
#[openapi(
    paths(
        health::health_check,
        auth::login,
        products::list_products,
        products::get_product,
        products::create_product,
        products::update_product,
        products::delete_product,
        orders::create_order,
        orders::list_orders,
        orders::get_order,
        orders::order_status,
        orders::update_order_status,
        orders::payment_check,
        orders::order_success,
        orders::order_cancel,
        webhook::payment_webhook
    ),
    components(
        schemas(
            Product,
            ProductSummary,
            Order,
            CreateProductRequest,
            UpdateProductRequest,
            ProductList,
            CreateOrderRequest,
            CheckoutCreated,
            OrderList,
            StatusResponse,
            UpdateOrderStatusRequest,
            StatusUpdateResponse,
            PaymentCheckResponse,
            LoginRequest,
            LoginResponse,
            health::HealthData,
            orders::SuccessPageQuery,
            params::Pagination,
            params::ProductQuery,
            params::OrderListQuery,
            Meta,
            ApiResponse<Product>,
            ApiResponse<ProductList>,
            ApiResponse<Order>,
            ApiResponse<OrderList>,
            ApiResponse<CheckoutCreated>,
            ApiResponse<StatusResponse>,
            ApiResponse<StatusUpdateResponse>,
            ApiResponse<PaymentCheckResponse>
        )
    ),
    security(
        ("bearer_auth" = [])
    ),
    modifiers(&SecurityAddon),
    tags(
        (name = "Health", description = "Health check endpoint"),
        (name = "Auth", description = "Operator authentication"),
        (name = "Products", description = "Product catalog endpoints"),
        (name = "Orders", description = "Order lifecycle endpoints"),
        (name = "Payments", description = "Checkout provider callbacks"),
    )
)]
pub struct ApiDoc;

pub fn scalar_docs() -> Scalar<OpenApiSpec> {
    Scalar::with_url("/docs", ApiDoc::openapi())
}
