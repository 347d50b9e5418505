use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::models::Product;

#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateProductRequest {
    pub picture: Option<String>,
    pub name: String,
    pub description: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub stock: i32,
    pub price: Decimal,
    pub currency: String,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct UpdateProductRequest {
    pub picture: Option<String>,
    pub name: Option<String>,
    pub description: Option<String>,
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub stock: Option<i32>,
    pub price: Option<Decimal>,
    pub currency: Option<String>,
}

#[derive(Serialize, ToSchema)]
pub struct ProductList {
    pub items: Vec<Product>,
}
