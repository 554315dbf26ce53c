use axum::{
    Json, Router,
    extract::{Path, rejection::JsonRejection},
    response::IntoResponse,
    routing::{get, post},
};
use serde::Deserialize;

use crate::tracker::api::ApiError;

use super::cart::{Cart, CartItem, PRODUCTS, product_by_id};

#[derive(Debug, Deserialize)]
pub struct CartRequest {
    #[serde(default)]
    pub items: Vec<CartItem>,
    #[serde(default)]
    pub discount: f64,
    #[serde(default)]
    pub tax: f64,
}

impl CartRequest {
    fn validate(&self) -> Result<(), ApiError> {
        if !(0.0..=1.0).contains(&self.discount) {
            return Err(ApiError::BadRequest(format!(
                "discount must be between 0 and 1, got {}",
                self.discount
            )));
        }
        if !self.tax.is_finite() || self.tax < 0.0 {
            return Err(ApiError::BadRequest(format!(
                "tax must be a non-negative rate, got {}",
                self.tax
            )));
        }
        if let Some(item) = self
            .items
            .iter()
            .find(|item| !item.price.is_finite() || item.price < 0.0)
        {
            return Err(ApiError::BadRequest(format!(
                "item price must be non-negative, got {}",
                item.price
            )));
        }
        Ok(())
    }
}

/// Routes mounted under `/api/shop`.
pub fn shop_router<S>() -> Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    Router::new()
        .route("/products", get(list_products))
        .route("/products/{id}", get(get_product))
        .route("/cart/calculate", post(calculate_cart))
}

async fn list_products() -> impl IntoResponse {
    Json(serde_json::json!({"products": PRODUCTS}))
}

async fn get_product(Path(id): Path<i64>) -> Result<impl IntoResponse, ApiError> {
    product_by_id(id)
        .map(Json)
        .ok_or_else(|| ApiError::NotFound("Product not found".to_string()))
}

async fn calculate_cart(
    payload: Result<Json<CartRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(req) = payload?;
    req.validate()?;

    let mut cart = Cart::new();
    for item in &req.items {
        cart.add_item(item.price, item.qty);
    }
    let totals = cart.calculate_total(req.discount, req.tax);
    tracing::debug!(items = totals.items_count, total = totals.total, "Cart calculated");
    Ok(Json(totals))
}
