//! Cart store: one mutable line set per customer.
//!
//! Lines are rows keyed `(user_id, product_id)`, so concurrent first
//! access cannot create duplicate carts and increments are single atomic
//! upserts. Prices are never stored here; they are resolved when the cart
//! becomes an order.

use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::Router;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::auth::extract::CustomerOnly;
use crate::error::{ApiError, ApiResult, Json};
use crate::AppState;

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct CartLine {
    pub product_id: Uuid,
    pub quantity: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
struct CartView {
    user_id: Uuid,
    items: Vec<CartLine>,
}

#[derive(Debug, Serialize)]
struct CartTotals {
    item_count: usize,
    total_quantity: i64,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(current_cart))
        .route("/items", post(add_item))
        .route(
            "/items/:product_id",
            axum::routing::patch(update_item).delete(remove_item),
        )
}

async fn fetch_lines(db: &sqlx::PgPool, user_id: Uuid) -> ApiResult<Vec<CartLine>> {
    let lines = sqlx::query_as::<_, CartLine>(
        "SELECT product_id, quantity, created_at, updated_at FROM cart_items \
         WHERE user_id = $1 ORDER BY created_at",
    )
    .bind(user_id)
    .fetch_all(db)
    .await?;
    Ok(lines)
}

fn cart_body(message: &str, user_id: Uuid, items: Vec<CartLine>) -> axum::Json<Value> {
    let totals = CartTotals {
        item_count: items.len(),
        total_quantity: items.iter().map(|l| i64::from(l.quantity)).sum(),
    };
    axum::Json(json!({
        "message": message,
        "cart": CartView { user_id, items },
        "total": totals,
    }))
}

async fn current_cart(
    CustomerOnly(user): CustomerOnly,
    State(state): State<AppState>,
) -> ApiResult<axum::Json<Value>> {
    let items = fetch_lines(&state.db, user.id).await?;
    Ok(cart_body("Cart fetched", user.id, items))
}

#[derive(Debug, Deserialize)]
struct AddItemPayload {
    product_id: String,
    quantity: i64,
}

async fn add_item(
    CustomerOnly(user): CustomerOnly,
    State(state): State<AppState>,
    Json(payload): Json<AddItemPayload>,
) -> ApiResult<axum::Json<Value>> {
    let product_id = Uuid::parse_str(payload.product_id.trim())
        .map_err(|_| ApiError::invalid("invalid product_id"))?;
    if payload.quantity <= 0 {
        return Err(ApiError::invalid("quantity must be > 0"));
    }
    let quantity =
        i32::try_from(payload.quantity).map_err(|_| ApiError::invalid("quantity too large"))?;

    sqlx::query(
        "INSERT INTO cart_items (user_id, product_id, quantity) VALUES ($1, $2, $3) \
         ON CONFLICT (user_id, product_id) \
         DO UPDATE SET quantity = cart_items.quantity + EXCLUDED.quantity, updated_at = now()",
    )
    .bind(user.id)
    .bind(product_id)
    .bind(quantity)
    .execute(&state.db)
    .await?;

    let items = fetch_lines(&state.db, user.id).await?;
    Ok(cart_body("Item added to cart", user.id, items))
}

#[derive(Debug, Deserialize)]
struct SetQuantityPayload {
    quantity: Option<f64>,
}

async fn update_item(
    CustomerOnly(user): CustomerOnly,
    State(state): State<AppState>,
    Path(product_id): Path<Uuid>,
    Json(payload): Json<SetQuantityPayload>,
) -> ApiResult<axum::Json<Value>> {
    let Some(raw) = payload.quantity else {
        // no quantity: report the current line without mutating it
        let line = sqlx::query_as::<_, CartLine>(
            "SELECT product_id, quantity, created_at, updated_at FROM cart_items \
             WHERE user_id = $1 AND product_id = $2",
        )
        .bind(user.id)
        .bind(product_id)
        .fetch_optional(&state.db)
        .await?
        .ok_or_else(|| ApiError::not_found("item not found in cart"))?;
        return Ok(axum::Json(json!({ "message": "Item found", "item": line })));
    };

    if !raw.is_finite() || raw < 0.0 {
        return Err(ApiError::invalid("invalid quantity"));
    }
    let quantity = raw.trunc() as i64;

    if quantity == 0 {
        let result = sqlx::query("DELETE FROM cart_items WHERE user_id = $1 AND product_id = $2")
            .bind(user.id)
            .bind(product_id)
            .execute(&state.db)
            .await?;
        if result.rows_affected() == 0 {
            return Err(ApiError::not_found("item not found in cart"));
        }
        let items = fetch_lines(&state.db, user.id).await?;
        return Ok(cart_body("Item removed", user.id, items));
    }

    let quantity =
        i32::try_from(quantity).map_err(|_| ApiError::invalid("quantity too large"))?;
    let result = sqlx::query(
        "UPDATE cart_items SET quantity = $3, updated_at = now() \
         WHERE user_id = $1 AND product_id = $2",
    )
    .bind(user.id)
    .bind(product_id)
    .bind(quantity)
    .execute(&state.db)
    .await?;
    if result.rows_affected() == 0 {
        return Err(ApiError::not_found("item not found in cart"));
    }

    let items = fetch_lines(&state.db, user.id).await?;
    Ok(cart_body("Cart updated", user.id, items))
}

async fn remove_item(
    CustomerOnly(user): CustomerOnly,
    State(state): State<AppState>,
    Path(product_id): Path<Uuid>,
) -> ApiResult<axum::Json<Value>> {
    let result = sqlx::query("DELETE FROM cart_items WHERE user_id = $1 AND product_id = $2")
        .bind(user.id)
        .bind(product_id)
        .execute(&state.db)
        .await?;
    if result.rows_affected() == 0 {
        return Err(ApiError::not_found("item not found in cart"));
    }
    let items = fetch_lines(&state.db, user.id).await?;
    Ok(cart_body("Item removed from cart", user.id, items))
}
