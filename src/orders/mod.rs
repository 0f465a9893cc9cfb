//! Order lifecycle engine.
//!
//! An order is an immutable snapshot of the cart at creation time. Stock
//! is debited atomically inside the creation transaction, so two
//! checkouts can never both take the last unit. Cancellation restocks
//! best-effort: a failed line is logged and the cancel stands.

pub mod admin;
pub mod export;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::Router;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use uuid::Uuid;

use crate::auth::extract::CustomerOnly;
use crate::domain::money::{Currency, Money};
use crate::domain::order::{
    cancel_refusal, generate_order_code, snapshot_lines, CancelRefusal, OrderLine, OrderStatus,
    PaymentMethod, ProductSnapshot, SnapshotError,
};
use crate::domain::Address;
use crate::error::{ApiError, ApiResult, Json};
use crate::{AppState, PageMeta};

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Order {
    pub id: Uuid,
    pub order_code: String,
    pub user_id: Uuid,
    pub items: sqlx::types::Json<Vec<OrderLine>>,
    pub status: String,
    pub total_amount: i64,
    pub total_currency: String,
    pub shipping_address: sqlx::types::Json<Address>,
    pub payment_method: String,
    pub payment_status: String,
    pub payment_collected_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    pub fn parsed_status(&self) -> ApiResult<OrderStatus> {
        OrderStatus::parse(&self.status).ok_or_else(|| {
            ApiError::Internal(anyhow::anyhow!(
                "order {} carries unknown status {}",
                self.id,
                self.status
            ))
        })
    }
}

pub(crate) fn timeline(order: &Order) -> Value {
    json!([
        { "status": "CREATED", "at": order.created_at },
        { "status": order.status, "at": order.updated_at },
    ])
}

pub(crate) fn payment_summary(order: &Order) -> Value {
    json!({
        "method": order.payment_method,
        "status": order.payment_status,
        "total": order.total_amount,
        "currency": order.total_currency,
        "collected_at": order.payment_collected_at,
    })
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", post(create_order))
        .route("/me", get(my_orders))
        .route("/:id", get(get_order))
        .route("/:id/cancel", post(cancel_order))
        .route("/:id/address", axum::routing::patch(update_address))
}

#[derive(Debug, Deserialize)]
struct CreateOrderPayload {
    shipping_address: Option<Address>,
}

const CODE_ATTEMPTS: usize = 5;

async fn create_order(
    CustomerOnly(user): CustomerOnly,
    State(state): State<AppState>,
    payload: Option<Json<CreateOrderPayload>>,
) -> ApiResult<(StatusCode, axum::Json<Value>)> {
    let shipping_address = payload
        .and_then(|Json(p)| p.shipping_address)
        .map(Address::normalized)
        .or_else(|| user.shipping_address.map(|stored| stored.0))
        .ok_or_else(|| {
            ApiError::invalid(
                "shipping_address is required in the request body or saved on the user",
            )
        })?;
    state
        .address_policy
        .validate(&shipping_address)
        .map_err(ApiError::InvalidArgument)?;

    let mut tx = state.db.begin().await?;

    let cart: Vec<(Uuid, i32)> = sqlx::query_as(
        "SELECT product_id, quantity FROM cart_items WHERE user_id = $1 ORDER BY created_at",
    )
    .bind(user.id)
    .fetch_all(&mut *tx)
    .await?;
    if cart.is_empty() {
        return Err(ApiError::invalid("cart is empty"));
    }
    let cart: Vec<(Uuid, u32)> = cart
        .into_iter()
        .map(|(id, qty)| (id, qty.unsigned_abs()))
        .collect();

    // Row locks are taken line by line; stock read here cannot change
    // until the transaction ends.
    let mut products = HashMap::with_capacity(cart.len());
    for (product_id, _) in &cart {
        let row: Option<(String, i64, String, i32)> = sqlx::query_as(
            "SELECT title, price_amount, price_currency, stock FROM products \
             WHERE id = $1 FOR UPDATE",
        )
        .bind(product_id)
        .fetch_optional(&mut *tx)
        .await?;
        if let Some((title, amount, currency, stock)) = row {
            let currency = Currency::parse(&currency).ok_or_else(|| {
                ApiError::Internal(anyhow::anyhow!(
                    "product {product_id} carries unknown currency {currency}"
                ))
            })?;
            products.insert(
                *product_id,
                ProductSnapshot {
                    title,
                    price: Money::new(amount, currency),
                    stock: i64::from(stock),
                },
            );
        }
    }

    let (lines, total) = snapshot_lines(&cart, &products).map_err(|err| match err {
        SnapshotError::EmptyCart => ApiError::invalid("cart is empty"),
        SnapshotError::MissingProduct(id) => ApiError::invalid(format!("product {id} not found")),
        SnapshotError::OutOfStock(id) => ApiError::conflict(format!("product {id} out of stock")),
        SnapshotError::MixedCurrencies => ApiError::conflict("cart lines have mixed currencies"),
        SnapshotError::Overflow => ApiError::invalid("order total overflows"),
    })?;

    for line in &lines {
        let debited = sqlx::query(
            "UPDATE products SET stock = stock - $2, sold = sold + $2, updated_at = now() \
             WHERE id = $1 AND stock >= $2",
        )
        .bind(line.product_id)
        .bind(line.quantity as i32)
        .execute(&mut *tx)
        .await?;
        if debited.rows_affected() == 0 {
            return Err(ApiError::conflict(format!(
                "product {} out of stock",
                line.product_id
            )));
        }
    }

    let mut order = None;
    for _ in 0..CODE_ATTEMPTS {
        let code = generate_order_code(Utc::now());
        let inserted = sqlx::query_as::<_, Order>(
            "INSERT INTO orders \
             (id, order_code, user_id, items, status, total_amount, total_currency, \
              shipping_address, payment_method, payment_status) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10) \
             ON CONFLICT (order_code) DO NOTHING RETURNING *",
        )
        .bind(Uuid::now_v7())
        .bind(&code)
        .bind(user.id)
        .bind(sqlx::types::Json(&lines))
        .bind(OrderStatus::Pending.as_str())
        .bind(total.amount)
        .bind(total.currency.as_str())
        .bind(sqlx::types::Json(&shipping_address))
        .bind(PaymentMethod::Cod.as_str())
        .bind(crate::domain::PaymentStatus::Pending.as_str())
        .fetch_optional(&mut *tx)
        .await?;
        if let Some(row) = inserted {
            order = Some(row);
            break;
        }
    }
    let order = order.ok_or_else(|| {
        ApiError::Internal(anyhow::anyhow!(
            "could not allocate a unique order code after {CODE_ATTEMPTS} attempts"
        ))
    })?;

    // the cart is consumed by the order
    sqlx::query("DELETE FROM cart_items WHERE user_id = $1")
        .bind(user.id)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;

    Ok((StatusCode::CREATED, axum::Json(json!({ "order": order }))))
}

#[derive(Debug, Deserialize)]
struct PageParams {
    page: Option<u32>,
    limit: Option<u32>,
}

async fn my_orders(
    CustomerOnly(user): CustomerOnly,
    State(state): State<AppState>,
    Query(params): Query<PageParams>,
) -> ApiResult<axum::Json<Value>> {
    let page = params.page.unwrap_or(1).max(1);
    let limit = params.limit.unwrap_or(10).clamp(1, 100);

    let orders = sqlx::query_as::<_, Order>(
        "SELECT * FROM orders WHERE user_id = $1 ORDER BY created_at DESC LIMIT $2 OFFSET $3",
    )
    .bind(user.id)
    .bind(i64::from(limit))
    .bind(i64::from((page - 1) * limit))
    .fetch_all(&state.db)
    .await?;
    let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM orders WHERE user_id = $1")
        .bind(user.id)
        .fetch_one(&state.db)
        .await?;

    Ok(axum::Json(json!({
        "data": orders,
        "meta": PageMeta::new(page, limit, total),
    })))
}

async fn get_order(
    CustomerOnly(user): CustomerOnly,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<axum::Json<Value>> {
    let order = sqlx::query_as::<_, Order>("SELECT * FROM orders WHERE id = $1 AND user_id = $2")
        .bind(id)
        .bind(user.id)
        .fetch_optional(&state.db)
        .await?
        .ok_or_else(|| ApiError::not_found("order not found"))?;

    Ok(axum::Json(json!({
        "order": order,
        "timeline": timeline(&order),
        "payment_summary": payment_summary(&order),
    })))
}

/// Cancels an order if it is still open. `owner` scopes the lookup for
/// customer-initiated cancels; admins pass `None`.
pub(crate) async fn cancel_guarded(
    db: &sqlx::PgPool,
    id: Uuid,
    owner: Option<Uuid>,
) -> ApiResult<Order> {
    let mut tx = db.begin().await?;
    let order = sqlx::query_as::<_, Order>(
        "SELECT * FROM orders WHERE id = $1 AND ($2::uuid IS NULL OR user_id = $2) FOR UPDATE",
    )
    .bind(id)
    .bind(owner)
    .fetch_optional(&mut *tx)
    .await?
    .ok_or_else(|| ApiError::not_found("order not found"))?;

    match cancel_refusal(order.parsed_status()?) {
        Some(CancelRefusal::AlreadyCancelled) => {
            return Err(ApiError::conflict("order already cancelled"));
        }
        Some(CancelRefusal::NotCancelable) => {
            return Err(ApiError::conflict("order not cancelable at this stage"));
        }
        None => {}
    }

    let order = sqlx::query_as::<_, Order>(
        "UPDATE orders SET status = $2, updated_at = now() WHERE id = $1 RETURNING *",
    )
    .bind(id)
    .bind(OrderStatus::Cancelled.as_str())
    .fetch_one(&mut *tx)
    .await?;
    tx.commit().await?;
    Ok(order)
}

/// Best-effort restock after a cancellation. Runs outside the cancel
/// transaction on purpose: a failed line must not roll the cancel back,
/// and sibling lines are unaffected.
pub(crate) async fn restock_lines(db: &sqlx::PgPool, order: &Order) {
    for line in &order.items.0 {
        let Ok(quantity) = i32::try_from(line.quantity) else {
            tracing::warn!(product_id = %line.product_id, "restock quantity out of range");
            continue;
        };
        let result = sqlx::query(
            "UPDATE products SET stock = stock + $2, sold = GREATEST(sold - $2, 0), \
             updated_at = now() WHERE id = $1",
        )
        .bind(line.product_id)
        .bind(quantity)
        .execute(db)
        .await;
        match result {
            Ok(done) if done.rows_affected() == 0 => {
                tracing::warn!(product_id = %line.product_id, "failed to restock: product missing");
            }
            Ok(_) => {}
            Err(err) => {
                tracing::warn!(product_id = %line.product_id, error = ?err, "failed to restock");
            }
        }
    }
}

async fn cancel_order(
    CustomerOnly(user): CustomerOnly,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<axum::Json<Value>> {
    let order = cancel_guarded(&state.db, id, Some(user.id)).await?;
    restock_lines(&state.db, &order).await;
    Ok(axum::Json(json!({ "message": "Order cancelled", "order": order })))
}

#[derive(Debug, Deserialize)]
pub(crate) struct AddressPatchPayload {
    pub shipping_address: Option<Address>,
}

/// Merges an address patch into an open order. Shared by the owner and
/// admin routes; both enforce the PENDING/CONFIRMED guard.
pub(crate) async fn apply_address_patch(
    state: &AppState,
    id: Uuid,
    owner: Option<Uuid>,
    patch: Option<Address>,
) -> ApiResult<Order> {
    let mut tx = state.db.begin().await?;
    let order = sqlx::query_as::<_, Order>(
        "SELECT * FROM orders WHERE id = $1 AND ($2::uuid IS NULL OR user_id = $2) FOR UPDATE",
    )
    .bind(id)
    .bind(owner)
    .fetch_optional(&mut *tx)
    .await?
    .ok_or_else(|| ApiError::not_found("order not found"))?;

    if !order.parsed_status()?.is_open() {
        return Err(ApiError::conflict(
            "order address cannot be updated at this stage",
        ));
    }

    let merged = order
        .shipping_address
        .0
        .merged_with(patch.unwrap_or_default());
    state
        .address_policy
        .validate(&merged)
        .map_err(ApiError::InvalidArgument)?;

    let order = sqlx::query_as::<_, Order>(
        "UPDATE orders SET shipping_address = $2, updated_at = now() WHERE id = $1 RETURNING *",
    )
    .bind(id)
    .bind(sqlx::types::Json(merged))
    .fetch_one(&mut *tx)
    .await?;
    tx.commit().await?;
    Ok(order)
}

async fn update_address(
    CustomerOnly(user): CustomerOnly,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(payload): Json<AddressPatchPayload>,
) -> ApiResult<axum::Json<Value>> {
    let order = apply_address_patch(&state, id, Some(user.id), payload.shipping_address).await?;
    Ok(axum::Json(json!({ "message": "Address updated", "order": order })))
}
