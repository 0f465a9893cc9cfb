//! Admin order operations: filtered listing, CSV export, status and
//! payment overrides, forced cancel, hard delete.

use axum::extract::{Path, Query, State};
use axum::http::header;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, patch, post};
use axum::Router;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::auth::extract::AdminOnly;
use crate::domain::order::{OrderStatus, PaymentMethod, PaymentStatus};
use crate::error::{ApiError, ApiResult, Json};
use crate::{AppState, PageMeta};

use super::{
    apply_address_patch, cancel_guarded, payment_summary, restock_lines, timeline,
    AddressPatchPayload, Order,
};

/// Order row joined with the owning user's name and email.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct AdminOrderRow {
    #[sqlx(flatten)]
    #[serde(flatten)]
    pub order: Order,
    pub user_name: Option<String>,
    pub user_email: Option<String>,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_orders))
        .route("/export", get(export_orders))
        .route("/:id", get(get_order).delete(delete_order))
        .route("/:id/status", patch(update_status))
        .route("/:id/payment/collect", patch(collect_payment))
        .route("/:id/address", patch(update_address))
        .route("/:id/cancel", post(cancel_order))
}

#[derive(Debug, Deserialize)]
pub struct AdminListParams {
    page: Option<u32>,
    limit: Option<u32>,
    status: Option<String>,
    user: Option<String>,
    order_code: Option<String>,
    from: Option<String>,
    to: Option<String>,
    sort: Option<String>,
}

#[derive(Debug, Default)]
struct OrderFilters {
    status: Option<&'static str>,
    user_id: Option<Uuid>,
    order_code: Option<String>,
    from: Option<DateTime<Utc>>,
    to: Option<DateTime<Utc>>,
}

fn parse_bound(raw: &str) -> ApiResult<DateTime<Utc>> {
    if let Ok(stamp) = DateTime::parse_from_rfc3339(raw) {
        return Ok(stamp.with_timezone(&Utc));
    }
    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        if let Some(midnight) = date.and_hms_opt(0, 0, 0) {
            return Ok(midnight.and_utc());
        }
    }
    Err(ApiError::invalid(format!("invalid date bound: {raw}")))
}

impl OrderFilters {
    fn from_params(params: &AdminListParams) -> ApiResult<Self> {
        let status = params
            .status
            .as_deref()
            .filter(|s| !s.is_empty())
            .map(|raw| {
                OrderStatus::parse(raw)
                    .map(|s| s.as_str())
                    .ok_or_else(|| ApiError::invalid(format!("invalid status filter: {raw}")))
            })
            .transpose()?;
        Ok(Self {
            status,
            // non-UUID user values are silently ignored, not rejected
            user_id: params.user.as_deref().and_then(|u| Uuid::parse_str(u).ok()),
            order_code: params.order_code.clone().filter(|c| !c.is_empty()),
            from: params.from.as_deref().map(parse_bound).transpose()?,
            to: params.to.as_deref().map(parse_bound).transpose()?,
        })
    }
}

/// Sort expressions are whitelisted; anything else is rejected rather
/// than spliced into SQL.
fn sort_clause(raw: Option<&str>) -> ApiResult<&'static str> {
    match raw.unwrap_or("-created_at") {
        "created_at" => Ok("created_at ASC"),
        "-created_at" => Ok("created_at DESC"),
        "total_amount" => Ok("total_amount ASC"),
        "-total_amount" => Ok("total_amount DESC"),
        "status" => Ok("status ASC"),
        "-status" => Ok("status DESC"),
        "order_code" => Ok("order_code ASC"),
        "-order_code" => Ok("order_code DESC"),
        other => Err(ApiError::invalid(format!("unsupported sort: {other}"))),
    }
}

const JOINED_SELECT: &str = "SELECT o.*, u.full_name AS user_name, u.email AS user_email \
     FROM orders o LEFT JOIN users u ON u.id = o.user_id";
const FILTER_WHERE: &str = " WHERE ($1::text IS NULL OR o.status = $1) \
     AND ($2::uuid IS NULL OR o.user_id = $2) \
     AND ($3::text IS NULL OR o.order_code = $3) \
     AND ($4::timestamptz IS NULL OR o.created_at >= $4) \
     AND ($5::timestamptz IS NULL OR o.created_at <= $5)";

async fn filtered_rows(
    db: &sqlx::PgPool,
    filters: &OrderFilters,
    order_by: &str,
    limit_offset: Option<(u32, u32)>,
) -> ApiResult<Vec<AdminOrderRow>> {
    let mut sql = format!("{JOINED_SELECT}{FILTER_WHERE} ORDER BY o.{order_by}");
    if limit_offset.is_some() {
        sql.push_str(" LIMIT $6 OFFSET $7");
    }
    let mut query = sqlx::query_as::<_, AdminOrderRow>(&sql)
        .bind(filters.status)
        .bind(filters.user_id)
        .bind(&filters.order_code)
        .bind(filters.from)
        .bind(filters.to);
    if let Some((limit, page)) = limit_offset {
        query = query
            .bind(i64::from(limit))
            .bind(i64::from((page - 1) * limit));
    }
    Ok(query.fetch_all(db).await?)
}

async fn list_orders(
    AdminOnly(_admin): AdminOnly,
    State(state): State<AppState>,
    Query(params): Query<AdminListParams>,
) -> ApiResult<axum::Json<Value>> {
    let filters = OrderFilters::from_params(&params)?;
    let order_by = sort_clause(params.sort.as_deref())?;
    let page = params.page.unwrap_or(1).max(1);
    let limit = params.limit.unwrap_or(20).clamp(1, 100);

    let rows = filtered_rows(&state.db, &filters, order_by, Some((limit, page))).await?;
    let total: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM orders o{FILTER_WHERE}"))
        .bind(filters.status)
        .bind(filters.user_id)
        .bind(&filters.order_code)
        .bind(filters.from)
        .bind(filters.to)
        .fetch_one(&state.db)
        .await?;

    Ok(axum::Json(json!({
        "data": rows,
        "meta": PageMeta::new(page, limit, total),
    })))
}

async fn export_orders(
    AdminOnly(_admin): AdminOnly,
    State(state): State<AppState>,
    Query(params): Query<AdminListParams>,
) -> ApiResult<Response> {
    let filters = OrderFilters::from_params(&params)?;
    let rows = filtered_rows(&state.db, &filters, "created_at DESC", None).await?;
    let csv = super::export::write_csv(&rows).map_err(ApiError::Internal)?;
    let filename = format!("orders_export_{}.csv", Utc::now().timestamp_millis());
    Ok((
        [
            (header::CONTENT_TYPE, "text/csv".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{filename}\""),
            ),
        ],
        csv,
    )
        .into_response())
}

async fn fetch_joined(db: &sqlx::PgPool, id: Uuid) -> ApiResult<AdminOrderRow> {
    sqlx::query_as::<_, AdminOrderRow>(&format!("{JOINED_SELECT} WHERE o.id = $1"))
        .bind(id)
        .fetch_optional(db)
        .await?
        .ok_or_else(|| ApiError::not_found("order not found"))
}

async fn get_order(
    AdminOnly(_admin): AdminOnly,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<axum::Json<Value>> {
    let row = fetch_joined(&state.db, id).await?;
    Ok(axum::Json(json!({
        "order": &row,
        "timeline": timeline(&row.order),
        "payment_summary": payment_summary(&row.order),
    })))
}

#[derive(Debug, Deserialize)]
struct StatusPayload {
    status: String,
}

async fn update_status(
    AdminOnly(_admin): AdminOnly,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(payload): Json<StatusPayload>,
) -> ApiResult<axum::Json<Value>> {
    let target = OrderStatus::parse(payload.status.trim()).ok_or_else(|| {
        let allowed: Vec<&str> = OrderStatus::ALL.iter().map(|s| s.as_str()).collect();
        ApiError::invalid(format!("invalid status, allowed: {}", allowed.join(", ")))
    })?;

    let mut tx = state.db.begin().await?;
    let order = sqlx::query_as::<_, Order>("SELECT * FROM orders WHERE id = $1 FOR UPDATE")
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| ApiError::not_found("order not found"))?;

    if order.parsed_status()? == target {
        return Ok(axum::Json(json!({
            "message": "Status unchanged",
            "order": order,
        })));
    }

    let order = sqlx::query_as::<_, Order>(
        "UPDATE orders SET status = $2, updated_at = now() WHERE id = $1 RETURNING *",
    )
    .bind(id)
    .bind(target.as_str())
    .fetch_one(&mut *tx)
    .await?;
    tx.commit().await?;

    if target == OrderStatus::Cancelled {
        restock_lines(&state.db, &order).await;
        return Ok(axum::Json(json!({
            "message": "Order cancelled by admin",
            "order": order,
        })));
    }

    Ok(axum::Json(json!({
        "message": "Order status updated",
        "order": order,
    })))
}

async fn collect_payment(
    AdminOnly(_admin): AdminOnly,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<axum::Json<Value>> {
    let mut tx = state.db.begin().await?;
    let order = sqlx::query_as::<_, Order>("SELECT * FROM orders WHERE id = $1 FOR UPDATE")
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| ApiError::not_found("order not found"))?;

    if PaymentMethod::parse(&order.payment_method).is_none() {
        return Err(ApiError::invalid("order is not COD"));
    }
    if order.parsed_status()? == OrderStatus::Cancelled {
        return Err(ApiError::conflict(
            "cannot collect payment for a cancelled order",
        ));
    }
    if PaymentStatus::parse(&order.payment_status) == Some(PaymentStatus::Collected) {
        return Ok(axum::Json(json!({
            "message": "Payment already collected",
            "order": order,
        })));
    }

    let order = sqlx::query_as::<_, Order>(
        "UPDATE orders SET payment_status = $2, payment_collected_at = now(), \
         updated_at = now() WHERE id = $1 RETURNING *",
    )
    .bind(id)
    .bind(PaymentStatus::Collected.as_str())
    .fetch_one(&mut *tx)
    .await?;
    tx.commit().await?;

    Ok(axum::Json(json!({
        "message": "COD marked as collected",
        "order": order,
    })))
}

async fn update_address(
    AdminOnly(_admin): AdminOnly,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(payload): Json<AddressPatchPayload>,
) -> ApiResult<axum::Json<Value>> {
    let order = apply_address_patch(&state, id, None, payload.shipping_address).await?;
    Ok(axum::Json(json!({
        "message": "Order address updated",
        "order": order,
    })))
}

async fn cancel_order(
    AdminOnly(_admin): AdminOnly,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<axum::Json<Value>> {
    let order = cancel_guarded(&state.db, id, None).await?;
    restock_lines(&state.db, &order).await;
    Ok(axum::Json(json!({
        "message": "Order cancelled by admin",
        "order": order,
    })))
}

async fn delete_order(
    AdminOnly(_admin): AdminOnly,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<axum::Json<Value>> {
    let order = sqlx::query_as::<_, Order>("DELETE FROM orders WHERE id = $1 RETURNING *")
        .bind(id)
        .fetch_optional(&state.db)
        .await?
        .ok_or_else(|| ApiError::not_found("order not found"))?;
    Ok(axum::Json(json!({ "message": "Order deleted", "order": order })))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sort_whitelist() {
        assert_eq!(sort_clause(None).unwrap(), "created_at DESC");
        assert_eq!(sort_clause(Some("total_amount")).unwrap(), "total_amount ASC");
        assert_eq!(sort_clause(Some("-order_code")).unwrap(), "order_code DESC");
        assert!(sort_clause(Some("password_hash")).is_err());
        assert!(sort_clause(Some("created_at; DROP TABLE orders")).is_err());
    }

    #[test]
    fn test_date_bounds() {
        let day = parse_bound("2026-03-01").unwrap();
        assert_eq!(day.to_rfc3339(), "2026-03-01T00:00:00+00:00");
        let stamp = parse_bound("2026-03-01T10:30:00+06:00").unwrap();
        assert_eq!(stamp.to_rfc3339(), "2026-03-01T04:30:00+00:00");
        assert!(parse_bound("yesterday").is_err());
    }

    #[test]
    fn test_filters_ignore_bad_user_reject_bad_status() {
        let params = AdminListParams {
            page: None,
            limit: None,
            status: Some("CONFIRMED".into()),
            user: Some("not-a-uuid".into()),
            order_code: None,
            from: None,
            to: None,
            sort: None,
        };
        let filters = OrderFilters::from_params(&params).unwrap();
        assert_eq!(filters.status, Some("CONFIRMED"));
        assert_eq!(filters.user_id, None);

        let params = AdminListParams {
            status: Some("REFUNDED".into()),
            ..params
        };
        assert!(OrderFilters::from_params(&params).is_err());
    }
}
