//! Product catalog: admin-managed products, public reads, reviews.

pub mod form;

use axum::extract::{Multipart, Path, Query, State};
use axum::http::StatusCode;
use axum::routing::get;
use axum::Router;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;
use validator::Validate;

use crate::auth::extract::{AdminOnly, CurrentUser};
use crate::domain::review::rating_summary;
use crate::domain::Money;
use crate::error::{ApiError, ApiResult, Json};
use crate::images::StoredImage;
use crate::{AppState, PageMeta};

use form::{read_product_form, ProductForm, MAX_IMAGES};

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Product {
    pub id: Uuid,
    pub title: String,
    pub description: String,
    pub specification: Value,
    pub price_amount: i64,
    pub price_currency: String,
    pub category: String,
    pub stock: i32,
    pub sold: i32,
    pub images: sqlx::types::Json<Vec<StoredImage>>,
    pub average_rating: f64,
    pub review_count: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Review {
    pub id: Uuid,
    pub product_id: Uuid,
    pub user_id: Uuid,
    pub rating: i16,
    pub comment: String,
    pub created_at: DateTime<Utc>,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_products).post(create_product))
        .route("/category/:name", get(list_by_category))
        .route(
            "/:id",
            get(get_product).put(update_product).delete(delete_product),
        )
        .route("/:id/reviews", get(list_reviews).post(add_review))
        .route(
            "/:id/reviews/:review_id",
            axum::routing::delete(delete_review),
        )
}

#[derive(Debug, Deserialize)]
struct ListParams {
    page: Option<u32>,
    limit: Option<u32>,
    search: Option<String>,
    category: Option<String>,
}

async fn page_of_products(
    db: &sqlx::PgPool,
    page: u32,
    limit: u32,
    search: Option<&str>,
    category: Option<&str>,
) -> ApiResult<(Vec<Product>, i64)> {
    let offset = i64::from((page - 1) * limit);
    let products = sqlx::query_as::<_, Product>(
        "SELECT * FROM products \
         WHERE ($1::text IS NULL OR category = $1) \
         AND ($2::text IS NULL OR title ILIKE '%' || $2 || '%' OR description ILIKE '%' || $2 || '%') \
         ORDER BY created_at DESC LIMIT $3 OFFSET $4",
    )
    .bind(category)
    .bind(search)
    .bind(i64::from(limit))
    .bind(offset)
    .fetch_all(db)
    .await?;

    let total: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM products \
         WHERE ($1::text IS NULL OR category = $1) \
         AND ($2::text IS NULL OR title ILIKE '%' || $2 || '%' OR description ILIKE '%' || $2 || '%')",
    )
    .bind(category)
    .bind(search)
    .fetch_one(db)
    .await?;

    Ok((products, total))
}

async fn list_products(
    State(state): State<AppState>,
    Query(params): Query<ListParams>,
) -> ApiResult<axum::Json<Value>> {
    let page = params.page.unwrap_or(1).max(1);
    let limit = params.limit.unwrap_or(10).clamp(1, 100);
    let search = params.search.as_deref().filter(|s| !s.is_empty());
    let category = params.category.as_deref().filter(|c| !c.is_empty());
    let (products, total) = page_of_products(&state.db, page, limit, search, category).await?;
    Ok(axum::Json(json!({
        "data": products,
        "meta": PageMeta::new(page, limit, total),
    })))
}

async fn list_by_category(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Query(params): Query<ListParams>,
) -> ApiResult<axum::Json<Value>> {
    let page = params.page.unwrap_or(1).max(1);
    let limit = params.limit.unwrap_or(10).clamp(1, 100);
    let (products, total) =
        page_of_products(&state.db, page, limit, None, Some(name.as_str())).await?;
    Ok(axum::Json(json!({
        "data": products,
        "meta": PageMeta::new(page, limit, total),
    })))
}

async fn fetch_product(db: &sqlx::PgPool, id: Uuid) -> ApiResult<Product> {
    sqlx::query_as::<_, Product>("SELECT * FROM products WHERE id = $1")
        .bind(id)
        .fetch_optional(db)
        .await?
        .ok_or_else(|| ApiError::not_found("product not found"))
}

async fn get_product(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<axum::Json<Value>> {
    let product = fetch_product(&state.db, id).await?;
    Ok(axum::Json(json!({ "product": product })))
}

async fn upload_images(
    state: &AppState,
    uploads: Vec<(String, Vec<u8>)>,
) -> ApiResult<Vec<StoredImage>> {
    let mut images = Vec::with_capacity(uploads.len());
    for (file_name, bytes) in uploads {
        let image = state
            .images
            .upload(bytes, &file_name)
            .await
            .map_err(ApiError::Internal)?;
        images.push(image);
    }
    Ok(images)
}

fn delete_images_best_effort(state: &AppState, images: Vec<StoredImage>) {
    let store = state.images.clone();
    tokio::spawn(async move {
        for image in images.into_iter().filter(|i| !i.id.is_empty()) {
            if let Err(err) = store.delete(&image.id).await {
                tracing::warn!(error = ?err, file_id = %image.id, "failed to delete hosted image");
            }
        }
    });
}

async fn create_product(
    AdminOnly(_admin): AdminOnly,
    State(state): State<AppState>,
    multipart: Multipart,
) -> ApiResult<(StatusCode, axum::Json<Value>)> {
    let form = read_product_form(multipart).await?;
    let title = form
        .title
        .as_deref()
        .filter(|t| !t.is_empty())
        .ok_or_else(|| ApiError::invalid("title is required"))?;
    let price: Money = form
        .price
        .ok_or_else(|| ApiError::invalid("price.amount is required and must be a number"))?;

    let images = upload_images(&state, form.uploads).await?;

    let product = sqlx::query_as::<_, Product>(
        "INSERT INTO products \
         (id, title, description, specification, price_amount, price_currency, category, stock, images) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9) RETURNING *",
    )
    .bind(Uuid::now_v7())
    .bind(title)
    .bind(form.description.unwrap_or_default())
    .bind(Value::Object(form.specification.unwrap_or_default()))
    .bind(price.amount)
    .bind(price.currency.as_str())
    .bind(form.category.unwrap_or_default())
    .bind(form.stock.unwrap_or(0))
    .bind(sqlx::types::Json(images))
    .fetch_one(&state.db)
    .await?;

    Ok((StatusCode::CREATED, axum::Json(json!({ "product": product }))))
}

async fn update_product(
    AdminOnly(_admin): AdminOnly,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    multipart: Multipart,
) -> ApiResult<axum::Json<Value>> {
    let form: ProductForm = read_product_form(multipart).await?;
    let product = fetch_product(&state.db, id).await?;

    let title = match form.title {
        Some(title) if title.is_empty() => return Err(ApiError::invalid("title is required")),
        Some(title) => title,
        None => product.title,
    };
    let description = form.description.unwrap_or(product.description);
    let category = form.category.unwrap_or(product.category);
    let specification = form
        .specification
        .map(Value::Object)
        .unwrap_or(product.specification);
    let (price_amount, price_currency) = match form.price {
        Some(price) => (price.amount, price.currency.as_str().to_string()),
        None => (product.price_amount, product.price_currency),
    };
    let stock = form.stock.unwrap_or(product.stock);

    let mut images = product.images.0;
    let mut removed = Vec::new();
    if !form.remove_image_ids.is_empty() {
        let (keep, drop): (Vec<_>, Vec<_>) = images
            .into_iter()
            .partition(|img| !form.remove_image_ids.contains(&img.id));
        images = keep;
        removed = drop;
    }
    if images.len() + form.uploads.len() > MAX_IMAGES {
        return Err(ApiError::invalid(format!(
            "a product may have at most {MAX_IMAGES} images"
        )));
    }
    images.extend(upload_images(&state, form.uploads).await?);

    let product = sqlx::query_as::<_, Product>(
        "UPDATE products SET title = $2, description = $3, specification = $4, \
         price_amount = $5, price_currency = $6, category = $7, stock = $8, images = $9, \
         updated_at = now() WHERE id = $1 RETURNING *",
    )
    .bind(id)
    .bind(title)
    .bind(description)
    .bind(specification)
    .bind(price_amount)
    .bind(price_currency)
    .bind(category)
    .bind(stock)
    .bind(sqlx::types::Json(images))
    .fetch_optional(&state.db)
    .await?
    .ok_or_else(|| ApiError::not_found("product not found"))?;

    if !removed.is_empty() {
        delete_images_best_effort(&state, removed);
    }

    Ok(axum::Json(json!({ "product": product })))
}

async fn delete_product(
    AdminOnly(_admin): AdminOnly,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<axum::Json<Value>> {
    let images: sqlx::types::Json<Vec<StoredImage>> =
        sqlx::query_scalar("DELETE FROM products WHERE id = $1 RETURNING images")
            .bind(id)
            .fetch_optional(&state.db)
            .await?
            .ok_or_else(|| ApiError::not_found("product not found"))?;
    delete_images_best_effort(&state, images.0);
    Ok(axum::Json(json!({ "message": "Product deleted" })))
}

async fn list_reviews(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<axum::Json<Value>> {
    fetch_product(&state.db, id).await?;
    let reviews = sqlx::query_as::<_, Review>(
        "SELECT * FROM reviews WHERE product_id = $1 ORDER BY created_at DESC",
    )
    .bind(id)
    .fetch_all(&state.db)
    .await?;
    Ok(axum::Json(json!({ "reviews": reviews })))
}

#[derive(Debug, Deserialize, Validate)]
struct ReviewPayload {
    #[validate(range(min = 1, max = 5, message = "rating must be between 1 and 5"))]
    rating: i32,
    comment: Option<String>,
}

/// Recomputes the denormalised aggregates from the full review set.
async fn recompute_rating(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    product_id: Uuid,
) -> ApiResult<()> {
    let ratings: Vec<i16> = sqlx::query_scalar("SELECT rating FROM reviews WHERE product_id = $1")
        .bind(product_id)
        .fetch_all(&mut **tx)
        .await?;
    let (average, count) = rating_summary(&ratings);
    sqlx::query(
        "UPDATE products SET average_rating = $2, review_count = $3, updated_at = now() \
         WHERE id = $1",
    )
    .bind(product_id)
    .bind(average)
    .bind(count)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

async fn add_review(
    CurrentUser(user): CurrentUser,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(payload): Json<ReviewPayload>,
) -> ApiResult<(StatusCode, axum::Json<Value>)> {
    payload
        .validate()
        .map_err(|err| ApiError::invalid(err.to_string()))?;

    let mut tx = state.db.begin().await?;
    let exists: Option<Uuid> = sqlx::query_scalar("SELECT id FROM products WHERE id = $1 FOR UPDATE")
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?;
    if exists.is_none() {
        return Err(ApiError::not_found("product not found"));
    }

    let already: bool = sqlx::query_scalar(
        "SELECT EXISTS(SELECT 1 FROM reviews WHERE product_id = $1 AND user_id = $2)",
    )
    .bind(id)
    .bind(user.id)
    .fetch_one(&mut *tx)
    .await?;
    if already {
        return Err(ApiError::conflict("product already reviewed by you"));
    }

    let comment = payload.comment.unwrap_or_default().trim().to_string();
    let review = sqlx::query_as::<_, Review>(
        "INSERT INTO reviews (id, product_id, user_id, rating, comment) \
         VALUES ($1, $2, $3, $4, $5) RETURNING *",
    )
    .bind(Uuid::now_v7())
    .bind(id)
    .bind(user.id)
    .bind(payload.rating as i16)
    .bind(comment)
    .fetch_one(&mut *tx)
    .await?;

    recompute_rating(&mut tx, id).await?;
    tx.commit().await?;

    Ok((StatusCode::CREATED, axum::Json(json!({ "review": review }))))
}

async fn delete_review(
    CurrentUser(user): CurrentUser,
    State(state): State<AppState>,
    Path((id, review_id)): Path<(Uuid, Uuid)>,
) -> ApiResult<axum::Json<Value>> {
    let mut tx = state.db.begin().await?;
    let review = sqlx::query_as::<_, Review>(
        "SELECT * FROM reviews WHERE id = $1 AND product_id = $2 FOR UPDATE",
    )
    .bind(review_id)
    .bind(id)
    .fetch_optional(&mut *tx)
    .await?
    .ok_or_else(|| ApiError::not_found("review not found"))?;

    if review.user_id != user.id && !user.is_admin() {
        return Err(ApiError::forbidden("you may only delete your own review"));
    }

    sqlx::query("DELETE FROM reviews WHERE id = $1")
        .bind(review_id)
        .execute(&mut *tx)
        .await?;
    recompute_rating(&mut tx, id).await?;
    tx.commit().await?;

    Ok(axum::Json(json!({ "message": "Review deleted" })))
}
