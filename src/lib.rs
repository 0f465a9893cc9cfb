//! Haat - self-hosted e-commerce backend.
//!
//! COD storefront API over Postgres: product catalog with reviews,
//! per-customer carts, order lifecycle with inventory reconciliation,
//! OTP-verified registration, and admin order tooling.

use std::sync::Arc;

use anyhow::{Context, Result};
use axum::extract::DefaultBodyLimit;
use axum::http::{header, HeaderValue, Method};
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

pub mod auth;
pub mod cart;
pub mod catalog;
pub mod config;
pub mod domain;
pub mod error;
pub mod images;
pub mod mailer;
pub mod orders;

use auth::otp::{OtpStore, PendingStore};
use config::Config;
use domain::AddressPolicy;
use images::{ImageKitStore, ImageStore, NullImageStore};
use mailer::{LogMailer, Mailer, SmtpMailer};

const MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024;

#[derive(Clone)]
pub struct AppState {
    pub db: sqlx::PgPool,
    pub config: Arc<Config>,
    pub mailer: Arc<dyn Mailer>,
    pub images: Arc<dyn ImageStore>,
    pub otp: Arc<OtpStore>,
    pub pending: Arc<PendingStore>,
    pub address_policy: Arc<AddressPolicy>,
}

impl AppState {
    pub fn new(db: sqlx::PgPool, config: Config) -> Result<Self> {
        let mailer: Arc<dyn Mailer> = match &config.smtp {
            Some(smtp) => Arc::new(SmtpMailer::new(smtp, &config.mail_from)?),
            None => {
                tracing::warn!("SMTP unconfigured, one-time codes will be logged");
                Arc::new(LogMailer)
            }
        };
        let images: Arc<dyn ImageStore> = match &config.imagekit {
            Some(imagekit) => Arc::new(ImageKitStore::new(imagekit)),
            None => {
                tracing::warn!("image hosting unconfigured, product image uploads will fail");
                Arc::new(NullImageStore)
            }
        };
        let address_policy = AddressPolicy::new(
            config.address_phone_pattern.as_deref(),
            config.address_postal_pattern.as_deref(),
            config.address_divisions.clone(),
        )
        .context("invalid address policy pattern")?;

        Ok(Self {
            db,
            otp: Arc::new(OtpStore::new(config.otp_length, config.otp_expire_minutes)),
            pending: Arc::new(PendingStore::default()),
            address_policy: Arc::new(address_policy),
            mailer,
            images,
            config: Arc::new(config),
        })
    }
}

pub fn router(state: AppState) -> Result<Router> {
    let origin: HeaderValue = state
        .config
        .cors_origin
        .parse()
        .context("invalid CORS_ORIGIN")?;
    let cors = CorsLayer::new()
        .allow_origin(origin)
        .allow_credentials(true)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::PATCH,
            Method::DELETE,
        ])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION]);

    Ok(Router::new()
        .route(
            "/health",
            get(|| async { Json(serde_json::json!({"status": "healthy", "service": "haat"})) }),
        )
        .nest("/api/auth", auth::router())
        .nest("/api/products", catalog::router())
        .nest("/api/cart", cart::router())
        .nest("/api/orders", orders::router())
        .nest("/api/admin/orders", orders::admin::router())
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state))
}

/// Pagination envelope returned by every list endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct PageMeta {
    pub page: u32,
    pub limit: u32,
    pub total_pages: u32,
    pub total_items: i64,
}

impl PageMeta {
    pub fn new(page: u32, limit: u32, total_items: i64) -> Self {
        let total_pages = ((total_items.max(0) as u64).div_ceil(u64::from(limit.max(1))) as u32).max(1);
        Self {
            page,
            limit,
            total_pages,
            total_items,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_meta() {
        let meta = PageMeta::new(1, 20, 0);
        assert_eq!(meta.total_pages, 1);
        let meta = PageMeta::new(2, 20, 41);
        assert_eq!(meta.total_pages, 3);
        let meta = PageMeta::new(1, 20, 40);
        assert_eq!(meta.total_pages, 2);
    }
}
