//! Request authentication gates.
//!
//! `CurrentUser` resolves the session token (bearer header first, cookie
//! fallback) to a live user row. `AdminOnly` / `CustomerOnly` add the role
//! equality check on top; there is no role hierarchy.

use axum::extract::FromRequestParts;
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use axum_extra::extract::cookie::CookieJar;

use super::{token, Role, User, TOKEN_COOKIE};
use crate::error::ApiError;
use crate::AppState;

pub struct CurrentUser(pub User);
pub struct AdminOnly(pub User);
pub struct CustomerOnly(pub User);

fn token_from_parts(parts: &Parts) -> Option<String> {
    if let Some(value) = parts.headers.get(AUTHORIZATION) {
        if let Ok(raw) = value.to_str() {
            if let Some(token) = raw.strip_prefix("Bearer ") {
                return Some(token.trim().to_string());
            }
        }
    }
    CookieJar::from_headers(&parts.headers)
        .get(TOKEN_COOKIE)
        .map(|cookie| cookie.value().to_string())
}

#[axum::async_trait]
impl FromRequestParts<AppState> for CurrentUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, ApiError> {
        let token = token_from_parts(parts)
            .ok_or_else(|| ApiError::unauthenticated("not authorized, token missing"))?;
        let claims = token::verify(&state.config.jwt_secret, &token)
            .map_err(|_| ApiError::unauthenticated("token invalid or expired"))?;
        let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = $1")
            .bind(claims.sub)
            .fetch_optional(&state.db)
            .await?
            .ok_or_else(|| ApiError::unauthenticated("user not found"))?;
        Ok(Self(user))
    }
}

#[axum::async_trait]
impl FromRequestParts<AppState> for AdminOnly {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, ApiError> {
        let CurrentUser(user) = CurrentUser::from_request_parts(parts, state).await?;
        if user.role != Role::Admin.as_str() {
            return Err(ApiError::forbidden("admin access required"));
        }
        Ok(Self(user))
    }
}

#[axum::async_trait]
impl FromRequestParts<AppState> for CustomerOnly {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, ApiError> {
        let CurrentUser(user) = CurrentUser::from_request_parts(parts, state).await?;
        if user.role != Role::User.as_str() {
            return Err(ApiError::forbidden("user access required"));
        }
        Ok(Self(user))
    }
}
