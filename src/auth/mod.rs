//! Identity and session management.
//!
//! Registration is two-step: `register` stores a pending user and sends a
//! one-time code; `verify-otp` materialises the durable user record.
//! Sessions are signed tokens delivered both as an HTTP-only cookie and in
//! the response body.

pub mod extract;
pub mod otp;
pub mod token;

use axum::extract::State;
use axum::routing::{get, post};
use axum::Router;
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;
use validator::Validate;

use crate::config::Config;
use crate::domain::Address;
use crate::error::{conflict_on_unique, ApiError, ApiResult, Json};
use crate::AppState;

use extract::CurrentUser;
use otp::{PendingUser, VerifyOutcome};

pub const TOKEN_COOKIE: &str = "token";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Role {
    User,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Admin => "admin",
        }
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct User {
    pub id: Uuid,
    pub full_name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub password_hash: String,
    pub role: String,
    pub shipping_address: Option<sqlx::types::Json<Address>>,
    pub is_email_verified: bool,
    pub is_phone_verified: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin.as_str()
    }
}

/// User projection safe for API responses: the credential hash never
/// leaves this module.
#[derive(Debug, Clone, Serialize)]
pub struct PublicUser {
    pub id: Uuid,
    pub full_name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub role: String,
}

impl From<&User> for PublicUser {
    fn from(user: &User) -> Self {
        Self {
            id: user.id,
            full_name: user.full_name.clone(),
            email: user.email.clone(),
            phone: user.phone.clone(),
            role: user.role.clone(),
        }
    }
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/register", post(register))
        .route("/verify-otp", post(verify_otp))
        .route("/login", post(login))
        .route("/logout", post(logout))
        .route("/me", get(me))
}

fn session_cookie(config: &Config, token: String) -> Cookie<'static> {
    let mut cookie = Cookie::new(TOKEN_COOKIE, token);
    cookie.set_http_only(true);
    cookie.set_same_site(SameSite::Lax);
    cookie.set_secure(config.cookie_secure);
    cookie.set_path("/");
    cookie.set_max_age(time::Duration::days(config.jwt_expire_days));
    cookie
}

async fn hash_password(password: String) -> ApiResult<String> {
    tokio::task::spawn_blocking(move || bcrypt::hash(password, bcrypt::DEFAULT_COST))
        .await
        .map_err(|err| ApiError::Internal(err.into()))?
        .map_err(|err| ApiError::Internal(err.into()))
}

async fn verify_password(password: String, hash: String) -> ApiResult<bool> {
    tokio::task::spawn_blocking(move || bcrypt::verify(password, &hash))
        .await
        .map_err(|err| ApiError::Internal(err.into()))?
        .map_err(|err| ApiError::Internal(err.into()))
}

fn normalize_email(email: Option<String>) -> Option<String> {
    email
        .map(|e| e.trim().to_lowercase())
        .filter(|e| !e.is_empty())
}

fn normalize_phone(phone: Option<String>) -> Option<String> {
    phone.map(|p| p.trim().to_string()).filter(|p| !p.is_empty())
}

/// Fire-and-forget code delivery: email through the mailer, phone through
/// a logged SMS stub. Delivery failures are logged, never surfaced.
fn dispatch_otp(state: &AppState, email: Option<String>, phone: Option<String>, code: String) {
    let minutes = state.config.otp_expire_minutes;
    if let Some(to) = email {
        let mailer = state.mailer.clone();
        tokio::spawn(async move {
            let subject = "Your verification code";
            let html =
                format!("<p>Your one-time code is <b>{code}</b>. It expires in {minutes} minutes.</p>");
            if let Err(err) = mailer.send(&to, subject, &html).await {
                tracing::warn!(error = ?err, %to, "failed to send verification email");
            }
        });
    } else if let Some(to) = phone {
        tracing::info!(%to, %code, "SMS stub: verification code");
    }
}

#[derive(Debug, Deserialize, Validate)]
struct RegisterPayload {
    #[validate(length(min = 1, message = "full_name is required"))]
    full_name: String,
    email: Option<String>,
    phone: Option<String>,
    #[validate(length(min = 6, message = "password must be at least 6 characters"))]
    password: String,
}

async fn register(
    State(state): State<AppState>,
    Json(payload): Json<RegisterPayload>,
) -> ApiResult<axum::Json<Value>> {
    payload
        .validate()
        .map_err(|err| ApiError::invalid(err.to_string()))?;
    let email = normalize_email(payload.email);
    let phone = normalize_phone(payload.phone);
    if email.is_none() && phone.is_none() {
        return Err(ApiError::invalid("email or phone required"));
    }
    if let Some(email) = &email {
        if !validator::validate_email(email) {
            return Err(ApiError::invalid("invalid email"));
        }
    }

    if let Some(email) = &email {
        let exists: bool =
            sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM users WHERE email = $1)")
                .bind(email)
                .fetch_one(&state.db)
                .await?;
        if exists {
            return Err(ApiError::conflict("email already registered"));
        }
    }
    if let Some(phone) = &phone {
        let exists: bool =
            sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM users WHERE phone = $1)")
                .bind(phone)
                .fetch_one(&state.db)
                .await?;
        if exists {
            return Err(ApiError::conflict("phone already registered"));
        }
    }

    let password_hash = hash_password(payload.password).await?;
    let identifier = email.clone().or_else(|| phone.clone()).unwrap_or_default();
    let code = state.otp.issue(&identifier);
    state.pending.put(
        &identifier,
        PendingUser {
            full_name: payload.full_name.trim().to_string(),
            email: email.clone(),
            phone: phone.clone(),
            password_hash,
        },
        Utc::now() + state.otp.ttl(),
    );
    dispatch_otp(&state, email, phone, code);

    Ok(axum::Json(json!({
        "message": "OTP sent, complete verification to register"
    })))
}

#[derive(Debug, Deserialize)]
struct VerifyOtpPayload {
    identifier: String,
    otp: String,
}

async fn verify_otp(
    State(state): State<AppState>,
    jar: CookieJar,
    Json(payload): Json<VerifyOtpPayload>,
) -> ApiResult<(CookieJar, axum::Json<Value>)> {
    let identifier = payload.identifier.trim();
    if identifier.is_empty() || payload.otp.trim().is_empty() {
        return Err(ApiError::invalid("identifier and otp required"));
    }

    match state.otp.verify(identifier, payload.otp.trim()) {
        VerifyOutcome::Ok => {}
        outcome => {
            return Err(ApiError::invalid(format!("OTP failed: {}", outcome.reason())));
        }
    }

    let pending = state
        .pending
        .take(identifier)
        .ok_or_else(|| ApiError::invalid("no pending registration"))?;

    let user = sqlx::query_as::<_, User>(
        "INSERT INTO users (id, full_name, email, phone, password_hash, role, \
         is_email_verified, is_phone_verified) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8) RETURNING *",
    )
    .bind(Uuid::now_v7())
    .bind(&pending.full_name)
    .bind(&pending.email)
    .bind(&pending.phone)
    .bind(&pending.password_hash)
    .bind(Role::User.as_str())
    .bind(pending.email.is_some())
    .bind(pending.phone.is_some())
    .fetch_one(&state.db)
    .await
    .map_err(|err| conflict_on_unique(err, "email or phone already registered"))?;

    let token = token::issue(
        &state.config.jwt_secret,
        user.id,
        &user.role,
        state.config.jwt_expire_days,
    )?;
    let jar = jar.add(session_cookie(&state.config, token.clone()));

    Ok((
        jar,
        axum::Json(json!({
            "message": "Registration complete",
            "token": token,
            "user": PublicUser::from(&user),
        })),
    ))
}

#[derive(Debug, Deserialize)]
struct LoginPayload {
    email: Option<String>,
    phone: Option<String>,
    password: String,
}

async fn login(
    State(state): State<AppState>,
    jar: CookieJar,
    Json(payload): Json<LoginPayload>,
) -> ApiResult<(CookieJar, axum::Json<Value>)> {
    let email = normalize_email(payload.email);
    let phone = normalize_phone(payload.phone);
    if (email.is_none() && phone.is_none()) || payload.password.is_empty() {
        return Err(ApiError::invalid("email or phone and password are required"));
    }

    let user = sqlx::query_as::<_, User>(
        "SELECT * FROM users WHERE ($1::text IS NOT NULL AND email = $1) \
         OR ($2::text IS NOT NULL AND phone = $2) LIMIT 1",
    )
    .bind(&email)
    .bind(&phone)
    .fetch_optional(&state.db)
    .await?
    .ok_or_else(|| ApiError::unauthenticated("invalid credentials"))?;

    if !verify_password(payload.password, user.password_hash.clone()).await? {
        return Err(ApiError::unauthenticated("invalid credentials"));
    }

    let token = token::issue(
        &state.config.jwt_secret,
        user.id,
        &user.role,
        state.config.jwt_expire_days,
    )?;
    let jar = jar.add(session_cookie(&state.config, token.clone()));

    Ok((
        jar,
        axum::Json(json!({
            "message": "Login successful",
            "token": token,
            "user": PublicUser::from(&user),
        })),
    ))
}

async fn logout(jar: CookieJar) -> (CookieJar, axum::Json<Value>) {
    let mut removal = Cookie::from(TOKEN_COOKIE);
    removal.set_path("/");
    let jar = jar.remove(removal);
    (jar, axum::Json(json!({ "message": "Logged out" })))
}

async fn me(CurrentUser(user): CurrentUser) -> axum::Json<Value> {
    axum::Json(json!({ "user": PublicUser::from(&user) }))
}
