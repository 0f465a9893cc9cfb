//! Process configuration, read once from the environment at startup.

use anyhow::{Context, Result};

#[derive(Clone, Debug)]
pub struct Config {
    pub database_url: String,
    pub port: u16,
    pub cors_origin: String,
    pub jwt_secret: String,
    pub jwt_expire_days: i64,
    pub cookie_secure: bool,
    pub otp_length: u32,
    pub otp_expire_minutes: i64,
    pub mail_from: String,
    pub smtp: Option<SmtpConfig>,
    pub imagekit: Option<ImageKitConfig>,
    pub address_phone_pattern: Option<String>,
    pub address_postal_pattern: Option<String>,
    pub address_divisions: Option<Vec<String>>,
}

#[derive(Clone, Debug)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub implicit_tls: bool,
}

#[derive(Clone, Debug)]
pub struct ImageKitConfig {
    pub public_key: String,
    pub private_key: String,
    pub url_endpoint: String,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let smtp = match (var("SMTP_HOST"), var("SMTP_USER"), var("SMTP_PASS")) {
            (Some(host), Some(username), Some(password)) => Some(SmtpConfig {
                host,
                port: parsed("SMTP_PORT")?.unwrap_or(587),
                username,
                password,
                implicit_tls: var("SMTP_SECURE").as_deref() == Some("true"),
            }),
            _ => None,
        };

        let imagekit = match (
            var("IMAGEKIT_PUBLIC_KEY"),
            var("IMAGEKIT_PRIVATE_KEY"),
            var("IMAGEKIT_URL_ENDPOINT"),
        ) {
            (Some(public_key), Some(private_key), Some(url_endpoint)) => Some(ImageKitConfig {
                public_key,
                private_key,
                url_endpoint,
            }),
            _ => None,
        };

        Ok(Self {
            database_url: var("DATABASE_URL").context("DATABASE_URL is required")?,
            port: parsed("PORT")?.unwrap_or(8080),
            cors_origin: var("CORS_ORIGIN").unwrap_or_else(|| "http://localhost:5173".to_string()),
            jwt_secret: var("JWT_SECRET_KEY").context("JWT_SECRET_KEY is required")?,
            jwt_expire_days: parsed("JWT_EXPIRE_DAYS")?.unwrap_or(30),
            cookie_secure: var("COOKIE_SECURE").as_deref() == Some("true"),
            otp_length: parsed("OTP_LENGTH")?.unwrap_or(6),
            otp_expire_minutes: parsed("OTP_EXPIRE_MINUTES")?.unwrap_or(5),
            mail_from: var("MAIL_FROM").unwrap_or_else(|| "Haat <no-reply@haat.dev>".to_string()),
            smtp,
            imagekit,
            address_phone_pattern: var("ADDRESS_PHONE_PATTERN"),
            address_postal_pattern: var("ADDRESS_POSTAL_PATTERN"),
            address_divisions: var("ADDRESS_DIVISIONS")
                .map(|raw| raw.split(',').map(|s| s.trim().to_string()).collect()),
        })
    }
}

fn var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn parsed<T: std::str::FromStr>(name: &str) -> Result<Option<T>>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    var(name)
        .map(|raw| raw.parse::<T>().with_context(|| format!("invalid {name}")))
        .transpose()
}
