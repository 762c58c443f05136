//! Application state: database pool plus the env-driven configuration the
//! teacher splits into `AuthConfig`/`RateLimitConfig` structs (`auth.rs`,
//! `rate_limit.rs`), carried here as one `AppState` the handlers share.

use std::sync::Arc;

use sqlx::PgPool;

use crate::auth::AuthConfig;
use crate::rate_limit::{RateLimitConfig, RateLimiter};
use meshctl_assembler::AssemblerSettings;

/// Hash pepper for client-token/enrollment-code lookups (spec §4.6), kept
/// separate from the admin JWT secret the same way the teacher keeps
/// `REFRESH_TOKEN_PEPPER`/`API_KEY_PEPPER` separate from `JWT_SECRET`.
#[derive(Clone)]
pub struct TokenPepper(pub Vec<u8>);

impl TokenPepper {
    pub fn from_env() -> anyhow::Result<Self> {
        let raw = std::env::var("TOKEN_HASH_PEPPER")
            .map_err(|_| anyhow::anyhow!("TOKEN_HASH_PEPPER must be set"))?;

        let is_production = std::env::var("ENVIRONMENT")
            .unwrap_or_else(|_| "development".to_string())
            .to_lowercase()
            == "production";

        if is_production && (raw.len() < 32 || raw.to_lowercase().contains("change-me")) {
            anyhow::bail!("PRODUCTION ERROR: TOKEN_HASH_PEPPER is weak, use a random secret of at least 32 chars");
        }
        if !is_production && raw.len() < 32 {
            tracing::warn!("TOKEN_HASH_PEPPER is shorter than recommended; only acceptable for development");
        }

        Ok(Self(raw.into_bytes()))
    }
}

/// Shared secret for verifying `/v1/secret-scanning/{verify,revoke}` HMAC
/// signatures (spec §6.2).
#[derive(Clone)]
pub struct WebhookSecret(pub Vec<u8>);

impl WebhookSecret {
    pub fn from_env() -> anyhow::Result<Self> {
        let raw = std::env::var("SECRET_SCANNING_WEBHOOK_SECRET")
            .map_err(|_| anyhow::anyhow!("SECRET_SCANNING_WEBHOOK_SECRET must be set"))?;
        Ok(Self(raw.into_bytes()))
    }
}

pub struct AppState {
    pub db: PgPool,
    pub token_pepper: TokenPepper,
    pub webhook_secret: WebhookSecret,
    pub auth_config: AuthConfig,
    pub rate_limiter: RateLimiter,
    pub assembler_settings: AssemblerSettings,
}

impl AppState {
    pub fn new(db: PgPool, token_pepper: TokenPepper, webhook_secret: WebhookSecret, auth_config: AuthConfig) -> Arc<Self> {
        Arc::new(Self {
            db,
            token_pepper,
            webhook_secret,
            auth_config,
            rate_limiter: RateLimiter::new(RateLimitConfig::from_env()),
            assembler_settings: AssemblerSettings::default(),
        })
    }
}
