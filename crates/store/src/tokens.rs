use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use rand::RngCore;
use serde_json::Value;
use sha2::Sha256;
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::models::{ClientToken, EnrollmentCode};

/// Prefix length kept unhashed so leak-scanners can recognize the secret's
/// shape without the registry revealing the hash (spec §4.7 "recognizable
/// prefix to aid leak-scanning").
const TOKEN_PREFIX_LEN: usize = 8;
const TOKEN_SECRET_BYTES: usize = 32;

/// Literal tag every client token starts with, so a leak-scanner's published
/// pattern (§6.2 `/.well-known/secret-scanning.json`) has a fixed anchor to
/// grep for instead of matching arbitrary hex strings.
const TOKEN_TAG: &str = "mct_";

fn random_token_secret() -> String {
    format!("{TOKEN_TAG}{}", random_secret(TOKEN_SECRET_BYTES))
}

pub struct IssuedToken {
    pub token: ClientToken,
    /// The raw secret, returned to the caller exactly once and never stored.
    pub plaintext: String,
}

fn random_secret(len: usize) -> String {
    let mut bytes = vec![0u8; len];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

fn hash_secret(secret: &str, pepper: &[u8]) -> Result<String> {
    let mut mac = Hmac::<Sha256>::new_from_slice(pepper)
        .map_err(|e| Error::Validation(format!("invalid pepper: {e}")))?;
    mac.update(secret.as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}

pub async fn issue(pool: &PgPool, client_id: Uuid, pepper: &[u8]) -> Result<IssuedToken> {
    let secret = random_token_secret();
    let prefix = secret.chars().take(TOKEN_PREFIX_LEN).collect::<String>();
    let hash = hash_secret(&secret, pepper)?;

    let token = sqlx::query_as::<_, ClientToken>(
        r#"
        INSERT INTO client_token (client_id, token_hash, token_prefix)
        VALUES ($1, $2, $3)
        RETURNING id, client_id, token_hash, token_prefix, is_active, created_at
        "#,
    )
    .bind(client_id)
    .bind(&hash)
    .bind(&prefix)
    .fetch_one(pool)
    .await?;

    Ok(IssuedToken { token, plaintext: secret })
}

/// Resolves a presented secret to its owning client, or `None` if no active
/// token matches. Candidates sharing the presented prefix are compared with
/// a constant-time equality check over the hash (spec §4.6 "look-up is
/// constant-time across the candidate set") so the comparison cost does not
/// leak which, if any, candidate is correct.
pub async fn resolve(pool: &PgPool, presented_secret: &str, pepper: &[u8]) -> Result<Option<Uuid>> {
    use subtle::ConstantTimeEq;

    if presented_secret.len() < TOKEN_PREFIX_LEN {
        return Ok(None);
    }
    let prefix = &presented_secret[..TOKEN_PREFIX_LEN];
    let presented_hash = hash_secret(presented_secret, pepper)?;

    let candidates: Vec<(Uuid, Uuid, String)> = sqlx::query_as(
        "SELECT id, client_id, token_hash FROM client_token WHERE token_prefix = $1 AND is_active",
    )
    .bind(prefix)
    .fetch_all(pool)
    .await?;

    let mut matched_client: Option<Uuid> = None;
    for (_id, client_id, stored_hash) in candidates {
        let is_match = stored_hash.as_bytes().ct_eq(presented_hash.as_bytes()).into();
        if is_match {
            matched_client = Some(client_id);
        }
    }

    Ok(matched_client)
}

/// Deactivates every active token whose prefix matches `token_prefix` and
/// whose hash matches `secret`, recording a leak-audit row with only the
/// prefix retained (spec §4.6 leak response). Returns the number deactivated.
pub async fn deactivate_leaked(
    pool: &PgPool,
    secret: &str,
    found_url: &str,
    pepper: &[u8],
) -> Result<u64> {
    let hash = hash_secret(secret, pepper)?;
    let prefix = secret.chars().take(TOKEN_PREFIX_LEN).collect::<String>();

    let mut tx = pool.begin().await?;

    let result = sqlx::query(
        "UPDATE client_token SET is_active = false WHERE token_hash = $1 AND is_active",
    )
    .bind(&hash)
    .execute(&mut *tx)
    .await?;

    if result.rows_affected() > 0 {
        sqlx::query(
            "INSERT INTO leak_audit (token_prefix, found_url) VALUES ($1, $2)",
        )
        .bind(&prefix)
        .bind(found_url)
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;
    Ok(result.rows_affected())
}

pub async fn list_active_for_client(pool: &PgPool, client_id: Uuid) -> Result<Vec<ClientToken>> {
    let rows = sqlx::query_as::<_, ClientToken>(
        "SELECT id, client_id, token_hash, token_prefix, is_active, created_at FROM client_token WHERE client_id = $1 ORDER BY created_at DESC",
    )
    .bind(client_id)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

/// One-time enrollment codes redeem for a freshly issued token (spec §4.7
/// "mobile-style onboarding that returns a freshly-issued token in exchange
/// for a code + public key").
pub async fn issue_enrollment_code(
    pool: &PgPool,
    client_id: Uuid,
    device_hint: Option<&str>,
    expires_at: DateTime<Utc>,
    pepper: &[u8],
) -> Result<(EnrollmentCode, String)> {
    let code = random_secret(16);
    let hash = hash_secret(&code, pepper)?;

    let record = sqlx::query_as::<_, EnrollmentCode>(
        r#"
        INSERT INTO enrollment_code (client_id, code_hash, device_hint, expires_at)
        VALUES ($1, $2, $3, $4)
        RETURNING id, client_id, code_hash, device_hint, expires_at, used_at, created_at
        "#,
    )
    .bind(client_id)
    .bind(&hash)
    .bind(device_hint)
    .bind(expires_at)
    .fetch_one(pool)
    .await?;

    Ok((record, code))
}

/// Redeems an unexpired, unused code exactly once, issuing a new token for
/// its bound client in the same transaction.
pub async fn redeem_enrollment_code(pool: &PgPool, code: &str, pepper: &[u8]) -> Result<IssuedToken> {
    let hash = hash_secret(code, pepper)?;
    let now = Utc::now();

    let mut tx = pool.begin().await?;

    let client_id: Uuid = sqlx::query_scalar(
        r#"
        UPDATE enrollment_code SET used_at = now()
        WHERE code_hash = $1 AND used_at IS NULL AND expires_at > $2
        RETURNING client_id
        "#,
    )
    .bind(&hash)
    .bind(now)
    .fetch_optional(&mut *tx)
    .await?
    .ok_or_else(|| Error::Validation("enrollment code is invalid, used, or expired".into()))?;

    let secret = random_token_secret();
    let prefix = secret.chars().take(TOKEN_PREFIX_LEN).collect::<String>();
    let token_hash = hash_secret(&secret, pepper)?;

    let token = sqlx::query_as::<_, ClientToken>(
        r#"
        INSERT INTO client_token (client_id, token_hash, token_prefix)
        VALUES ($1, $2, $3)
        RETURNING id, client_id, token_hash, token_prefix, is_active, created_at
        "#,
    )
    .bind(client_id)
    .bind(&token_hash)
    .bind(&prefix)
    .fetch_one(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(IssuedToken { token, plaintext: secret })
}

/// Append-only audit trail. Writes are best-effort: callers should log and
/// continue rather than fail the primary operation (spec §7 "Audit-trail
/// writes are best-effort and never block the primary operation").
pub async fn record_audit_event(pool: &PgPool, event_kind: &str, subject: &str, detail: Value) {
    let result = sqlx::query("INSERT INTO audit_log (event_kind, subject, detail) VALUES ($1, $2, $3)")
        .bind(event_kind)
        .bind(subject)
        .bind(detail)
        .execute(pool)
        .await;

    if let Err(err) = result {
        tracing::warn!(%err, event_kind, subject, "failed to record audit event");
    }
}

pub async fn list_audit_events(pool: &PgPool, limit: i64) -> Result<Vec<(Uuid, String, String, Value, DateTime<Utc>)>> {
    let rows: Vec<(Uuid, String, String, Value, DateTime<Utc>)> = sqlx::query_as(
        "SELECT id, event_kind, subject, detail, created_at FROM audit_log ORDER BY created_at DESC LIMIT $1",
    )
    .bind(limit)
    .fetch_all(pool)
    .await?;

    Ok(rows)
}
