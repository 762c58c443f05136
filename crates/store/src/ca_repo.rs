use chrono::{DateTime, Duration, Utc};
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::models::CertificateAuthority;

/// Creates a new CA via the Cert Engine and persists it as `created`
/// (neither current nor previous — the caller decides whether/when to
/// activate it, per spec §4.1's state machine).
pub async fn create_ca(
    pool: &PgPool,
    name: &str,
    not_before: DateTime<Utc>,
    not_after: DateTime<Utc>,
) -> Result<CertificateAuthority> {
    let material = meshctl_pki::create_ca(name, not_before, not_after)?;
    insert_ca(pool, &material).await
}

pub async fn import_ca(
    pool: &PgPool,
    name: &str,
    public_cert_pem: &str,
    private_key_pem: Option<&str>,
) -> Result<CertificateAuthority> {
    let material = meshctl_pki::import_ca(name, public_cert_pem, private_key_pem)?;
    insert_ca(pool, &material).await
}

async fn insert_ca(pool: &PgPool, material: &meshctl_pki::CaMaterial) -> Result<CertificateAuthority> {
    let row = sqlx::query_as::<_, CertificateAuthority>(
        r#"
        INSERT INTO ca (name, not_before, not_after, public_cert_pem, private_key_pem, fingerprint_sha256)
        VALUES ($1, $2, $3, $4, $5, $6)
        RETURNING id, name, not_before, not_after, public_cert_pem, private_key_pem,
                  fingerprint_sha256, can_sign, include_in_chain, is_current, is_previous, demoted_at, created_at
        "#,
    )
    .bind(&material.name)
    .bind(material.not_before)
    .bind(material.not_after)
    .bind(&material.public_cert_pem)
    .bind(&material.private_key_pem)
    .bind(&material.fingerprint_sha256)
    .fetch_one(pool)
    .await
    .map_err(|e| match &e {
        sqlx::Error::Database(db_err) if db_err.constraint().is_some() => {
            Error::Conflict(format!("a CA named '{}' already exists", material.name))
        }
        _ => Error::Database(e),
    })?;

    Ok(row)
}

/// Activates `ca_id` as the current signing CA: the previously-current CA
/// (if any) is demoted to `is_previous=true, can_sign=false` but remains in
/// the chain; every client is marked config-dirty (spec §4.3 "CA rotation"
/// row). Runs as a single transaction so a reader never observes two
/// current CAs or a rotation without the corresponding dirtying.
pub async fn activate(pool: &PgPool, ca_id: Uuid) -> Result<CertificateAuthority> {
    let mut tx = pool.begin().await?;

    sqlx::query("SELECT id FROM ca WHERE is_current FOR UPDATE")
        .execute(&mut *tx)
        .await?;

    sqlx::query(
        "UPDATE ca SET is_current = false, is_previous = true, can_sign = false, demoted_at = now() WHERE is_current",
    )
    .execute(&mut *tx)
    .await?;

    let activated = sqlx::query_as::<_, CertificateAuthority>(
        r#"
        UPDATE ca SET is_current = true, is_previous = false, can_sign = true
        WHERE id = $1
        RETURNING id, name, not_before, not_after, public_cert_pem, private_key_pem,
                  fingerprint_sha256, can_sign, include_in_chain, is_current, is_previous, demoted_at, created_at
        "#,
    )
    .bind(ca_id)
    .fetch_optional(&mut *tx)
    .await?
    .ok_or_else(|| Error::NotFound(format!("CA {ca_id} not found")))?;

    mark_all_clients_dirty(&mut tx).await?;

    tx.commit().await?;

    tracing::info!(ca = activated.name, "activated CA as current signer");

    Ok(activated)
}

/// Convenience combining [`create_ca`] and [`activate`], used by the
/// rotation scheduler (spec §4.5 step 1).
pub async fn create_and_activate(
    pool: &PgPool,
    name: &str,
    not_before: DateTime<Utc>,
    not_after: DateTime<Utc>,
) -> Result<CertificateAuthority> {
    let created = create_ca(pool, name, not_before, not_after).await?;
    activate(pool, created.id).await
}

async fn mark_all_clients_dirty(tx: &mut Transaction<'_, Postgres>) -> Result<()> {
    sqlx::query("UPDATE client SET config_dirty_at = now() WHERE archived_at IS NULL")
        .execute(&mut **tx)
        .await?;
    Ok(())
}

/// The single CA currently permitted to sign (`is_current && can_sign`).
pub async fn get_signing_ca(pool: &PgPool) -> Result<CertificateAuthority> {
    sqlx::query_as::<_, CertificateAuthority>(
        r#"
        SELECT id, name, not_before, not_after, public_cert_pem, private_key_pem,
               fingerprint_sha256, can_sign, include_in_chain, is_current, is_previous, demoted_at, created_at
        FROM ca WHERE is_current AND can_sign
        "#,
    )
    .fetch_optional(pool)
    .await?
    .ok_or(Error::ServiceUnavailable)
}

/// All CAs currently advertised in the distributed chain, ordered stably
/// by id (spec §4.4 step 5 and the §8 determinism requirement).
pub async fn get_active_ca_chain(pool: &PgPool) -> Result<Vec<CertificateAuthority>> {
    let rows = sqlx::query_as::<_, CertificateAuthority>(
        r#"
        SELECT id, name, not_before, not_after, public_cert_pem, private_key_pem,
               fingerprint_sha256, can_sign, include_in_chain, is_current, is_previous, demoted_at, created_at
        FROM ca WHERE include_in_chain ORDER BY id
        "#,
    )
    .fetch_all(pool)
    .await?;

    Ok(rows)
}

/// Applies CA expiry-cleanup (spec §4.5 step 3 / §4.1 previous→removed
/// transition): a CA whose `not_after` has passed, or whose time since it
/// became `is_previous` exceeds `overlap_window`, loses `include_in_chain`.
/// The overlap clock starts at `demoted_at` (stamped by [`activate`]), not
/// at `created_at` — a CA is typically current for `ca_rotate_at` (~12mo)
/// before it is ever demoted, so anchoring to `created_at` would expire it
/// from the chain the instant it became previous. Returns the number of CAs
/// removed from the chain.
pub async fn demote_expired_from_chain(pool: &PgPool, now: DateTime<Utc>, overlap_window: Duration) -> Result<u64> {
    let cutoff = now - overlap_window;

    let result = sqlx::query(
        r#"
        UPDATE ca
        SET include_in_chain = false, can_sign = false
        WHERE include_in_chain
          AND (not_after < $1 OR (is_previous AND demoted_at < $2))
        "#,
    )
    .bind(now)
    .bind(cutoff)
    .execute(pool)
    .await?;

    Ok(result.rows_affected())
}

pub async fn get(pool: &PgPool, ca_id: Uuid) -> Result<CertificateAuthority> {
    sqlx::query_as::<_, CertificateAuthority>(
        r#"
        SELECT id, name, not_before, not_after, public_cert_pem, private_key_pem,
               fingerprint_sha256, can_sign, include_in_chain, is_current, is_previous, demoted_at, created_at
        FROM ca WHERE id = $1
        "#,
    )
    .bind(ca_id)
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| Error::NotFound(format!("CA {ca_id} not found")))
}
