use chrono::{DateTime, Duration, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::models::ClientCertificate;

/// Latest non-revoked, non-expired cert matching `(issuing_ca, ip_cidr,
/// groups_hash)` (spec §4.1's reuse key and §4.4 step 3). `None` means a
/// new cert must be minted.
pub async fn find_reusable(
    pool: &PgPool,
    client_id: Uuid,
    issuing_ca_id: Uuid,
    issued_for_ip_cidr: &str,
    issued_for_groups_hash: &str,
    now: DateTime<Utc>,
    renew_before: Duration,
) -> Result<Option<ClientCertificate>> {
    let renew_cutoff = now + renew_before;

    let row = sqlx::query_as::<_, ClientCertificate>(
        r#"
        SELECT id, client_id, issuing_ca_id, fingerprint_sha256, cert_pem, not_before, not_after,
               issued_for_ip_cidr, issued_for_groups_hash, revoked, revoked_at, created_at
        FROM client_certificate
        WHERE client_id = $1 AND issuing_ca_id = $2 AND issued_for_ip_cidr = $3
          AND issued_for_groups_hash = $4 AND NOT revoked AND not_after >= $5
        ORDER BY created_at DESC
        LIMIT 1
        "#,
    )
    .bind(client_id)
    .bind(issuing_ca_id)
    .bind(issued_for_ip_cidr)
    .bind(issued_for_groups_hash)
    .bind(renew_cutoff)
    .fetch_optional(pool)
    .await?;

    Ok(row)
}

/// Persists a freshly minted cert with an optimistic check that its inputs
/// (client, issuing CA, ip_cidr, groups_hash) are still current: if a
/// non-revoked cert with a *different* fingerprint but the *same* reuse key
/// was inserted concurrently, this call discards its own row and returns
/// the winner instead (spec §5's "reacquire → insert with optimistic
/// check... if not, discard and retry once" pattern, implemented here as a
/// single round-trip rather than a caller-visible retry).
pub async fn insert_if_still_current(
    pool: &PgPool,
    client_id: Uuid,
    issuing_ca_id: Uuid,
    fingerprint_sha256: &str,
    cert_pem: &str,
    not_before: DateTime<Utc>,
    not_after: DateTime<Utc>,
    issued_for_ip_cidr: &str,
    issued_for_groups_hash: &str,
) -> Result<ClientCertificate> {
    let mut tx = pool.begin().await?;

    sqlx::query("SELECT id FROM client WHERE id = $1 FOR UPDATE")
        .bind(client_id)
        .execute(&mut *tx)
        .await?;

    let competitor = sqlx::query_as::<_, ClientCertificate>(
        r#"
        SELECT id, client_id, issuing_ca_id, fingerprint_sha256, cert_pem, not_before, not_after,
               issued_for_ip_cidr, issued_for_groups_hash, revoked, revoked_at, created_at
        FROM client_certificate
        WHERE client_id = $1 AND issuing_ca_id = $2 AND issued_for_ip_cidr = $3
          AND issued_for_groups_hash = $4 AND NOT revoked AND not_after > now()
        ORDER BY created_at DESC
        LIMIT 1
        "#,
    )
    .bind(client_id)
    .bind(issuing_ca_id)
    .bind(issued_for_ip_cidr)
    .bind(issued_for_groups_hash)
    .fetch_optional(&mut *tx)
    .await?;

    if let Some(existing) = competitor {
        tx.rollback().await?;
        return Ok(existing);
    }

    let inserted = sqlx::query_as::<_, ClientCertificate>(
        r#"
        INSERT INTO client_certificate
            (client_id, issuing_ca_id, fingerprint_sha256, cert_pem, not_before, not_after,
             issued_for_ip_cidr, issued_for_groups_hash)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        RETURNING id, client_id, issuing_ca_id, fingerprint_sha256, cert_pem, not_before, not_after,
                  issued_for_ip_cidr, issued_for_groups_hash, revoked, revoked_at, created_at
        "#,
    )
    .bind(client_id)
    .bind(issuing_ca_id)
    .bind(fingerprint_sha256)
    .bind(cert_pem)
    .bind(not_before)
    .bind(not_after)
    .bind(issued_for_ip_cidr)
    .bind(issued_for_groups_hash)
    .fetch_one(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(inserted)
}

/// Explicit operator revocation. Superseded-but-unexpired certs from
/// rotation are deliberately left unrevoked (spec §4.1); this path is only
/// for intentional revocation.
pub async fn revoke(pool: &PgPool, cert_id: Uuid) -> Result<()> {
    let result = sqlx::query(
        "UPDATE client_certificate SET revoked = true, revoked_at = now() WHERE id = $1 AND NOT revoked",
    )
    .bind(cert_id)
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        return Err(Error::NotFound(format!("certificate {cert_id} not found or already revoked")));
    }
    Ok(())
}

/// Earliest `not_after` among a client's non-revoked certs, used by the
/// rotation scheduler's renewal sweep (spec §4.5 step 2).
pub async fn earliest_non_revoked_expiry(pool: &PgPool, client_id: Uuid) -> Result<Option<DateTime<Utc>>> {
    let row: Option<DateTime<Utc>> = sqlx::query_scalar(
        "SELECT MIN(not_after) FROM client_certificate WHERE client_id = $1 AND NOT revoked",
    )
    .bind(client_id)
    .fetch_one(pool)
    .await?;

    Ok(row)
}

/// Bulk form of the rotation scheduler's renewal sweep (spec §4.5 step 2):
/// marks every non-blocked, non-archived client whose earliest non-revoked
/// certificate falls inside the renewal window dirty, in one statement
/// rather than one round-trip per client.
pub async fn mark_renewal_dirty(pool: &PgPool, now: DateTime<Utc>, renew_before: Duration) -> Result<u64> {
    let cutoff = now + renew_before;

    let result = sqlx::query(
        r#"
        UPDATE client SET config_dirty_at = now()
        WHERE archived_at IS NULL AND NOT is_blocked
          AND id IN (
              SELECT client_id FROM client_certificate
              WHERE NOT revoked
              GROUP BY client_id
              HAVING MIN(not_after) < $1
          )
        "#,
    )
    .bind(cutoff)
    .execute(pool)
    .await?;

    Ok(result.rows_affected())
}

/// Best-effort pruning of certs that are both revoked and past expiry
/// (spec §4.5 step 3, "may be pruned from hot storage").
pub async fn prune_revoked_expired(pool: &PgPool, now: DateTime<Utc>) -> Result<u64> {
    let result = sqlx::query("DELETE FROM client_certificate WHERE revoked AND not_after < $1")
        .bind(now)
        .execute(pool)
        .await?;

    Ok(result.rows_affected())
}
