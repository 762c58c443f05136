use std::collections::HashSet;
use std::net::IpAddr;

use sqlx::PgPool;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::models::{IpAssignment, IpGroup, IpPool};

pub async fn create_pool(pool: &PgPool, cidr: ipnet::IpNet, description: &str) -> Result<IpPool> {
    sqlx::query_as::<_, IpPool>(
        "INSERT INTO ip_pool (cidr, description) VALUES ($1, $2) RETURNING id, cidr, description",
    )
    .bind(cidr.to_string())
    .bind(description)
    .fetch_one(pool)
    .await
    .map_err(Error::Database)
}

pub async fn get_pool(pool: &PgPool, pool_id: Uuid) -> Result<IpPool> {
    sqlx::query_as::<_, IpPool>("SELECT id, cidr, description FROM ip_pool WHERE id = $1")
        .bind(pool_id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| Error::NotFound(format!("ip pool {pool_id} not found")))
}

/// `[start, end]` must be contained in the pool's CIDR, must not overlap any
/// other IPGroup of the same pool, and must exclude network/broadcast
/// addresses — enforced here since it spans two tables the database schema
/// does not directly constrain.
pub async fn create_ip_group(
    pool: &PgPool,
    pool_id: Uuid,
    name: &str,
    start_ip: IpAddr,
    end_ip: IpAddr,
) -> Result<IpGroup> {
    let ip_pool = get_pool(pool, pool_id).await?;
    let network = ip_pool
        .network()
        .map_err(|e| Error::Validation(format!("pool {pool_id} has an unparsable cidr: {e}")))?;

    if !network.contains(&start_ip) || !network.contains(&end_ip) {
        return Err(Error::Validation(format!(
            "[{start_ip}, {end_ip}] is not contained in pool {}",
            ip_pool.cidr
        )));
    }

    let existing: Vec<(IpAddr, IpAddr)> = sqlx::query_as(
        "SELECT start_ip, end_ip FROM ip_group WHERE pool_id = $1",
    )
    .bind(pool_id)
    .fetch_all(pool)
    .await?;

    for (other_start, other_end) in existing {
        if ranges_overlap(start_ip, end_ip, other_start, other_end) {
            return Err(Error::Conflict(format!(
                "[{start_ip}, {end_ip}] overlaps an existing ip_group in pool {pool_id}"
            )));
        }
    }

    sqlx::query_as::<_, IpGroup>(
        r#"
        INSERT INTO ip_group (pool_id, name, start_ip, end_ip)
        VALUES ($1, $2, $3, $4)
        RETURNING id, pool_id, name, start_ip, end_ip
        "#,
    )
    .bind(pool_id)
    .bind(name)
    .bind(start_ip)
    .bind(end_ip)
    .fetch_one(pool)
    .await
    .map_err(|e| match &e {
        sqlx::Error::Database(db_err) if db_err.constraint().is_some() => {
            Error::Conflict(format!("ip_group '{name}' already exists in pool {pool_id}"))
        }
        _ => Error::Database(e),
    })
}

fn ranges_overlap(a_start: IpAddr, a_end: IpAddr, b_start: IpAddr, b_end: IpAddr) -> bool {
    a_start <= b_end && b_start <= a_end
}

/// Picks and persists a new assignment under a short exclusive lease on the
/// pool row (spec §4.2 concurrency requirement and §5's per-pool lock),
/// taken via `SELECT ... FOR UPDATE` so two concurrent allocations in the
/// same pool cannot observe the same "currently assigned" snapshot.
pub async fn allocate(
    pool: &PgPool,
    client_id: Uuid,
    pool_id: Uuid,
    ip_group_id: Option<Uuid>,
    requested_ip: Option<IpAddr>,
    is_primary: bool,
) -> Result<IpAssignment> {
    let mut tx = pool.begin().await?;

    let ip_pool: IpPool = sqlx::query_as(
        "SELECT id, cidr, description FROM ip_pool WHERE id = $1 FOR UPDATE",
    )
    .bind(pool_id)
    .fetch_optional(&mut *tx)
    .await?
    .ok_or_else(|| Error::NotFound(format!("ip pool {pool_id} not found")))?;

    let ip_group_range = match ip_group_id {
        Some(gid) => {
            let group: IpGroup = sqlx::query_as(
                "SELECT id, pool_id, name, start_ip, end_ip FROM ip_group WHERE id = $1 AND pool_id = $2",
            )
            .bind(gid)
            .bind(pool_id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| Error::NotFound(format!("ip_group {gid} not found in pool {pool_id}")))?;

            Some((group.start_ip, group.end_ip))
        }
        None => None,
    };

    let assigned_rows: Vec<(IpAddr,)> =
        sqlx::query_as("SELECT ip_address FROM ip_assignment WHERE pool_id = $1")
            .bind(pool_id)
            .fetch_all(&mut *tx)
            .await?;
    let assigned: HashSet<IpAddr> = assigned_rows.into_iter().map(|(ip,)| ip).collect();

    let network = ip_pool
        .network()
        .map_err(|e| Error::Validation(format!("pool {pool_id} has an unparsable cidr: {e}")))?;
    let ip_address = meshctl_ipam::allocate(network, ip_group_range, &assigned, requested_ip)?;

    if is_primary {
        sqlx::query("UPDATE ip_assignment SET is_primary = false WHERE client_id = $1")
            .bind(client_id)
            .execute(&mut *tx)
            .await?;
    }

    let assignment = sqlx::query_as::<_, IpAssignment>(
        r#"
        INSERT INTO ip_assignment (client_id, pool_id, ip_group_id, ip_address, is_primary)
        VALUES ($1, $2, $3, $4, $5)
        RETURNING id, client_id, pool_id, ip_group_id, ip_address, is_primary
        "#,
    )
    .bind(client_id)
    .bind(pool_id)
    .bind(ip_group_id)
    .bind(ip_address)
    .bind(is_primary)
    .fetch_one(&mut *tx)
    .await?;

    sqlx::query("UPDATE client SET config_dirty_at = now() WHERE id = $1")
        .bind(client_id)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;

    Ok(assignment)
}

/// Releases an assignment (client deletion, pool reassignment, or ip-group
/// reassignment per spec §4.2) and dirties the owning client — the IP
/// change alone is sufficient to trigger cert reissue even though the
/// groups-hash is unaffected (spec §4.2 last sentence).
pub async fn release(pool: &PgPool, assignment_id: Uuid) -> Result<()> {
    let mut tx = pool.begin().await?;

    let client_id: Option<Uuid> = sqlx::query_scalar(
        "DELETE FROM ip_assignment WHERE id = $1 RETURNING client_id",
    )
    .bind(assignment_id)
    .fetch_optional(&mut *tx)
    .await?;

    let client_id = client_id.ok_or_else(|| Error::NotFound(format!("ip assignment {assignment_id} not found")))?;

    sqlx::query("UPDATE client SET config_dirty_at = now() WHERE id = $1")
        .bind(client_id)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;
    Ok(())
}
