use sqlx::PgPool;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::models::{Client, FirewallRule, FirewallRuleset, Group, IpAssignment, IpPool};

pub async fn create(
    pool: &PgPool,
    name: &str,
    owner: &str,
    is_lighthouse: bool,
    public_ip: Option<std::net::IpAddr>,
) -> Result<Client> {
    if is_lighthouse && public_ip.is_none() {
        return Err(Error::Validation(
            "a lighthouse client requires a public_ip".into(),
        ));
    }

    sqlx::query_as::<_, Client>(
        r#"
        INSERT INTO client (name, owner, is_lighthouse, public_ip)
        VALUES ($1, $2, $3, $4)
        RETURNING id, name, owner, is_lighthouse, public_ip, is_blocked, notes, config_dirty_at,
                  last_delivered_at, reported_client_version, reported_nebula_version, archived_at, created_at
        "#,
    )
    .bind(name)
    .bind(owner)
    .bind(is_lighthouse)
    .bind(public_ip)
    .fetch_one(pool)
    .await
    .map_err(|e| match &e {
        sqlx::Error::Database(db_err) if db_err.constraint().is_some() => {
            Error::Conflict(format!("a client named '{name}' already exists"))
        }
        _ => Error::Database(e),
    })
}

pub async fn get<'e, E>(executor: E, client_id: Uuid) -> Result<Client>
where
    E: sqlx::PgExecutor<'e>,
{
    sqlx::query_as::<_, Client>(
        r#"
        SELECT id, name, owner, is_lighthouse, public_ip, is_blocked, notes, config_dirty_at,
               last_delivered_at, reported_client_version, reported_nebula_version, archived_at, created_at
        FROM client WHERE id = $1
        "#,
    )
    .bind(client_id)
    .fetch_optional(executor)
    .await?
    .ok_or_else(|| Error::NotFound(format!("client {client_id} not found")))
}

async fn mark_dirty(pool: &PgPool, client_id: Uuid) -> Result<()> {
    sqlx::query("UPDATE client SET config_dirty_at = now() WHERE id = $1")
        .bind(client_id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Affected set `{ X }` (spec §4.3 row 1): blocked flag, lighthouse flag,
/// or public_ip of a single client.
pub async fn set_blocked(pool: &PgPool, client_id: Uuid, is_blocked: bool) -> Result<Client> {
    let client = sqlx::query_as::<_, Client>(
        r#"
        UPDATE client SET is_blocked = $2 WHERE id = $1
        RETURNING id, name, owner, is_lighthouse, public_ip, is_blocked, notes, config_dirty_at,
                  last_delivered_at, reported_client_version, reported_nebula_version, archived_at, created_at
        "#,
    )
    .bind(client_id)
    .bind(is_blocked)
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| Error::NotFound(format!("client {client_id} not found")))?;

    mark_dirty(pool, client_id).await?;
    Ok(client)
}

/// A lighthouse's `public_ip` change dirties every client sharing its pool
/// (spec §4.3 row 4), since the static-host-map those clients receive
/// embeds that address.
pub async fn set_lighthouse_public_ip(
    pool: &PgPool,
    client_id: Uuid,
    public_ip: std::net::IpAddr,
) -> Result<Client> {
    let mut tx = pool.begin().await?;

    let client = sqlx::query_as::<_, Client>(
        r#"
        UPDATE client SET public_ip = $2 WHERE id = $1 AND is_lighthouse
        RETURNING id, name, owner, is_lighthouse, public_ip, is_blocked, notes, config_dirty_at,
                  last_delivered_at, reported_client_version, reported_nebula_version, archived_at, created_at
        "#,
    )
    .bind(client_id)
    .bind(public_ip)
    .fetch_optional(&mut *tx)
    .await?
    .ok_or_else(|| Error::NotFound(format!("lighthouse client {client_id} not found")))?;

    let pool_ids: Vec<Uuid> = sqlx::query_scalar(
        "SELECT DISTINCT pool_id FROM ip_assignment WHERE client_id = $1",
    )
    .bind(client_id)
    .fetch_all(&mut *tx)
    .await?;

    if !pool_ids.is_empty() {
        sqlx::query(
            r#"
            UPDATE client SET config_dirty_at = now()
            WHERE id IN (SELECT DISTINCT client_id FROM ip_assignment WHERE pool_id = ANY($1))
            "#,
        )
        .bind(&pool_ids)
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;
    Ok(client)
}

pub async fn set_notes(pool: &PgPool, client_id: Uuid, notes: Option<&str>) -> Result<Client> {
    let client = sqlx::query_as::<_, Client>(
        r#"
        UPDATE client SET notes = $2 WHERE id = $1
        RETURNING id, name, owner, is_lighthouse, public_ip, is_blocked, notes, config_dirty_at,
                  last_delivered_at, reported_client_version, reported_nebula_version, archived_at, created_at
        "#,
    )
    .bind(client_id)
    .bind(notes)
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| Error::NotFound(format!("client {client_id} not found")))?;

    mark_dirty(pool, client_id).await?;
    Ok(client)
}

pub async fn record_reported_versions(
    pool: &PgPool,
    client_id: Uuid,
    client_version: Option<&str>,
    nebula_version: Option<&str>,
) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE client
        SET reported_client_version = COALESCE($2, reported_client_version),
            reported_nebula_version = COALESCE($3, reported_nebula_version)
        WHERE id = $1
        "#,
    )
    .bind(client_id)
    .bind(client_version)
    .bind(nebula_version)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn stamp_delivered(pool: &PgPool, client_id: Uuid) -> Result<()> {
    sqlx::query("UPDATE client SET last_delivered_at = now() WHERE id = $1")
        .bind(client_id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Archival forbids further distribution but keeps history intact, mirroring
/// how Group deletion is forbidden rather than destructive where references
/// remain (spec §3's Group invariant, applied here as a supplemental soft
/// delete rather than a hard `DELETE`).
pub async fn archive(pool: &PgPool, client_id: Uuid) -> Result<()> {
    let result = sqlx::query("UPDATE client SET archived_at = now() WHERE id = $1 AND archived_at IS NULL")
        .bind(client_id)
        .execute(pool)
        .await?;

    if result.rows_affected() == 0 {
        return Err(Error::NotFound(format!("client {client_id} not found")));
    }
    Ok(())
}

pub async fn add_to_group(pool: &PgPool, client_id: Uuid, group_id: Uuid) -> Result<()> {
    sqlx::query(
        "INSERT INTO client_group (client_id, group_id) VALUES ($1, $2) ON CONFLICT DO NOTHING",
    )
    .bind(client_id)
    .bind(group_id)
    .execute(pool)
    .await?;

    mark_dirty(pool, client_id).await?;
    Ok(())
}

pub async fn remove_from_group(pool: &PgPool, client_id: Uuid, group_id: Uuid) -> Result<()> {
    sqlx::query("DELETE FROM client_group WHERE client_id = $1 AND group_id = $2")
        .bind(client_id)
        .bind(group_id)
        .execute(pool)
        .await?;

    mark_dirty(pool, client_id).await?;
    Ok(())
}

pub async fn assign_ruleset(pool: &PgPool, client_id: Uuid, ruleset_id: Uuid) -> Result<()> {
    sqlx::query(
        "INSERT INTO ruleset_assignment (client_id, ruleset_id) VALUES ($1, $2) ON CONFLICT DO NOTHING",
    )
    .bind(client_id)
    .bind(ruleset_id)
    .execute(pool)
    .await?;

    mark_dirty(pool, client_id).await?;
    Ok(())
}

pub async fn unassign_ruleset(pool: &PgPool, client_id: Uuid, ruleset_id: Uuid) -> Result<()> {
    sqlx::query("DELETE FROM ruleset_assignment WHERE client_id = $1 AND ruleset_id = $2")
        .bind(client_id)
        .bind(ruleset_id)
        .execute(pool)
        .await?;

    mark_dirty(pool, client_id).await?;
    Ok(())
}

/// Every client directly assigned group `group_id` (spec §4.3 row 2, used
/// when a group is renamed).
pub async fn dirty_clients_for_group(pool: &PgPool, group_id: Uuid) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE client SET config_dirty_at = now()
        WHERE id IN (SELECT client_id FROM client_group WHERE group_id = $1)
        "#,
    )
    .bind(group_id)
    .execute(pool)
    .await?;
    Ok(())
}

/// Every client referencing ruleset `ruleset_id` (spec §4.3 row 3, used
/// when a ruleset's rules change).
pub async fn dirty_clients_for_ruleset(pool: &PgPool, ruleset_id: Uuid) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE client SET config_dirty_at = now()
        WHERE id IN (SELECT client_id FROM ruleset_assignment WHERE ruleset_id = $1)
        "#,
    )
    .bind(ruleset_id)
    .execute(pool)
    .await?;
    Ok(())
}

/// Lighthouses sharing `pool_id`, for C4's static-host-map (spec §4.4 step
/// 4); the caller excludes the requesting client itself.
pub async fn get_lighthouses_for_pool(pool: &PgPool, pool_id: Uuid) -> Result<Vec<(Client, IpAssignment)>> {
    use sqlx::Row;

    let rows = sqlx::query(
        r#"
        SELECT
            c.id AS c_id, c.name AS c_name, c.owner AS c_owner, c.is_lighthouse AS c_is_lighthouse,
            c.public_ip AS c_public_ip, c.is_blocked AS c_is_blocked, c.notes AS c_notes,
            c.config_dirty_at AS c_config_dirty_at, c.last_delivered_at AS c_last_delivered_at,
            c.reported_client_version AS c_reported_client_version,
            c.reported_nebula_version AS c_reported_nebula_version,
            c.archived_at AS c_archived_at, c.created_at AS c_created_at,
            a.id AS a_id, a.client_id AS a_client_id, a.pool_id AS a_pool_id,
            a.ip_group_id AS a_ip_group_id, a.ip_address AS a_ip_address, a.is_primary AS a_is_primary
        FROM client c
        JOIN ip_assignment a ON a.client_id = c.id AND a.is_primary
        WHERE c.is_lighthouse AND a.pool_id = $1 AND c.archived_at IS NULL
        "#,
    )
    .bind(pool_id)
    .fetch_all(pool)
    .await?;

    let out = rows
        .into_iter()
        .map(|row| {
            let client = Client {
                id: row.get("c_id"),
                name: row.get("c_name"),
                owner: row.get("c_owner"),
                is_lighthouse: row.get("c_is_lighthouse"),
                public_ip: row.get("c_public_ip"),
                is_blocked: row.get("c_is_blocked"),
                notes: row.get("c_notes"),
                config_dirty_at: row.get("c_config_dirty_at"),
                last_delivered_at: row.get("c_last_delivered_at"),
                reported_client_version: row.get("c_reported_client_version"),
                reported_nebula_version: row.get("c_reported_nebula_version"),
                archived_at: row.get("c_archived_at"),
                created_at: row.get("c_created_at"),
            };
            let assignment = IpAssignment {
                id: row.get("a_id"),
                client_id: row.get("a_client_id"),
                pool_id: row.get("a_pool_id"),
                ip_group_id: row.get("a_ip_group_id"),
                ip_address: row.get("a_ip_address"),
                is_primary: row.get("a_is_primary"),
            };
            (client, assignment)
        })
        .collect();

    Ok(out)
}

/// Clients whose last delivered bundle predates their most recent policy
/// change, or who have never fetched at all — the operator-facing view of
/// "dirty" (spec GLOSSARY), used by the `cli` crate's inspection command.
pub async fn list_pending_delivery(pool: &PgPool) -> Result<Vec<Client>> {
    let rows = sqlx::query_as::<_, Client>(
        r#"
        SELECT id, name, owner, is_lighthouse, public_ip, is_blocked, notes, config_dirty_at,
               last_delivered_at, reported_client_version, reported_nebula_version, archived_at, created_at
        FROM client
        WHERE archived_at IS NULL
          AND (last_delivered_at IS NULL OR config_dirty_at > last_delivered_at)
        ORDER BY config_dirty_at DESC
        "#,
    )
    .fetch_all(pool)
    .await?;

    Ok(rows)
}

pub async fn groups_for_client<'e, E>(executor: E, client_id: Uuid) -> Result<Vec<Group>>
where
    E: sqlx::PgExecutor<'e>,
{
    let rows = sqlx::query_as::<_, Group>(
        r#"
        SELECT g.id, g.name, g.parent_id, g.owner
        FROM group_ g JOIN client_group cg ON cg.group_id = g.id
        WHERE cg.client_id = $1 ORDER BY g.name
        "#,
    )
    .bind(client_id)
    .fetch_all(executor)
    .await?;

    Ok(rows)
}

pub async fn rulesets_with_rules_for_client(
    tx: &mut sqlx::PgConnection,
    client_id: Uuid,
) -> Result<Vec<(FirewallRuleset, Vec<FirewallRule>)>> {
    let rulesets = sqlx::query_as::<_, FirewallRuleset>(
        r#"
        SELECT fr.id, fr.name, fr.owner
        FROM firewall_ruleset fr JOIN ruleset_assignment ra ON ra.ruleset_id = fr.id
        WHERE ra.client_id = $1 ORDER BY fr.name
        "#,
    )
    .bind(client_id)
    .fetch_all(&mut *tx)
    .await?;

    let mut out = Vec::with_capacity(rulesets.len());
    for ruleset in rulesets {
        let rules = crate::firewall_repo::rules_for_ruleset(&mut *tx, ruleset.id).await?;
        out.push((ruleset, rules));
    }
    Ok(out)
}

pub async fn primary_assignment<'e, E>(executor: E, client_id: Uuid) -> Result<Option<IpAssignment>>
where
    E: sqlx::PgExecutor<'e>,
{
    let row = sqlx::query_as::<_, IpAssignment>(
        r#"
        SELECT id, client_id, pool_id, ip_group_id, ip_address, is_primary
        FROM ip_assignment WHERE client_id = $1 AND is_primary
        "#,
    )
    .bind(client_id)
    .fetch_optional(executor)
    .await?;

    Ok(row)
}

pub async fn pool_for_assignment<'e, E>(executor: E, pool_id: Uuid) -> Result<IpPool>
where
    E: sqlx::PgExecutor<'e>,
{
    sqlx::query_as::<_, IpPool>("SELECT id, cidr, description FROM ip_pool WHERE id = $1")
        .bind(pool_id)
        .fetch_optional(executor)
        .await?
        .ok_or_else(|| Error::NotFound(format!("ip pool {pool_id} not found")))
}

/// Full read projection C4 needs to assemble a bundle (spec §4.3's
/// `get_client_with_relations`). Runs every inner query against the same
/// `REPEATABLE READ` transaction so the whole projection reflects a single
/// snapshot (spec §5: "reads in C4 use a single repeatable snapshot so a
/// bundle is internally consistent") — a concurrent group/ruleset/IP
/// mutation cannot be half-visible across the reads below.
pub async fn get_client_with_relations(
    pool: &PgPool,
    client_id: Uuid,
) -> Result<crate::models::ClientWithRelations> {
    let mut tx = pool.begin().await?;
    sqlx::query("SET TRANSACTION ISOLATION LEVEL REPEATABLE READ")
        .execute(&mut *tx)
        .await?;

    let client = get(&mut *tx, client_id).await?;
    let groups = groups_for_client(&mut *tx, client_id).await?;
    let rulesets = rulesets_with_rules_for_client(&mut tx, client_id).await?;
    let primary_assignment = primary_assignment(&mut *tx, client_id).await?;
    let ip_pool = match &primary_assignment {
        Some(a) => Some(pool_for_assignment(&mut *tx, a.pool_id).await?),
        None => None,
    };

    tx.commit().await?;

    Ok(crate::models::ClientWithRelations {
        client,
        groups,
        rulesets,
        primary_assignment,
        pool: ip_pool,
    })
}
