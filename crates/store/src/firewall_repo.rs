use sqlx::PgPool;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::models::{Direction, FirewallRule, FirewallRuleset, Proto, Selector};

pub async fn create_ruleset(pool: &PgPool, name: &str, owner: &str) -> Result<FirewallRuleset> {
    sqlx::query_as::<_, FirewallRuleset>(
        "INSERT INTO firewall_ruleset (name, owner) VALUES ($1, $2) RETURNING id, name, owner",
    )
    .bind(name)
    .bind(owner)
    .fetch_one(pool)
    .await
    .map_err(|e| match &e {
        sqlx::Error::Database(db_err) if db_err.constraint().is_some() => {
            Error::Conflict(format!("a ruleset named '{name}' already exists"))
        }
        _ => Error::Database(e),
    })
}

pub async fn get_ruleset(pool: &PgPool, ruleset_id: Uuid) -> Result<FirewallRuleset> {
    sqlx::query_as::<_, FirewallRuleset>("SELECT id, name, owner FROM firewall_ruleset WHERE id = $1")
        .bind(ruleset_id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| Error::NotFound(format!("ruleset {ruleset_id} not found")))
}

pub async fn delete_ruleset(pool: &PgPool, ruleset_id: Uuid) -> Result<()> {
    let result = sqlx::query("DELETE FROM firewall_ruleset WHERE id = $1")
        .bind(ruleset_id)
        .execute(pool)
        .await
        .map_err(|e| match &e {
            sqlx::Error::Database(db_err) if db_err.is_foreign_key_violation() => {
                Error::Conflict(format!("ruleset {ruleset_id} is still assigned to a client"))
            }
            _ => Error::Database(e),
        })?;

    if result.rows_affected() == 0 {
        return Err(Error::NotFound(format!("ruleset {ruleset_id} not found")));
    }
    Ok(())
}

pub async fn rules_for_ruleset<'e, E>(executor: E, ruleset_id: Uuid) -> Result<Vec<FirewallRule>>
where
    E: sqlx::PgExecutor<'e>,
{
    use sqlx::Row;

    let rows = sqlx::query(
        r#"
        SELECT id, ruleset_id, position, direction, port, proto, selector_kind, selector_value
        FROM firewall_rule WHERE ruleset_id = $1 ORDER BY position
        "#,
    )
    .bind(ruleset_id)
    .fetch_all(executor)
    .await?;

    rows.into_iter()
        .map(|row| {
            let direction_text: String = row.get("direction");
            let proto_text: String = row.get("proto");
            let selector_kind: String = row.get("selector_kind");
            let selector_value: String = row.get("selector_value");

            let direction = match direction_text.as_str() {
                "inbound" => Direction::Inbound,
                "outbound" => Direction::Outbound,
                other => return Err(Error::Validation(format!("unknown direction '{other}'"))),
            };
            let proto = match proto_text.as_str() {
                "tcp" => Proto::Tcp,
                "udp" => Proto::Udp,
                "icmp" => Proto::Icmp,
                "any" => Proto::Any,
                other => return Err(Error::Validation(format!("unknown proto '{other}'"))),
            };
            let selector = Selector::from_kind_value(&selector_kind, &selector_value)
                .ok_or_else(|| Error::Validation(format!("unknown selector kind '{selector_kind}'")))?;

            Ok(FirewallRule {
                id: row.get("id"),
                ruleset_id: row.get("ruleset_id"),
                position: row.get("position"),
                direction,
                port: row.get("port"),
                proto,
                selector,
            })
        })
        .collect()
}

/// Appends or replaces rule `position` in `ruleset_id`, then dirties every
/// client that references the ruleset (spec §4.3 row 3: "any rule
/// add/remove/edit"). At least one selector per rule is already guaranteed
/// by `Selector` being a closed, non-optional enum.
pub async fn put_rule(
    pool: &PgPool,
    ruleset_id: Uuid,
    position: i32,
    direction: Direction,
    port: &str,
    proto: Proto,
    selector: &Selector,
) -> Result<FirewallRule> {
    let direction_text = match direction {
        Direction::Inbound => "inbound",
        Direction::Outbound => "outbound",
    };
    let proto_text = match proto {
        Proto::Tcp => "tcp",
        Proto::Udp => "udp",
        Proto::Icmp => "icmp",
        Proto::Any => "any",
    };

    let mut tx = pool.begin().await?;

    let id: Uuid = sqlx::query_scalar(
        r#"
        INSERT INTO firewall_rule (ruleset_id, position, direction, port, proto, selector_kind, selector_value)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        RETURNING id
        "#,
    )
    .bind(ruleset_id)
    .bind(position)
    .bind(direction_text)
    .bind(port)
    .bind(proto_text)
    .bind(selector.kind())
    .bind(selector.value_string())
    .fetch_one(&mut *tx)
    .await?;

    sqlx::query(
        "UPDATE client SET config_dirty_at = now() WHERE id IN (SELECT client_id FROM ruleset_assignment WHERE ruleset_id = $1)",
    )
    .bind(ruleset_id)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;

    Ok(FirewallRule {
        id,
        ruleset_id,
        position,
        direction,
        port: port.to_string(),
        proto,
        selector: selector.clone(),
    })
}

pub async fn remove_rule(pool: &PgPool, ruleset_id: Uuid, rule_id: Uuid) -> Result<()> {
    let result = sqlx::query("DELETE FROM firewall_rule WHERE id = $1 AND ruleset_id = $2")
        .bind(rule_id)
        .bind(ruleset_id)
        .execute(pool)
        .await?;

    if result.rows_affected() == 0 {
        return Err(Error::NotFound(format!("rule {rule_id} not found in ruleset {ruleset_id}")));
    }

    crate::client_repo::dirty_clients_for_ruleset(pool, ruleset_id).await?;
    Ok(())
}
