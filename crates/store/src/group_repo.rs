use sqlx::PgPool;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::models::Group;

/// Creates group `name`. If `name` has a colon-separated parent (`a:b:c`
/// implies `a:b`), that parent must already exist.
pub async fn create(pool: &PgPool, name: &str, owner: &str) -> Result<Group> {
    let parent_id = match Group::parent_path(name) {
        Some(parent_name) => {
            let id: Option<Uuid> = sqlx::query_scalar("SELECT id FROM group_ WHERE name = $1")
                .bind(parent_name)
                .fetch_optional(pool)
                .await?;

            Some(id.ok_or_else(|| {
                Error::Conflict(format!(
                    "parent group '{parent_name}' must exist before creating '{name}'"
                ))
            })?)
        }
        None => None,
    };

    sqlx::query_as::<_, Group>(
        "INSERT INTO group_ (name, parent_id, owner) VALUES ($1, $2, $3) RETURNING id, name, parent_id, owner",
    )
    .bind(name)
    .bind(parent_id)
    .bind(owner)
    .fetch_one(pool)
    .await
    .map_err(|e| match &e {
        sqlx::Error::Database(db_err) if db_err.constraint().is_some() => {
            Error::Conflict(format!("a group named '{name}' already exists"))
        }
        _ => Error::Database(e),
    })
}

pub async fn get(pool: &PgPool, group_id: Uuid) -> Result<Group> {
    sqlx::query_as::<_, Group>("SELECT id, name, parent_id, owner FROM group_ WHERE id = $1")
        .bind(group_id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| Error::NotFound(format!("group {group_id} not found")))
}

pub async fn list(pool: &PgPool) -> Result<Vec<Group>> {
    let rows = sqlx::query_as::<_, Group>("SELECT id, name, parent_id, owner FROM group_ ORDER BY name")
        .fetch_all(pool)
        .await?;
    Ok(rows)
}

/// Renames a group and dirties every client that references it directly
/// (spec §4.3 row 2). The `name` column carries the hierarchical path, so a
/// rename here does not attempt to cascade into descendants' paths; any
/// deployment needing that can create the new child groups explicitly.
pub async fn rename(pool: &PgPool, group_id: Uuid, new_name: &str) -> Result<Group> {
    let mut tx = pool.begin().await?;

    let group = sqlx::query_as::<_, Group>(
        "UPDATE group_ SET name = $2 WHERE id = $1 RETURNING id, name, parent_id, owner",
    )
    .bind(group_id)
    .bind(new_name)
    .fetch_optional(&mut *tx)
    .await
    .map_err(|e| match &e {
        sqlx::Error::Database(db_err) if db_err.constraint().is_some() => {
            Error::Conflict(format!("a group named '{new_name}' already exists"))
        }
        _ => Error::Database(e),
    })?
    .ok_or_else(|| Error::NotFound(format!("group {group_id} not found")))?;

    sqlx::query(
        "UPDATE client SET config_dirty_at = now() WHERE id IN (SELECT client_id FROM client_group WHERE group_id = $1)",
    )
    .bind(group_id)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(group)
}

/// Deletion is forbidden while the group has subgroups, member clients, or
/// ruleset references pointing at it (spec §3 Group invariant). The
/// `ON DELETE RESTRICT` foreign keys on `group_.parent_id` and
/// `client_group.group_id` already enforce this at the database level; this
/// function turns the resulting constraint violation into a typed error.
pub async fn delete(pool: &PgPool, group_id: Uuid) -> Result<()> {
    let result = sqlx::query("DELETE FROM group_ WHERE id = $1")
        .bind(group_id)
        .execute(pool)
        .await
        .map_err(|e| match &e {
            sqlx::Error::Database(db_err) if db_err.is_foreign_key_violation() => Error::Conflict(format!(
                "group {group_id} is still referenced by a subgroup or a client"
            )),
            _ => Error::Database(e),
        })?;

    if result.rows_affected() == 0 {
        return Err(Error::NotFound(format!("group {group_id} not found")));
    }
    Ok(())
}
