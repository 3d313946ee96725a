//! Admin principals.

use sqlx::SqlitePool;

use super::models::AdminUser;
use super::{map_unique, Result, StoreError};
use crate::util::now_timestamp;

const COLUMNS: &str = "id, email, name, picture, role, is_active, created_at";

pub async fn create_admin(pool: &SqlitePool, email: &str, role: &str) -> Result<AdminUser> {
    let created_at = now_timestamp();
    let result = sqlx::query(
        r#"
        INSERT INTO admin_users (email, role, is_active, created_at)
        VALUES (?, ?, 1, ?)
        "#,
    )
    .bind(email)
    .bind(role)
    .bind(&created_at)
    .execute(pool)
    .await
    .map_err(|e| map_unique(e, "Admin", email))?;

    Ok(AdminUser {
        id: result.last_insert_rowid(),
        email: email.to_string(),
        name: None,
        picture: None,
        role: role.to_string(),
        is_active: true,
        created_at,
    })
}

pub async fn get_admin_by_email(pool: &SqlitePool, email: &str) -> Result<AdminUser> {
    sqlx::query_as::<_, AdminUser>(&format!(
        "SELECT {COLUMNS} FROM admin_users WHERE email = ? COLLATE NOCASE"
    ))
    .bind(email)
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| StoreError::NotFound {
        entity: "Admin",
        id: email.to_string(),
    })
}

pub async fn get_admin(pool: &SqlitePool, id: i64) -> Result<AdminUser> {
    sqlx::query_as::<_, AdminUser>(&format!("SELECT {COLUMNS} FROM admin_users WHERE id = ?"))
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| StoreError::NotFound {
            entity: "Admin",
            id: id.to_string(),
        })
}

pub async fn list_admins(pool: &SqlitePool) -> Result<Vec<AdminUser>> {
    let rows = sqlx::query_as::<_, AdminUser>(&format!(
        "SELECT {COLUMNS} FROM admin_users ORDER BY id ASC"
    ))
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

/// Mark a principal inactive. Idempotent for already inactive rows.
pub async fn deactivate_admin(pool: &SqlitePool, id: i64) -> Result<()> {
    let result = sqlx::query("UPDATE admin_users SET is_active = 0 WHERE id = ?")
        .bind(id)
        .execute(pool)
        .await?;
    if result.rows_affected() == 0 {
        return Err(StoreError::NotFound {
            entity: "Admin",
            id: id.to_string(),
        });
    }
    Ok(())
}

/// Refresh display name and avatar from a verified identity.
pub async fn update_profile(
    pool: &SqlitePool,
    email: &str,
    name: Option<&str>,
    picture: Option<&str>,
) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE admin_users
        SET name = COALESCE(?, name), picture = COALESCE(?, picture)
        WHERE email = ? COLLATE NOCASE
        "#,
    )
    .bind(name)
    .bind(picture)
    .bind(email)
    .execute(pool)
    .await?;
    Ok(())
}
