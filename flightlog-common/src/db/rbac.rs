//! Permission thresholds stored in the `permissions` table

use sqlx::SqlitePool;
use std::collections::HashMap;
use tracing::warn;

use crate::access::{AccessPolicy, Permission};
use crate::models::RoleLevel;
use crate::Result;

/// Load operation thresholds; unknown rows are ignored, missing ones use defaults
pub async fn load_access_policy(pool: &SqlitePool) -> Result<AccessPolicy> {
    let rows: Vec<(String, i64)> = sqlx::query_as("SELECT name, min_level FROM permissions")
        .fetch_all(pool)
        .await?;

    let mut thresholds = HashMap::new();
    for (name, min_level) in rows {
        let Some(permission) = Permission::from_name(&name) else {
            warn!("Ignoring unknown permission '{}'", name);
            continue;
        };
        match RoleLevel::try_from(min_level) {
            Ok(level) => {
                thresholds.insert(permission, level);
            }
            Err(_) => warn!(
                "Permission '{}' has invalid level {}; using default {}",
                name,
                min_level,
                permission.default_threshold()
            ),
        }
    }
    Ok(AccessPolicy::new(thresholds))
}

/// Change the threshold of one permission and refresh the derived role grants
pub async fn set_permission_threshold(
    pool: &SqlitePool,
    permission: Permission,
    level: RoleLevel,
) -> Result<()> {
    let mut tx = pool.begin().await?;
    sqlx::query("INSERT OR REPLACE INTO permissions (name, min_level) VALUES (?, ?)")
        .bind(permission.as_str())
        .bind(level.value())
        .execute(&mut *tx)
        .await?;
    sqlx::query("DELETE FROM role_permissions WHERE permission = ?")
        .bind(permission.as_str())
        .execute(&mut *tx)
        .await?;
    sqlx::query("INSERT INTO role_permissions (role_level, permission) SELECT level, ? FROM roles WHERE level >= ?")
        .bind(permission.as_str())
        .bind(level.value())
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;
    Ok(())
}
