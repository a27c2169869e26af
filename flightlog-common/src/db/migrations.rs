//! Database schema migrations
//!
//! Versioned schema migrations so databases created by older builds upgrade
//! in place. Base tables are created with `CREATE TABLE IF NOT EXISTS` in
//! `init.rs`; migrations bring older layouts up to date and add indexes.
//!
//! # Migration Guidelines
//!
//! 1. **Never modify existing migrations** - databases in the field depend on them
//! 2. **Always add new migrations** - one function per schema change
//! 3. **Idempotent** - check before altering, so a rerun is harmless
//! 4. **Use ALTER TABLE** - prefer it over DROP/CREATE to preserve data

use sqlx::SqlitePool;
use tracing::{info, warn};

use crate::Result;

/// Current schema version
///
/// **IMPORTANT:** Increment this when adding new migrations
pub const CURRENT_SCHEMA_VERSION: i32 = 3;

/// Get current schema version from database
///
/// Returns 0 if schema_version table doesn't exist or has no rows
pub async fn get_schema_version(pool: &SqlitePool) -> Result<i32> {
    let table_exists: bool = sqlx::query_scalar(
        r#"
        SELECT EXISTS(
            SELECT 1 FROM sqlite_master
            WHERE type='table' AND name='schema_version'
        )
        "#,
    )
    .fetch_one(pool)
    .await?;

    if !table_exists {
        return Ok(0);
    }

    let version: Option<i32> =
        sqlx::query_scalar("SELECT version FROM schema_version ORDER BY version DESC LIMIT 1")
            .fetch_optional(pool)
            .await?;

    Ok(version.unwrap_or(0))
}

async fn set_schema_version(pool: &SqlitePool, version: i32) -> Result<()> {
    sqlx::query("INSERT INTO schema_version (version) VALUES (?)")
        .bind(version)
        .execute(pool)
        .await?;

    Ok(())
}

/// Run all pending migrations
pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    let current_version = get_schema_version(pool).await?;

    if current_version == CURRENT_SCHEMA_VERSION {
        info!("Database schema is up to date (v{})", current_version);
        return Ok(());
    }

    if current_version > CURRENT_SCHEMA_VERSION {
        warn!(
            "Database schema version ({}) is newer than code version ({})",
            current_version, CURRENT_SCHEMA_VERSION
        );
        return Ok(());
    }

    info!(
        "Running database migrations: v{} -> v{}",
        current_version, CURRENT_SCHEMA_VERSION
    );

    if current_version < 1 {
        migrate_v1(pool).await?;
        set_schema_version(pool, 1).await?;
        info!("✓ Migration v1 completed");
    }

    if current_version < 2 {
        migrate_v2(pool).await?;
        set_schema_version(pool, 2).await?;
        info!("✓ Migration v2 completed");
    }

    if current_version < 3 {
        migrate_v3(pool).await?;
        set_schema_version(pool, 3).await?;
        info!("✓ Migration v3 completed");
    }

    info!("All migrations completed successfully");
    Ok(())
}

async fn has_column(pool: &SqlitePool, table: &str, column: &str) -> Result<bool> {
    let count: i64 = sqlx::query_scalar(&format!(
        "SELECT COUNT(*) FROM pragma_table_info('{table}') WHERE name = ?"
    ))
    .bind(column)
    .fetch_one(pool)
    .await?;
    Ok(count > 0)
}

/// Migration v1: logical deletion of catalog entries
///
/// Older catalogs could only hard-delete qualifications. `retired_at` lets a
/// referenced qualification leave the catalog without touching flight history.
async fn migrate_v1(pool: &SqlitePool) -> Result<()> {
    info!("Running migration v1: Add retired_at column to qualifications");

    if has_column(pool, "qualifications", "retired_at").await? {
        info!("  retired_at column already exists - skipping");
        return Ok(());
    }

    sqlx::query("ALTER TABLE qualifications ADD COLUMN retired_at TIMESTAMP")
        .execute(pool)
        .await?;

    info!("  ✓ Added retired_at column to qualifications table");
    Ok(())
}

/// Migration v2: crew ordering and operational timestamps
///
/// Participations gained a `seq` column so crew lists come back in the order
/// they were entered; flights gained free-form `ops_timestamps`.
async fn migrate_v2(pool: &SqlitePool) -> Result<()> {
    info!("Running migration v2: Add flight_pilots.seq and flights.ops_timestamps");

    if !has_column(pool, "flight_pilots", "seq").await? {
        sqlx::query("ALTER TABLE flight_pilots ADD COLUMN seq INTEGER NOT NULL DEFAULT 0")
            .execute(pool)
            .await?;
        info!("  ✓ Added seq column to flight_pilots table");
    }

    if !has_column(pool, "flights", "ops_timestamps").await? {
        sqlx::query("ALTER TABLE flights ADD COLUMN ops_timestamps TEXT")
            .execute(pool)
            .await?;
        info!("  ✓ Added ops_timestamps column to flights table");
    }

    Ok(())
}

/// Migration v3: indexes for date-ordered replay and per-crew reconciliation
async fn migrate_v3(pool: &SqlitePool) -> Result<()> {
    info!("Running migration v3: Add flight and currency indexes");

    for statement in [
        "CREATE INDEX IF NOT EXISTS idx_flights_date ON flights(flight_date, id)",
        "CREATE INDEX IF NOT EXISTS idx_flight_pilots_crew ON flight_pilots(crew_nip)",
        "CREATE INDEX IF NOT EXISTS idx_currency_qual ON tripulante_qualificacoes(qual_id)",
    ] {
        sqlx::query(statement).execute(pool).await?;
    }

    info!("  ✓ Indexes in place");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn memory_pool() -> SqlitePool {
        SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_migrations_upgrade_legacy_layout() {
        let pool = memory_pool().await;
        crate::db::init::create_schema_version_table(&pool).await.unwrap();

        // Layout written by builds that predate the migrations
        sqlx::query(
            "CREATE TABLE qualifications (id INTEGER PRIMARY KEY, name TEXT NOT NULL, qual_group TEXT NOT NULL, validity_days INTEGER NOT NULL, applicable_to TEXT NOT NULL)",
        )
        .execute(&pool)
        .await
        .unwrap();
        sqlx::query(
            "CREATE TABLE flights (id INTEGER PRIMARY KEY, flight_date DATE NOT NULL)",
        )
        .execute(&pool)
        .await
        .unwrap();
        sqlx::query(
            "CREATE TABLE flight_pilots (flight_id INTEGER NOT NULL, crew_nip INTEGER NOT NULL)",
        )
        .execute(&pool)
        .await
        .unwrap();
        sqlx::query(
            "CREATE TABLE tripulante_qualificacoes (crew_nip INTEGER, qual_id INTEGER, last_validated DATE)",
        )
        .execute(&pool)
        .await
        .unwrap();

        run_migrations(&pool).await.unwrap();

        assert!(has_column(&pool, "qualifications", "retired_at").await.unwrap());
        assert!(has_column(&pool, "flight_pilots", "seq").await.unwrap());
        assert!(has_column(&pool, "flights", "ops_timestamps").await.unwrap());
        assert_eq!(get_schema_version(&pool).await.unwrap(), CURRENT_SCHEMA_VERSION);

        // Second run is a no-op
        run_migrations(&pool).await.unwrap();
        assert_eq!(get_schema_version(&pool).await.unwrap(), CURRENT_SCHEMA_VERSION);
    }
}
