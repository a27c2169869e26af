//! Database initialization
//!
//! Opens (or creates) the SQLite database, creates the base tables, runs the
//! numbered migrations and seeds the default roles, permissions and landing
//! qualifications. Every step is idempotent.

use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::str::FromStr;
use std::time::Duration;
use tracing::info;

use crate::access::Permission;
use crate::models::{CrewType, LandingKind, QualificationGroup, RoleLevel};
use crate::Result;

/// Validity window given to the seeded landing qualifications
const LANDING_VALIDITY_DAYS: i64 = 90;

/// Initialize database connection and create tables if needed
pub async fn init_database(database_url: &str) -> Result<SqlitePool> {
    let options = SqliteConnectOptions::from_str(database_url)?
        .create_if_missing(true)
        .foreign_keys(true)
        .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
        .busy_timeout(Duration::from_millis(5000));

    let pool = SqlitePoolOptions::new()
        .max_connections(10)
        .connect_with(options)
        .await?;

    info!("Opened database: {}", database_url);

    prepare_schema(&pool).await?;
    Ok(pool)
}

/// In-memory database for tests
///
/// A single connection keeps every query on the same in-memory database.
pub async fn init_memory_database() -> Result<SqlitePool> {
    let options = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .min_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect_with(options)
        .await?;

    prepare_schema(&pool).await?;
    Ok(pool)
}

async fn prepare_schema(pool: &SqlitePool) -> Result<()> {
    create_schema_version_table(pool).await?;
    create_qualifications_table(pool).await?;
    create_tripulantes_table(pool).await?;
    create_flights_table(pool).await?;
    create_flight_pilots_table(pool).await?;
    create_tripulante_qualificacoes_table(pool).await?;
    create_rbac_tables(pool).await?;

    crate::db::migrations::run_migrations(pool).await?;

    init_default_roles(pool).await?;
    init_default_catalog(pool).await?;
    Ok(())
}

pub async fn create_schema_version_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn create_qualifications_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS qualifications (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL,
            qual_group TEXT NOT NULL,
            validity_days INTEGER NOT NULL CHECK (validity_days > 0),
            applicable_to TEXT NOT NULL,
            retired_at TIMESTAMP,
            created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
            updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_qualifications_name_type ON qualifications(name, applicable_to)",
    )
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn create_tripulantes_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS tripulantes (
            nip INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            rank TEXT NOT NULL DEFAULT '',
            position TEXT NOT NULL DEFAULT '',
            email TEXT UNIQUE,
            crew_type TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'PRESENT' CHECK (status IN ('PRESENT', 'ABSENT')),
            role_level INTEGER NOT NULL DEFAULT 20 CHECK (role_level IN (20, 40, 60, 80, 100)),
            password_hash TEXT,
            created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
            updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn create_flights_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS flights (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            airtask TEXT NOT NULL,
            flight_date DATE NOT NULL,
            origin TEXT NOT NULL,
            destination TEXT NOT NULL,
            departure TEXT NOT NULL,
            arrival TEXT NOT NULL,
            duration TEXT NOT NULL,
            flight_type TEXT NOT NULL,
            flight_action TEXT NOT NULL,
            tail INTEGER NOT NULL,
            landings INTEGER NOT NULL DEFAULT 0,
            passengers INTEGER NOT NULL DEFAULT 0,
            doe INTEGER NOT NULL DEFAULT 0,
            cargo INTEGER NOT NULL DEFAULT 0,
            fuel INTEGER NOT NULL DEFAULT 0,
            orm INTEGER NOT NULL DEFAULT 0,
            num_crew INTEGER NOT NULL DEFAULT 0,
            ops_timestamps TEXT,
            created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
            updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn create_flight_pilots_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS flight_pilots (
            flight_id INTEGER NOT NULL REFERENCES flights(id) ON DELETE CASCADE,
            crew_nip INTEGER NOT NULL REFERENCES tripulantes(nip) ON DELETE RESTRICT,
            seq INTEGER NOT NULL DEFAULT 0,
            position TEXT NOT NULL DEFAULT '',
            day_landings INTEGER,
            night_landings INTEGER,
            prec_app INTEGER,
            nprec_app INTEGER,
            qual1 INTEGER REFERENCES qualifications(id),
            qual2 INTEGER REFERENCES qualifications(id),
            qual3 INTEGER REFERENCES qualifications(id),
            qual4 INTEGER REFERENCES qualifications(id),
            qual5 INTEGER REFERENCES qualifications(id),
            qual6 INTEGER REFERENCES qualifications(id),
            PRIMARY KEY (flight_id, crew_nip)
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn create_tripulante_qualificacoes_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS tripulante_qualificacoes (
            crew_nip INTEGER NOT NULL REFERENCES tripulantes(nip) ON DELETE CASCADE,
            qual_id INTEGER NOT NULL REFERENCES qualifications(id) ON DELETE CASCADE,
            last_validated DATE NOT NULL,
            PRIMARY KEY (crew_nip, qual_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Role tables: `role_level` on the roster is authoritative, names are cosmetic
pub async fn create_rbac_tables(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS roles (
            level INTEGER PRIMARY KEY,
            name TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS permissions (
            name TEXT PRIMARY KEY,
            min_level INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS role_permissions (
            role_level INTEGER NOT NULL REFERENCES roles(level) ON DELETE CASCADE,
            permission TEXT NOT NULL REFERENCES permissions(name) ON DELETE CASCADE,
            PRIMARY KEY (role_level, permission)
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Seed roles and permission thresholds; existing rows are left as configured
async fn init_default_roles(pool: &SqlitePool) -> Result<()> {
    for level in RoleLevel::ALL {
        sqlx::query("INSERT OR IGNORE INTO roles (level, name) VALUES (?, ?)")
            .bind(level.value())
            .bind(level.label())
            .execute(pool)
            .await?;
    }

    for permission in Permission::ALL {
        sqlx::query("INSERT OR IGNORE INTO permissions (name, min_level) VALUES (?, ?)")
            .bind(permission.as_str())
            .bind(permission.default_threshold().value())
            .execute(pool)
            .await?;
    }

    sqlx::query(
        r#"
        INSERT OR IGNORE INTO role_permissions (role_level, permission)
        SELECT r.level, p.name FROM roles r JOIN permissions p ON r.level >= p.min_level
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Seed the implicit landing qualifications when the catalog lacks them
async fn init_default_catalog(pool: &SqlitePool) -> Result<()> {
    for kind in LandingKind::ALL {
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM qualifications WHERE name = ? AND applicable_to = ?)",
        )
        .bind(kind.catalog_name())
        .bind(CrewType::Pilot.as_str())
        .fetch_one(pool)
        .await?;

        if !exists {
            sqlx::query(
                "INSERT INTO qualifications (name, qual_group, validity_days, applicable_to) VALUES (?, ?, ?, ?)",
            )
            .bind(kind.catalog_name())
            .bind(QualificationGroup::Landing.as_str())
            .bind(LANDING_VALIDITY_DAYS)
            .bind(CrewType::Pilot.as_str())
            .execute(pool)
            .await?;
            info!("Seeded landing qualification {}", kind.catalog_name());
        }
    }
    Ok(())
}
