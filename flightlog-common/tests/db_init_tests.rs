//! Tests for database initialization, seeding and RBAC thresholds

use flightlog_common::access::Permission;
use flightlog_common::db::init::{init_database, init_memory_database};
use flightlog_common::db::rbac::{load_access_policy, set_permission_threshold};
use flightlog_common::RoleLevel;

fn database_url(dir: &tempfile::TempDir, name: &str) -> String {
    format!("sqlite://{}?mode=rwc", dir.path().join(name).display())
}

#[tokio::test]
async fn test_database_creation_when_missing() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("flightlog.db");
    assert!(!path.exists());

    let result = init_database(&database_url(&dir, "flightlog.db")).await;
    assert!(result.is_ok(), "Database initialization failed: {:?}", result.err());
    assert!(path.exists(), "Database file was not created");
}

#[tokio::test]
async fn test_database_opens_existing() {
    let dir = tempfile::tempdir().unwrap();
    let url = database_url(&dir, "existing.db");

    let pool1 = init_database(&url).await.unwrap();
    pool1.close().await;

    let pool2 = init_database(&url).await;
    assert!(pool2.is_ok(), "Failed to open existing database: {:?}", pool2.err());

    // Seeds are not duplicated on reopen
    let landing: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM qualifications WHERE qual_group = 'LANDING'")
        .fetch_one(&pool2.unwrap())
        .await
        .unwrap();
    assert_eq!(landing, 4);
}

#[tokio::test]
async fn test_landing_qualifications_seeded() {
    let pool = init_memory_database().await.unwrap();

    let names: Vec<String> = sqlx::query_scalar(
        "SELECT name FROM qualifications WHERE applicable_to = 'PILOT' ORDER BY id",
    )
    .fetch_all(&pool)
    .await
    .unwrap();

    assert_eq!(names, vec!["ATR", "ATN", "precapp", "nprecapp"]);
}

#[tokio::test]
async fn test_default_roles_and_permissions() {
    let pool = init_memory_database().await.unwrap();

    let roles: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM roles")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(roles, 5);

    let policy = load_access_policy(&pool).await.unwrap();
    assert_eq!(policy.threshold(Permission::FlightsCreate), RoleLevel::Operator);
    assert_eq!(policy.threshold(Permission::FlightsUpdate), RoleLevel::Supervisor);
    assert_eq!(policy.threshold(Permission::FlightsReprocess), RoleLevel::Admin);

    // Viewers hold only the read permissions
    let viewer_grants: Vec<String> = sqlx::query_scalar(
        "SELECT permission FROM role_permissions WHERE role_level = 20 ORDER BY permission",
    )
    .fetch_all(&pool)
    .await
    .unwrap();
    assert_eq!(viewer_grants, vec!["dashboard.read", "flights.list"]);
}

#[tokio::test]
async fn test_permission_threshold_change_is_loaded() {
    let pool = init_memory_database().await.unwrap();

    set_permission_threshold(&pool, Permission::FlightsCreate, RoleLevel::Manager)
        .await
        .unwrap();

    let policy = load_access_policy(&pool).await.unwrap();
    assert_eq!(policy.threshold(Permission::FlightsCreate), RoleLevel::Manager);

    let granted: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM role_permissions WHERE permission = 'flights.create'",
    )
    .fetch_one(&pool)
    .await
    .unwrap();
    assert_eq!(granted, 2);
}
