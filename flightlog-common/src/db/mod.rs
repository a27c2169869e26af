//! Database bootstrap, migrations and RBAC tables

pub mod init;
pub mod migrations;
pub mod rbac;

pub use init::{init_database, init_memory_database};
pub use migrations::run_migrations;
pub use rbac::load_access_policy;
