//! HTTP API handlers for flightlog-server

pub mod auth;
pub mod dashboard;
pub mod flights;
pub mod health;
pub mod qualifications;
pub mod session;
pub mod users;

pub use auth::auth_middleware;
pub use health::health_routes;
pub use session::session_routes;

use serde::Deserialize;

/// `?year=` with an optional page
#[derive(Debug, Deserialize)]
pub struct YearQuery {
    pub year: Option<i32>,
    pub page: Option<i64>,
}

impl YearQuery {
    /// Requested year, defaulting to the current one
    pub fn year_or_current(&self) -> i32 {
        use chrono::Datelike;
        self.year.unwrap_or_else(|| flightlog_common::time::today().year())
    }
}
