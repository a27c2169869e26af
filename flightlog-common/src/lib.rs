//! # Flight Log Common Library
//!
//! Shared code for the squadron flight log service:
//! - Domain model (qualifications, crew, flights, currency records)
//! - Error type
//! - Configuration loading
//! - Database bootstrap and migrations
//! - Access gate and session token primitives
//! - Date and duration helpers

pub mod access;
pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod time;

pub use error::{Error, FieldViolation, Result};
pub use models::{CrewType, QualificationGroup, RoleLevel};
