//! Configuration loading
//!
//! Bootstrap configuration resolves in priority order:
//! 1. Command-line arguments (applied by the binary)
//! 2. Environment variables (`FLIGHTLOG_*`)
//! 3. TOML config file (explicit path, then `~/.config/flightlog/config.toml`,
//!    then `/etc/flightlog/config.toml`)
//! 4. Compiled defaults

use chrono::NaiveDate;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::models::default_epoch;
use crate::{Error, Result};

/// Deployment mode; gates the bulk exporter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[default]
    Development,
    Production,
}

impl Environment {
    pub fn is_production(&self) -> bool {
        matches!(self, Environment::Production)
    }
}

impl std::str::FromStr for Environment {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "development" | "dev" => Ok(Environment::Development),
            "production" | "prod" => Ok(Environment::Production),
            other => Err(Error::Config(format!("unknown environment '{other}'"))),
        }
    }
}

/// SameSite attribute of the refresh cookie
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
pub enum SameSite {
    #[default]
    Lax,
    None,
}

/// Top-level configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// sqlx connection string
    pub database_url: String,
    pub bind_address: String,
    pub port: u16,
    pub environment: Environment,
    /// Allowed CORS origins; empty disables cross-origin access
    pub cors_origins: Vec<String>,
    pub auth: AuthConfig,
    pub smtp: SmtpConfig,
    pub export: ExportConfig,
    pub currency: CurrencyConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    pub jwt_secret: String,
    pub access_token_minutes: u64,
    pub refresh_token_days: u64,
    pub refresh_cookie_path: String,
    pub refresh_cookie_same_site: SameSite,
}

/// Outgoing mail settings
///
/// The bundled log mailer only reports `host:port` as the relay next to each
/// message. `user` and `password` are accepted for an authenticated relay
/// transport and are not read by it.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub from: String,
    /// Base URL placed in password reset links
    pub reset_url: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ExportConfig {
    pub workers: usize,
    pub progress_interval: usize,
    pub max_attempts: u32,
    /// Linear backoff step between attempts
    pub retry_backoff_ms: u64,
    pub queue_capacity: usize,
    /// Local archive directory (used when `sink_url` is not set)
    pub sink_dir: PathBuf,
    /// Remote object store base URL
    pub sink_url: Option<String>,
    pub sink_token: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CurrencyConfig {
    /// "Never validated" sentinel date
    pub epoch: NaiveDate,
    /// Flights per commit during a full rebuild
    pub reprocess_batch_size: usize,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_url: "sqlite://flightlog.db?mode=rwc".to_string(),
            bind_address: "127.0.0.1".to_string(),
            port: 8090,
            environment: Environment::Development,
            cors_origins: Vec::new(),
            auth: AuthConfig::default(),
            smtp: SmtpConfig::default(),
            export: ExportConfig::default(),
            currency: CurrencyConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwt_secret: String::new(),
            access_token_minutes: 15,
            refresh_token_days: 30,
            refresh_cookie_path: "/auth".to_string(),
            refresh_cookie_same_site: SameSite::Lax,
        }
    }
}

impl Default for SmtpConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 587,
            user: String::new(),
            password: String::new(),
            from: "flightlog@localhost".to_string(),
            reset_url: "http://localhost:8090/reset".to_string(),
        }
    }
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            workers: 16,
            progress_interval: 10,
            max_attempts: 3,
            retry_backoff_ms: 500,
            queue_capacity: 1024,
            sink_dir: PathBuf::from("exports"),
            sink_url: None,
            sink_token: None,
        }
    }
}

impl Default for CurrencyConfig {
    fn default() -> Self {
        Self {
            epoch: default_epoch(),
            reprocess_batch_size: 50,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from TOML (if any) and environment overrides
    pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
        let mut config = match locate_config_file(explicit_path)? {
            Some(path) => {
                info!("Loading configuration from {}", path.display());
                Self::from_toml_file(&path)?
            }
            None => {
                info!("No configuration file found, using defaults");
                Self::default()
            }
        };
        config.apply_env_overrides(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    pub fn from_toml_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::Config(format!("Invalid TOML: {e}")))
    }

    /// Apply `FLIGHTLOG_*` overrides; `lookup` abstracts the environment for tests
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup("FLIGHTLOG_DATABASE_URL") {
            self.database_url = url;
        }
        if let Some(port) = lookup("FLIGHTLOG_PORT") {
            self.port = port
                .parse()
                .map_err(|_| Error::Config(format!("FLIGHTLOG_PORT is not a port: {port}")))?;
        }
        if let Some(env) = lookup("FLIGHTLOG_ENVIRONMENT") {
            self.environment = env.parse()?;
        }
        if let Some(secret) = lookup("FLIGHTLOG_JWT_SECRET") {
            self.auth.jwt_secret = secret;
        }
        if let Some(origins) = lookup("FLIGHTLOG_CORS_ORIGINS") {
            self.cors_origins = origins
                .split(',')
                .map(|o| o.trim().to_string())
                .filter(|o| !o.is_empty())
                .collect();
        }
        if let Some(host) = lookup("FLIGHTLOG_SMTP_HOST") {
            self.smtp.host = host;
        }
        if let Some(user) = lookup("FLIGHTLOG_SMTP_USER") {
            self.smtp.user = user;
        }
        if let Some(password) = lookup("FLIGHTLOG_SMTP_PASSWORD") {
            self.smtp.password = password;
        }
        if let Some(url) = lookup("FLIGHTLOG_EXPORT_URL") {
            self.export.sink_url = Some(url);
        }
        if let Some(token) = lookup("FLIGHTLOG_EXPORT_TOKEN") {
            self.export.sink_token = Some(token);
        }
        Ok(())
    }

    /// Resolve the JWT secret for the current environment
    ///
    /// Production requires a configured secret. Development falls back to a
    /// random per-process secret, so sessions do not survive a restart.
    pub fn resolve_jwt_secret(&self) -> Result<String> {
        if !self.auth.jwt_secret.is_empty() {
            return Ok(self.auth.jwt_secret.clone());
        }
        if self.environment.is_production() {
            return Err(Error::Config("auth.jwt_secret is required in production".into()));
        }
        warn!("No JWT secret configured; generating an ephemeral development secret");
        use rand::distributions::Alphanumeric;
        use rand::Rng;
        Ok(rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(48)
            .map(char::from)
            .collect())
    }

    /// Reject settings the services cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.export.workers == 0 {
            return Err(Error::Config("export.workers must be at least 1".into()));
        }
        if self.export.max_attempts == 0 {
            return Err(Error::Config("export.max_attempts must be at least 1".into()));
        }
        if self.currency.reprocess_batch_size == 0 {
            return Err(Error::Config("currency.reprocess_batch_size must be at least 1".into()));
        }
        if self.auth.access_token_minutes == 0 || self.auth.refresh_token_days == 0 {
            return Err(Error::Config("token lifetimes must be positive".into()));
        }
        Ok(())
    }
}

/// Find the configuration file to read, if any
fn locate_config_file(explicit_path: Option<&Path>) -> Result<Option<PathBuf>> {
    if let Some(path) = explicit_path {
        if !path.exists() {
            return Err(Error::Config(format!("Config file not found: {}", path.display())));
        }
        return Ok(Some(path.to_path_buf()));
    }

    let user_config = dirs::config_dir().map(|d| d.join("flightlog").join("config.toml"));
    if let Some(path) = user_config {
        if path.exists() {
            return Ok(Some(path));
        }
    }

    let system_config = PathBuf::from("/etc/flightlog/config.toml");
    if system_config.exists() {
        return Ok(Some(system_config));
    }

    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.auth.access_token_minutes, 15);
        assert_eq!(config.auth.refresh_token_days, 30);
        assert_eq!(config.auth.refresh_cookie_path, "/auth");
        assert_eq!(config.export.workers, 16);
        assert_eq!(config.export.progress_interval, 10);
        assert_eq!(config.currency.reprocess_batch_size, 50);
        assert_eq!(config.currency.epoch, default_epoch());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = Config::from_toml_str(
            r#"
            environment = "production"
            port = 9000

            [auth]
            jwt_secret = "0123456789abcdef0123456789abcdef"
            refresh_cookie_same_site = "None"

            [currency]
            epoch = "2019-01-01"
            "#,
        )
        .unwrap();
        assert_eq!(config.port, 9000);
        assert!(config.environment.is_production());
        assert_eq!(config.auth.refresh_cookie_same_site, SameSite::None);
        assert_eq!(config.auth.access_token_minutes, 15);
        assert_eq!(config.currency.epoch, NaiveDate::from_ymd_opt(2019, 1, 1).unwrap());
        assert_eq!(config.currency.reprocess_batch_size, 50);
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("FLIGHTLOG_PORT", "7000"),
            ("FLIGHTLOG_ENVIRONMENT", "production"),
            ("FLIGHTLOG_CORS_ORIGINS", "https://a.example, https://b.example"),
        ]
        .into_iter()
        .collect();
        let mut config = Config::default();
        config
            .apply_env_overrides(|k| env.get(k).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(config.port, 7000);
        assert!(config.environment.is_production());
        assert_eq!(config.cors_origins, vec!["https://a.example", "https://b.example"]);
    }

    #[test]
    fn test_bad_port_override_rejected() {
        let mut config = Config::default();
        let result = config.apply_env_overrides(|k| (k == "FLIGHTLOG_PORT").then(|| "abc".to_string()));
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_jwt_secret_required_in_production() {
        let mut config = Config::default();
        config.environment = Environment::Production;
        assert!(config.resolve_jwt_secret().is_err());

        config.environment = Environment::Development;
        assert_eq!(config.resolve_jwt_secret().unwrap().len(), 48);
    }

    #[test]
    fn test_load_explicit_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "port = 8123\n").unwrap();
        let config = Config::load(Some(&path)).unwrap();
        assert_eq!(config.port, 8123);

        let missing = dir.path().join("missing.toml");
        assert!(Config::load(Some(&missing)).is_err());
    }
}
