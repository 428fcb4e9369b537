//! Configuration for Accolade
//!
//! CLI arguments and environment variable handling using clap.

use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use crate::auth::jwt::MIN_SECRET_LEN;
use crate::auth::JwtValidator;
use crate::types::{AccoladeError, Result};

/// Accolade - student achievement records service
#[derive(Parser, Debug, Clone)]
#[command(name = "accolade")]
#[command(about = "Student achievement submission and verification service")]
pub struct Args {
    /// Address to listen on
    #[arg(long, env = "LISTEN", default_value = "0.0.0.0:8080")]
    pub listen: SocketAddr,

    /// Enable development mode (in-memory fallback stores, fixed signing secret)
    #[arg(long, env = "DEV_MODE", default_value = "false")]
    pub dev_mode: bool,

    /// MongoDB connection URI
    #[arg(long, env = "MONGODB_URI", default_value = "mongodb://localhost:27017")]
    pub mongodb_uri: String,

    /// MongoDB database name
    #[arg(long, env = "MONGODB_DB", default_value = "accolade")]
    pub mongodb_db: String,

    /// SQLite database file for accounts and achievement references
    #[arg(long, env = "DATABASE_PATH", default_value = "./data/accolade.db")]
    pub database_path: PathBuf,

    /// JWT secret for token signing (required in production)
    #[arg(long, env = "JWT_SECRET")]
    pub jwt_secret: Option<String>,

    /// JWT token expiry in seconds
    #[arg(long, env = "JWT_EXPIRY_SECONDS", default_value = "86400")]
    pub jwt_expiry_seconds: u64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Log output format: "text" or "json"
    #[arg(long, env = "LOG_FORMAT", default_value = "text")]
    pub log_format: String,

    /// Directory for achievement attachments
    #[arg(long, env = "UPLOAD_DIR", default_value = "./uploads")]
    pub upload_dir: PathBuf,

    /// Largest accepted attachment in bytes
    #[arg(long, env = "MAX_UPLOAD_BYTES", default_value = "10485760")]
    pub max_upload_bytes: usize,

    /// Deadline for each MongoDB or SQLite call in milliseconds
    #[arg(long, env = "STORE_TIMEOUT_MS", default_value = "5000")]
    pub store_timeout_ms: u64,

    /// Seconds between background consistency scans (0 disables the task)
    #[arg(long, env = "RECONCILE_INTERVAL_SECS", default_value = "300")]
    pub reconcile_interval_secs: u64,

    /// Admin account created at startup if missing
    #[arg(long, env = "ADMIN_EMAIL")]
    pub admin_email: Option<String>,

    /// Password for the bootstrapped admin account
    #[arg(long, env = "ADMIN_PASSWORD")]
    pub admin_password: Option<String>,
}

impl Args {
    /// Build the token validator: configured secret, or the fixed dev secret
    pub fn jwt_validator(&self) -> Result<JwtValidator> {
        match &self.jwt_secret {
            Some(secret) => JwtValidator::new(secret.clone(), self.jwt_expiry_seconds),
            None if self.dev_mode => Ok(JwtValidator::new_dev()),
            None => Err(AccoladeError::Config(
                "JWT_SECRET is required in production mode".into(),
            )),
        }
    }

    pub fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.store_timeout_ms)
    }

    /// None when the background scan is disabled
    pub fn reconcile_interval(&self) -> Option<Duration> {
        (self.reconcile_interval_secs > 0).then(|| Duration::from_secs(self.reconcile_interval_secs))
    }

    pub fn json_logs(&self) -> bool {
        self.log_format.eq_ignore_ascii_case("json")
    }

    /// Admin bootstrap credentials, when both are set
    pub fn admin_credentials(&self) -> Option<(&str, &str)> {
        match (&self.admin_email, &self.admin_password) {
            (Some(email), Some(password)) => Some((email.as_str(), password.as_str())),
            _ => None,
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> std::result::Result<(), String> {
        if !self.dev_mode {
            match &self.jwt_secret {
                None => return Err("JWT_SECRET is required in production mode".to_string()),
                Some(s) if s.len() < MIN_SECRET_LEN => {
                    return Err(format!(
                        "JWT_SECRET must be at least {MIN_SECRET_LEN} characters"
                    ))
                }
                Some(_) => {}
            }
        }

        if self.store_timeout_ms == 0 {
            return Err("STORE_TIMEOUT_MS must be greater than zero".to_string());
        }
        if self.jwt_expiry_seconds == 0 {
            return Err("JWT_EXPIRY_SECONDS must be greater than zero".to_string());
        }
        if self.max_upload_bytes == 0 {
            return Err("MAX_UPLOAD_BYTES must be greater than zero".to_string());
        }
        if !matches!(self.log_format.to_ascii_lowercase().as_str(), "text" | "json") {
            return Err(format!("LOG_FORMAT must be 'text' or 'json', got '{}'", self.log_format));
        }
        if self.admin_email.is_some() != self.admin_password.is_some() {
            return Err("ADMIN_EMAIL and ADMIN_PASSWORD must be set together".to_string());
        }

        Ok(())
    }
}
