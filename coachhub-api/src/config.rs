/// Configuration management for the API server
///
/// Configuration comes from environment variables; a `.env` file is loaded
/// first when present.
///
/// # Environment Variables
///
/// - `API_HOST` / `API_PORT`: bind address (default `0.0.0.0:5000`)
/// - `API_PRODUCTION`: enables HSTS and hides reset tokens (default `false`)
/// - `CORS_ORIGINS`: comma-separated origins, `*` for any (default `*`)
/// - `UPLOAD_DIR`: where organization logos are stored (default `uploads`)
/// - `DATABASE_URL`: PostgreSQL connection string (required)
/// - `DATABASE_MAX_CONNECTIONS`: pool size (default 10)
/// - `JWT_SECRET`: HS256 secret, at least 32 characters (required)
/// - `JWT_ACCESS_TTL_MINUTES` / `JWT_REFRESH_TTL_DAYS`: token lifetimes (15 / 7)
/// - `SMTP_HOST`, `SMTP_PORT`, `SMTP_USERNAME`, `SMTP_PASSWORD`: outgoing mail;
///   without `SMTP_HOST` messages are written to `EMAIL_DIR` (default `emails`)
/// - `EMAIL_FROM` / `EMAIL_FROM_NAME`: sender address and display name
/// - `FRONTEND_URL`: base of links in emails
/// - `AUTH_RATE_LIMIT_PER_MINUTE` / `REGISTRATION_RATE_LIMIT_PER_HOUR`: 10 / 5
///
/// # Example
///
/// ```no_run
/// use coachhub_api::config::Config;
///
/// # fn example() -> anyhow::Result<()> {
/// let config = Config::from_env()?;
/// println!("Server will listen on {}", config.bind_address());
/// # Ok(())
/// # }
/// ```

use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;
use std::str::FromStr;

/// Complete application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub api: ApiConfig,
    pub database: DatabaseConfig,
    pub jwt: JwtConfig,
    pub email: EmailConfig,
    pub rate_limit: RateLimitConfig,
}

/// API server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    pub host: String,
    pub port: u16,

    /// Production mode: HSTS on, reset tokens never echoed
    pub production: bool,

    /// Allowed CORS origins; `*` allows any
    pub cors_origins: Vec<String>,

    /// Root directory for uploaded files
    pub upload_dir: PathBuf,
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

/// JWT configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JwtConfig {
    /// HS256 signing secret. Generate with `openssl rand -hex 32`.
    #[serde(skip_serializing)]
    pub secret: String,

    pub access_ttl_minutes: i64,
    pub refresh_ttl_days: i64,
}

/// Outgoing email
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailConfig {
    pub smtp: Option<SmtpConfig>,

    /// Used when `smtp` is `None`
    pub file_dir: PathBuf,

    pub from_email: String,
    pub from_name: String,

    /// Base URL for links in emails
    pub frontend_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    #[serde(skip_serializing)]
    pub password: Option<String>,
}

/// Request budgets for unauthenticated endpoints
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Login, refresh and password reset, per client per minute
    pub auth_per_minute: u32,

    /// Registrations per client per hour
    pub registration_per_hour: u32,
}

fn parse_or<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(key) {
        Some(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse::<T>()
            .with_context(|| format!("{} has an invalid value: {}", key, raw)),
        _ => Ok(default),
    }
}

fn string_or(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: &str) -> String {
    lookup(key)
        .filter(|v| !v.trim().is_empty())
        .unwrap_or_else(|| default.to_string())
}

impl Config {
    /// Loads configuration from the process environment.
    ///
    /// # Errors
    ///
    /// Returns an error if a required variable is missing, a value does not
    /// parse, or `JWT_SECRET` is shorter than 32 characters.
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the configuration from any key/value source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let database_url = lookup("DATABASE_URL")
            .ok_or_else(|| anyhow::anyhow!("DATABASE_URL environment variable is required"))?;

        let jwt_secret = lookup("JWT_SECRET")
            .ok_or_else(|| anyhow::anyhow!("JWT_SECRET environment variable is required"))?;

        if jwt_secret.len() < 32 {
            anyhow::bail!("JWT_SECRET must be at least 32 characters long");
        }

        let cors_origins = string_or(&lookup, "CORS_ORIGINS", "*")
            .split(',')
            .map(|origin| origin.trim().to_string())
            .filter(|origin| !origin.is_empty())
            .collect();

        let smtp = match lookup("SMTP_HOST").filter(|h| !h.trim().is_empty()) {
            Some(host) => Some(SmtpConfig {
                host,
                port: parse_or(&lookup, "SMTP_PORT", 587)?,
                username: lookup("SMTP_USERNAME").filter(|v| !v.is_empty()),
                password: lookup("SMTP_PASSWORD").filter(|v| !v.is_empty()),
            }),
            None => None,
        };

        Ok(Self {
            api: ApiConfig {
                host: string_or(&lookup, "API_HOST", "0.0.0.0"),
                port: parse_or(&lookup, "API_PORT", 5000)?,
                production: parse_or(&lookup, "API_PRODUCTION", false)?,
                cors_origins,
                upload_dir: PathBuf::from(string_or(&lookup, "UPLOAD_DIR", "uploads")),
            },
            database: DatabaseConfig {
                url: database_url,
                max_connections: parse_or(&lookup, "DATABASE_MAX_CONNECTIONS", 10)?,
            },
            jwt: JwtConfig {
                secret: jwt_secret,
                access_ttl_minutes: parse_or(&lookup, "JWT_ACCESS_TTL_MINUTES", 15)?,
                refresh_ttl_days: parse_or(&lookup, "JWT_REFRESH_TTL_DAYS", 7)?,
            },
            email: EmailConfig {
                smtp,
                file_dir: PathBuf::from(string_or(&lookup, "EMAIL_DIR", "emails")),
                from_email: string_or(&lookup, "EMAIL_FROM", "noreply@coachhub.local"),
                from_name: string_or(&lookup, "EMAIL_FROM_NAME", "CoachHub"),
                frontend_url: string_or(&lookup, "FRONTEND_URL", "http://localhost:5173")
                    .trim_end_matches('/')
                    .to_string(),
            },
            rate_limit: RateLimitConfig {
                auth_per_minute: parse_or(&lookup, "AUTH_RATE_LIMIT_PER_MINUTE", 10)?,
                registration_per_hour: parse_or(&lookup, "REGISTRATION_RATE_LIMIT_PER_HOUR", 5)?,
            },
        })
    }

    /// Returns the server bind address
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.api.host, self.api.port)
    }
}
