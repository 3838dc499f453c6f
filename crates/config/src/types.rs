use serde::Deserialize;
use std::env;

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    pub organization: OrganizationConfig,
    /// Role-based permission rule sets, one per object type.
    /// Unknown role/operation strings are rejected when the permission
    /// matrix is built at startup, not here.
    #[serde(default)]
    pub permissions: Vec<PermissionRuleSet>,
}

/// Database configuration
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub username: String,
    pub password: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
}

fn default_max_connections() -> usize {
    5
}

impl DatabaseConfig {
    /// Create a connection URL for this database configuration
    pub fn connection_url(&self) -> String {
        format!(
            "postgres://{}:{}@{}:{}/{}",
            self.username, self.password, self.host, self.port, self.database
        )
    }

    /// Load from environment variables
    pub fn from_env() -> Result<Self, String> {
        Ok(Self {
            host: env::var("DATABASE_HOST").map_err(|_| "DATABASE_HOST not set")?,
            port: env::var("DATABASE_PORT")
                .map_err(|_| "DATABASE_PORT not set")?
                .parse()
                .map_err(|_| "DATABASE_PORT must be a valid port number")?,
            database: env::var("DATABASE_NAME").map_err(|_| "DATABASE_NAME not set")?,
            username: env::var("DATABASE_USERNAME").map_err(|_| "DATABASE_USERNAME not set")?,
            password: env::var("DATABASE_PASSWORD").map_err(|_| "DATABASE_PASSWORD not set")?,
            max_connections: env::var("DATABASE_MAX_CONNECTIONS")
                .unwrap_or_else(|_| "5".to_string())
                .parse()
                .map_err(|_| "DATABASE_MAX_CONNECTIONS must be a valid number")?,
        })
    }
}

/// Logging Configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            format: env::var("LOG_FORMAT").unwrap_or_else(|_| "text".to_string()),
        }
    }
}

/// Organization policy configuration: invite lifetime, the role handed to
/// approved join requests, and the per-owner organization quota.
#[derive(Debug, Clone, Deserialize)]
pub struct OrganizationConfig {
    pub invite_expiry_seconds: i64,
    pub default_role: String,
    #[serde(default = "default_max_orgs_per_owner")]
    pub max_orgs_per_owner: i64,
}

fn default_max_orgs_per_owner() -> i64 {
    10
}

/// Permission rules for a single object type:
/// `{object_type, rules:[{role, operation:[...]}]}`
#[derive(Debug, Clone, Deserialize)]
pub struct PermissionRuleSet {
    pub object_type: String,
    pub rules: Vec<PermissionRule>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PermissionRule {
    pub role: String,
    pub operation: Vec<String>,
}
