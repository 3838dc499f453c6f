// Configuration Management
//
// This crate handles all configuration loading for the organization API.
// It provides:
// - Configuration structs and deserialization
// - File loading logic
// - Default configuration values
//
// This keeps configuration concerns separate from domain logic.

use std::path::Path;
use thiserror::Error;

pub mod types;

// Re-export all configuration types
pub use types::*;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Configuration file not found. Tried paths: {paths}")]
    FileNotFound { paths: String },

    #[error("Failed to read configuration file: {source}")]
    IoError {
        #[from]
        source: std::io::Error,
    },

    #[error("Failed to parse configuration: {source}")]
    ParseError {
        #[from]
        source: serde_yaml::Error,
    },
}

/// Main configuration loading interface
impl AppConfig {
    /// Load configuration from YAML file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: AppConfig = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    /// Load configuration from default locations
    pub fn load() -> Result<Self, ConfigError> {
        // Try different config locations in order
        let config_paths = ["config/config.yaml", "config.yaml", "config/default.yaml"];

        for path in &config_paths {
            if std::path::Path::new(path).exists() {
                return Self::load_from_file(path);
            }
        }

        // If no config file found, fail with descriptive error
        Err(ConfigError::FileNotFound {
            paths: config_paths.join(", "),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn load_full_config_from_yaml() {
        let yaml = r#"
database:
  host: localhost
  port: 5432
  database: orgs
  username: postgres
  password: postgres
  max_connections: 5
logging:
  level: debug
  format: json
organization:
  invite_expiry_seconds: 1209600
  default_role: read
  max_orgs_per_owner: 10
permissions:
  - object_type: member
    rules:
      - role: admin
        operation: [read, write, create, delete]
      - role: write
        operation: [read, write]
"#;
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(yaml.as_bytes()).unwrap();

        let config = AppConfig::load_from_file(file.path()).unwrap();
        assert_eq!(config.database.port, 5432);
        assert_eq!(config.organization.invite_expiry_seconds, 1_209_600);
        assert_eq!(config.organization.default_role, "read");
        assert_eq!(config.permissions.len(), 1);
        assert_eq!(config.permissions[0].object_type, "member");
        assert_eq!(
            config.permissions[0].rules[1].operation,
            vec!["read", "write"]
        );
    }

    #[test]
    fn malformed_yaml_is_a_parse_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"database: [not, a, mapping").unwrap();

        let err = AppConfig::load_from_file(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::ParseError { .. }));
    }
}
