//! Configuration structures for the MySQL table server

use serde::{Deserialize, Serialize};
use sqlx::mysql::MySqlConnectOptions;
use std::collections::HashSet;
use std::fs;
use std::net::{IpAddr, SocketAddr};
use std::path::Path;
use std::time::Duration;
use crate::{Result, ServerError};

/// Environment variable naming an explicit configuration file
pub const CONFIG_PATH_ENV: &str = "TABLE_SERVER_CONFIG";

/// Complete server configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    pub databases: Vec<DatabaseConfig>,
}

/// Server configuration section
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    /// Address to bind
    #[serde(default = "default_bind_host")]
    pub host: String,
    /// Server listening port
    #[serde(default = "default_server_port")]
    pub port: u16,
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl ServerConfig {
    /// Socket address built from `host` and `port`
    pub fn socket_addr(&self) -> Result<SocketAddr> {
        let ip: IpAddr = self.host.parse()
            .map_err(|_| ServerError::validation_error(
                format!("Invalid server host: {}", self.host),
                Some("Use an IP address such as 0.0.0.0 or 127.0.0.1".to_string())
            ))?;
        Ok(SocketAddr::new(ip, self.port))
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_bind_host(),
            port: default_server_port(),
            log_level: default_log_level(),
        }
    }
}

/// One database entry of the `databases` array
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseConfig {
    /// Key the database is served under
    pub label: String,
    /// Schema name
    pub name: String,
    /// Database host (e.g., localhost, 192.168.1.100)
    pub host: String,
    /// Database port (default: 3306)
    #[serde(default = "default_mysql_port")]
    pub port: u16,
    /// Database username
    pub user: String,
    /// Database password
    #[serde(default)]
    pub pass: String,
    /// Maximum number of connections held for this database
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    /// Connection timeout in seconds
    #[serde(default = "default_connection_timeout")]
    pub connection_timeout: u64,
}

impl DatabaseConfig {
    /// Build sqlx connect options from the individual components
    pub fn connect_options(&self) -> MySqlConnectOptions {
        MySqlConnectOptions::new()
            .host(&self.host)
            .port(self.port)
            .username(&self.user)
            .password(&self.pass)
            .database(&self.name)
    }

    /// Get masked connection URL for logging (hides password)
    pub fn masked_connection_url(&self) -> String {
        format!(
            "mysql://{}:****@{}:{}/{}",
            self.user,
            self.host,
            self.port,
            self.name
        )
    }

    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_secs(self.connection_timeout)
    }

    fn validate(&self, index: usize) -> Result<()> {
        let required = [
            ("label", &self.label),
            ("name", &self.name),
            ("host", &self.host),
            ("user", &self.user),
        ];
        for (field, value) in required {
            if value.trim().is_empty() {
                return Err(ServerError::validation_error(
                    format!("databases[{}].{} cannot be empty", index, field),
                    None
                ));
            }
        }

        if self.port == 0 {
            return Err(ServerError::validation_error(
                format!("databases[{}] ('{}'): port cannot be 0", index, self.label),
                Some("Use a port number between 1 and 65535".to_string())
            ));
        }

        if self.max_connections == 0 {
            return Err(ServerError::validation_error(
                format!("databases[{}] ('{}'): max_connections cannot be 0", index, self.label),
                None
            ));
        }

        if self.connection_timeout == 0 {
            return Err(ServerError::validation_error(
                format!("databases[{}] ('{}'): connection_timeout cannot be 0", index, self.label),
                None
            ));
        }

        Ok(())
    }
}

impl Config {
    /// Parse a TOML file, or JSON when the extension says so. Not validated: see [`Config::load`].
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(ServerError::validation_error(
                format!("Configuration file not found: {}", path.display()),
                Some("Create a conf.toml file or set TABLE_SERVER_CONFIG".to_string())
            ));
        }

        let content = fs::read_to_string(path)
            .map_err(|e| ServerError::validation_error(
                format!("Failed to read configuration file: {}", e),
                Some(format!("Check file permissions for: {}", path.display()))
            ))?;

        let is_json = path
            .extension()
            .map(|ext| ext.eq_ignore_ascii_case("json"))
            .unwrap_or(false);

        if is_json {
            Self::from_json_str(&content)
        } else {
            Self::from_toml_str(&content)
        }
    }

    /// Parse a TOML document
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content)
            .map_err(|e| ServerError::validation_error(
                format!("Failed to parse configuration file: {}", e),
                Some("Check TOML syntax".to_string())
            ))
    }

    /// Parse a JSON document
    pub fn from_json_str(content: &str) -> Result<Self> {
        serde_json::from_str(content)
            .map_err(|e| ServerError::validation_error(
                format!("Failed to parse configuration file: {}", e),
                Some("Check JSON syntax".to_string())
            ))
    }

    /// Load configuration from the configured path or the default file locations,
    /// apply environment overrides, then validate the result
    pub fn load() -> Result<Self> {
        let mut config = match std::env::var(CONFIG_PATH_ENV) {
            Ok(path) if !path.is_empty() => Self::from_file(path)?,
            _ => Self::from_default_locations()?,
        };

        config.apply_env_overrides()?;
        config.validate()?;

        Ok(config)
    }

    fn from_default_locations() -> Result<Self> {
        let config_paths = [
            "conf.toml",
            "conf.json",
            "config/conf.toml",
        ];

        for path in &config_paths {
            if Path::new(path).exists() {
                return Self::from_file(path);
            }
        }

        Err(ServerError::validation_error(
            "No configuration file found".to_string(),
            Some(format!(
                "Create one of {} or set {}",
                config_paths.join(", "),
                CONFIG_PATH_ENV
            ))
        ))
    }

    /// Override server settings from PORT and LOG_LEVEL
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        use std::env;

        self.apply_overrides(env::var("PORT").ok(), env::var("LOG_LEVEL").ok())
    }

    fn apply_overrides(&mut self, port: Option<String>, log_level: Option<String>) -> Result<()> {
        if let Some(port_str) = port {
            self.server.port = port_str.parse()
                .map_err(|_| ServerError::validation_error(
                    format!("Invalid PORT value: {}", port_str),
                    Some("PORT must be a valid number between 1 and 65535".to_string())
                ))?;
        }

        if let Some(log_level) = log_level {
            self.server.log_level = log_level;
        }

        Ok(())
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.databases.is_empty() {
            return Err(ServerError::configuration_error(
                "databases".to_string(),
                "At least one database must be configured".to_string()
            ));
        }

        for (index, database) in self.databases.iter().enumerate() {
            database.validate(index)?;
        }

        if self.server.port == 0 {
            return Err(ServerError::validation_error(
                "Server port cannot be 0".to_string(),
                Some("Use a port number between 1 and 65535".to_string())
            ));
        }

        self.server.socket_addr()?;

        match self.server.log_level.to_lowercase().as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {},
            _ => {
                return Err(ServerError::validation_error(
                    format!("Invalid log level: {}", self.server.log_level),
                    Some("Valid log levels: trace, debug, info, warn, error".to_string())
                ));
            }
        }

        Ok(())
    }

    /// Labels that appear more than once, in order of their second appearance
    pub fn duplicate_labels(&self) -> Vec<&str> {
        let mut seen = HashSet::new();
        let mut duplicates = Vec::new();

        for database in &self.databases {
            if !seen.insert(database.label.as_str()) && !duplicates.contains(&database.label.as_str()) {
                duplicates.push(database.label.as_str());
            }
        }

        duplicates
    }

    /// Tracing level for the configured log level
    pub fn tracing_level(&self) -> tracing::Level {
        match self.server.log_level.to_lowercase().as_str() {
            "trace" => tracing::Level::TRACE,
            "debug" => tracing::Level::DEBUG,
            "warn" => tracing::Level::WARN,
            "error" => tracing::Level::ERROR,
            _ => tracing::Level::INFO,
        }
    }
}

// Default value functions for serde
fn default_bind_host() -> String {
    "0.0.0.0".to_string()
}

fn default_server_port() -> u16 {
    8080
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_mysql_port() -> u16 {
    3306
}

fn default_connection_timeout() -> u64 {
    30
}

fn default_max_connections() -> u32 {
    5
}
