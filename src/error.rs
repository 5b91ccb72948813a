//! Error types for the MySQL table server

use std::fmt;
use tracing::{error, warn};
use warp::http::StatusCode;

/// Result type alias for the server
pub type Result<T> = std::result::Result<T, ServerError>;

/// Main error type for the MySQL table server
#[derive(Debug)]
pub enum ServerError {
    /// Database connection errors (connect, ping)
    Connection {
        /// Label of the database the connection was for
        label: String,
        /// The underlying database error
        source: sqlx::Error,
        /// User-friendly error message
        message: String,
    },
    /// Query execution errors
    Query {
        /// The SQL statement that failed
        sql: String,
        /// The underlying database error
        source: sqlx::Error,
        /// MySQL error code if available
        error_code: Option<String>,
    },
    /// Configuration validation errors
    Validation {
        /// The validation error message
        message: String,
        /// The invalid value or a hint on how to fix it
        invalid_value: Option<String>,
    },
    /// Configuration errors tied to a specific parameter
    Configuration {
        /// Configuration parameter that is invalid
        parameter: String,
        /// Error message
        message: String,
    },
    /// CSV encoding errors
    Csv {
        /// The underlying CSV error
        source: csv::Error,
        /// Context about what was being encoded
        context: String,
    },
    /// Unknown database label or table name
    NotFound {
        /// Kind of resource ("database" or "table")
        resource: String,
        /// The name that was looked up
        name: String,
    },
    /// One or more databases failed to come up during boot
    Startup {
        /// Per-label failure descriptions
        failures: Vec<(String, String)>,
    },
    /// General I/O errors
    Io {
        /// The underlying I/O error
        source: std::io::Error,
        /// Context about the I/O operation
        context: String,
    },
    /// Internal server errors
    Internal {
        /// Error message (safe for client)
        message: String,
        /// Internal error details (for logging only)
        details: Option<String>,
    },
}

impl ServerError {
    /// Create a new connection error
    pub fn connection_error(label: String, source: sqlx::Error) -> Self {
        let message = Self::format_connection_error(&source);
        error!("Connection error for database '{}': {}", label, source);

        Self::Connection {
            label,
            source,
            message,
        }
    }

    /// Create a new query error
    pub fn query_error(sql: String, source: sqlx::Error) -> Self {
        let error_code = Self::extract_mysql_error_code(&source);
        error!("Query execution failed: {} | SQL: {}", source, sql);

        Self::Query {
            sql,
            source,
            error_code,
        }
    }

    /// Create a new validation error
    pub fn validation_error(message: String, invalid_value: Option<String>) -> Self {
        warn!("Validation error: {} | Invalid value: {:?}", message, invalid_value);

        Self::Validation {
            message,
            invalid_value,
        }
    }

    /// Create a new configuration error
    pub fn configuration_error(parameter: String, message: String) -> Self {
        error!("Configuration error for '{}': {}", parameter, message);

        Self::Configuration { parameter, message }
    }

    /// Create a new CSV encoding error
    pub fn csv_error(source: csv::Error, context: String) -> Self {
        error!("CSV encoding error in {}: {}", context, source);

        Self::Csv { source, context }
    }

    /// Create a new not-found error. Not logged above debug: these are client mistakes.
    pub fn not_found(resource: &str, name: &str) -> Self {
        tracing::debug!("Unknown {} requested: {}", resource, name);

        Self::NotFound {
            resource: resource.to_string(),
            name: name.to_string(),
        }
    }

    /// Create a new startup error from collected per-database failures
    pub fn startup_error(failures: Vec<(String, String)>) -> Self {
        error!("{} database(s) failed to initialize", failures.len());

        Self::Startup { failures }
    }

    /// Create a new I/O error
    pub fn io_error(source: std::io::Error, context: String) -> Self {
        error!("I/O error in {}: {}", context, source);

        Self::Io { source, context }
    }

    /// Create a new internal error
    pub fn internal_error(message: String, details: Option<String>) -> Self {
        error!("Internal server error: {} | Details: {:?}", message, details);

        Self::Internal { message, details }
    }

    /// HTTP status this error maps to when it ends a request
    pub fn status_code(&self) -> StatusCode {
        match self {
            ServerError::NotFound { .. } => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Get a user-friendly error message
    pub fn user_message(&self) -> String {
        match self {
            ServerError::Connection { label, message, .. } => {
                format!("Database '{}': {}", label, message)
            }
            ServerError::Query { source, .. } => {
                format!("Query execution failed: {}", Self::sanitize_database_error(source))
            }
            ServerError::Validation { message, .. } => message.clone(),
            ServerError::Configuration { parameter, message } => {
                format!("Configuration error for '{}': {}", parameter, message)
            }
            ServerError::Csv { context, .. } => format!("CSV encoding error in {}", context),
            ServerError::NotFound { resource, name } => {
                format!("Unknown {}: {}", resource, name)
            }
            ServerError::Startup { failures } => {
                let labels = failures
                    .iter()
                    .map(|(label, _)| label.as_str())
                    .collect::<Vec<_>>()
                    .join(", ");
                format!("Failed to initialize databases: {}", labels)
            }
            ServerError::Io { context, .. } => format!("I/O error during {}", context),
            ServerError::Internal { message, .. } => message.clone(),
        }
    }

    /// Get detailed error information for logging
    pub fn detailed_message(&self) -> String {
        match self {
            ServerError::Connection { label, source, message } => {
                format!("Connection error for '{}': {} | Source: {}", label, message, source)
            }
            ServerError::Query { sql, source, error_code } => {
                format!("Query error: {} | SQL: {} | Error code: {:?}", source, sql, error_code)
            }
            ServerError::Validation { message, invalid_value } => {
                format!("Validation error: {} | Invalid value: {:?}", message, invalid_value)
            }
            ServerError::Configuration { parameter, message } => {
                format!("Configuration error for '{}': {}", parameter, message)
            }
            ServerError::Csv { source, context } => {
                format!("CSV encoding error in {}: {}", context, source)
            }
            ServerError::NotFound { resource, name } => {
                format!("Not found: {} '{}'", resource, name)
            }
            ServerError::Startup { failures } => {
                let details = failures
                    .iter()
                    .map(|(label, reason)| format!("{}: {}", label, reason))
                    .collect::<Vec<_>>()
                    .join("; ");
                format!("Startup failed for {} database(s): {}", failures.len(), details)
            }
            ServerError::Io { source, context } => {
                format!("I/O error in {}: {}", context, source)
            }
            ServerError::Internal { message, details } => {
                format!("Internal error: {} | Details: {:?}", message, details)
            }
        }
    }

    /// Format connection error message based on the underlying error
    fn format_connection_error(source: &sqlx::Error) -> String {
        match source {
            sqlx::Error::Io(_) => {
                "Unable to connect to database. Please check network connectivity.".to_string()
            }
            sqlx::Error::Tls(_) => {
                "Database connection failed due to TLS/SSL error.".to_string()
            }
            sqlx::Error::Protocol(_) => {
                "Database connection failed due to protocol error.".to_string()
            }
            sqlx::Error::Configuration(_) => {
                "Database connection failed due to configuration error.".to_string()
            }
            sqlx::Error::PoolTimedOut => {
                "Database connection timed out. Please check database availability.".to_string()
            }
            _ => {
                let text = source.to_string().to_lowercase();
                if text.contains("access denied") || text.contains("authentication") {
                    "Database connection failed: invalid credentials or insufficient permissions.".to_string()
                } else {
                    format!("Database connection failed: {}", Self::sanitize_database_error(source))
                }
            }
        }
    }

    /// Extract the MySQL error code from a sqlx error if available
    fn extract_mysql_error_code(source: &sqlx::Error) -> Option<String> {
        match source {
            sqlx::Error::Database(db_err) => db_err.code().map(|code| code.into_owned()),
            _ => None,
        }
    }

    /// Sanitize database error messages to remove sensitive information
    fn sanitize_database_error(source: &sqlx::Error) -> String {
        let sanitized = source
            .to_string()
            .replace("password=", "password=[REDACTED]")
            .replace("pwd=", "pwd=[REDACTED]");

        if sanitized.chars().count() > 500 {
            format!("{}...", sanitized.chars().take(497).collect::<String>())
        } else {
            sanitized
        }
    }
}

impl fmt::Display for ServerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.user_message())
    }
}

impl std::error::Error for ServerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ServerError::Connection { source, .. } => Some(source),
            ServerError::Query { source, .. } => Some(source),
            ServerError::Csv { source, .. } => Some(source),
            ServerError::Io { source, .. } => Some(source),
            _ => None,
        }
    }
}

impl warp::reject::Reject for ServerError {}
