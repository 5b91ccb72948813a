//! Label-keyed pool of MySQL data sources
//!
//! This module provides the ConnectionPool component that handles:
//! - Opening and pinging one sqlx pool per configured database
//! - Snapshotting the base tables of each database at boot
//! - Read-only lookups by label for the request handlers
//! - Closing every database on shutdown

use crate::{Result, ServerError};
use crate::config::DatabaseConfig;
use sqlx::mysql::MySqlPoolOptions;
use sqlx::{Executor, MySqlPool};
use std::collections::{BTreeSet, HashMap};
use tracing::{info, warn, debug};

/// Introspection query for the base tables of the connection's own schema
pub const BASE_TABLES_SQL: &str = "SELECT CAST(TABLE_NAME AS CHAR) AS table_name FROM INFORMATION_SCHEMA.TABLES \
     WHERE TABLE_SCHEMA = DATABASE() AND TABLE_TYPE = 'BASE TABLE'";

const PING_SQL: &str = "SELECT 1";

/// A connected database and the tables it had when the server booted
#[derive(Debug, Clone)]
pub struct DataSource {
    label: String,
    pool: MySqlPool,
    tables: BTreeSet<String>,
}

impl DataSource {
    /// Create a data source from an already opened pool and a table snapshot
    pub fn new<I, S>(label: impl Into<String>, pool: MySqlPool, tables: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            label: label.into(),
            pool,
            tables: tables.into_iter().map(Into::into).collect(),
        }
    }

    /// Connect to the database described by `config`, ping it and snapshot its tables
    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        debug!(
            "Connecting to database '{}' at {}",
            config.label,
            config.masked_connection_url()
        );

        let pool = MySqlPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(config.acquire_timeout())
            .connect_with(config.connect_options())
            .await
            .map_err(|e| ServerError::connection_error(config.label.clone(), e))?;

        match Self::snapshot(&config.label, &pool).await {
            Ok(tables) => {
                info!(
                    "Database '{}' ready with {} base table(s)",
                    config.label,
                    tables.len()
                );
                Ok(Self {
                    label: config.label.clone(),
                    pool,
                    tables,
                })
            }
            Err(e) => {
                pool.close().await;
                Err(e)
            }
        }
    }

    async fn snapshot(label: &str, pool: &MySqlPool) -> Result<BTreeSet<String>> {
        pool.execute(PING_SQL)
            .await
            .map_err(|e| ServerError::connection_error(label.to_string(), e))?;

        let tables: Vec<String> = sqlx::query_scalar(BASE_TABLES_SQL)
            .fetch_all(pool)
            .await
            .map_err(|e| ServerError::query_error(BASE_TABLES_SQL.to_string(), e))?;

        Ok(tables.into_iter().collect())
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// The underlying sqlx pool
    pub fn pool(&self) -> &MySqlPool {
        &self.pool
    }

    /// Table names captured at boot, sorted
    pub fn tables(&self) -> Vec<&str> {
        self.tables.iter().map(|s| s.as_str()).collect()
    }

    /// Whether `table` was a base table when the server booted
    pub fn has_table(&self, table: &str) -> bool {
        self.tables.contains(table)
    }
}

/// Map of database label to data source, built once at startup
#[derive(Debug, Default)]
pub struct ConnectionPool {
    sources: HashMap<String, DataSource>,
}

impl ConnectionPool {
    /// Connect to every configured database.
    ///
    /// Every entry is attempted in order. If any of them fails, the ones that did open are
    /// closed again and a single [`ServerError::Startup`] listing all failures is returned.
    pub async fn build(databases: &[DatabaseConfig]) -> Result<Self> {
        info!("Building connection pool for {} database(s)", databases.len());

        let mut pool = Self::default();
        let mut failures = Vec::new();

        for config in databases {
            match DataSource::connect(config).await {
                Ok(source) => pool.insert(source).await,
                Err(e) => {
                    warn!("Failed to initialize database '{}': {}", config.label, e.user_message());
                    failures.push((config.label.clone(), e.user_message()));
                }
            }
        }

        if !failures.is_empty() {
            pool.close().await;
            return Err(ServerError::startup_error(failures));
        }

        info!("Connection pool ready: {}", pool.labels().join(", "));
        Ok(pool)
    }

    /// Assemble a pool from prepared data sources. Later labels replace earlier ones.
    pub fn from_sources(sources: impl IntoIterator<Item = DataSource>) -> Self {
        let mut map = HashMap::new();
        for source in sources {
            if map.contains_key(&source.label) {
                warn!("Database label '{}' registered twice; keeping the last one", source.label);
            }
            map.insert(source.label.clone(), source);
        }
        Self { sources: map }
    }

    async fn insert(&mut self, source: DataSource) {
        if let Some(replaced) = self.sources.insert(source.label.clone(), source) {
            warn!(
                "Database label '{}' configured more than once; replacing the earlier entry",
                replaced.label
            );
            replaced.pool.close().await;
        }
    }

    /// All labels, sorted
    pub fn labels(&self) -> Vec<&str> {
        let mut labels: Vec<&str> = self.sources.keys().map(|s| s.as_str()).collect();
        labels.sort_unstable();
        labels
    }

    pub fn get(&self, label: &str) -> Option<&DataSource> {
        self.sources.get(label)
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    /// Close every database
    pub async fn close(&self) {
        for (label, source) in &self.sources {
            info!("Closing connections for database '{}'", label);
            source.pool.close().await;
        }
    }
}
