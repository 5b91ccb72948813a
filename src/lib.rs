//! MySQL Table Server
//!
//! Serves a set of configured MySQL databases over HTTP: lists their labels, lists the
//! base tables of each database as captured at boot, and streams whole tables as CSV.

pub mod config;
pub mod error;
pub mod export;
pub mod pool;
pub mod server;

pub use config::{Config, DatabaseConfig, ServerConfig};
pub use error::{ServerError, Result};
pub use export::{ExportConfig, TableExporter};
pub use pool::{ConnectionPool, DataSource};
pub use server::TableServer;
