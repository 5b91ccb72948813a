use mysql_table_server::Result;
use mysql_table_server::config::Config;
use mysql_table_server::pool::ConnectionPool;
use mysql_table_server::server::TableServer;
use tokio::signal;
use tracing::{info, warn, error};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration first to get the log level
    let config = match Config::load() {
        Ok(config) => config,
        Err(e) => {
            // Initialize basic tracing for error reporting
            tracing_subscriber::fmt::init();
            error!("Failed to load configuration: {}", e.user_message());
            error!("Configuration error details: {}", e.detailed_message());
            return Err(e);
        }
    };

    tracing_subscriber::fmt()
        .with_max_level(config.tracing_level())
        .init();

    info!("Starting MySQL table server");
    info!("Log level set to: {}", config.server.log_level);
    for database in &config.databases {
        info!("Database '{}': {}", database.label, database.masked_connection_url());
    }
    for label in config.duplicate_labels() {
        warn!("Database label '{}' is configured more than once; the last entry wins", label);
    }

    let addr = config.server.socket_addr()?;

    let pool = match ConnectionPool::build(&config.databases).await {
        Ok(pool) => pool,
        Err(e) => {
            error!("Startup aborted: {}", e.user_message());
            error!("Startup error details: {}", e.detailed_message());
            return Err(e);
        }
    };

    let server = TableServer::new(pool);

    let result = server.serve(addr, shutdown_signal()).await;
    if let Err(e) = &result {
        error!("Server failed: {}", e.user_message());
        error!("Server error details: {}", e.detailed_message());
    }

    server.shutdown().await;
    result
}

/// Resolves on Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        },
        _ = terminate => {
            info!("Received terminate signal");
        },
    }
}
