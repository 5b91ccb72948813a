//! HTTP server exposing the connection pool

use crate::export::{ExportConfig, TableExporter};
use crate::pool::ConnectionPool;
use crate::{Result, ServerError};
use percent_encoding::percent_decode_str;
use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{info, error, debug};
use warp::http::{header, HeaderValue, StatusCode};
use warp::hyper::Body;
use warp::reply::Response;
use warp::{Filter, Rejection, Reply};

/// Content type of table exports
pub const CSV_CONTENT_TYPE: &str = "text/plain; charset=utf-8";

/// HTTP front end over a read-only [`ConnectionPool`]
#[derive(Clone)]
pub struct TableServer {
    pool: Arc<ConnectionPool>,
    exporter: TableExporter,
}

impl TableServer {
    /// Create a new server instance
    pub fn new(pool: ConnectionPool) -> Self {
        Self {
            pool: Arc::new(pool),
            exporter: TableExporter::new(),
        }
    }

    /// Create a new server instance with custom export configuration
    pub fn with_export_config(pool: ConnectionPool, export_config: ExportConfig) -> Self {
        Self {
            pool: Arc::new(pool),
            exporter: TableExporter::with_config(export_config),
        }
    }

    pub fn pool(&self) -> &ConnectionPool {
        &self.pool
    }

    /// All routes, with rejections already turned into responses
    pub fn routes(&self) -> impl Filter<Extract = (impl Reply,), Error = Infallible> + Clone + Send + Sync + 'static {
        let server_for_databases = self.clone();
        let list_databases = warp::path::end()
            .and(warp::get())
            .map(move || server_for_databases.handle_list_databases());

        let server_for_tables = self.clone();
        let list_tables = path_segment()
            .and(warp::path::end())
            .and(warp::get())
            .and_then(move |label: String| {
                let server = server_for_tables.clone();
                async move {
                    server.handle_list_tables(&label).map_err(warp::reject::custom)
                }
            });

        let server_for_export = self.clone();
        let export_table = path_segment()
            .and(path_segment())
            .and(warp::path::end())
            .and(warp::get())
            .and_then(move |label: String, table: String| {
                let server = server_for_export.clone();
                async move {
                    server
                        .handle_export_table(&label, &table)
                        .await
                        .map_err(warp::reject::custom)
                }
            });

        list_databases
            .or(list_tables)
            .or(export_table)
            .recover(handle_rejection)
            .with(warp::trace::request())
    }

    /// Serve until `shutdown` resolves
    pub async fn serve<F>(&self, addr: SocketAddr, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let (bound, server) = warp::serve(self.routes())
            .try_bind_with_graceful_shutdown(addr, shutdown)
            .map_err(|e| ServerError::internal_error(
                format!("Failed to bind {}", addr),
                Some(e.to_string())
            ))?;

        info!("Table server listening on http://{}", bound);
        server.await;
        info!("Server stopped");

        Ok(())
    }

    /// Close every database connection
    pub async fn shutdown(&self) {
        info!("Shutting down table server");
        self.pool.close().await;
        info!("Table server shutdown complete");
    }

    /// `GET /`
    pub fn handle_list_databases(&self) -> Response {
        debug!("Listing databases");
        warp::reply::json(&self.pool.labels()).into_response()
    }

    /// `GET /{label}/`
    pub fn handle_list_tables(&self, label: &str) -> Result<Response> {
        debug!("Listing tables of '{}'", label);

        let source = self.pool.get(label)
            .ok_or_else(|| ServerError::not_found("database", label))?;

        Ok(warp::reply::json(&source.tables()).into_response())
    }

    /// `GET /{label}/{table}/`
    pub async fn handle_export_table(&self, label: &str, table: &str) -> Result<Response> {
        debug!("Export requested for '{}'.'{}'", label, table);

        let source = self.pool.get(label)
            .ok_or_else(|| ServerError::not_found("database", label))?;

        let body = self.exporter.export(source, table).await?;

        let mut response = Response::new(Body::wrap_stream(body));
        response
            .headers_mut()
            .insert(header::CONTENT_TYPE, HeaderValue::from_static(CSV_CONTENT_TYPE));

        Ok(response)
    }
}

/// One path segment, percent-decoded. Segments that are not UTF-8 once decoded are a 404.
fn path_segment() -> impl Filter<Extract = (String,), Error = Rejection> + Clone {
    warp::path::param::<String>().and_then(|raw: String| async move {
        percent_decode_str(&raw)
            .decode_utf8()
            .map(|decoded| decoded.into_owned())
            .map_err(|_| warp::reject::not_found())
    })
}

/// Map rejections to bare status responses
async fn handle_rejection(err: Rejection) -> std::result::Result<Response, Infallible> {
    let status = if let Some(e) = err.find::<ServerError>() {
        if e.status_code().is_server_error() {
            error!("Request failed: {}", e.detailed_message());
        }
        e.status_code()
    } else if err.is_not_found() {
        StatusCode::NOT_FOUND
    } else if err.find::<warp::reject::MethodNotAllowed>().is_some() {
        StatusCode::METHOD_NOT_ALLOWED
    } else {
        error!("Unhandled rejection: {:?}", err);
        StatusCode::INTERNAL_SERVER_ERROR
    };

    Ok(warp::reply::with_status(warp::reply(), status).into_response())
}
