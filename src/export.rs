//! Streaming CSV export of whole tables

use crate::pool::DataSource;
use crate::{Result, ServerError};
use async_stream::try_stream;
use futures::stream::{Stream, StreamExt, TryStreamExt};
use sqlx::mysql::{MySqlColumn, MySqlRow};
use sqlx::{Column, Executor, Row, Statement, TypeInfo, ValueRef};
use std::pin::Pin;
use tracing::{debug, error, info};
use warp::hyper::body::Bytes;

/// Body stream of an export: the header chunk first, then batches of rows
pub type CsvStream = Pin<Box<dyn Stream<Item = Result<Bytes>> + Send + 'static>>;

/// Export configuration
#[derive(Debug, Clone)]
pub struct ExportConfig {
    /// Number of rows encoded per body chunk
    pub chunk_size: usize,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self { chunk_size: 100 }
    }
}

/// Quote a MySQL identifier with backticks, doubling any embedded backtick
pub fn quote_identifier(name: &str) -> String {
    format!("`{}`", name.replace('`', "``"))
}

/// Statement selecting every row of `table`
pub fn select_all_statement(table: &str) -> String {
    format!("SELECT * FROM {}", quote_identifier(table))
}

/// CSV-encode records with `,` separators and `\n` terminators
pub fn encode_records<I, R, T>(records: I) -> Result<Bytes>
where
    I: IntoIterator<Item = R>,
    R: IntoIterator<Item = T>,
    T: AsRef<[u8]>,
{
    let mut writer = csv::WriterBuilder::new()
        .terminator(csv::Terminator::Any(b'\n'))
        .from_writer(Vec::new());

    for record in records {
        writer
            .write_record(record)
            .map_err(|e| ServerError::csv_error(e, "table export".to_string()))?;
    }

    let buffer = writer
        .into_inner()
        .map_err(|e| ServerError::io_error(e.into_error(), "flushing CSV buffer".to_string()))?;

    Ok(Bytes::from(buffer))
}

/// Streams tables out of a data source as CSV
#[derive(Debug, Clone, Default)]
pub struct TableExporter {
    pub config: ExportConfig,
}

impl TableExporter {
    /// Create an exporter with the default configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an exporter with a custom configuration
    pub fn with_config(config: ExportConfig) -> Self {
        Self { config }
    }

    /// Start exporting `table` from `source`.
    ///
    /// The table must be part of the source's boot-time snapshot. Column names are read by
    /// preparing the statement, so the header is produced even for an empty table. Errors
    /// hit before this returns mean no byte has been sent; errors inside the stream end it
    /// early.
    pub async fn export(&self, source: &DataSource, table: &str) -> Result<CsvStream> {
        // only names captured at boot ever reach SQL text
        if !source.has_table(table) {
            return Err(ServerError::not_found("table", table));
        }

        let sql = select_all_statement(table);
        info!("Exporting {}.{}", source.label(), table);

        let header: Vec<String> = {
            let statement = source
                .pool()
                .prepare(&sql)
                .await
                .map_err(|e| ServerError::query_error(sql.clone(), e))?;
            statement.columns().iter().map(|c| c.name().to_string()).collect()
        };
        let header = encode_records(std::iter::once(&header))?;

        let pool = source.pool().clone();
        let chunk_size = self.config.chunk_size.max(1);
        let label = source.label().to_string();

        let body = try_stream! {
            yield header;

            let mut batches = sqlx::query(&sql).fetch(&pool).try_chunks(chunk_size);
            let mut total_rows = 0usize;

            while let Some(batch) = batches.next().await {
                let rows = batch.map_err(|e| ServerError::query_error(sql.clone(), e.1))?;
                let records = rows
                    .iter()
                    .map(row_to_record)
                    .collect::<std::result::Result<Vec<_>, sqlx::Error>>()
                    .map_err(|e| ServerError::query_error(sql.clone(), e))?;

                total_rows += records.len();
                yield encode_records(&records)?;
            }

            debug!("Export of '{}' from '{}' finished with {} row(s)", sql, label, total_rows);
        };

        let body = body.inspect_err(|e: &ServerError| {
            error!("Export stream aborted: {}", e.detailed_message());
        });

        Ok(Box::pin(body))
    }
}

/// Convert a MySQL row to CSV fields
pub fn row_to_record(row: &MySqlRow) -> std::result::Result<Vec<String>, sqlx::Error> {
    row.columns()
        .iter()
        .enumerate()
        .map(|(i, column)| convert_mysql_value_to_field(row, i, column))
        .collect()
}

/// Convert a MySQL value to its CSV text. NULL becomes an empty field.
fn convert_mysql_value_to_field(
    row: &MySqlRow,
    column_index: usize,
    column: &MySqlColumn,
) -> std::result::Result<String, sqlx::Error> {
    if row.try_get_raw(column_index)?.is_null() {
        return Ok(String::new());
    }

    let type_name = column.type_info().name();

    let field = match type_name {
        "BOOLEAN" | "BOOL" => {
            let val: bool = row.try_get(column_index)?;
            let text = if val { "1" } else { "0" };
            text.to_string()
        }

        "TINYINT" => row.try_get::<i8, _>(column_index)?.to_string(),
        "SMALLINT" => row.try_get::<i16, _>(column_index)?.to_string(),
        "MEDIUMINT" | "INT" => row.try_get::<i32, _>(column_index)?.to_string(),
        "BIGINT" => row.try_get::<i64, _>(column_index)?.to_string(),

        "TINYINT UNSIGNED" => row.try_get::<u8, _>(column_index)?.to_string(),
        "SMALLINT UNSIGNED" => row.try_get::<u16, _>(column_index)?.to_string(),
        "MEDIUMINT UNSIGNED" | "INT UNSIGNED" => row.try_get::<u32, _>(column_index)?.to_string(),
        "BIGINT UNSIGNED" => row.try_get::<u64, _>(column_index)?.to_string(),
        "YEAR" => row.try_get_unchecked::<u16, _>(column_index)?.to_string(),

        "FLOAT" => row.try_get::<f32, _>(column_index)?.to_string(),
        "DOUBLE" => row.try_get::<f64, _>(column_index)?.to_string(),
        // sent as text in both protocols
        "DECIMAL" => row.try_get_unchecked::<String, _>(column_index)?,

        "CHAR" | "VARCHAR" | "TEXT" | "TINYTEXT" | "MEDIUMTEXT" | "LONGTEXT" => {
            row.try_get::<String, _>(column_index)?
        }

        "BINARY" | "VARBINARY" | "BLOB" | "TINYBLOB" | "MEDIUMBLOB" | "LONGBLOB" => {
            use base64::{Engine as _, engine::general_purpose};
            let val: Vec<u8> = row.try_get(column_index)?;
            general_purpose::STANDARD.encode(&val)
        }

        "BIT" => {
            let val: Vec<u8> = row.try_get_unchecked(column_index)?;
            val.iter().fold(0u64, |acc, b| (acc << 8) | u64::from(*b)).to_string()
        }

        "DATE" => match row.try_get_unchecked::<chrono::NaiveDate, _>(column_index) {
            Ok(val) => val.to_string(),
            Err(e) => zero_temporal(type_name, e),
        },
        // durations: may be negative or exceed 24 hours
        "TIME" => {
            let raw: Vec<u8> = row.try_get_unchecked(column_index)?;
            format_time_value(&raw).ok_or_else(|| {
                sqlx::Error::Decode(format!("malformed TIME value of {} byte(s)", raw.len()).into())
            })?
        }
        "DATETIME" | "TIMESTAMP" => {
            match row.try_get_unchecked::<chrono::NaiveDateTime, _>(column_index) {
                Ok(val) => val.to_string(),
                Err(e) => zero_temporal(type_name, e),
            }
        }

        "JSON" => {
            let val: serde_json::Value = row.try_get(column_index)?;
            val.to_string()
        }

        // ENUM, SET and anything else MySQL sends as text
        _ => match row.try_get_unchecked::<String, _>(column_index) {
            Ok(val) => val,
            Err(e) => {
                error!("Failed to convert MySQL type '{}' to text: {}", type_name, e);
                String::new()
            }
        },
    };

    Ok(field)
}

/// Render a MySQL TIME as `[-]HH:MM:SS[.ffffff]`, hours unbounded.
///
/// Binary protocol values are a length byte (0, 8 or 12) followed by the sign, a day
/// count, hours, minutes, seconds and optional microseconds. Text protocol values are
/// already in this form.
fn format_time_value(raw: &[u8]) -> Option<String> {
    let len = match raw.first() {
        Some(&len) if matches!(len, 0 | 8 | 12) && raw.len() == usize::from(len) + 1 => len,
        _ => return std::str::from_utf8(raw).ok().map(str::to_string),
    };

    if len == 0 {
        return Some("00:00:00".to_string());
    }

    let sign = if raw[1] == 1 { "-" } else { "" };
    let days = u32::from_le_bytes(raw[2..6].try_into().ok()?);
    let hours = u64::from(days) * 24 + u64::from(raw[6]);
    let mut text = format!("{}{:02}:{:02}:{:02}", sign, hours, raw[7], raw[8]);

    if len == 12 {
        let micros = u32::from_le_bytes(raw[9..13].try_into().ok()?);
        if micros > 0 {
            text.push_str(&format!(".{:06}", micros));
        }
    }

    Some(text)
}

/// Zero dates have no chrono representation
fn zero_temporal(type_name: &str, e: sqlx::Error) -> String {
    debug!("Writing empty field for unrepresentable {} value: {}", type_name, e);
    String::new()
}
