//! PostgreSQL implementations of [`OwnerSource`] and [`TestTarget`] using sqlx.

use crate::config::{CheckSettings, ConnectionConfig};
use crate::db::{Diagnostic, OwnerSource, Row, TestTarget, TransientObject};
use crate::error::{CheckError, Result};
use async_trait::async_trait;
use futures::stream::{BoxStream, StreamExt};
use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions, PgRow};
use sqlx::Row as SqlxRow;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Maximum number of connection retry attempts.
const MAX_RETRY_ATTEMPTS: u32 = 3;

/// Base delay between retry attempts (doubles each retry).
const RETRY_BASE_DELAY_MS: u64 = 500;

/// Owner connections: one streams rows while another serves lookups.
const OWNER_POOL_SIZE: u32 = 2;

/// Transient objects use fixed names, so checks on the test schema run on
/// a single connection, one object at a time.
const TEST_POOL_SIZE: u32 = 1;

/// Read-only access to the owner schema.
#[derive(Debug)]
pub struct PgOwnerSource {
    pool: PgPool,
    timeout: Duration,
}

impl PgOwnerSource {
    /// Connects to the owner schema.
    pub async fn connect(config: &ConnectionConfig, settings: &CheckSettings) -> Result<Self> {
        let pool = connect_pool(config, settings, OWNER_POOL_SIZE).await?;
        Ok(Self {
            pool,
            timeout: Duration::from_secs(settings.statement_timeout_secs),
        })
    }

    /// Creates an owner source from an existing connection pool.
    pub fn from_pool(pool: PgPool, timeout: Duration) -> Self {
        Self { pool, timeout }
    }
}

#[async_trait]
impl OwnerSource for PgOwnerSource {
    fn fetch_rows<'a>(&'a self, sql: &'a str) -> BoxStream<'a, Result<Row>> {
        sqlx::query(sql)
            .fetch(&self.pool)
            .map(|result| match result {
                Ok(row) => convert_row(&row),
                Err(e) => Err(CheckError::fetch(format_query_error(&e))),
            })
            .boxed()
    }

    async fn lookup_names(&self, sql: &str, entity_id: &str) -> Result<Vec<String>> {
        let rows: Vec<Option<String>> = tokio::time::timeout(
            self.timeout,
            sqlx::query_scalar(sql).bind(entity_id).fetch_all(&self.pool),
        )
        .await
        .map_err(|_| timed_out(self.timeout))?
        .map_err(|e| CheckError::neutralization(format_query_error(&e)))?;

        Ok(rows.into_iter().flatten().collect())
    }

    async fn primary_key_column(&self, table: &str) -> Result<Option<String>> {
        let column: Option<String> = tokio::time::timeout(
            self.timeout,
            sqlx::query_scalar(
                r#"
                SELECT kcu.column_name::text
                FROM information_schema.table_constraints tc
                JOIN information_schema.key_column_usage kcu
                    ON tc.constraint_name = kcu.constraint_name
                    AND tc.table_schema = kcu.table_schema
                WHERE tc.table_schema = current_schema()
                    AND lower(tc.table_name) = lower($1)
                    AND tc.constraint_type = 'PRIMARY KEY'
                ORDER BY kcu.ordinal_position
                LIMIT 1
                "#,
            )
            .bind(table)
            .fetch_optional(&self.pool),
        )
        .await
        .map_err(|_| timed_out(self.timeout))?
        .map_err(|e| {
            CheckError::fetch(format!(
                "Failed to fetch primary key for {table}: {}",
                format_query_error(&e)
            ))
        })?;

        Ok(column)
    }

    async fn close(&self) -> Result<()> {
        self.pool.close().await;
        Ok(())
    }
}

/// Read-write access to the test schema.
#[derive(Debug)]
pub struct PgTestTarget {
    pool: PgPool,
    timeout: Duration,
    plpgsql_check: bool,
}

impl PgTestTarget {
    /// Connects to the test schema and probes for the plpgsql_check extension.
    pub async fn connect(config: &ConnectionConfig, settings: &CheckSettings) -> Result<Self> {
        let pool = connect_pool(config, settings, TEST_POOL_SIZE).await?;
        let timeout = Duration::from_secs(settings.statement_timeout_secs);
        let plpgsql_check = settings.use_plpgsql_check && has_plpgsql_check(&pool).await;

        if plpgsql_check {
            info!(target: "checksql::progress", "Routine diagnostics use plpgsql_check");
        } else if settings.use_plpgsql_check {
            warn!(
                "plpgsql_check extension not installed in {}; routines are only validated at creation",
                config.display_string()
            );
        }

        Ok(Self {
            pool,
            timeout,
            plpgsql_check,
        })
    }

    /// Creates a test target from an existing connection pool.
    pub fn from_pool(pool: PgPool, timeout: Duration, plpgsql_check: bool) -> Self {
        Self {
            pool,
            timeout,
            plpgsql_check,
        }
    }
}

#[async_trait]
impl TestTarget for PgTestTarget {
    /// Runs one statement over the extended protocol, which rejects a
    /// second command smuggled in through fragment text.
    async fn execute_ddl(&self, ddl: &str) -> Result<()> {
        let statement = sqlx::query(ddl).persistent(false);
        tokio::time::timeout(self.timeout, statement.execute(&self.pool))
            .await
            .map_err(|_| timed_out(self.timeout))?
            .map_err(|e| CheckError::database(format_query_error(&e), short_query_error(&e)))?;
        Ok(())
    }

    async fn object_diagnostics(&self, object: &TransientObject) -> Result<Vec<Diagnostic>> {
        // Views are fully resolved by CREATE VIEW; nothing is left to report.
        let TransientObject::Routine(name) = object else {
            return Ok(Vec::new());
        };
        if !self.plpgsql_check {
            return Ok(Vec::new());
        }

        let rows: Vec<(Option<i32>, String)> = tokio::time::timeout(
            self.timeout,
            sqlx::query_as(
                r#"
                SELECT lineno, message
                FROM plpgsql_check_function_tb($1::regprocedure)
                WHERE level = 'error'
                ORDER BY lineno NULLS FIRST
                "#,
            )
            .bind(format!("{name}()"))
            .fetch_all(&self.pool),
        )
        .await
        .map_err(|_| timed_out(self.timeout))?
        .map_err(|e| {
            CheckError::database(
                format!("Cannot read diagnostics of {object}: {}", format_query_error(&e)),
                format!("{object}: {}", short_query_error(&e)),
            )
        })?;

        Ok(rows
            .into_iter()
            .map(|(line, message)| Diagnostic::new(line.map(i64::from), message))
            .collect())
    }

    async fn close(&self) -> Result<()> {
        self.pool.close().await;
        Ok(())
    }
}

async fn has_plpgsql_check(pool: &PgPool) -> bool {
    sqlx::query_scalar::<_, bool>(
        "SELECT EXISTS (SELECT 1 FROM pg_extension WHERE extname = 'plpgsql_check')",
    )
    .fetch_one(pool)
    .await
    .unwrap_or(false)
}

async fn connect_pool(
    config: &ConnectionConfig,
    settings: &CheckSettings,
    max_connections: u32,
) -> Result<PgPool> {
    let conn_str = config.to_connection_string()?;
    let options = PgConnectOptions::from_str(&conn_str)
        .map_err(|e| CheckError::config(format!("Invalid connection string: {e}")))?
        .application_name("checksql")
        .options([(
            "statement_timeout",
            format!("{}s", settings.statement_timeout_secs),
        )]);

    let mut last_error = None;
    let mut delay = Duration::from_millis(RETRY_BASE_DELAY_MS);

    for attempt in 1..=MAX_RETRY_ATTEMPTS {
        debug!("Connection attempt {} of {}", attempt, MAX_RETRY_ATTEMPTS);

        let result = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(10))
            .connect_with(options.clone())
            .await;

        match result {
            Ok(pool) => {
                debug!("Connected to {}", config.display_string());
                return Ok(pool);
            }
            Err(e) => {
                let is_transient = is_transient_error(&e);
                last_error = Some(e);

                if attempt < MAX_RETRY_ATTEMPTS && is_transient {
                    warn!(
                        "Connection attempt {} failed (transient error), retrying in {:?}",
                        attempt, delay
                    );
                    tokio::time::sleep(delay).await;
                    delay *= 2;
                } else {
                    break;
                }
            }
        }
    }

    Err(match last_error {
        Some(e) => map_connection_error(e, config),
        None => CheckError::connection(format!(
            "Cannot connect to {}",
            config.display_string()
        )),
    })
}

/// Decodes `(entity_id, sql_text, totalrows)`.
fn convert_row(row: &PgRow) -> Result<Row> {
    let entity_id: Option<String> = row
        .try_get(0)
        .map_err(|e| CheckError::row_extraction(None, format!("Cannot read entity id: {e}")))?;
    let entity_id = entity_id.unwrap_or_default();

    let text: Option<String> = row.try_get(1).map_err(|e| {
        CheckError::row_extraction(Some(entity_id.clone()), format!("Cannot read sql text: {e}"))
    })?;

    let total_rows: i64 = row.try_get(2).unwrap_or(0);

    Ok(Row {
        entity_id,
        text,
        total_rows,
    })
}

fn timed_out(timeout: Duration) -> CheckError {
    CheckError::database(
        format!("Statement timed out after {} seconds", timeout.as_secs()),
        "statement timed out",
    )
}

/// Determines if an error is transient and worth retrying.
fn is_transient_error(error: &sqlx::Error) -> bool {
    let error_str = error.to_string().to_lowercase();

    if error_str.contains("password authentication failed")
        || error_str.contains("authentication failed")
        || error_str.contains("does not exist")
    {
        return false;
    }

    error_str.contains("connection refused")
        || error_str.contains("timed out")
        || error_str.contains("timeout")
        || error_str.contains("temporarily unavailable")
        || error_str.contains("connection reset")
        || error_str.contains("broken pipe")
}

/// Maps sqlx connection errors to user-friendly messages.
fn map_connection_error(error: sqlx::Error, config: &ConnectionConfig) -> CheckError {
    let host = &config.host;
    let port = config.port;
    let error_str = error.to_string().to_lowercase();

    if error_str.contains("connection refused") || error_str.contains("could not connect") {
        CheckError::connection(format!(
            "Cannot connect to {host}:{port}. Check that the server is running."
        ))
    } else if error_str.contains("password authentication failed")
        || error_str.contains("authentication failed")
    {
        CheckError::connection(format!(
            "Authentication failed for user '{}'. Check your credentials.",
            config.user
        ))
    } else if error_str.contains("does not exist") && error_str.contains("database") {
        CheckError::connection(format!("Database '{}' does not exist.", config.database))
    } else if error_str.contains("timed out") || error_str.contains("timeout") {
        CheckError::connection(format!(
            "Connection to {host}:{port} timed out. The server may be overloaded or unreachable."
        ))
    } else {
        CheckError::connection(error.to_string())
    }
}

/// Formats a database error with detail, hint and position fields.
fn format_query_error(error: &sqlx::Error) -> String {
    let Some(db_error) = error.as_database_error() else {
        return error.to_string();
    };

    let mut result = String::from("ERROR: ");
    result.push_str(db_error.message());

    if let Some(pg_error) = db_error.try_downcast_ref::<sqlx::postgres::PgDatabaseError>() {
        result.push_str(&format!(" (SQLSTATE {})", pg_error.code()));

        if let Some(detail) = pg_error.detail() {
            result.push_str("\n  DETAIL: ");
            result.push_str(detail);
        }

        if let Some(hint) = pg_error.hint() {
            result.push_str("\n  HINT: ");
            result.push_str(hint);
        }

        if let Some(context) = pg_error.r#where() {
            result.push_str("\n  CONTEXT: ");
            result.push_str(context);
        }

        if let Some(table) = pg_error.table() {
            result.push_str("\n  TABLE: ");
            result.push_str(table);
        }

        if let Some(column) = pg_error.column() {
            result.push_str("\n  COLUMN: ");
            result.push_str(column);
        }
    }

    result
}

/// The primary message only.
fn short_query_error(error: &sqlx::Error) -> String {
    match error.as_database_error() {
        Some(db_error) => db_error.message().to_string(),
        None => error.to_string(),
    }
}
