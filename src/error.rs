//! Error types for checksql.
//!
//! `CheckError` covers everything that can go wrong while talking to the
//! databases or loading configuration. Problems found *in* fragments are not
//! Rust errors; they are recorded as [`crate::report::SqlError`] values.

use thiserror::Error;

/// Main error type for checksql operations.
#[derive(Error, Debug)]
pub enum CheckError {
    /// Database connection errors (host unreachable, auth failed, etc.)
    #[error("Connection error: {0}")]
    Connection(String),

    /// Configuration errors (bad credentials string, invalid catalog file, etc.)
    #[error("Configuration error: {0}")]
    Config(String),

    /// The driving query of a scan entry failed.
    #[error("Fetch error: {0}")]
    Fetch(String),

    /// A single row could not be decoded.
    #[error("Row extraction error: {message}")]
    RowExtraction {
        entity_id: Option<String>,
        message: String,
    },

    /// An auxiliary placeholder lookup failed.
    #[error("Neutralization error: {0}")]
    Neutralization(String),

    /// A statement was rejected by the database.
    #[error("Database error: {short}")]
    Database { full: String, short: String },
}

impl CheckError {
    /// Creates a connection error with the given message.
    pub fn connection(msg: impl Into<String>) -> Self {
        Self::Connection(msg.into())
    }

    /// Creates a configuration error with the given message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Creates a fetch error with the given message.
    pub fn fetch(msg: impl Into<String>) -> Self {
        Self::Fetch(msg.into())
    }

    /// Creates a row extraction error for the given entity.
    pub fn row_extraction(entity_id: Option<String>, msg: impl Into<String>) -> Self {
        Self::RowExtraction {
            entity_id,
            message: msg.into(),
        }
    }

    /// Creates a neutralization error with the given message.
    pub fn neutralization(msg: impl Into<String>) -> Self {
        Self::Neutralization(msg.into())
    }

    /// Creates a database error from a full (multi-line) and short message.
    pub fn database(full: impl Into<String>, short: impl Into<String>) -> Self {
        Self::Database {
            full: full.into(),
            short: short.into(),
        }
    }

    /// Returns the error category as a string for display purposes.
    pub fn category(&self) -> &'static str {
        match self {
            Self::Connection(_) => "Connection Error",
            Self::Config(_) => "Configuration Error",
            Self::Fetch(_) => "Fetch Error",
            Self::RowExtraction { .. } => "Row Extraction Error",
            Self::Neutralization(_) => "Neutralization Error",
            Self::Database { .. } => "Database Error",
        }
    }

    /// Full message including database detail lines, when available.
    pub fn full_message(&self) -> String {
        match self {
            Self::Database { full, .. } => full.clone(),
            Self::RowExtraction { message, .. } => message.clone(),
            Self::Connection(msg)
            | Self::Config(msg)
            | Self::Fetch(msg)
            | Self::Neutralization(msg) => msg.clone(),
        }
    }

    /// One-line message without detail lines.
    pub fn short_message(&self) -> String {
        match self {
            Self::Database { short, .. } => short.clone(),
            other => other
                .full_message()
                .lines()
                .next()
                .unwrap_or_default()
                .to_string(),
        }
    }
}

/// Result type alias using CheckError.
pub type Result<T> = std::result::Result<T, CheckError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_connection() {
        let err = CheckError::connection("Cannot connect to localhost:5432");
        assert_eq!(
            err.to_string(),
            "Connection error: Cannot connect to localhost:5432"
        );
        assert_eq!(err.category(), "Connection Error");
    }

    #[test]
    fn test_error_display_config() {
        let err = CheckError::config("missing table name in 'trackor_sql'");
        assert_eq!(
            err.to_string(),
            "Configuration error: missing table name in 'trackor_sql'"
        );
        assert_eq!(err.category(), "Configuration Error");
    }

    #[test]
    fn test_database_error_messages() {
        let err = CheckError::database(
            "ERROR: relation \"trackor\" does not exist\n  HINT: check the search_path",
            "relation \"trackor\" does not exist",
        );
        assert_eq!(
            err.to_string(),
            "Database error: relation \"trackor\" does not exist"
        );
        assert!(err.full_message().contains("HINT"));
        assert_eq!(err.short_message(), "relation \"trackor\" does not exist");
    }

    #[test]
    fn test_short_message_takes_first_line() {
        let err = CheckError::fetch("column \"x\" does not exist\nLINE 1: select x");
        assert_eq!(err.short_message(), "column \"x\" does not exist");
        assert_eq!(err.category(), "Fetch Error");
    }

    #[test]
    fn test_row_extraction_keeps_entity() {
        let err = CheckError::row_extraction(Some("42".into()), "invalid utf-8");
        match &err {
            CheckError::RowExtraction { entity_id, .. } => {
                assert_eq!(entity_id.as_deref(), Some("42"))
            }
            other => panic!("unexpected error {other:?}"),
        }
        assert_eq!(err.to_string(), "Row extraction error: invalid utf-8");
    }

    #[test]
    fn test_error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<CheckError>();
    }
}
