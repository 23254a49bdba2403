//! Database abstraction layer for checksql.
//!
//! Two seams keep the owner and the test database apart: [`OwnerSource`] is
//! read-only and supplies fragments and lookup metadata, [`TestTarget`]
//! receives the transient-object DDL.

mod mock;
mod postgres;
mod types;

pub use mock::{MockOwnerSource, MockTestTarget};
pub use postgres::{PgOwnerSource, PgTestTarget};
pub use types::{Diagnostic, Row, TransientObject};

use crate::error::Result;
use async_trait::async_trait;
use futures::stream::BoxStream;

/// Which test schema receives the compile checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetRole {
    /// The owner credentials double as the test target.
    Primary,
    /// A separate test schema was given.
    Secondary,
}

impl TargetRole {
    /// Suffix appended to compile-error kind tags.
    pub fn suffix(&self) -> &'static str {
        match self {
            Self::Primary => "1",
            Self::Secondary => "2",
        }
    }
}

/// Read-only access to the schema that owns the fragments.
#[async_trait]
pub trait OwnerSource: Send + Sync {
    /// Runs a driving query returning `(entity_id, sql_text, totalrows)`.
    ///
    /// A failing query yields a single [`crate::error::CheckError::Fetch`];
    /// an undecodable row yields [`crate::error::CheckError::RowExtraction`]
    /// and the stream continues.
    fn fetch_rows<'a>(&'a self, sql: &'a str) -> BoxStream<'a, Result<Row>>;

    /// Runs a single-column lookup bound to `entity_id` and returns its values.
    async fn lookup_names(&self, sql: &str, entity_id: &str) -> Result<Vec<String>>;

    /// First primary-key column of `table`, if it has one.
    async fn primary_key_column(&self, table: &str) -> Result<Option<String>>;

    /// Closes the connection pool.
    async fn close(&self) -> Result<()>;
}

/// The schema that receives transient objects.
#[async_trait]
pub trait TestTarget: Send + Sync {
    /// Executes a DDL statement.
    async fn execute_ddl(&self, ddl: &str) -> Result<()>;

    /// Diagnostics the database holds for `object`. Empty means clean.
    async fn object_diagnostics(&self, object: &TransientObject) -> Result<Vec<Diagnostic>>;

    /// Closes the connection pool.
    async fn close(&self) -> Result<()>;
}
