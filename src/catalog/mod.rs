//! Catalog of scan entries: which table columns hold fragments.

mod builtin;
mod file;

pub use file::parse_catalog_json;

use crate::error::Result;
use std::path::Path;

/// Name of the row-count column of every driving query.
pub const TOTAL_ROWS_COLUMN: &str = "totalrows";

/// One table column to scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanEntry {
    /// 1-based position in the catalog.
    pub ordinal: usize,
    pub table: String,
    /// `from` clause of the driving query; may be a join.
    pub from_clause: String,
    /// Column holding the fragments, possibly alias-qualified.
    pub sql_column: String,
    /// Primary-key column. Discovered from the owner schema when `None`.
    pub pk_column: Option<String>,
    /// Extra filter for the driving query.
    pub predicate: Option<String>,
    pub enabled: bool,
}

impl ScanEntry {
    pub fn new(
        table: impl Into<String>,
        sql_column: impl Into<String>,
        pk_column: impl Into<String>,
    ) -> Self {
        let table = table.into();
        Self {
            ordinal: 0,
            from_clause: table.clone(),
            table,
            sql_column: sql_column.into(),
            pk_column: Some(pk_column.into()),
            predicate: None,
            enabled: true,
        }
    }

    pub fn with_from(mut self, from_clause: impl Into<String>) -> Self {
        self.from_clause = from_clause.into();
        self
    }

    pub fn with_predicate(mut self, predicate: impl Into<String>) -> Self {
        self.predicate = Some(predicate.into());
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    /// `table.column` label for log output.
    pub fn label(&self) -> String {
        let column = self
            .sql_column
            .rsplit('.')
            .next()
            .unwrap_or(&self.sql_column);
        format!("{}.{}", self.table, column)
    }

    /// Driving query producing `(entity_id, sql_text, totalrows)`.
    pub fn fetch_sql(&self, pk_column: &str) -> String {
        let mut sql = format!(
            "select cast({pk} as text) as entity_id, cast({col} as text) as sql_text, count(*) over () as {TOTAL_ROWS_COLUMN} from {from} where {col} is not null",
            pk = pk_column,
            col = self.sql_column,
            from = self.from_clause,
        );
        if let Some(predicate) = &self.predicate {
            sql.push_str(" and (");
            sql.push_str(predicate);
            sql.push(')');
        }
        sql
    }

    /// Statement that selects the offending fragment.
    pub fn locate_sql(&self, pk_column: &str, entity_id: &str) -> String {
        let id = if !entity_id.is_empty() && entity_id.bytes().all(|b| b.is_ascii_digit()) {
            entity_id.to_string()
        } else {
            format!("'{}'", entity_id.replace('\'', "''"))
        };
        format!(
            "select {} from {} where {} = {};",
            self.sql_column, self.from_clause, pk_column, id
        )
    }
}

/// Ordered list of scan entries.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    entries: Vec<ScanEntry>,
}

impl Catalog {
    /// Builds a catalog, numbering entries in order.
    pub fn new(entries: Vec<ScanEntry>) -> Self {
        let entries = entries
            .into_iter()
            .enumerate()
            .map(|(i, mut entry)| {
                entry.ordinal = i + 1;
                entry
            })
            .collect();
        Self { entries }
    }

    /// The application's metadata tables.
    pub fn builtin() -> Self {
        Self::new(builtin::entries())
    }

    /// Loads a JSON catalog file.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        file::load(path).map(Self::new)
    }

    pub fn entries(&self) -> &[ScanEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries that will actually be scanned.
    pub fn enabled_count(&self) -> usize {
        self.entries.iter().filter(|e| e.enabled).count()
    }

    /// Disables every entry of the named tables.
    pub fn disable_tables(&mut self, tables: &[String]) {
        for entry in &mut self.entries {
            if tables.iter().any(|t| t.eq_ignore_ascii_case(&entry.table)) {
                entry.enabled = false;
            }
        }
    }
}
