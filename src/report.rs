//! Failure records, per-table statistics and the run summary.

use crate::catalog::ScanEntry;
use crate::db::TargetRole;
use crate::harness::FailureStage;
use std::collections::BTreeMap;
use std::fmt;
use tracing::{error, info, warn};

/// Log target for per-fragment failure blocks.
pub const FAILURE_TARGET: &str = "checksql::failure";
/// Log target for the final summary.
pub const SUMMARY_TARGET: &str = "checksql::summary";

const BLOCK_SEPARATOR: &str = "==========================";

/// What went wrong.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    CreateView,
    ViewDiagnostics,
    ReadViewDiagnostics,
    CreateRoutine,
    RoutineDiagnostics,
    ReadRoutineDiagnostics,
    /// The driving query of an entry failed.
    FetchEntity,
    /// A row could not be decoded.
    ReadRow,
    /// An auxiliary placeholder lookup failed.
    ReplaceBindVars,
    /// The entry's primary key could not be determined.
    PrimaryKey,
}

/// Whether a failure belongs to a row or to the scan entry itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Fragment,
    Configuration,
}

impl ErrorKind {
    /// Kind for a failed compile check.
    pub fn compile(procedural: bool, stage: FailureStage) -> Self {
        match (procedural, stage) {
            (false, FailureStage::Create) => Self::CreateView,
            (false, FailureStage::Diagnostics) => Self::ViewDiagnostics,
            (false, FailureStage::ReadDiagnostics) => Self::ReadViewDiagnostics,
            (true, FailureStage::Create) => Self::CreateRoutine,
            (true, FailureStage::Diagnostics) => Self::RoutineDiagnostics,
            (true, FailureStage::ReadDiagnostics) => Self::ReadRoutineDiagnostics,
        }
    }

    pub fn severity(&self) -> Severity {
        match self {
            Self::FetchEntity | Self::PrimaryKey => Severity::Configuration,
            _ => Severity::Fragment,
        }
    }

    /// Report tag. Compile kinds carry the test-target suffix.
    pub fn tag(&self, role: TargetRole) -> String {
        let base = match self {
            Self::CreateView => "CREATE-VIEW",
            Self::ViewDiagnostics => "VIEW-ERR",
            Self::ReadViewDiagnostics => "GET-VIEW-ERR",
            Self::CreateRoutine => "CREATE-PROC",
            Self::RoutineDiagnostics => "PROC-ERR",
            Self::ReadRoutineDiagnostics => "GET-PROC-ERR",
            Self::FetchEntity => return "FETCH-ENTITY".to_string(),
            Self::ReadRow => return "READ-ROW".to_string(),
            Self::ReplaceBindVars => return "REPLACE-BIND-VARS".to_string(),
            Self::PrimaryKey => return "PRIMARY-KEY".to_string(),
        };
        format!("{}{}", base, role.suffix())
    }
}

/// One recorded failure, self-describing enough to fix the row without
/// re-running the check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SqlError {
    pub kind: ErrorKind,
    pub tag: String,
    pub table: String,
    pub sql_column: String,
    pub pk_column: String,
    pub entity_id: Option<String>,
    pub original_text: Option<String>,
    pub transformed_text: Option<String>,
    pub message: String,
    pub short_message: String,
    pub table_ordinal: usize,
    pub row_ordinal: Option<u64>,
    /// Statement selecting the offending fragment.
    pub locate_sql: Option<String>,
}

impl SqlError {
    pub fn new(kind: ErrorKind, role: TargetRole, entry: &ScanEntry, pk_column: &str) -> Self {
        Self {
            kind,
            tag: kind.tag(role),
            table: entry.table.clone(),
            sql_column: entry.sql_column.clone(),
            pk_column: pk_column.to_string(),
            entity_id: None,
            original_text: None,
            transformed_text: None,
            message: String::new(),
            short_message: String::new(),
            table_ordinal: entry.ordinal,
            row_ordinal: None,
            locate_sql: None,
        }
    }

    /// Attaches the row and the statement that locates it.
    pub fn for_row(
        mut self,
        entry: &ScanEntry,
        entity_id: Option<&str>,
        row_ordinal: u64,
    ) -> Self {
        self.row_ordinal = Some(row_ordinal);
        if let Some(id) = entity_id {
            self.locate_sql = Some(entry.locate_sql(&self.pk_column, id));
            self.entity_id = Some(id.to_string());
        }
        self
    }

    pub fn with_texts(mut self, original: &str, transformed: Option<&str>) -> Self {
        self.original_text = Some(original.to_string());
        self.transformed_text = transformed.map(str::to_string);
        self
    }

    /// Sets the messages. An empty short message defaults to the first line
    /// of the full one.
    pub fn with_message(mut self, message: impl Into<String>, short: impl Into<String>) -> Self {
        self.message = message.into();
        let short = short.into();
        self.short_message = if short.is_empty() {
            self.message.lines().next().unwrap_or_default().to_string()
        } else {
            short
        };
        self
    }

    pub fn severity(&self) -> Severity {
        self.kind.severity()
    }

    /// `table.column` without alias qualification.
    pub fn location(&self) -> String {
        let column = self
            .sql_column
            .rsplit('.')
            .next()
            .unwrap_or(&self.sql_column);
        format!("{}.{}", self.table, column)
    }

    /// One line for the warn-level log.
    pub fn one_line(&self) -> String {
        match &self.entity_id {
            Some(id) => format!(
                "[{}] {} {} = {}: {}",
                self.tag,
                self.location(),
                self.pk_column,
                id,
                self.short_message
            ),
            None => format!("[{}] {}: {}", self.tag, self.location(), self.short_message),
        }
    }
}

impl fmt::Display for SqlError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", BLOCK_SEPARATOR)?;
        match &self.entity_id {
            Some(id) => writeln!(
                f,
                "[{}] Invalid value in {} where {} = {}:",
                self.tag,
                self.location(),
                self.pk_column,
                id
            )?,
            None => writeln!(
                f,
                "[{}] Invalid configuration of entry {} ({}):",
                self.tag,
                self.table_ordinal,
                self.location()
            )?,
        }
        write!(f, "{}", self.message)?;
        if let Some(original) = &self.original_text {
            write!(f, "\nOriginal Query:\n{}", original)?;
        }
        if let Some(transformed) = &self.transformed_text {
            write!(f, "\nTransformed Query:\n{}", transformed)?;
        }
        if let Some(locate) = &self.locate_sql {
            write!(f, "\nLocate:\n{}", locate)?;
        }
        Ok(())
    }
}

/// Per-table counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TableStats {
    pub rows_examined: u64,
    pub rows_failed: u64,
}

impl TableStats {
    pub fn passed(&self) -> u64 {
        self.rows_examined.saturating_sub(self.rows_failed)
    }
}

/// Collects failures and statistics for one run.
#[derive(Debug, Default)]
pub struct Aggregator {
    stats: BTreeMap<String, TableStats>,
    errors: Vec<SqlError>,
    config_errors: Vec<SqlError>,
}

impl Aggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the table show up in the summary even with no rows.
    pub fn register_table(&mut self, table: &str) {
        self.stats.entry(table.to_lowercase()).or_default();
    }

    /// Counts one examined row.
    pub fn examine(&mut self, table: &str) {
        self.stats.entry(table.to_lowercase()).or_default().rows_examined += 1;
    }

    /// Records and logs a failure. Fragment failures count against the
    /// table only for rows already examined.
    pub fn record(&mut self, error: SqlError) {
        error!(target: FAILURE_TARGET, "{}", error);
        warn!("{}", error.one_line());

        match error.severity() {
            Severity::Fragment => {
                let stats = self.stats.entry(error.table.to_lowercase()).or_default();
                if stats.rows_failed < stats.rows_examined {
                    stats.rows_failed += 1;
                }
                self.errors.push(error);
            }
            Severity::Configuration => {
                self.register_table(&error.table);
                self.config_errors.push(error);
            }
        }
    }

    /// Statistics keyed by lower-cased table name.
    pub fn finalize_stats(&self) -> BTreeMap<String, TableStats> {
        self.stats.clone()
    }

    pub fn stats_for(&self, table: &str) -> TableStats {
        self.stats
            .get(&table.to_lowercase())
            .copied()
            .unwrap_or_default()
    }

    /// Fragment-level failures in recording order.
    pub fn errors(&self) -> &[SqlError] {
        &self.errors
    }

    /// Configuration-level failures in recording order.
    pub fn config_errors(&self) -> &[SqlError] {
        &self.config_errors
    }

    pub fn has_failures(&self) -> bool {
        !self.errors.is_empty() || !self.config_errors.is_empty()
    }

    /// Summary text. Tables appear in case-insensitive name order.
    pub fn render_summary(&self) -> String {
        let mut out = String::from("========checksql Summary=========\n");
        out.push_str("Passed (table name, rows checked):\n");
        for (table, stats) in &self.stats {
            out.push_str(&format!("{}, {}\n", table, stats.passed()));
        }

        out.push_str("\nFailed (table name, errors count):\n");
        for (table, stats) in self.stats.iter().filter(|(_, s)| s.rows_failed > 0) {
            out.push_str(&format!("{}, {}\n", table, stats.rows_failed));
        }

        if !self.config_errors.is_empty() {
            out.push_str("\nInvalid configuration:\n");
            for error in &self.config_errors {
                out.push_str(&format!(
                    "{} [{}]: {}\n",
                    error.location(),
                    error.tag,
                    error.short_message
                ));
            }
        }
        out
    }

    pub fn log_summary(&self) {
        for line in self.render_summary().lines() {
            info!(target: SUMMARY_TARGET, "{}", line);
        }
    }
}
