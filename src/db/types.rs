//! Value types exchanged with the owner and test databases.

use std::fmt;

/// One row produced by a scan entry's driving query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Row {
    /// Primary key of the row, rendered as text.
    pub entity_id: String,
    /// The fragment. `None` when the column is null.
    pub text: Option<String>,
    /// Total rows the driving query will produce, for progress reporting.
    pub total_rows: i64,
}

impl Row {
    pub fn new(entity_id: impl Into<String>, text: impl Into<String>, total_rows: i64) -> Self {
        Self {
            entity_id: entity_id.into(),
            text: Some(text.into()),
            total_rows,
        }
    }
}

/// A transient object created in the test schema.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TransientObject {
    View(String),
    Routine(String),
}

impl TransientObject {
    pub fn name(&self) -> &str {
        match self {
            Self::View(name) | Self::Routine(name) => name,
        }
    }

    /// Statement that removes the object if it exists.
    pub fn drop_statement(&self) -> String {
        match self {
            Self::View(name) => format!("drop view if exists {name}"),
            Self::Routine(name) => format!("drop function if exists {name}()"),
        }
    }
}

impl fmt::Display for TransientObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::View(name) => write!(f, "view {name}"),
            Self::Routine(name) => write!(f, "routine {name}()"),
        }
    }
}

/// A compiler diagnostic reported for a transient object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    /// Line within the object body, when the database reports one.
    pub line: Option<i64>,
    pub message: String,
}

impl Diagnostic {
    pub fn new(line: Option<i64>, message: impl Into<String>) -> Self {
        Self {
            line,
            message: message.into(),
        }
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.line {
            Some(line) => write!(f, "line {line}: {}", self.message),
            None => f.write_str(&self.message),
        }
    }
}
