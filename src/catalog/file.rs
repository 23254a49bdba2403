//! JSON catalog files.
//!
//! ```json
//! [
//!   "notif.trackor_sql",
//!   {"report_sql.sql_text": "select sql_text from report_sql where is_active = 1"}
//! ]
//! ```

use super::ScanEntry;
use crate::error::{CheckError, Result};
use crate::sql::lexer;
use crate::sql::rewrite::select_parts;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawEntry {
    Bare(String),
    Query(BTreeMap<String, String>),
}

pub(super) fn load(path: &Path) -> Result<Vec<ScanEntry>> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        CheckError::config(format!(
            "Failed to read catalog file {}: {}",
            path.display(),
            e
        ))
    })?;
    parse_catalog_json(&content)
        .map_err(|e| CheckError::config(format!("{}: {}", path.display(), e.full_message())))
}

/// Parses catalog entries from JSON text. Primary keys are left for discovery.
pub fn parse_catalog_json(content: &str) -> Result<Vec<ScanEntry>> {
    let raw: Vec<RawEntry> = serde_json::from_str(content)
        .map_err(|e| CheckError::config(format!("Invalid catalog JSON: {}", e)))?;

    let mut entries = Vec::new();
    for item in raw {
        match item {
            RawEntry::Bare(key) => {
                let (table, column) = split_key(&key)?;
                entries.push(entry(table, column.to_string(), table.to_string(), None));
            }
            RawEntry::Query(map) => {
                for (key, select) in map {
                    let (table, column) = split_key(&key)?;
                    let parts = select_parts(&select).ok_or_else(|| {
                        CheckError::config(format!(
                            "Catalog entry '{}': expected 'select ... from ...', got '{}'",
                            key, select
                        ))
                    })?;
                    let sql_column = projected_column(&select, column)
                        .unwrap_or_else(|| column.to_string());
                    entries.push(entry(table, sql_column, parts.from_clause, parts.predicate));
                }
            }
        }
    }
    Ok(entries)
}

fn entry(
    table: &str,
    sql_column: String,
    from_clause: String,
    predicate: Option<String>,
) -> ScanEntry {
    ScanEntry {
        ordinal: 0,
        table: table.to_string(),
        from_clause,
        sql_column,
        pk_column: None,
        predicate,
        enabled: true,
    }
}

fn split_key(key: &str) -> Result<(&str, &str)> {
    match key.trim().split_once('.') {
        Some((table, column)) if !table.is_empty() && !column.is_empty() => Ok((table, column)),
        _ => Err(CheckError::config(format!(
            "Catalog key '{}' should be in 'table.column' format",
            key
        ))),
    }
}

/// The select list when it is a single (possibly alias-qualified) reference
/// to `column`, e.g. `v.value_clob`.
fn projected_column(select: &str, column: &str) -> Option<String> {
    let tokens = lexer::tokenize(select);
    let mut significant = tokens.iter().filter(|t| !t.is_trivia());
    if !significant.next()?.is_word("select") {
        return None;
    }
    let list: Vec<_> = significant.take_while(|t| !t.is_word("from")).collect();
    let text: String = list.iter().map(|t| t.text).collect();
    let last = text.rsplit('.').next()?;
    last.eq_ignore_ascii_case(column).then_some(text)
}
