//! In-memory owner and test databases for tests and dry runs.

use super::{Diagnostic, OwnerSource, Row, TestTarget, TransientObject};
use crate::error::{CheckError, Result};
use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use std::collections::{BTreeSet, HashMap};
use std::sync::Mutex;

/// A scripted owner schema.
///
/// Rows are registered per table name and returned for any driving query
/// whose `from` clause names that table.
#[derive(Default)]
pub struct MockOwnerSource {
    rows: HashMap<String, Vec<Result<Row>>>,
    failing_tables: BTreeSet<String>,
    lookups: HashMap<(String, String), Vec<String>>,
    failing_lookups: BTreeSet<String>,
    primary_keys: HashMap<String, String>,
    queries: Mutex<Vec<String>>,
}

impl MockOwnerSource {
    /// Creates an empty owner source.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a row for `table`.
    pub fn with_row(mut self, table: &str, entity_id: &str, text: &str) -> Self {
        self.push(table, Ok(Row::new(entity_id, text, 0)));
        self
    }

    /// Adds a row whose text column is null.
    pub fn with_null_row(mut self, table: &str, entity_id: &str) -> Self {
        self.push(
            table,
            Ok(Row {
                entity_id: entity_id.to_string(),
                text: None,
                total_rows: 0,
            }),
        );
        self
    }

    /// Adds a row that cannot be decoded.
    pub fn with_unreadable_row(mut self, table: &str, entity_id: &str, message: &str) -> Self {
        self.push(
            table,
            Err(CheckError::row_extraction(Some(entity_id.to_string()), message)),
        );
        self
    }

    /// Makes the driving query for `table` fail.
    pub fn with_failing_table(mut self, table: &str) -> Self {
        self.failing_tables.insert(table.to_lowercase());
        self
    }

    /// Scripts the values a lookup query returns for `entity_id`.
    /// The query is matched by a distinctive substring, e.g. a table name.
    pub fn with_lookup(mut self, query_fragment: &str, entity_id: &str, names: &[&str]) -> Self {
        self.lookups.insert(
            (query_fragment.to_lowercase(), entity_id.to_string()),
            names.iter().map(|n| n.to_string()).collect(),
        );
        self
    }

    /// Makes every lookup containing `query_fragment` fail.
    pub fn with_failing_lookup(mut self, query_fragment: &str) -> Self {
        self.failing_lookups.insert(query_fragment.to_lowercase());
        self
    }

    /// Registers a primary key for discovery.
    pub fn with_primary_key(mut self, table: &str, column: &str) -> Self {
        self.primary_keys
            .insert(table.to_lowercase(), column.to_string());
        self
    }

    /// Driving and lookup queries issued so far.
    pub fn queries(&self) -> Vec<String> {
        self.queries
            .lock()
            .map(|q| q.clone())
            .unwrap_or_default()
    }

    fn push(&mut self, table: &str, row: Result<Row>) {
        self.rows.entry(table.to_lowercase()).or_default().push(row);
    }

    fn log_query(&self, sql: &str) {
        if let Ok(mut queries) = self.queries.lock() {
            queries.push(sql.to_string());
        }
    }

    /// Table named right after the first ` from ` of a driving query.
    fn table_of(sql: &str) -> Option<String> {
        let lower = sql.to_lowercase();
        let start = lower.find(" from ")? + " from ".len();
        lower[start..]
            .split(|c: char| c.is_whitespace())
            .next()
            .map(str::to_string)
    }

    fn clone_row(row: &Result<Row>) -> Result<Row> {
        match row {
            Ok(row) => Ok(row.clone()),
            Err(CheckError::RowExtraction { entity_id, message }) => {
                Err(CheckError::row_extraction(entity_id.clone(), message.clone()))
            }
            Err(other) => Err(CheckError::fetch(other.full_message())),
        }
    }
}

#[async_trait]
impl OwnerSource for MockOwnerSource {
    fn fetch_rows<'a>(&'a self, sql: &'a str) -> BoxStream<'a, Result<Row>> {
        self.log_query(sql);
        let table = Self::table_of(sql).unwrap_or_default();

        if self.failing_tables.contains(&table) {
            let err = CheckError::fetch(format!(
                "ERROR: relation \"{table}\" does not exist"
            ));
            return stream::iter(vec![Err(err)]).boxed();
        }

        let rows = self.rows.get(&table).map(Vec::as_slice).unwrap_or_default();
        let total = rows.len() as i64;
        let items: Vec<Result<Row>> = rows
            .iter()
            .map(|row| {
                Self::clone_row(row).map(|mut r| {
                    r.total_rows = total;
                    r
                })
            })
            .collect();
        stream::iter(items).boxed()
    }

    async fn lookup_names(&self, sql: &str, entity_id: &str) -> Result<Vec<String>> {
        self.log_query(sql);
        let lower = sql.to_lowercase();

        if self.failing_lookups.iter().any(|f| lower.contains(f)) {
            return Err(CheckError::neutralization(
                "ERROR: permission denied for lookup table",
            ));
        }

        Ok(self
            .lookups
            .iter()
            .find(|((fragment, id), _)| lower.contains(fragment) && id == entity_id)
            .map(|(_, names)| names.clone())
            .unwrap_or_default())
    }

    async fn primary_key_column(&self, table: &str) -> Result<Option<String>> {
        Ok(self.primary_keys.get(&table.to_lowercase()).cloned())
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

/// A scripted test schema.
///
/// Records every DDL statement, tracks which transient objects currently
/// exist, and fails statements or reports diagnostics for bodies containing
/// scripted substrings.
#[derive(Default)]
pub struct MockTestTarget {
    rejections: Vec<(String, String)>,
    diagnostics: Vec<(String, Diagnostic)>,
    failing_drops: bool,
    state: Mutex<TargetState>,
}

#[derive(Default)]
struct TargetState {
    executed: Vec<String>,
    existing: BTreeSet<String>,
    last_body: HashMap<String, String>,
}

impl MockTestTarget {
    /// Creates a test target that accepts everything.
    pub fn new() -> Self {
        Self::default()
    }

    /// Rejects any CREATE whose text contains `fragment` with `message`.
    pub fn rejecting(mut self, fragment: &str, message: &str) -> Self {
        self.rejections
            .push((fragment.to_lowercase(), message.to_string()));
        self
    }

    /// Accepts a CREATE containing `fragment` but reports `message` afterwards.
    pub fn diagnosing(mut self, fragment: &str, line: Option<i64>, message: &str) -> Self {
        self.diagnostics
            .push((fragment.to_lowercase(), Diagnostic::new(line, message)));
        self
    }

    /// Makes every DROP fail.
    pub fn failing_drops(mut self) -> Self {
        self.failing_drops = true;
        self
    }

    /// All DDL statements executed so far.
    pub fn executed(&self) -> Vec<String> {
        self.state
            .lock()
            .map(|s| s.executed.clone())
            .unwrap_or_default()
    }

    /// Names of transient objects that currently exist.
    pub fn existing_objects(&self) -> Vec<String> {
        self.state
            .lock()
            .map(|s| s.existing.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Name of the object created or dropped by `ddl`.
    fn object_name(ddl: &str) -> Option<String> {
        let lower = ddl.to_lowercase();
        let (at, marker) = ["view if exists ", "function if exists ", "view ", "function "]
            .iter()
            .filter_map(|marker| lower.find(marker).map(|at| (at, *marker)))
            .min_by_key(|(at, marker)| (*at, std::cmp::Reverse(marker.len())))?;
        let rest = &lower[at + marker.len()..];
        rest.split(|c: char| c.is_whitespace() || c == '(')
            .next()
            .map(str::to_string)
    }
}

#[async_trait]
impl TestTarget for MockTestTarget {
    async fn execute_ddl(&self, ddl: &str) -> Result<()> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| CheckError::database("mock state poisoned", "mock state poisoned"))?;
        state.executed.push(ddl.to_string());

        let lower = ddl.trim_start().to_lowercase();
        let name = Self::object_name(&lower).unwrap_or_default();

        if lower.starts_with("drop") {
            if self.failing_drops {
                return Err(CheckError::database(
                    "ERROR: must be owner of view",
                    "must be owner of view",
                ));
            }
            state.existing.remove(&name);
            return Ok(());
        }

        if let Some((_, message)) = self.rejections.iter().find(|(f, _)| lower.contains(f)) {
            return Err(CheckError::database(format!("ERROR: {message}"), message.clone()));
        }

        state.existing.insert(name.clone());
        state.last_body.insert(name, lower);
        Ok(())
    }

    async fn object_diagnostics(&self, object: &TransientObject) -> Result<Vec<Diagnostic>> {
        let state = self
            .state
            .lock()
            .map_err(|_| CheckError::database("mock state poisoned", "mock state poisoned"))?;
        let Some(body) = state.last_body.get(&object.name().to_lowercase()) else {
            return Ok(Vec::new());
        };
        Ok(self
            .diagnostics
            .iter()
            .filter(|(fragment, _)| body.contains(fragment))
            .map(|(_, diagnostic)| diagnostic.clone())
            .collect())
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_rows_by_table() {
        let owner = MockOwnerSource::new()
            .with_row("notif", "1", "select 1 from t")
            .with_row("notif", "2", "select 2 from t");
        let rows: Vec<_> = owner
            .fetch_rows("select cast(notif_id as text) from notif where trackor_sql is not null")
            .collect()
            .await;
        assert_eq!(rows.len(), 2);
        let first = rows[0].as_ref().unwrap();
        assert_eq!(first.entity_id, "1");
        assert_eq!(first.total_rows, 2);
    }

    #[tokio::test]
    async fn test_mock_failing_table() {
        let owner = MockOwnerSource::new().with_failing_table("missing");
        let rows: Vec<_> = owner.fetch_rows("select x from missing").collect().await;
        assert!(matches!(rows.as_slice(), [Err(CheckError::Fetch(_))]));
    }

    #[tokio::test]
    async fn test_mock_lookup() {
        let owner = MockOwnerSource::new().with_lookup("imp_entity_param", "7", &["START_DATE"]);
        let names = owner
            .lookup_names("select sql_parameter from imp_entity_param where x = $1", "7")
            .await
            .unwrap();
        assert_eq!(names, vec!["START_DATE"]);
        let none = owner
            .lookup_names("select sql_parameter from imp_entity_param where x = $1", "8")
            .await
            .unwrap();
        assert!(none.is_empty());
    }

    #[test]
    fn test_mock_primary_key() {
        let owner = MockOwnerSource::new().with_primary_key("Report_SQL", "report_sql_id");
        let pk = tokio_test::block_on(owner.primary_key_column("report_sql")).unwrap();
        assert_eq!(pk.as_deref(), Some("report_sql_id"));
        let none = tokio_test::block_on(owner.primary_key_column("notif")).unwrap();
        assert!(none.is_none());
    }

    #[tokio::test]
    async fn test_mock_target_tracks_objects() {
        let target = MockTestTarget::new();
        target
            .execute_ddl("create or replace view checksql_select as select 1 as val")
            .await
            .unwrap();
        assert_eq!(target.existing_objects(), vec!["checksql_select"]);
        target
            .execute_ddl("drop view if exists checksql_select")
            .await
            .unwrap();
        assert!(target.existing_objects().is_empty());
    }

    #[tokio::test]
    async fn test_mock_target_rejects_and_diagnoses() {
        let target = MockTestTarget::new()
            .rejecting("missing_table", "relation \"missing_table\" does not exist")
            .diagnosing("undefined_proc", Some(5), "function undefined_proc() does not exist");

        let err = target
            .execute_ddl("create or replace view v as select * from missing_table")
            .await
            .unwrap_err();
        assert!(err.full_message().contains("missing_table"));

        target
            .execute_ddl("create or replace function f() returns void as $$ begin perform undefined_proc(); end; $$ language plpgsql")
            .await
            .unwrap();
        let diagnostics = target
            .object_diagnostics(&TransientObject::Routine("f".into()))
            .await
            .unwrap();
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].line, Some(5));
    }
}
