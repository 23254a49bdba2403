//! Scan driver.
//!
//! Walks the catalog entry by entry and row by row: each fragment is
//! classified, neutralized and compile-checked, and failures go to the
//! [`Aggregator`]. Row-level failures never stop an entry; a failing
//! driving query stops only its own entry.

use crate::catalog::{Catalog, ScanEntry};
use crate::config::CheckSettings;
use crate::db::{OwnerSource, Row, TargetRole, TestTarget};
use crate::error::CheckError;
use crate::harness::CompileHarness;
use crate::neutralize::{Neutralizer, RuleRegistry};
use crate::report::{Aggregator, ErrorKind, SqlError};
use crate::sql::{ClassifiedStatement, StatementClassifier};
use futures::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Log target for progress messages.
pub const PROGRESS_TARGET: &str = "checksql::progress";

/// Runs compile checks for every enabled catalog entry.
pub struct Scanner<'a> {
    owner: &'a dyn OwnerSource,
    classifier: StatementClassifier,
    neutralizer: Neutralizer<'a>,
    harness: CompileHarness<'a>,
    role: TargetRole,
    progress_every: u64,
    cancel: CancellationToken,
}

impl<'a> Scanner<'a> {
    pub fn new(
        owner: &'a dyn OwnerSource,
        target: &'a dyn TestTarget,
        registry: &'a RuleRegistry,
        settings: &CheckSettings,
        role: TargetRole,
    ) -> Self {
        Self {
            owner,
            classifier: StatementClassifier::new(),
            neutralizer: Neutralizer::new(owner, registry),
            harness: CompileHarness::new(target, registry, settings),
            role,
            progress_every: settings.progress_every.max(1),
            cancel: CancellationToken::new(),
        }
    }

    /// Stops the scan between rows once `token` is cancelled.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Scans the whole catalog. Transient objects are dropped after each
    /// entry and again before returning, including after cancellation.
    pub async fn run(&mut self, catalog: &Catalog) -> Aggregator {
        let mut aggregator = Aggregator::new();
        info!(
            target: PROGRESS_TARGET,
            "checksql started: {} of {} catalog entries enabled",
            catalog.enabled_count(),
            catalog.len()
        );

        for entry in catalog.entries() {
            if self.cancel.is_cancelled() {
                warn!(target: PROGRESS_TARGET, "Scan cancelled before {}", entry.label());
                break;
            }
            if !entry.enabled {
                debug!("Skipping disabled entry {}", entry.label());
                continue;
            }
            self.scan_entry(entry, &mut aggregator).await;
            self.harness.cleanup().await;
        }

        self.harness.cleanup().await;
        info!(target: PROGRESS_TARGET, "checksql completed");
        aggregator
    }

    /// Drops leftover transient objects without scanning.
    pub async fn drop_transient_objects(&mut self) {
        self.harness.drop_all().await;
    }

    async fn scan_entry(&mut self, entry: &ScanEntry, aggregator: &mut Aggregator) {
        aggregator.register_table(&entry.table);

        let pk = match self.resolve_pk(entry).await {
            Ok(pk) => pk,
            Err(message) => {
                let error = SqlError::new(ErrorKind::PrimaryKey, self.role, entry, "")
                    .with_message(message, "");
                aggregator.record(error);
                return;
            }
        };

        info!(target: PROGRESS_TARGET, "Checking {} ({})", entry.label(), entry.ordinal);
        let sql = entry.fetch_sql(&pk);
        let owner = self.owner;
        let cancel = self.cancel.clone();
        let mut rows = owner.fetch_rows(&sql);
        let mut row_ordinal = 0u64;

        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    warn!(target: PROGRESS_TARGET, "Scan cancelled in {}", entry.label());
                    break;
                }
                next = rows.next() => next,
            };
            let Some(item) = next else { break };

            match item {
                Ok(row) => {
                    row_ordinal += 1;
                    let total = row.total_rows;
                    self.check_row(entry, &pk, row, row_ordinal, aggregator).await;
                    self.report_progress(entry, row_ordinal, total);
                }
                Err(CheckError::RowExtraction { entity_id, message }) => {
                    row_ordinal += 1;
                    aggregator.examine(&entry.table);
                    let error = SqlError::new(ErrorKind::ReadRow, self.role, entry, &pk)
                        .for_row(entry, entity_id.as_deref(), row_ordinal)
                        .with_message(message, "");
                    aggregator.record(error);
                }
                Err(e) => {
                    let error = SqlError::new(ErrorKind::FetchEntity, self.role, entry, &pk)
                        .with_message(e.full_message(), e.short_message());
                    aggregator.record(error);
                    break;
                }
            }
        }

        info!(target: PROGRESS_TARGET, "{}: {} rows checked", entry.label(), row_ordinal);
    }

    async fn resolve_pk(&self, entry: &ScanEntry) -> Result<String, String> {
        if let Some(pk) = &entry.pk_column {
            return Ok(pk.clone());
        }
        match self.owner.primary_key_column(&entry.table).await {
            Ok(Some(pk)) => {
                debug!("Discovered primary key {}.{}", entry.table, pk);
                Ok(pk)
            }
            Ok(None) => Err(format!("Table {} has no primary key", entry.table)),
            Err(e) => Err(e.full_message()),
        }
    }

    async fn check_row(
        &mut self,
        entry: &ScanEntry,
        pk: &str,
        row: Row,
        row_ordinal: u64,
        aggregator: &mut Aggregator,
    ) {
        aggregator.examine(&entry.table);
        let Some(text) = row.text else {
            return;
        };

        let (procedural, body) = match self.classifier.classify(&text) {
            ClassifiedStatement::Query(q) => (false, q),
            ClassifiedStatement::ProceduralBlock(b) => (true, b),
            ClassifiedStatement::Indeterminate(_) => {
                debug!(
                    "{} {} = {}: neither query nor block, skipped",
                    entry.label(),
                    pk,
                    row.entity_id
                );
                return;
            }
        };

        let neutralized = match self
            .neutralizer
            .neutralize(&body, &entry.table, &entry.sql_column, &row.entity_id)
            .await
        {
            Ok(n) => n,
            Err(e) => {
                let error = SqlError::new(ErrorKind::ReplaceBindVars, self.role, entry, pk)
                    .for_row(entry, Some(row.entity_id.as_str()), row_ordinal)
                    .with_texts(&text, None)
                    .with_message(e.to_string(), e.message.clone());
                aggregator.record(error);
                return;
            }
        };

        let result = if procedural {
            self.harness
                .check_block(&neutralized.text, &entry.table)
                .await
        } else {
            self.harness.check_query(&neutralized.text).await
        };

        if let Some(diagnostic) = result.diagnostic() {
            let error = SqlError::new(
                ErrorKind::compile(procedural, diagnostic.stage),
                self.role,
                entry,
                pk,
            )
            .for_row(entry, Some(row.entity_id.as_str()), row_ordinal)
            .with_texts(&text, Some(neutralized.text.as_str()))
            .with_message(&diagnostic.message, &diagnostic.short_message);
            aggregator.record(error);
        }
    }

    fn report_progress(&self, entry: &ScanEntry, done: u64, total: i64) {
        if done % self.progress_every == 0 {
            info!(target: PROGRESS_TARGET, "{}: {}/{}", entry.label(), done, total);
        }
    }
}
