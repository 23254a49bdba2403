//! Compile-check harness.
//!
//! Wraps neutralized fragments in a transient view or routine, creates it
//! in the test schema and interprets the database's diagnostics. Object
//! names are fixed, so checks are strictly sequential: each object is
//! created and diagnosed before the next `create or replace` replaces it.
//! The `&mut self` receivers enforce that.

use crate::config::CheckSettings;
use crate::db::{Diagnostic, TestTarget, TransientObject};
use crate::neutralize::{RoutineVariable, RuleRegistry};
use std::collections::BTreeSet;
use tracing::{debug, warn};

/// Dollar-quote tag delimiting routine bodies.
const BODY_TAG: &str = "$checksql$";

/// Lines of the routine body that precede the fragment.
const BLOCK_BODY_HEADER_LINES: i64 = 4;

/// Where a compile check failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureStage {
    /// The database rejected the CREATE statement.
    Create,
    /// The object was created but carries diagnostics.
    Diagnostics,
    /// The diagnostics could not be read.
    ReadDiagnostics,
}

/// Failure details of a compile check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompileDiagnostic {
    pub stage: FailureStage,
    pub message: String,
    pub short_message: String,
}

/// Outcome of a compile check. A failed result always carries a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompileResult {
    pub success: bool,
    diagnostic: Option<CompileDiagnostic>,
}

impl CompileResult {
    pub fn passed() -> Self {
        Self {
            success: true,
            diagnostic: None,
        }
    }

    pub fn failed(
        stage: FailureStage,
        message: impl Into<String>,
        short_message: impl Into<String>,
    ) -> Self {
        let message = message.into();
        let mut short_message = short_message.into();
        if short_message.is_empty() {
            short_message = message.lines().next().unwrap_or_default().to_string();
        }
        Self {
            success: false,
            diagnostic: Some(CompileDiagnostic {
                stage,
                message,
                short_message,
            }),
        }
    }

    pub fn diagnostic(&self) -> Option<&CompileDiagnostic> {
        self.diagnostic.as_ref()
    }

    /// Full diagnostic message, absent on success.
    pub fn message(&self) -> Option<&str> {
        self.diagnostic.as_ref().map(|d| d.message.as_str())
    }
}

/// Creates transient objects in the test schema and reads back diagnostics.
pub struct CompileHarness<'a> {
    target: &'a dyn TestTarget,
    registry: &'a RuleRegistry,
    view_name: String,
    routine_name: String,
    created: BTreeSet<TransientObject>,
}

impl<'a> CompileHarness<'a> {
    pub fn new(
        target: &'a dyn TestTarget,
        registry: &'a RuleRegistry,
        settings: &CheckSettings,
    ) -> Self {
        Self {
            target,
            registry,
            view_name: settings.view_name.clone(),
            routine_name: settings.routine_name.clone(),
            created: BTreeSet::new(),
        }
    }

    /// The transient view.
    pub fn view(&self) -> TransientObject {
        TransientObject::View(self.view_name.clone())
    }

    /// The transient routine.
    pub fn routine(&self) -> TransientObject {
        TransientObject::Routine(self.routine_name.clone())
    }

    /// DDL wrapping a query. The outer projection is always a single `val`
    /// column so that replacing the view never changes its shape.
    pub fn view_ddl(&self, query: &str) -> String {
        format!(
            "create or replace view {} as\nselect 1 as val from (\n{}\n) checksql_q",
            self.view_name, query
        )
    }

    /// DDL wrapping a procedural block in a routine that declares `variable`.
    pub fn routine_ddl(&self, block: &str, variable: &RoutineVariable) -> String {
        format!(
            "create or replace function {name}() returns void language plpgsql as {tag}\ndeclare\n  {decl};\nbegin\n{block}\nend;\n{tag}",
            name = self.routine_name,
            tag = BODY_TAG,
            decl = variable.declaration(),
        )
    }

    /// Compiles `query` as a view.
    pub async fn check_query(&mut self, query: &str) -> CompileResult {
        let object = self.view();
        let ddl = self.view_ddl(query);
        self.create_and_diagnose(object, &ddl, 0).await
    }

    /// Compiles `block` as a routine, with the variable shape `table_hint` calls for.
    pub async fn check_block(&mut self, block: &str, table_hint: &str) -> CompileResult {
        if block.contains(BODY_TAG) {
            return CompileResult::failed(
                FailureStage::Create,
                format!("Fragment contains the reserved body delimiter {BODY_TAG}"),
                "reserved body delimiter",
            );
        }
        let variable = self.registry.variable_for(table_hint);
        let object = self.routine();
        let ddl = self.routine_ddl(block, &variable);
        self.create_and_diagnose(object, &ddl, BLOCK_BODY_HEADER_LINES)
            .await
    }

    async fn create_and_diagnose(
        &mut self,
        object: TransientObject,
        ddl: &str,
        line_offset: i64,
    ) -> CompileResult {
        if let Err(e) = self.target.execute_ddl(ddl).await {
            debug!("Creating {} failed: {}", object, e.short_message());
            return CompileResult::failed(
                FailureStage::Create,
                e.full_message(),
                e.short_message(),
            );
        }
        self.created.insert(object.clone());

        match self.target.object_diagnostics(&object).await {
            Ok(diagnostics) if diagnostics.is_empty() => CompileResult::passed(),
            Ok(diagnostics) => {
                let rebased: Vec<Diagnostic> = diagnostics
                    .into_iter()
                    .map(|d| Diagnostic {
                        line: d.line.map(|l| (l - line_offset).max(1)),
                        message: d.message,
                    })
                    .collect();
                let message = rebased
                    .iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join("\n");
                let short = rebased
                    .first()
                    .map(|d| d.message.clone())
                    .unwrap_or_default();
                CompileResult::failed(FailureStage::Diagnostics, message, short)
            }
            Err(e) => CompileResult::failed(
                FailureStage::ReadDiagnostics,
                e.full_message(),
                e.short_message(),
            ),
        }
    }

    /// True if a transient object was created since the last cleanup.
    pub fn has_created_objects(&self) -> bool {
        !self.created.is_empty()
    }

    /// Drops every object created since the last cleanup. Failures are
    /// logged and otherwise ignored.
    pub async fn cleanup(&mut self) {
        let created = std::mem::take(&mut self.created);
        for object in created {
            self.drop_object(&object).await;
        }
    }

    /// Drops both transient objects whether or not this run created them.
    pub async fn drop_all(&mut self) {
        self.created.clear();
        for object in [self.view(), self.routine()] {
            self.drop_object(&object).await;
        }
    }

    async fn drop_object(&self, object: &TransientObject) {
        match self.target.execute_ddl(&object.drop_statement()).await {
            Ok(()) => debug!("Dropped {}", object),
            Err(e) => warn!("Cannot drop {}: {}", object, e.short_message()),
        }
    }
}
