//! End-to-end scans against the in-memory owner and test databases.

use async_trait::async_trait;
use checksql::catalog::{Catalog, ScanEntry};
use checksql::config::CheckSettings;
use checksql::db::{
    Diagnostic, MockOwnerSource, MockTestTarget, TargetRole, TestTarget, TransientObject,
};
use checksql::error::Result;
use checksql::neutralize::RuleRegistry;
use checksql::report::ErrorKind;
use checksql::scan::Scanner;
use checksql::sql::lexer::{self, TokenKind};
use pretty_assertions::assert_eq;
use tokio_util::sync::CancellationToken;

fn notif_catalog() -> Catalog {
    Catalog::new(vec![ScanEntry::new("notif", "trackor_sql", "notif_id")])
}

fn rule_catalog() -> Catalog {
    Catalog::new(vec![
        ScanEntry::new("rule", "sql_text", "rule_id").with_predicate("is_enabled = 1")
    ])
}

#[tokio::test]
async fn test_query_with_missing_table_is_reported() {
    let owner = MockOwnerSource::new().with_row(
        "notif",
        "101",
        "select trackor_id from trackor where status = :status",
    );
    let target = MockTestTarget::new().rejecting("from trackor", "relation \"trackor\" does not exist");
    let registry = RuleRegistry::builtin();
    let settings = CheckSettings::default();

    let mut scanner = Scanner::new(&owner, &target, &registry, &settings, TargetRole::Primary);
    let aggregator = scanner.run(&notif_catalog()).await;

    assert_eq!(
        target.executed()[0],
        "create or replace view checksql_select as\nselect 1 as val from (\nselect trackor_id from trackor where status = 0\n) checksql_q"
    );

    assert_eq!(aggregator.errors().len(), 1);
    let error = &aggregator.errors()[0];
    assert_eq!(error.kind, ErrorKind::CreateView);
    assert_eq!(error.tag, "CREATE-VIEW1");
    assert_eq!(error.table, "notif");
    assert_eq!(error.sql_column, "trackor_sql");
    assert_eq!(error.pk_column, "notif_id");
    assert_eq!(error.entity_id.as_deref(), Some("101"));
    assert_eq!(
        error.original_text.as_deref(),
        Some("select trackor_id from trackor where status = :status")
    );
    assert_eq!(
        error.transformed_text.as_deref(),
        Some("select trackor_id from trackor where status = 0")
    );
    assert!(error.message.contains("does not exist"));
    assert_eq!(error.row_ordinal, Some(1));
}

#[tokio::test]
async fn test_resolvable_query_passes() {
    let owner = MockOwnerSource::new().with_row(
        "notif",
        "101",
        "select trackor_id from trackor where status = :status",
    );
    let target = MockTestTarget::new();
    let registry = RuleRegistry::builtin();
    let settings = CheckSettings::default();

    let mut scanner = Scanner::new(&owner, &target, &registry, &settings, TargetRole::Primary);
    let aggregator = scanner.run(&notif_catalog()).await;

    assert!(!aggregator.has_failures());
    let stats = aggregator.stats_for("notif");
    assert_eq!(stats.rows_examined, 1);
    assert_eq!(stats.passed(), 1);
    assert!(target.existing_objects().is_empty());
}

#[tokio::test]
async fn test_rule_block_uses_routine_variable() {
    let owner = MockOwnerSource::new().with_row("rule", "7", ":return_str := 1;");
    let target = MockTestTarget::new();
    let registry = RuleRegistry::builtin();
    let settings = CheckSettings::default();

    let mut scanner = Scanner::new(&owner, &target, &registry, &settings, TargetRole::Primary);
    let aggregator = scanner.run(&rule_catalog()).await;

    assert!(!aggregator.has_failures());
    let create = &target.executed()[0];
    assert!(create.starts_with("create or replace function checksql_plsql() returns void"));
    assert!(create.contains("declare\n  v_ret_str varchar(1000);"));
    assert!(create.contains("begin\nv_ret_str := 1;\nend;"));
    assert!(owner.queries()[0].contains("from rule where sql_text is not null and (is_enabled = 1)"));
}

#[tokio::test]
async fn test_rule_block_with_undefined_function_fails() {
    let owner = MockOwnerSource::new()
        .with_row("rule", "7", "v_x := 1;")
        .with_row("rule", "8", "v_x := undefined_proc();");
    let target = MockTestTarget::new().diagnosing(
        "undefined_proc",
        Some(6),
        "function undefined_proc() does not exist",
    );
    let registry = RuleRegistry::builtin();
    let settings = CheckSettings::default();

    let mut scanner = Scanner::new(&owner, &target, &registry, &settings, TargetRole::Secondary);
    let aggregator = scanner.run(&rule_catalog()).await;

    assert_eq!(aggregator.errors().len(), 1);
    let error = &aggregator.errors()[0];
    assert_eq!(error.tag, "PROC-ERR2");
    assert_eq!(error.entity_id.as_deref(), Some("8"));
    assert!(error
        .message
        .contains("function undefined_proc() does not exist"));
    assert_eq!(error.short_message, "function undefined_proc() does not exist");

    let stats = aggregator.stats_for("rule");
    assert_eq!(stats.rows_examined, 2);
    assert_eq!(stats.rows_failed, 1);
}

#[tokio::test]
async fn test_heterogeneous_column() {
    let owner = MockOwnerSource::new()
        .with_row("imp_spec", "1", "select 1 from xitor")
        .with_row("imp_spec", "2", "begin pkg_import.run(:imp_run_id); end;")
        .with_row("imp_spec", "3", "pkg_import.cleanup");
    let target = MockTestTarget::new();
    let registry = RuleRegistry::builtin();
    let settings = CheckSettings::default();
    let catalog = Catalog::new(vec![ScanEntry::new("imp_spec", "external_proc", "imp_spec_id")]);

    let mut scanner = Scanner::new(&owner, &target, &registry, &settings, TargetRole::Primary);
    let aggregator = scanner.run(&catalog).await;

    assert!(!aggregator.has_failures());
    let creates: Vec<String> = target
        .executed()
        .into_iter()
        .filter(|ddl| ddl.starts_with("create"))
        .collect();
    assert_eq!(creates.len(), 3);
    assert!(creates[0].starts_with("create or replace view"));
    assert!(creates[1].contains("pkg_import.run(0);"));
    assert!(creates[2].contains("begin\npkg_import.cleanup;\nend;"));
    assert!(target.existing_objects().is_empty());
}

#[tokio::test]
async fn test_fetch_error_is_configuration_level() {
    let owner = MockOwnerSource::new()
        .with_failing_table("tm_setup")
        .with_row("notif", "1", "select 1");
    let target = MockTestTarget::new();
    let registry = RuleRegistry::builtin();
    let settings = CheckSettings::default();
    let catalog = Catalog::new(vec![
        ScanEntry::new("tm_setup", "search_sql", "tm_setup_id"),
        ScanEntry::new("notif", "trackor_sql", "notif_id"),
    ]);

    let mut scanner = Scanner::new(&owner, &target, &registry, &settings, TargetRole::Primary);
    let aggregator = scanner.run(&catalog).await;

    assert!(aggregator.errors().is_empty());
    assert_eq!(aggregator.config_errors().len(), 1);
    assert_eq!(aggregator.config_errors()[0].tag, "FETCH-ENTITY");
    assert_eq!(aggregator.stats_for("tm_setup").rows_examined, 0);
    assert_eq!(aggregator.stats_for("notif").rows_examined, 1);

    let summary = aggregator.render_summary();
    assert!(summary.contains("Invalid configuration:\ntm_setup.search_sql [FETCH-ENTITY]"));
}

#[tokio::test]
async fn test_failed_rows_never_exceed_examined() {
    let owner = MockOwnerSource::new()
        .with_row("report_sql", "1", "select a from missing_a")
        .with_row("report_sql", "2", "select a from missing_b")
        .with_unreadable_row("report_sql", "3", "invalid byte sequence")
        .with_null_row("report_sql", "4")
        .with_row("report_sql", "5", "select 1");
    let target = MockTestTarget::new()
        .rejecting("missing_a", "relation \"missing_a\" does not exist")
        .rejecting("missing_b", "relation \"missing_b\" does not exist");
    let registry = RuleRegistry::builtin();
    let settings = CheckSettings::default();
    let catalog = Catalog::new(vec![ScanEntry::new("report_sql", "sql_text", "report_sql_id")]);

    let mut scanner = Scanner::new(&owner, &target, &registry, &settings, TargetRole::Primary);
    let aggregator = scanner.run(&catalog).await;

    for stats in aggregator.finalize_stats().values() {
        assert!(stats.rows_failed <= stats.rows_examined);
    }
    let stats = aggregator.stats_for("report_sql");
    assert_eq!(stats.rows_examined, 5);
    assert_eq!(stats.rows_failed, 3);
    assert_eq!(stats.passed(), 2);
}

#[tokio::test]
async fn test_cleanup_after_every_entry() {
    let owner = MockOwnerSource::new()
        .with_row("notif", "1", "select 1")
        .with_row("rule", "2", "null;");
    let target = MockTestTarget::new();
    let registry = RuleRegistry::builtin();
    let settings = CheckSettings::default();
    let catalog = Catalog::new(vec![
        ScanEntry::new("notif", "trackor_sql", "notif_id"),
        ScanEntry::new("rule", "sql_text", "rule_id"),
    ]);

    let mut scanner = Scanner::new(&owner, &target, &registry, &settings, TargetRole::Primary);
    scanner.run(&catalog).await;

    let executed = target.executed();
    assert_eq!(executed.len(), 4);
    assert_eq!(executed[1], "drop view if exists checksql_select");
    assert_eq!(executed[3], "drop function if exists checksql_plsql()");
    assert!(target.existing_objects().is_empty());
}

/// Top-level `;` tokens in a statement, ignoring strings and routine bodies.
fn statement_separators(ddl: &str) -> usize {
    lexer::tokenize(ddl)
        .iter()
        .filter(|t| t.kind == TokenKind::Punct && t.is_punct(';'))
        .count()
}

#[tokio::test]
async fn test_fragment_cannot_append_statements_to_ddl() {
    let owner = MockOwnerSource::new()
        .with_row(
            "notif",
            "1",
            "select 1) x; drop table trackor; select * from (select 1",
        )
        .with_row("notif", "2", "select 1; drop table trackor")
        .with_row("notif", "3", "select trackor_id from trackor")
        .with_row("rule", "4", "null;");
    let target = MockTestTarget::new();
    let registry = RuleRegistry::builtin();
    let settings = CheckSettings::default();
    let catalog = Catalog::new(vec![
        ScanEntry::new("notif", "trackor_sql", "notif_id"),
        ScanEntry::new("rule", "sql_text", "rule_id"),
    ]);

    let mut scanner = Scanner::new(&owner, &target, &registry, &settings, TargetRole::Primary);
    let aggregator = scanner.run(&catalog).await;

    let executed = target.executed();
    assert!(!executed.is_empty());
    for ddl in &executed {
        assert!(!ddl.contains("drop table trackor"), "{ddl}");
        assert_eq!(statement_separators(ddl), 0, "{ddl}");
    }
    let views = executed
        .iter()
        .filter(|ddl| ddl.starts_with("create or replace view"))
        .count();
    assert_eq!(views, 1);
    assert_eq!(aggregator.stats_for("notif").rows_examined, 3);
    assert!(aggregator.errors().is_empty());
}

#[tokio::test]
async fn test_drop_failures_do_not_fail_the_run() {
    let owner = MockOwnerSource::new().with_row("notif", "1", "select 1");
    let target = MockTestTarget::new().failing_drops();
    let registry = RuleRegistry::builtin();
    let settings = CheckSettings::default();

    let mut scanner = Scanner::new(&owner, &target, &registry, &settings, TargetRole::Primary);
    let aggregator = scanner.run(&notif_catalog()).await;

    assert!(!aggregator.has_failures());
    assert_eq!(aggregator.stats_for("notif").passed(), 1);
}

/// Cancels the scan as soon as the first object is created.
struct CancellingTarget {
    inner: MockTestTarget,
    token: CancellationToken,
}

#[async_trait]
impl TestTarget for CancellingTarget {
    async fn execute_ddl(&self, ddl: &str) -> Result<()> {
        let result = self.inner.execute_ddl(ddl).await;
        if ddl.starts_with("create") {
            self.token.cancel();
        }
        result
    }

    async fn object_diagnostics(&self, object: &TransientObject) -> Result<Vec<Diagnostic>> {
        self.inner.object_diagnostics(object).await
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

#[tokio::test]
async fn test_cancelled_scan_leaves_no_transient_objects() {
    let owner = MockOwnerSource::new()
        .with_row("notif", "1", "select 1")
        .with_row("notif", "2", "select 2")
        .with_row("rule", "3", "null;");
    let token = CancellationToken::new();
    let target = CancellingTarget {
        inner: MockTestTarget::new(),
        token: token.clone(),
    };
    let registry = RuleRegistry::builtin();
    let settings = CheckSettings::default();
    let catalog = Catalog::new(vec![
        ScanEntry::new("notif", "trackor_sql", "notif_id"),
        ScanEntry::new("rule", "sql_text", "rule_id"),
    ]);

    let mut scanner = Scanner::new(&owner, &target, &registry, &settings, TargetRole::Primary)
        .with_cancellation(token);
    let aggregator = scanner.run(&catalog).await;

    assert_eq!(aggregator.stats_for("notif").rows_examined, 1);
    assert_eq!(aggregator.stats_for("rule").rows_examined, 0);
    assert!(target.inner.existing_objects().is_empty());
    assert_eq!(
        target.inner.executed().last().map(String::as_str),
        Some("drop view if exists checksql_select")
    );
}

#[tokio::test]
async fn test_catalog_file_scan() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("checksql.json");
    std::fs::write(
        &path,
        r#"[
            "notif.user_sql",
            {"wf_step.plsql_block": "select s.plsql_block from wf_step s join wf_workflow w on (w.wf_workflow_id = s.wf_workflow_id) where w.wf_state_id not in (4,5)"}
        ]"#,
    )
    .unwrap();

    let owner = MockOwnerSource::new()
        .with_primary_key("notif", "notif_id")
        .with_primary_key("wf_step", "wf_step_id")
        .with_row("notif", "1", "select user_id from users where user_id = :[USER_ID]")
        .with_row("wf_step", "2", "begin update wf set x = 1 where wf_workflow_id = :wf_workflow_id; end;");
    let target = MockTestTarget::new();
    let registry = RuleRegistry::builtin();
    let settings = CheckSettings::default();
    let catalog = Catalog::load_from_file(&path).unwrap();

    let mut scanner = Scanner::new(&owner, &target, &registry, &settings, TargetRole::Primary);
    let aggregator = scanner.run(&catalog).await;

    assert!(!aggregator.has_failures());
    let queries = owner.queries();
    assert!(queries[0].starts_with("select cast(notif_id as text)"));
    assert!(queries[1].contains(
        "from wf_step s join wf_workflow w on (w.wf_workflow_id = s.wf_workflow_id) where s.plsql_block is not null and (w.wf_state_id not in (4,5))"
    ));

    let executed = target.executed();
    assert!(executed[0].contains("where user_id = 0"));
    assert!(executed
        .iter()
        .any(|ddl| ddl.contains("where wf_workflow_id = 0;")));
}
