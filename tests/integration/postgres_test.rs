//! Compile checks against a real PostgreSQL database.
//!
//! Set DATABASE_URL to run them; each test skips otherwise.

use checksql::config::CheckSettings;
use checksql::db::{OwnerSource, PgOwnerSource, PgTestTarget, TestTarget, TransientObject};
use checksql::harness::{CompileHarness, FailureStage};
use checksql::neutralize::RuleRegistry;
use futures::StreamExt;
use sqlx::postgres::PgPoolOptions;
use std::time::Duration;

const TIMEOUT: Duration = Duration::from_secs(30);

/// Helper to get test database URL from environment.
fn get_test_database_url() -> Option<String> {
    std::env::var("DATABASE_URL").ok()
}

/// Helper to create a test target on a single connection.
async fn get_test_target() -> Option<PgTestTarget> {
    let url = get_test_database_url()?;
    let pool = PgPoolOptions::new()
        .max_connections(1)
        .connect(&url)
        .await
        .ok()?;
    Some(PgTestTarget::from_pool(pool, TIMEOUT, false))
}

/// Tests run concurrently, so each one gets its own object names.
fn settings(test: &str) -> CheckSettings {
    CheckSettings {
        view_name: format!("checksql_{test}_select"),
        routine_name: format!("checksql_{test}_plsql"),
        ..Default::default()
    }
}

#[tokio::test]
async fn test_resolvable_query_passes() {
    let Some(target) = get_test_target().await else {
        eprintln!("Skipping test: DATABASE_URL not set");
        return;
    };
    let registry = RuleRegistry::builtin();
    let mut harness = CompileHarness::new(&target, &registry, &settings("resolvable"));

    let result = harness
        .check_query("select relname from pg_class where relkind = 'r'")
        .await;
    assert!(result.success, "{:?}", result.message());
    assert!(result.message().is_none());

    harness.cleanup().await;
    target.close().await.unwrap();
}

#[tokio::test]
async fn test_missing_column_fails() {
    let Some(target) = get_test_target().await else {
        eprintln!("Skipping test: DATABASE_URL not set");
        return;
    };
    let registry = RuleRegistry::builtin();
    let mut harness = CompileHarness::new(&target, &registry, &settings("missing"));

    let result = harness
        .check_query("select no_such_column from pg_class")
        .await;
    assert!(!result.success);
    let diagnostic = result.diagnostic().unwrap();
    assert_eq!(diagnostic.stage, FailureStage::Create);
    assert!(diagnostic.message.contains("no_such_column"));

    let missing_table = harness.check_query("select 1 from no_such_table").await;
    assert!(!missing_table.success);
    assert!(missing_table.message().unwrap().contains("does not exist"));

    harness.cleanup().await;
    target.close().await.unwrap();
}

#[tokio::test]
async fn test_block_checks() {
    let Some(target) = get_test_target().await else {
        eprintln!("Skipping test: DATABASE_URL not set");
        return;
    };
    let registry = RuleRegistry::builtin();
    let mut harness = CompileHarness::new(&target, &registry, &settings("block"));

    let ok = harness
        .check_block("begin\nv_ret_str := 'x';\nend;", "rule")
        .await;
    assert!(ok.success, "{:?}", ok.message());

    let broken = harness.check_block("begin\nv_x := 1;\nend;", "rule").await;
    assert!(!broken.success);
    assert!(broken.message().unwrap().contains("v_x"));

    harness.cleanup().await;
    target.close().await.unwrap();
}

#[tokio::test]
async fn test_ddl_runs_a_single_statement() {
    let Some(target) = get_test_target().await else {
        eprintln!("Skipping test: DATABASE_URL not set");
        return;
    };

    let result = target
        .execute_ddl("create or replace view checksql_single_select as select 1 as val; select 2")
        .await;
    assert!(result.is_err());

    target
        .execute_ddl("drop view if exists checksql_single_select")
        .await
        .unwrap();
    target.close().await.unwrap();
}

#[tokio::test]
async fn test_unreadable_diagnostics_name_the_routine() {
    let Some(url) = get_test_database_url() else {
        eprintln!("Skipping test: DATABASE_URL not set");
        return;
    };
    let pool = PgPoolOptions::new()
        .max_connections(1)
        .connect(&url)
        .await
        .unwrap();
    let target = PgTestTarget::from_pool(pool, TIMEOUT, true);

    let routine = TransientObject::Routine("checksql_never_created_plsql".into());
    let err = target.object_diagnostics(&routine).await.unwrap_err();
    assert!(err.full_message().contains("checksql_never_created_plsql"));
    assert!(err.short_message().starts_with("routine checksql_never_created_plsql()"));

    target.close().await.unwrap();
}

#[tokio::test]
async fn test_cleanup_removes_transient_objects() {
    let Some(url) = get_test_database_url() else {
        eprintln!("Skipping test: DATABASE_URL not set");
        return;
    };
    let Some(target) = get_test_target().await else {
        eprintln!("Skipping test: cannot connect to DATABASE_URL");
        return;
    };
    let registry = RuleRegistry::builtin();
    let mut harness = CompileHarness::new(&target, &registry, &settings("cleanup"));

    assert!(harness.check_query("select 1").await.success);
    assert!(harness.check_block("begin\nnull;\nend;", "notif").await.success);
    assert!(harness.has_created_objects());
    harness.cleanup().await;
    assert!(!harness.has_created_objects());

    let pool = PgPoolOptions::new()
        .max_connections(1)
        .connect(&url)
        .await
        .unwrap();
    let (views, routines): (i64, i64) = sqlx::query_as(
        "select (select count(*) from pg_views where viewname = 'checksql_cleanup_select'), \
                (select count(*) from pg_proc where proname = 'checksql_cleanup_plsql')",
    )
    .fetch_one(&pool)
    .await
    .unwrap();
    assert_eq!(views, 0);
    assert_eq!(routines, 0);

    pool.close().await;
    target.close().await.unwrap();
}

#[tokio::test]
async fn test_owner_fetch_rows() {
    let Some(url) = get_test_database_url() else {
        eprintln!("Skipping test: DATABASE_URL not set");
        return;
    };
    let pool = PgPoolOptions::new()
        .max_connections(2)
        .connect(&url)
        .await
        .unwrap();
    let owner = PgOwnerSource::from_pool(pool, TIMEOUT);

    let rows: Vec<_> = owner
        .fetch_rows(
            "select cast(id as text) as entity_id, cast(body as text) as sql_text, count(*) over () as totalrows \
             from (values (1, 'select 1'), (2, null)) as t(id, body) order by id",
        )
        .collect()
        .await;
    assert_eq!(rows.len(), 2);
    let first = rows[0].as_ref().unwrap();
    assert_eq!(first.entity_id, "1");
    assert_eq!(first.text.as_deref(), Some("select 1"));
    assert_eq!(first.total_rows, 2);
    assert_eq!(rows[1].as_ref().unwrap().text, None);

    let broken: Vec<_> = owner
        .fetch_rows("select entity_id from no_such_table")
        .collect()
        .await;
    assert!(matches!(
        broken.first(),
        Some(Err(checksql::error::CheckError::Fetch(_)))
    ));

    let names = owner
        .lookup_names("select unnest(array['a', $1])", "b")
        .await
        .unwrap();
    assert_eq!(names, vec!["a".to_string(), "b".to_string()]);

    owner.close().await.unwrap();
}
