use super::*;
use crate::db_types::{ColumnDescriptor, ConstraintDescriptor, DatabaseType, SupabaseConfig};
use crate::engine::supabase::SupabaseEngine;
use crate::error::ErrorKind;
use crate::rows::FailurePolicy;
use crate::settings::TimeoutConfig;
use crate::test_support::{article_row, article_rows, article_table, silent_http_endpoint, MemoryEngine};
use crate::value::SqlValue;
use rust_decimal::Decimal;
use std::str::FromStr;

const TENANT: &str = "2025_bu01";

fn client_table(schema: &str) -> TableDescriptor {
    let mut table = TableDescriptor::new(schema, "client");
    table.columns = vec![
        ColumnDescriptor::new("nclient", "varchar", 1).with_max_length(20).not_null(),
        ColumnDescriptor::new("raison_sociale", "varchar", 2).with_max_length(100),
    ];
    table.constraints = vec![ConstraintDescriptor::primary_key("PRIMARY", "nclient")];
    table
}

fn client_rows() -> Vec<Vec<SqlValue>> {
    vec![vec![
        SqlValue::Text("CL001".to_string()),
        SqlValue::Text("Quincaillerie Centrale".to_string()),
    ]]
}

fn mysql_source() -> MemoryEngine {
    MemoryEngine::new(DatabaseType::MySQL)
        .with_listed_schema("information_schema")
        .with_listed_schema("mysql")
        .with_table(article_table(TENANT), article_rows())
}

fn entries_for(report: &MigrationReport, step: MigrationStep) -> Vec<&MigrationLogEntry> {
    report.logs.iter().filter(|e| e.step == step).collect()
}

#[tokio::test]
async fn mysql_to_postgres_end_to_end() {
    let source = mysql_source();
    let target = MemoryEngine::new(DatabaseType::PostgreSQL);

    let report = MigrationRunner::new(&source, &target, MigrationOptions::default(), &AppConfig::default())
        .run()
        .await;

    assert!(report.success, "{:?}", report.failures().collect::<Vec<_>>());
    assert_eq!(report.status, RunStatus::Done);
    assert_eq!(report.summary.schemas, 1);
    assert_eq!(report.summary.tables_migrated, 1);
    assert_eq!(report.summary.rows_copied, 2);
    assert_eq!(report.summary.total_steps, report.logs.len());
    assert_eq!(report.summary.source, "mysql");

    assert_eq!(
        target.column_values(TENANT, "article", "designation"),
        vec![
            SqlValue::Text("Marteau".to_string()),
            SqlValue::Text("O'Brien's Tool".to_string()),
        ]
    );
    assert_eq!(
        target.column_values(TENANT, "article", "prix_vente"),
        vec![
            SqlValue::Decimal(Decimal::from_str("19.50").unwrap()),
            SqlValue::Decimal(Decimal::from_str("10.00").unwrap()),
        ]
    );

    let executed = target.executed();
    assert!(executed
        .iter()
        .any(|sql| sql.starts_with("CREATE TABLE IF NOT EXISTS \"2025_bu01\".\"article\"")));

    let verify = entries_for(&report, MigrationStep::Verify);
    assert_eq!(verify.len(), 1);
    assert!(verify[0].success);
    assert_eq!(report.logs.last().unwrap().step, MigrationStep::Complete);
    assert!(source.is_closed());
    assert!(target.is_closed());
}

#[tokio::test]
async fn rerun_is_idempotent() {
    let source = mysql_source();
    let target = MemoryEngine::new(DatabaseType::PostgreSQL);
    let settings = AppConfig::default();

    let first = MigrationRunner::new(&source, &target, MigrationOptions::default(), &settings)
        .run()
        .await;
    let structure = target.table(TENANT, "article");
    let second = MigrationRunner::new(&source, &target, MigrationOptions::default(), &settings)
        .run()
        .await;

    assert!(first.success);
    assert!(second.success);
    assert_eq!(target.table(TENANT, "article"), structure);
    assert_eq!(target.rows(TENANT, "article").len(), 2);
}

#[tokio::test]
async fn zero_column_table_is_a_verification_failure() {
    let source = mysql_source().hollow_table(TENANT, "article");
    let target = MemoryEngine::new(DatabaseType::PostgreSQL);

    let report = MigrationRunner::new(&source, &target, MigrationOptions::default(), &AppConfig::default())
        .run()
        .await;

    assert!(!report.success);
    assert_eq!(report.status, RunStatus::Done);
    let failure = report
        .failures()
        .find(|e| e.table.as_deref() == Some("article"))
        .unwrap();
    assert_eq!(failure.step, MigrationStep::DiscoverColumns);
    assert_eq!(failure.error_kind, Some(ErrorKind::VerificationMismatch));
    assert!(entries_for(&report, MigrationStep::CreateTable).is_empty());
    assert!(target.table(TENANT, "article").is_none());
}

#[tokio::test]
async fn table_timeout_fails_table_and_continues() {
    let source = mysql_source()
        .with_table(client_table(TENANT), client_rows())
        .slow_table(TENANT, "article", Duration::from_millis(500));
    let target = MemoryEngine::new(DatabaseType::PostgreSQL);

    let report = MigrationRunner::new(&source, &target, MigrationOptions::default(), &AppConfig::default())
        .with_table_timeout(Duration::from_millis(50))
        .run()
        .await;

    assert_eq!(report.status, RunStatus::Done);
    let timed_out = report
        .failures()
        .find(|e| e.error_kind == Some(ErrorKind::Timeout))
        .unwrap();
    assert_eq!(timed_out.table.as_deref(), Some("article"));
    assert_eq!(target.rows(TENANT, "client").len(), 1);
    assert_eq!(report.summary.tables_migrated, 1);
}

#[tokio::test]
async fn stalled_target_requests_fail_tables_not_the_run() {
    let source = mysql_source().with_table(client_table(TENANT), client_rows());
    let timeouts = TimeoutConfig {
        request_secs: 1,
        ..TimeoutConfig::default()
    };
    let target = SupabaseEngine::new(
        &SupabaseConfig {
            supabase_url: silent_http_endpoint().await,
            supabase_key: "service".to_string(),
        },
        &timeouts,
    )
    .unwrap();
    let options = MigrationOptions {
        include_schema: false,
        ..MigrationOptions::default()
    };

    let report = MigrationRunner::new(&source, &target, options, &AppConfig::default())
        .run()
        .await;

    assert_eq!(report.status, RunStatus::Done);
    let timed_out: Vec<_> = report
        .failures()
        .filter(|e| e.error_kind == Some(ErrorKind::Timeout))
        .filter_map(|e| e.table.as_deref())
        .collect();
    assert_eq!(timed_out, vec!["article", "client"]);
    assert_eq!(report.logs.last().unwrap().step, MigrationStep::Complete);
    assert!(source.is_closed());
}

#[tokio::test]
async fn data_only_run_into_columnless_target_fails() {
    let source = mysql_source();
    let target = MemoryEngine::new(DatabaseType::PostgreSQL)
        .with_table(article_table(TENANT), Vec::new())
        .hollow_table(TENANT, "article");
    let options = MigrationOptions {
        include_schema: false,
        ..MigrationOptions::default()
    };

    let report = MigrationRunner::new(&source, &target, options, &AppConfig::default())
        .run()
        .await;

    assert_eq!(report.status, RunStatus::Done);
    assert!(!report.success);
    let rows = entries_for(&report, MigrationStep::MigrateRows);
    assert!(!rows[0].success);
    assert_eq!(rows[0].error_kind, Some(ErrorKind::VerificationMismatch));
    assert_eq!(report.summary.rows_copied, 0);
    let last = report.logs.last().unwrap();
    assert_eq!(last.step, MigrationStep::Complete);
    assert!(!last.success);
}

#[tokio::test]
async fn cancellation_stops_at_table_boundary() {
    let source = mysql_source();
    let target = MemoryEngine::new(DatabaseType::PostgreSQL);
    let token = CancellationToken::new();
    token.cancel();

    let report = MigrationRunner::new(&source, &target, MigrationOptions::default(), &AppConfig::default())
        .with_cancellation(token)
        .run()
        .await;

    assert_eq!(report.status, RunStatus::Cancelled);
    assert!(!report.success);
    assert!(target.rows(TENANT, "article").is_empty());
    assert!(source.is_closed());
    assert!(target.is_closed());
}

#[tokio::test]
async fn connection_loss_aborts_and_releases_engines() {
    let source = mysql_source().with_table(client_table(TENANT), client_rows());
    let target = MemoryEngine::new(DatabaseType::PostgreSQL).dropping_connection_on_insert();

    let report = MigrationRunner::new(&source, &target, MigrationOptions::default(), &AppConfig::default())
        .run()
        .await;

    assert_eq!(report.status, RunStatus::Aborted);
    assert!(!report.success);
    let last = report.logs.last().unwrap();
    assert_eq!(last.step, MigrationStep::Complete);
    assert_eq!(last.error_kind, Some(ErrorKind::Connection));
    // article failed first; client was never attempted
    assert!(target.table(TENANT, "client").is_none());
    assert!(source.is_closed());
    assert!(target.is_closed());
}

#[tokio::test]
async fn fail_fast_aborts_run() {
    let source = MemoryEngine::new(DatabaseType::MySQL).with_table(
        article_table(TENANT),
        vec![
            article_row("ART001", "Marteau", "19.50"),
            article_row("ART002", &"x".repeat(150), "1.00"),
            article_row("ART003", "Tournevis", "4.20"),
        ],
    );
    let target = MemoryEngine::new(DatabaseType::PostgreSQL);
    let options = MigrationOptions {
        failure_policy: FailurePolicy::FailFast,
        ..MigrationOptions::default()
    };

    let report = MigrationRunner::new(&source, &target, options, &AppConfig::default())
        .run()
        .await;

    assert_eq!(report.status, RunStatus::Aborted);
    assert_eq!(target.rows(TENANT, "article").len(), 1);
    assert_eq!(report.logs.last().unwrap().error_kind, Some(ErrorKind::RowInsert));
}

#[tokio::test]
async fn partial_row_failure_keeps_run_successful() {
    let source = MemoryEngine::new(DatabaseType::MySQL).with_table(
        article_table(TENANT),
        vec![
            article_row("ART001", "Marteau", "19.50"),
            article_row("ART002", &"x".repeat(150), "1.00"),
            article_row("ART003", "Tournevis", "4.20"),
        ],
    );
    let target = MemoryEngine::new(DatabaseType::PostgreSQL);

    let report = MigrationRunner::new(&source, &target, MigrationOptions::default(), &AppConfig::default())
        .run()
        .await;

    assert!(report.success);
    assert_eq!(report.summary.rows_copied, 2);
    assert_eq!(report.summary.row_errors, 1);
    let rows = entries_for(&report, MigrationStep::MigrateRows);
    assert_eq!(rows[0].error_kind, Some(ErrorKind::RowInsert));
    assert!(rows[0].success);
}

#[tokio::test]
async fn row_count_mismatch_fails_verification() {
    let source = mysql_source();
    let target = MemoryEngine::new(DatabaseType::PostgreSQL).with_phantom_rows(1);

    let report = MigrationRunner::new(&source, &target, MigrationOptions::default(), &AppConfig::default())
        .run()
        .await;

    assert_eq!(report.status, RunStatus::Done);
    assert!(!report.success);
    let verify = entries_for(&report, MigrationStep::Verify);
    assert_eq!(verify[0].error_kind, Some(ErrorKind::VerificationMismatch));
}

#[tokio::test]
async fn denied_ddl_is_reported_per_schema() {
    let source = mysql_source();
    let target = MemoryEngine::new(DatabaseType::PostgreSQL).deny_ddl();

    let report = MigrationRunner::new(&source, &target, MigrationOptions::default(), &AppConfig::default())
        .run()
        .await;

    assert_eq!(report.status, RunStatus::Done);
    let failure = entries_for(&report, MigrationStep::CreateSchema)[0];
    assert!(!failure.success);
    assert_eq!(failure.error_kind, Some(ErrorKind::Privilege));
    assert!(failure.error.as_deref().unwrap().contains("readable"));
}

#[tokio::test]
async fn explicit_tenants_and_stored_logic() {
    let source = mysql_source();
    let target = MemoryEngine::new(DatabaseType::PostgreSQL);
    let options = MigrationOptions {
        tenants: Some(vec![format!(" {} ", TENANT)]),
        include_stored_logic: true,
        ..MigrationOptions::default()
    };

    let report = MigrationRunner::new(&source, &target, options, &AppConfig::default())
        .run()
        .await;

    assert!(report.success);
    let discovered = entries_for(&report, MigrationStep::DiscoverSchemas);
    assert!(discovered[0].message.contains("configured"));
    assert!(entries_for(&report, MigrationStep::MigrateStoredLogic)[0].success);
    let smoke = entries_for(&report, MigrationStep::TestStoredLogic)[0];
    assert_eq!(smoke.schema.as_deref(), Some(TENANT));
    assert_eq!(target.routine_calls().len(), CATALOGUE.len());
}

#[test]
fn options_defaults_and_validation() {
    let options: MigrationOptions = serde_json::from_str("{}").unwrap();
    assert_eq!(options, MigrationOptions::default());
    assert!(options.include_schema && options.include_data && !options.overwrite_existing);
    assert_eq!(options.batch_size, 100);

    let options: MigrationOptions =
        serde_json::from_str(r#"{"batchSize": 0, "failurePolicy": "failFast"}"#).unwrap();
    assert_eq!(options.failure_policy, FailurePolicy::FailFast);
    assert!(options.validate().is_err());

    let blank = MigrationOptions {
        tenants: Some(vec!["  ".to_string()]),
        ..MigrationOptions::default()
    };
    assert!(blank.validate().is_err());
}

#[test]
fn log_entry_wire_shape() {
    let entry = MigrationLogEntry::failed(
        MigrationStep::MigrateRows,
        "copy failed",
        &MigrationError::RowInsert("too long".to_string()),
    )
    .at(TENANT, Some("article"))
    .progress(1, 3);
    let json = serde_json::to_value(&entry).unwrap();

    assert_eq!(json["step"], "migrate_rows");
    assert_eq!(json["errorKind"], "row_insert");
    assert_eq!(json["schema"], TENANT);
    assert_eq!(json["progress"], 1);
    assert_eq!(json["total"], 3);
    assert_eq!(json["success"], false);
}
