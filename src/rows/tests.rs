use super::*;
use crate::db_types::{ColumnDescriptor, DatabaseType};
use crate::error::ErrorKind;
use crate::test_support::{article_row, article_rows, article_table, MemoryEngine};
use crate::value::SqlValue;

const SCHEMA: &str = "2025_bu01";

fn empty_target() -> MemoryEngine {
    MemoryEngine::new(DatabaseType::PostgreSQL).with_table(article_table(SCHEMA), Vec::new())
}

fn text(value: &str) -> SqlValue {
    SqlValue::Text(value.to_string())
}

#[tokio::test]
async fn happy_path_conserves_rows() {
    let source = MemoryEngine::new(DatabaseType::MySQL).with_table(article_table(SCHEMA), article_rows());
    let target = empty_target();

    let report = migrate_table_data(&source, &target, SCHEMA, "article", &RowMigrationOptions::default())
        .await
        .unwrap();

    assert_eq!(report.success_count, 2);
    assert_eq!(report.error_count, 0);
    assert_eq!(report.total, 2);
    assert!(report.success);
    assert_eq!(target.rows(SCHEMA, "article"), article_rows());
}

#[tokio::test]
async fn single_quote_survives_copy() {
    let source = MemoryEngine::new(DatabaseType::MySQL).with_table(article_table(SCHEMA), article_rows());
    let target = empty_target();

    migrate_table_data(&source, &target, SCHEMA, "article", &RowMigrationOptions::default())
        .await
        .unwrap();

    let designations = target.column_values(SCHEMA, "article", "designation");
    assert_eq!(designations[1], text("O'Brien's Tool"));
}

#[tokio::test]
async fn oversized_row_is_isolated() {
    let mut source_table = article_table(SCHEMA);
    source_table.columns[1] = ColumnDescriptor::new("designation", "text", 2);
    let source = MemoryEngine::new(DatabaseType::MySQL).with_table(
        source_table,
        vec![
            article_row("ART001", "Marteau", "19.50"),
            article_row("ART002", &"x".repeat(150), "5.00"),
            article_row("ART003", "Tournevis", "7.25"),
        ],
    );
    let target = empty_target();

    let report = migrate_table_data(&source, &target, SCHEMA, "article", &RowMigrationOptions::default())
        .await
        .unwrap();

    assert_eq!(report.success_count, 2);
    assert_eq!(report.error_count, 1);
    assert_eq!(report.total, 3);
    assert!(report.success);
    assert!(report.first_error.unwrap().contains("too long"));
    assert_eq!(
        target.column_values(SCHEMA, "article", "narticle"),
        vec![text("ART001"), text("ART003")]
    );
    assert_eq!(
        target.rows(SCHEMA, "article").len() as u64,
        report.success_count
    );
}

#[tokio::test]
async fn fail_fast_stops_at_first_failure() {
    let source = MemoryEngine::new(DatabaseType::MySQL).with_table(
        article_table(SCHEMA),
        vec![
            article_row("ART001", "Marteau", "19.50"),
            article_row("ART002", &"x".repeat(150), "5.00"),
            article_row("ART003", "Tournevis", "7.25"),
        ],
    );
    let target = empty_target();
    let options = RowMigrationOptions {
        failure_policy: FailurePolicy::FailFast,
        ..RowMigrationOptions::default()
    };

    let report = migrate_table_data(&source, &target, SCHEMA, "article", &options)
        .await
        .unwrap();

    assert!(report.stopped_early);
    assert_eq!(report.success_count, 1);
    assert_eq!(report.error_count, 1);
    assert_eq!(target.rows(SCHEMA, "article").len(), 1);
}

#[tokio::test]
async fn truncates_target_before_copy() {
    let source = MemoryEngine::new(DatabaseType::MySQL).with_table(article_table(SCHEMA), article_rows());
    let target = MemoryEngine::new(DatabaseType::PostgreSQL).with_table(
        article_table(SCHEMA),
        vec![article_row("LOCAL01", "target only", "1.00")],
    );

    migrate_table_data(&source, &target, SCHEMA, "article", &RowMigrationOptions::default())
        .await
        .unwrap();

    let codes = target.column_values(SCHEMA, "article", "narticle");
    assert_eq!(codes, vec![text("ART001"), text("ART002")]);
}

#[tokio::test]
async fn paging_keeps_primary_key_order() {
    let source = MemoryEngine::new(DatabaseType::MySQL).with_table(
        article_table(SCHEMA),
        vec![
            article_row("ART003", "c", "3.00"),
            article_row("ART001", "a", "1.00"),
            article_row("ART002", "b", "2.00"),
        ],
    );
    let target = empty_target();
    let options = RowMigrationOptions {
        batch_size: 1,
        ..RowMigrationOptions::default()
    };

    let report = migrate_table_data(&source, &target, SCHEMA, "article", &options)
        .await
        .unwrap();

    assert_eq!(report.total, 3);
    assert_eq!(
        target.column_values(SCHEMA, "article", "narticle"),
        vec![text("ART001"), text("ART002"), text("ART003")]
    );
}

#[tokio::test]
async fn row_cap_limits_copy() {
    let source = MemoryEngine::new(DatabaseType::MySQL).with_table(
        article_table(SCHEMA),
        (1..=5)
            .map(|i| article_row(&format!("ART00{}", i), "item", "1.00"))
            .collect(),
    );
    let target = empty_target();
    let options = RowMigrationOptions {
        batch_size: 2,
        row_cap: Some(3),
        ..RowMigrationOptions::default()
    };

    let report = migrate_table_data(&source, &target, SCHEMA, "article", &options)
        .await
        .unwrap();
    assert_eq!(report.total, 3);
    assert_eq!(target.rows(SCHEMA, "article").len(), 3);
}

#[tokio::test]
async fn connection_loss_is_not_counted_as_row_failure() {
    let source = MemoryEngine::new(DatabaseType::MySQL).with_table(article_table(SCHEMA), article_rows());
    let target = empty_target().dropping_connection_on_insert();

    let err = migrate_table_data(&source, &target, SCHEMA, "article", &RowMigrationOptions::default())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Connection);
}

#[tokio::test]
async fn all_rows_failing_is_not_success() {
    let source = MemoryEngine::new(DatabaseType::MySQL).with_table(article_table(SCHEMA), article_rows());
    let target = MemoryEngine::new(DatabaseType::PostgreSQL).with_table(
        {
            let mut t = article_table(SCHEMA);
            t.columns[1] = ColumnDescriptor::new("designation", "varchar", 2).with_max_length(3);
            t
        },
        Vec::new(),
    );

    let report = migrate_table_data(&source, &target, SCHEMA, "article", &RowMigrationOptions::default())
        .await
        .unwrap();
    assert_eq!(report.success_count, 0);
    assert_eq!(report.error_count, 2);
    assert!(!report.success);
}
