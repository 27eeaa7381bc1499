// =====================================================
// ROW MIGRATOR
// Ordered, paged copy of one table with per-row failure accounting
// =====================================================

use crate::db_types::{ColumnDescriptor, TableDescriptor};
use crate::discovery::discover_table_structure;
use crate::engine::MigrationEngine;
use crate::error::{MigrationError, Result};
use serde::{Deserialize, Serialize};

pub const DEFAULT_BATCH_SIZE: u64 = 100;

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub enum FailurePolicy {
    /// Count failed rows and keep going.
    #[default]
    ContinueOnError,
    /// Stop at the first failed row and end the run.
    FailFast,
}

#[derive(Debug, Clone, Copy)]
pub struct RowMigrationOptions {
    pub batch_size: u64,
    pub row_cap: Option<u64>,
    pub failure_policy: FailurePolicy,
}

impl Default for RowMigrationOptions {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            row_cap: None,
            failure_policy: FailurePolicy::ContinueOnError,
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TableDataReport {
    pub schema: String,
    pub table: String,
    pub success_count: u64,
    pub error_count: u64,
    /// Rows read from the source and attempted on the target.
    pub total: u64,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first_error: Option<String>,
    #[serde(default)]
    pub stopped_early: bool,
}

impl TableDataReport {
    fn new(schema: &str, table: &str) -> Self {
        Self {
            schema: schema.to_string(),
            table: table.to_string(),
            success_count: 0,
            error_count: 0,
            total: 0,
            success: false,
            first_error: None,
            stopped_early: false,
        }
    }

    /// A table with some rows in is a partial success.
    fn finish(mut self) -> Self {
        self.success = self.error_count == 0 || self.success_count > 0;
        self
    }
}

pub async fn migrate_table_data(
    source: &dyn MigrationEngine,
    target: &dyn MigrationEngine,
    schema: &str,
    table: &str,
    options: &RowMigrationOptions,
) -> Result<TableDataReport> {
    let source_desc = discover_table_structure(source, schema, table).await?;
    copy_rows(source, target, &source_desc, options).await
}

/// Replaces the target table's rows with the source's.
///
/// The target is truncated first, so any row that exists only on the target
/// is lost. There is no rollback: a failed row leaves the table truncated with
/// the other rows inserted. Only connection failures return `Err`; every other
/// insert failure is counted in the report.
pub async fn copy_rows(
    source: &dyn MigrationEngine,
    target: &dyn MigrationEngine,
    source_desc: &TableDescriptor,
    options: &RowMigrationOptions,
) -> Result<TableDataReport> {
    let schema = source_desc.schema_name.as_str();
    let table = source_desc.table_name.as_str();

    let target_desc = target.describe_table(schema, table).await?;
    let (source_cols, target_cols) = shared_columns(source_desc, &target_desc);
    if source_cols.is_empty() {
        return Err(MigrationError::VerificationMismatch(format!(
            "{}.{} has no columns in common between source and target",
            schema, table
        )));
    }
    let order_by = source_desc.stable_order();

    log::warn!(
        "Truncating {}.{} on target before copy; target-only rows are discarded",
        schema,
        table
    );
    target.truncate_table(schema, table).await?;

    let batch_size = options.batch_size.max(1);
    let mut report = TableDataReport::new(schema, table);
    let mut offset = 0u64;

    loop {
        let limit = match options.row_cap {
            Some(cap) if cap <= offset => break,
            Some(cap) => batch_size.min(cap - offset),
            None => batch_size,
        };
        let rows = source
            .fetch_rows(schema, table, &source_cols, &order_by, limit, offset)
            .await?;
        if rows.is_empty() {
            break;
        }
        let fetched = rows.len() as u64;

        for row in &rows {
            report.total += 1;
            match target.insert_row(schema, table, &target_cols, row).await {
                Ok(()) => report.success_count += 1,
                Err(err) if err.is_fatal() => return Err(err),
                Err(err) => {
                    report.error_count += 1;
                    log::warn!("Row {} of {}.{} failed: {}", report.total, schema, table, err);
                    if report.first_error.is_none() {
                        report.first_error = Some(err.to_string());
                    }
                    if options.failure_policy == FailurePolicy::FailFast {
                        report.stopped_early = true;
                        return Ok(report.finish());
                    }
                }
            }
        }

        offset += fetched;
        if fetched < limit {
            break;
        }
    }

    log::info!(
        "Copied {}.{}: {} ok, {} failed of {}",
        schema,
        table,
        report.success_count,
        report.error_count,
        report.total
    );
    Ok(report.finish())
}

/// Source columns that also exist on the target, paired in source order.
fn shared_columns(
    source: &TableDescriptor,
    target: &TableDescriptor,
) -> (Vec<ColumnDescriptor>, Vec<ColumnDescriptor>) {
    source
        .columns
        .iter()
        .filter_map(|col| target.column(&col.name).map(|t| (col.clone(), t.clone())))
        .unzip()
}

#[cfg(test)]
mod tests;
