// =====================================================
// MIGRATION ORCHESTRATOR
// discover -> create -> copy -> stored logic -> verify
// =====================================================

pub mod models;

use crate::db_types::TableDescriptor;
use crate::ddl::{generate_create_table, identity_resync_statements};
use crate::discovery::{
    discover_schemas, discover_table_structure, discover_tables, require_ddl_capability, SchemaFilter,
};
use crate::engine::MigrationEngine;
use crate::error::{ErrorKind, MigrationError, Result};
use crate::rows::copy_rows;
use crate::settings::{AppConfig, DiscoverySettings, StoredLogicSettings};
use crate::stored_logic::{migrate_stored_logic, test_stored_logic, CATALOGUE};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

pub use models::{
    MigrationLogEntry, MigrationOptions, MigrationReport, MigrationStep, MigrationSummary, RunStatus,
};

/// A table that reached the target, kept for verification.
#[derive(Debug, Clone)]
struct MigratedTable {
    schema: String,
    table: String,
    source_columns: usize,
    copied_rows: Option<u64>,
}

/// Drives one migration run between a source and a target engine.
///
/// Work is strictly sequential: schemas, then tables, then rows. Only
/// connection loss (or a fail-fast row error) stops the run; everything else
/// is logged against the step that produced it.
pub struct MigrationRunner<'a> {
    source: &'a dyn MigrationEngine,
    target: &'a dyn MigrationEngine,
    options: MigrationOptions,
    discovery: DiscoverySettings,
    stored_logic: StoredLogicSettings,
    routine_schema: String,
    table_timeout: Duration,
    cancel: CancellationToken,
    source_label: String,
    target_label: String,
    logs: Vec<MigrationLogEntry>,
    migrated: Vec<MigratedTable>,
    schema_count: usize,
    rows_copied: u64,
    row_errors: u64,
    /// Verification mismatch or failed discovery; the run cannot report success.
    checks_failed: bool,
}

impl<'a> MigrationRunner<'a> {
    pub fn new(
        source: &'a dyn MigrationEngine,
        target: &'a dyn MigrationEngine,
        options: MigrationOptions,
        settings: &AppConfig,
    ) -> Self {
        Self {
            source,
            target,
            options,
            discovery: settings.discovery.clone(),
            stored_logic: settings.stored_logic.clone(),
            routine_schema: settings.stored_logic.routine_schema.clone(),
            table_timeout: settings.timeouts.table(),
            cancel: CancellationToken::new(),
            source_label: source.db_type().as_str().to_string(),
            target_label: target.db_type().as_str().to_string(),
            logs: Vec::new(),
            migrated: Vec::new(),
            schema_count: 0,
            rows_copied: 0,
            row_errors: 0,
            checks_failed: false,
        }
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn with_table_timeout(mut self, timeout: Duration) -> Self {
        self.table_timeout = timeout;
        self
    }

    pub fn with_routine_schema(mut self, schema: impl Into<String>) -> Self {
        self.routine_schema = schema.into();
        self
    }

    /// Credential-free connection labels shown in the report summary.
    pub fn with_labels(mut self, source: impl Into<String>, target: impl Into<String>) -> Self {
        self.source_label = source.into();
        self.target_label = target.into();
        self
    }

    /// Runs to a terminal state and closes both engines, whatever the outcome.
    pub async fn run(mut self) -> MigrationReport {
        let run_id = Uuid::new_v4().to_string();
        log::info!(
            "Migration {} started: {} -> {}",
            run_id,
            self.source_label,
            self.target_label
        );

        let status = match self.execute().await {
            Ok(status) => status,
            Err(err) => {
                log::error!("Migration {} aborted: {}", run_id, err);
                self.push(MigrationLogEntry::failed(
                    MigrationStep::Complete,
                    "Migration aborted",
                    &err,
                ));
                RunStatus::Aborted
            }
        };

        self.source.close().await;
        self.target.close().await;

        let success = status == RunStatus::Done && !self.checks_failed;
        if status != RunStatus::Aborted {
            let message = match (status, success) {
                (RunStatus::Cancelled, _) => "Migration cancelled",
                (_, true) => "Migration completed",
                (_, false) => "Migration completed with verification failures",
            };
            self.push(MigrationLogEntry {
                success,
                ..MigrationLogEntry::ok(MigrationStep::Complete, message)
            });
        }
        log::info!("Migration {} finished: {:?}, success={}", run_id, status, success);

        MigrationReport {
            success,
            status,
            run_id,
            summary: MigrationSummary {
                source: self.source_label,
                target: self.target_label,
                include_schema: self.options.include_schema,
                include_data: self.options.include_data,
                total_steps: self.logs.len(),
                schemas: self.schema_count,
                tables_migrated: self.migrated.len(),
                rows_copied: self.rows_copied,
                row_errors: self.row_errors,
            },
            logs: self.logs,
        }
    }

    fn push(&mut self, entry: MigrationLogEntry) {
        if entry.success {
            log::debug!("[{:?}] {}", entry.step, entry.message);
        } else {
            log::warn!(
                "[{:?}] {}: {}",
                entry.step,
                entry.message,
                entry.error.as_deref().unwrap_or("")
            );
        }
        self.logs.push(entry);
    }

    /// `Err` only for errors that end the run.
    async fn execute(&mut self) -> Result<RunStatus> {
        let schemas = match self.resolve_schemas().await? {
            Some(schemas) => schemas,
            None => return Ok(RunStatus::Done),
        };
        self.schema_count = schemas.len();

        for (idx, schema) in schemas.iter().enumerate() {
            if self.cancel.is_cancelled() {
                return Ok(RunStatus::Cancelled);
            }
            if let Some(status) = self.migrate_schema(schema, idx + 1, schemas.len()).await? {
                return Ok(status);
            }
        }

        if self.options.include_stored_logic {
            self.migrate_routines(schemas.first().map(String::as_str)).await?;
        }

        self.verify().await?;
        Ok(RunStatus::Done)
    }

    /// `None` when discovery failed without a fatal error; the run ends with nothing to do.
    async fn resolve_schemas(&mut self) -> Result<Option<Vec<String>>> {
        if let Some(tenants) = self.options.normalized_tenants() {
            self.push(
                MigrationLogEntry::ok(
                    MigrationStep::DiscoverSchemas,
                    format!("Using {} configured tenant schema(s)", tenants.len()),
                )
                .progress(tenants.len(), tenants.len()),
            );
            return Ok(Some(tenants));
        }

        match discover_schemas(
            self.source,
            SchemaFilter::Tenant,
            &self.discovery.fallback_schemas,
        )
        .await
        {
            Ok(schemas) => {
                self.push(
                    MigrationLogEntry::ok(
                        MigrationStep::DiscoverSchemas,
                        format!("Found {} tenant schema(s): {}", schemas.len(), schemas.join(", ")),
                    )
                    .progress(schemas.len(), schemas.len()),
                );
                Ok(Some(schemas))
            }
            Err(err) if err.is_fatal() => Err(err),
            Err(err) => {
                self.push(MigrationLogEntry::failed(
                    MigrationStep::DiscoverSchemas,
                    "Schema discovery failed",
                    &err,
                ));
                self.checks_failed = true;
                Ok(None)
            }
        }
    }

    /// `Some(Cancelled)` when cancellation was observed at a table boundary.
    async fn migrate_schema(
        &mut self,
        schema: &str,
        position: usize,
        schema_total: usize,
    ) -> Result<Option<RunStatus>> {
        let tables = match discover_tables(self.source, schema).await {
            Ok(tables) => tables,
            Err(err) if err.is_fatal() => return Err(err),
            Err(err) => {
                self.push(
                    MigrationLogEntry::failed(MigrationStep::DiscoverTables, "Table discovery failed", &err)
                        .at(schema, None)
                        .progress(position, schema_total),
                );
                return Ok(None);
            }
        };
        self.push(
            MigrationLogEntry::ok(
                MigrationStep::DiscoverTables,
                format!("{} table(s) in {}", tables.len(), schema),
            )
            .at(schema, None)
            .progress(position, schema_total),
        );

        if self.options.include_schema {
            if let Err(err) = self.prepare_target_schema(schema).await {
                if err.is_fatal() {
                    return Err(err);
                }
                self.push(
                    MigrationLogEntry::failed(
                        MigrationStep::CreateSchema,
                        format!("Cannot prepare schema {} on target", schema),
                        &err,
                    )
                    .at(schema, None)
                    .progress(position, schema_total),
                );
                return Ok(None);
            }
            self.push(
                MigrationLogEntry::ok(MigrationStep::CreateSchema, format!("Schema {} ready", schema))
                    .at(schema, None)
                    .progress(position, schema_total),
            );
        }

        for (idx, table) in tables.iter().enumerate() {
            if self.cancel.is_cancelled() {
                return Ok(Some(RunStatus::Cancelled));
            }
            let progress = (idx + 1, tables.len());
            let budget = self.table_timeout;
            let outcome = tokio::time::timeout(budget, self.migrate_table(schema, table, progress)).await;
            match outcome {
                Ok(Ok(())) => {}
                Ok(Err(err)) => {
                    self.push(
                        MigrationLogEntry::failed(
                            MigrationStep::MigrateRows,
                            format!("{}.{} stopped the run", schema, table),
                            &err,
                        )
                        .at(schema, Some(table))
                        .progress(progress.0, progress.1),
                    );
                    return Err(err);
                }
                Err(_) => {
                    let err = MigrationError::Timeout(budget.as_secs());
                    self.push(
                        MigrationLogEntry::failed(
                            MigrationStep::MigrateRows,
                            format!("Table {}.{} exceeded its time budget", schema, table),
                            &err,
                        )
                        .at(schema, Some(table))
                        .progress(progress.0, progress.1),
                    );
                }
            }
        }
        Ok(None)
    }

    async fn prepare_target_schema(&self, schema: &str) -> Result<()> {
        require_ddl_capability(self.target, schema).await?;
        self.target.ensure_schema(schema).await
    }

    /// Logs its own recoverable failures. `Err` means the run must stop.
    async fn migrate_table(&mut self, schema: &str, table: &str, progress: (usize, usize)) -> Result<()> {
        let (done, total) = progress;
        let descriptor = match discover_table_structure(self.source, schema, table).await {
            Ok(descriptor) => descriptor,
            Err(err) if err.is_fatal() => return Err(err),
            Err(err) => {
                self.record_table_failure(MigrationStep::DiscoverColumns, schema, table, progress, err);
                return Ok(());
            }
        };

        if self.options.include_schema {
            if let Err(err) = self.create_target_table(&descriptor).await {
                if err.is_fatal() {
                    return Err(err);
                }
                self.record_table_failure(MigrationStep::CreateTable, schema, table, progress, err);
                return Ok(());
            }
            self.push(
                MigrationLogEntry::ok(
                    MigrationStep::CreateTable,
                    format!("Created {}.{} ({} columns)", schema, table, descriptor.columns.len()),
                )
                .at(schema, Some(table))
                .progress(done, total),
            );
        }

        let mut copied_rows = None;
        if self.options.include_data {
            let row_options = self.options.row_options();
            let report = match copy_rows(self.source, self.target, &descriptor, &row_options).await {
                Ok(report) => report,
                Err(err) if err.is_fatal() => return Err(err),
                Err(err) => {
                    self.record_table_failure(MigrationStep::MigrateRows, schema, table, progress, err);
                    return Ok(());
                }
            };
            self.rows_copied += report.success_count;
            self.row_errors += report.error_count;

            let message = format!(
                "Copied {}/{} row(s) into {}.{}",
                report.success_count, report.total, schema, table
            );
            let entry = match &report.first_error {
                Some(first) => MigrationLogEntry {
                    success: report.success,
                    error: Some(first.clone()),
                    error_kind: Some(ErrorKind::RowInsert),
                    ..MigrationLogEntry::ok(MigrationStep::MigrateRows, message)
                },
                None => MigrationLogEntry::ok(MigrationStep::MigrateRows, message),
            };
            self.push(entry.at(schema, Some(table)).progress(done, total));

            if report.stopped_early {
                return Err(MigrationError::RowInsert(format!(
                    "{}.{} stopped at the first failed row: {}",
                    schema,
                    table,
                    report.first_error.unwrap_or_default()
                )));
            }
            self.resync_identity(&descriptor).await?;
            copied_rows = Some(report.success_count);
        }

        self.migrated.push(MigratedTable {
            schema: schema.to_string(),
            table: table.to_string(),
            source_columns: descriptor.columns.len(),
            copied_rows,
        });
        Ok(())
    }

    async fn create_target_table(&self, descriptor: &TableDescriptor) -> Result<()> {
        let ddl = generate_create_table(descriptor, self.target.dialect())?;
        if self.options.overwrite_existing {
            self.target
                .drop_table(&descriptor.schema_name, &descriptor.table_name)
                .await?;
        }
        self.target.create_table(descriptor, &ddl).await
    }

    async fn resync_identity(&self, descriptor: &TableDescriptor) -> Result<()> {
        for statement in identity_resync_statements(descriptor, self.target.dialect()) {
            match self.target.execute(&statement).await {
                Ok(_) => {}
                Err(err) if err.is_fatal() => return Err(err),
                Err(err) => log::warn!(
                    "Identity resync on {}.{} failed: {}",
                    descriptor.schema_name,
                    descriptor.table_name,
                    err
                ),
            }
        }
        Ok(())
    }

    /// A zero-column table is a verification failure, never a created table.
    /// Any verification mismatch fails the run, whichever step raised it.
    fn record_table_failure(
        &mut self,
        step: MigrationStep,
        schema: &str,
        table: &str,
        (done, total): (usize, usize),
        err: MigrationError,
    ) {
        let err = match err {
            MigrationError::NoColumnsDiscovered { .. } => {
                MigrationError::VerificationMismatch(format!("{}; table not created", err))
            }
            other => other,
        };
        if matches!(err, MigrationError::VerificationMismatch(_)) {
            self.checks_failed = true;
        }
        self.push(
            MigrationLogEntry::failed(step, format!("{}.{} failed", schema, table), &err)
                .at(schema, Some(table))
                .progress(done, total),
        );
    }

    async fn migrate_routines(&mut self, tenant: Option<&str>) -> Result<()> {
        let outcome = migrate_stored_logic(self.target, &self.routine_schema, &self.stored_logic).await;
        let report = match outcome {
            Ok(report) => report,
            Err(err) if err.is_fatal() => return Err(err),
            Err(err) => {
                self.push(MigrationLogEntry::failed(
                    MigrationStep::MigrateStoredLogic,
                    "Stored logic migration failed",
                    &err,
                ));
                return Ok(());
            }
        };
        let errors = report.errors.len();
        self.push(MigrationLogEntry {
            success: errors == 0,
            error: report
                .errors
                .first()
                .map(|failure| format!("{}: {}", failure.name, failure.error)),
            ..MigrationLogEntry::ok(
                MigrationStep::MigrateStoredLogic,
                format!("{} routine(s) created, {} error(s)", report.functions_created, errors),
            )
            .progress(report.functions_created, CATALOGUE.len())
        });

        let Some(tenant) = tenant else {
            return Ok(());
        };
        let smoke = test_stored_logic(self.target, &self.routine_schema, tenant).await?;
        self.push(
            MigrationLogEntry {
                success: smoke.tests_successful == smoke.tests_run,
                ..MigrationLogEntry::ok(
                    MigrationStep::TestStoredLogic,
                    format!("{}/{} routine smoke test(s) passed", smoke.tests_successful, smoke.tests_run),
                )
            }
            .at(tenant, None)
            .progress(smoke.tests_successful, smoke.tests_run),
        );
        Ok(())
    }

    /// Re-reads every migrated table from the target.
    async fn verify(&mut self) -> Result<()> {
        let migrated = std::mem::take(&mut self.migrated);
        let total = migrated.len();

        for (idx, entry) in migrated.iter().enumerate() {
            let outcome = self.verify_table(entry).await;
            let log_entry = match outcome {
                Ok(()) => MigrationLogEntry::ok(
                    MigrationStep::Verify,
                    format!("{}.{} verified", entry.schema, entry.table),
                ),
                Err(err) if err.is_fatal() => {
                    self.migrated = migrated;
                    return Err(err);
                }
                Err(err) => {
                    self.checks_failed = true;
                    let err = match err {
                        MigrationError::VerificationMismatch(_) => err,
                        other => MigrationError::VerificationMismatch(other.to_string()),
                    };
                    MigrationLogEntry::failed(
                        MigrationStep::Verify,
                        format!("{}.{} failed verification", entry.schema, entry.table),
                        &err,
                    )
                }
            };
            self.push(
                log_entry
                    .at(&entry.schema, Some(&entry.table))
                    .progress(idx + 1, total),
            );
        }

        self.migrated = migrated;
        Ok(())
    }

    async fn verify_table(&self, entry: &MigratedTable) -> Result<()> {
        let target_desc = self.target.describe_table(&entry.schema, &entry.table).await?;
        let target_columns = target_desc.columns.len();
        if target_columns == 0 {
            return Err(MigrationError::VerificationMismatch(
                "target table has no columns".to_string(),
            ));
        }
        if target_columns < entry.source_columns {
            return Err(MigrationError::VerificationMismatch(format!(
                "target has {} column(s), source has {}",
                target_columns, entry.source_columns
            )));
        }
        if let Some(expected) = entry.copied_rows {
            let actual = self.target.count_rows(&entry.schema, &entry.table).await?;
            if actual != expected as i64 {
                return Err(MigrationError::VerificationMismatch(format!(
                    "target holds {} row(s), {} were copied",
                    actual, expected
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests;
