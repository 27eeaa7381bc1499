use crate::error::{ErrorKind, MigrationError};
use crate::rows::{FailurePolicy, RowMigrationOptions, DEFAULT_BATCH_SIZE};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

const MAX_BATCH_SIZE: u64 = 10_000;

fn default_true() -> bool {
    true
}

fn default_batch_size() -> u64 {
    DEFAULT_BATCH_SIZE
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct MigrationOptions {
    #[serde(default = "default_true")]
    pub include_schema: bool,
    #[serde(default = "default_true")]
    pub include_data: bool,
    /// Drop each target table before recreating it.
    #[serde(default)]
    pub overwrite_existing: bool,
    #[serde(default = "default_batch_size")]
    pub batch_size: u64,
    /// Explicit tenant schemas; discovery is skipped when set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenants: Option<Vec<String>>,
    #[serde(default)]
    pub include_stored_logic: bool,
    #[serde(default)]
    pub failure_policy: FailurePolicy,
    /// Upper bound on rows copied per table.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub row_cap: Option<u64>,
}

impl Default for MigrationOptions {
    fn default() -> Self {
        Self {
            include_schema: true,
            include_data: true,
            overwrite_existing: false,
            batch_size: DEFAULT_BATCH_SIZE,
            tenants: None,
            include_stored_logic: false,
            failure_policy: FailurePolicy::ContinueOnError,
            row_cap: None,
        }
    }
}

impl MigrationOptions {
    pub fn validate(&self) -> Result<(), String> {
        if self.batch_size == 0 || self.batch_size > MAX_BATCH_SIZE {
            return Err(format!("batchSize must be between 1 and {}", MAX_BATCH_SIZE));
        }
        if let Some(tenants) = &self.tenants {
            if tenants.iter().any(|t| t.trim().is_empty()) {
                return Err("tenants must not contain empty names".to_string());
            }
        }
        Ok(())
    }

    pub fn normalized_tenants(&self) -> Option<Vec<String>> {
        let mut tenants: Vec<String> = self
            .tenants
            .as_ref()?
            .iter()
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .collect();
        tenants.dedup();
        Some(tenants).filter(|t| !t.is_empty())
    }

    pub fn row_options(&self) -> RowMigrationOptions {
        RowMigrationOptions {
            batch_size: self.batch_size,
            row_cap: self.row_cap,
            failure_policy: self.failure_policy,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MigrationStep {
    DiscoverSchemas,
    DiscoverTables,
    CreateSchema,
    DiscoverColumns,
    CreateTable,
    MigrateRows,
    MigrateStoredLogic,
    TestStoredLogic,
    Verify,
    Complete,
}

/// One immutable line of the run log.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MigrationLogEntry {
    pub step: MigrationStep,
    pub message: String,
    pub success: bool,
    pub progress: usize,
    pub total: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub table: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl MigrationLogEntry {
    pub fn ok(step: MigrationStep, message: impl Into<String>) -> Self {
        Self {
            step,
            message: message.into(),
            success: true,
            progress: 0,
            total: 0,
            error: None,
            error_kind: None,
            schema: None,
            table: None,
            timestamp: Utc::now(),
        }
    }

    pub fn failed(step: MigrationStep, message: impl Into<String>, error: &MigrationError) -> Self {
        Self {
            success: false,
            error: Some(error.to_string()),
            error_kind: Some(error.kind()),
            ..Self::ok(step, message)
        }
    }

    pub fn at(mut self, schema: &str, table: Option<&str>) -> Self {
        self.schema = Some(schema.to_string());
        self.table = table.map(str::to_string);
        self
    }

    pub fn progress(mut self, progress: usize, total: usize) -> Self {
        self.progress = progress;
        self.total = total;
        self
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Done,
    Aborted,
    Cancelled,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct MigrationSummary {
    pub source: String,
    pub target: String,
    pub include_schema: bool,
    pub include_data: bool,
    pub total_steps: usize,
    pub schemas: usize,
    pub tables_migrated: usize,
    pub rows_copied: u64,
    pub row_errors: u64,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MigrationReport {
    pub success: bool,
    pub status: RunStatus,
    pub run_id: String,
    pub summary: MigrationSummary,
    pub logs: Vec<MigrationLogEntry>,
}

impl MigrationReport {
    pub fn failures(&self) -> impl Iterator<Item = &MigrationLogEntry> {
        self.logs.iter().filter(|entry| !entry.success)
    }
}
