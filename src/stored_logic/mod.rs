// =====================================================
// STORED LOGIC MIGRATOR
// One description per business routine, compiled per dialect
// =====================================================

pub mod catalogue;
mod mysql;
mod postgres;

use crate::db_types::{ConnectionConfig, Dialect};
use crate::engine::{MigrationEngine, RoutineInvocation};
use crate::error::Result;
use crate::settings::StoredLogicSettings;
use crate::value::SqlValue;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

pub use catalogue::CATALOGUE;

/// Identifier used for smoke-test calls that must not match real data.
pub const SMOKE_TEST_MARKER: &str = "SMOKE-TEST";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamType {
    Text,
    Integer,
    Numeric,
}

impl ParamType {
    pub fn postgres(&self) -> &'static str {
        match self {
            Self::Text => "TEXT",
            Self::Integer => "INTEGER",
            Self::Numeric => "NUMERIC",
        }
    }

    pub fn mysql(&self) -> &'static str {
        match self {
            Self::Text => "VARCHAR(255)",
            Self::Integer => "INT",
            Self::Numeric => "DECIMAL(12,2)",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Param {
    pub name: &'static str,
    pub ty: ParamType,
}

impl Param {
    pub const fn new(name: &'static str, ty: ParamType) -> Self {
        Self { name, ty }
    }
}

/// What a routine does, independent of dialect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoutineBody {
    /// Every row of a tenant table, ordered.
    ListTable {
        table: &'static str,
        order_by: &'static str,
        descending: bool,
    },
    /// Forwards to another catalogue routine with the same parameters.
    Alias { target: &'static str },
    /// `MAX(nfact) + 1` over one document table.
    NextDocumentNumber { table: &'static str },
    /// `MAX(nfact) + 1` over the table for a document type; 1 for unknown types.
    NextNumberByType,
    /// Margin percentage, 0 when the purchase price is 0 or NULL.
    CalculateMargin,
    /// Adds or subtracts a quantity from `article.stock_f`.
    AdjustStock,
    /// SHA-256 password check against the shared users table.
    AuthenticateUser,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoutineKind {
    Function,
    Procedure,
}

impl RoutineKind {
    pub fn keyword(&self) -> &'static str {
        match self {
            Self::Function => "FUNCTION",
            Self::Procedure => "PROCEDURE",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoutineSpec {
    pub name: &'static str,
    pub params: &'static [Param],
    pub body: RoutineBody,
}

impl RoutineSpec {
    /// PostgreSQL only has functions. On MySQL only pure computations are
    /// functions: a binary-logged server refuses functions that touch data.
    pub fn kind(&self, dialect: Dialect) -> RoutineKind {
        match (dialect, self.body) {
            (Dialect::Postgres, _) => RoutineKind::Function,
            (Dialect::MySql, RoutineBody::CalculateMargin) => RoutineKind::Function,
            (Dialect::MySql, _) => RoutineKind::Procedure,
        }
    }

    /// Representative arguments that read tenant data without changing it.
    pub fn smoke_args(&self, tenant: &str) -> Vec<SqlValue> {
        let text = |v: &str| SqlValue::Text(v.to_string());
        match self.body {
            RoutineBody::ListTable { .. }
            | RoutineBody::Alias { .. }
            | RoutineBody::NextDocumentNumber { .. } => vec![text(tenant)],
            RoutineBody::NextNumberByType => vec![text(tenant), text("bl")],
            RoutineBody::CalculateMargin => vec![
                SqlValue::Decimal(Decimal::new(1000, 2)),
                SqlValue::Decimal(Decimal::new(1500, 2)),
            ],
            RoutineBody::AdjustStock => vec![
                text(tenant),
                text(SMOKE_TEST_MARKER),
                SqlValue::Int(0),
                text("add"),
            ],
            RoutineBody::AuthenticateUser => vec![text(SMOKE_TEST_MARKER), text(SMOKE_TEST_MARKER)],
        }
    }
}

/// DDL for one routine: drop/create statements, then grants.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompiledRoutine {
    pub name: &'static str,
    pub statements: Vec<String>,
    pub grants: Vec<String>,
}

pub fn compile(spec: &RoutineSpec, dialect: Dialect, routine_schema: &str, grantees: &[String]) -> CompiledRoutine {
    match dialect {
        Dialect::Postgres => postgres::compile(spec, routine_schema, grantees),
        Dialect::MySql => mysql::compile(spec, routine_schema, grantees),
    }
}

pub fn invocation(spec: &RoutineSpec, dialect: Dialect, routine_schema: &str, tenant: &str) -> RoutineInvocation {
    let values = spec.smoke_args(tenant);
    let statement = match dialect {
        Dialect::Postgres => postgres::call_statement(spec, routine_schema),
        Dialect::MySql => mysql::call_statement(spec, routine_schema),
    };
    RoutineInvocation {
        name: spec.name.to_string(),
        statement,
        args: spec
            .params
            .iter()
            .map(|p| p.name.to_string())
            .zip(values)
            .collect(),
    }
}

/// Where routines live: the target database on MySQL, the configured schema otherwise.
pub fn routine_schema_for(config: &ConnectionConfig, settings: &StoredLogicSettings) -> String {
    match config {
        ConnectionConfig::Mysql(server) => server
            .database
            .as_deref()
            .map(str::trim)
            .filter(|db| !db.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| settings.routine_schema.clone()),
        _ => settings.routine_schema.clone(),
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RoutineFailure {
    pub name: String,
    pub error: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct StoredLogicReport {
    pub functions_created: usize,
    pub created: Vec<String>,
    pub errors: Vec<RoutineFailure>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SmokeTestResult {
    pub name: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rows: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SmokeTestReport {
    pub tests_run: usize,
    pub tests_successful: usize,
    pub results: Vec<SmokeTestResult>,
}

/// Recreates every catalogue routine on `target`. Failures are collected per
/// routine; only connection loss aborts.
pub async fn migrate_stored_logic(
    target: &dyn MigrationEngine,
    routine_schema: &str,
    settings: &StoredLogicSettings,
) -> Result<StoredLogicReport> {
    let dialect = target.dialect();
    let grantees = match dialect {
        Dialect::Postgres => &settings.grant_roles,
        Dialect::MySql => &settings.mysql_grantees,
    };
    let mut report = StoredLogicReport::default();

    for spec in CATALOGUE {
        let compiled = compile(spec, dialect, routine_schema, grantees);
        let mut created = true;
        for statement in &compiled.statements {
            if let Err(err) = target.execute(statement).await {
                if err.is_fatal() {
                    return Err(err);
                }
                log::warn!("Failed to create routine {}: {}", spec.name, err);
                report.errors.push(RoutineFailure {
                    name: spec.name.to_string(),
                    error: err.to_string(),
                });
                created = false;
                break;
            }
        }
        if !created {
            continue;
        }
        report.functions_created += 1;
        report.created.push(spec.name.to_string());

        for grant in &compiled.grants {
            if let Err(err) = target.execute(grant).await {
                if err.is_fatal() {
                    return Err(err);
                }
                log::warn!("Grant on {} failed: {}", spec.name, err);
                report.errors.push(RoutineFailure {
                    name: spec.name.to_string(),
                    error: err.to_string(),
                });
            }
        }
    }

    log::info!(
        "Stored logic: {} of {} routines created, {} error(s)",
        report.functions_created,
        CATALOGUE.len(),
        report.errors.len()
    );
    Ok(report)
}

/// Calls every routine once for `tenant`. Failures are diagnostic only.
pub async fn test_stored_logic(
    target: &dyn MigrationEngine,
    routine_schema: &str,
    tenant: &str,
) -> Result<SmokeTestReport> {
    let dialect = target.dialect();
    let mut report = SmokeTestReport::default();

    for spec in CATALOGUE {
        let call = invocation(spec, dialect, routine_schema, tenant);
        report.tests_run += 1;
        let result = match target.call_routine(&call).await {
            Ok(rows) => {
                report.tests_successful += 1;
                SmokeTestResult {
                    name: spec.name.to_string(),
                    success: true,
                    rows: Some(rows),
                    error: None,
                }
            }
            Err(err) if err.is_fatal() => return Err(err),
            Err(err) => {
                log::warn!("Smoke test {} failed: {}", spec.name, err);
                SmokeTestResult {
                    name: spec.name.to_string(),
                    success: false,
                    rows: None,
                    error: Some(err.to_string()),
                }
            }
        };
        report.results.push(result);
    }
    Ok(report)
}
