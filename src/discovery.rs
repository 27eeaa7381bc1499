// =====================================================
// SCHEMA / TABLE / COLUMN DISCOVERY
// Read-only introspection of a source engine
// =====================================================

use crate::db_types::TableDescriptor;
use crate::engine::MigrationEngine;
use crate::error::{MigrationError, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

pub const SYSTEM_SCHEMAS: &[&str] = &[
    "information_schema",
    "pg_catalog",
    "pg_toast",
    "mysql",
    "performance_schema",
    "sys",
];

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum SchemaFilter {
    #[default]
    Tenant,
    All,
}

static TENANT_SCHEMA_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[0-9]{4}_[A-Za-z0-9]+$").unwrap());

/// `{year}_{business_unit}`, e.g. `2025_bu01`.
pub fn is_tenant_schema(name: &str) -> bool {
    TENANT_SCHEMA_REGEX.is_match(name)
}

pub fn is_system_schema(name: &str) -> bool {
    let lower = name.to_ascii_lowercase();
    SYSTEM_SCHEMAS.contains(&lower.as_str()) || lower.starts_with("pg_")
}

pub fn filter_schemas(names: &[String], filter: SchemaFilter) -> Vec<String> {
    match filter {
        SchemaFilter::All => names.to_vec(),
        SchemaFilter::Tenant => names
            .iter()
            .filter(|name| !is_system_schema(name) && is_tenant_schema(name))
            .cloned()
            .collect(),
    }
}

/// Lists schemas on the source. When enumeration is refused, probes the
/// configured allow-list and keeps the schemas that answer.
pub async fn discover_schemas(
    engine: &dyn MigrationEngine,
    filter: SchemaFilter,
    fallback: &[String],
) -> Result<Vec<String>> {
    match engine.list_schemas().await {
        Ok(names) => {
            let mut schemas = filter_schemas(&names, filter);
            schemas.sort();
            schemas.dedup();
            log::info!("Discovered {} schema(s) ({} listed)", schemas.len(), names.len());
            Ok(schemas)
        }
        Err(err @ (MigrationError::Privilege(_) | MigrationError::NotFound(_))) => {
            log::warn!("Schema enumeration unavailable ({}), probing allow-list", err);
            probe_fallback_schemas(engine, fallback).await
        }
        Err(err) => Err(err),
    }
}

async fn probe_fallback_schemas(engine: &dyn MigrationEngine, fallback: &[String]) -> Result<Vec<String>> {
    let mut found = Vec::new();
    for schema in fallback {
        match engine.list_tables(schema).await {
            Ok(_) => found.push(schema.clone()),
            Err(err) if err.is_fatal() => return Err(err),
            Err(err) => log::debug!("Fallback schema {} skipped: {}", schema, err),
        }
    }
    Ok(found)
}

pub async fn discover_tables(engine: &dyn MigrationEngine, schema: &str) -> Result<Vec<String>> {
    let mut tables: Vec<String> = engine
        .list_tables(schema)
        .await?
        .into_iter()
        .filter(|t| !t.trim().is_empty())
        .collect();
    tables.sort();
    tables.dedup();
    Ok(tables)
}

/// Columns with blank names are dropped; a table left with none is an error,
/// never an empty descriptor.
pub async fn discover_table_structure(
    engine: &dyn MigrationEngine,
    schema: &str,
    table: &str,
) -> Result<TableDescriptor> {
    let mut descriptor = engine.describe_table(schema, table).await?;
    descriptor.columns.retain(|col| !col.name.trim().is_empty());
    if descriptor.columns.is_empty() {
        return Err(MigrationError::NoColumnsDiscovered {
            schema: schema.to_string(),
            table: table.to_string(),
        });
    }
    descriptor.sort_columns();
    Ok(descriptor)
}

/// Fails with `Privilege` when `schema` can be introspected but not altered.
pub async fn require_ddl_capability(engine: &dyn MigrationEngine, schema: &str) -> Result<()> {
    let caps = engine.probe_capabilities(schema).await;
    match (caps.read_metadata, caps.execute_ddl) {
        (_, true) => Ok(()),
        (true, false) => Err(MigrationError::Privilege(format!(
            "metadata for {} is readable but DDL execution is not permitted",
            schema
        ))),
        (false, false) => Err(MigrationError::Privilege(format!(
            "neither metadata access nor DDL execution is permitted on {}",
            schema
        ))),
    }
}
