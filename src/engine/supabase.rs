// =====================================================
// SUPABASE ENGINE
// PostgREST RPC calls instead of a SQL socket
// =====================================================

use super::{MigrationEngine, RoutineInvocation};
use crate::db_types::{
    Capabilities, ColumnDescriptor, ConstraintDescriptor, ConstraintType, DatabaseType, Dialect,
    SupabaseConfig, TableDescriptor,
};
use crate::error::{MigrationError, Result};
use crate::settings::TimeoutConfig;
use crate::sql_utils::{build_insert_statement, qualified_table_name};
use crate::value::SqlValue;
use serde_json::{json, Map, Value};
use std::time::Duration;

/// Remote functions this engine depends on. They must exist on the project.
pub const RPC_LIST_SCHEMAS: &str = "discover_tenant_schemas";
pub const RPC_LIST_TABLES: &str = "discover_schema_tables";
pub const RPC_TABLE_STRUCTURE: &str = "discover_table_structure";
pub const RPC_TABLE_ROWS: &str = "get_table_rows";
pub const RPC_EXECUTE_SQL: &str = "execute_raw_sql";

pub struct SupabaseEngine {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    request_timeout: Duration,
}

impl SupabaseEngine {
    pub fn new(config: &SupabaseConfig, timeouts: &TimeoutConfig) -> Result<Self> {
        let mut base_url = config.supabase_url.trim().trim_end_matches('/').to_string();
        if !base_url.starts_with("http") {
            base_url = format!("https://{}", base_url);
        }
        let client = reqwest::Client::builder()
            .connect_timeout(timeouts.connect())
            .timeout(timeouts.request())
            .build()
            .map_err(|e| MigrationError::Config(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            base_url,
            api_key: config.supabase_key.clone(),
            request_timeout: timeouts.request(),
        })
    }

    pub fn rpc_url(&self, function: &str) -> String {
        format!("{}/rest/v1/rpc/{}", self.base_url, function)
    }

    async fn rpc(&self, function: &str, body: Value) -> Result<Value> {
        let response = self
            .client
            .post(self.rpc_url(function))
            .header("apikey", &self.api_key)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        let status = response.status();
        let text = response.text().await.map_err(|e| self.transport_error(e))?;
        if !status.is_success() {
            return Err(classify_rpc_failure(function, status.as_u16(), &text));
        }
        if text.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&text)
            .map_err(|e| MigrationError::Query(format!("{} returned invalid JSON: {}", function, e)))
    }

    /// A stalled request fails the current step only; a refused connection stays fatal.
    fn transport_error(&self, err: reqwest::Error) -> MigrationError {
        if err.is_timeout() && !err.is_connect() {
            MigrationError::Timeout(self.request_timeout.as_secs())
        } else {
            MigrationError::from(err)
        }
    }

    async fn structure(&self, schema: &str, table: &str) -> Result<TableDescriptor> {
        let payload = self
            .rpc(
                RPC_TABLE_STRUCTURE,
                json!({ "p_schema_name": schema, "p_table_name": table }),
            )
            .await?;
        parse_table_structure(schema, table, &payload)
    }
}

/// PostgREST error bodies carry a SQLSTATE in `code`; fall back to the HTTP status.
pub(crate) fn classify_rpc_failure(function: &str, status: u16, body: &str) -> MigrationError {
    let parsed: Option<Value> = serde_json::from_str(body).ok();
    let message = parsed
        .as_ref()
        .and_then(|v| v.get("message"))
        .and_then(Value::as_str)
        .unwrap_or(body);
    let message = format!("{} ({}): {}", function, status, message);
    if let Some(code) = parsed.as_ref().and_then(|v| v.get("code")).and_then(Value::as_str) {
        let classified = MigrationError::from_sqlstate(code, &message);
        if !matches!(classified, MigrationError::Query(_)) {
            return classified;
        }
    }
    match status {
        401 => MigrationError::Connection(message),
        403 => MigrationError::Privilege(message),
        404 => MigrationError::NotFound(message),
        502..=504 => MigrationError::Connection(message),
        _ => MigrationError::Query(message),
    }
}

fn string_list(payload: &Value, key: &str) -> Vec<String> {
    payload
        .as_array()
        .map(|items| {
            items
                .iter()
                .filter_map(|item| match item {
                    Value::String(s) => Some(s.clone()),
                    Value::Object(obj) => obj.get(key).and_then(Value::as_str).map(str::to_string),
                    _ => None,
                })
                .collect()
        })
        .unwrap_or_default()
}

fn int_field(obj: &Map<String, Value>, key: &str) -> Option<i64> {
    obj.get(key).and_then(|v| match v {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    })
}

fn str_field(obj: &Map<String, Value>, key: &str) -> Option<String> {
    obj.get(key).and_then(Value::as_str).map(str::to_string)
}

pub(crate) fn parse_table_structure(schema: &str, table: &str, payload: &Value) -> Result<TableDescriptor> {
    let payload = match payload {
        Value::Array(items) if items.len() == 1 => &items[0],
        other => other,
    };
    let obj = payload.as_object().ok_or_else(|| {
        MigrationError::Query(format!("{} returned a non-object payload", RPC_TABLE_STRUCTURE))
    })?;

    let mut descriptor = TableDescriptor::new(schema, table);
    if let Some(columns) = obj.get("columns").and_then(Value::as_array) {
        for (idx, col) in columns.iter().filter_map(Value::as_object).enumerate() {
            let sql_type = str_field(col, "data_type").unwrap_or_else(|| "text".to_string());
            let serial = str_field(col, "column_default")
                .map(|d| d.to_ascii_lowercase().contains("nextval("))
                .unwrap_or(false);
            descriptor.columns.push(ColumnDescriptor {
                name: str_field(col, "column_name").unwrap_or_default(),
                column_type: str_field(col, "udt_name"),
                max_length: int_field(col, "character_maximum_length"),
                numeric_precision: int_field(col, "numeric_precision"),
                numeric_scale: int_field(col, "numeric_scale"),
                nullable: str_field(col, "is_nullable")
                    .map(|v| v.eq_ignore_ascii_case("YES"))
                    .unwrap_or(true),
                default_expression: str_field(col, "column_default"),
                auto_increment: serial,
                ordinal_position: int_field(col, "ordinal_position").unwrap_or(idx as i64 + 1) as i32,
                sql_type,
            });
        }
    }
    if let Some(constraints) = obj.get("constraints").and_then(Value::as_array) {
        for con in constraints.iter().filter_map(Value::as_object) {
            descriptor.constraints.push(ConstraintDescriptor {
                name: str_field(con, "constraint_name").unwrap_or_default(),
                constraint_type: ConstraintType::from_db(
                    &str_field(con, "constraint_type").unwrap_or_default(),
                ),
                column_name: str_field(con, "column_name").unwrap_or_default(),
            });
        }
    }
    descriptor.record_count = int_field(obj, "record_count");
    descriptor.sort_columns();
    Ok(descriptor)
}

/// `execute_raw_sql` answers 200 even when the statement failed; the verdict is in the body.
pub(crate) fn check_raw_sql_result(payload: &Value) -> Result<u64> {
    let payload = match payload {
        Value::Array(items) if items.len() == 1 => &items[0],
        other => other,
    };
    let success = payload.get("success").and_then(Value::as_bool).unwrap_or(true);
    let error = payload.get("error").and_then(Value::as_str);
    match (success, error) {
        (true, None) => Ok(payload
            .get("rows_affected")
            .and_then(Value::as_u64)
            .unwrap_or(0)),
        (_, message) => Err(MigrationError::from_message(
            message.unwrap_or("execute_raw_sql reported failure"),
        )),
    }
}

#[async_trait::async_trait]
impl MigrationEngine for SupabaseEngine {
    fn db_type(&self) -> DatabaseType {
        DatabaseType::Supabase
    }

    async fn list_schemas(&self) -> Result<Vec<String>> {
        let payload = self.rpc(RPC_LIST_SCHEMAS, json!({})).await?;
        Ok(string_list(&payload, "schema_name"))
    }

    async fn list_tables(&self, schema: &str) -> Result<Vec<String>> {
        let payload = self
            .rpc(RPC_LIST_TABLES, json!({ "p_schema_name": schema }))
            .await?;
        let mut tables = string_list(&payload, "table_name");
        tables.sort();
        Ok(tables)
    }

    async fn describe_columns(&self, schema: &str, table: &str) -> Result<Vec<ColumnDescriptor>> {
        Ok(self.structure(schema, table).await?.columns)
    }

    async fn describe_constraints(&self, schema: &str, table: &str) -> Result<Vec<ConstraintDescriptor>> {
        Ok(self.structure(schema, table).await?.constraints)
    }

    async fn describe_table(&self, schema: &str, table: &str) -> Result<TableDescriptor> {
        self.structure(schema, table).await
    }

    async fn probe_capabilities(&self, _schema: &str) -> Capabilities {
        let read_metadata = self.rpc(RPC_LIST_SCHEMAS, json!({})).await.is_ok();
        let execute_ddl = match self
            .rpc(RPC_EXECUTE_SQL, json!({ "p_sql": "SELECT 1" }))
            .await
        {
            Ok(payload) => check_raw_sql_result(&payload).is_ok(),
            Err(e) => {
                log::warn!("{} is not callable: {}", RPC_EXECUTE_SQL, e);
                false
            }
        };
        Capabilities {
            read_metadata,
            execute_ddl,
        }
    }

    async fn execute(&self, sql: &str) -> Result<u64> {
        let payload = self.rpc(RPC_EXECUTE_SQL, json!({ "p_sql": sql })).await?;
        check_raw_sql_result(&payload)
    }

    async fn fetch_rows(
        &self,
        schema: &str,
        table: &str,
        columns: &[ColumnDescriptor],
        order_by: &[String],
        limit: u64,
        offset: u64,
    ) -> Result<Vec<Vec<SqlValue>>> {
        let payload = self
            .rpc(
                RPC_TABLE_ROWS,
                json!({
                    "p_schema_name": schema,
                    "p_table_name": table,
                    "p_order_by": order_by,
                    "p_limit": limit,
                    "p_offset": offset,
                }),
            )
            .await?;
        let rows = payload.as_array().cloned().unwrap_or_default();
        Ok(rows
            .iter()
            .map(|row| {
                columns
                    .iter()
                    .map(|col| {
                        row.get(&col.name)
                            .map(|v| SqlValue::from_json(v, &col.sql_type))
                            .unwrap_or(SqlValue::Null)
                    })
                    .collect()
            })
            .collect())
    }

    async fn insert_row(
        &self,
        schema: &str,
        table: &str,
        columns: &[ColumnDescriptor],
        values: &[SqlValue],
    ) -> Result<()> {
        // The RPC primitive cannot bind parameters; literals are escaped instead.
        let names: Vec<String> = columns.iter().map(|c| c.name.clone()).collect();
        let sql = build_insert_statement(Dialect::Postgres, schema, table, &names, values);
        self.execute(&sql)
            .await
            .map(|_| ())
            .map_err(MigrationError::into_row_error)
    }

    async fn count_rows(&self, schema: &str, table: &str) -> Result<i64> {
        let structure = self.structure(schema, table).await?;
        structure.record_count.ok_or_else(|| {
            MigrationError::Query(format!(
                "{} did not report a record count for {}",
                RPC_TABLE_STRUCTURE,
                qualified_table_name(Dialect::Postgres, schema, table)
            ))
        })
    }

    async fn call_routine(&self, invocation: &RoutineInvocation) -> Result<usize> {
        let args: Map<String, Value> = invocation
            .args
            .iter()
            .map(|(name, value)| (name.clone(), value.to_json()))
            .collect();
        let payload = self.rpc(&invocation.name, Value::Object(args)).await?;
        Ok(match payload {
            Value::Array(items) => items.len(),
            Value::Null => 0,
            _ => 1,
        })
    }

    async fn close(&self) {}
}
