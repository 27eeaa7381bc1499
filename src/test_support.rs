//! In-memory engine used by unit tests. Enforces NOT NULL, character length
//! and primary key uniqueness so row-level failures behave like a real target.

use crate::db_types::{
    Capabilities, ColumnDescriptor, ConstraintDescriptor, DatabaseType, TableDescriptor,
};
use crate::engine::{MigrationEngine, RoutineInvocation};
use crate::error::{MigrationError, Result};
use crate::value::SqlValue;
use rust_decimal::Decimal;
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::sync::Mutex;
use std::time::Duration;

type TableKey = (String, String);

#[derive(Default)]
struct MemoryState {
    schemas: BTreeSet<String>,
    listed_only: Vec<String>,
    tables: BTreeMap<TableKey, MemoryTable>,
    executed: Vec<String>,
    routine_calls: Vec<RoutineInvocation>,
}

struct MemoryTable {
    descriptor: TableDescriptor,
    rows: Vec<Vec<SqlValue>>,
}

pub struct MemoryEngine {
    db_type: DatabaseType,
    state: Mutex<MemoryState>,
    closed: AtomicBool,
    list_schemas_error: Option<fn(String) -> MigrationError>,
    ddl_denied: bool,
    hollow_tables: HashSet<TableKey>,
    slow_tables: HashSet<TableKey>,
    slow_delay: Duration,
    insert_connection_error: bool,
    failing_routines: HashSet<String>,
    phantom_rows: i64,
}

impl MemoryEngine {
    pub fn new(db_type: DatabaseType) -> Self {
        Self {
            db_type,
            state: Mutex::new(MemoryState::default()),
            closed: AtomicBool::new(false),
            list_schemas_error: None,
            ddl_denied: false,
            hollow_tables: HashSet::new(),
            slow_tables: HashSet::new(),
            slow_delay: Duration::from_millis(0),
            insert_connection_error: false,
            failing_routines: HashSet::new(),
            phantom_rows: 0,
        }
    }

    pub fn with_schema(mut self, schema: &str) -> Self {
        self.state.get_mut().unwrap().schemas.insert(schema.to_string());
        self
    }

    /// Shows up in `list_schemas` but holds nothing (system schemas, `public`).
    pub fn with_listed_schema(mut self, schema: &str) -> Self {
        self.state.get_mut().unwrap().listed_only.push(schema.to_string());
        self
    }

    pub fn with_table(mut self, descriptor: TableDescriptor, rows: Vec<Vec<SqlValue>>) -> Self {
        let state = self.state.get_mut().unwrap();
        state.schemas.insert(descriptor.schema_name.clone());
        state.tables.insert(
            (descriptor.schema_name.clone(), descriptor.table_name.clone()),
            MemoryTable { descriptor, rows },
        );
        self
    }

    pub fn failing_list_schemas(mut self, error: fn(String) -> MigrationError) -> Self {
        self.list_schemas_error = Some(error);
        self
    }

    pub fn deny_ddl(mut self) -> Self {
        self.ddl_denied = true;
        self
    }

    /// `describe_columns` answers with nothing for this table.
    pub fn hollow_table(mut self, schema: &str, table: &str) -> Self {
        self.hollow_tables.insert((schema.to_string(), table.to_string()));
        self
    }

    pub fn slow_table(mut self, schema: &str, table: &str, delay: Duration) -> Self {
        self.slow_tables.insert((schema.to_string(), table.to_string()));
        self.slow_delay = delay;
        self
    }

    pub fn dropping_connection_on_insert(mut self) -> Self {
        self.insert_connection_error = true;
        self
    }

    pub fn failing_routine(mut self, name: &str) -> Self {
        self.failing_routines.insert(name.to_string());
        self
    }

    /// `count_rows` over-reports by this many rows.
    pub fn with_phantom_rows(mut self, extra: i64) -> Self {
        self.phantom_rows = extra;
        self
    }

    pub fn rows(&self, schema: &str, table: &str) -> Vec<Vec<SqlValue>> {
        self.state
            .lock()
            .unwrap()
            .tables
            .get(&key(schema, table))
            .map(|t| t.rows.clone())
            .unwrap_or_default()
    }

    /// Value of `column` in every row, in storage order.
    pub fn column_values(&self, schema: &str, table: &str, column: &str) -> Vec<SqlValue> {
        let state = self.state.lock().unwrap();
        let Some(t) = state.tables.get(&key(schema, table)) else {
            return Vec::new();
        };
        let Some(idx) = t.descriptor.columns.iter().position(|c| c.name == column) else {
            return Vec::new();
        };
        t.rows.iter().map(|row| row[idx].clone()).collect()
    }

    pub fn table(&self, schema: &str, table: &str) -> Option<TableDescriptor> {
        self.state
            .lock()
            .unwrap()
            .tables
            .get(&key(schema, table))
            .map(|t| t.descriptor.clone())
    }

    pub fn executed(&self) -> Vec<String> {
        self.state.lock().unwrap().executed.clone()
    }

    pub fn routine_calls(&self) -> Vec<RoutineInvocation> {
        self.state.lock().unwrap().routine_calls.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(AtomicOrdering::SeqCst)
    }

    fn missing_schema(&self, schema: &str) -> MigrationError {
        MigrationError::NotFound(format!("schema {} does not exist", schema))
    }

    fn missing_table(&self, schema: &str, table: &str) -> MigrationError {
        MigrationError::NotFound(format!("relation {}.{} does not exist", schema, table))
    }
}

fn key(schema: &str, table: &str) -> TableKey {
    (schema.to_string(), table.to_string())
}

fn compare_values(a: &SqlValue, b: &SqlValue) -> Ordering {
    match (a, b) {
        (SqlValue::Null, SqlValue::Null) => Ordering::Equal,
        (SqlValue::Null, _) => Ordering::Less,
        (_, SqlValue::Null) => Ordering::Greater,
        (SqlValue::Int(x), SqlValue::Int(y)) => x.cmp(y),
        (SqlValue::Decimal(x), SqlValue::Decimal(y)) => x.cmp(y),
        (SqlValue::Float(x), SqlValue::Float(y)) => x.partial_cmp(y).unwrap_or(Ordering::Equal),
        _ => a.to_param_text().cmp(&b.to_param_text()),
    }
}

fn same_value(a: &SqlValue, b: &SqlValue) -> bool {
    !a.is_null() && compare_values(a, b) == Ordering::Equal
}

/// Coerces a value to the stored column type the way a typed target would.
fn coerce(value: &SqlValue, column: &ColumnDescriptor) -> SqlValue {
    let ty = column.sql_type.to_ascii_lowercase();
    match value {
        SqlValue::Float(f) if ty == "numeric" || ty == "decimal" => Decimal::from_str(&f.to_string())
            .map(SqlValue::Decimal)
            .unwrap_or_else(|_| value.clone()),
        SqlValue::Int(i) if ty == "numeric" || ty == "decimal" => SqlValue::Decimal(Decimal::from(*i)),
        other => other.clone(),
    }
}

#[async_trait::async_trait]
impl MigrationEngine for MemoryEngine {
    fn db_type(&self) -> DatabaseType {
        self.db_type
    }

    async fn list_schemas(&self) -> Result<Vec<String>> {
        if let Some(error) = self.list_schemas_error {
            return Err(error("permission denied for information_schema".to_string()));
        }
        let state = self.state.lock().unwrap();
        let mut names = state.listed_only.clone();
        names.extend(state.schemas.iter().cloned());
        Ok(names)
    }

    async fn list_tables(&self, schema: &str) -> Result<Vec<String>> {
        let state = self.state.lock().unwrap();
        if !state.schemas.contains(schema) {
            return Err(self.missing_schema(schema));
        }
        Ok(state
            .tables
            .keys()
            .filter(|(s, _)| s == schema)
            .map(|(_, t)| t.clone())
            .collect())
    }

    async fn describe_columns(&self, schema: &str, table: &str) -> Result<Vec<ColumnDescriptor>> {
        if self.hollow_tables.contains(&key(schema, table)) {
            return Ok(Vec::new());
        }
        let state = self.state.lock().unwrap();
        state
            .tables
            .get(&key(schema, table))
            .map(|t| t.descriptor.columns.clone())
            .ok_or_else(|| self.missing_table(schema, table))
    }

    async fn describe_constraints(&self, schema: &str, table: &str) -> Result<Vec<ConstraintDescriptor>> {
        let state = self.state.lock().unwrap();
        state
            .tables
            .get(&key(schema, table))
            .map(|t| t.descriptor.constraints.clone())
            .ok_or_else(|| self.missing_table(schema, table))
    }

    async fn probe_capabilities(&self, _schema: &str) -> Capabilities {
        Capabilities {
            read_metadata: true,
            execute_ddl: !self.ddl_denied,
        }
    }

    async fn execute(&self, sql: &str) -> Result<u64> {
        if self.ddl_denied {
            return Err(MigrationError::Privilege(format!("permission denied: {}", sql)));
        }
        self.state.lock().unwrap().executed.push(sql.to_string());
        Ok(0)
    }

    async fn ensure_schema(&self, schema: &str) -> Result<()> {
        if self.ddl_denied {
            return Err(MigrationError::Privilege(format!("permission denied to create {}", schema)));
        }
        self.state.lock().unwrap().schemas.insert(schema.to_string());
        Ok(())
    }

    async fn create_table(&self, descriptor: &TableDescriptor, ddl: &str) -> Result<()> {
        self.execute(ddl).await?;
        let mut state = self.state.lock().unwrap();
        if !state.schemas.contains(&descriptor.schema_name) {
            return Err(self.missing_schema(&descriptor.schema_name));
        }
        let table_key = key(&descriptor.schema_name, &descriptor.table_name);
        if state.tables.contains_key(&table_key) {
            if ddl.contains("IF NOT EXISTS") {
                return Ok(());
            }
            return Err(MigrationError::Query(format!(
                "relation {} already exists",
                descriptor.table_name
            )));
        }
        state.tables.insert(
            table_key,
            MemoryTable {
                descriptor: descriptor.clone(),
                rows: Vec::new(),
            },
        );
        Ok(())
    }

    async fn drop_table(&self, schema: &str, table: &str) -> Result<()> {
        self.execute(&format!("DROP TABLE IF EXISTS {}.{}", schema, table)).await?;
        self.state.lock().unwrap().tables.remove(&key(schema, table));
        Ok(())
    }

    async fn truncate_table(&self, schema: &str, table: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        let t = state
            .tables
            .get_mut(&key(schema, table))
            .ok_or_else(|| self.missing_table(schema, table))?;
        t.rows.clear();
        Ok(())
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
        if self.slow_tables.contains(&key(schema, table)) {
            tokio::time::sleep(self.slow_delay).await;
        }
        let state = self.state.lock().unwrap();
        let t = state
            .tables
            .get(&key(schema, table))
            .ok_or_else(|| self.missing_table(schema, table))?;
        let position = |name: &str| t.descriptor.columns.iter().position(|c| c.name == name);
        let order_idx: Vec<usize> = order_by.iter().filter_map(|name| position(name)).collect();

        let mut rows = t.rows.clone();
        rows.sort_by(|a, b| {
            order_idx
                .iter()
                .map(|&i| compare_values(&a[i], &b[i]))
                .find(|o| *o != Ordering::Equal)
                .unwrap_or(Ordering::Equal)
        });

        Ok(rows
            .into_iter()
            .skip(offset as usize)
            .take(limit as usize)
            .map(|row| {
                columns
                    .iter()
                    .map(|col| position(&col.name).map(|i| row[i].clone()).unwrap_or(SqlValue::Null))
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
        if self.insert_connection_error {
            return Err(MigrationError::Connection("server closed the connection".to_string()));
        }
        let mut state = self.state.lock().unwrap();
        let t = state
            .tables
            .get_mut(&key(schema, table))
            .ok_or_else(|| self.missing_table(schema, table))?;

        let mut row = Vec::with_capacity(t.descriptor.columns.len());
        for col in &t.descriptor.columns {
            let value = columns
                .iter()
                .position(|c| c.name == col.name)
                .and_then(|i| values.get(i))
                .map(|v| coerce(v, col))
                .unwrap_or(SqlValue::Null);

            if value.is_null() && !col.nullable && col.default_expression.is_none() {
                return Err(MigrationError::RowInsert(format!(
                    "null value in column \"{}\" violates not-null constraint",
                    col.name
                )));
            }
            let is_char = col.sql_type.to_ascii_lowercase().contains("char");
            if let (true, Some(max), Some(len)) = (is_char, col.max_length, value.char_len()) {
                if len as i64 > max {
                    return Err(MigrationError::RowInsert(format!(
                        "value too long for type character varying({}) in column \"{}\"",
                        max, col.name
                    )));
                }
            }
            row.push(value);
        }

        let pk_idx: Vec<usize> = t
            .descriptor
            .primary_key_columns()
            .iter()
            .filter_map(|pk| t.descriptor.columns.iter().position(|c| &c.name == pk))
            .collect();
        if !pk_idx.is_empty()
            && t
                .rows
                .iter()
                .any(|existing| pk_idx.iter().all(|&i| same_value(&existing[i], &row[i])))
        {
            return Err(MigrationError::RowInsert(format!(
                "duplicate key value violates unique constraint on {}",
                table
            )));
        }

        t.rows.push(row);
        Ok(())
    }

    async fn count_rows(&self, schema: &str, table: &str) -> Result<i64> {
        let state = self.state.lock().unwrap();
        state
            .tables
            .get(&key(schema, table))
            .map(|t| t.rows.len() as i64 + self.phantom_rows)
            .ok_or_else(|| self.missing_table(schema, table))
    }

    async fn call_routine(&self, invocation: &RoutineInvocation) -> Result<usize> {
        self.state
            .lock()
            .unwrap()
            .routine_calls
            .push(invocation.clone());
        if self.failing_routines.contains(&invocation.name) {
            return Err(MigrationError::NotFound(format!(
                "function {} does not exist",
                invocation.name
            )));
        }
        Ok(1)
    }

    async fn close(&self) {
        self.closed.store(true, AtomicOrdering::SeqCst);
    }
}

/// Base URL of a local endpoint that accepts connections and never answers.
pub async fn silent_http_endpoint() -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((socket, _)) = listener.accept().await {
            held.push(socket);
        }
    });
    format!("http://{}", addr)
}

// --- Fixtures ---

pub fn article_table(schema: &str) -> TableDescriptor {
    let mut table = TableDescriptor::new(schema, "article");
    table.columns = vec![
        ColumnDescriptor::new("narticle", "varchar", 1).with_max_length(20).not_null(),
        ColumnDescriptor::new("designation", "varchar", 2).with_max_length(100),
        ColumnDescriptor::new("prix_vente", "decimal", 3).with_precision(10, 2),
    ];
    table.constraints = vec![ConstraintDescriptor::primary_key("PRIMARY", "narticle")];
    table
}

pub fn article_row(narticle: &str, designation: &str, prix_vente: &str) -> Vec<SqlValue> {
    vec![
        SqlValue::Text(narticle.to_string()),
        SqlValue::Text(designation.to_string()),
        SqlValue::Decimal(Decimal::from_str(prix_vente).unwrap()),
    ]
}

pub fn article_rows() -> Vec<Vec<SqlValue>> {
    vec![
        article_row("ART001", "Marteau", "19.50"),
        article_row("ART002", "O'Brien's Tool", "10.00"),
    ]
}
