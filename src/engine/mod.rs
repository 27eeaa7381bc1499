// =====================================================
// ENGINE ABSTRACTION
// One trait for every database a migration reads from or writes to
// =====================================================

use crate::db_types::{
    Capabilities, ColumnDescriptor, ConnectionConfig, ConstraintDescriptor, DatabaseType, Dialect,
    TableDescriptor,
};
use crate::ddl::generate_drop_table;
use crate::error::{MigrationError, Result};
use crate::settings::TimeoutConfig;
use crate::sql_utils::{qualified_table_name, quote_identifier};
use crate::value::SqlValue;

/// A stored routine call, carried in both shapes engines need:
/// statement text for socket drivers, named arguments for HTTP RPC.
#[derive(Debug, Clone, PartialEq)]
pub struct RoutineInvocation {
    pub name: String,
    pub statement: String,
    pub args: Vec<(String, SqlValue)>,
}

// Internal abstraction so discovery, DDL and row copy run the same way against
// MySQL, PostgreSQL (sqlx pools) and Supabase (HTTP RPC).
#[async_trait::async_trait]
pub trait MigrationEngine: Send + Sync {
    fn db_type(&self) -> DatabaseType;

    fn dialect(&self) -> Dialect {
        self.db_type().dialect()
    }

    async fn list_schemas(&self) -> Result<Vec<String>>;

    async fn list_tables(&self, schema: &str) -> Result<Vec<String>>;

    async fn describe_columns(&self, schema: &str, table: &str) -> Result<Vec<ColumnDescriptor>>;

    async fn describe_constraints(
        &self,
        schema: &str,
        table: &str,
    ) -> Result<Vec<ConstraintDescriptor>>;

    async fn describe_table(&self, schema: &str, table: &str) -> Result<TableDescriptor> {
        let mut descriptor = TableDescriptor::new(schema, table);
        descriptor.columns = self.describe_columns(schema, table).await?;
        descriptor.constraints = self.describe_constraints(schema, table).await?;
        descriptor.sort_columns();
        Ok(descriptor)
    }

    /// Whether metadata can be read and whether DDL may run in `schema`.
    async fn probe_capabilities(&self, schema: &str) -> Capabilities;

    /// Runs one DDL/DML statement and returns the affected row count when known.
    async fn execute(&self, sql: &str) -> Result<u64>;

    async fn ensure_schema(&self, schema: &str) -> Result<()> {
        let sql = match self.dialect() {
            Dialect::Postgres => format!(
                "CREATE SCHEMA IF NOT EXISTS {}",
                quote_identifier(Dialect::Postgres, schema)
            ),
            Dialect::MySql => format!(
                "CREATE DATABASE IF NOT EXISTS {} DEFAULT CHARACTER SET utf8mb4",
                quote_identifier(Dialect::MySql, schema)
            ),
        };
        self.execute(&sql).await.map(|_| ())
    }

    /// Runs generated `CREATE TABLE` DDL for `descriptor`.
    async fn create_table(&self, _descriptor: &TableDescriptor, ddl: &str) -> Result<()> {
        self.execute(ddl).await.map(|_| ())
    }

    async fn drop_table(&self, schema: &str, table: &str) -> Result<()> {
        let sql = generate_drop_table(schema, table, self.dialect());
        self.execute(&sql).await.map(|_| ())
    }

    /// Destructive: removes every row of the target table.
    async fn truncate_table(&self, schema: &str, table: &str) -> Result<()> {
        let target = qualified_table_name(self.dialect(), schema, table);
        let sql = match self.dialect() {
            Dialect::Postgres => format!("TRUNCATE TABLE {} CASCADE", target),
            Dialect::MySql => format!("DELETE FROM {}", target),
        };
        self.execute(&sql).await.map(|_| ())
    }

    /// One page of rows in `order_by` order, values aligned with `columns`.
    async fn fetch_rows(
        &self,
        schema: &str,
        table: &str,
        columns: &[ColumnDescriptor],
        order_by: &[String],
        limit: u64,
        offset: u64,
    ) -> Result<Vec<Vec<SqlValue>>>;

    /// Inserts one row. `columns` are the target's own column descriptors.
    async fn insert_row(
        &self,
        schema: &str,
        table: &str,
        columns: &[ColumnDescriptor],
        values: &[SqlValue],
    ) -> Result<()>;

    async fn count_rows(&self, schema: &str, table: &str) -> Result<i64>;

    /// Invokes a stored routine and returns how many rows it produced.
    async fn call_routine(&self, invocation: &RoutineInvocation) -> Result<usize>;

    async fn close(&self);
}

pub mod mysql;
pub mod postgres;
pub mod supabase;

/// Opens the engine a connection config points at.
pub async fn connect(
    config: &ConnectionConfig,
    timeouts: &TimeoutConfig,
) -> Result<Box<dyn MigrationEngine>> {
    config.validate().map_err(MigrationError::Config)?;

    log::info!("Connecting to {}", config.describe());
    match config {
        ConnectionConfig::Mysql(server) => {
            let pool = mysql::create_pool(server, timeouts).await?;
            Ok(Box::new(mysql::MySqlEngine::new(pool)))
        }
        ConnectionConfig::Postgresql(server) => {
            let pool = postgres::create_pool(server, timeouts).await?;
            Ok(Box::new(postgres::PostgresEngine::new(pool)))
        }
        ConnectionConfig::Supabase(supabase) => {
            let engine = supabase::SupabaseEngine::new(supabase, timeouts)?;
            Ok(Box::new(engine))
        }
    }
}

#[cfg(test)]
mod tests;
