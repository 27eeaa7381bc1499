// =====================================================
// POSTGRESQL ENGINE
// =====================================================

use super::{MigrationEngine, RoutineInvocation};
use crate::db_types::{
    Capabilities, ColumnDescriptor, ConstraintDescriptor, ConstraintType, DatabaseType, Dialect,
    ServerConfig,
};
use crate::error::{MigrationError, Result};
use crate::settings::TimeoutConfig;
use crate::sql_utils::{qualified_table_name, quote_column_list, quote_identifier_postgres};
use crate::value::SqlValue;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use futures::TryStreamExt;
use rust_decimal::Decimal;
use sqlx::postgres::{PgArguments, PgConnectOptions, PgRow, PgSslMode};
use sqlx::query::Query;
use sqlx::{Column, ConnectOptions, Pool, Postgres, Row, TypeInfo};

pub struct PostgresEngine {
    pool: Pool<Postgres>,
}

impl PostgresEngine {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }
}

// --- Connection ---

pub async fn create_pool(config: &ServerConfig, timeouts: &TimeoutConfig) -> Result<Pool<Postgres>> {
    let port = config.port.unwrap_or(5432);
    let mut options = PgConnectOptions::new()
        .host(&config.host)
        .port(port)
        .username(&config.username)
        .application_name("tenant-migrate");

    if let Some(pwd) = &config.password {
        options = options.password(pwd);
    }

    if let Some(db) = &config.database {
        if !db.is_empty() {
            options = options.database(db);
        }
    }

    if let Some(ssl) = &config.ssl_mode {
        options = match ssl.as_str() {
            "disable" => options.ssl_mode(PgSslMode::Disable),
            "prefer" => options.ssl_mode(PgSslMode::Prefer),
            "require" => options.ssl_mode(PgSslMode::Require),
            "verify-ca" => options.ssl_mode(PgSslMode::VerifyCa),
            "verify-full" => options.ssl_mode(PgSslMode::VerifyFull),
            _ => options,
        };
    }

    options = options.log_statements(log::LevelFilter::Debug);

    sqlx::postgres::PgPoolOptions::new()
        .max_connections(2)
        .min_connections(1)
        .acquire_timeout(timeouts.connect())
        .idle_timeout(std::time::Duration::from_secs(300))
        .connect_with(options)
        .await
        .map_err(|e| {
            let err_msg = e.to_string();
            if err_msg.contains("connection refused") {
                return MigrationError::Connection(format!(
                    "Connection refused by PostgreSQL at {}:{}",
                    config.host, port
                ));
            }
            if err_msg.contains("timed out") {
                return MigrationError::Connection(format!(
                    "PostgreSQL at {}:{} did not respond within {}s",
                    config.host,
                    port,
                    timeouts.connect().as_secs()
                ));
            }
            MigrationError::Connection(MigrationError::from(e).to_string())
        })
}

// --- Value Mapping ---

const NATIVE_TYPES: &[&str] = &[
    "smallint",
    "integer",
    "bigint",
    "boolean",
    "numeric",
    "real",
    "double precision",
    "text",
    "character varying",
    "character",
    "date",
    "timestamp without time zone",
    "timestamp with time zone",
    "bytea",
    "json",
    "jsonb",
];

fn select_expression(column: &ColumnDescriptor) -> String {
    let quoted = quote_identifier_postgres(&column.name);
    if NATIVE_TYPES.contains(&column.sql_type.to_ascii_lowercase().as_str()) {
        quoted
    } else {
        format!("{}::text AS {}", quoted, quoted)
    }
}

/// Type used in `CAST($n AS ...)` for a target column. Length modifiers are
/// left off so an oversized value fails on assignment instead of being cut.
pub(crate) fn cast_type(column: &ColumnDescriptor) -> String {
    let data_type = column.sql_type.to_ascii_lowercase();
    match data_type.as_str() {
        "character varying" | "character" | "varchar" | "char" | "bpchar" => "text".to_string(),
        "user-defined" => column
            .column_type
            .as_deref()
            .map(quote_identifier_postgres)
            .unwrap_or_else(|| "text".to_string()),
        "array" => column
            .column_type
            .as_deref()
            .and_then(|udt| udt.strip_prefix('_'))
            .map(|element| format!("{}[]", element))
            .unwrap_or_else(|| "text[]".to_string()),
        _ => data_type
            .split('(')
            .next()
            .unwrap_or("text")
            .trim()
            .to_string(),
    }
}

fn decode_value(row: &PgRow, index: usize) -> Result<SqlValue> {
    let type_name = row.column(index).type_info().name().to_ascii_uppercase();
    let value = match type_name.as_str() {
        "BOOL" => row.try_get::<Option<bool>, _>(index)?.map(SqlValue::Bool),
        "INT2" => row
            .try_get::<Option<i16>, _>(index)?
            .map(|v| SqlValue::Int(i64::from(v))),
        "INT4" => row
            .try_get::<Option<i32>, _>(index)?
            .map(|v| SqlValue::Int(i64::from(v))),
        "INT8" => row.try_get::<Option<i64>, _>(index)?.map(SqlValue::Int),
        "FLOAT4" => row
            .try_get::<Option<f32>, _>(index)?
            .map(|v| SqlValue::Float(f64::from(v))),
        "FLOAT8" => row.try_get::<Option<f64>, _>(index)?.map(SqlValue::Float),
        "NUMERIC" => row.try_get::<Option<Decimal>, _>(index)?.map(SqlValue::Decimal),
        "DATE" => row.try_get::<Option<NaiveDate>, _>(index)?.map(SqlValue::Date),
        "TIMESTAMP" => row
            .try_get::<Option<NaiveDateTime>, _>(index)?
            .map(SqlValue::Timestamp),
        "TIMESTAMPTZ" => row
            .try_get::<Option<DateTime<Utc>>, _>(index)?
            .map(SqlValue::TimestampTz),
        "BYTEA" => row.try_get::<Option<Vec<u8>>, _>(index)?.map(SqlValue::Bytes),
        "JSON" | "JSONB" => row
            .try_get::<Option<serde_json::Value>, _>(index)?
            .map(SqlValue::Json),
        _ => row.try_get::<Option<String>, _>(index)?.map(SqlValue::Text),
    };
    Ok(value.unwrap_or(SqlValue::Null))
}

/// Everything except bytes travels as text and is cast server-side.
fn bind_value<'q>(
    query: Query<'q, Postgres, PgArguments>,
    value: &'q SqlValue,
) -> Query<'q, Postgres, PgArguments> {
    match value {
        SqlValue::Bytes(bytes) => query.bind(bytes.as_slice()),
        other => query.bind(other.to_param_text()),
    }
}

impl PostgresEngine {
    async fn schema_exists(&self, schema: &str) -> Result<bool> {
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS (SELECT 1 FROM pg_catalog.pg_namespace WHERE nspname = $1)",
        )
        .bind(schema)
        .fetch_one(&self.pool)
        .await?;
        Ok(exists)
    }
}

#[async_trait::async_trait]
impl MigrationEngine for PostgresEngine {
    fn db_type(&self) -> DatabaseType {
        DatabaseType::PostgreSQL
    }

    async fn list_schemas(&self) -> Result<Vec<String>> {
        let names: Vec<String> = sqlx::query_scalar(
            "SELECT nspname::text FROM pg_catalog.pg_namespace ORDER BY nspname",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(names)
    }

    async fn list_tables(&self, schema: &str) -> Result<Vec<String>> {
        if !self.schema_exists(schema).await? {
            return Err(MigrationError::NotFound(format!("schema {}", schema)));
        }
        let names: Vec<String> = sqlx::query_scalar(
            "SELECT tablename::text FROM pg_catalog.pg_tables WHERE schemaname = $1 ORDER BY tablename",
        )
        .bind(schema)
        .fetch_all(&self.pool)
        .await?;
        Ok(names)
    }

    // information_schema.columns hides columns the current role has no privilege on,
    // which is how a readable table can come back with zero columns.
    async fn describe_columns(&self, schema: &str, table: &str) -> Result<Vec<ColumnDescriptor>> {
        let rows = sqlx::query(
            "SELECT column_name::text, data_type::text, udt_name::text, \
                    character_maximum_length::bigint, numeric_precision::bigint, numeric_scale::bigint, \
                    is_nullable::text, column_default::text, ordinal_position::int, is_identity::text \
             FROM information_schema.columns \
             WHERE table_schema = $1 AND table_name = $2 \
             ORDER BY ordinal_position",
        )
        .bind(schema)
        .bind(table)
        .fetch_all(&self.pool)
        .await?;

        let mut columns = Vec::with_capacity(rows.len());
        for row in rows {
            let default_expression: Option<String> = row.try_get(7)?;
            let is_identity: Option<String> = row.try_get(9)?;
            let is_nullable: Option<String> = row.try_get(6)?;
            let serial = default_expression
                .as_deref()
                .map(|d| d.to_ascii_lowercase().contains("nextval("))
                .unwrap_or(false);
            columns.push(ColumnDescriptor {
                name: row.try_get::<Option<String>, _>(0)?.unwrap_or_default(),
                sql_type: row.try_get::<Option<String>, _>(1)?.unwrap_or_default(),
                column_type: row.try_get(2)?,
                max_length: row.try_get(3)?,
                numeric_precision: row.try_get(4)?,
                numeric_scale: row.try_get(5)?,
                nullable: is_nullable.as_deref() == Some("YES"),
                default_expression,
                auto_increment: serial || is_identity.as_deref() == Some("YES"),
                ordinal_position: row.try_get::<Option<i32>, _>(8)?.unwrap_or_default(),
            });
        }
        Ok(columns)
    }

    async fn describe_constraints(&self, schema: &str, table: &str) -> Result<Vec<ConstraintDescriptor>> {
        let rows = sqlx::query(
            "SELECT tc.constraint_name::text, tc.constraint_type::text, kcu.column_name::text \
             FROM information_schema.table_constraints tc \
             JOIN information_schema.key_column_usage kcu \
               ON tc.constraint_name = kcu.constraint_name \
              AND tc.table_schema = kcu.table_schema \
              AND tc.table_name = kcu.table_name \
             WHERE tc.table_schema = $1 AND tc.table_name = $2 \
             ORDER BY tc.constraint_name, kcu.ordinal_position",
        )
        .bind(schema)
        .bind(table)
        .fetch_all(&self.pool)
        .await?;

        let mut constraints = Vec::with_capacity(rows.len());
        for row in rows {
            let constraint_type: String = row.try_get::<Option<String>, _>(1)?.unwrap_or_default();
            constraints.push(ConstraintDescriptor {
                name: row.try_get::<Option<String>, _>(0)?.unwrap_or_default(),
                constraint_type: ConstraintType::from_db(&constraint_type),
                column_name: row.try_get::<Option<String>, _>(2)?.unwrap_or_default(),
            });
        }
        Ok(constraints)
    }

    async fn probe_capabilities(&self, schema: &str) -> Capabilities {
        let read_metadata = sqlx::query("SELECT 1 FROM information_schema.columns LIMIT 1")
            .fetch_optional(&self.pool)
            .await
            .is_ok();
        let execute_ddl = sqlx::query_scalar::<_, bool>(
            "SELECT CASE WHEN EXISTS (SELECT 1 FROM pg_catalog.pg_namespace WHERE nspname = $1) \
                         THEN has_schema_privilege(current_user, $1, 'CREATE') \
                         ELSE has_database_privilege(current_user, current_database(), 'CREATE') END",
        )
        .bind(schema)
        .fetch_one(&self.pool)
        .await
        .unwrap_or_else(|e| {
            log::warn!("Could not read PostgreSQL privileges for {}: {}", schema, e);
            false
        });
        Capabilities {
            read_metadata,
            execute_ddl,
        }
    }

    async fn execute(&self, sql: &str) -> Result<u64> {
        let result = sqlx::raw_sql(sql).execute(&self.pool).await?;
        Ok(result.rows_affected())
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
        let select_list = columns
            .iter()
            .map(select_expression)
            .collect::<Vec<_>>()
            .join(", ");
        let mut query = format!(
            "SELECT {} FROM {}",
            select_list,
            qualified_table_name(Dialect::Postgres, schema, table)
        );
        if !order_by.is_empty() {
            query.push_str(&format!(" ORDER BY {}", quote_column_list(Dialect::Postgres, order_by)));
        }
        query.push_str(" LIMIT $1 OFFSET $2");

        let rows = sqlx::query(&query)
            .bind(i64::try_from(limit).unwrap_or(i64::MAX))
            .bind(i64::try_from(offset).unwrap_or(i64::MAX))
            .fetch_all(&self.pool)
            .await?;

        rows.iter()
            .map(|row| (0..row.columns().len()).map(|i| decode_value(row, i)).collect())
            .collect()
    }

    async fn insert_row(
        &self,
        schema: &str,
        table: &str,
        columns: &[ColumnDescriptor],
        values: &[SqlValue],
    ) -> Result<()> {
        let names: Vec<String> = columns.iter().map(|c| c.name.clone()).collect();
        let placeholders = columns
            .iter()
            .enumerate()
            .map(|(i, col)| format!("CAST(${} AS {})", i + 1, cast_type(col)))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            qualified_table_name(Dialect::Postgres, schema, table),
            quote_column_list(Dialect::Postgres, &names),
            placeholders
        );
        let mut query = sqlx::query(&sql);
        for value in values {
            query = bind_value(query, value);
        }
        query
            .execute(&self.pool)
            .await
            .map_err(|e| MigrationError::from(e).into_row_error())?;
        Ok(())
    }

    async fn count_rows(&self, schema: &str, table: &str) -> Result<i64> {
        let sql = format!(
            "SELECT COUNT(*) FROM {}",
            qualified_table_name(Dialect::Postgres, schema, table)
        );
        let count: i64 = sqlx::query_scalar(&sql).fetch_one(&self.pool).await?;
        Ok(count)
    }

    async fn call_routine(&self, invocation: &RoutineInvocation) -> Result<usize> {
        let mut query = sqlx::query(&invocation.statement);
        for (_, value) in &invocation.args {
            query = bind_value(query, value);
        }
        let mut stream = query.fetch(&self.pool);
        let mut rows = 0;
        while stream.try_next().await?.is_some() {
            rows += 1;
        }
        Ok(rows)
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}
