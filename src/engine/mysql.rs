// =====================================================
// MySQL ENGINE
// =====================================================

use super::{MigrationEngine, RoutineInvocation};
use crate::db_types::{
    Capabilities, ColumnDescriptor, ConstraintDescriptor, ConstraintType, DatabaseType, Dialect,
    ServerConfig,
};
use crate::error::{MigrationError, Result};
use crate::settings::TimeoutConfig;
use crate::sql_utils::{qualified_table_name, quote_column_list, quote_identifier_mysql};
use crate::value::SqlValue;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use futures::TryStreamExt;
use rust_decimal::Decimal;
use sqlx::mysql::{MySqlArguments, MySqlConnectOptions, MySqlRow, MySqlSslMode};
use sqlx::query::Query;
use sqlx::{Column, ConnectOptions, MySql, Pool, Row, TypeInfo};

pub struct MySqlEngine {
    pool: Pool<MySql>,
}

impl MySqlEngine {
    pub fn new(pool: Pool<MySql>) -> Self {
        Self { pool }
    }
}

// --- Connection ---

pub async fn create_pool(config: &ServerConfig, timeouts: &TimeoutConfig) -> Result<Pool<MySql>> {
    let port = config.port.unwrap_or(3306);
    let mut options = MySqlConnectOptions::new()
        .host(&config.host)
        .port(port)
        .username(&config.username)
        .charset("utf8mb4");

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
            "disable" => options.ssl_mode(MySqlSslMode::Disabled),
            "prefer" => options.ssl_mode(MySqlSslMode::Preferred),
            "require" => options.ssl_mode(MySqlSslMode::Required),
            "verify-ca" => options.ssl_mode(MySqlSslMode::VerifyCa),
            "verify-full" => options.ssl_mode(MySqlSslMode::VerifyIdentity),
            _ => options,
        };
    }

    options = options.log_statements(log::LevelFilter::Debug);

    // One run owns one pool per side; two connections cover the read cursor and the writes.
    sqlx::mysql::MySqlPoolOptions::new()
        .max_connections(2)
        .min_connections(1)
        .acquire_timeout(timeouts.connect())
        .idle_timeout(std::time::Duration::from_secs(300))
        .connect_with(options)
        .await
        .map_err(|e| {
            let err_msg = e.to_string();
            if err_msg.contains("os error 111") {
                return MigrationError::Connection(format!(
                    "Connection refused by MySQL at {}:{}",
                    config.host, port
                ));
            }
            if err_msg.contains("timed out") {
                return MigrationError::Connection(format!(
                    "MySQL at {}:{} did not respond within {}s",
                    config.host,
                    port,
                    timeouts.connect().as_secs()
                ));
            }
            MigrationError::Connection(MigrationError::from(e).to_string())
        })
}

// --- Value Mapping ---

/// Types decoded as text because they have no lossless native mapping here.
fn needs_text_cast(column: &ColumnDescriptor) -> bool {
    matches!(
        column.sql_type.to_ascii_lowercase().as_str(),
        "time" | "year" | "enum" | "set" | "geometry" | "point" | "linestring" | "polygon"
    )
}

fn select_expression(column: &ColumnDescriptor) -> String {
    let quoted = quote_identifier_mysql(&column.name);
    match column.sql_type.to_ascii_lowercase().as_str() {
        "bit" => format!("CAST({} AS UNSIGNED) AS {}", quoted, quoted),
        _ if needs_text_cast(column) => format!("CAST({} AS CHAR) AS {}", quoted, quoted),
        _ => quoted,
    }
}

fn decode_value(row: &MySqlRow, index: usize) -> Result<SqlValue> {
    let type_name = row.column(index).type_info().name().to_ascii_uppercase();
    let value = match type_name.as_str() {
        "NULL" => None,
        "BOOLEAN" => row.try_get::<Option<bool>, _>(index)?.map(SqlValue::Bool),
        t if t.ends_with("UNSIGNED") => row.try_get::<Option<u64>, _>(index)?.map(|v| {
            i64::try_from(v)
                .map(SqlValue::Int)
                .unwrap_or_else(|_| SqlValue::Decimal(Decimal::from(v)))
        }),
        "TINYINT" | "SMALLINT" | "MEDIUMINT" | "INT" | "BIGINT" => {
            row.try_get::<Option<i64>, _>(index)?.map(SqlValue::Int)
        }
        "FLOAT" => row
            .try_get::<Option<f32>, _>(index)?
            .map(|v| SqlValue::Float(f64::from(v))),
        "DOUBLE" => row.try_get::<Option<f64>, _>(index)?.map(SqlValue::Float),
        "DECIMAL" => row.try_get::<Option<Decimal>, _>(index)?.map(SqlValue::Decimal),
        "DATE" => row.try_get::<Option<NaiveDate>, _>(index)?.map(SqlValue::Date),
        "DATETIME" => row
            .try_get::<Option<NaiveDateTime>, _>(index)?
            .map(SqlValue::Timestamp),
        "TIMESTAMP" => row
            .try_get::<Option<DateTime<Utc>>, _>(index)?
            .map(SqlValue::TimestampTz),
        "JSON" => row
            .try_get::<Option<serde_json::Value>, _>(index)?
            .map(SqlValue::Json),
        t if t.contains("BLOB") || t.contains("BINARY") => {
            row.try_get::<Option<Vec<u8>>, _>(index)?.map(SqlValue::Bytes)
        }
        _ => row.try_get::<Option<String>, _>(index)?.map(SqlValue::Text),
    };
    Ok(value.unwrap_or(SqlValue::Null))
}

fn bind_value<'q>(
    query: Query<'q, MySql, MySqlArguments>,
    value: &'q SqlValue,
) -> Query<'q, MySql, MySqlArguments> {
    match value {
        SqlValue::Null => query.bind(None::<String>),
        SqlValue::Bool(v) => query.bind(*v),
        SqlValue::Int(v) => query.bind(*v),
        SqlValue::Float(v) => query.bind(*v),
        SqlValue::Decimal(v) => query.bind(*v),
        SqlValue::Text(v) => query.bind(v.as_str()),
        SqlValue::Date(v) => query.bind(*v),
        SqlValue::Time(v) => query.bind(*v),
        SqlValue::Timestamp(v) => query.bind(*v),
        SqlValue::TimestampTz(v) => query.bind(*v),
        SqlValue::Bytes(v) => query.bind(v.as_slice()),
        SqlValue::Json(v) => query.bind(sqlx::types::Json(v)),
    }
}

/// information_schema reports literal defaults unquoted; turn them into expressions.
pub(crate) fn normalize_default(raw: Option<String>, data_type: &str, extra: &str) -> Option<String> {
    let raw = raw?;
    let trimmed = raw.trim();
    if trimmed.eq_ignore_ascii_case("NULL") {
        return None;
    }
    let upper = trimmed.to_ascii_uppercase();
    if extra.to_ascii_uppercase().contains("DEFAULT_GENERATED")
        || upper.starts_with("CURRENT_TIMESTAMP")
        || (trimmed.starts_with('\'') && trimmed.ends_with('\'') && trimmed.len() >= 2)
    {
        return Some(trimmed.to_string());
    }
    let numeric = matches!(
        data_type.to_ascii_lowercase().as_str(),
        "tinyint" | "smallint" | "mediumint" | "int" | "bigint" | "decimal" | "float" | "double" | "bit"
    );
    if numeric {
        Some(trimmed.to_string())
    } else {
        Some(format!("'{}'", raw.replace('\'', "''")))
    }
}

impl MySqlEngine {
    async fn schema_exists(&self, schema: &str) -> Result<bool> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM information_schema.SCHEMATA WHERE SCHEMA_NAME = ?",
        )
        .bind(schema)
        .fetch_one(&self.pool)
        .await?;
        Ok(count > 0)
    }

    async fn can_create_in(&self, schema: &str) -> Result<bool> {
        let grantee = "CONCAT('''', SUBSTRING_INDEX(CURRENT_USER(), '@', 1), '''@''', SUBSTRING_INDEX(CURRENT_USER(), '@', -1), '''')";
        let query = format!(
            "SELECT CAST((SELECT COUNT(*) FROM information_schema.USER_PRIVILEGES \
               WHERE GRANTEE = {g} AND PRIVILEGE_TYPE = 'CREATE') \
             + (SELECT COUNT(*) FROM information_schema.SCHEMA_PRIVILEGES \
               WHERE GRANTEE = {g} AND PRIVILEGE_TYPE = 'CREATE' AND ? LIKE TABLE_SCHEMA) AS SIGNED)",
            g = grantee
        );
        let count: i64 = sqlx::query_scalar(&query)
            .bind(schema)
            .fetch_one(&self.pool)
            .await?;
        Ok(count > 0)
    }
}

#[async_trait::async_trait]
impl MigrationEngine for MySqlEngine {
    fn db_type(&self) -> DatabaseType {
        DatabaseType::MySQL
    }

    async fn list_schemas(&self) -> Result<Vec<String>> {
        let names: Vec<String> = sqlx::query_scalar(
            "SELECT CAST(SCHEMA_NAME AS CHAR) FROM information_schema.SCHEMATA ORDER BY SCHEMA_NAME",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(names)
    }

    async fn list_tables(&self, schema: &str) -> Result<Vec<String>> {
        if !self.schema_exists(schema).await? {
            return Err(MigrationError::NotFound(format!("database {}", schema)));
        }
        let names: Vec<String> = sqlx::query_scalar(
            "SELECT CAST(TABLE_NAME AS CHAR) FROM information_schema.TABLES \
             WHERE TABLE_SCHEMA = ? AND TABLE_TYPE = 'BASE TABLE' ORDER BY TABLE_NAME",
        )
        .bind(schema)
        .fetch_all(&self.pool)
        .await?;
        Ok(names)
    }

    async fn describe_columns(&self, schema: &str, table: &str) -> Result<Vec<ColumnDescriptor>> {
        let rows = sqlx::query(
            "SELECT CAST(COLUMN_NAME AS CHAR), CAST(DATA_TYPE AS CHAR), CAST(COLUMN_TYPE AS CHAR), \
                    CAST(CHARACTER_MAXIMUM_LENGTH AS SIGNED), CAST(NUMERIC_PRECISION AS SIGNED), \
                    CAST(NUMERIC_SCALE AS SIGNED), CAST(IS_NULLABLE AS CHAR), \
                    CAST(COLUMN_DEFAULT AS CHAR), CAST(EXTRA AS CHAR), CAST(ORDINAL_POSITION AS SIGNED) \
             FROM information_schema.COLUMNS \
             WHERE TABLE_SCHEMA = ? AND TABLE_NAME = ? \
             ORDER BY ORDINAL_POSITION",
        )
        .bind(schema)
        .bind(table)
        .fetch_all(&self.pool)
        .await?;

        let mut columns = Vec::with_capacity(rows.len());
        for row in rows {
            let data_type: String = row.try_get::<Option<String>, _>(1)?.unwrap_or_default();
            let extra: String = row.try_get::<Option<String>, _>(8)?.unwrap_or_default();
            let is_nullable: String = row.try_get::<Option<String>, _>(6)?.unwrap_or_default();
            columns.push(ColumnDescriptor {
                name: row.try_get::<Option<String>, _>(0)?.unwrap_or_default(),
                column_type: row.try_get::<Option<String>, _>(2)?,
                max_length: row.try_get::<Option<i64>, _>(3)?,
                numeric_precision: row.try_get::<Option<i64>, _>(4)?,
                numeric_scale: row.try_get::<Option<i64>, _>(5)?,
                nullable: is_nullable.eq_ignore_ascii_case("YES"),
                default_expression: normalize_default(row.try_get::<Option<String>, _>(7)?, &data_type, &extra),
                auto_increment: extra.to_ascii_lowercase().contains("auto_increment"),
                ordinal_position: row.try_get::<Option<i64>, _>(9)?.unwrap_or_default() as i32,
                sql_type: data_type,
            });
        }
        Ok(columns)
    }

    async fn describe_constraints(&self, schema: &str, table: &str) -> Result<Vec<ConstraintDescriptor>> {
        let rows = sqlx::query(
            "SELECT CAST(tc.CONSTRAINT_NAME AS CHAR), CAST(tc.CONSTRAINT_TYPE AS CHAR), CAST(kcu.COLUMN_NAME AS CHAR) \
             FROM information_schema.TABLE_CONSTRAINTS tc \
             JOIN information_schema.KEY_COLUMN_USAGE kcu \
               ON tc.CONSTRAINT_SCHEMA = kcu.CONSTRAINT_SCHEMA \
              AND tc.TABLE_NAME = kcu.TABLE_NAME \
              AND tc.CONSTRAINT_NAME = kcu.CONSTRAINT_NAME \
             WHERE tc.TABLE_SCHEMA = ? AND tc.TABLE_NAME = ? \
             ORDER BY tc.CONSTRAINT_NAME, kcu.ORDINAL_POSITION",
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
        let read_metadata = sqlx::query("SELECT 1 FROM information_schema.COLUMNS LIMIT 1")
            .fetch_optional(&self.pool)
            .await
            .is_ok();
        let execute_ddl = match self.can_create_in(schema).await {
            Ok(allowed) => allowed,
            Err(e) => {
                log::warn!("Could not read MySQL privileges for {}: {}", schema, e);
                false
            }
        };
        Capabilities {
            read_metadata,
            execute_ddl,
        }
    }

    async fn execute(&self, sql: &str) -> Result<u64> {
        // Text protocol: CREATE PROCEDURE and friends cannot be prepared.
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
            qualified_table_name(Dialect::MySql, schema, table)
        );
        if !order_by.is_empty() {
            query.push_str(&format!(" ORDER BY {}", quote_column_list(Dialect::MySql, order_by)));
        }
        query.push_str(" LIMIT ? OFFSET ?");

        let rows = sqlx::query(&query)
            .bind(limit)
            .bind(offset)
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
        let placeholders = vec!["?"; values.len()].join(", ");
        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            qualified_table_name(Dialect::MySql, schema, table),
            quote_column_list(Dialect::MySql, &names),
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
            qualified_table_name(Dialect::MySql, schema, table)
        );
        let count: i64 = sqlx::query_scalar(&sql).fetch_one(&self.pool).await?;
        Ok(count)
    }

    async fn call_routine(&self, invocation: &RoutineInvocation) -> Result<usize> {
        let mut query = sqlx::query(&invocation.statement);
        for (_, value) in &invocation.args {
            query = bind_value(query, value);
        }
        // CALL may return several result sets; count rows across all of them.
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
