// =====================================================
// DDL GENERATION
// TableDescriptor -> CREATE TABLE for a target dialect
// =====================================================

use crate::db_types::{ColumnDescriptor, Dialect, TableDescriptor};
use crate::error::{MigrationError, Result};
use crate::sql_utils::{qualified_table_name, quote_column_list, quote_identifier, quote_literal};

const DEFAULT_VARCHAR_LENGTH: i64 = 255;
const FALLBACK_DECIMAL: (i64, i64) = (10, 2);

/// Emits `CREATE TABLE IF NOT EXISTS`, so re-running against a migrated
/// target is a no-op. Existing tables are never altered.
pub fn generate_create_table(descriptor: &TableDescriptor, dialect: Dialect) -> Result<String> {
    if descriptor.columns.is_empty() {
        return Err(MigrationError::NoColumnsDiscovered {
            schema: descriptor.schema_name.clone(),
            table: descriptor.table_name.clone(),
        });
    }

    let pk_cols = descriptor.primary_key_columns();
    let mut columns_def: Vec<String> = descriptor
        .columns
        .iter()
        .map(|col| format_column(col, dialect, &pk_cols))
        .collect();
    if !pk_cols.is_empty() {
        columns_def.push(format!("PRIMARY KEY ({})", quote_column_list(dialect, &pk_cols)));
    }

    let table_ref = qualified_table_name(dialect, &descriptor.schema_name, &descriptor.table_name);
    Ok(match dialect {
        Dialect::MySql => format!(
            "CREATE TABLE IF NOT EXISTS {} (\n    {}\n) ENGINE=InnoDB DEFAULT CHARSET=utf8mb4",
            table_ref,
            columns_def.join(",\n    ")
        ),
        Dialect::Postgres => format!(
            "CREATE TABLE IF NOT EXISTS {} (\n    {}\n)",
            table_ref,
            columns_def.join(",\n    ")
        ),
    })
}

pub fn generate_drop_table(schema: &str, table: &str, dialect: Dialect) -> String {
    let table_ref = qualified_table_name(dialect, schema, table);
    match dialect {
        Dialect::MySql => format!("DROP TABLE IF EXISTS {}", table_ref),
        Dialect::Postgres => format!("DROP TABLE IF EXISTS {} CASCADE", table_ref),
    }
}

/// After explicit ids are copied, identity sequences on PostgreSQL must move
/// past the highest id. MySQL adjusts AUTO_INCREMENT on its own.
pub fn identity_resync_statements(descriptor: &TableDescriptor, dialect: Dialect) -> Vec<String> {
    if dialect != Dialect::Postgres {
        return Vec::new();
    }
    let pk_cols = descriptor.primary_key_columns();
    let table_ref = qualified_table_name(dialect, &descriptor.schema_name, &descriptor.table_name);
    descriptor
        .columns
        .iter()
        .filter(|col| is_identity_column(col, &pk_cols))
        .map(|col| {
            format!(
                "SELECT setval(pg_get_serial_sequence({}, {}), COALESCE(MAX({}), 0) + 1, false) FROM {}",
                quote_literal(dialect, &table_ref),
                quote_literal(dialect, &col.name),
                quote_identifier(dialect, &col.name),
                table_ref
            )
        })
        .collect()
}

fn format_column(col: &ColumnDescriptor, dialect: Dialect, pk_cols: &[String]) -> String {
    let is_pk = pk_cols.iter().any(|pk| pk.eq_ignore_ascii_case(&col.name));
    let sql_type = map_column_type(col, dialect, is_pk);
    let mut def = format!("{} {}", quote_identifier(dialect, &col.name), sql_type);

    if !col.nullable || is_pk {
        def.push_str(" NOT NULL");
    }
    if is_identity_column(col, pk_cols) {
        match dialect {
            Dialect::MySql => def.push_str(" AUTO_INCREMENT"),
            Dialect::Postgres => def.push_str(" GENERATED BY DEFAULT AS IDENTITY"),
        }
    } else if let Some(default) = translate_default(col, dialect, &sql_type) {
        def.push_str(" DEFAULT ");
        def.push_str(&default);
    }
    def
}

/// Serial and auto-increment integers become identities only as the leading
/// primary key column; anywhere else the sequence semantics are dropped.
fn is_identity_column(col: &ColumnDescriptor, pk_cols: &[String]) -> bool {
    let serial = col.auto_increment
        || col
            .default_expression
            .as_deref()
            .map(is_sequence_default)
            .unwrap_or(false);
    let leading_pk = pk_cols
        .first()
        .map(|pk| pk.eq_ignore_ascii_case(&col.name))
        .unwrap_or(false);
    let (data_type, column_type) = type_names(col);
    serial && leading_pk && is_integer_type(&data_type, &column_type)
}

fn is_sequence_default(expr: &str) -> bool {
    expr.to_ascii_lowercase().contains("nextval(")
}

fn type_names(col: &ColumnDescriptor) -> (String, String) {
    (
        col.sql_type.trim().to_ascii_lowercase(),
        col.column_type
            .as_deref()
            .unwrap_or("")
            .trim()
            .to_ascii_lowercase(),
    )
}

fn is_boolean_type(data_type: &str, column_type: &str) -> bool {
    matches!(data_type, "bool" | "boolean")
        || column_type == "tinyint(1)"
        || column_type == "bit(1)"
        || column_type == "bool"
}

fn is_integer_type(data_type: &str, column_type: &str) -> bool {
    matches!(
        data_type,
        "tinyint"
            | "smallint"
            | "mediumint"
            | "int"
            | "integer"
            | "bigint"
            | "int2"
            | "int4"
            | "int8"
            | "serial"
            | "bigserial"
            | "smallserial"
    ) || matches!(column_type, "int2" | "int4" | "int8")
}

fn is_binary_type(data_type: &str) -> bool {
    matches!(
        data_type,
        "bytea" | "blob" | "tinyblob" | "mediumblob" | "longblob" | "binary" | "varbinary"
    )
}

/// Static type map for the target dialect. Unknown types become TEXT.
pub fn map_column_type(col: &ColumnDescriptor, dialect: Dialect, is_pk: bool) -> String {
    let (data_type, column_type) = type_names(col);
    let unsigned = column_type.contains("unsigned");

    if is_boolean_type(&data_type, &column_type) {
        return "BOOLEAN".to_string();
    }

    if is_integer_type(&data_type, &column_type) {
        return map_integer_type(&data_type, &column_type, unsigned, dialect);
    }

    match data_type.as_str() {
        "numeric" | "decimal" => {
            let (precision, scale) = match (col.numeric_precision, col.numeric_scale) {
                (Some(p), Some(s)) if p > 0 => (p, s),
                (Some(p), None) if p > 0 => (p, 0),
                _ => {
                    log::debug!(
                        "No precision reported for {}, using DECIMAL{:?}",
                        col.name,
                        FALLBACK_DECIMAL
                    );
                    FALLBACK_DECIMAL
                }
            };
            match dialect {
                Dialect::MySql => format!("DECIMAL({},{})", precision, scale),
                Dialect::Postgres => format!("NUMERIC({},{})", precision, scale),
            }
        }
        "real" | "float" | "float4" => match dialect {
            Dialect::MySql => "FLOAT".to_string(),
            Dialect::Postgres => "REAL".to_string(),
        },
        "double" | "double precision" | "float8" => match dialect {
            Dialect::MySql => "DOUBLE".to_string(),
            Dialect::Postgres => "DOUBLE PRECISION".to_string(),
        },
        "character varying" | "varchar" => match (dialect, col.max_length) {
            (Dialect::MySql, len) => format!("VARCHAR({})", len.unwrap_or(DEFAULT_VARCHAR_LENGTH)),
            (Dialect::Postgres, Some(len)) => format!("VARCHAR({})", len),
            (Dialect::Postgres, None) => "VARCHAR".to_string(),
        },
        "character" | "char" | "bpchar" => format!("CHAR({})", col.max_length.unwrap_or(1)),
        "text" | "tinytext" | "mediumtext" | "longtext" | "citext" | "name" => {
            text_type(&data_type, dialect, is_pk)
        }
        "timestamp" | "timestamp without time zone" | "datetime" => "TIMESTAMP".to_string(),
        "timestamptz" | "timestamp with time zone" => match dialect {
            Dialect::MySql => "TIMESTAMP".to_string(),
            Dialect::Postgres => "TIMESTAMPTZ".to_string(),
        },
        "date" => "DATE".to_string(),
        "time" | "time without time zone" | "timetz" | "time with time zone" => "TIME".to_string(),
        "year" => match dialect {
            Dialect::MySql => "YEAR".to_string(),
            Dialect::Postgres => "SMALLINT".to_string(),
        },
        "uuid" => match dialect {
            Dialect::MySql => "VARCHAR(36)".to_string(),
            Dialect::Postgres => "UUID".to_string(),
        },
        "json" => "JSON".to_string(),
        "jsonb" => match dialect {
            Dialect::MySql => "JSON".to_string(),
            Dialect::Postgres => "JSONB".to_string(),
        },
        dt if is_binary_type(dt) => match dialect {
            Dialect::MySql => "LONGBLOB".to_string(),
            Dialect::Postgres => "BYTEA".to_string(),
        },
        "enum" | "set" if dialect == Dialect::MySql && !column_type.is_empty() => column_type.to_uppercase(),
        "enum" | "set" => "VARCHAR(255)".to_string(),
        "array" if dialect == Dialect::Postgres && column_type.starts_with('_') => {
            format!("{}[]", column_type[1..].to_uppercase())
        }
        other => {
            log::warn!("Unmapped type '{}' on column {}, using TEXT", other, col.name);
            text_type("text", dialect, is_pk)
        }
    }
}

fn map_integer_type(data_type: &str, column_type: &str, unsigned: bool, dialect: Dialect) -> String {
    let base = match data_type {
        "tinyint" => "TINYINT",
        "smallint" | "int2" | "smallserial" => "SMALLINT",
        "bigint" | "int8" | "bigserial" => "BIGINT",
        _ if column_type == "int2" => "SMALLINT",
        _ if column_type == "int8" => "BIGINT",
        _ => "INT",
    };
    match dialect {
        Dialect::MySql if unsigned => format!("{} UNSIGNED", base),
        Dialect::MySql => base.to_string(),
        // PostgreSQL has no unsigned integers; widen to keep the range.
        Dialect::Postgres => match (base, unsigned) {
            ("TINYINT", _) => "SMALLINT".to_string(),
            ("SMALLINT", true) => "INTEGER".to_string(),
            ("INT", true) => "BIGINT".to_string(),
            ("BIGINT", true) => "NUMERIC(20,0)".to_string(),
            ("INT", false) => "INTEGER".to_string(),
            (other, _) => other.to_string(),
        },
    }
}

fn text_type(data_type: &str, dialect: Dialect, is_pk: bool) -> String {
    match dialect {
        // MySQL cannot index an unbounded TEXT key.
        Dialect::MySql if is_pk => format!("VARCHAR({})", DEFAULT_VARCHAR_LENGTH),
        Dialect::MySql => match data_type {
            "mediumtext" => "MEDIUMTEXT".to_string(),
            "longtext" => "LONGTEXT".to_string(),
            _ => "TEXT".to_string(),
        },
        Dialect::Postgres => "TEXT".to_string(),
    }
}

/// Translates a source default for the target column, or drops it.
/// Casts are cut at `::`, sequences are dropped, functions other than the
/// current date/time are dropped.
pub fn translate_default(col: &ColumnDescriptor, dialect: Dialect, target_type: &str) -> Option<String> {
    let raw = col.default_expression.as_deref()?.trim();
    if raw.is_empty() || is_sequence_default(raw) {
        return None;
    }

    let mut expr = strip_cast(raw);
    if expr.starts_with('(') && expr.matches('(').count() > expr.matches(')').count() {
        expr = expr[1..].trim();
    }
    while expr.starts_with('(') && expr.ends_with(')') && expr.len() >= 2 {
        expr = expr[1..expr.len() - 1].trim();
    }
    let lower = expr.to_ascii_lowercase();
    let target_upper = target_type.to_ascii_uppercase();

    if lower == "null" {
        return None;
    }

    if target_upper == "BOOLEAN" {
        return match lower.trim_matches('\'') {
            "1" | "true" | "t" | "b'1'" => Some("TRUE".to_string()),
            "0" | "false" | "f" | "b'0'" => Some("FALSE".to_string()),
            _ => None,
        };
    }

    let is_now = matches!(
        lower.as_str(),
        "now()" | "current_timestamp" | "current_timestamp()" | "localtimestamp" | "'now'"
    ) || lower.starts_with("current_timestamp(");
    if is_now || lower == "current_date" || lower == "curdate()" {
        return match (dialect, target_upper.as_str()) {
            (Dialect::Postgres, "DATE") => Some("CURRENT_DATE".to_string()),
            (Dialect::MySql, "DATE") => Some("(CURRENT_DATE)".to_string()),
            (_, t) if t.starts_with("TIMESTAMP") || t == "DATETIME" => Some("CURRENT_TIMESTAMP".to_string()),
            _ => {
                log::warn!("Dropping default {} on {} {}", raw, col.name, target_type);
                None
            }
        };
    }

    if dialect == Dialect::MySql
        && (target_upper.contains("TEXT") || target_upper.contains("BLOB") || target_upper == "JSON")
    {
        log::warn!("MySQL does not accept literal default on {} column {}", target_type, col.name);
        return None;
    }

    if is_quoted_literal(expr) || lower == "true" || lower == "false" || is_numeric_literal(expr) {
        return Some(if lower == "true" || lower == "false" {
            lower.to_uppercase()
        } else {
            expr.to_string()
        });
    }

    log::warn!("Dropping non-portable default {} on {}", raw, col.name);
    None
}

/// Cuts the expression at the first `::` that sits outside a string literal.
fn strip_cast(expr: &str) -> &str {
    let mut in_literal = false;
    let bytes = expr.as_bytes();
    for (idx, byte) in bytes.iter().enumerate() {
        match byte {
            b'\'' => in_literal = !in_literal,
            b':' if !in_literal && bytes.get(idx + 1) == Some(&b':') => return expr[..idx].trim(),
            _ => {}
        }
    }
    expr
}

fn is_quoted_literal(expr: &str) -> bool {
    expr.len() >= 2
        && expr.starts_with('\'')
        && expr.ends_with('\'')
        && !expr[1..expr.len() - 1].replace("''", "").contains('\'')
}

fn is_numeric_literal(expr: &str) -> bool {
    expr.parse::<f64>().map(|v| v.is_finite()).unwrap_or(false)
}
