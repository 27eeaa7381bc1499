// =====================================================
// SQL UTILITIES MODULE
// Identifier quoting and literal fallback formatting
// =====================================================

use crate::db_types::Dialect;
use crate::value::SqlValue;

pub fn quote_identifier_mysql(name: &str) -> String {
    format!("`{}`", name.replace('`', "``"))
}

pub fn quote_identifier_postgres(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

pub fn quote_identifier(dialect: Dialect, name: &str) -> String {
    match dialect {
        Dialect::Postgres => quote_identifier_postgres(name),
        Dialect::MySql => quote_identifier_mysql(name),
    }
}

pub fn qualified_table_name(dialect: Dialect, schema: &str, table: &str) -> String {
    format!(
        "{}.{}",
        quote_identifier(dialect, schema),
        quote_identifier(dialect, table)
    )
}

pub fn quote_column_list(dialect: Dialect, columns: &[String]) -> String {
    columns
        .iter()
        .map(|col| quote_identifier(dialect, col))
        .collect::<Vec<String>>()
        .join(", ")
}

/// MySQL treats backslash as an escape character inside literals; PostgreSQL
/// (standard_conforming_strings) does not.
pub fn escape_sql_string(dialect: Dialect, value: &str) -> String {
    match dialect {
        Dialect::MySql => value.replace('\\', "\\\\").replace('\'', "''"),
        Dialect::Postgres => value.replace('\'', "''"),
    }
}

pub fn quote_literal(dialect: Dialect, value: &str) -> String {
    format!("'{}'", escape_sql_string(dialect, value))
}

pub fn format_binary_literal(dialect: Dialect, bytes: &[u8]) -> String {
    match dialect {
        Dialect::MySql => format!("X'{}'", hex::encode(bytes)),
        Dialect::Postgres => format!("'\\x{}'::bytea", hex::encode(bytes)),
    }
}

/// Literal-inlined INSERT. Only for engines that cannot bind parameters
/// (the raw SQL RPC); socket engines bind values instead.
pub fn build_insert_statement(
    dialect: Dialect,
    schema: &str,
    table: &str,
    columns: &[String],
    values: &[SqlValue],
) -> String {
    let literals = values
        .iter()
        .map(|value| value.to_sql_literal(dialect))
        .collect::<Vec<String>>()
        .join(", ");
    format!(
        "INSERT INTO {} ({}) VALUES ({})",
        qualified_table_name(dialect, schema, table),
        quote_column_list(dialect, columns),
        literals
    )
}

#[cfg(test)]
mod tests;
