// =====================================================
// COMMON MIGRATION TYPES AND STRUCTURES
// =====================================================

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

// --- Database Type Enum ---
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseType {
    Supabase,
    #[serde(rename = "mysql")]
    MySQL,
    #[serde(rename = "postgresql")]
    PostgreSQL,
}

impl DatabaseType {
    pub fn from_str(value: &str) -> Result<Self, String> {
        match value.trim().to_ascii_lowercase().as_str() {
            "supabase" => Ok(Self::Supabase),
            "mysql" => Ok(Self::MySQL),
            "postgresql" | "postgres" | "pg" => Ok(Self::PostgreSQL),
            other => Err(format!("Unknown database type: {}", other)),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Supabase => "supabase",
            Self::MySQL => "mysql",
            Self::PostgreSQL => "postgresql",
        }
    }

    /// Supabase is PostgreSQL behind an HTTP RPC layer, so it speaks the same dialect.
    pub fn dialect(&self) -> Dialect {
        match self {
            Self::MySQL => Dialect::MySql,
            Self::PostgreSQL | Self::Supabase => Dialect::Postgres,
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    MySql,
    Postgres,
}

// --- Connection Configuration ---
#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ConnectionConfig {
    Supabase(SupabaseConfig),
    Mysql(ServerConfig),
    Postgresql(ServerConfig),
}

#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct SupabaseConfig {
    pub supabase_url: String,
    pub supabase_key: String,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct ServerConfig {
    pub host: String,
    pub port: Option<u16>,
    pub database: Option<String>,
    pub username: String,
    pub password: Option<String>,
    pub ssl_mode: Option<String>,
}

impl ConnectionConfig {
    pub fn db_type(&self) -> DatabaseType {
        match self {
            Self::Supabase(_) => DatabaseType::Supabase,
            Self::Mysql(_) => DatabaseType::MySQL,
            Self::Postgresql(_) => DatabaseType::PostgreSQL,
        }
    }

    /// Connection label without credentials, safe for logs and reports.
    pub fn describe(&self) -> String {
        match self {
            Self::Supabase(cfg) => format!("supabase:{}", cfg.supabase_url.trim_end_matches('/')),
            Self::Mysql(cfg) | Self::Postgresql(cfg) => format!(
                "{}://{}@{}:{}/{}",
                self.db_type().as_str(),
                cfg.username,
                cfg.host,
                cfg.port.unwrap_or_else(|| self.default_port()),
                cfg.database.as_deref().unwrap_or("")
            ),
        }
    }

    pub fn default_port(&self) -> u16 {
        match self {
            Self::Mysql(_) => 3306,
            Self::Postgresql(_) => 5432,
            Self::Supabase(_) => 443,
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        match self {
            Self::Supabase(cfg) => {
                if cfg.supabase_url.trim().is_empty() {
                    return Err("supabaseUrl is required".to_string());
                }
                if cfg.supabase_key.trim().is_empty() {
                    return Err("supabaseKey is required".to_string());
                }
            }
            Self::Mysql(cfg) | Self::Postgresql(cfg) => {
                if cfg.host.trim().is_empty() {
                    return Err("host is required".to_string());
                }
                if cfg.username.trim().is_empty() {
                    return Err("username is required".to_string());
                }
            }
        }
        Ok(())
    }
}

// --- Discovered Structure ---

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ColumnDescriptor {
    pub name: String,
    /// Engine data type name as reported by information_schema (`character varying`, `int`, ...).
    pub sql_type: String,
    /// Full column type when the engine reports one (`tinyint(1)`, `int unsigned`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub column_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_length: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub numeric_precision: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub numeric_scale: Option<i64>,
    pub nullable: bool,
    /// Always a SQL expression; literal defaults arrive already quoted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_expression: Option<String>,
    #[serde(default)]
    pub auto_increment: bool,
    pub ordinal_position: i32,
}

impl ColumnDescriptor {
    pub fn new(name: &str, sql_type: &str, ordinal_position: i32) -> Self {
        Self {
            name: name.to_string(),
            sql_type: sql_type.to_string(),
            column_type: None,
            max_length: None,
            numeric_precision: None,
            numeric_scale: None,
            nullable: true,
            default_expression: None,
            auto_increment: false,
            ordinal_position,
        }
    }

    pub fn with_max_length(mut self, max_length: i64) -> Self {
        self.max_length = Some(max_length);
        self
    }

    pub fn with_precision(mut self, precision: i64, scale: i64) -> Self {
        self.numeric_precision = Some(precision);
        self.numeric_scale = Some(scale);
        self
    }

    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    pub fn with_default(mut self, expression: &str) -> Self {
        self.default_expression = Some(expression.to_string());
        self
    }
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConstraintType {
    #[serde(rename = "PRIMARY KEY")]
    PrimaryKey,
    #[serde(rename = "UNIQUE")]
    Unique,
    #[serde(rename = "FOREIGN KEY")]
    ForeignKey,
    #[serde(rename = "CHECK")]
    Check,
    #[serde(other, rename = "OTHER")]
    Other,
}

impl ConstraintType {
    pub fn from_db(value: &str) -> Self {
        match value.trim().to_ascii_uppercase().as_str() {
            "PRIMARY KEY" | "PRIMARY" | "P" => Self::PrimaryKey,
            "UNIQUE" | "U" => Self::Unique,
            "FOREIGN KEY" | "F" => Self::ForeignKey,
            "CHECK" | "C" => Self::Check,
            _ => Self::Other,
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ConstraintDescriptor {
    pub name: String,
    pub constraint_type: ConstraintType,
    pub column_name: String,
}

impl ConstraintDescriptor {
    pub fn primary_key(name: &str, column_name: &str) -> Self {
        Self {
            name: name.to_string(),
            constraint_type: ConstraintType::PrimaryKey,
            column_name: column_name.to_string(),
        }
    }
}

/// Immutable snapshot of one source table taken at discovery time.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TableDescriptor {
    pub schema_name: String,
    pub table_name: String,
    pub columns: Vec<ColumnDescriptor>,
    pub constraints: Vec<ConstraintDescriptor>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub record_count: Option<i64>,
}

impl TableDescriptor {
    pub fn new(schema_name: &str, table_name: &str) -> Self {
        Self {
            schema_name: schema_name.to_string(),
            table_name: table_name.to_string(),
            columns: Vec::new(),
            constraints: Vec::new(),
            record_count: None,
        }
    }

    pub fn sort_columns(&mut self) {
        self.columns
            .sort_by(|a, b| a.ordinal_position.cmp(&b.ordinal_position).then_with(|| a.name.cmp(&b.name)));
    }

    pub fn column(&self, name: &str) -> Option<&ColumnDescriptor> {
        self.columns
            .iter()
            .find(|col| col.name.eq_ignore_ascii_case(name))
    }

    /// Primary key columns in constraint order, deduplicated by name and limited to known columns.
    pub fn primary_key_columns(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        self.constraints
            .iter()
            .filter(|c| c.constraint_type == ConstraintType::PrimaryKey)
            .filter_map(|c| self.column(&c.column_name).map(|col| col.name.clone()))
            .filter(|name| seen.insert(name.to_ascii_lowercase()))
            .collect()
    }

    /// Stable row order for paging: primary key, else the first column.
    pub fn stable_order(&self) -> Vec<String> {
        let pk = self.primary_key_columns();
        if !pk.is_empty() {
            return pk;
        }
        self.columns
            .iter()
            .min_by_key(|c| c.ordinal_position)
            .map(|c| vec![c.name.clone()])
            .unwrap_or_default()
    }
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Capabilities {
    pub read_metadata: bool,
    pub execute_ddl: bool,
}
