use crate::db_types::Dialect;
use crate::sql_utils::{format_binary_literal, quote_literal};
use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, SecondsFormat, Utc};
use rust_decimal::Decimal;
use serde_json::Value;
use std::str::FromStr;

const DATE_FORMAT: &str = "%Y-%m-%d";
const TIME_FORMAT: &str = "%H:%M:%S%.f";
const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.f";

/// One cell moving from a source row to a target row.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Decimal(Decimal),
    Text(String),
    Date(NaiveDate),
    Time(NaiveTime),
    Timestamp(NaiveDateTime),
    TimestampTz(DateTime<Utc>),
    Bytes(Vec<u8>),
    Json(Value),
}

impl SqlValue {
    pub fn is_null(&self) -> bool {
        matches!(self, SqlValue::Null)
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            SqlValue::Text(s) => Some(s.as_str()),
            _ => None,
        }
    }

    /// Character length of textual values, used for length checks.
    pub fn char_len(&self) -> Option<usize> {
        self.as_text().map(|s| s.chars().count())
    }

    /// Literal form for statement text. Socket engines never use this: they bind parameters.
    pub fn to_sql_literal(&self, dialect: Dialect) -> String {
        match self {
            SqlValue::Null => "NULL".to_string(),
            SqlValue::Bool(v) => {
                if *v {
                    "TRUE".to_string()
                } else {
                    "FALSE".to_string()
                }
            }
            SqlValue::Int(v) => v.to_string(),
            SqlValue::Float(v) if v.is_finite() => v.to_string(),
            SqlValue::Float(v) => match dialect {
                Dialect::Postgres => format!("'{}'::float8", v),
                Dialect::MySql => "NULL".to_string(),
            },
            SqlValue::Decimal(v) => v.to_string(),
            SqlValue::Text(s) => quote_literal(dialect, s),
            SqlValue::Bytes(bytes) => format_binary_literal(dialect, bytes),
            SqlValue::Json(v) => quote_literal(dialect, &v.to_string()),
            SqlValue::TimestampTz(v) if dialect == Dialect::MySql => {
                quote_literal(dialect, &v.naive_utc().format(TIMESTAMP_FORMAT).to_string())
            }
            other => match other.to_param_text() {
                Some(text) => quote_literal(dialect, &text),
                None => "NULL".to_string(),
            },
        }
    }

    /// Textual parameter form; `None` for NULL and for bytes, which bind natively.
    pub fn to_param_text(&self) -> Option<String> {
        match self {
            SqlValue::Null | SqlValue::Bytes(_) => None,
            SqlValue::Bool(v) => Some(v.to_string()),
            SqlValue::Int(v) => Some(v.to_string()),
            SqlValue::Float(v) => Some(v.to_string()),
            SqlValue::Decimal(v) => Some(v.to_string()),
            SqlValue::Text(s) => Some(s.clone()),
            SqlValue::Date(v) => Some(v.format(DATE_FORMAT).to_string()),
            SqlValue::Time(v) => Some(v.format(TIME_FORMAT).to_string()),
            SqlValue::Timestamp(v) => Some(v.format(TIMESTAMP_FORMAT).to_string()),
            SqlValue::TimestampTz(v) => Some(v.to_rfc3339_opts(SecondsFormat::AutoSi, true)),
            SqlValue::Json(v) => Some(v.to_string()),
        }
    }

    pub fn to_json(&self) -> Value {
        match self {
            SqlValue::Null => Value::Null,
            SqlValue::Bool(v) => Value::Bool(*v),
            SqlValue::Int(v) => Value::from(*v),
            SqlValue::Float(v) => serde_json::Number::from_f64(*v)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            SqlValue::Bytes(bytes) => Value::String(BASE64_STANDARD.encode(bytes)),
            SqlValue::Json(v) => v.clone(),
            other => other
                .to_param_text()
                .map(Value::String)
                .unwrap_or(Value::Null),
        }
    }

    /// Rebuilds a typed value from a JSON cell, guided by the column's declared type.
    /// Anything that does not parse as the hinted type is kept as text.
    pub fn from_json(value: &Value, sql_type: &str) -> SqlValue {
        let hint = sql_type.trim().to_ascii_lowercase();
        match value {
            Value::Null => SqlValue::Null,
            Value::Bool(b) => SqlValue::Bool(*b),
            Value::Object(_) | Value::Array(_) => SqlValue::Json(value.clone()),
            Value::Number(n) => {
                if is_decimal_type(&hint) {
                    if let Ok(d) = Decimal::from_str(&n.to_string()) {
                        return SqlValue::Decimal(d);
                    }
                }
                if is_float_type(&hint) {
                    if let Some(f) = n.as_f64() {
                        return SqlValue::Float(f);
                    }
                }
                if let Some(i) = n.as_i64() {
                    return SqlValue::Int(i);
                }
                match Decimal::from_str(&n.to_string()) {
                    Ok(d) => SqlValue::Decimal(d),
                    Err(_) => n.as_f64().map(SqlValue::Float).unwrap_or(SqlValue::Null),
                }
            }
            Value::String(s) => parse_text_with_hint(s, &hint),
        }
    }
}

fn parse_text_with_hint(s: &str, hint: &str) -> SqlValue {
    let parsed = if hint == "json" || hint == "jsonb" {
        serde_json::from_str(s).ok().map(SqlValue::Json)
    } else if hint == "bytea" {
        s.strip_prefix("\\x")
            .and_then(|h| hex::decode(h).ok())
            .map(SqlValue::Bytes)
    } else if is_decimal_type(hint) {
        Decimal::from_str(s).ok().map(SqlValue::Decimal)
    } else if hint == "date" {
        NaiveDate::parse_from_str(s, DATE_FORMAT).ok().map(SqlValue::Date)
    } else if hint.starts_with("time") && !hint.starts_with("timestamp") {
        NaiveTime::parse_from_str(s, TIME_FORMAT).ok().map(SqlValue::Time)
    } else if hint == "timestamp with time zone" || hint == "timestamptz" {
        DateTime::parse_from_rfc3339(s)
            .ok()
            .map(|dt| SqlValue::TimestampTz(dt.with_timezone(&Utc)))
    } else if hint.starts_with("timestamp") || hint == "datetime" {
        NaiveDateTime::parse_from_str(s, TIMESTAMP_FORMAT)
            .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f"))
            .ok()
            .map(SqlValue::Timestamp)
    } else {
        None
    };
    parsed.unwrap_or_else(|| SqlValue::Text(s.to_string()))
}

fn is_decimal_type(hint: &str) -> bool {
    hint.starts_with("numeric") || hint.starts_with("decimal")
}

fn is_float_type(hint: &str) -> bool {
    matches!(hint, "real" | "float" | "float4" | "float8" | "double" | "double precision")
}
