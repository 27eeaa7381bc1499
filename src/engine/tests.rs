use super::supabase::{check_raw_sql_result, classify_rpc_failure, parse_table_structure, SupabaseEngine};
use super::*;
use crate::db_types::{ConstraintType, SupabaseConfig};
use crate::error::ErrorKind;
use serde_json::json;

#[tokio::test]
async fn connect_rejects_incomplete_config() {
    let config = ConnectionConfig::Supabase(SupabaseConfig {
        supabase_url: "".to_string(),
        supabase_key: "key".to_string(),
    });
    let err = connect(&config, &TimeoutConfig::default()).await.err().unwrap();
    assert_eq!(err.kind(), ErrorKind::Config);
}

#[test]
fn supabase_rpc_url() {
    let engine = SupabaseEngine::new(
        &SupabaseConfig {
            supabase_url: "demo.supabase.co/".to_string(),
            supabase_key: "anon".to_string(),
        },
        &TimeoutConfig::default(),
    )
    .unwrap();
    assert_eq!(engine.db_type(), DatabaseType::Supabase);
    assert_eq!(engine.dialect(), Dialect::Postgres);
    assert_eq!(
        engine.rpc_url("discover_tenant_schemas"),
        "https://demo.supabase.co/rest/v1/rpc/discover_tenant_schemas"
    );
}

#[test]
fn parse_table_structure_payload() {
    let payload = json!({
        "columns": [
            {"column_name": "designation", "data_type": "character varying",
             "character_maximum_length": 100, "is_nullable": "YES", "ordinal_position": 2},
            {"column_name": "narticle", "data_type": "character varying",
             "character_maximum_length": 20, "is_nullable": "NO", "ordinal_position": 1},
            {"column_name": "id", "data_type": "integer", "is_nullable": "NO",
             "column_default": "nextval('article_id_seq'::regclass)", "ordinal_position": 3}
        ],
        "constraints": [
            {"constraint_name": "article_pkey", "constraint_type": "PRIMARY KEY", "column_name": "narticle"}
        ],
        "record_count": 42,
        "sample_data": []
    });

    let table = parse_table_structure("2025_bu01", "article", &payload).unwrap();
    assert_eq!(table.columns.len(), 3);
    assert_eq!(table.columns[0].name, "narticle");
    assert_eq!(table.columns[0].max_length, Some(20));
    assert!(!table.columns[0].nullable);
    assert!(table.columns[2].auto_increment);
    assert_eq!(table.constraints[0].constraint_type, ConstraintType::PrimaryKey);
    assert_eq!(table.record_count, Some(42));
}

#[test]
fn parse_table_structure_rejects_scalars() {
    let err = parse_table_structure("s", "t", &json!("oops")).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Query);

    let table = parse_table_structure("s", "t", &json!([{"columns": []}])).unwrap();
    assert!(table.columns.is_empty());
}

#[test]
fn raw_sql_failure_inside_ok_response() {
    assert_eq!(check_raw_sql_result(&json!({"success": true})).unwrap(), 0);
    assert_eq!(
        check_raw_sql_result(&json!({"success": true, "rows_affected": 3})).unwrap(),
        3
    );

    let err = check_raw_sql_result(&json!({
        "success": false,
        "error": "permission denied for schema 2025_bu01"
    }))
    .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Privilege);

    let err = check_raw_sql_result(&json!({"success": false})).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Query);
}

#[test]
fn rpc_failures_use_sqlstate_before_http_status() {
    let err = classify_rpc_failure(
        "discover_tenant_schemas",
        404,
        r#"{"code":"PGRST202","message":"Could not find the function"}"#,
    );
    assert_eq!(err.kind(), ErrorKind::NotFound);

    let err = classify_rpc_failure(
        "execute_raw_sql",
        403,
        r#"{"code":"42501","message":"permission denied for function execute_raw_sql"}"#,
    );
    assert_eq!(err.kind(), ErrorKind::Privilege);

    let err = classify_rpc_failure("execute_raw_sql", 401, "Invalid API key");
    assert_eq!(err.kind(), ErrorKind::Connection);

    let err = classify_rpc_failure("execute_raw_sql", 400, r#"{"code":"22P02","message":"bad"}"#);
    assert_eq!(err.kind(), ErrorKind::Query);
}

#[test]
fn mysql_default_normalization() {
    use super::mysql::normalize_default;

    assert_eq!(normalize_default(None, "int", ""), None);
    assert_eq!(normalize_default(Some("NULL".into()), "varchar", ""), None);
    assert_eq!(
        normalize_default(Some("0".into()), "int", "").as_deref(),
        Some("0")
    );
    assert_eq!(
        normalize_default(Some("O'Brien".into()), "varchar", "").as_deref(),
        Some("'O''Brien'")
    );
    assert_eq!(
        normalize_default(Some("CURRENT_TIMESTAMP".into()), "timestamp", "DEFAULT_GENERATED").as_deref(),
        Some("CURRENT_TIMESTAMP")
    );
}

#[tokio::test]
async fn stalled_rpc_is_a_recoverable_timeout() {
    let engine = SupabaseEngine::new(
        &SupabaseConfig {
            supabase_url: crate::test_support::silent_http_endpoint().await,
            supabase_key: "service".to_string(),
        },
        &TimeoutConfig {
            request_secs: 1,
            ..TimeoutConfig::default()
        },
    )
    .unwrap();

    let err = engine.list_tables("2025_bu01").await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Timeout);
    assert!(!err.is_fatal());
}
