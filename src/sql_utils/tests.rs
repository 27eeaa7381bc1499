use super::*;

#[test]
fn mysql_identifiers_double_backticks() {
    assert_eq!(quote_identifier_mysql("table"), "`table`".to_string());
    assert_eq!(quote_identifier_mysql("table`name"), "`table``name`".to_string());
}

#[test]
fn postgres_identifiers_double_quotes() {
    assert_eq!(quote_identifier_postgres("2025_bu01"), "\"2025_bu01\"".to_string());
    assert_eq!(quote_identifier_postgres("table\"name"), "\"table\"\"name\"".to_string());
}

#[test]
fn qualified_names_quote_schema_and_table() {
    assert_eq!(
        qualified_table_name(Dialect::Postgres, "2025_bu01", "article"),
        "\"2025_bu01\".\"article\""
    );
    assert_eq!(
        qualified_table_name(Dialect::MySql, "2025_bu01", "article"),
        "`2025_bu01`.`article`"
    );
}

#[test]
fn string_escaping_doubles_quotes_and_mysql_backslashes() {
    assert_eq!(escape_sql_string(Dialect::MySql, "plain"), "plain");
    assert_eq!(escape_sql_string(Dialect::MySql, "O'Brien"), "O''Brien");
    assert_eq!(escape_sql_string(Dialect::MySql, "C:\\path"), "C:\\\\path");
    assert_eq!(escape_sql_string(Dialect::Postgres, "C:\\path"), "C:\\path");
    assert_eq!(quote_literal(Dialect::Postgres, "O'Brien's Tool"), "'O''Brien''s Tool'");
}

#[test]
fn binary_literals_are_hex_per_dialect() {
    assert_eq!(format_binary_literal(Dialect::MySql, &[0xde, 0xad]), "X'dead'");
    assert_eq!(format_binary_literal(Dialect::Postgres, &[0x01]), "'\\x01'::bytea");
}

#[test]
fn insert_statement_inlines_escaped_literals() {
    let stmt = build_insert_statement(
        Dialect::Postgres,
        "2025_bu01",
        "article",
        &["narticle".into(), "designation".into(), "stock_f".into()],
        &[
            SqlValue::Text("ART002".into()),
            SqlValue::Text("O'Brien's Tool".into()),
            SqlValue::Null,
        ],
    );
    assert_eq!(
        stmt,
        "INSERT INTO \"2025_bu01\".\"article\" (\"narticle\", \"designation\", \"stock_f\") \
         VALUES ('ART002', 'O''Brien''s Tool', NULL)"
    );
}
