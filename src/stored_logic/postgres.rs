use super::catalogue::DOCUMENT_TABLES;
use super::{CompiledRoutine, RoutineBody, RoutineSpec};
use crate::db_types::Dialect;
use crate::sql_utils::quote_identifier;

fn qualified(schema: &str, name: &str) -> String {
    format!(
        "{}.{}",
        quote_identifier(Dialect::Postgres, schema),
        quote_identifier(Dialect::Postgres, name)
    )
}

fn arg_types(spec: &RoutineSpec) -> String {
    spec.params
        .iter()
        .map(|p| p.ty.postgres())
        .collect::<Vec<_>>()
        .join(", ")
}

pub(super) fn compile(spec: &RoutineSpec, schema: &str, roles: &[String]) -> CompiledRoutine {
    let routine = qualified(schema, spec.name);
    let signature = spec
        .params
        .iter()
        .map(|p| format!("{} {}", p.name, p.ty.postgres()))
        .collect::<Vec<_>>()
        .join(", ");
    let (returns, body) = body(spec, schema);

    let drop = format!("DROP FUNCTION IF EXISTS {}({})", routine, arg_types(spec));
    let create = format!(
        "CREATE OR REPLACE FUNCTION {}({})\nRETURNS {}\nLANGUAGE plpgsql\nSECURITY DEFINER\nSET search_path = {}, pg_temp\nAS $$\n{}\n$$",
        routine,
        signature,
        returns,
        quote_identifier(Dialect::Postgres, schema),
        body
    );
    let grants = roles
        .iter()
        .map(|role| {
            format!(
                "GRANT EXECUTE ON FUNCTION {}({}) TO {}",
                routine,
                arg_types(spec),
                quote_identifier(Dialect::Postgres, role)
            )
        })
        .collect();

    CompiledRoutine {
        name: spec.name,
        statements: vec![drop, create],
        grants,
    }
}

pub(super) fn call_statement(spec: &RoutineSpec, schema: &str) -> String {
    let args = spec
        .params
        .iter()
        .enumerate()
        .map(|(idx, p)| format!("${}::{}", idx + 1, p.ty.postgres().to_ascii_lowercase()))
        .collect::<Vec<_>>()
        .join(", ");
    format!("SELECT * FROM {}({})", qualified(schema, spec.name), args)
}

fn body(spec: &RoutineSpec, schema: &str) -> (String, String) {
    match spec.body {
        RoutineBody::ListTable {
            table,
            order_by,
            descending,
        } => (
            "SETOF json".to_string(),
            format!(
                "BEGIN\n  RETURN QUERY EXECUTE format('SELECT row_to_json(t) FROM %I.{} t ORDER BY {}{}', p_tenant);\nEND;",
                table,
                order_by,
                if descending { " DESC" } else { "" }
            ),
        ),
        RoutineBody::Alias { target } => (
            "SETOF json".to_string(),
            format!(
                "BEGIN\n  RETURN QUERY SELECT * FROM {}(p_tenant);\nEND;",
                qualified(schema, target)
            ),
        ),
        RoutineBody::NextDocumentNumber { table } => (
            "TABLE(next_number INTEGER)".to_string(),
            format!(
                "BEGIN\n  RETURN QUERY EXECUTE format('SELECT (COALESCE(MAX(nfact), 0) + 1)::integer FROM %I.{}', p_tenant);\nEND;",
                table
            ),
        ),
        RoutineBody::NextNumberByType => {
            let arms = DOCUMENT_TABLES
                .iter()
                .map(|(doc, table)| format!("    WHEN '{}' THEN '{}'", doc, table))
                .collect::<Vec<_>>()
                .join("\n");
            (
                "INTEGER".to_string(),
                format!(
                    "DECLARE\n  v_table TEXT;\n  v_next INTEGER;\nBEGIN\n  v_table := CASE lower(p_document_type)\n{}\n  END;\n  IF v_table IS NULL THEN\n    RETURN 1;\n  END IF;\n  EXECUTE format('SELECT (COALESCE(MAX(nfact), 0) + 1)::integer FROM %I.%I', p_tenant, v_table) INTO v_next;\n  RETURN v_next;\nEND;",
                    arms
                ),
            )
        }
        RoutineBody::CalculateMargin => (
            "NUMERIC".to_string(),
            "BEGIN\n  IF p_prix_achat IS NULL OR p_prix_achat = 0 THEN\n    RETURN 0;\n  END IF;\n  RETURN ROUND(((p_prix_vente - p_prix_achat) / p_prix_achat) * 100, 2);\nEND;"
                .to_string(),
        ),
        RoutineBody::AdjustStock => (
            "BOOLEAN".to_string(),
            "BEGIN\n  IF p_operation = 'add' THEN\n    EXECUTE format('UPDATE %I.article SET stock_f = stock_f + $1 WHERE narticle = $2', p_tenant) USING p_qte, p_narticle;\n  ELSIF p_operation = 'subtract' THEN\n    EXECUTE format('UPDATE %I.article SET stock_f = stock_f - $1 WHERE narticle = $2', p_tenant) USING p_qte, p_narticle;\n  ELSE\n    RETURN FALSE;\n  END IF;\n  RETURN TRUE;\nEND;"
                .to_string(),
        ),
        RoutineBody::AuthenticateUser => {
            let users = qualified(schema, "users");
            (
                "JSON".to_string(),
                format!(
                    "DECLARE\n  v_user RECORD;\nBEGIN\n  SELECT id, username, email, password_hash, full_name, role, business_units\n    INTO v_user\n    FROM {users}\n   WHERE (username = p_username OR email = p_username) AND active = true;\n  IF NOT FOUND THEN\n    RETURN json_build_object('success', false, 'error', 'user not found or inactive');\n  END IF;\n  IF v_user.password_hash IS DISTINCT FROM encode(sha256(convert_to(p_password, 'UTF8')), 'hex') THEN\n    RETURN json_build_object('success', false, 'error', 'invalid password');\n  END IF;\n  UPDATE {users} SET last_login = CURRENT_TIMESTAMP WHERE id = v_user.id;\n  RETURN json_build_object('success', true, 'user', json_build_object(\n    'id', v_user.id,\n    'username', v_user.username,\n    'email', v_user.email,\n    'full_name', v_user.full_name,\n    'role', v_user.role,\n    'business_units', v_user.business_units));\nEND;",
                    users = users
                ),
            )
        }
    }
}
