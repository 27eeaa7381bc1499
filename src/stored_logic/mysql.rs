use super::catalogue::DOCUMENT_TABLES;
use super::{CompiledRoutine, RoutineBody, RoutineKind, RoutineSpec};
use crate::db_types::Dialect;
use crate::sql_utils::{quote_identifier, quote_literal};

// Dynamic statements splice the tenant as a backtick identifier.
const TENANT_IDENT: &str = "REPLACE(p_tenant, '`', '``')";

fn qualified(database: &str, name: &str) -> String {
    format!(
        "{}.{}",
        quote_identifier(Dialect::MySql, database),
        quote_identifier(Dialect::MySql, name)
    )
}

/// `user@host` -> `'user'@'host'`; a bare name means any host.
fn account(grantee: &str) -> String {
    let (user, host) = grantee.split_once('@').unwrap_or((grantee, "%"));
    format!(
        "{}@{}",
        quote_literal(Dialect::MySql, user),
        quote_literal(Dialect::MySql, host)
    )
}

pub(super) fn compile(spec: &RoutineSpec, database: &str, grantees: &[String]) -> CompiledRoutine {
    let kind = spec.kind(Dialect::MySql);
    let routine = qualified(database, spec.name);
    let signature = spec
        .params
        .iter()
        .map(|p| match kind {
            RoutineKind::Procedure => format!("IN {} {}", p.name, p.ty.mysql()),
            RoutineKind::Function => format!("{} {}", p.name, p.ty.mysql()),
        })
        .collect::<Vec<_>>()
        .join(", ");

    let drop = format!("DROP {} IF EXISTS {}", kind.keyword(), routine);
    let create = match function_body(spec.body) {
        Some((returns, characteristics, body)) => format!(
            "CREATE FUNCTION {}({})\nRETURNS {}\n{}\nSQL SECURITY DEFINER\nBEGIN\n{}\nEND",
            routine, signature, returns, characteristics, body
        ),
        None => format!(
            "CREATE PROCEDURE {}({})\n{}\nSQL SECURITY DEFINER\nBEGIN\n{}\nEND",
            routine,
            signature,
            data_access(spec.body),
            procedure_body(spec.body, database)
        ),
    };
    let grants = grantees
        .iter()
        .map(|grantee| {
            format!(
                "GRANT EXECUTE ON {} {} TO {}",
                kind.keyword(),
                routine,
                account(grantee)
            )
        })
        .collect();

    CompiledRoutine {
        name: spec.name,
        statements: vec![drop, create],
        grants,
    }
}

pub(super) fn call_statement(spec: &RoutineSpec, database: &str) -> String {
    let placeholders = vec!["?"; spec.params.len()].join(", ");
    match spec.kind(Dialect::MySql) {
        RoutineKind::Procedure => format!("CALL {}({})", qualified(database, spec.name), placeholders),
        RoutineKind::Function => format!(
            "SELECT {}({}) AS result",
            qualified(database, spec.name),
            placeholders
        ),
    }
}

fn data_access(body: RoutineBody) -> &'static str {
    match body {
        RoutineBody::AdjustStock | RoutineBody::AuthenticateUser => "MODIFIES SQL DATA",
        _ => "READS SQL DATA",
    }
}

fn run_prepared(using: Option<&str>) -> String {
    let execute = match using {
        Some(vars) => format!("EXECUTE stmt USING {};", vars),
        None => "EXECUTE stmt;".to_string(),
    };
    format!(
        "  PREPARE stmt FROM @sql;\n  {}\n  DEALLOCATE PREPARE stmt;",
        execute
    )
}

fn procedure_body(body: RoutineBody, database: &str) -> String {
    match body {
        RoutineBody::ListTable {
            table,
            order_by,
            descending,
        } => format!(
            "  SET @sql = CONCAT('SELECT * FROM `', {}, '`.`{}` ORDER BY `{}`{}');\n{}",
            TENANT_IDENT,
            table,
            order_by,
            if descending { " DESC" } else { "" },
            run_prepared(None)
        ),
        RoutineBody::Alias { target } => format!("  CALL {}(p_tenant);", qualified(database, target)),
        RoutineBody::NextDocumentNumber { table } => format!(
            "  SET @sql = CONCAT('SELECT COALESCE(MAX(nfact), 0) + 1 AS next_number FROM `', {}, '`.`{}`');\n{}",
            TENANT_IDENT,
            table,
            run_prepared(None)
        ),
        RoutineBody::NextNumberByType => {
            let branches = DOCUMENT_TABLES
                .iter()
                .enumerate()
                .map(|(idx, (doc, table))| {
                    format!(
                        "  {} LOWER(p_document_type) = '{}' THEN\n    SET v_table = '{}';",
                        if idx == 0 { "IF" } else { "ELSEIF" },
                        doc,
                        table
                    )
                })
                .collect::<Vec<_>>()
                .join("\n");
            format!(
                "  DECLARE v_table VARCHAR(64) DEFAULT NULL;\n{}\n  END IF;\n  IF v_table IS NULL THEN\n    SELECT 1 AS next_number;\n  ELSE\n    SET @sql = CONCAT('SELECT COALESCE(MAX(nfact), 0) + 1 AS next_number FROM `', {}, '`.`', v_table, '`');\n  {}\n  END IF;",
                branches,
                TENANT_IDENT,
                run_prepared(None).trim_start()
            )
        }
        RoutineBody::AdjustStock => format!(
            "  SET @sql = NULL;\n  IF p_operation = 'add' THEN\n    SET @sql = CONCAT('UPDATE `', {t}, '`.`article` SET stock_f = stock_f + ? WHERE narticle = ?');\n  ELSEIF p_operation = 'subtract' THEN\n    SET @sql = CONCAT('UPDATE `', {t}, '`.`article` SET stock_f = stock_f - ? WHERE narticle = ?');\n  END IF;\n  IF @sql IS NOT NULL THEN\n    SET @p_qte = p_qte;\n    SET @p_narticle = p_narticle;\n  {run}\n  END IF;\n  SELECT @sql IS NOT NULL AS success;",
            t = TENANT_IDENT,
            run = run_prepared(Some("@p_qte, @p_narticle")).trim_start()
        ),
        RoutineBody::AuthenticateUser => "  DECLARE v_id INT DEFAULT NULL;\n  DECLARE v_hash VARCHAR(128) DEFAULT NULL;\n  DECLARE v_user JSON DEFAULT NULL;\n  SELECT id, password_hash, JSON_OBJECT('id', id, 'username', username, 'email', email, 'full_name', full_name, 'role', role)\n    INTO v_id, v_hash, v_user\n    FROM users\n   WHERE (username = p_username OR email = p_username) AND active = TRUE\n   LIMIT 1;\n  IF v_id IS NULL THEN\n    SELECT JSON_OBJECT('success', FALSE, 'error', 'user not found or inactive') AS result;\n  ELSEIF NOT (v_hash <=> SHA2(p_password, 256)) THEN\n    SELECT JSON_OBJECT('success', FALSE, 'error', 'invalid password') AS result;\n  ELSE\n    UPDATE users SET last_login = CURRENT_TIMESTAMP WHERE id = v_id;\n    SELECT JSON_OBJECT('success', TRUE, 'user', v_user) AS result;\n  END IF;"
            .to_string(),
        // compiled by `function_body`
        RoutineBody::CalculateMargin => String::new(),
    }
}

/// (return type, characteristics, body) for routines that are MySQL functions.
fn function_body(body: RoutineBody) -> Option<(&'static str, &'static str, String)> {
    match body {
        RoutineBody::CalculateMargin => Some((
            "DECIMAL(12,2)",
            "DETERMINISTIC\nNO SQL",
            "  IF p_prix_achat IS NULL OR p_prix_achat = 0 THEN\n    RETURN 0;\n  END IF;\n  RETURN ROUND(((p_prix_vente - p_prix_achat) / p_prix_achat) * 100, 2);"
                .to_string(),
        )),
        _ => None,
    }
}
