use super::{Param, ParamType, RoutineBody, RoutineSpec};

const TENANT: Param = Param::new("p_tenant", ParamType::Text);

/// Business routines the application calls, in creation order.
/// Aliases come after the routine they forward to.
pub static CATALOGUE: &[RoutineSpec] = &[
    RoutineSpec {
        name: "get_articles_by_tenant",
        params: &[TENANT],
        body: RoutineBody::ListTable {
            table: "article",
            order_by: "narticle",
            descending: false,
        },
    },
    RoutineSpec {
        name: "get_clients_by_tenant",
        params: &[TENANT],
        body: RoutineBody::ListTable {
            table: "client",
            order_by: "nclient",
            descending: false,
        },
    },
    RoutineSpec {
        name: "get_suppliers_by_tenant",
        params: &[TENANT],
        body: RoutineBody::ListTable {
            table: "fournisseur",
            order_by: "nfournisseur",
            descending: false,
        },
    },
    RoutineSpec {
        name: "get_fournisseurs_by_tenant",
        params: &[TENANT],
        body: RoutineBody::Alias {
            target: "get_suppliers_by_tenant",
        },
    },
    RoutineSpec {
        name: "get_bl_list_by_tenant",
        params: &[TENANT],
        body: RoutineBody::ListTable {
            table: "bl",
            order_by: "nfact",
            descending: true,
        },
    },
    RoutineSpec {
        name: "get_bl_list",
        params: &[TENANT],
        body: RoutineBody::Alias {
            target: "get_bl_list_by_tenant",
        },
    },
    RoutineSpec {
        name: "get_fact_list_by_tenant",
        params: &[TENANT],
        body: RoutineBody::ListTable {
            table: "fact",
            order_by: "nfact",
            descending: true,
        },
    },
    RoutineSpec {
        name: "get_fact_list",
        params: &[TENANT],
        body: RoutineBody::Alias {
            target: "get_fact_list_by_tenant",
        },
    },
    RoutineSpec {
        name: "get_proforma_list_by_tenant",
        params: &[TENANT],
        body: RoutineBody::ListTable {
            table: "proforma",
            order_by: "nfact",
            descending: true,
        },
    },
    RoutineSpec {
        name: "get_next_bl_number_by_tenant",
        params: &[TENANT],
        body: RoutineBody::NextDocumentNumber { table: "bl" },
    },
    RoutineSpec {
        name: "get_next_bl_number",
        params: &[TENANT],
        body: RoutineBody::Alias {
            target: "get_next_bl_number_by_tenant",
        },
    },
    RoutineSpec {
        name: "get_next_bl_number_simple",
        params: &[TENANT],
        body: RoutineBody::Alias {
            target: "get_next_bl_number_by_tenant",
        },
    },
    RoutineSpec {
        name: "get_next_fact_number_by_tenant",
        params: &[TENANT],
        body: RoutineBody::NextDocumentNumber { table: "fact" },
    },
    RoutineSpec {
        name: "get_next_fact_number",
        params: &[TENANT],
        body: RoutineBody::Alias {
            target: "get_next_fact_number_by_tenant",
        },
    },
    RoutineSpec {
        name: "get_next_proforma_number_by_tenant",
        params: &[TENANT],
        body: RoutineBody::NextDocumentNumber { table: "proforma" },
    },
    RoutineSpec {
        name: "get_next_number",
        params: &[TENANT, Param::new("p_document_type", ParamType::Text)],
        body: RoutineBody::NextNumberByType,
    },
    RoutineSpec {
        name: "calculate_margin",
        params: &[
            Param::new("p_prix_achat", ParamType::Numeric),
            Param::new("p_prix_vente", ParamType::Numeric),
        ],
        body: RoutineBody::CalculateMargin,
    },
    RoutineSpec {
        name: "update_stock",
        params: &[
            TENANT,
            Param::new("p_narticle", ParamType::Text),
            Param::new("p_qte", ParamType::Integer),
            Param::new("p_operation", ParamType::Text),
        ],
        body: RoutineBody::AdjustStock,
    },
    RoutineSpec {
        name: "authenticate_user",
        params: &[
            Param::new("p_username", ParamType::Text),
            Param::new("p_password", ParamType::Text),
        ],
        body: RoutineBody::AuthenticateUser,
    },
];

/// Document type accepted by `get_next_number` -> table holding its numbers.
pub const DOCUMENT_TABLES: &[(&str, &str)] = &[
    ("bl", "bl"),
    ("facture", "fact"),
    ("fact", "fact"),
    ("proforma", "proforma"),
];

pub fn find(name: &str) -> Option<&'static RoutineSpec> {
    CATALOGUE.iter().find(|spec| spec.name == name)
}
