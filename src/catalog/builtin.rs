//! Built-in scan entries for the application's metadata tables.
//!
//! Columns that may hold either a query or a block appear once; every row
//! is classified on its own.

use super::ScanEntry;

pub(super) fn entries() -> Vec<ScanEntry> {
    vec![
        ScanEntry::new("config_field", "default_value_sql", "config_field_id"),
        ScanEntry::new("config_field", "sql_query", "config_field_id")
            .with_predicate("config_field_name <> 'XITOR_CLASS_ID'"),
        ScanEntry::new("excel_orch_mapping", "default_value_sql", "excel_orch_mapping_id"),
        ScanEntry::new("excel_orch_mapping", "sql_query", "excel_orch_mapping_id"),
        ScanEntry::new("grid_page_field", "cell_renderer_param1", "grid_page_field_id")
            .with_predicate("cell_renderer_id = 78")
            .disabled(),
        ScanEntry::new("imp_entity_req_field", "sql_text", "imp_entity_req_field_id")
            .with_predicate("length(sql_text) > 0"),
        ScanEntry::new("notif", "trackor_sql", "notif_id"),
        ScanEntry::new("notif", "user_sql", "notif_id"),
        ScanEntry::new("report_lookup", "lookup_sql", "report_lookup_id"),
        ScanEntry::new("report_sql", "sql_text", "report_sql_id"),
        ScanEntry::new("rule_class_param", "sql_text", "rule_class_param_id").disabled(),
        ScanEntry::new("rule_type", "template_sql", "rule_type_id").disabled(),
        ScanEntry::new("tm_setup", "search_sql", "tm_setup_id")
            .with_predicate("length(search_sql) > 0"),
        ScanEntry::new("xitor_req_field", "default_value_sql", "xitor_req_field_id"),
        ScanEntry::new("imp_data_type_param", "sql_text", "imp_data_type_param_id").disabled(),
        ScanEntry::new("imp_data_map", "sql_text", "imp_data_map_id")
            .with_predicate("length(sql_text) > 0"),
        ScanEntry::new("imp_entity", "sql_text", "imp_entity_id")
            .with_predicate("length(sql_text) > 0"),
        ScanEntry::new(
            "rule_class_param_value",
            "v.value_clob",
            "v.rule_class_param_value_id",
        )
        .with_from("rule_class_param_value v join rule r on (r.rule_id = v.rule_id)")
        .with_predicate("r.is_enabled = 1"),
        ScanEntry::new("imp_data_type", "sql_text", "imp_data_type_id").disabled(),
        ScanEntry::new("imp_spec", "external_proc", "imp_spec_id"),
        ScanEntry::new("rule", "sql_text", "rule_id").with_predicate("is_enabled = 1"),
        ScanEntry::new("wf_step", "s.plsql_block", "s.wf_step_id")
            .with_from("wf_step s join wf_workflow w on (w.wf_workflow_id = s.wf_workflow_id)")
            .with_predicate("w.wf_state_id not in (4,5)"),
        ScanEntry::new("wf_template_step", "plsql_block", "wf_template_step_id"),
    ]
}
