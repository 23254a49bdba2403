//! Placeholder substitution rules, keyed by table and column.

/// What a placeholder is replaced with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Replacement {
    /// The numeric literal `0`.
    Zero,
    /// A fixed identifier or literal, e.g. a table name the fragment selects from.
    Sentinel(&'static str),
    /// The routine-local variable declared by the block wrapper.
    RoutineVariable,
}

/// A single substitution rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rule {
    /// Names returned by `sql` (bound to the entity id) are replaced with zero.
    Lookup { sql: &'static str },
    /// The listed placeholder or macro keys (lower-case, with their `:` or
    /// brackets) get `replacement`.
    Fixed {
        keys: &'static [&'static str],
        replacement: Replacement,
    },
}

/// Shape of the routine-local variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VariableShape {
    Scalar,
    List,
}

/// The variable a block wrapper declares for assignment-style placeholders.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoutineVariable {
    pub name: &'static str,
    pub shape: VariableShape,
}

impl RoutineVariable {
    pub const SCALAR: Self = Self {
        name: "v_ret_str",
        shape: VariableShape::Scalar,
    };

    pub const LIST: Self = Self {
        name: "v_ret_list",
        shape: VariableShape::List,
    };

    /// PL/pgSQL declaration, without the trailing `;`.
    pub fn declaration(&self) -> String {
        match self.shape {
            VariableShape::Scalar => format!("{} varchar(1000)", self.name),
            VariableShape::List => format!("{} text[]", self.name),
        }
    }
}

/// Rules that apply to one table, optionally narrowed to one column.
#[derive(Debug, Clone)]
pub struct RuleSet {
    pub table: &'static str,
    pub column: Option<&'static str>,
    pub rules: Vec<Rule>,
}

impl RuleSet {
    fn matches(&self, table: &str, column: &str) -> bool {
        self.table.eq_ignore_ascii_case(table)
            && self
                .column
                .map_or(true, |c| c.eq_ignore_ascii_case(bare_column(column)))
    }
}

/// `v.value_clob` -> `value_clob`
fn bare_column(column: &str) -> &str {
    column.rsplit('.').next().unwrap_or(column)
}

/// Table-aware rule registry.
#[derive(Debug, Clone)]
pub struct RuleRegistry {
    sets: Vec<RuleSet>,
    generic: Vec<Rule>,
    list_tables: Vec<&'static str>,
}

const DATA_TYPE_FIXED: &[Rule] = &[
    Rule::Fixed {
        keys: &[":entity_pk", ":value"],
        replacement: Replacement::Zero,
    },
    Rule::Fixed {
        keys: &[":table_name"],
        replacement: Replacement::Sentinel("xitor"),
    },
    Rule::Fixed {
        keys: &["[column_name]"],
        replacement: Replacement::Sentinel("p"),
    },
];

const WORKFLOW_KEYS: Rule = Rule::Fixed {
    keys: &[":wf_workflow_id", ":key", ":subkey", ":wpkey"],
    replacement: Replacement::Zero,
};

impl Default for RuleRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

impl RuleRegistry {
    /// An empty registry with no context rules and no generic rules.
    pub fn empty() -> Self {
        Self {
            sets: Vec::new(),
            generic: Vec::new(),
            list_tables: Vec::new(),
        }
    }

    /// Rules for the application's metadata tables.
    pub fn builtin() -> Self {
        let mut data_type = vec![Rule::Lookup {
            sql: "select sql_parameter from imp_data_type_param where imp_data_type_id::text = $1",
        }];
        data_type.extend_from_slice(DATA_TYPE_FIXED);

        Self::empty()
            .with_set("imp_data_type", None, data_type)
            .with_set("imp_data_type_param", None, DATA_TYPE_FIXED.to_vec())
            .with_set(
                "imp_entity",
                None,
                vec![Rule::Lookup {
                    sql: "select sql_parameter from imp_entity_param where imp_entity_id::text = $1",
                }],
            )
            .with_set(
                "rule",
                Some("sql_text"),
                vec![
                    Rule::Lookup {
                        sql: "select t.id_field from rule r join rule_type t on (r.rule_type_id = t.rule_type_id) where r.rule_id::text = $1",
                    },
                    Rule::Fixed {
                        keys: &[":return_str"],
                        replacement: Replacement::RoutineVariable,
                    },
                    Rule::Fixed {
                        keys: &[":id_num", ":pk", ":ln", ":parent_id", ":child_id", ":imp_run_id"],
                        replacement: Replacement::Zero,
                    },
                ],
            )
            .with_set("wf_step", None, vec![WORKFLOW_KEYS])
            .with_set("wf_template_step", None, vec![WORKFLOW_KEYS])
            .with_generic(Rule::Fixed {
                keys: &[":[program_id]", ":[user_id]"],
                replacement: Replacement::Zero,
            })
            .with_generic(Rule::Fixed {
                keys: &["[date_format]"],
                replacement: Replacement::Sentinel("'MM/DD/YYYY'"),
            })
            .with_list_table("rule_class_param_value")
    }

    /// Adds a context rule set.
    pub fn with_set(
        mut self,
        table: &'static str,
        column: Option<&'static str>,
        rules: Vec<Rule>,
    ) -> Self {
        self.sets.push(RuleSet {
            table,
            column,
            rules,
        });
        self
    }

    /// Adds a rule applied to every table after its context rules.
    pub fn with_generic(mut self, rule: Rule) -> Self {
        self.generic.push(rule);
        self
    }

    /// Blocks from `table` get a list-typed routine variable.
    pub fn with_list_table(mut self, table: &'static str) -> Self {
        self.list_tables.push(table);
        self
    }

    /// Context rules for `table`/`column`, in registration order.
    pub fn rules_for<'a>(&'a self, table: &'a str, column: &'a str) -> impl Iterator<Item = &'a Rule> {
        self.sets
            .iter()
            .filter(move |set| set.matches(table, column))
            .flat_map(|set| set.rules.iter())
    }

    /// Rules applied to every table.
    pub fn generic_rules(&self) -> &[Rule] {
        &self.generic
    }

    /// Routine variable used when wrapping blocks from `table`.
    pub fn variable_for(&self, table: &str) -> RoutineVariable {
        if self
            .list_tables
            .iter()
            .any(|t| t.eq_ignore_ascii_case(table))
        {
            RoutineVariable::LIST
        } else {
            RoutineVariable::SCALAR
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rule_table_column_match() {
        let registry = RuleRegistry::builtin();
        assert_eq!(registry.rules_for("rule", "sql_text").count(), 3);
        assert_eq!(registry.rules_for("RULE", "SQL_TEXT").count(), 3);
        assert_eq!(registry.rules_for("rule", "other_col").count(), 0);
    }

    #[test]
    fn test_table_only_sets_match_any_column() {
        let registry = RuleRegistry::builtin();
        assert_eq!(registry.rules_for("wf_step", "s.plsql_block").count(), 1);
        assert_eq!(registry.rules_for("imp_data_type", "sql_text").count(), 4);
    }

    #[test]
    fn test_unknown_table_has_no_context_rules() {
        let registry = RuleRegistry::builtin();
        assert_eq!(registry.rules_for("notif", "trackor_sql").count(), 0);
        assert_eq!(registry.generic_rules().len(), 2);
    }

    #[test]
    fn test_variable_shapes() {
        let registry = RuleRegistry::builtin();
        assert_eq!(registry.variable_for("rule"), RoutineVariable::SCALAR);
        assert_eq!(
            registry.variable_for("rule_class_param_value"),
            RoutineVariable::LIST
        );
        assert_eq!(
            RoutineVariable::SCALAR.declaration(),
            "v_ret_str varchar(1000)"
        );
        assert_eq!(RoutineVariable::LIST.declaration(), "v_ret_list text[]");
    }

    #[test]
    fn test_custom_registry() {
        let registry = RuleRegistry::empty().with_set(
            "report_sql",
            Some("sql_text"),
            vec![Rule::Fixed {
                keys: &[":report_id"],
                replacement: Replacement::Sentinel("-1"),
            }],
        );
        let rules: Vec<_> = registry.rules_for("report_sql", "r.sql_text").collect();
        assert_eq!(rules.len(), 1);
        assert!(registry.generic_rules().is_empty());
    }
}
