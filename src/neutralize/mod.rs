//! Bind-variable neutralization.
//!
//! Rewrites every placeholder in a fragment into a literal so the fragment
//! compiles without runtime input. All replacement goes through the lexer,
//! so placeholders inside strings and comments are never touched.
//!
//! Precedence for a placeholder, highest first:
//! 1. target of `:=`, which becomes the routine variable
//! 2. context rules for the table (lookups, fixed names, sentinels)
//! 3. generic fixed markers
//! 4. the literal `0`
//!
//! A `to_date(:x, 'mm/dd/yyyy')` call is replaced as a whole before any of
//! the above.

pub mod rules;

pub use rules::{Replacement, RoutineVariable, Rule, RuleRegistry, VariableShape};

use crate::db::OwnerSource;
use crate::sql::lexer::{self, Token, TokenKind};
use regex::Regex;
use std::collections::{BTreeSet, HashMap};
use std::sync::OnceLock;
use thiserror::Error;
use tracing::debug;

/// Literal call substituted for date conversions of a placeholder.
pub const DATE_LITERAL_CALL: &str = "to_date('01/01/1990','MM/DD/YYYY')";

/// Catch-all replacement.
const DEFAULT_LITERAL: &str = "0";

/// A fragment with every placeholder replaced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NeutralizedStatement {
    pub text: String,
    /// Lower-cased keys of the placeholders and macros that were replaced.
    pub substituted: BTreeSet<String>,
}

/// An auxiliary lookup needed for neutralization failed.
#[derive(Debug, Error)]
#[error("Cannot resolve bind variables for {table} {entity_id}: {message}")]
pub struct NeutralizationError {
    pub table: String,
    pub entity_id: String,
    pub message: String,
}

/// Table-aware placeholder rewriter.
pub struct Neutralizer<'a> {
    owner: &'a dyn OwnerSource,
    registry: &'a RuleRegistry,
}

impl<'a> Neutralizer<'a> {
    pub fn new(owner: &'a dyn OwnerSource, registry: &'a RuleRegistry) -> Self {
        Self { owner, registry }
    }

    /// Neutralizes `text` taken from `table.column` of row `entity_id`.
    pub async fn neutralize(
        &self,
        text: &str,
        table: &str,
        column: &str,
        entity_id: &str,
    ) -> Result<NeutralizedStatement, NeutralizationError> {
        let variable = self.registry.variable_for(table);
        let tokens = lexer::tokenize(text);
        let has_markers = tokens
            .iter()
            .any(|t| matches!(t.kind, TokenKind::Placeholder | TokenKind::Macro));
        if !has_markers {
            return Ok(NeutralizedStatement {
                text: text.to_string(),
                substituted: BTreeSet::new(),
            });
        }

        let mut replacements = HashMap::new();
        for rule in self.registry.rules_for(table, column) {
            self.apply_rule(rule, &variable, entity_id, &mut replacements)
                .await
                .map_err(|message| NeutralizationError {
                    table: table.to_string(),
                    entity_id: entity_id.to_string(),
                    message,
                })?;
        }
        for rule in self.registry.generic_rules() {
            self.apply_rule(rule, &variable, entity_id, &mut replacements)
                .await
                .map_err(|message| NeutralizationError {
                    table: table.to_string(),
                    entity_id: entity_id.to_string(),
                    message,
                })?;
        }

        Ok(substitute(&tokens, &replacements, &variable))
    }

    /// Adds the rule's substitutions. Earlier rules win.
    async fn apply_rule(
        &self,
        rule: &Rule,
        variable: &RoutineVariable,
        entity_id: &str,
        replacements: &mut HashMap<String, String>,
    ) -> Result<(), String> {
        match rule {
            Rule::Lookup { sql } => {
                let names = self
                    .owner
                    .lookup_names(sql, entity_id)
                    .await
                    .map_err(|e| e.full_message())?;
                debug!("Lookup for {} returned {} names", entity_id, names.len());
                for name in names {
                    replacements
                        .entry(placeholder_key(&name))
                        .or_insert_with(|| DEFAULT_LITERAL.to_string());
                }
            }
            Rule::Fixed { keys, replacement } => {
                let value = match replacement {
                    Replacement::Zero => DEFAULT_LITERAL.to_string(),
                    Replacement::Sentinel(s) => (*s).to_string(),
                    Replacement::RoutineVariable => variable.name.to_string(),
                };
                for key in keys.iter() {
                    replacements
                        .entry((*key).to_string())
                        .or_insert_with(|| value.clone());
                }
            }
        }
        Ok(())
    }
}

/// `VALUE`, `:value` and `:VALUE` all map to `:value`.
fn placeholder_key(name: &str) -> String {
    let name = name.trim();
    if name.starts_with(':') || name.starts_with('[') {
        name.to_ascii_lowercase()
    } else {
        format!(":{}", name.to_ascii_lowercase())
    }
}

fn date_format_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)^'[my]{2}[/.][dm]{2}[/.]y{2,4}'$").expect("valid date format regex")
    })
}

/// Index of the next non-trivia token after `i`.
fn next_significant(tokens: &[Token<'_>], i: usize) -> Option<usize> {
    (i + 1..tokens.len()).find(|&j| !tokens[j].is_trivia())
}

/// If `tokens[i]` opens `to_date(<placeholder>, '<mm/dd/yyyy>')`, returns the
/// index of the closing parenthesis and the placeholder's key.
fn date_call_end(tokens: &[Token<'_>], i: usize) -> Option<(usize, String)> {
    if !tokens[i].is_word("to_date") {
        return None;
    }
    let open = next_significant(tokens, i).filter(|&j| tokens[j].is_punct('('))?;
    let arg = next_significant(tokens, open)
        .filter(|&j| tokens[j].kind == TokenKind::Placeholder)?;
    let comma = next_significant(tokens, arg).filter(|&j| tokens[j].is_punct(','))?;
    let format = next_significant(tokens, comma).filter(|&j| {
        tokens[j].kind == TokenKind::String && date_format_regex().is_match(tokens[j].text)
    })?;
    let close = next_significant(tokens, format).filter(|&j| tokens[j].is_punct(')'))?;
    Some((close, tokens[arg].text.to_ascii_lowercase()))
}

/// Applies the resolved replacements to a token stream.
pub fn substitute(
    tokens: &[Token<'_>],
    replacements: &HashMap<String, String>,
    variable: &RoutineVariable,
) -> NeutralizedStatement {
    let mut text = String::new();
    let mut substituted = BTreeSet::new();
    let mut i = 0;

    while i < tokens.len() {
        let token = &tokens[i];

        if let Some((end, key)) = date_call_end(tokens, i) {
            text.push_str(DATE_LITERAL_CALL);
            substituted.insert(key);
            i = end + 1;
            continue;
        }

        match token.kind {
            TokenKind::Placeholder => {
                let key = token.text.to_ascii_lowercase();
                let is_target = next_significant(tokens, i)
                    .is_some_and(|j| tokens[j].kind == TokenKind::Assign);
                let value = if is_target {
                    variable.name
                } else {
                    replacements
                        .get(&key)
                        .map(String::as_str)
                        .unwrap_or(DEFAULT_LITERAL)
                };
                text.push_str(value);
                substituted.insert(key);
            }
            TokenKind::Macro => match replacements.get(&token.text.to_ascii_lowercase()) {
                Some(value) => {
                    text.push_str(value);
                    substituted.insert(token.text.to_ascii_lowercase());
                }
                None => text.push_str(token.text),
            },
            _ => text.push_str(token.text),
        }
        i += 1;
    }

    NeutralizedStatement { text, substituted }
}
