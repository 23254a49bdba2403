//! Statement classification.
//!
//! Decides whether a fragment is a query, a procedural block, or neither.
//! Queries are validated with `sqlparser` first; fragments the parser
//! rejects fall back to token-level checks, since the database itself is the
//! final authority during the compile check.

use sqlparser::ast::Statement;
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;

use super::lexer::{self, Token, TokenKind};
use super::rewrite;

/// Classification of a fragment, carrying the text to be checked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClassifiedStatement {
    /// A single query. The text has its trailing `;` and any top-level
    /// `INTO` target list removed.
    Query(String),
    /// A procedural block, always starting with `declare` or `begin`.
    ProceduralBlock(String),
    /// Neither; the row is skipped.
    Indeterminate(String),
}

impl ClassifiedStatement {
    /// Short label used in log messages.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Query(_) => "query",
            Self::ProceduralBlock(_) => "block",
            Self::Indeterminate(_) => "indeterminate",
        }
    }
}

/// Classifies SQL fragments.
#[derive(Debug)]
pub struct StatementClassifier {
    dialect: PostgreSqlDialect,
}

impl Default for StatementClassifier {
    fn default() -> Self {
        Self::new()
    }
}

impl StatementClassifier {
    /// Creates a new statement classifier.
    pub fn new() -> Self {
        Self {
            dialect: PostgreSqlDialect {},
        }
    }

    /// Classifies `text`. Blank or comment-only text is indeterminate.
    pub fn classify(&self, text: &str) -> ClassifiedStatement {
        if lexer::is_blank(text) {
            return ClassifiedStatement::Indeterminate(text.to_string());
        }

        let trimmed = rewrite::strip_terminator(text);
        let opens_block = starts_with_any(&trimmed, &["declare", "begin"]);

        if !opens_block {
            let query = rewrite::normalize_query(&trimmed);
            if self.parses_as_query(&query) {
                return ClassifiedStatement::Query(query);
            }
            if is_lenient_query(&query) {
                return ClassifiedStatement::Query(query);
            }
        }

        let block = if opens_block {
            block_text(&trimmed)
        } else {
            format!("begin\n{}\nend;", block_text(&trimmed))
        };
        if is_procedural_block(&block) {
            return ClassifiedStatement::ProceduralBlock(block);
        }

        ClassifiedStatement::Indeterminate(text.to_string())
    }

    /// Strict check: exactly one statement and it is a query.
    fn parses_as_query(&self, query: &str) -> bool {
        let masked = rewrite::mask_placeholders(query);
        match Parser::parse_sql(&self.dialect, &masked) {
            Ok(statements) => {
                statements.len() == 1 && matches!(statements[0], Statement::Query(_))
            }
            Err(_) => false,
        }
    }
}

/// Procedural text keeps its final `;` (the query path strips it).
fn block_text(trimmed: &str) -> String {
    let mut block = trimmed.to_string();
    if !block.ends_with(';') {
        block.push(';');
    }
    block
}

fn starts_with_any(text: &str, words: &[&str]) -> bool {
    let tokens = lexer::tokenize(text);
    tokens
        .iter()
        .find(|t| !t.is_trivia())
        .is_some_and(|t| words.iter().any(|w| t.is_word(w)))
}

/// A single `select`/`with` statement the parser could not handle, e.g.
/// vendor syntax such as outer-join markers or hierarchical queries. The
/// text is spliced into a view body, so it must not close a parenthesis it
/// did not open or contain a statement separator.
fn is_lenient_query(query: &str) -> bool {
    let tokens = lexer::tokenize(query);
    let Some(first) = tokens.iter().find(|t| !t.is_trivia()) else {
        return false;
    };
    if !(first.is_word("select") || first.is_word("with")) {
        return false;
    }
    let mut depth = 0i32;
    for token in tokens.iter().filter(|t| !t.is_trivia()) {
        if token.is_punct('(') {
            depth += 1;
        } else if token.is_punct(')') {
            depth -= 1;
            if depth < 0 {
                return false;
            }
        } else if token.is_punct(';') {
            return false;
        }
    }
    depth == 0
}

/// Keywords that may open a procedural statement.
const STATEMENT_HEADS: &[&str] = &[
    "begin", "declare", "end", "if", "elsif", "elseif", "else", "loop", "for", "foreach", "while",
    "exit", "continue", "return", "null", "raise", "commit", "rollback", "savepoint", "select",
    "insert", "update", "delete", "merge", "with", "open", "fetch", "close", "execute", "perform",
    "case", "when", "exception", "goto", "pragma", "forall", "lock", "set", "call", "get",
    "assert", "move", "pipe", "then",
];

/// Keywords after which another statement head may follow directly.
const BLOCK_OPENERS: &[&str] = &["begin", "declare", "then", "else", "loop", "exception"];

/// Token-level check that `block` is a well-formed procedural block.
fn is_procedural_block(block: &str) -> bool {
    let tokens: Vec<Token<'_>> = lexer::tokenize(block)
        .into_iter()
        .filter(|t| !t.is_trivia())
        .collect();

    if !tokens.last().is_some_and(|t| t.is_punct(';')) {
        return false;
    }
    if !balanced_nesting(&tokens) {
        return false;
    }

    let mut in_declare = false;
    let mut paren_depth = 0i32;
    let mut statement: Vec<Token<'_>> = Vec::new();
    for token in tokens {
        if token.is_punct('(') {
            paren_depth += 1;
        } else if token.is_punct(')') {
            paren_depth -= 1;
        }
        if token.is_punct(';') && paren_depth == 0 {
            if statement.is_empty() {
                continue;
            }
            if !statement_head_ok(&statement, in_declare) {
                return false;
            }
            if statement.iter().any(|t| t.is_word("declare")) {
                in_declare = true;
            }
            if statement.iter().any(|t| t.is_word("begin")) {
                in_declare = false;
            }
            statement.clear();
        } else {
            statement.push(token);
        }
    }
    statement.is_empty()
}

/// `begin`/`case` must match `end`; `end if` and `end loop` close constructs
/// that are not counted. Parentheses must balance.
fn balanced_nesting(tokens: &[Token<'_>]) -> bool {
    let mut depth = 0i32;
    let mut parens = 0i32;
    let mut i = 0;
    while i < tokens.len() {
        let token = &tokens[i];
        if token.is_punct('(') {
            parens += 1;
        } else if token.is_punct(')') {
            parens -= 1;
            if parens < 0 {
                return false;
            }
        } else if token.is_word("begin") || token.is_word("case") {
            depth += 1;
        } else if token.is_word("end") {
            let next = tokens.get(i + 1);
            if next.is_some_and(|n| n.is_word("if") || n.is_word("loop")) {
                i += 2;
                continue;
            }
            depth -= 1;
            if depth < 0 {
                return false;
            }
            if next.is_some_and(|n| n.is_word("case")) {
                i += 2;
                continue;
            }
        }
        i += 1;
    }
    depth == 0 && parens == 0
}

fn statement_head_ok(statement: &[Token<'_>], in_declare: bool) -> bool {
    let mut rest = statement;
    loop {
        // `<<label>>` prefix
        if rest.len() >= 2 && rest[0].is_punct('<') && rest[1].is_punct('<') {
            match rest.iter().position(|t| t.is_punct('>')) {
                Some(close) if rest.get(close + 1).is_some_and(|t| t.is_punct('>')) => {
                    rest = &rest[close + 2..];
                    continue;
                }
                _ => return false,
            }
        }
        // Nested opener: `begin x := 1`, `else y := 2`
        match rest.first() {
            Some(first) if first.is_word("declare") => return true,
            Some(first) if rest.len() > 1 && BLOCK_OPENERS.iter().any(|w| first.is_word(w)) => {
                rest = &rest[1..];
            }
            _ => break,
        }
    }

    let Some(first) = rest.first() else {
        return true;
    };

    if first.kind == TokenKind::Word && STATEMENT_HEADS.iter().any(|w| first.is_word(w)) {
        return true;
    }
    if !matches!(
        first.kind,
        TokenKind::Word | TokenKind::QuotedIdent | TokenKind::Placeholder
    ) {
        return false;
    }
    if in_declare {
        return true;
    }

    // Identifier path `a.b.c` followed by `:=`, `(` or the end of the statement.
    let mut i = 1;
    while i + 1 < rest.len() && rest[i].is_punct('.') {
        i += 2;
    }
    match rest.get(i) {
        None => true,
        Some(t) => t.kind == TokenKind::Assign || t.is_punct('(') || t.is_punct('['),
    }
}
