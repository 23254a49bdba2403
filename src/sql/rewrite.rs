//! Token-level text rewrites shared by the classifier, the neutralizer and
//! the catalog loader.

use super::lexer::{self, Token, TokenKind};

/// Rebuilds `input`, letting `f` replace individual tokens.
pub fn replace_tokens<'a>(
    tokens: &[Token<'a>],
    mut f: impl FnMut(&Token<'a>) -> Option<String>,
) -> String {
    let mut out = String::new();
    for token in tokens {
        match f(token) {
            Some(replacement) => out.push_str(&replacement),
            None => out.push_str(token.text),
        }
    }
    out
}

/// Trims surrounding whitespace, trailing comments, a SQL*Plus `/` line and
/// one trailing `;`.
pub fn strip_terminator(text: &str) -> String {
    let tokens = lexer::tokenize(text.trim_start());
    let mut end = tokens.len();

    let skip_trivia = |end: &mut usize| {
        while *end > 0 && tokens[*end - 1].is_trivia() {
            *end -= 1;
        }
    };

    skip_trivia(&mut end);
    if end > 0 && tokens[end - 1].is_punct('/') {
        end -= 1;
        skip_trivia(&mut end);
    }
    if end > 0 && tokens[end - 1].is_punct(';') {
        end -= 1;
        skip_trivia(&mut end);
    }

    tokens[..end].iter().map(|t| t.text).collect()
}

/// Query normalization: positional `?` becomes `:p` and a top-level
/// `INTO` target list is removed from `select` statements.
pub fn normalize_query(text: &str) -> String {
    let tokens = lexer::tokenize(text);
    let into = into_clause_range(&tokens);

    let mut out = String::with_capacity(text.len());
    for (i, token) in tokens.iter().enumerate() {
        if into.as_ref().is_some_and(|range| range.contains(&i)) {
            continue;
        }
        if token.kind == TokenKind::Placeholder && token.text == "?" {
            out.push_str(":p");
        } else {
            out.push_str(token.text);
        }
    }
    out
}

/// Token range from a top-level `into` up to (not including) the next
/// top-level `from`, in a statement that starts with `select`.
fn into_clause_range(tokens: &[Token<'_>]) -> Option<std::ops::Range<usize>> {
    let first = tokens.iter().find(|t| !t.is_trivia())?;
    if !first.is_word("select") {
        return None;
    }
    let mut depth = 0i32;
    let mut start = None;
    for (i, token) in tokens.iter().enumerate() {
        if token.is_punct('(') {
            depth += 1;
        } else if token.is_punct(')') {
            depth -= 1;
        } else if depth == 0 && token.is_word("into") && start.is_none() {
            start = Some(i);
        } else if depth == 0 && token.is_word("from") {
            return start.map(|s| s..i);
        }
    }
    None
}

/// Replaces placeholders and macros with parseable literals.
/// Only used to feed the strict parser; never sent to the database.
pub fn mask_placeholders(text: &str) -> String {
    let tokens = lexer::tokenize(text);
    replace_tokens(&tokens, |t| match t.kind {
        TokenKind::Placeholder | TokenKind::Macro => Some("0".to_string()),
        _ => None,
    })
}

/// The `from` and `where` parts of a simple `select ... from X [where Y]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectParts {
    pub from_clause: String,
    pub predicate: Option<String>,
}

/// Splits a select statement at its top-level `from` and `where` keywords.
pub fn select_parts(select: &str) -> Option<SelectParts> {
    let trimmed = strip_terminator(select);
    let tokens = lexer::tokenize(&trimmed);
    let mut depth = 0i32;
    let mut from = None;
    let mut where_at = None;
    for (i, token) in tokens.iter().enumerate() {
        if token.is_punct('(') {
            depth += 1;
        } else if token.is_punct(')') {
            depth -= 1;
        } else if depth == 0 && from.is_none() && token.is_word("from") {
            from = Some(i);
        } else if depth == 0 && from.is_some() && token.is_word("where") {
            where_at = Some(i);
            break;
        }
    }

    let from = from?;
    let join = |range: &[Token<'_>]| -> String {
        range.iter().map(|t| t.text).collect::<String>().trim().to_string()
    };
    let from_clause = match where_at {
        Some(w) => join(&tokens[from + 1..w]),
        None => join(&tokens[from + 1..]),
    };
    if from_clause.is_empty() {
        return None;
    }
    let predicate = where_at
        .map(|w| join(&tokens[w + 1..]))
        .filter(|p| !p.is_empty());

    Some(SelectParts {
        from_clause,
        predicate,
    })
}
