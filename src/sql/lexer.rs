//! Lightweight SQL / PL/SQL tokenizer.
//!
//! The lexer does not understand grammar. It only knows where strings,
//! comments, identifiers and placeholders begin and end, which is all the
//! classifier and the neutralizer need. Concatenating the text of every
//! token reproduces the input exactly.

/// Kind of a lexical token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    Whitespace,
    LineComment,
    BlockComment,
    /// Any string literal: `'..'`, `E'..'`, `q'[..]'`, `$tag$..$tag$`.
    String,
    QuotedIdent,
    Word,
    Number,
    /// `:name`, `:[NAME]`, `:1`, `$1` or `?`.
    Placeholder,
    /// Text macro such as `[DATE_FORMAT]`.
    Macro,
    /// `:=`
    Assign,
    /// `::`
    Cast,
    Punct,
}

/// A token borrowing its text from the source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Token<'a> {
    pub kind: TokenKind,
    pub text: &'a str,
    pub start: usize,
}

impl<'a> Token<'a> {
    /// Whitespace and comments.
    pub fn is_trivia(&self) -> bool {
        matches!(
            self.kind,
            TokenKind::Whitespace | TokenKind::LineComment | TokenKind::BlockComment
        )
    }

    /// True when this is the given keyword (case-insensitive).
    pub fn is_word(&self, word: &str) -> bool {
        self.kind == TokenKind::Word && self.text.eq_ignore_ascii_case(word)
    }

    /// True when this is the given punctuation character.
    pub fn is_punct(&self, c: char) -> bool {
        self.kind == TokenKind::Punct && self.text.len() == c.len_utf8() && self.text.starts_with(c)
    }

    /// Lower-cased placeholder or macro key, e.g. `:status`, `:[user_id]`, `[date_format]`.
    pub fn key(&self) -> Option<String> {
        match self.kind {
            TokenKind::Placeholder | TokenKind::Macro => Some(self.text.to_ascii_lowercase()),
            _ => None,
        }
    }

    /// Byte offset just past the token.
    pub fn end(&self) -> usize {
        self.start + self.text.len()
    }
}

/// Splits `input` into tokens.
pub fn tokenize(input: &str) -> Vec<Token<'_>> {
    let mut lexer = Lexer {
        src: input,
        bytes: input.as_bytes(),
        pos: 0,
    };
    let mut tokens = Vec::new();
    while lexer.pos < lexer.bytes.len() {
        let start = lexer.pos;
        let prev = tokens.iter().rev().find(|t: &&Token<'_>| !t.is_trivia()).copied();
        let kind = lexer.next_kind(prev.as_ref());
        tokens.push(Token {
            kind,
            text: &input[start..lexer.pos],
            start,
        });
    }
    tokens
}

/// Indices of the non-trivia tokens.
pub fn significant(tokens: &[Token<'_>]) -> Vec<usize> {
    tokens
        .iter()
        .enumerate()
        .filter(|(_, t)| !t.is_trivia())
        .map(|(i, _)| i)
        .collect()
}

/// True if the text has nothing but whitespace and comments.
pub fn is_blank(input: &str) -> bool {
    tokenize(input).iter().all(Token::is_trivia)
}

fn is_ident_start(b: u8) -> bool {
    b.is_ascii_alphabetic() || b == b'_' || b >= 0x80
}

fn is_ident_char(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_' || b == b'$' || b == b'#' || b >= 0x80
}

struct Lexer<'a> {
    src: &'a str,
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Lexer<'a> {
    fn peek(&self, offset: usize) -> Option<u8> {
        self.bytes.get(self.pos + offset).copied()
    }

    fn next_kind(&mut self, prev: Option<&Token<'_>>) -> TokenKind {
        let b = self.bytes[self.pos];
        match b {
            _ if b.is_ascii_whitespace() => {
                self.eat_while(|b| b.is_ascii_whitespace());
                TokenKind::Whitespace
            }
            b'-' if self.peek(1) == Some(b'-') => {
                self.eat_while(|b| b != b'\n');
                TokenKind::LineComment
            }
            b'/' if self.peek(1) == Some(b'*') => {
                self.pos += 2;
                self.eat_until("*/");
                TokenKind::BlockComment
            }
            b'\'' => {
                self.pos += 1;
                self.eat_quoted(b'\'', false);
                TokenKind::String
            }
            b'"' => {
                self.pos += 1;
                self.eat_quoted(b'"', false);
                TokenKind::QuotedIdent
            }
            b'q' | b'Q' if self.peek(1) == Some(b'\'') && self.peek(2).is_some() => {
                self.eat_alternative_quote();
                TokenKind::String
            }
            b'e' | b'E' if self.peek(1) == Some(b'\'') => {
                self.pos += 2;
                self.eat_quoted(b'\'', true);
                TokenKind::String
            }
            b'$' => self.lex_dollar(),
            b':' => self.lex_colon(),
            b'?' => {
                self.pos += 1;
                TokenKind::Placeholder
            }
            b'[' if self.macro_allowed(prev) => self.lex_macro(),
            _ if is_ident_start(b) => {
                self.eat_while(is_ident_char);
                TokenKind::Word
            }
            _ if b.is_ascii_digit() => {
                self.eat_while(|b| b.is_ascii_alphanumeric() || b == b'.');
                TokenKind::Number
            }
            _ => {
                self.pos += 1;
                TokenKind::Punct
            }
        }
    }

    fn eat_while(&mut self, pred: impl Fn(u8) -> bool) {
        while let Some(b) = self.peek(0) {
            if !pred(b) {
                break;
            }
            self.pos += 1;
        }
    }

    /// Advances past `terminator`, or to the end of input when it is missing.
    fn eat_until(&mut self, terminator: &str) {
        match self.src[self.pos..].find(terminator) {
            Some(offset) => self.pos += offset + terminator.len(),
            None => self.pos = self.bytes.len(),
        }
    }

    /// Consumes the body of a quoted token whose opening quote is already eaten.
    /// A doubled quote is an escaped quote.
    fn eat_quoted(&mut self, quote: u8, backslash_escapes: bool) {
        while let Some(b) = self.peek(0) {
            self.pos += 1;
            if backslash_escapes && b == b'\\' {
                if self.peek(0).is_some() {
                    self.pos += 1;
                }
            } else if b == quote {
                if self.peek(0) == Some(quote) {
                    self.pos += 1;
                } else {
                    return;
                }
            }
        }
    }

    /// `q'[...]'` style literal.
    fn eat_alternative_quote(&mut self) {
        self.pos += 2;
        let open = self.bytes[self.pos];
        let close = match open {
            b'[' => b']',
            b'{' => b'}',
            b'(' => b')',
            b'<' => b'>',
            other => other,
        };
        self.pos += 1;
        while let Some(b) = self.peek(0) {
            self.pos += 1;
            if b == close && self.peek(0) == Some(b'\'') {
                self.pos += 1;
                return;
            }
        }
    }

    fn lex_dollar(&mut self) -> TokenKind {
        if self.peek(1).is_some_and(|b| b.is_ascii_digit()) {
            self.pos += 1;
            self.eat_while(|b| b.is_ascii_digit());
            return TokenKind::Placeholder;
        }
        // $tag$ ... $tag$
        let rest = &self.bytes[self.pos + 1..];
        let tag_len = rest
            .iter()
            .take_while(|b| b.is_ascii_alphanumeric() || **b == b'_')
            .count();
        if rest.get(tag_len) == Some(&b'$') {
            let delimiter = &self.src[self.pos..self.pos + tag_len + 2];
            self.pos += delimiter.len();
            self.eat_until(delimiter);
            TokenKind::String
        } else {
            self.pos += 1;
            TokenKind::Punct
        }
    }

    fn lex_colon(&mut self) -> TokenKind {
        match self.peek(1) {
            Some(b'=') => {
                self.pos += 2;
                TokenKind::Assign
            }
            Some(b':') => {
                self.pos += 2;
                TokenKind::Cast
            }
            Some(b'[') => {
                let rest = &self.src[self.pos + 2..];
                match rest.find(']') {
                    Some(close) if rest[..close].bytes().all(is_ident_char) && close > 0 => {
                        self.pos += close + 3;
                        TokenKind::Placeholder
                    }
                    _ => {
                        self.pos += 1;
                        TokenKind::Punct
                    }
                }
            }
            Some(b) if is_ident_start(b) || b.is_ascii_digit() => {
                self.pos += 1;
                self.eat_while(is_ident_char);
                TokenKind::Placeholder
            }
            _ => {
                self.pos += 1;
                TokenKind::Punct
            }
        }
    }

    /// `arr[i]` is a subscript, `[NAME]` after an operator or keyword is a macro.
    fn macro_allowed(&self, prev: Option<&Token<'_>>) -> bool {
        !matches!(
            prev,
            Some(t) if matches!(
                t.kind,
                TokenKind::Word | TokenKind::QuotedIdent | TokenKind::Placeholder | TokenKind::Macro
            ) || t.is_punct(')') || t.is_punct(']')
        ) || prev.is_some_and(|t| t.kind == TokenKind::Word && is_keyword_before_macro(t.text))
    }

    fn lex_macro(&mut self) -> TokenKind {
        let rest = &self.src[self.pos + 1..];
        match rest.find(']') {
            Some(close)
                if close > 0
                    && is_ident_start(rest.as_bytes()[0])
                    && rest[..close].bytes().all(is_ident_char) =>
            {
                self.pos += close + 2;
                TokenKind::Macro
            }
            _ => {
                self.pos += 1;
                TokenKind::Punct
            }
        }
    }
}

/// Keywords after which `[NAME]` is still a macro rather than a subscript.
fn is_keyword_before_macro(word: &str) -> bool {
    const KEYWORDS: &[&str] = &[
        "select", "from", "where", "and", "or", "by", "on", "as", "set", "into", "then", "else",
        "when", "return", "not", "in", "is", "like", "join", "table",
    ];
    KEYWORDS.iter().any(|k| word.eq_ignore_ascii_case(k))
}
