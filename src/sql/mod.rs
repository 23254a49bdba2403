//! SQL text handling: tokenizer, statement classifier and token-level rewrites.

pub mod classifier;
pub mod lexer;
pub mod rewrite;

pub use classifier::{ClassifiedStatement, StatementClassifier};
pub use lexer::{tokenize, Token, TokenKind};
