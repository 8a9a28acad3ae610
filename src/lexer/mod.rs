use logos::Logos;

use crate::ast::Span;

#[derive(Logos, Debug, PartialEq, Clone, Copy)]
#[logos(skip r"[ \t\r\n\f]+")]
#[logos(skip(r"#[^\n]*", allow_greedy = true))]
pub enum Token {
    #[token("+")]
    Plus,
    #[token("-")]
    Minus,
    #[token("*")]
    Star,
    #[token("/")]
    Slash,
    #[token("(")]
    LParen,
    #[token(")")]
    RParen,

    // `_` separates digit groups and is dropped before parsing: 1_000 == 1000
    #[regex(r"[0-9][0-9_]*(\.[0-9_]*)?", |lex| parse_number(lex.slice()))]
    Number(f64),

    /// Input no other token matches. Produced by [`tokenize`] in place of a
    /// [`LexError`] so the parser can fail only the expression it sits in.
    Invalid,
}

impl Token {
    /// Whether an expression may begin with this token. Used by the parser to
    /// resynchronize after an error.
    pub fn starts_expr(&self) -> bool {
        matches!(self, Token::Number(_) | Token::LParen | Token::Minus)
    }
}

impl std::fmt::Display for Token {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Token::Plus => write!(f, "'+'"),
            Token::Minus => write!(f, "'-'"),
            Token::Star => write!(f, "'*'"),
            Token::Slash => write!(f, "'/'"),
            Token::LParen => write!(f, "'('"),
            Token::RParen => write!(f, "')'"),
            Token::Number(n) => write!(f, "number {n}"),
            Token::Invalid => write!(f, "unrecognized input"),
        }
    }
}

fn parse_number(raw: &str) -> Option<f64> {
    if raw.ends_with('_') || raw.contains("_.") {
        return None;
    }
    raw.replace('_', "").parse::<f64>().ok()
}

/// Lex source text into tokens with their byte spans, failing on the first
/// unrecognized input.
pub fn lex(source: &str) -> Result<Vec<(Token, Span)>, LexError> {
    let (tokens, mut errors) = tokenize(source);
    if errors.is_empty() {
        return Ok(tokens);
    }
    Err(errors.swap_remove(0))
}

/// Lex the whole source. Unrecognized input becomes a [`Token::Invalid`] at
/// its span, with a matching [`LexError`] in the second list.
pub fn tokenize(source: &str) -> (Vec<(Token, Span)>, Vec<LexError>) {
    let mut lexer = Token::lexer(source);
    let mut tokens = Vec::new();
    let mut errors = Vec::new();

    while let Some(result) = lexer.next() {
        let span = lexer.span();
        match result {
            Ok(token) => tokens.push((token, Span::from(span))),
            Err(()) => {
                let snippet = source[span.clone()].to_string();
                errors.push(LexError { position: span.start, suggestion: suggest_fix(&snippet), snippet });
                tokens.push((Token::Invalid, Span::from(span)));
            }
        }
    }

    (tokens, errors)
}

fn suggest_fix(bad_token: &str) -> String {
    let first = bad_token.chars().next();
    if first.is_some_and(|c| c.is_ascii_digit()) {
        format!("Malformed number '{bad_token}'. Digit separators '_' must sit between digits.")
    } else if first.is_some_and(|c| c == 'x' || c == '×') {
        "Use '*' for multiplication.".to_string()
    } else if first.is_some_and(|c| c == '÷' || c == ':') {
        "Use '/' for division.".to_string()
    } else {
        format!("Unexpected character(s): '{bad_token}'. Only numbers, + - * / and parentheses are allowed.")
    }
}

#[derive(Debug, thiserror::Error)]
#[error("Lex error at position {position}: '{snippet}'. {suggestion}")]
pub struct LexError {
    pub position: usize,
    pub snippet: String,
    pub suggestion: String,
}
