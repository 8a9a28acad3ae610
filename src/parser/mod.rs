use crate::ast::*;
use crate::lexer::Token;

/// Deepest nesting one expression may have, counting open parentheses,
/// negations and the height of operator chains. Every pass over the tree
/// recurses once per level, so this bounds their stack use too.
pub const MAX_NESTING: usize = 256;

/// Recursive-descent parser over a token stream. Yields one top-level
/// expression at a time; several may sit side by side in one input
/// (`1+2 3*4` is two expressions).
pub struct Parser {
    tokens: Vec<(Token, Span)>,
    pos: usize,
    /// Open parentheses in the expression currently being parsed.
    depth: usize,
    /// Parentheses and negations the parser is currently inside.
    nesting: usize,
    eof_span: Span,
}

#[derive(Debug, Clone, thiserror::Error)]
#[error("Parse error at token {position}: {message}")]
pub struct ParseError {
    pub code: &'static str,
    pub position: usize,
    pub span: Span,
    pub message: String,
}

type Result<T> = std::result::Result<T, ParseError>;

/// A parsed subtree and its height (a bare number is 0).
type Parsed = (Expr, usize);

impl Parser {
    pub fn new(tokens: Vec<(Token, Span)>) -> Self {
        let end = tokens.last().map(|(_, s)| s.end).unwrap_or(0);
        Parser { tokens, pos: 0, depth: 0, nesting: 0, eof_span: Span::new(end, end) }
    }

    fn peek(&self) -> Option<Token> {
        self.tokens.get(self.pos).map(|(t, _)| *t)
    }

    fn peek_span(&self) -> Span {
        self.tokens.get(self.pos).map(|(_, s)| *s).unwrap_or(self.eof_span)
    }

    fn advance(&mut self) -> Option<(Token, Span)> {
        let tok = self.tokens.get(self.pos).copied();
        if tok.is_some() {
            self.pos += 1;
        }
        tok
    }

    /// Consume the current token if it is one of `kinds`.
    fn match_any(&mut self, kinds: &[Token]) -> Option<(Token, Span)> {
        match self.peek() {
            Some(tok) if kinds.contains(&tok) => self.advance(),
            _ => None,
        }
    }

    fn error(&self, code: &'static str, message: String) -> ParseError {
        ParseError { code, position: self.pos, span: self.peek_span(), message }
    }

    fn at_end(&self) -> bool {
        self.pos >= self.tokens.len()
    }

    // ---- Top-level parsing ----

    /// Parse the next top-level expression. `None` once input is exhausted.
    pub fn next_expr(&mut self) -> Option<Result<Expr>> {
        if self.at_end() {
            return None;
        }
        let start = self.pos;
        self.depth = 0;
        self.nesting = 0;
        match self.expression() {
            Ok((expr, _)) => Some(Ok(expr)),
            Err(e) => {
                self.recover(start);
                Some(Err(e))
            }
        }
    }

    /// Collect every expression, reporting each malformed one separately.
    pub fn parse_program(&mut self) -> (Program, Vec<ParseError>) {
        let mut expressions = Vec::new();
        let mut errors = Vec::new();
        const MAX_ERRORS: usize = 20;

        while let Some(result) = self.next_expr() {
            match result {
                Ok(expr) => expressions.push(expr),
                Err(e) => {
                    errors.push(e);
                    if errors.len() >= MAX_ERRORS {
                        break;
                    }
                }
            }
        }

        (Program { expressions }, errors)
    }

    /// Skip to the next token that can begin an expression outside any
    /// parentheses left open by the failed one.
    fn recover(&mut self, start: usize) {
        while let Some(tok) = self.peek() {
            if self.depth == 0 && tok.starts_expr() && self.pos > start {
                return;
            }
            match tok {
                Token::LParen => self.depth += 1,
                Token::RParen => self.depth = self.depth.saturating_sub(1),
                _ => {}
            }
            self.advance();
        }
    }

    /// Report an over-deep expression and consume the rest of it, so the
    /// next expression starts where this one really ends. `want_operand`
    /// says whether the current token sits where an operand belongs.
    fn too_deep(&mut self, mut want_operand: bool) -> ParseError {
        let err = self.error("ARITH-P005", format!("expression nested more than {MAX_NESTING} levels deep"));
        while let Some(tok) = self.peek() {
            if self.depth == 0 && !want_operand && matches!(tok, Token::Number(_) | Token::LParen) {
                break;
            }
            match tok {
                Token::LParen => {
                    self.depth += 1;
                    want_operand = true;
                }
                Token::RParen => {
                    self.depth = self.depth.saturating_sub(1);
                    want_operand = false;
                }
                Token::Number(_) | Token::Invalid => want_operand = false,
                Token::Plus | Token::Minus | Token::Star | Token::Slash => want_operand = true,
            }
            self.advance();
        }
        err
    }

    fn enter(&mut self) -> Result<()> {
        if self.nesting >= MAX_NESTING {
            return Err(self.too_deep(true));
        }
        self.nesting += 1;
        Ok(())
    }

    fn binary(&mut self, op: BinOp, (left, lh): Parsed, (right, rh): Parsed) -> Result<Parsed> {
        let height = lh.max(rh) + 1;
        if height > MAX_NESTING {
            return Err(self.too_deep(false));
        }
        let span = left.span().merge(right.span());
        Ok((Expr::Binary { op, left: Box::new(left), right: Box::new(right), span }, height))
    }

    // ---- Expressions ----

    fn expression(&mut self) -> Result<Parsed> {
        self.term()
    }

    /// `factor (('+' | '-') factor)*`
    fn term(&mut self) -> Result<Parsed> {
        let mut lhs = self.factor()?;
        while let Some((tok, _)) = self.match_any(&[Token::Plus, Token::Minus]) {
            let op = if tok == Token::Plus { BinOp::Add } else { BinOp::Subtract };
            let rhs = self.factor()?;
            lhs = self.binary(op, lhs, rhs)?;
        }
        Ok(lhs)
    }

    /// `unary (('*' | '/') unary)*`
    fn factor(&mut self) -> Result<Parsed> {
        let mut lhs = self.unary()?;
        while let Some((tok, _)) = self.match_any(&[Token::Star, Token::Slash]) {
            let op = if tok == Token::Star { BinOp::Multiply } else { BinOp::Divide };
            let rhs = self.unary()?;
            lhs = self.binary(op, lhs, rhs)?;
        }
        Ok(lhs)
    }

    /// `'-' unary | primary`
    fn unary(&mut self) -> Result<Parsed> {
        if self.peek() != Some(Token::Minus) {
            return self.primary();
        }
        self.enter()?;
        let span = self.peek_span();
        self.advance();
        let (operand, height) = self.unary()?;
        self.nesting -= 1;
        if height >= MAX_NESTING {
            return Err(self.too_deep(false));
        }
        let span = span.merge(operand.span());
        Ok((Expr::Unary { op: UnaryOp::Negate, operand: Box::new(operand), span }, height + 1))
    }

    /// `number | '(' expression ')'`
    fn primary(&mut self) -> Result<Parsed> {
        match self.peek() {
            Some(Token::Number(value)) => {
                let span = self.peek_span();
                self.advance();
                Ok((Expr::Number { value, span }, 0))
            }
            Some(Token::LParen) => {
                self.enter()?;
                self.advance();
                self.depth += 1;
                let inner = self.expression()?;
                match self.peek() {
                    Some(Token::RParen) => {
                        self.advance();
                        self.depth -= 1;
                        self.nesting -= 1;
                        Ok(inner)
                    }
                    Some(tok) => Err(self.error("ARITH-P003", format!("expected ')', got {tok}"))),
                    None => Err(self.error("ARITH-P004", "expected ')', got end of input".into())),
                }
            }
            Some(Token::Invalid) => Err(self.error("ARITH-L001", "unrecognized input".into())),
            Some(tok) => Err(self.error("ARITH-P001", format!("expected expression, got {tok}"))),
            None => Err(self.error("ARITH-P002", "expected expression, got end of input".into())),
        }
    }
}

impl Iterator for Parser {
    type Item = Result<Expr>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_expr()
    }
}

/// Parse a token stream into a program plus one error per malformed expression.
pub fn parse(tokens: Vec<(Token, Span)>) -> (Program, Vec<ParseError>) {
    Parser::new(tokens).parse_program()
}
