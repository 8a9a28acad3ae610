use serde::{Deserialize, Serialize};

// ---- Span infrastructure ----

/// Byte range within source text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

impl Span {
    pub const UNKNOWN: Span = Span { start: 0, end: 0 };

    pub fn new(start: usize, end: usize) -> Self {
        Span { start, end }
    }

    pub fn merge(self, other: Span) -> Span {
        Span {
            start: self.start.min(other.start),
            end: self.end.max(other.end),
        }
    }
}

impl From<std::ops::Range<usize>> for Span {
    fn from(r: std::ops::Range<usize>) -> Self {
        Span { start: r.start, end: r.end }
    }
}

// ---- Core AST types ----

/// Expression tree. Children are owned exclusively; there is no sharing
/// between subtrees and no back-references.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Expr {
    /// Numeric literal: `1`, `2.5`, `1_000`
    Number {
        value: f64,
        #[serde(skip)]
        span: Span,
    },

    /// Prefix negation: `-expr`
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
        #[serde(skip)]
        span: Span,
    },

    /// Infix arithmetic: `left op right`
    Binary {
        op: BinOp,
        left: Box<Expr>,
        right: Box<Expr>,
        #[serde(skip)]
        span: Span,
    },
}

impl Expr {
    pub fn number(value: f64) -> Self {
        Expr::Number { value, span: Span::UNKNOWN }
    }

    pub fn negate(operand: Expr) -> Self {
        Expr::Unary { op: UnaryOp::Negate, operand: Box::new(operand), span: Span::UNKNOWN }
    }

    pub fn binary(op: BinOp, left: Expr, right: Expr) -> Self {
        Expr::Binary { op, left: Box::new(left), right: Box::new(right), span: Span::UNKNOWN }
    }

    pub fn span(&self) -> Span {
        match self {
            Expr::Number { span, .. } | Expr::Unary { span, .. } | Expr::Binary { span, .. } => *span,
        }
    }

    /// Structural equality ignoring spans.
    pub fn same_shape(&self, other: &Expr) -> bool {
        match (self, other) {
            (Expr::Number { value: a, .. }, Expr::Number { value: b, .. }) => a.to_bits() == b.to_bits(),
            (
                Expr::Unary { op: oa, operand: a, .. },
                Expr::Unary { op: ob, operand: b, .. },
            ) => oa == ob && a.same_shape(b),
            (
                Expr::Binary { op: oa, left: la, right: ra, .. },
                Expr::Binary { op: ob, left: lb, right: rb, .. },
            ) => oa == ob && la.same_shape(lb) && ra.same_shape(rb),
            _ => false,
        }
    }

    /// Number of literals in the tree (one constant pool slot each).
    pub fn literal_count(&self) -> usize {
        match self {
            Expr::Number { .. } => 1,
            Expr::Unary { operand, .. } => operand.literal_count(),
            Expr::Binary { left, right, .. } => left.literal_count() + right.literal_count(),
        }
    }
}

/// Fully parenthesized rendering, used by `--debug` and test failure output.
impl std::fmt::Display for Expr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Expr::Number { value, .. } => write!(f, "{value}"),
            Expr::Unary { op, operand, .. } => write!(f, "{op}{operand}"),
            Expr::Binary { op, left, right, .. } => write!(f, "({left} {op} {right})"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BinOp {
    Add,
    Subtract,
    Multiply,
    Divide,
}

impl BinOp {
    pub fn symbol(self) -> char {
        match self {
            BinOp::Add => '+',
            BinOp::Subtract => '-',
            BinOp::Multiply => '*',
            BinOp::Divide => '/',
        }
    }

    pub fn apply(self, lhs: f64, rhs: f64) -> f64 {
        match self {
            BinOp::Add => lhs + rhs,
            BinOp::Subtract => lhs - rhs,
            BinOp::Multiply => lhs * rhs,
            BinOp::Divide => lhs / rhs,
        }
    }
}

impl std::fmt::Display for BinOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.symbol())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnaryOp {
    Negate,
}

impl std::fmt::Display for UnaryOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UnaryOp::Negate => write!(f, "-"),
        }
    }
}

/// Every top-level expression found in one input, in source order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Program {
    pub expressions: Vec<Expr>,
}
