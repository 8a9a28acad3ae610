//! C source emitter for the native backend.
//!
//! The translation unit exports two symbols: the entry point
//! `double Main(void)` and a `const char[]` describing its calling shape,
//! which the loader checks before it transmutes the entry pointer.

use crate::ast::*;

/// Exported entry point of every generated unit.
pub const ENTRY_SYMBOL: &str = "Main";

/// Exported string naming the entry point's calling shape.
pub const SIGNATURE_SYMBOL: &str = "arith_signature";

/// `Main` takes nothing and returns an IEEE double.
pub const ENTRY_SIGNATURE: &str = "f64()";

/// Emit a complete translation unit evaluating `expr`.
pub fn generate(expr: &Expr) -> String {
    let mut out = String::new();
    out.push_str("/* generated by arith; do not edit */\n");
    out.push_str(&format!("const char {SIGNATURE_SYMBOL}[] = \"{ENTRY_SIGNATURE}\";\n"));
    out.push_str(&format!("double {ENTRY_SYMBOL}(void) {{\n"));
    out.push_str(&format!("    return {};\n", emit_expr(expr)));
    out.push_str("}\n");
    out
}

/// Emit `expr` as a single C expression of type `double`.
///
/// Every binary node is parenthesized, so the grouping of the tree never
/// depends on C's own precedence rules.
pub fn emit_expr(expr: &Expr) -> String {
    match expr {
        Expr::Number { value, .. } => emit_number(*value),
        Expr::Unary { op: UnaryOp::Negate, operand, .. } => format!("({}*-1)", emit_expr(operand)),
        Expr::Binary { op, left, right, .. } => {
            format!("({} {} {})", emit_expr(left), op.symbol(), emit_expr(right))
        }
    }
}

/// A literal that C reads back as exactly `value`.
fn emit_number(value: f64) -> String {
    if value.is_nan() {
        return "(0.0/0.0)".to_string();
    }
    if value.is_infinite() {
        return if value > 0.0 { "(1.0/0.0)".to_string() } else { "(-1.0/0.0)".to_string() };
    }
    // `{:?}` is the shortest round-tripping form and always carries a
    // fraction or exponent, so C types it as double.
    let lit = format!("{value:?}");
    if value.is_sign_negative() { format!("({lit})") } else { lit }
}
