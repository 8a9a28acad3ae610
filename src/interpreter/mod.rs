use crate::ast::*;

/// Evaluate a tree by direct recursion. The reference semantics the
/// bytecode and native backends are checked against.
pub fn eval(expr: &Expr) -> f64 {
    match expr {
        Expr::Number { value, .. } => *value,
        Expr::Unary { op: UnaryOp::Negate, operand, .. } => eval(operand) * -1.0,
        Expr::Binary { op, left, right, .. } => {
            let lhs = eval(left);
            let rhs = eval(right);
            op.apply(lhs, rhs)
        }
    }
}

/// Evaluate every expression of a program in order.
pub fn run(program: &Program) -> Vec<f64> {
    program.expressions.iter().map(eval).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer;
    use crate::parser;

    fn eval_str(source: &str) -> f64 {
        let (prog, errors) = parser::parse(lexer::lex(source).unwrap());
        assert!(errors.is_empty());
        eval(&prog.expressions[0])
    }

    #[test]
    fn interpret_basic_operators() {
        assert_eq!(eval_str("1+2"), 3.0);
        assert_eq!(eval_str("1-2"), -1.0);
        assert_eq!(eval_str("1/2"), 0.5);
        assert_eq!(eval_str("1*2"), 2.0);
    }

    #[test]
    fn interpret_precedence() {
        assert_eq!(eval_str("1-2*5"), -9.0);
        assert_eq!(eval_str("(1-2)*5"), -5.0);
        assert_eq!(eval_str("1+2+3"), 6.0);
    }

    #[test]
    fn interpret_negation() {
        assert_eq!(eval_str("-3"), -3.0);
        assert_eq!(eval_str("--3"), 3.0);
        assert_eq!(eval_str("-(2*3)"), -6.0);
    }

    #[test]
    fn interpret_division_by_zero_is_ieee() {
        assert_eq!(eval_str("1/0"), f64::INFINITY);
        assert!(eval_str("0/0").is_nan());
    }

    #[test]
    fn run_evaluates_each_expression() {
        let (prog, _) = parser::parse(lexer::lex("1+1 2*3 -4").unwrap());
        assert_eq!(run(&prog), vec![2.0, 2.0]);
    }
}
