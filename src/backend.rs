//! Backend selection and dispatch.

use std::fmt;
use std::str::FromStr;

use crate::ast::Expr;
use crate::interpreter;
use crate::jit::{Jit, JitError};
use crate::vm::{self, CompileError};

/// Which evaluator runs an expression.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum Backend {
    /// Walk the tree directly.
    Ast,
    /// Compile to register bytecode and interpret it.
    #[default]
    Vm,
    /// Build a native module with the C toolchain and call it.
    Jit,
}

impl Backend {
    pub const ALL: [Backend; 3] = [Backend::Ast, Backend::Vm, Backend::Jit];

    pub fn name(self) -> &'static str {
        match self {
            Backend::Ast => "ast",
            Backend::Vm => "vm",
            Backend::Jit => "jit",
        }
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown backend '{0}' (expected ast, vm or jit)")]
pub struct UnknownBackend(pub String);

impl FromStr for Backend {
    type Err = UnknownBackend;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Backend::ALL
            .into_iter()
            .find(|b| b.name().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| UnknownBackend(s.to_string()))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum EvalError {
    #[error(transparent)]
    Compile(#[from] CompileError),
    #[error(transparent)]
    Jit(#[from] JitError),
}

/// Evaluate `expr` on exactly the backend asked for. A failing backend
/// reports its error; nothing is retried elsewhere.
pub fn eval_with(backend: Backend, expr: &Expr, jit: &mut Jit) -> Result<f64, EvalError> {
    match backend {
        Backend::Ast => Ok(interpreter::eval(expr)),
        Backend::Vm => Ok(vm::compile_and_run(expr)?),
        Backend::Jit => Ok(jit.compile_and_run(expr)?),
    }
}
