//! Arithmetic expressions over `f64`, evaluated by walking the tree, by a
//! register bytecode VM, or by a native module built with the C toolchain.

pub mod ast;
pub mod backend;
pub mod codegen;
pub mod diagnostic;
pub mod interpreter;
pub mod jit;
pub mod lexer;
pub mod parser;
pub mod vm;

use tracing_subscriber::{EnvFilter, fmt};

/// Install the stderr log subscriber. `RUST_LOG` wins; otherwise warnings
/// only, or debug output for this crate when `debug` is set.
pub fn init_logging(debug: bool) {
    let default = if debug { "warn,arith=debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    // A second call (tests, embedding) keeps the first subscriber.
    let _ = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}
