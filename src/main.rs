use std::io::{IsTerminal, Read};
use std::path::PathBuf;
use std::process;
use std::time::Duration;

use clap::Parser as _;

use arith::ast::Expr;
use arith::backend::{self, Backend};
use arith::codegen;
use arith::diagnostic::{Diagnostic, ansi::AnsiRenderer, json};
use arith::jit::{Jit, JitConfig};
use arith::lexer;
use arith::parser::Parser;
use arith::vm;

#[derive(clap::Parser, Debug)]
#[command(name = "arith", version)]
#[command(about = "Evaluate arithmetic expressions with a tree-walker, a register VM or a native JIT")]
struct Args {
    /// Source file; `-` or nothing reads stdin
    #[arg(conflicts_with = "expr")]
    input: Option<PathBuf>,

    /// Evaluate this source text instead of a file
    #[arg(short, long)]
    expr: Option<String>,

    /// Evaluator to run
    #[arg(short, long, value_enum, default_value_t = Backend::Vm)]
    backend: Backend,

    /// Dump the AST, bytecode and generated C for each expression to stderr
    #[arg(long)]
    debug: bool,

    /// Report errors as one JSON object per line
    #[arg(long)]
    json: bool,

    /// C compiler for the jit backend (overrides ARITH_CC)
    #[arg(long, value_name = "PATH")]
    cc: Option<String>,

    /// Toolchain time limit in seconds (overrides ARITH_JIT_TIMEOUT)
    #[arg(long, value_name = "SECS")]
    timeout: Option<f64>,

    /// Keep evaluating after an expression fails
    #[arg(long)]
    keep_going: bool,

    /// Rebuild native modules even for repeated expressions
    #[arg(long)]
    no_cache: bool,
}

struct Reporter {
    json: bool,
    ansi: AnsiRenderer,
    source: String,
}

impl Reporter {
    fn report(&self, d: Diagnostic) {
        let d = d.with_source(self.source.clone());
        if self.json {
            eprintln!("{}", json::render(&d));
        } else {
            eprint!("{}", self.ansi.render(&d));
        }
    }
}

fn main() {
    let args = Args::parse();
    arith::init_logging(args.debug);

    let config = match jit_config(&args) {
        Ok(c) => c,
        Err(msg) => {
            eprintln!("arith: {msg}");
            process::exit(2);
        }
    };

    let source = match read_source(&args) {
        Ok(s) => s,
        Err(msg) => {
            eprintln!("arith: {msg}");
            process::exit(1);
        }
    };

    let use_color = !args.json && std::io::stderr().is_terminal() && std::env::var_os("NO_COLOR").is_none();
    let reporter = Reporter { json: args.json, ansi: AnsiRenderer { use_color }, source };

    let ok = run(&args, Jit::new(config), &reporter);
    if !ok {
        process::exit(1);
    }
}

fn jit_config(args: &Args) -> Result<JitConfig, String> {
    let mut config = JitConfig::from_env().map_err(|e| e.to_string())?;
    if let Some(cc) = &args.cc {
        config.compiler = cc.clone();
    }
    if let Some(secs) = args.timeout {
        if !secs.is_finite() || secs <= 0.0 {
            return Err(format!("invalid --timeout {secs}: must be a positive number of seconds"));
        }
        config.timeout = Duration::from_secs_f64(secs);
    }
    if args.no_cache {
        config.cache = false;
    }
    Ok(config)
}

fn read_source(args: &Args) -> Result<String, String> {
    if let Some(expr) = &args.expr {
        return Ok(expr.clone());
    }
    match &args.input {
        Some(path) if path.as_os_str() != "-" => {
            std::fs::read_to_string(path).map_err(|e| format!("error reading {}: {e}", path.display()))
        }
        _ => {
            let mut buf = String::new();
            std::io::stdin().read_to_string(&mut buf).map_err(|e| format!("error reading stdin: {e}"))?;
            Ok(buf)
        }
    }
}

/// Evaluate every expression in the source. `false` if anything failed.
fn run(args: &Args, mut jit: Jit, reporter: &Reporter) -> bool {
    let (tokens, lex_errors) = lexer::tokenize(&reporter.source);

    let mut ok = true;
    for result in Parser::new(tokens) {
        match result {
            Ok(expr) => {
                if args.debug {
                    dump(args.backend, &expr);
                }
                match backend::eval_with(args.backend, &expr, &mut jit) {
                    Ok(value) => println!("{value:.6}"),
                    Err(e) => {
                        reporter.report(Diagnostic::from(&e).with_span(expr.span(), "while evaluating this"));
                        ok = false;
                    }
                }
            }
            Err(e) => {
                // A parse error on unrecognized input is the lexer's to explain.
                let d = match lex_errors.iter().find(|l| l.position == e.span.start) {
                    Some(lex_error) => Diagnostic::from(lex_error),
                    None => Diagnostic::from(&e),
                };
                reporter.report(d);
                ok = false;
            }
        }
        if !ok && !args.keep_going {
            break;
        }
    }
    ok
}

fn dump(backend: Backend, expr: &Expr) {
    match serde_json::to_string_pretty(expr) {
        Ok(json) => eprintln!("ast:\n{json}"),
        Err(e) => eprintln!("ast: <unserializable: {e}>"),
    }
    match backend {
        Backend::Ast => {}
        Backend::Vm => {
            if let Ok((machine, code)) = vm::compile_expr(expr) {
                eprintln!("constants: {:?}", machine.constants());
                eprintln!("bytecode:");
                for line in vm::disassemble(&code) {
                    eprintln!("  {line}");
                }
            }
        }
        Backend::Jit => eprint!("c:\n{}", codegen::c::generate(expr)),
    }
}
