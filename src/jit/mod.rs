//! Native backend: emit C for an expression, build it into a shared
//! library with the host toolchain, load it and call its entry point.
//!
//! Every build happens in its own scratch directory, removed before
//! `compile` returns whatever the outcome. A loaded library stays mapped
//! after its file is gone, so callables outlive their scratch directory.

use std::collections::HashMap;
use std::ffi::{CStr, c_char};
use std::path::{Path, PathBuf};
use std::process::ExitStatus;
use std::sync::Arc;
use std::time::Duration;

use sha2::{Digest, Sha256};
use tracing::{debug, info, instrument, warn};

use crate::ast::Expr;
use crate::codegen::c::{self, ENTRY_SIGNATURE, ENTRY_SYMBOL, SIGNATURE_SYMBOL};

pub mod config;
mod toolchain;

pub use config::{ConfigError, JitConfig};

const SOURCE_FILE: &str = "jit_expr.c";
const SCRATCH_PREFIX: &str = "arith-jit-";

#[derive(Debug, thiserror::Error)]
pub enum JitError {
    #[error("I/O error at {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("could not run toolchain `{command}`: {source}")]
    ToolchainSpawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("lost track of toolchain `{command}`: {source}")]
    ToolchainWait {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error(
        "toolchain failed ({status}){}",
        .first_error.as_ref().map(|e| format!(": {e}")).unwrap_or_default()
    )]
    Toolchain {
        command: String,
        status: ExitStatus,
        /// Captured stdout followed by stderr.
        output: String,
        first_error: Option<String>,
    },

    #[error("toolchain `{command}` timed out after {timeout:?}")]
    ToolchainTimeout { command: String, timeout: Duration },

    #[error("failed to load module {}: {source}", .path.display())]
    Load {
        path: PathBuf,
        #[source]
        source: libloading::Error,
    },

    #[error("symbol `{symbol}` not found in {}: {source}", .path.display())]
    MissingSymbol {
        symbol: &'static str,
        path: PathBuf,
        #[source]
        source: libloading::Error,
    },

    #[error(
        "entry `{symbol}` has calling shape {}, expected {expected}",
        .found.as_deref().unwrap_or("<unknown>")
    )]
    SignatureMismatch {
        symbol: &'static str,
        expected: &'static str,
        found: Option<String>,
    },
}

impl JitError {
    /// Coarse failure class, stable for tooling.
    pub fn kind(&self) -> &'static str {
        match self {
            JitError::Io { .. } => "io",
            JitError::ToolchainSpawn { .. }
            | JitError::ToolchainWait { .. }
            | JitError::Toolchain { .. }
            | JitError::ToolchainTimeout { .. } => "toolchain",
            JitError::Load { .. } => "load",
            JitError::MissingSymbol { .. } | JitError::SignatureMismatch { .. } => "symbol",
        }
    }
}

type Result<T> = std::result::Result<T, JitError>;

type EntryFn = unsafe extern "C" fn() -> f64;

/// A loaded native entry point. Cloning shares the underlying library.
#[derive(Clone)]
pub struct NativeFunction {
    entry: EntryFn,
    _library: Arc<libloading::Library>,
}

impl NativeFunction {
    pub fn call(&self) -> f64 {
        // SAFETY: `entry` was resolved from a module built from our own
        // generated source, whose exported signature marker matched
        // `double Main(void)`. `_library` keeps the code mapped.
        unsafe { (self.entry)() }
    }
}

impl std::fmt::Debug for NativeFunction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NativeFunction").field("entry", &(self.entry as *const ())).finish()
    }
}

/// Native compiler front door. Owns the configuration and the module cache.
pub struct Jit {
    config: JitConfig,
    cache: HashMap<[u8; 32], NativeFunction>,
}

impl Default for Jit {
    fn default() -> Self {
        Jit::new(JitConfig::default())
    }
}

impl Jit {
    pub fn new(config: JitConfig) -> Self {
        Jit { config, cache: HashMap::new() }
    }

    pub fn config(&self) -> &JitConfig {
        &self.config
    }

    /// Modules built under the old settings are dropped from the cache.
    pub fn config_mut(&mut self) -> &mut JitConfig {
        self.cache.clear();
        &mut self.config
    }

    pub fn cache_len(&self) -> usize {
        self.cache.len()
    }

    pub fn clear_cache(&mut self) {
        self.cache.clear();
    }

    /// Build, load and call `expr`.
    pub fn compile_and_run(&mut self, expr: &Expr) -> Result<f64> {
        Ok(self.compile(expr)?.call())
    }

    /// Build and load `expr` without calling it.
    #[instrument(level = "debug", skip_all)]
    pub fn compile(&mut self, expr: &Expr) -> Result<NativeFunction> {
        let source = c::generate(expr);
        let key: [u8; 32] = Sha256::digest(source.as_bytes()).into();
        let short = hex_prefix(&key);

        if self.config.cache {
            if let Some(func) = self.cache.get(&key) {
                debug!(key = %short, "native module cache hit");
                return Ok(func.clone());
            }
        }

        let scratch = self.scratch_dir()?;
        let scratch_path = scratch.path().to_path_buf();
        let result = build_and_load(&self.config, &scratch_path, &source);

        if let Err(e) = scratch.close() {
            warn!(path = %scratch_path.display(), error = %e, "failed to remove JIT scratch directory");
        }

        let func = result?;
        info!(key = %short, "native module loaded");
        if self.config.cache {
            self.cache.insert(key, func.clone());
        }
        Ok(func)
    }

    fn scratch_dir(&self) -> Result<tempfile::TempDir> {
        let mut builder = tempfile::Builder::new();
        builder.prefix(SCRATCH_PREFIX);
        let dir = match &self.config.scratch_root {
            Some(root) => builder.tempdir_in(root).map_err(|source| JitError::Io { path: root.clone(), source }),
            None => builder.tempdir().map_err(|source| JitError::Io { path: std::env::temp_dir(), source }),
        }?;
        debug!(path = %dir.path().display(), "created scratch directory");
        Ok(dir)
    }
}

fn build_and_load(config: &JitConfig, dir: &Path, source: &str) -> Result<NativeFunction> {
    let source_path = dir.join(SOURCE_FILE);
    std::fs::write(&source_path, source).map_err(|e| JitError::Io { path: source_path.clone(), source: e })?;

    let module_path = dir.join(module_file_name());
    let built = toolchain::build(config, &source_path, &module_path)?;
    if !built.output.trim().is_empty() {
        debug!(status = %built.status, output = %built.output.trim(), "toolchain reported diagnostics");
    }

    load(&module_path)
}

fn module_file_name() -> String {
    use std::env::consts::{DLL_PREFIX, DLL_SUFFIX};
    format!("{DLL_PREFIX}jit_expr{DLL_SUFFIX}")
}

fn load(path: &Path) -> Result<NativeFunction> {
    // SAFETY: the module is the one just built from generated source; its
    // initializers are the C runtime's defaults only.
    let library = unsafe { libloading::Library::new(path) }
        .map_err(|source| JitError::Load { path: path.to_path_buf(), source })?;

    // SAFETY: symbol types are only trusted after the signature check below.
    let entry: EntryFn = unsafe {
        *library.get::<EntryFn>(ENTRY_SYMBOL.as_bytes()).map_err(|source| JitError::MissingSymbol {
            symbol: ENTRY_SYMBOL,
            path: path.to_path_buf(),
            source,
        })?
    };

    let found = signature_of(&library);
    if found.as_deref() != Some(ENTRY_SIGNATURE) {
        return Err(JitError::SignatureMismatch { symbol: ENTRY_SYMBOL, expected: ENTRY_SIGNATURE, found });
    }

    debug!(path = %path.display(), "resolved native entry point");
    Ok(NativeFunction { entry, _library: Arc::new(library) })
}

/// Read the module's exported signature marker, if it has one.
fn signature_of(library: &libloading::Library) -> Option<String> {
    // SAFETY: the marker is a NUL-terminated `const char[]`; the symbol's
    // address is the start of the array.
    unsafe {
        let marker = library.get::<*const c_char>(SIGNATURE_SYMBOL.as_bytes()).ok()?;
        let ptr: *const c_char = *marker;
        if ptr.is_null() {
            return None;
        }
        Some(CStr::from_ptr(ptr).to_string_lossy().into_owned())
    }
}

fn hex_prefix(key: &[u8; 32]) -> String {
    key[..6].iter().map(|b| format!("{b:02x}")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::BinOp;

    fn have_cc() -> bool {
        std::process::Command::new(config::DEFAULT_COMPILER)
            .arg("--version")
            .output()
            .is_ok_and(|o| o.status.success())
    }

    fn isolated() -> (tempfile::TempDir, Jit) {
        let root = tempfile::tempdir().unwrap();
        let config = JitConfig { scratch_root: Some(root.path().to_path_buf()), ..JitConfig::default() };
        (root, Jit::new(config))
    }

    fn is_empty_dir(path: &Path) -> bool {
        std::fs::read_dir(path).unwrap().next().is_none()
    }

    #[test]
    fn module_name_has_platform_suffix() {
        let name = module_file_name();
        assert!(name.contains("jit_expr"));
        assert!(name.ends_with(std::env::consts::DLL_SUFFIX));
    }

    #[test]
    fn error_kinds() {
        let err = JitError::SignatureMismatch { symbol: ENTRY_SYMBOL, expected: ENTRY_SIGNATURE, found: None };
        assert_eq!(err.kind(), "symbol");
        assert!(err.to_string().contains("<unknown>"));
        let err = JitError::ToolchainTimeout { command: "cc".into(), timeout: Duration::from_secs(1) };
        assert_eq!(err.kind(), "toolchain");
    }

    #[test]
    fn wait_failure_is_not_a_spawn_failure() {
        let err = JitError::ToolchainWait {
            command: "cc -shared".into(),
            source: std::io::Error::from(std::io::ErrorKind::Interrupted),
        };
        assert_eq!(err.kind(), "toolchain");
        let msg = err.to_string();
        assert!(msg.starts_with("lost track of toolchain `cc -shared`"), "{msg}");
        assert!(!msg.contains("could not run"), "{msg}");
    }

    #[test]
    fn missing_compiler_cleans_up() {
        let (root, mut jit) = isolated();
        jit.config_mut().compiler = "/nonexistent/arith-cc".into();
        let err = jit.compile(&Expr::number(1.0)).unwrap_err();
        assert!(matches!(err, JitError::ToolchainSpawn { .. }), "{err:?}");
        assert!(is_empty_dir(root.path()));
        assert_eq!(jit.cache_len(), 0);
    }

    #[test]
    fn unwritable_scratch_root_is_io_error() {
        let mut jit = Jit::new(JitConfig {
            scratch_root: Some(PathBuf::from("/nonexistent/arith/scratch")),
            ..JitConfig::default()
        });
        let err = jit.compile(&Expr::number(1.0)).unwrap_err();
        assert_eq!(err.kind(), "io");
    }

    #[cfg(unix)]
    #[test]
    fn toolchain_without_module_is_load_failure() {
        let (root, mut jit) = isolated();
        jit.config_mut().compiler = "true".into();
        let err = jit.compile(&Expr::number(1.0)).unwrap_err();
        assert!(matches!(err, JitError::Load { .. }), "{err:?}");
        assert!(is_empty_dir(root.path()));
    }

    #[test]
    fn round_trip() {
        if !have_cc() {
            eprintln!("skipping: no C toolchain");
            return;
        }
        let (root, mut jit) = isolated();
        let e = Expr::binary(BinOp::Subtract, Expr::number(1.0), Expr::binary(BinOp::Multiply, Expr::number(2.0), Expr::number(5.0)));
        assert_eq!(jit.compile_and_run(&e).unwrap(), -9.0);
        assert!(is_empty_dir(root.path()));
    }

    #[test]
    fn cache_hit_skips_toolchain() {
        if !have_cc() {
            eprintln!("skipping: no C toolchain");
            return;
        }
        let (_root, mut jit) = isolated();
        let e = Expr::negate(Expr::number(3.0));
        let first = jit.compile(&e).unwrap();
        let second = jit.compile(&e).unwrap();
        assert!(Arc::ptr_eq(&first._library, &second._library));
        assert_eq!(second.call(), -3.0);
        assert_eq!(jit.cache_len(), 1);

        jit.clear_cache();
        let third = jit.compile(&e).unwrap();
        assert!(!Arc::ptr_eq(&first._library, &third._library));
    }

    #[test]
    fn changing_config_drops_cached_modules() {
        if !have_cc() {
            eprintln!("skipping: no C toolchain");
            return;
        }
        let (_root, mut jit) = isolated();
        let e = Expr::number(5.0);
        assert_eq!(jit.compile_and_run(&e).unwrap(), 5.0);
        assert_eq!(jit.cache_len(), 1);

        jit.config_mut().compiler = "/nonexistent/arith-cc".into();
        assert_eq!(jit.cache_len(), 0);
        assert!(matches!(jit.compile(&e), Err(JitError::ToolchainSpawn { .. })));
    }

    /// Route the build through `sh` so the test can rewrite the generated
    /// source (`$3`) before compiling it into the module (`$2`).
    #[cfg(unix)]
    fn rewriting(jit: &mut Jit, rewrite: &str) {
        let script = format!("{rewrite} \"$3\" > \"$3.alt.c\" && cc -shared -fPIC -o \"$2\" \"$3.alt.c\"");
        let config = jit.config_mut();
        config.compiler = "sh".into();
        config.flags = vec!["-c".into(), script, "sh".into()];
    }

    #[cfg(unix)]
    #[test]
    fn module_without_entry_is_missing_symbol() {
        if !have_cc() {
            eprintln!("skipping: no C toolchain");
            return;
        }
        let (root, mut jit) = isolated();
        rewriting(&mut jit, "sed 's/Main/Other/'");
        let err = jit.compile(&Expr::number(1.0)).unwrap_err();
        match err {
            JitError::MissingSymbol { symbol, .. } => assert_eq!(symbol, "Main"),
            other => panic!("expected missing symbol, got {other:?}"),
        }
        assert!(is_empty_dir(root.path()));
    }

    #[cfg(unix)]
    #[test]
    fn wrong_calling_shape_is_rejected() {
        if !have_cc() {
            eprintln!("skipping: no C toolchain");
            return;
        }
        let (_root, mut jit) = isolated();
        rewriting(&mut jit, "sed 's/f64()/i64()/'");
        let err = jit.compile(&Expr::number(1.0)).unwrap_err();
        match err {
            JitError::SignatureMismatch { found, .. } => assert_eq!(found.as_deref(), Some("i64()")),
            other => panic!("expected signature mismatch, got {other:?}"),
        }

        rewriting(&mut jit, "sed '/arith_signature/d'");
        let err = jit.compile(&Expr::number(1.0)).unwrap_err();
        assert!(matches!(err, JitError::SignatureMismatch { found: None, .. }), "{err:?}");
    }

    #[test]
    fn toolchain_failure_cleans_up() {
        if !have_cc() {
            eprintln!("skipping: no C toolchain");
            return;
        }
        let (root, mut jit) = isolated();
        jit.config_mut().flags.extend(["-include".to_string(), "/nonexistent/arith.h".to_string()]);
        let err = jit.compile(&Expr::number(1.0)).unwrap_err();
        match &err {
            JitError::Toolchain { output, first_error, .. } => {
                assert!(!output.is_empty());
                assert!(first_error.is_some());
            }
            other => panic!("expected toolchain failure, got {other:?}"),
        }
        assert!(is_empty_dir(root.path()));
    }

    #[test]
    fn callable_outlives_scratch_directory() {
        if !have_cc() {
            eprintln!("skipping: no C toolchain");
            return;
        }
        let (root, mut jit) = isolated();
        let f = jit.compile(&Expr::binary(BinOp::Divide, Expr::number(1.0), Expr::number(4.0))).unwrap();
        assert!(is_empty_dir(root.path()));
        drop(jit);
        assert_eq!(f.call(), 0.25);
        assert_eq!(f.clone().call(), 0.25);
    }
}
