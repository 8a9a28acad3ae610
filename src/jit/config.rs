use std::path::PathBuf;
use std::time::Duration;

/// How the native backend builds its modules.
#[derive(Debug, Clone, PartialEq)]
pub struct JitConfig {
    /// C compiler executable.
    pub compiler: String,
    /// Flags placed before `-o <module> <source>`.
    pub flags: Vec<String>,
    /// Upper bound on one toolchain run; the child is killed past it.
    pub timeout: Duration,
    /// Where per-call scratch directories are created. `None` uses the
    /// system temp dir.
    pub scratch_root: Option<PathBuf>,
    /// Keep loaded modules keyed by the hash of their generated source.
    pub cache: bool,
}

pub const DEFAULT_COMPILER: &str = "cc";
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

pub const ENV_COMPILER: &str = "ARITH_CC";
pub const ENV_CFLAGS: &str = "ARITH_CFLAGS";
pub const ENV_TIMEOUT: &str = "ARITH_JIT_TIMEOUT";
pub const ENV_SCRATCH: &str = "ARITH_JIT_TMPDIR";

impl Default for JitConfig {
    fn default() -> Self {
        JitConfig {
            compiler: DEFAULT_COMPILER.to_string(),
            flags: default_flags(),
            timeout: DEFAULT_TIMEOUT,
            scratch_root: None,
            cache: true,
        }
    }
}

fn default_flags() -> Vec<String> {
    ["-shared", "-fPIC", "-O2"].iter().map(|s| s.to_string()).collect()
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("invalid {var}={value:?}: {reason}")]
pub struct ConfigError {
    pub var: &'static str,
    pub value: String,
    pub reason: &'static str,
}

impl JitConfig {
    /// Defaults overridden by `ARITH_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Like [`from_env`](Self::from_env) with an explicit variable source.
    ///
    /// `ARITH_CFLAGS` is whitespace-split and appended to the default flags.
    /// `ARITH_JIT_TIMEOUT` is in seconds and may be fractional.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = JitConfig::default();

        if let Some(cc) = lookup(ENV_COMPILER).filter(|s| !s.trim().is_empty()) {
            config.compiler = cc.trim().to_string();
        }
        if let Some(flags) = lookup(ENV_CFLAGS) {
            config.flags.extend(flags.split_whitespace().map(str::to_string));
        }
        if let Some(raw) = lookup(ENV_TIMEOUT) {
            config.timeout = parse_timeout(&raw).map_err(|reason| ConfigError {
                var: ENV_TIMEOUT,
                value: raw.clone(),
                reason,
            })?;
        }
        if let Some(dir) = lookup(ENV_SCRATCH).filter(|s| !s.is_empty()) {
            config.scratch_root = Some(PathBuf::from(dir));
        }

        Ok(config)
    }

    /// The command line that builds `source` into `module`, for logs and errors.
    pub fn command_line(&self, source: &std::path::Path, module: &std::path::Path) -> String {
        let mut parts = vec![self.compiler.clone()];
        parts.extend(self.flags.iter().cloned());
        parts.push("-o".to_string());
        parts.push(module.display().to_string());
        parts.push(source.display().to_string());
        parts.join(" ")
    }
}

pub fn parse_timeout(raw: &str) -> Result<Duration, &'static str> {
    let secs: f64 = raw.trim().parse().map_err(|_| "expected a number of seconds")?;
    if !secs.is_finite() || secs <= 0.0 {
        return Err("timeout must be a positive number of seconds");
    }
    Ok(Duration::from_secs_f64(secs))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> =
            pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_without_env() {
        let config = JitConfig::from_lookup(|_| None).unwrap();
        assert_eq!(config, JitConfig::default());
        assert_eq!(config.compiler, "cc");
        assert_eq!(config.flags, vec!["-shared", "-fPIC", "-O2"]);
        assert_eq!(config.timeout, Duration::from_secs(30));
        assert!(config.cache);
    }

    #[test]
    fn env_overrides() {
        let config = JitConfig::from_lookup(lookup_from(&[
            (ENV_COMPILER, "clang"),
            (ENV_CFLAGS, " -g  -Wall "),
            (ENV_TIMEOUT, "2.5"),
            (ENV_SCRATCH, "/var/tmp/arith"),
        ]))
        .unwrap();
        assert_eq!(config.compiler, "clang");
        assert_eq!(config.flags, vec!["-shared", "-fPIC", "-O2", "-g", "-Wall"]);
        assert_eq!(config.timeout, Duration::from_millis(2500));
        assert_eq!(config.scratch_root, Some(PathBuf::from("/var/tmp/arith")));
    }

    #[test]
    fn blank_compiler_keeps_default() {
        let config = JitConfig::from_lookup(lookup_from(&[(ENV_COMPILER, "  ")])).unwrap();
        assert_eq!(config.compiler, "cc");
    }

    #[test]
    fn bad_timeout_is_reported() {
        let err = JitConfig::from_lookup(lookup_from(&[(ENV_TIMEOUT, "soon")])).unwrap_err();
        assert_eq!(err.var, ENV_TIMEOUT);
        assert!(err.to_string().contains("soon"));
        assert!(parse_timeout("0").is_err());
        assert!(parse_timeout("-1").is_err());
        assert!(parse_timeout("inf").is_err());
    }

    #[test]
    fn command_line_order() {
        let config = JitConfig::default();
        let line = config.command_line("/t/a.c".as_ref(), "/t/liba.so".as_ref());
        assert_eq!(line, "cc -shared -fPIC -O2 -o /t/liba.so /t/a.c");
    }
}
