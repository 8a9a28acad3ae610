//! Runs the external C compiler under a deadline.

use std::io::Read;
use std::path::Path;
use std::process::{Command, ExitStatus, Stdio};
use std::sync::LazyLock;
use std::thread;
use std::time::{Duration, Instant};

use regex::Regex;
use tracing::{debug, warn};

use super::{JitConfig, JitError};

const POLL_INTERVAL: Duration = Duration::from_millis(5);

/// `file:line:col: error: message` as printed by gcc and clang.
static DIAGNOSTIC_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^(?:[^:\n]+):(\d+):(?:\d+:)? (?:fatal )?error: (.+)$").expect("valid regex")
});

#[derive(Debug)]
pub(crate) struct BuildOutput {
    pub status: ExitStatus,
    /// stdout followed by stderr.
    pub output: String,
}

/// Compile `source` into the loadable module `module`.
pub(crate) fn build(config: &JitConfig, source: &Path, module: &Path) -> Result<BuildOutput, JitError> {
    let command = config.command_line(source, module);
    debug!(%command, "invoking toolchain");

    let mut child = Command::new(&config.compiler)
        .args(&config.flags)
        .arg("-o")
        .arg(module)
        .arg(source)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|source| JitError::ToolchainSpawn { command: command.clone(), source })?;

    let stdout = drain(child.stdout.take());
    let stderr = drain(child.stderr.take());

    let started = Instant::now();
    let status = loop {
        match child.try_wait() {
            Ok(Some(status)) => break status,
            Ok(None) if started.elapsed() >= config.timeout => {
                if let Err(e) = child.kill() {
                    warn!(error = %e, "failed to kill timed-out toolchain");
                }
                let _ = child.wait();
                // The pipe readers are left to finish on their own: a
                // grandchild may still hold the pipes open.
                return Err(JitError::ToolchainTimeout { command, timeout: config.timeout });
            }
            Ok(None) => thread::sleep(POLL_INTERVAL),
            Err(source) => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(JitError::ToolchainWait { command, source });
            }
        }
    };

    let mut output = join(stdout);
    output.push_str(&join(stderr));
    debug!(%status, elapsed = ?started.elapsed(), "toolchain finished");

    if !status.success() {
        let first_error = first_error(&output);
        return Err(JitError::Toolchain { command, status, output, first_error });
    }
    Ok(BuildOutput { status, output })
}

fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> thread::JoinHandle<Vec<u8>> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        if let Some(mut pipe) = pipe {
            let _ = pipe.read_to_end(&mut buf);
        }
        buf
    })
}

fn join(handle: thread::JoinHandle<Vec<u8>>) -> String {
    let bytes = handle.join().unwrap_or_default();
    String::from_utf8_lossy(&bytes).into_owned()
}

/// The first compiler error in `output`, as `line N: message`.
pub(crate) fn first_error(output: &str) -> Option<String> {
    if let Some(caps) = DIAGNOSTIC_LINE.captures(output) {
        return Some(format!("line {}: {}", &caps[1], caps[2].trim()));
    }
    output.lines().map(str::trim).find(|l| !l.is_empty()).map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_error_gcc_style() {
        let out = "/tmp/arith-jit-x/jit_expr.c: In function 'Main':\n\
                   /tmp/arith-jit-x/jit_expr.c:3:18: error: expected ';' before '}' token\n";
        assert_eq!(first_error(out).as_deref(), Some("line 3: expected ';' before '}' token"));
    }

    #[test]
    fn first_error_fatal() {
        let out = "<command-line>: fatal error: /nope.h: No such file or directory\n\
                   jit_expr.c:1: fatal error: missing.h: No such file or directory\n";
        assert_eq!(first_error(out).as_deref(), Some("line 1: missing.h: No such file or directory"));
    }

    #[test]
    fn first_error_falls_back_to_first_line() {
        assert_eq!(first_error("\n  ld: cannot find -lfoo\n").as_deref(), Some("ld: cannot find -lfoo"));
        assert_eq!(first_error(""), None);
    }

    #[cfg(unix)]
    #[test]
    fn spawn_failure_names_command() {
        let config = JitConfig { compiler: "/nonexistent/arith-cc".into(), ..JitConfig::default() };
        let err = build(&config, Path::new("a.c"), Path::new("a.so")).unwrap_err();
        match err {
            JitError::ToolchainSpawn { command, .. } => assert!(command.starts_with("/nonexistent/arith-cc")),
            other => panic!("expected spawn failure, got {other:?}"),
        }
    }

    #[cfg(unix)]
    #[test]
    fn nonzero_exit_captures_output() {
        let config = JitConfig {
            compiler: "sh".into(),
            flags: vec!["-c".into(), "echo out; echo 'x.c:7:1: error: nope' >&2; exit 3".into(), "sh".into()],
            ..JitConfig::default()
        };
        let err = build(&config, Path::new("a.c"), Path::new("a.so")).unwrap_err();
        match err {
            JitError::Toolchain { status, output, first_error, .. } => {
                assert_eq!(status.code(), Some(3));
                assert!(output.starts_with("out\n"));
                assert!(output.contains("error: nope"));
                assert_eq!(first_error.as_deref(), Some("line 7: nope"));
            }
            other => panic!("expected toolchain failure, got {other:?}"),
        }
    }

    #[cfg(unix)]
    #[test]
    fn hung_toolchain_is_killed() {
        let config = JitConfig {
            compiler: "sh".into(),
            flags: vec!["-c".into(), "sleep 10".into(), "sh".into()],
            timeout: Duration::from_millis(100),
            ..JitConfig::default()
        };
        let started = Instant::now();
        let err = build(&config, Path::new("a.c"), Path::new("a.so")).unwrap_err();
        assert!(matches!(err, JitError::ToolchainTimeout { .. }), "{err:?}");
        assert!(started.elapsed() < Duration::from_secs(5));
    }
}
