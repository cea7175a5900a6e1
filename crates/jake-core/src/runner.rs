//! Shell Runner - one command line, one child process
//!
//! Blocks the calling worker thread until the child exits. Output is
//! inherited so it streams straight to the console. A deadline, when set,
//! is enforced here: the child is killed and the command reported as timed
//! out.

use std::collections::BTreeMap;
use std::io;
use std::path::Path;
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};
use tracing::{debug, warn};
use wait_timeout::ChildExt;

/// How a command line ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShellOutcome {
    /// `None` when killed by a signal or by the deadline
    pub code: Option<i32>,
    pub timed_out: bool,
    pub duration: Duration,
}

impl ShellOutcome {
    pub fn success(&self) -> bool {
        !self.timed_out && self.code == Some(0)
    }
}

/// Runs command lines through a shell (`sh -c` / `cmd /C` unless overridden)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShellRunner {
    program: String,
    args: Vec<String>,
}

impl Default for ShellRunner {
    fn default() -> Self {
        // Use sh on Unix, cmd on Windows
        if cfg!(target_os = "windows") {
            Self::from_parts("cmd", ["/C"])
        } else {
            Self::from_parts("sh", ["-c"])
        }
    }
}

impl ShellRunner {
    /// Parse a shell override such as `bash -eu -c`.
    ///
    /// A bare program name gets `-c` appended (`/C` for cmd).
    pub fn new(shell: Option<&str>) -> Self {
        let Some(spec) = shell.filter(|s| !s.trim().is_empty()) else {
            return Self::default();
        };
        let mut parts = spec.split_whitespace().map(str::to_string);
        let program = parts.next().unwrap_or_default();
        let mut args: Vec<String> = parts.collect();
        if args.is_empty() {
            let flag = if program.eq_ignore_ascii_case("cmd") {
                "/C"
            } else {
                "-c"
            };
            args.push(flag.to_string());
        }
        Self { program, args }
    }

    fn from_parts<const N: usize>(program: &str, args: [&str; N]) -> Self {
        Self {
            program: program.to_string(),
            args: args.iter().map(|a| a.to_string()).collect(),
        }
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }

    /// Run `command` in `cwd` with `env` added to the inherited environment
    pub fn run(
        &self,
        command: &str,
        cwd: &Path,
        env: &BTreeMap<String, String>,
        timeout: Option<Duration>,
    ) -> io::Result<ShellOutcome> {
        let start = Instant::now();
        debug!(shell = %self.program, command, cwd = %cwd.display(), "spawning");

        let mut child = Command::new(&self.program)
            .args(&self.args)
            .arg(command)
            .current_dir(cwd)
            .envs(env)
            .stdin(Stdio::inherit())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .spawn()?;

        let (code, timed_out) = match timeout {
            Some(limit) => match child.wait_timeout(limit)? {
                Some(status) => (status.code(), false),
                None => {
                    warn!(command, ?limit, "command timed out, killing");
                    child.kill()?;
                    child.wait()?;
                    (None, true)
                }
            },
            None => (child.wait()?.code(), false),
        };

        Ok(ShellOutcome {
            code,
            timed_out,
            duration: start.elapsed(),
        })
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_execute_simple_command() {
        let dir = TempDir::new().unwrap();
        let runner = ShellRunner::default();
        let outcome = runner
            .run("echo hello > out.txt", dir.path(), &BTreeMap::new(), None)
            .unwrap();

        assert!(outcome.success());
        assert_eq!(outcome.code, Some(0));
        let written = std::fs::read_to_string(dir.path().join("out.txt")).unwrap();
        assert_eq!(written.trim(), "hello");
    }

    #[test]
    fn test_exit_code_and_env() {
        let dir = TempDir::new().unwrap();
        let runner = ShellRunner::default();
        let mut env = BTreeMap::new();
        env.insert("JAKE_TEST_VALUE".to_string(), "42".to_string());

        let outcome = runner
            .run("exit $JAKE_TEST_VALUE", dir.path(), &env, None)
            .unwrap();
        assert!(!outcome.success());
        assert_eq!(outcome.code, Some(42));
    }

    #[test]
    fn test_timeout_kills_child() {
        let dir = TempDir::new().unwrap();
        let runner = ShellRunner::default();
        let outcome = runner
            .run(
                "sleep 5",
                dir.path(),
                &BTreeMap::new(),
                Some(Duration::from_millis(100)),
            )
            .unwrap();

        assert!(outcome.timed_out);
        assert!(!outcome.success());
        assert!(outcome.duration < Duration::from_secs(4));
    }

    #[test]
    fn test_shell_override() {
        let runner = ShellRunner::new(Some("bash -eu -c"));
        assert_eq!(runner.program(), "bash");
        assert_eq!(runner.args(), ["-eu", "-c"]);

        let bare = ShellRunner::new(Some("zsh"));
        assert_eq!(bare.args(), ["-c"]);

        assert_eq!(ShellRunner::new(Some("  ")), ShellRunner::default());
    }
}
