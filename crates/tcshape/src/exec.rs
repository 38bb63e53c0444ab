//! External command execution.
//!
//! Every change to the host's shaping state goes through a [`CommandRunner`].
//! [`SystemRunner`] spawns the real `ip`/`tc`/`modprobe` tools; tests swap in
//! a scripted runner.
//!
//! A nonzero exit is not an error at this layer: [`CommandRunner::run`] only
//! fails when the process could not be spawned or did not finish in time.
//! [`classify`] then maps the captured output to an [`Outcome`], treating
//! known "nothing to do" failures as [`Outcome::Benign`].

use std::fmt;
use std::future::Future;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use crate::error::{Error, Result};

/// `tc qdisc del ... root` on a device that only has the default qdisc.
pub const ZERO_HANDLE: &str = "Cannot delete qdisc with handle of zero";

/// `tc qdisc del ... ingress` on a device without an ingress qdisc.
pub const NO_SUCH_QDISC: &str = "Cannot find specified qdisc";

/// `ip link add` of a device that is already there.
pub const FILE_EXISTS: &str = "File exists";

/// `ip link show` of a device that is not there.
pub const DEVICE_MISSING: &str = "does not exist";

/// Default bound for a single external command.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

// ============================================================================
// CommandLine
// ============================================================================

/// A program and its arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandLine {
    program: String,
    args: Vec<String>,
}

impl CommandLine {
    /// Create a command line for `program` with no arguments.
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    /// Append one argument.
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Append several arguments.
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// The program name or path.
    pub fn program(&self) -> &str {
        &self.program
    }

    /// The arguments, without the program.
    pub fn arguments(&self) -> &[String] {
        &self.args
    }

    /// Returns true if the full argv (program included) starts with `prefix`.
    pub fn starts_with(&self, prefix: &[&str]) -> bool {
        let mut argv = std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str));
        prefix.iter().all(|p| argv.next() == Some(*p))
    }
}

impl fmt::Display for CommandLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.program)?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

// ============================================================================
// Output
// ============================================================================

/// Captured result of a finished command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Output {
    /// Exit code; `None` if the process was killed by a signal.
    pub status: Option<i32>,
    /// Captured standard output.
    pub stdout: String,
    /// Captured standard error.
    pub stderr: String,
}

impl Output {
    /// A successful output with the given stdout.
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            status: Some(0),
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    /// A failed output with the given exit code and stderr.
    pub fn failed(status: i32, stderr: impl Into<String>) -> Self {
        Self {
            status: Some(status),
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    /// Returns true if the command exited with status 0.
    pub fn success(&self) -> bool {
        self.status == Some(0)
    }

    /// Returns true if either stream contains `needle`.
    pub fn mentions(&self, needle: &str) -> bool {
        self.stdout.contains(needle) || self.stderr.contains(needle)
    }

    /// Convert into a command error for `cmd`.
    pub fn into_error(self, cmd: &CommandLine) -> Error {
        Error::Command {
            command: cmd.to_string(),
            status: self.status,
            stderr: self.stderr,
        }
    }
}

impl From<std::process::Output> for Output {
    fn from(value: std::process::Output) -> Self {
        Self {
            status: value.status.code(),
            stdout: String::from_utf8_lossy(&value.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&value.stderr).into_owned(),
        }
    }
}

// ============================================================================
// Classification
// ============================================================================

/// How a finished command should be treated.
#[derive(Debug)]
pub enum Outcome {
    /// Exit status 0.
    Success,
    /// Nonzero exit whose stderr matched the given benign signature.
    Benign(&'static str),
    /// Nonzero exit not on the benign list.
    Failed(Error),
}

impl Outcome {
    /// Returns true unless the outcome is [`Outcome::Failed`].
    pub fn is_ok(&self) -> bool {
        !matches!(self, Outcome::Failed(_))
    }

    /// The error, if the command failed.
    pub fn error(&self) -> Option<&Error> {
        match self {
            Outcome::Failed(e) => Some(e),
            _ => None,
        }
    }
}

/// Classify a finished command against a list of benign stderr signatures.
///
/// ```
/// use tcshape::exec::{classify, CommandLine, Outcome, Output, ZERO_HANDLE};
///
/// let cmd = CommandLine::new("tc").args(["qdisc", "del", "dev", "ifb0", "root"]);
/// let out = Output::failed(2, "Error: Cannot delete qdisc with handle of zero.\n");
/// assert!(matches!(classify(&cmd, out, &[ZERO_HANDLE]), Outcome::Benign(_)));
/// ```
pub fn classify(cmd: &CommandLine, output: Output, benign: &[&'static str]) -> Outcome {
    if output.success() {
        return Outcome::Success;
    }

    match benign.iter().find(|sig| output.stderr.contains(**sig)) {
        Some(sig) => Outcome::Benign(*sig),
        None => Outcome::Failed(output.into_error(cmd)),
    }
}

// ============================================================================
// CommandRunner
// ============================================================================

/// Runs external commands and captures their output.
pub trait CommandRunner: Send + Sync {
    /// Run `cmd` to completion.
    ///
    /// Fails only with [`Error::ExecutionFailed`] or [`Error::Timeout`];
    /// nonzero exits are returned as an [`Output`].
    fn run(&self, cmd: &CommandLine) -> impl Future<Output = Result<Output>> + Send;
}

impl<R: CommandRunner + ?Sized> CommandRunner for &R {
    fn run(&self, cmd: &CommandLine) -> impl Future<Output = Result<Output>> + Send {
        (**self).run(cmd)
    }
}

impl<R: CommandRunner + ?Sized> CommandRunner for Arc<R> {
    fn run(&self, cmd: &CommandLine) -> impl Future<Output = Result<Output>> + Send {
        (**self).run(cmd)
    }
}

/// Run `cmd` and classify the result.
///
/// Spawn failures and timeouts are returned as `Err`.
pub async fn run_ignoring<R: CommandRunner + ?Sized>(
    runner: &R,
    cmd: &CommandLine,
    benign: &[&'static str],
) -> Result<Outcome> {
    let output = runner.run(cmd).await?;
    let outcome = classify(cmd, output, benign);

    match &outcome {
        Outcome::Success => {}
        Outcome::Benign(sig) => {
            tracing::debug!(command = %cmd, signature = *sig, "ignoring benign failure");
        }
        Outcome::Failed(err) => {
            tracing::debug!(command = %cmd, error = %err, "command failed");
        }
    }

    Ok(outcome)
}

/// Run `cmd`, turning any nonzero exit into [`Error::Command`].
pub async fn run_checked<R: CommandRunner + ?Sized>(
    runner: &R,
    cmd: &CommandLine,
) -> Result<Output> {
    let output = runner.run(cmd).await?;
    if output.success() {
        Ok(output)
    } else {
        Err(output.into_error(cmd))
    }
}

// ============================================================================
// SystemRunner
// ============================================================================

/// Runs commands as real child processes.
///
/// An optional privilege prefix (`sudo -n`, `pkexec`, `ip netns exec NS`) is
/// prepended to every command. Each call is bounded by a timeout; the child
/// is killed if it overruns.
#[derive(Debug, Clone)]
pub struct SystemRunner {
    privilege: Vec<String>,
    timeout: Duration,
}

impl Default for SystemRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl SystemRunner {
    /// Create a runner with no privilege prefix and the default timeout.
    pub fn new() -> Self {
        Self {
            privilege: Vec::new(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Prefix every command with `prefix` (e.g. `["sudo", "-n"]`).
    pub fn privilege<I, S>(mut self, prefix: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.privilege = prefix.into_iter().map(Into::into).collect();
        self
    }

    /// Set the per-command timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// The command line actually spawned for `cmd`.
    pub fn effective(&self, cmd: &CommandLine) -> CommandLine {
        match self.privilege.split_first() {
            Some((program, rest)) => CommandLine::new(program.clone())
                .args(rest.iter().cloned())
                .arg(cmd.program())
                .args(cmd.arguments().iter().cloned()),
            None => cmd.clone(),
        }
    }
}

impl CommandRunner for SystemRunner {
    async fn run(&self, cmd: &CommandLine) -> Result<Output> {
        let effective = self.effective(cmd);

        let mut command = tokio::process::Command::new(effective.program());
        command
            .args(effective.arguments())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        tracing::debug!(command = %effective, "running command");

        let output = match tokio::time::timeout(self.timeout, command.output()).await {
            Ok(Ok(output)) => Output::from(output),
            Ok(Err(source)) => {
                return Err(Error::ExecutionFailed {
                    command: effective.to_string(),
                    source,
                });
            }
            Err(_) => {
                tracing::warn!(command = %effective, timeout = ?self.timeout, "command timed out");
                return Err(Error::Timeout {
                    command: effective.to_string(),
                    after: self.timeout,
                });
            }
        };

        if !output.success() {
            tracing::debug!(
                command = %effective,
                status = ?output.status,
                stderr = %output.stderr.trim(),
                "command returned non-zero status"
            );
        }

        Ok(output)
    }
}
