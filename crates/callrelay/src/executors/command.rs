//! Shell command executor.
//!
//! Gated by [`SecurityPolicy::allow_commands`](super::SecurityPolicy). The
//! allow-list is a prefix check on the resolved command line, not an escaping
//! mechanism: values interpolated into a template reach the shell verbatim.

use super::ExecutionContext;
use crate::functions::args::render_template;
use crate::functions::result::DispatchResult;
use crate::preview;
use serde_json::{Value, json};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::{info, warn};

pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_MAX_OUTPUT_BYTES: usize = 1024 * 1024;

pub const COMMANDS_DISABLED: &str = "Command execution is disabled by security policy";

/// Bounds on a single command run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandLimits {
    pub timeout: Duration,
    /// Cap on each of stdout and stderr.
    pub max_output_bytes: usize,
}

impl Default for CommandLimits {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_COMMAND_TIMEOUT,
            max_output_bytes: DEFAULT_MAX_OUTPUT_BYTES,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    /// `None` when the process was terminated by a signal.
    pub exit_code: Option<i32>,
}

pub type RunFuture<'a> = Pin<Box<dyn Future<Output = Result<CommandOutput, String>> + Send + 'a>>;

/// Spawns command lines. Timeouts and output caps are the runner's job.
pub trait CommandRunner: Send + Sync {
    fn run<'a>(&'a self, command: &'a str, limits: CommandLimits) -> RunFuture<'a>;
}

/// Runs commands through `sh -c`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ShellRunner;

async fn read_capped<R: AsyncRead + Unpin>(reader: R, max: usize) -> Result<Vec<u8>, String> {
    let mut buf = Vec::new();
    reader
        .take((max as u64).saturating_add(1))
        .read_to_end(&mut buf)
        .await
        .map_err(|e| format!("failed to read command output: {e}"))?;
    if buf.len() > max {
        return Err(format!("Command output exceeded {max} bytes"));
    }
    Ok(buf)
}

impl CommandRunner for ShellRunner {
    fn run<'a>(&'a self, command: &'a str, limits: CommandLimits) -> RunFuture<'a> {
        Box::pin(async move {
            let mut child = tokio::process::Command::new("sh")
                .arg("-c")
                .arg(command)
                .stdin(Stdio::null())
                .stdout(Stdio::piped())
                .stderr(Stdio::piped())
                .kill_on_drop(true)
                .spawn()
                .map_err(|e| format!("failed to spawn command: {e}"))?;

            let stdout = child.stdout.take().ok_or("failed to capture stdout")?;
            let stderr = child.stderr.take().ok_or("failed to capture stderr")?;

            // Dropping `child` on any early return kills the process.
            let work = async {
                tokio::try_join!(
                    read_capped(stdout, limits.max_output_bytes),
                    read_capped(stderr, limits.max_output_bytes),
                    async {
                        child
                            .wait()
                            .await
                            .map_err(|e| format!("failed to wait for command: {e}"))
                    },
                )
            };

            let (out, err, status) = tokio::time::timeout(limits.timeout, work)
                .await
                .map_err(|_| {
                    format!(
                        "Command timed out after {:.0} seconds",
                        limits.timeout.as_secs_f64()
                    )
                })??;

            Ok(CommandOutput {
                stdout: String::from_utf8_lossy(&out).into_owned(),
                stderr: String::from_utf8_lossy(&err).into_owned(),
                exit_code: status.code(),
            })
        })
    }
}

pub type ComputeCommand = Arc<dyn Fn(&Value) -> String + Send + Sync>;

/// How the command line is produced from arguments.
#[derive(Clone)]
pub enum CommandLine {
    Static(String),
    /// `{{key}}` placeholders filled verbatim from arguments.
    Template(String),
    Computed(ComputeCommand),
}

#[derive(Clone)]
pub struct CommandExecutor {
    command: CommandLine,
    allowed_prefixes: Vec<String>,
    limits: CommandLimits,
}

impl fmt::Debug for CommandExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let command = match &self.command {
            CommandLine::Static(c) | CommandLine::Template(c) => c.as_str(),
            CommandLine::Computed(_) => "<computed>",
        };
        f.debug_struct("CommandExecutor")
            .field("command", &command)
            .field("allowed_prefixes", &self.allowed_prefixes)
            .field("limits", &self.limits)
            .finish()
    }
}

impl CommandExecutor {
    pub fn new(command: CommandLine) -> Self {
        Self {
            command,
            allowed_prefixes: Vec::new(),
            limits: CommandLimits::default(),
        }
    }

    pub fn template(template: impl Into<String>) -> Self {
        Self::new(CommandLine::Template(template.into()))
    }

    /// Only run commands starting with one of these prefixes.
    pub fn with_allowed_prefixes(mut self, prefixes: Vec<String>) -> Self {
        self.allowed_prefixes = prefixes;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.limits.timeout = timeout;
        self
    }

    pub fn with_max_output_bytes(mut self, max: usize) -> Self {
        self.limits.max_output_bytes = max;
        self
    }

    fn resolve(&self, args: &Value) -> String {
        match &self.command {
            CommandLine::Static(c) => c.trim().to_string(),
            CommandLine::Template(t) => render_template(t, args),
            CommandLine::Computed(compute) => compute(args).trim().to_string(),
        }
    }

    fn is_allowed(&self, command: &str) -> bool {
        self.allowed_prefixes.is_empty()
            || self
                .allowed_prefixes
                .iter()
                .any(|prefix| command.starts_with(prefix.as_str()))
    }

    pub async fn execute(&self, args: &Value, ctx: &ExecutionContext) -> DispatchResult {
        if !ctx.security.allow_commands {
            return DispatchResult::failure(COMMANDS_DISABLED);
        }

        let command = self.resolve(args);
        if command.is_empty() {
            return DispatchResult::failure("Command is empty");
        }
        if !self.is_allowed(&command) {
            warn!("Rejected command not on allow-list: {}", preview(&command, 120));
            return DispatchResult::failure(format!("Command '{command}' is not allowed"));
        }

        info!("[command] {}", preview(&command, 120));
        let output = match ctx.runner.run(&command, self.limits).await {
            Ok(o) => o,
            Err(e) => {
                warn!("Command failed: {e}");
                return DispatchResult::failure(e);
            }
        };

        match output.exit_code {
            Some(0) => DispatchResult::data(json!({
                "stdout": output.stdout,
                "stderr": output.stderr,
                "command": command,
                "exitCode": 0,
            })),
            Some(code) => DispatchResult::failure(format!(
                "Command exited with status {code}: {}",
                preview(output.stderr.trim(), 500)
            )),
            None => DispatchResult::failure("Command terminated by signal"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executors::SecurityPolicy;
    use crate::functions::result::SuccessPayload;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Records spawns without running anything.
    #[derive(Default)]
    struct CountingRunner {
        spawns: AtomicUsize,
    }

    impl CommandRunner for CountingRunner {
        fn run<'a>(&'a self, command: &'a str, _limits: CommandLimits) -> RunFuture<'a> {
            self.spawns.fetch_add(1, Ordering::SeqCst);
            Box::pin(async move {
                Ok(CommandOutput {
                    stdout: format!("ran {command}"),
                    stderr: String::new(),
                    exit_code: Some(0),
                })
            })
        }
    }

    fn ctx_with(allow: bool, runner: Arc<dyn CommandRunner>) -> ExecutionContext {
        ExecutionContext::new(SecurityPolicy {
            allow_commands: allow,
            allow_scripts: false,
        })
        .unwrap()
        .with_runner(runner)
    }

    #[tokio::test]
    async fn disabled_regardless_of_allow_list() {
        let runner = Arc::new(CountingRunner::default());
        let exec = CommandExecutor::template("ping {{host}}")
            .with_allowed_prefixes(vec!["ping".into()]);
        let result = exec
            .execute(&serde_json::json!({"host": "x"}), &ctx_with(false, runner.clone()))
            .await;
        assert_eq!(result.error(), Some(COMMANDS_DISABLED));
        assert_eq!(runner.spawns.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn allow_list_rejects_before_spawn() {
        let runner = Arc::new(CountingRunner::default());
        let exec = CommandExecutor::new(CommandLine::Static("rm -rf /".into()))
            .with_allowed_prefixes(vec!["ping".into()]);
        let result = exec
            .execute(&serde_json::json!({}), &ctx_with(true, runner.clone()))
            .await;
        assert!(result.error().unwrap().contains("not allowed"));
        assert_eq!(runner.spawns.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn allowed_command_reports_exact_command() {
        let runner = Arc::new(CountingRunner::default());
        let exec = CommandExecutor::template("ping -c 1 {{host}}")
            .with_allowed_prefixes(vec!["ping".into()]);
        let result = exec
            .execute(&serde_json::json!({"host": "localhost"}), &ctx_with(true, runner.clone()))
            .await;
        let DispatchResult::Success(SuccessPayload::Data(data)) = result else {
            panic!("expected success");
        };
        assert_eq!(data["command"], "ping -c 1 localhost");
        assert_eq!(data["stdout"], "ran ping -c 1 localhost");
        assert_eq!(runner.spawns.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn empty_command_fails() {
        let runner = Arc::new(CountingRunner::default());
        let exec = CommandExecutor::template("{{missing}}");
        let result = exec
            .execute(&serde_json::json!({}), &ctx_with(true, runner.clone()))
            .await;
        assert_eq!(result.error(), Some("Command is empty"));
        assert_eq!(runner.spawns.load(Ordering::SeqCst), 0);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn shell_runner_captures_output() {
        let exec = CommandExecutor::new(CommandLine::Static("echo out; echo err >&2".into()));
        let result = exec
            .execute(&serde_json::json!({}), &ctx_with(true, Arc::new(ShellRunner)))
            .await;
        let DispatchResult::Success(SuccessPayload::Data(data)) = result else {
            panic!("expected success");
        };
        assert_eq!(data["stdout"], "out\n");
        assert_eq!(data["stderr"], "err\n");
        assert_eq!(data["exitCode"], 0);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn shell_runner_non_zero_exit_fails() {
        let exec = CommandExecutor::new(CommandLine::Static("echo bad >&2; exit 3".into()));
        let result = exec
            .execute(&serde_json::json!({}), &ctx_with(true, Arc::new(ShellRunner)))
            .await;
        let err = result.error().unwrap();
        assert!(err.contains("status 3"), "got {err}");
        assert!(err.contains("bad"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn shell_runner_times_out() {
        let exec = CommandExecutor::new(CommandLine::Static("sleep 5".into()))
            .with_timeout(Duration::from_millis(100));
        let result = exec
            .execute(&serde_json::json!({}), &ctx_with(true, Arc::new(ShellRunner)))
            .await;
        assert!(result.error().unwrap().contains("timed out"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn unbounded_output_cap_still_runs() {
        let exec = CommandExecutor::new(CommandLine::Static("echo hi".into()))
            .with_max_output_bytes(usize::MAX);
        let result = exec
            .execute(&serde_json::json!({}), &ctx_with(true, Arc::new(ShellRunner)))
            .await;
        let DispatchResult::Success(SuccessPayload::Data(data)) = result else {
            panic!("expected success");
        };
        assert_eq!(data["stdout"], "hi\n");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn shell_runner_caps_output() {
        let exec = CommandExecutor::new(CommandLine::Static("head -c 4096 /dev/zero".into()))
            .with_max_output_bytes(1024);
        let result = exec
            .execute(&serde_json::json!({}), &ctx_with(true, Arc::new(ShellRunner)))
            .await;
        assert!(result.error().unwrap().contains("exceeded 1024 bytes"));
    }
}
