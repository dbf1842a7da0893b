/// Command execution for the external tools the orchestrator drives (talosctl, kubectl, helm)
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::ffi::OsStr;
use std::path::Path;
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

use crate::error::PreflightError;

/// Result from command execution with captured output
#[derive(Debug, Clone, Default)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub success: bool,
}

impl CommandOutput {
    /// Create from tokio Command output
    fn from_output(output: std::process::Output) -> Self {
        Self {
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            success: output.status.success(),
        }
    }

    /// Return Ok if successful, otherwise error with stderr
    pub fn into_result(self) -> Result<String> {
        if self.success {
            Ok(self.stdout)
        } else {
            anyhow::bail!("{}", self.stderr.trim())
        }
    }
}

/// A fully described invocation of an external program
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
    pub stdin: Option<String>,
}

impl CommandSpec {
    /// Program and arguments joined by spaces, for logs and matching
    pub fn command_line(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Value following a flag, e.g. `--nodes 10.0.0.1`
    pub fn arg_after(&self, flag: &str) -> Option<&str> {
        self.args
            .iter()
            .position(|a| a == flag)
            .and_then(|i| self.args.get(i + 1))
            .map(String::as_str)
    }
}

/// Executes command specs. The process-backed implementation is used at runtime.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn execute(&self, spec: &CommandSpec) -> Result<CommandOutput>;
}

/// Runs commands as child processes
pub struct ProcessRunner;

#[async_trait]
impl CommandRunner for ProcessRunner {
    async fn execute(&self, spec: &CommandSpec) -> Result<CommandOutput> {
        debug!("exec: {}", spec.command_line());

        let mut command = Command::new(&spec.program);
        command
            .args(&spec.args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .stdin(if spec.stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            });
        for (key, val) in &spec.env {
            command.env(key, val);
        }

        let mut child = command
            .spawn()
            .with_context(|| format!("Failed to spawn {}", spec.program))?;

        if let Some(input) = &spec.stdin {
            if let Some(mut stdin) = child.stdin.take() {
                stdin
                    .write_all(input.as_bytes())
                    .await
                    .with_context(|| format!("Failed to write stdin of {}", spec.program))?;
            }
        }

        let output = child
            .wait_with_output()
            .await
            .with_context(|| format!("Failed to wait for {}", spec.program))?;

        Ok(CommandOutput::from_output(output))
    }
}

/// Builder for executing external commands with common patterns
pub struct CommandBuilder<'a> {
    runner: &'a dyn CommandRunner,
    spec: CommandSpec,
    context_msg: Option<String>,
}

impl<'a> CommandBuilder<'a> {
    /// Create a new command builder
    pub fn new<S: AsRef<OsStr>>(runner: &'a dyn CommandRunner, program: S) -> Self {
        Self {
            runner,
            spec: CommandSpec {
                program: program.as_ref().to_string_lossy().into_owned(),
                ..Default::default()
            },
            context_msg: None,
        }
    }

    /// Add a single argument
    pub fn arg<S: AsRef<OsStr>>(mut self, arg: S) -> Self {
        self.spec
            .args
            .push(arg.as_ref().to_string_lossy().into_owned());
        self
    }

    /// Add multiple arguments
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        self.spec.args.extend(
            args.into_iter()
                .map(|a| a.as_ref().to_string_lossy().into_owned()),
        );
        self
    }

    /// Set an environment variable
    pub fn env<K, V>(mut self, key: K, val: V) -> Self
    where
        K: AsRef<OsStr>,
        V: AsRef<OsStr>,
    {
        self.spec.env.push((
            key.as_ref().to_string_lossy().into_owned(),
            val.as_ref().to_string_lossy().into_owned(),
        ));
        self
    }

    /// Set KUBECONFIG environment variable
    pub fn kubeconfig(self, path: &Path) -> Self {
        self.env("KUBECONFIG", path)
    }

    /// Feed a document to the command's stdin
    pub fn stdin(mut self, input: impl Into<String>) -> Self {
        self.spec.stdin = Some(input.into());
        self
    }

    /// Set context message for error reporting
    pub fn context<S: Into<String>>(mut self, msg: S) -> Self {
        self.context_msg = Some(msg.into());
        self
    }

    /// Execute and return raw output
    pub async fn output(self) -> Result<CommandOutput> {
        let result = self.runner.execute(&self.spec).await;
        match self.context_msg {
            Some(ctx) => result.context(ctx),
            None => result,
        }
    }

    /// Execute and return stdout on success, error on failure
    pub async fn run(self) -> Result<String> {
        let context_msg = self.context_msg.clone();
        let result = self.output().await?.into_result();
        match context_msg {
            Some(ctx) => result.context(ctx),
            None => result,
        }
    }

    /// Execute and ignore output (just check success)
    pub async fn run_silent(self) -> Result<()> {
        self.run().await.map(|_| ())
    }
}

/// Check if a command-line tool is installed
pub async fn check_tool_installed(
    runner: &dyn CommandRunner,
    tool_name: &'static str,
    version_args: &[&str],
    install_url: &'static str,
) -> Result<()> {
    let output = CommandBuilder::new(runner, tool_name)
        .args(version_args)
        .output()
        .await;

    match output {
        Ok(out) if out.success => Ok(()),
        _ => Err(PreflightError::MissingTool {
            tool: tool_name,
            install_url,
        }
        .into()),
    }
}

#[cfg(test)]
impl CommandOutput {
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            stdout: stdout.into(),
            stderr: String::new(),
            success: true,
        }
    }

    pub fn failed(stderr: impl Into<String>) -> Self {
        Self {
            stdout: String::new(),
            stderr: stderr.into(),
            success: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_command_builder_basic() {
        let result = CommandBuilder::new(&ProcessRunner, "echo")
            .arg("test")
            .context("Testing echo command")
            .output()
            .await;

        assert!(result.is_ok());
        let output = result.unwrap();
        assert!(output.success);
        assert!(output.stdout.contains("test"));
    }

    #[tokio::test]
    async fn test_command_builder_env() {
        let result = CommandBuilder::new(&ProcessRunner, "sh")
            .arg("-c")
            .arg("echo $TEST_VAR")
            .env("TEST_VAR", "test_value")
            .output()
            .await;

        assert!(result.is_ok());
        let output = result.unwrap();
        assert!(output.success);
        assert!(output.stdout.contains("test_value"));
    }

    #[tokio::test]
    async fn test_command_builder_stdin() {
        let stdout = CommandBuilder::new(&ProcessRunner, "cat")
            .stdin("kind: Secret\n")
            .run()
            .await
            .unwrap();

        assert_eq!(stdout, "kind: Secret\n");
    }

    #[tokio::test]
    async fn test_run_reports_stderr_on_failure() {
        let err = CommandBuilder::new(&ProcessRunner, "sh")
            .args(["-c", "echo boom >&2; exit 3"])
            .context("Running failing script")
            .run()
            .await
            .unwrap_err();

        let msg = format!("{:#}", err);
        assert!(msg.contains("Running failing script"));
        assert!(msg.contains("boom"));
    }

    #[tokio::test]
    async fn test_missing_tool_is_preflight_error() {
        let err = check_tool_installed(
            &ProcessRunner,
            "definitely-not-a-real-tool-4821",
            &["version"],
            "https://example.invalid/install",
        )
        .await
        .unwrap_err();

        assert!(matches!(
            err.downcast_ref::<PreflightError>(),
            Some(PreflightError::MissingTool { .. })
        ));
    }

    #[test]
    fn test_spec_helpers() {
        let spec = CommandSpec {
            program: "talosctl".to_string(),
            args: vec!["bootstrap".into(), "--nodes".into(), "10.0.0.2".into()],
            ..Default::default()
        };
        assert_eq!(spec.command_line(), "talosctl bootstrap --nodes 10.0.0.2");
        assert_eq!(spec.arg_after("--nodes"), Some("10.0.0.2"));
        assert_eq!(spec.arg_after("--endpoints"), None);
    }
}
