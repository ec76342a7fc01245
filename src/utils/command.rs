/// Command execution for package managers, systemd and cluster tooling
use anyhow::{Context, Result};
use std::ffi::OsStr;
use std::path::Path;
use std::process::Stdio;
use tokio::process::Command;
use tracing::debug;

use crate::error::KubeForgeError;

/// Result from command execution with captured output
#[derive(Debug)]
pub struct CommandOutput {
    pub command: String,
    pub stdout: String,
    pub stderr: String,
    pub success: bool,
    pub code: i32,
}

impl CommandOutput {
    fn from_output(command: String, output: std::process::Output) -> Self {
        Self {
            command,
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            success: output.status.success(),
            code: output.status.code().unwrap_or(-1),
        }
    }

    /// Return stdout if successful, otherwise a `CommandFailed` error
    pub fn into_result(self) -> Result<String> {
        if self.success {
            Ok(self.stdout)
        } else {
            Err(KubeForgeError::CommandFailed {
                command: self.command,
                code: self.code,
                stderr: self.stderr.trim().to_string(),
            }
            .into())
        }
    }
}

/// Builder for executing external commands with common patterns
pub struct CommandBuilder {
    command: Command,
    program: String,
    display: String,
    redact: bool,
    context_msg: Option<String>,
    stream: bool,
}

impl CommandBuilder {
    /// Create a new command builder
    pub fn new<S: AsRef<OsStr>>(program: S) -> Self {
        let display = program.as_ref().to_string_lossy().to_string();
        let mut command = Command::new(program);
        command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        Self {
            command,
            program: display.clone(),
            display,
            redact: false,
            context_msg: None,
            stream: false,
        }
    }

    /// Run `script` through `sh -c`
    pub fn shell(script: &str) -> Self {
        Self::new("sh").arg("-c").arg(script)
    }

    /// Add a single argument
    pub fn arg<S: AsRef<OsStr>>(mut self, arg: S) -> Self {
        self.display.push(' ');
        self.display.push_str(&arg.as_ref().to_string_lossy());
        self.command.arg(arg);
        self
    }

    /// Add multiple arguments
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        for arg in args {
            self = self.arg(arg);
        }
        self
    }

    /// Set an environment variable on top of the inherited environment
    pub fn env<K, V>(mut self, key: K, val: V) -> Self
    where
        K: AsRef<OsStr>,
        V: AsRef<OsStr>,
    {
        self.command.env(key, val);
        self
    }

    /// Set KUBECONFIG environment variable
    pub fn kubeconfig(self, path: &Path) -> Self {
        self.env("KUBECONFIG", path)
    }

    /// Stream stdout/stderr to the terminal instead of capturing them
    pub fn stream(mut self) -> Self {
        self.stream = true;
        self.command.stdout(Stdio::inherit()).stderr(Stdio::inherit());
        self
    }

    /// Hide the arguments in logs and errors (join commands carry tokens)
    pub fn redact(mut self) -> Self {
        self.redact = true;
        self
    }

    /// Set context message for error reporting
    pub fn context<S: Into<String>>(mut self, msg: S) -> Self {
        self.context_msg = Some(msg.into());
        self
    }

    /// The command line as it appears in logs and errors
    pub fn display(&self) -> String {
        if self.redact {
            format!("{} <redacted>", self.program)
        } else {
            self.display.clone()
        }
    }

    /// Execute and return raw output
    pub async fn output(mut self) -> Result<CommandOutput> {
        let command = self.display();
        debug!("exec: {}", command);

        let result = if self.stream {
            self.command.status().await.map(|status| std::process::Output {
                status,
                stdout: Vec::new(),
                stderr: Vec::new(),
            })
        } else {
            self.command.output().await
        };

        let output = result.map_err(|source| KubeForgeError::CommandSpawn {
            command: command.clone(),
            source,
        });

        let output = match self.context_msg {
            Some(ctx) => output.context(ctx)?,
            None => output?,
        };

        Ok(CommandOutput::from_output(command, output))
    }

    /// Execute and return stdout on success, error on failure
    pub async fn run(self) -> Result<String> {
        let ctx = self.context_msg.clone();
        let result = self.output().await?.into_result();
        match ctx {
            Some(ctx) => result.context(ctx),
            None => result,
        }
    }

    /// Execute and ignore output (just check success)
    pub async fn run_silent(self) -> Result<()> {
        self.run().await.map(|_| ())
    }
}

/// True when `tool_name` runs successfully with `version_args`
pub async fn tool_available(tool_name: &str, version_args: &[&str]) -> bool {
    matches!(
        CommandBuilder::new(tool_name)
            .args(version_args)
            .output()
            .await,
        Ok(out) if out.success
    )
}

/// Check if a command-line tool is installed
pub async fn check_tool_installed(
    tool_name: &str,
    version_args: &[&str],
    install_hint: &str,
) -> Result<()> {
    if tool_available(tool_name, version_args).await {
        Ok(())
    } else {
        anyhow::bail!(
            "{} is not installed or not in PATH. {}",
            tool_name,
            install_hint
        )
    }
}
