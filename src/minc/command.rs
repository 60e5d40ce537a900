use crate::cancel::CancelToken;
use crate::error::{AlignError, Result};
use std::ffi::{OsStr, OsString};
use std::process::Stdio;
use tokio::process::Command;

/// One invocation of an external program
#[derive(Debug, Clone)]
pub struct ToolCommand {
    program: String,
    args: Vec<OsString>,
}

impl ToolCommand {
    pub fn new(program: &str) -> Self {
        Self {
            program: program.to_string(),
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl AsRef<OsStr>) -> Self {
        self.args.push(arg.as_ref().to_os_string());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        self.args
            .extend(args.into_iter().map(|a| a.as_ref().to_os_string()));
        self
    }

    /// `-flag v1 v2 v3` with numeric values.
    pub fn triple(self, flag: &str, values: [f64; 3]) -> Self {
        self.arg(flag).args(values.iter().map(|v| v.to_string()))
    }

    /// Shell-like rendering used in logs and error messages.
    pub fn command_line(&self) -> String {
        std::iter::once(self.program.clone())
            .chain(self.args.iter().map(|a| a.to_string_lossy().into_owned()))
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Run to completion and return stdout.
    ///
    /// The child is killed as soon as `cancel` trips.
    pub async fn run(&self, cancel: &CancelToken) -> Result<String> {
        cancel.check()?;
        let line = self.command_line();
        tracing::debug!(command = %line, "running");

        let child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| AlignError::ToolLaunch {
                command: line.clone(),
                source,
            })?;

        // dropping the unfinished wait drops the child, which kills it
        let output = tokio::select! {
            output = child.wait_with_output() => output?,
            _ = cancel.cancelled() => {
                tracing::warn!(command = %line, "killing external tool");
                return Err(AlignError::Cancelled);
            }
        };

        if !output.status.success() {
            return Err(AlignError::ToolFailed {
                command: line,
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}
