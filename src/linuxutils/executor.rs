//! External command execution

use crate::domain::ports::{CommandOutput, CommandRunner};
use crate::error::{Error, Result};
use crate::metrics;
use async_trait::async_trait;
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, trace};

/// Runs programs with tokio::process and captures their output
///
/// There is no timeout: callers that need a deadline have to stop waiting
/// on their side.
#[derive(Debug, Clone, Default)]
pub struct SystemExecutor;

impl SystemExecutor {
    pub fn new() -> Self {
        Self
    }
}

/// Render a command line for logs and error messages
pub fn command_line(program: &str, args: &[&str]) -> String {
    let mut line = program.to_string();
    for arg in args {
        line.push(' ');
        line.push_str(arg);
    }
    line
}

#[async_trait]
impl CommandRunner for SystemExecutor {
    async fn run(&self, program: &str, args: &[&str]) -> Result<CommandOutput> {
        let cmd = command_line(program, args);
        debug!("Running command: {}", cmd);

        let name = program.rsplit('/').next().unwrap_or(program);
        let _timer = metrics::system_commands().map(|m| m.start_timer(name));

        let output = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| Error::CommandSpawn {
                command: cmd.clone(),
                source: e,
            })?;

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
        trace!("command {} stdout: {:?} stderr: {:?}", cmd, stdout, stderr);

        if !output.status.success() {
            return Err(Error::CommandFailed {
                command: cmd,
                code: output.status.code(),
                stderr: stderr.trim().to_string(),
            });
        }

        Ok(CommandOutput { stdout, stderr })
    }
}
