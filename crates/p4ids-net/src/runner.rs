//! Execution of the `ip` / `tc` / `ping` commands that provision the network.
//!
//! Every OS-level change goes through a [`Runner`], so the same provisioning
//! code can execute for real ([`SystemRunner`]) or only print and record what
//! it would do ([`DryRunRunner`]).

use std::io;
use std::process::Command;
use std::sync::Mutex;

/// Captured result of a finished command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CmdOutput {
    pub success: bool,
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CmdOutput {
    pub fn ok() -> Self {
        Self {
            success: true,
            code: Some(0),
            ..Default::default()
        }
    }
}

pub trait Runner {
    /// Run a command to completion, capturing its output.
    fn run(&self, program: &str, args: &[&str]) -> io::Result<CmdOutput>;

    /// Run a command attached to the terminal and return its exit code
    /// (`None` when it was killed by a signal).
    fn run_foreground(&self, program: &str, args: &[&str]) -> io::Result<Option<i32>>;
}

impl<R: Runner + ?Sized> Runner for &R {
    fn run(&self, program: &str, args: &[&str]) -> io::Result<CmdOutput> {
        (**self).run(program, args)
    }

    fn run_foreground(&self, program: &str, args: &[&str]) -> io::Result<Option<i32>> {
        (**self).run_foreground(program, args)
    }
}

/// Turns a failed command into an `io::Error` carrying its stderr.
pub fn check(output: CmdOutput, what: &str) -> io::Result<CmdOutput> {
    if output.success {
        return Ok(output);
    }
    Err(io::Error::other(format!(
        "Failed to {}: {}",
        what,
        output.stderr.trim()
    )))
}

/// Renders a command line for logs and dry-run output.
pub fn command_line(program: &str, args: &[&str]) -> String {
    let mut line = program.to_string();
    for arg in args {
        line.push(' ');
        line.push_str(arg);
    }
    line
}

/// Executes commands on the host, optionally through `sudo`.
#[derive(Debug, Clone, Default)]
pub struct SystemRunner {
    sudo: bool,
}

impl SystemRunner {
    pub fn new(sudo: bool) -> Self {
        Self { sudo }
    }

    fn command(&self, program: &str, args: &[&str]) -> Command {
        let mut cmd = if self.sudo {
            let mut cmd = Command::new("sudo");
            cmd.arg(program);
            cmd
        } else {
            Command::new(program)
        };
        cmd.args(args);
        cmd
    }
}

impl Runner for SystemRunner {
    fn run(&self, program: &str, args: &[&str]) -> io::Result<CmdOutput> {
        tracing::debug!(cmd = %command_line(program, args), sudo = self.sudo, "exec");
        let output = self.command(program, args).output()?;
        Ok(CmdOutput {
            success: output.status.success(),
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }

    fn run_foreground(&self, program: &str, args: &[&str]) -> io::Result<Option<i32>> {
        tracing::debug!(cmd = %command_line(program, args), sudo = self.sudo, "exec (foreground)");
        let status = self.command(program, args).status()?;
        Ok(status.code())
    }
}

/// Records every command instead of executing it. All commands succeed.
#[derive(Debug, Default)]
pub struct DryRunRunner {
    commands: Mutex<Vec<String>>,
}

impl DryRunRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Command lines recorded so far, in execution order.
    pub fn commands(&self) -> Vec<String> {
        self.commands
            .lock()
            .map(|c| c.clone())
            .unwrap_or_default()
    }

    fn record(&self, line: String) {
        tracing::info!(cmd = %line, "dry-run");
        if let Ok(mut commands) = self.commands.lock() {
            commands.push(line);
        }
    }
}

impl Runner for DryRunRunner {
    fn run(&self, program: &str, args: &[&str]) -> io::Result<CmdOutput> {
        self.record(command_line(program, args));
        Ok(CmdOutput::ok())
    }

    fn run_foreground(&self, program: &str, args: &[&str]) -> io::Result<Option<i32>> {
        self.record(command_line(program, args));
        Ok(Some(0))
    }
}
