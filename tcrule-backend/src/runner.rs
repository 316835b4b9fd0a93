//! External command execution.
//!
//! The engine never spawns processes directly; it goes through a
//! [`CommandRunner`] so tests can substitute an in-memory control plane.

use std::future::Future;
use std::pin::Pin;
use std::process::Stdio;

use tokio::process::Command;
use tracing::trace;

/// Exit status and interleaved output of one finished process.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandOutput {
    pub success: bool,
    /// Human-readable status, e.g. `exit status: 2`.
    pub status: String,
    /// stdout followed by stderr.
    pub output: String,
}

impl CommandOutput {
    pub fn ok(output: impl Into<String>) -> Self {
        Self {
            success: true,
            status: "exit status: 0".to_string(),
            output: output.into(),
        }
    }

    pub fn failed(code: i32, output: impl Into<String>) -> Self {
        Self {
            success: false,
            status: format!("exit status: {}", code),
            output: output.into(),
        }
    }
}

pub type RunFuture<'a> = Pin<Box<dyn Future<Output = std::io::Result<CommandOutput>> + Send + 'a>>;

/// Runs a program to completion. An `Err` means the process never started;
/// a non-zero exit is an `Ok` with `success == false`.
pub trait CommandRunner: Send + Sync {
    fn run<'a>(&'a self, program: &'a str, args: &'a [String]) -> RunFuture<'a>;
}

/// Spawns real processes with tokio.
#[derive(Debug, Clone, Default)]
pub struct SystemCommandRunner;

impl SystemCommandRunner {
    pub fn new() -> Self {
        Self
    }
}

impl CommandRunner for SystemCommandRunner {
    fn run<'a>(&'a self, program: &'a str, args: &'a [String]) -> RunFuture<'a> {
        Box::pin(async move {
            let output = Command::new(program)
                .args(args)
                .stdin(Stdio::null())
                .stdout(Stdio::piped())
                .stderr(Stdio::piped())
                .output()
                .await?;

            let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
            combined.push_str(&String::from_utf8_lossy(&output.stderr));
            trace!(
                "{} exited with {}: {} bytes of output",
                program,
                output.status,
                combined.len()
            );

            Ok(CommandOutput {
                success: output.status.success(),
                status: output.status.to_string(),
                output: combined,
            })
        })
    }
}
