//! Shared utility functions.

use std::future::Future;
use std::time::{Duration, Instant};

use tokio::process::Command;
use tokio::time::timeout;

use crate::{wlog_trace, Error, Result};

/// Captured result of a shell command.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub success: bool,
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub elapsed: Duration,
}

impl CommandOutput {
    /// Stdout and stderr joined, for classification.
    pub fn combined(&self) -> String {
        match (self.stdout.is_empty(), self.stderr.is_empty()) {
            (true, _) => self.stderr.clone(),
            (_, true) => self.stdout.clone(),
            _ => format!("{}\n{}", self.stdout, self.stderr),
        }
    }
}

pub async fn with_timeout<F, T>(duration: Duration, fut: F) -> Result<T>
where
    F: Future<Output = T>,
{
    timeout(duration, fut)
        .await
        .map_err(|_| Error::Timeout(duration))
}

/// Run `command` through `sh -c` with extra environment variables.
///
/// The child is killed if the timeout expires.
pub async fn run_shell(
    command: &str,
    envs: &[(&str, String)],
    duration: Duration,
) -> Result<CommandOutput> {
    wlog_trace!("run_shell command={:?} timeout={:?}", command, duration);
    let started = Instant::now();

    let mut cmd = Command::new("sh");
    cmd.arg("-c").arg(command).kill_on_drop(true);
    for (key, value) in envs {
        cmd.env(key, value);
    }

    let output = with_timeout(duration, cmd.output()).await??;

    Ok(CommandOutput {
        success: output.status.success(),
        exit_code: output.status.code(),
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        elapsed: started.elapsed(),
    })
}

/// Keep the last `max_chars` characters of `text`.
pub fn tail(text: &str, max_chars: usize) -> String {
    let count = text.chars().count();
    if count <= max_chars {
        return text.to_string();
    }
    text.chars().skip(count - max_chars).collect()
}
