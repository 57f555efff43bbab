//! Fix strategies applied between validation attempts.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::core::FailureClass;
use crate::util::{run_shell, tail};
use crate::{wlog_debug, Result};

/// What a fix strategy did, attached to the attempt that triggered it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FixRecord {
    pub strategy: String,
    pub description: String,
    /// False when the remediation itself failed or was only annotated.
    pub automated: bool,
}

/// Remediation for one failure class.
#[async_trait]
pub trait FixStrategy: Send + Sync {
    fn name(&self) -> &str;

    /// Attempt a fix for a failed attempt of `level`. `output` is the failing
    /// attempt's captured output.
    async fn apply(&self, level: &str, class: FailureClass, output: &str) -> Result<FixRecord>;
}

/// Records the failure for manual follow-up and changes nothing.
pub struct ManualFix;

#[async_trait]
impl FixStrategy for ManualFix {
    fn name(&self) -> &str {
        "manual"
    }

    async fn apply(&self, level: &str, class: FailureClass, _output: &str) -> Result<FixRecord> {
        Ok(FixRecord {
            strategy: self.name().to_string(),
            description: format!("{} failure in '{}' flagged for manual follow-up", class, level),
            automated: false,
        })
    }
}

/// Runs a remediation command such as `cargo fmt`.
pub struct CommandFix {
    command: String,
    timeout: Duration,
}

impl CommandFix {
    pub fn new(command: impl Into<String>, timeout: Duration) -> Self {
        Self {
            command: command.into(),
            timeout,
        }
    }
}

#[async_trait]
impl FixStrategy for CommandFix {
    fn name(&self) -> &str {
        "command"
    }

    async fn apply(&self, level: &str, class: FailureClass, _output: &str) -> Result<FixRecord> {
        wlog_debug!("CommandFix level={} class={} command={:?}", level, class, self.command);
        let envs = [
            ("WEAVE_LEVEL", level.to_string()),
            ("WEAVE_FAILURE_CLASS", class.to_string()),
        ];
        let out = run_shell(&self.command, &envs, self.timeout).await?;
        let description = if out.success {
            format!("ran `{}`", self.command)
        } else {
            format!(
                "`{}` exited with {:?}: {}",
                self.command,
                out.exit_code,
                tail(out.combined().trim(), 200)
            )
        };
        Ok(FixRecord {
            strategy: self.name().to_string(),
            description,
            automated: out.success,
        })
    }
}

/// Maps failure classes to strategies, falling back to [`ManualFix`].
pub struct FixRegistry {
    strategies: HashMap<FailureClass, Arc<dyn FixStrategy>>,
    fallback: Arc<dyn FixStrategy>,
}

impl Default for FixRegistry {
    fn default() -> Self {
        Self {
            strategies: HashMap::new(),
            fallback: Arc::new(ManualFix),
        }
    }
}

impl FixRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// One [`CommandFix`] per configured class.
    pub fn from_commands(commands: Vec<(FailureClass, String)>, timeout: Duration) -> Self {
        let mut registry = Self::new();
        for (class, command) in commands {
            registry.register(class, Arc::new(CommandFix::new(command, timeout)));
        }
        registry
    }

    pub fn register(&mut self, class: FailureClass, strategy: Arc<dyn FixStrategy>) {
        self.strategies.insert(class, strategy);
    }

    pub fn get(&self, class: FailureClass) -> Arc<dyn FixStrategy> {
        self.strategies
            .get(&class)
            .cloned()
            .unwrap_or_else(|| Arc::clone(&self.fallback))
    }
}
