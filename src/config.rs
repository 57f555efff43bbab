use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::core::dag::GraphOptions;
use crate::core::failure::FailureClass;
use crate::{wlog_debug, wlog_warn, Error, Result};

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub execution: ExecutionConfig,
    #[serde(default)]
    pub planning: PlanningConfig,
    #[serde(default)]
    pub validation: ValidationConfig,
    /// Assignee name -> shell command template.
    #[serde(default)]
    pub executors: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ExecutionConfig {
    /// Max tasks running at once inside a group. Unset means group size.
    pub concurrency_limit: Option<usize>,
    pub task_timeout_secs: u64,
    /// Estimate used for tasks that declare none.
    pub default_estimate: u64,
    /// JSON-lines file receiving every committed status batch.
    pub tracking_file: Option<String>,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            concurrency_limit: None,
            task_timeout_secs: 600,
            default_estimate: 15,
            tracking_file: None,
        }
    }
}

impl ExecutionConfig {
    pub fn task_timeout(&self) -> Duration {
        Duration::from_secs(self.task_timeout_secs)
    }

    pub fn tracking_path(&self) -> Option<PathBuf> {
        self.tracking_file.as_deref().map(expand_tilde)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PlanningConfig {
    pub infer_file_dependencies: bool,
    pub keyword_inference: bool,
}

impl Default for PlanningConfig {
    fn default() -> Self {
        Self {
            infer_file_dependencies: true,
            keyword_inference: false,
        }
    }
}

impl PlanningConfig {
    pub fn graph_options(&self) -> GraphOptions {
        GraphOptions {
            infer_file_dependencies: self.infer_file_dependencies,
            keyword_inference: self.keyword_inference,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ValidationConfig {
    pub max_attempts: u32,
    pub attempt_timeout_secs: u64,
    pub levels: Vec<LevelConfig>,
    /// Failure class name -> remediation command.
    pub fixes: BTreeMap<String, String>,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            attempt_timeout_secs: 300,
            levels: Vec::new(),
            fixes: BTreeMap::new(),
        }
    }
}

impl ValidationConfig {
    pub fn attempt_timeout(&self) -> Duration {
        Duration::from_secs(self.attempt_timeout_secs)
    }

    /// Remediation commands keyed by parsed class. Unknown class names are
    /// logged and skipped.
    pub fn fix_commands(&self) -> Vec<(FailureClass, String)> {
        self.fixes
            .iter()
            .filter_map(|(name, command)| match name.parse::<FailureClass>() {
                Ok(class) => Some((class, command.clone())),
                Err(_) => {
                    wlog_warn!("Ignoring fix for unknown failure class '{}'", name);
                    None
                }
            })
            .collect()
    }
}

/// One named validation level, e.g. `lint` or `test`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LevelConfig {
    pub name: String,
    pub command: String,
    /// Overrides `validation.max_attempts` for this level.
    #[serde(default)]
    pub max_attempts: Option<u32>,
}

impl Config {
    pub fn weave_dir() -> Result<PathBuf> {
        Ok(dirs::home_dir().ok_or(Error::NoHomeDir)?.join(".weave"))
    }

    pub fn config_path() -> Result<PathBuf> {
        Ok(Self::weave_dir()?.join("weave.toml"))
    }

    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    /// Load from an explicit path, falling back to defaults when the file is absent.
    pub fn load_from(path: &Path) -> Result<Self> {
        wlog_debug!("Config::load path={}", path.display());
        if !path.exists() {
            wlog_debug!("Config file not found, using defaults");
            return Ok(Self::default());
        }
        let config: Self = toml::from_str(&fs::read_to_string(path)?)?;
        wlog_debug!(
            "Config loaded: executors={}, levels={}, concurrency_limit={:?}",
            config.executors.len(),
            config.validation.levels.len(),
            config.execution.concurrency_limit
        );
        Ok(config)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                wlog_debug!("Creating config directory: {}", parent.display());
                fs::create_dir_all(parent)?;
            }
        }
        fs::write(path, toml::to_string_pretty(self)?)?;
        wlog_debug!("Config saved to {}", path.display());
        Ok(())
    }

    /// Write the default config to `path`. An existing file is kept unless
    /// `force` is set.
    pub fn write_default(path: &Path, force: bool) -> Result<()> {
        if path.exists() && !force {
            return Err(Error::Validation(format!(
                "{} already exists (use --force to overwrite)",
                path.display()
            )));
        }
        Self::default().save_to(path)
    }

    pub fn ensure_dirs() -> Result<()> {
        let weave_dir = Self::weave_dir()?;
        if !weave_dir.exists() {
            wlog_debug!("Creating weave directory: {}", weave_dir.display());
            fs::create_dir_all(&weave_dir)?;
        }
        Ok(())
    }

    /// Look up a validation level by name.
    pub fn level(&self, name: &str) -> Option<&LevelConfig> {
        self.validation.levels.iter().find(|l| l.name == name)
    }
}

fn expand_tilde(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}
