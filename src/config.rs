use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::call_depth::DEFAULT_MAX_CALL_DEPTH;
use crate::console::DEFAULT_CONSOLE_CAPACITY;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextConfig {
    #[serde(default = "ContextConfig::default_tick_budget_ms")]
    pub tick_budget_ms: u64,
    #[serde(default = "ContextConfig::default_max_call_depth")]
    pub max_call_depth: usize,
    #[serde(default = "ContextConfig::default_max_eval_polls")]
    pub max_eval_polls: usize,
    #[serde(default = "ContextConfig::default_fixed_dt")]
    pub fixed_dt: f32,
    #[serde(default = "ContextConfig::default_max_backlog")]
    pub max_backlog: f32,
    /// Budget overruns in a row after which the driver gives up on a task.
    #[serde(default = "ContextConfig::default_max_task_retries")]
    pub max_task_retries: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScriptConfig {
    /// Rhai operations between two budget checks.
    #[serde(default = "ScriptConfig::default_progress_check_interval")]
    pub progress_check_interval: u64,
    /// Hard cap on operations per script call; 0 disables it.
    #[serde(default)]
    pub max_operations: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsoleConfig {
    #[serde(default = "ConsoleConfig::default_capacity")]
    pub capacity: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct RuntimeConfig {
    #[serde(default)]
    pub context: ContextConfig,
    #[serde(default)]
    pub scripts: ScriptConfig,
    #[serde(default)]
    pub console: ConsoleConfig,
}

#[derive(Debug, Clone, Default)]
pub struct RuntimeConfigOverrides {
    pub tick_budget_ms: Option<u64>,
    pub max_call_depth: Option<usize>,
    pub max_eval_polls: Option<usize>,
}

impl ContextConfig {
    const fn default_tick_budget_ms() -> u64 {
        100
    }

    const fn default_max_call_depth() -> usize {
        DEFAULT_MAX_CALL_DEPTH
    }

    const fn default_max_eval_polls() -> usize {
        100
    }

    fn default_fixed_dt() -> f32 {
        1.0 / 50.0
    }

    fn default_max_backlog() -> f32 {
        0.25
    }

    const fn default_max_task_retries() -> u32 {
        8
    }

    pub fn tick_budget(&self) -> Duration {
        Duration::from_millis(self.tick_budget_ms)
    }
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            tick_budget_ms: Self::default_tick_budget_ms(),
            max_call_depth: Self::default_max_call_depth(),
            max_eval_polls: Self::default_max_eval_polls(),
            fixed_dt: Self::default_fixed_dt(),
            max_backlog: Self::default_max_backlog(),
            max_task_retries: Self::default_max_task_retries(),
        }
    }
}

impl ScriptConfig {
    const fn default_progress_check_interval() -> u64 {
        256
    }
}

impl Default for ScriptConfig {
    fn default() -> Self {
        Self { progress_check_interval: Self::default_progress_check_interval(), max_operations: 0 }
    }
}

impl ConsoleConfig {
    const fn default_capacity() -> usize {
        DEFAULT_CONSOLE_CAPACITY
    }
}

impl Default for ConsoleConfig {
    fn default() -> Self {
        Self { capacity: Self::default_capacity() }
    }
}

impl RuntimeConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let bytes =
            fs::read(path).with_context(|| format!("Failed to read config file {}", path.display()))?;
        let cfg = serde_json::from_slice(&bytes)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        Ok(cfg)
    }

    pub fn load_or_default(path: impl AsRef<Path>) -> Self {
        match Self::load(path) {
            Ok(cfg) => cfg,
            Err(err) => {
                log::warn!("[config] load error: {err:?}. Falling back to defaults.");
                Self::default()
            }
        }
    }

    pub fn apply_overrides(&mut self, overrides: &RuntimeConfigOverrides) {
        if let Some(budget) = overrides.tick_budget_ms {
            self.context.tick_budget_ms = budget;
        }
        if let Some(depth) = overrides.max_call_depth {
            self.context.max_call_depth = depth;
        }
        if let Some(polls) = overrides.max_eval_polls {
            self.context.max_eval_polls = polls;
        }
    }
}

impl RuntimeConfigOverrides {
    pub fn is_empty(&self) -> bool {
        self.tick_budget_ms.is_none() && self.max_call_depth.is_none() && self.max_eval_polls.is_none()
    }

    pub fn applied_fields(&self) -> Vec<&'static str> {
        let mut fields = Vec::new();
        if self.tick_budget_ms.is_some() {
            fields.push("tick_budget_ms");
        }
        if self.max_call_depth.is_some() {
            fields.push("max_call_depth");
        }
        if self.max_eval_polls.is_some() {
            fields.push("max_eval_polls");
        }
        fields
    }
}
