//! Orchestrator configuration stored under `.trench/config.toml`.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::core::types::Complexity;
use crate::io::atomic::write_atomic;

/// Orchestrator configuration (TOML).
///
/// Edited by humans; missing fields fall back to the defaults below.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct TrenchConfig {
    /// Prefix for session branches (`<prefix><name>`).
    pub branch_prefix: String,

    /// Directory (relative to the repo root) holding session workspaces.
    pub trenches_dir: String,

    /// How long mutating commands wait for a busy session or merge lock.
    pub lock_timeout_secs: u64,

    /// Default age threshold for `prune`.
    pub stale_days: u32,

    /// Registry entries older than this are treated as dead regardless of the PID.
    pub process_max_age_days: u32,

    /// Age threshold used by the daily `cleanup` sweep.
    pub cleanup_stale_days: u32,

    pub verify: VerifyConfig,

    pub agent: AgentConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct VerifyConfig {
    /// Shell command run inside the workspace (`sh -c`).
    pub command: String,

    pub timeout_secs: u64,

    /// Keep at most this many bytes of each output stream.
    pub output_limit_bytes: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct AgentConfig {
    /// Agent executable, invoked as `<command> -p <task> --model <model>`.
    pub command: String,

    pub simple_model: String,
    pub medium_model: String,
    pub complex_model: String,
}

impl Default for TrenchConfig {
    fn default() -> Self {
        Self {
            branch_prefix: "trench/".to_string(),
            trenches_dir: ".trenches".to_string(),
            lock_timeout_secs: 10,
            stale_days: 3,
            process_max_age_days: 7,
            cleanup_stale_days: 7,
            verify: VerifyConfig::default(),
            agent: AgentConfig::default(),
        }
    }
}

impl Default for VerifyConfig {
    fn default() -> Self {
        Self {
            command: "just ci".to_string(),
            timeout_secs: 10 * 60,
            output_limit_bytes: 1_000_000,
        }
    }
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            command: "claude".to_string(),
            simple_model: "haiku".to_string(),
            medium_model: "sonnet".to_string(),
            complex_model: "opus".to_string(),
        }
    }
}

impl AgentConfig {
    /// Model configured for a complexity class.
    pub fn model_for(&self, complexity: Complexity) -> &str {
        match complexity {
            Complexity::Simple => &self.simple_model,
            Complexity::Medium => &self.medium_model,
            Complexity::Complex => &self.complex_model,
        }
    }
}

impl TrenchConfig {
    pub fn validate(&self) -> Result<()> {
        if self.branch_prefix.trim().is_empty() {
            return Err(anyhow!("branch_prefix must be non-empty"));
        }
        if self.trenches_dir.trim().is_empty() || Path::new(&self.trenches_dir).is_absolute() {
            return Err(anyhow!("trenches_dir must be a non-empty relative path"));
        }
        if self.lock_timeout_secs == 0 {
            return Err(anyhow!("lock_timeout_secs must be > 0"));
        }
        if self.process_max_age_days == 0 {
            return Err(anyhow!("process_max_age_days must be > 0"));
        }
        if self.verify.command.trim().is_empty() {
            return Err(anyhow!("verify.command must be non-empty"));
        }
        if self.verify.timeout_secs == 0 {
            return Err(anyhow!("verify.timeout_secs must be > 0"));
        }
        if self.verify.output_limit_bytes == 0 {
            return Err(anyhow!("verify.output_limit_bytes must be > 0"));
        }
        if self.agent.command.trim().is_empty() {
            return Err(anyhow!("agent.command must be non-empty"));
        }
        for (key, model) in [
            ("agent.simple_model", &self.agent.simple_model),
            ("agent.medium_model", &self.agent.medium_model),
            ("agent.complex_model", &self.agent.complex_model),
        ] {
            if model.trim().is_empty() {
                return Err(anyhow!("{key} must be non-empty"));
            }
        }
        Ok(())
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `TrenchConfig::default()`.
pub fn load_config(path: &Path) -> Result<TrenchConfig> {
    if !path.exists() {
        let cfg = TrenchConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: TrenchConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("invalid config {}", path.display()))?;
    Ok(cfg)
}

/// Atomically write config to disk.
pub fn write_config(path: &Path, cfg: &TrenchConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, buf.as_bytes())
}
