//! CLI configuration.
//!
//! A small TOML file at `~/.config/foreman/config.toml` plus a resolution
//! chain: environment variable > config file > built-in default. Only the
//! agent command and the two engine intervals are configurable; everything
//! else is policy.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use foreman_core::config::EngineConfig;

/// Environment variable overriding the agent CLI command.
pub const AGENT_CMD_ENV: &str = "FOREMAN_AGENT_CMD";

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub agent: AgentSection,
    #[serde(default)]
    pub engine: EngineSection,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct AgentSection {
    /// Name or path of the agent CLI binary.
    pub command: Option<String>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct EngineSection {
    /// Seconds between supervisor checks.
    pub check_interval_secs: Option<u64>,
    /// Seconds between realtime log polls.
    pub realtime_interval_secs: Option<u64>,
}

/// Config directory, XDG layout: `$XDG_CONFIG_HOME/foreman` or
/// `~/.config/foreman`.
pub fn config_dir() -> PathBuf {
    if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
        return PathBuf::from(xdg).join("foreman");
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".config")
        .join("foreman")
}

pub fn config_path() -> PathBuf {
    config_dir().join("config.toml")
}

/// Load the config file if it exists.
pub fn load_config() -> Result<Option<ConfigFile>> {
    let path = config_path();
    if !path.exists() {
        return Ok(None);
    }
    let contents = std::fs::read_to_string(&path)
        .with_context(|| format!("failed to read config file at {}", path.display()))?;
    let config = toml::from_str(&contents)
        .with_context(|| format!("failed to parse config file at {}", path.display()))?;
    Ok(Some(config))
}

/// Resolve the full engine configuration.
pub fn resolve_engine_config(max_tasks: Option<u32>, quiet: bool) -> Result<EngineConfig> {
    let file = load_config()?;
    let mut config = EngineConfig::default();

    config.agent_cmd = if let Ok(cmd) = std::env::var(AGENT_CMD_ENV) {
        cmd
    } else if let Some(cmd) = file.as_ref().and_then(|f| f.agent.command.clone()) {
        cmd
    } else {
        config.agent_cmd
    };

    if let Some(secs) = file.as_ref().and_then(|f| f.engine.check_interval_secs) {
        config.check_interval = Duration::from_secs(secs);
    }
    if let Some(secs) = file.as_ref().and_then(|f| f.engine.realtime_interval_secs) {
        config.realtime_interval = Duration::from_secs(secs);
    }

    config.max_tasks = max_tasks;
    config.quiet = quiet;
    tracing::debug!(agent_cmd = %config.agent_cmd, "engine configuration resolved");
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_path_ends_with_expected_filename() {
        assert!(config_path().ends_with("foreman/config.toml"));
    }

    #[test]
    fn config_file_parses_with_all_sections_optional() {
        let config: ConfigFile = toml::from_str("").unwrap();
        assert!(config.agent.command.is_none());
        assert!(config.engine.check_interval_secs.is_none());

        let config: ConfigFile = toml::from_str(
            "[agent]\ncommand = \"claude-next\"\n[engine]\ncheck_interval_secs = 600\n",
        )
        .unwrap();
        assert_eq!(config.agent.command.as_deref(), Some("claude-next"));
        assert_eq!(config.engine.check_interval_secs, Some(600));
    }
}
