use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

use crate::{flog_debug, Error, Result};

fn default_max_concurrent() -> usize {
    4
}

fn default_save_debounce_ms() -> u64 {
    500
}

/// Engine configuration loaded from ~/.taskforge/taskforge.toml.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Default per-agent concurrency cap when the registry gives none.
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_agents: usize,
    /// Minimum interval between coalesced state writes.
    #[serde(default = "default_save_debounce_ms")]
    pub save_debounce_ms: u64,
    /// Override for the directory holding per-scope state files.
    pub state_dir: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_concurrent_agents: default_max_concurrent(),
            save_debounce_ms: default_save_debounce_ms(),
            state_dir: None,
        }
    }
}

impl Config {
    pub fn forge_dir() -> Result<PathBuf> {
        Ok(dirs::home_dir().ok_or(Error::NoHomeDir)?.join(".taskforge"))
    }

    pub fn config_path() -> Result<PathBuf> {
        Ok(Self::forge_dir()?.join("taskforge.toml"))
    }

    /// Directory holding one JSON state file per scope.
    pub fn state_dir(&self) -> Result<PathBuf> {
        match &self.state_dir {
            Some(dir) => Ok(dir.clone()),
            None => Ok(Self::forge_dir()?.join("state")),
        }
    }

    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;
        flog_debug!("Config::load path={}", path.display());
        if !path.exists() {
            flog_debug!("Config file not found, using defaults");
            return Ok(Self::default());
        }
        let config: Self = toml::from_str(&fs::read_to_string(&path)?)?;
        flog_debug!(
            "Config loaded: max_concurrent_agents={}, save_debounce_ms={}",
            config.max_concurrent_agents,
            config.save_debounce_ms
        );
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        let forge_dir = Self::forge_dir()?;
        if !forge_dir.exists() {
            fs::create_dir_all(&forge_dir)?;
        }
        fs::write(Self::config_path()?, toml::to_string_pretty(self)?)?;
        Ok(())
    }

    pub fn save_debounce(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.save_debounce_ms)
    }
}
