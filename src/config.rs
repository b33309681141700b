use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use anyhow::{Result, anyhow};

use crate::error::ChatError;

pub const API_KEY_FILE: &str = "APIKEY.txt";
pub const API_KEY_ENV: &str = "OPENROUTER_API_KEY";
pub const DEFAULT_BIND: &str = "127.0.0.1:3000";
pub const DEFAULT_MAX_TOKENS: u32 = 4096;

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct Config {
    pub default_model: Option<String>,
    pub max_tokens: Option<u32>,
    pub referer: Option<String>,
    pub app_title: Option<String>,
    pub relay_url: Option<String>,
    pub bind: Option<String>,
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn load() -> Result<Self> {
        let config_path = Self::get_config_path()?;
        Self::load_from(&config_path)
    }

    pub fn load_from(config_path: &Path) -> Result<Self> {
        if !config_path.exists() {
            return Ok(Self::new());
        }

        let config_content = fs::read_to_string(config_path)?;
        let config: Config = serde_json::from_str(&config_content)?;
        Ok(config)
    }

    pub fn bind_addr(&self) -> &str {
        self.bind.as_deref().unwrap_or(DEFAULT_BIND)
    }

    /// Directory holding the config file, the persisted chat state and the TUI log.
    pub fn config_dir() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow!("Could not determine config directory"))?;

        Ok(config_dir.join("openrouter-chat"))
    }

    fn get_config_path() -> Result<PathBuf> {
        Ok(Self::config_dir()?.join("config.json"))
    }
}

/// Where the bearer token comes from.
///
/// The environment variable wins; otherwise the first non-empty `APIKEY.txt`
/// among the candidate paths is used.
#[derive(Debug, Clone)]
pub struct ApiKeySource {
    pub env_var: Option<String>,
    pub candidates: Vec<PathBuf>,
}

impl ApiKeySource {
    /// Next to the executable, then the working directory, then its parent.
    pub fn default_locations() -> Self {
        let mut candidates = Vec::new();
        if let Some(exe_dir) = std::env::current_exe()
            .ok()
            .and_then(|exe| exe.parent().map(Path::to_path_buf))
        {
            candidates.push(exe_dir.join(API_KEY_FILE));
        }
        if let Ok(cwd) = std::env::current_dir() {
            candidates.push(cwd.join(API_KEY_FILE));
            if let Some(parent) = cwd.parent() {
                candidates.push(parent.join(API_KEY_FILE));
            }
        }

        Self {
            env_var: Some(API_KEY_ENV.to_string()),
            candidates,
        }
    }

    /// A single key file and no environment lookup.
    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self {
            env_var: None,
            candidates: vec![path.into()],
        }
    }

    pub fn load(&self) -> Result<String, ChatError> {
        if let Some(var) = &self.env_var {
            if let Ok(key) = std::env::var(var) {
                let key = key.trim();
                if !key.is_empty() {
                    return Ok(key.to_string());
                }
            }
        }

        for path in &self.candidates {
            match fs::read_to_string(path) {
                Ok(content) => {
                    let key = content.trim();
                    if !key.is_empty() {
                        tracing::debug!("Using API key from {}", path.display());
                        return Ok(key.to_string());
                    }
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => tracing::warn!("Error reading API key from {}: {}", path.display(), e),
            }
        }

        Err(ChatError::config(format!(
            "API key not found. Create {} next to the application or set {}.",
            API_KEY_FILE, API_KEY_ENV
        )))
    }
}
