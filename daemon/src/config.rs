//! Configuration management (TOML)

use crate::error::Result;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

pub const DEFAULT_DELAY: f64 = 1.0;

static DELAY_TEXT: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\d*\.?\d+$").unwrap());

/// Parses a sampling delay given as text. Anything that isn't a plain
/// non-negative decimal number yields the default of 1 second.
pub fn validate_delay(text: &str) -> f64 {
    if !DELAY_TEXT.is_match(text) {
        return DEFAULT_DELAY;
    }
    match text.parse::<f64>() {
        Ok(delay) if delay >= 0.0 => delay,
        _ => DEFAULT_DELAY,
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub sampler: SamplerConfig,
    #[serde(default)]
    pub enricher: EnricherConfig,
    #[serde(default)]
    pub filter: FilterConfig,
    #[serde(default)]
    pub socket: SocketConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SamplerConfig {
    pub program: String,
    /// Seconds between samples, as numeric text.
    pub delay: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnricherConfig {
    pub program: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FilterConfig {
    #[serde(default)]
    pub commands: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SocketConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        SamplerConfig {
            program: "top".to_string(),
            delay: "1".to_string(),
        }
    }
}

impl Default for EnricherConfig {
    fn default() -> Self {
        EnricherConfig { program: "ps".to_string() }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, content)?;
        Ok(())
    }

    pub fn config_path() -> PathBuf {
        directories::ProjectDirs::from("", "", "procwatch")
            .map(|dirs| dirs.config_dir().join("config.toml"))
            .unwrap_or_else(|| PathBuf::from("config.toml"))
    }

    pub fn sample_delay(&self) -> f64 {
        validate_delay(&self.sampler.delay)
    }
}
