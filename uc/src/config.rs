//! updatecoord configuration types and loading

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use eyre::{Context, Result, eyre};
use serde::{Deserialize, Serialize};

use crate::coordinator::CoordinatorConfig;
use crate::source::OutputFormat;

/// Project-local config file name
pub const LOCAL_CONFIG_FILE: &str = ".updatecoord.yml";

/// Main `uc` configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Log level (TRACE, DEBUG, INFO, WARN, ERROR)
    #[serde(rename = "log-level", skip_serializing_if = "Option::is_none")]
    pub log_level: Option<String>,

    /// Optional JSONL file receiving every coordinator event
    #[serde(rename = "event-log", skip_serializing_if = "Option::is_none")]
    pub event_log: Option<PathBuf>,

    /// Polled sources, one coordinator each
    pub sources: Vec<SourceConfig>,
}

/// One polled source: a coordinator plus the command that fetches for it
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    #[serde(flatten)]
    pub coordinator: CoordinatorConfig,

    /// Shell command run on every refresh
    pub command: String,

    /// How stdout is interpreted
    #[serde(default)]
    pub output: OutputFormat,
}

impl SourceConfig {
    pub fn name(&self) -> &str {
        &self.coordinator.name
    }
}

impl Config {
    /// Validate configuration before use
    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for source in &self.sources {
            if source.name().trim().is_empty() {
                return Err(eyre!("Source with empty name"));
            }
            if source.command.trim().is_empty() {
                return Err(eyre!("Source '{}' has an empty command", source.name()));
            }
            source
                .coordinator
                .validate()
                .context(format!("Source '{}' is misconfigured", source.name()))?;
            if !seen.insert(source.name()) {
                return Err(eyre!("Duplicate source name '{}'", source.name()));
            }
        }
        Ok(())
    }

    /// Find a source by name
    pub fn source(&self, name: &str) -> Option<&SourceConfig> {
        self.sources.iter().find(|s| s.name() == name)
    }

    /// Load configuration with fallback chain
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        // If explicit config path provided, try to load it
        if let Some(path) = config_path {
            return Self::load_from_file(path).context(format!("Failed to load config from {}", path.display()));
        }

        // Try project-local config: .updatecoord.yml
        let local_config = PathBuf::from(LOCAL_CONFIG_FILE);
        if local_config.exists() {
            match Self::load_from_file(&local_config) {
                Ok(config) => return Ok(config),
                Err(e) => {
                    tracing::warn!("Failed to load config from {}: {}", local_config.display(), e);
                }
            }
        }

        // Try user config: ~/.config/updatecoord/updatecoord.yml
        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join("updatecoord").join("updatecoord.yml");
            if user_config.exists() {
                match Self::load_from_file(&user_config) {
                    Ok(config) => return Ok(config),
                    Err(e) => {
                        tracing::warn!("Failed to load config from {}: {}", user_config.display(), e);
                    }
                }
            }
        }

        // No config file found, use defaults
        tracing::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    /// Read only the log level, before logging is initialized
    ///
    /// Errors are swallowed; the full load reports them later.
    pub fn load_log_level(config_path: Option<&PathBuf>) -> Option<String> {
        let candidates = match config_path {
            Some(path) => vec![path.clone()],
            None => {
                let mut paths = vec![PathBuf::from(LOCAL_CONFIG_FILE)];
                if let Some(config_dir) = dirs::config_dir() {
                    paths.push(config_dir.join("updatecoord").join("updatecoord.yml"));
                }
                paths
            }
        };

        candidates
            .iter()
            .filter(|path| path.exists())
            .find_map(|path| Self::load_from_file(path).ok())
            .and_then(|config| config.log_level)
    }

    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read config file")?;

        let config: Self = serde_yaml::from_str(&content).context("Failed to parse config file")?;

        tracing::info!("Loaded config from: {}", path.as_ref().display());
        Ok(config)
    }
}
