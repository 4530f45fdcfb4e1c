//! Configuration management for SPM Edge.
//!
//! Settings come from an optional `spmedge.toml` plus the environment.
//! Runtime-tunable knobs (batch sizes, cleaner toggles) live in the
//! `pipeline_settings` table instead.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::llm::LlmConfig;
use crate::rag::EmbeddingConfig;

/// Database filename inside the data directory.
pub const DATABASE_FILENAME: &str = "spmedge.db";

/// Top-level settings for all pipeline components.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Root directory for pipeline data (stage directories, database, logs).
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// LLM client configuration for the PROCESS stage.
    #[serde(default)]
    pub llm: LlmConfig,

    /// Embedding configuration for the INDEX stage.
    #[serde(default)]
    pub embedding: EmbeddingConfig,
}

fn default_data_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("SPMEDGE_DATA_DIR") {
        return PathBuf::from(shellexpand::tilde(&dir).into_owned());
    }
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("spmedge")
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            llm: LlmConfig::default(),
            embedding: EmbeddingConfig::default(),
        }
    }
}

impl Settings {
    /// Load settings from the given config file, or defaults when absent.
    pub fn load(config_path: Option<&Path>) -> anyhow::Result<Self> {
        let path = match config_path {
            Some(p) => Some(p.to_path_buf()),
            None => {
                let candidate = PathBuf::from("spmedge.toml");
                candidate.exists().then_some(candidate)
            }
        };

        let mut settings = match path {
            Some(p) => {
                let raw = std::fs::read_to_string(&p)
                    .map_err(|e| anyhow::anyhow!("cannot read config {}: {e}", p.display()))?;
                toml::from_str::<Settings>(&raw)
                    .map_err(|e| anyhow::anyhow!("invalid config {}: {e}", p.display()))?
            }
            None => Settings::default(),
        };

        // API keys always come from the environment, never the config file.
        if let Ok(key) = std::env::var("OPENAI_API_KEY") {
            if settings.llm.api_key.is_none() {
                settings.llm.api_key = Some(key.clone());
            }
            if settings.embedding.api_key.is_none() {
                settings.embedding.api_key = Some(key);
            }
        }

        Ok(settings)
    }

    /// Override the data directory (CLI flag takes precedence over config).
    pub fn with_data_dir(mut self, data_dir: Option<PathBuf>) -> Self {
        if let Some(dir) = data_dir {
            self.data_dir = PathBuf::from(shellexpand::tilde(&dir.to_string_lossy()).into_owned());
        }
        self
    }

    /// Path to the SQLite database file.
    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join(DATABASE_FILENAME)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let settings = Settings::default();
        assert!(settings.database_path().ends_with(DATABASE_FILENAME));
    }

    #[test]
    fn missing_explicit_config_is_an_error() {
        let settings = Settings::load(Some(Path::new("/nonexistent/spmedge.toml")));
        assert!(settings.is_err());
    }
}
