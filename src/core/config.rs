use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::services::llm::LlmConfig;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Config {
    #[serde(default = "default_store")]
    pub store_folder: String,

    pub llm: LlmConfig,

    #[serde(default)]
    pub casting: CastingConfig,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct CastingConfig {
    #[serde(default = "default_catalog_path")]
    pub catalog_path: String,

    pub narrator_voice: Option<String>,

    /// Treat a voice/character gender mismatch as a validation failure.
    #[serde(default = "default_strict_gender")]
    pub strict_gender: bool,

    #[serde(default = "default_proposer_timeout")]
    pub proposer_timeout_seconds: u64,
}

impl Default for CastingConfig {
    fn default() -> Self {
        Self {
            catalog_path: default_catalog_path(),
            narrator_voice: None,
            strict_gender: default_strict_gender(),
            proposer_timeout_seconds: default_proposer_timeout(),
        }
    }
}

fn default_store() -> String {
    "build".to_string()
}
fn default_catalog_path() -> String {
    "voices.yml".to_string()
}
fn default_strict_gender() -> bool {
    true
}
fn default_proposer_timeout() -> u64 {
    120
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            anyhow::bail!("{} not found. Please create one.", path.display());
        }

        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let config: Config = serde_yaml_ng::from_str(&content)
            .with_context(|| format!("Failed to parse {}", path.display()))?;
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content = serde_yaml_ng::to_string(self)?;
        fs::write(path, content).with_context(|| format!("Failed to write {}", path.display()))?;
        Ok(())
    }

    pub fn ensure_directories(&self) -> Result<()> {
        fs::create_dir_all(&self.store_folder)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_fill_missing_casting_section() -> Result<()> {
        let config: Config = serde_yaml_ng::from_str(
            "llm:\n  provider: ollama\n  ollama:\n    base_url: http://localhost:11434\n    model: llama3\n",
        )?;
        assert_eq!(config.store_folder, "build");
        assert_eq!(config.casting.catalog_path, "voices.yml");
        assert!(config.casting.strict_gender);
        assert_eq!(config.casting.proposer_timeout_seconds, 120);
        assert!(config.casting.narrator_voice.is_none());
        Ok(())
    }

    #[test]
    fn test_save_and_load() -> Result<()> {
        let temp_dir = tempfile::tempdir()?;
        let path = temp_dir.path().join("config.yml");

        let config: Config = serde_yaml_ng::from_str(
            "store_folder: out\nllm:\n  provider: gemini\n  gemini:\n    api_key: k\n    model: m\ncasting:\n  narrator_voice: N\n  strict_gender: false\n",
        )?;
        config.save(&path)?;

        let loaded = Config::load(&path)?;
        assert_eq!(loaded.store_folder, "out");
        assert_eq!(loaded.casting.narrator_voice.as_deref(), Some("N"));
        assert!(!loaded.casting.strict_gender);
        Ok(())
    }

    #[test]
    fn test_load_missing_file() {
        let err = Config::load(Path::new("/nonexistent/config.yml")).unwrap_err();
        assert!(err.to_string().contains("not found"));
    }
}
