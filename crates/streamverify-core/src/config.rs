//! Verifier configuration file.
//!
//! ```json
//! {
//!   "general_instruction": " Reply with a short verdict.",
//!   "categories": { "requirement": "Review this requirement." },
//!   "model": "local-model",
//!   "temperature": 0.7
//! }
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;
use tracing::info;

use crate::registry::CategoryRegistry;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid config JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("config defines no categories")]
    NoCategories,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct VerifierConfig {
    #[serde(default)]
    pub general_instruction: String,
    #[serde(default)]
    pub categories: BTreeMap<String, String>,
    /// Overrides the client's default model when set.
    #[serde(default)]
    pub model: Option<String>,
    /// Overrides the client's default temperature when set.
    #[serde(default)]
    pub temperature: Option<f32>,
}

impl VerifierConfig {
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let json = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_json(&json)?;
        info!(
            path = %path.display(),
            categories = config.categories.len(),
            "loaded verifier config"
        );
        Ok(config)
    }

    /// Freeze the category map into a read-only registry.
    pub fn registry(&self) -> Result<CategoryRegistry, ConfigError> {
        if self.categories.is_empty() {
            return Err(ConfigError::NoCategories);
        }
        Ok(CategoryRegistry::new(
            self.general_instruction.clone(),
            self.categories.clone(),
        ))
    }
}
