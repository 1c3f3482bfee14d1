use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct FileConfig {
    pub cover: Option<CoverConfig>,
    pub export: Option<ExportConfig>,
    pub validator: Option<ValidatorConfig>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct CoverConfig {
    /// Longest side, in pixels, an embedded cover is scaled down to.
    pub max_dimension: Option<u32>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct ExportConfig {
    pub max_items: Option<usize>,
    /// "stored" or "deflated"
    pub compression: Option<String>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct ValidatorConfig {
    pub ffprobe_path: Option<String>,
    pub timeout_sec: Option<u64>,
    pub spawn_retries: Option<u32>,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        toml::from_str(&content).with_context(|| format!("Failed to parse config file: {:?}", path))
    }
}
