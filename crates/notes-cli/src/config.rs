//! Engine configuration read from the data directory.

use anyhow::{Context, Result};
use notes_sync::EngineConfig;
use std::fs;
use std::path::Path;

pub const CONFIG_FILE: &str = "config.json";

/// Load `config.json` from the data directory, or defaults if it is absent.
pub fn load_engine_config(data_dir: &Path) -> Result<EngineConfig> {
    let path = data_dir.join(CONFIG_FILE);
    if !path.exists() {
        return Ok(EngineConfig::default());
    }

    let contents =
        fs::read_to_string(&path).with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&contents).with_context(|| format!("Invalid config in {}", path.display()))
}
