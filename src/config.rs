//! Pipeline Configuration
//!
//! Loads and saves the pipeline configuration from `~/.consilium/consilium.json`.

use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Config file name within the consilium directory.
const CONFIG_FILENAME: &str = "consilium.json";

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineConfig {
    /// OpenAI-compatible chat completions base URL.
    pub api_url: String,
    pub api_key: String,
    /// Model for the grounding / web research stages.
    pub model: String,
    /// Model for the final planning stage.
    pub planner_model: String,
    pub max_tokens: u32,
    /// Path to the read-only KPI store the SQL tools query.
    pub kpi_db_path: String,
    /// Path to the writable run-log database.
    pub run_db_path: String,
    /// Retrieval service endpoint; empty disables the retrieve tool.
    pub retrieval_url: String,
    /// Row cap applied to queries lacking an explicit LIMIT.
    pub row_limit: usize,
    pub tool_timeout_ms: u64,
    pub request_timeout_ms: u64,
    /// Tool-call rounds a single stage may take before the run is cut off.
    pub max_rounds_per_stage: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        PipelineConfig {
            api_url: "https://api.openai.com".to_string(),
            api_key: String::new(),
            model: "gpt-4o-mini".to_string(),
            planner_model: "gpt-4o".to_string(),
            max_tokens: 4096,
            kpi_db_path: "~/.consilium/company_data.db".to_string(),
            run_db_path: "~/.consilium/runs.db".to_string(),
            retrieval_url: String::new(),
            row_limit: 10_000,
            tool_timeout_ms: 30_000,
            request_timeout_ms: 120_000,
            max_rounds_per_stage: 8,
        }
    }
}

/// Returns the consilium config directory: `~/.consilium`.
pub fn get_consilium_dir() -> PathBuf {
    let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("/root"));
    home.join(".consilium")
}

/// Returns the full path to the config file: `~/.consilium/consilium.json`.
pub fn get_config_path() -> PathBuf {
    get_consilium_dir().join(CONFIG_FILENAME)
}

/// Load the config from disk, merging unset fields with defaults.
///
/// Returns `None` if the config file does not exist or cannot be parsed.
pub fn load_config() -> Option<PipelineConfig> {
    let config_path = get_config_path();
    if !config_path.exists() {
        return None;
    }

    let contents = fs::read_to_string(&config_path).ok()?;
    let mut config: PipelineConfig = serde_json::from_str(&contents).ok()?;

    let defaults = PipelineConfig::default();

    if config.api_url.is_empty() {
        config.api_url = defaults.api_url;
    }
    if config.model.is_empty() {
        config.model = defaults.model;
    }
    if config.planner_model.is_empty() {
        config.planner_model = defaults.planner_model;
    }
    if config.max_tokens == 0 {
        config.max_tokens = defaults.max_tokens;
    }
    if config.run_db_path.is_empty() {
        config.run_db_path = defaults.run_db_path;
    }
    if config.row_limit == 0 {
        config.row_limit = defaults.row_limit;
    }
    if config.tool_timeout_ms == 0 {
        config.tool_timeout_ms = defaults.tool_timeout_ms;
    }
    if config.request_timeout_ms == 0 {
        config.request_timeout_ms = defaults.request_timeout_ms;
    }
    if config.max_rounds_per_stage == 0 {
        config.max_rounds_per_stage = defaults.max_rounds_per_stage;
    }

    Some(config)
}

/// Save the config to `~/.consilium/consilium.json`, creating the directory
/// if needed. The file may contain an API key, so callers should keep it
/// out of version control.
pub fn save_config(config: &PipelineConfig) -> Result<()> {
    let dir = get_consilium_dir();
    if !dir.exists() {
        fs::create_dir_all(&dir).context("Failed to create consilium directory")?;
    }

    let json = serde_json::to_string_pretty(config).context("Failed to serialize config")?;
    fs::write(get_config_path(), &json).context("Failed to write config file")?;

    Ok(())
}

/// Resolve a path that may start with `~` to an absolute path.
pub fn resolve_path(p: &str) -> String {
    if let Some(rest) = p.strip_prefix('~') {
        let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("/root"));
        let rest = rest.strip_prefix('/').unwrap_or(rest);
        home.join(rest).to_string_lossy().to_string()
    } else {
        p.to_string()
    }
}
