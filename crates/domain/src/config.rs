//! Environment-derived configuration.
//!
//! Everything operational comes from the environment: the store data
//! directory, the LLM endpoint and key, and the pipeline date override
//! (`PIPELINE_RUN_DATE`, handled in [`crate::dates`]).

use std::path::PathBuf;

use crate::error::{Error, Result};

/// Env var naming the store data directory.
pub const ENV_DATA_DIR: &str = "CW_DATA_DIR";
/// Env var naming the provider base URL (OpenAI-compatible layout).
pub const ENV_LLM_BASE_URL: &str = "CW_LLM_BASE_URL";
/// Env var holding the provider API key.
pub const ENV_LLM_API_KEY: &str = "CW_LLM_API_KEY";
/// Env var overriding the default batch model.
pub const ENV_LLM_MODEL: &str = "CW_LLM_MODEL";
/// Hint only; the engine always uses the fixed -05:00 offset.
pub const ENV_TZ_OFFSET: &str = "PIPELINE_TZ_OFFSET";

#[derive(Debug, Clone)]
pub struct Config {
    pub data_dir: PathBuf,
    pub llm_base_url: String,
    pub llm_api_key: String,
    /// Overrides the model-table default for batch requests when set.
    pub llm_model: Option<String>,
}

impl Config {
    /// Load from the environment. A missing API key is a fatal config
    /// error; everything else has a default.
    pub fn from_env() -> Result<Config> {
        let data_dir = std::env::var(ENV_DATA_DIR).unwrap_or_else(|_| "data".into());
        let llm_base_url = std::env::var(ENV_LLM_BASE_URL)
            .unwrap_or_else(|_| "https://api.openai.com/v1".into());
        let llm_api_key = std::env::var(ENV_LLM_API_KEY)
            .map_err(|_| Error::Config(format!("{ENV_LLM_API_KEY} is not set")))?;
        let llm_model = std::env::var(ENV_LLM_MODEL).ok();

        if let Ok(hint) = std::env::var(ENV_TZ_OFFSET) {
            if hint.trim() != "-05:00" {
                tracing::warn!(%hint, "ignoring tz offset hint; the pipeline clock is fixed at -05:00");
            }
        }

        Ok(Config {
            data_dir: PathBuf::from(data_dir),
            llm_base_url,
            llm_api_key,
            llm_model,
        })
    }
}
