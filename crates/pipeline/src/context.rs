//! Shared state handed to every stage.

use std::sync::Arc;

use cw_providers::{model_table, Difficulty, LmClient, TaskKind, WatchdogConfig};
use cw_store::Stores;
use cw_tools::ToolContext;

pub struct StageContext {
    pub stores: Stores,
    pub lm: Arc<dyn LmClient>,
    /// Tool state for the research loop; carries the stores so the
    /// internal-search tool can see the corpus.
    pub tools: ToolContext,
    /// Model for bulk transformation stages (enrich, claim extraction).
    pub batch_model: String,
    /// Model for tool-using verification requests.
    pub verify_model: String,
    pub watchdog: WatchdogConfig,
}

impl StageContext {
    pub fn new(stores: Stores, lm: Arc<dyn LmClient>, model_override: Option<String>) -> StageContext {
        let batch_model = model_override
            .clone()
            .unwrap_or_else(|| model_table(TaskKind::Process, Difficulty::Medium).model.to_string());
        let verify_model = model_override
            .unwrap_or_else(|| model_table(TaskKind::Agent, Difficulty::Medium).model.to_string());
        StageContext {
            tools: ToolContext::new(Some(stores.clone())),
            stores,
            lm,
            batch_model,
            verify_model,
            watchdog: WatchdogConfig::default(),
        }
    }
}
