use std::sync::{Mutex, MutexGuard};

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::state::WorkflowState;

use super::{Component, ProgressTracker};

/// Default state key that marks the workflow as finished.
pub const DEFAULT_COMPLETION_KEY: &str = "completed";

/// One progress update.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressRecord {
    /// Which update this was (1-indexed)
    pub iteration: u32,
    /// Timestamp in ISO8601 format
    pub timestamp: String,
    pub complete: bool,
    /// Number of keys in the observed snapshot
    pub keys: usize,
}

/// Completion is a boolean flag in the state; every update is recorded.
#[derive(Debug)]
pub struct BasicProgressTracker {
    completion_key: String,
    history: Mutex<Vec<ProgressRecord>>,
}

impl Default for BasicProgressTracker {
    fn default() -> Self {
        Self::new(DEFAULT_COMPLETION_KEY)
    }
}

impl BasicProgressTracker {
    pub fn new(completion_key: impl Into<String>) -> Self {
        Self {
            completion_key: completion_key.into(),
            history: Mutex::new(Vec::new()),
        }
    }

    pub fn completion_key(&self) -> &str {
        &self.completion_key
    }

    fn lock(&self) -> MutexGuard<'_, Vec<ProgressRecord>> {
        self.history.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl ProgressTracker for BasicProgressTracker {
    async fn update_progress(&self, state: &WorkflowState) -> Result<()> {
        let complete = self.is_complete(state);
        let mut history = self.lock();
        let iteration = history.len() as u32 + 1;
        history.push(ProgressRecord {
            iteration,
            timestamp: chrono::Utc::now().to_rfc3339(),
            complete,
            keys: state.len(),
        });
        info!("Progress update {}: complete={}", iteration, complete);
        Ok(())
    }

    fn is_complete(&self, state: &WorkflowState) -> bool {
        state.get_bool(&self.completion_key).unwrap_or(false)
    }

    fn history(&self) -> Vec<ProgressRecord> {
        self.lock().clone()
    }
}

#[async_trait]
impl Component for BasicProgressTracker {
    fn name(&self) -> &str {
        "BasicProgressTracker"
    }

    async fn execute(&self, state: WorkflowState) -> Result<WorkflowState> {
        self.update_progress(&state).await?;
        Ok(state)
    }
}
