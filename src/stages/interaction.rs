use std::io::{BufRead, Write};
use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::state::WorkflowState;

use super::{Component, InteractionHandler};

/// State key a stage sets when a human must look at the project.
pub const REQUIRES_HUMAN_INPUT_KEY: &str = "requires_human_input";

/// Optional explanation shown with the question.
pub const HUMAN_INPUT_REASON_KEY: &str = "human_input_reason";

/// How the handler resolves a required interaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InteractionMode {
    /// Ask on the terminal
    Console,
    /// Approve without asking
    AutoApprove,
    /// Decline without asking (the pass fails)
    AutoDecline,
}

/// Record of one question asked of the user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InteractionRecord {
    pub question: String,
    pub response: Option<String>,
    pub approved: bool,
    /// Timestamp in ISO8601 format
    pub timestamp: String,
}

type Prompter = dyn Fn(&str) -> Result<String> + Send + Sync;

/// Asks the user to confirm continuing whenever the state flags
/// `requires_human_input`.
pub struct ConsoleInteractionHandler {
    mode: InteractionMode,
    prompter: Arc<Prompter>,
    records: Mutex<Vec<InteractionRecord>>,
}

impl ConsoleInteractionHandler {
    pub fn new(mode: InteractionMode) -> Self {
        Self::with_prompter(mode, prompt_terminal)
    }

    /// Use a custom prompt function instead of the terminal.
    pub fn with_prompter<F>(mode: InteractionMode, prompter: F) -> Self
    where
        F: Fn(&str) -> Result<String> + Send + Sync + 'static,
    {
        Self {
            mode,
            prompter: Arc::new(prompter),
            records: Mutex::new(Vec::new()),
        }
    }

    pub fn mode(&self) -> InteractionMode {
        self.mode
    }

    fn lock(&self) -> MutexGuard<'_, Vec<InteractionRecord>> {
        self.records.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn record(&self, question: &str, response: Option<String>, approved: bool) {
        self.lock().push(InteractionRecord {
            question: question.to_string(),
            response,
            approved,
            timestamp: chrono::Utc::now().to_rfc3339(),
        });
    }
}

fn prompt_terminal(question: &str) -> Result<String> {
    let mut stderr = std::io::stderr();
    write!(stderr, "{} ", question)?;
    stderr.flush()?;

    let mut line = String::new();
    std::io::stdin()
        .lock()
        .read_line(&mut line)
        .context("Failed to read user response")?;
    Ok(line.trim().to_string())
}

#[async_trait]
impl InteractionHandler for ConsoleInteractionHandler {
    fn is_interaction_required(&self, state: &WorkflowState) -> bool {
        state.get_bool(REQUIRES_HUMAN_INPUT_KEY).unwrap_or(false)
    }

    async fn handle_interaction(&self, state: &WorkflowState) -> Result<()> {
        let reason = state
            .get_str(HUMAN_INPUT_REASON_KEY)
            .unwrap_or("Human verification required");
        let question = format!("{}. Continue the workflow? (y/n)", reason);

        let (response, approved) = match self.mode {
            InteractionMode::AutoApprove => (None, true),
            InteractionMode::AutoDecline => (None, false),
            InteractionMode::Console => {
                let prompter = Arc::clone(&self.prompter);
                let asked = question.clone();
                // Terminal reads block, keep them off the async workers
                let response = tokio::task::spawn_blocking(move || prompter(&asked))
                    .await
                    .context("User prompt task failed")??;
                let approved = response.to_lowercase().starts_with('y');
                (Some(response), approved)
            }
        };

        self.record(&question, response, approved);

        if !approved {
            warn!("User declined to continue: {}", reason);
            bail!("User declined to continue: {}", reason);
        }

        info!("User approved continuing");
        Ok(())
    }

    fn records(&self) -> Vec<InteractionRecord> {
        self.lock().clone()
    }
}

#[async_trait]
impl Component for ConsoleInteractionHandler {
    fn name(&self) -> &str {
        "BasicUserInteractionHandler"
    }

    async fn execute(&self, state: WorkflowState) -> Result<WorkflowState> {
        if self.is_interaction_required(&state) {
            self.handle_interaction(&state).await?;
        }
        Ok(state)
    }
}
