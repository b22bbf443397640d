use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use tracing::{info, warn};

use crate::state::WorkflowState;

use super::{Component, DirectionKind, Directions, Executor, SufficiencyEvaluator, SufficiencyResult};

static EVALUATION_LINE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?mi)^\s*Evaluation:\s*\[?\s*(SUFFICIENT|INSUFFICIENT)\b").expect("valid regex"));

static REASONING_LINE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?mi)^\s*Reasoning:\s*(.+)$").expect("valid regex"));

/// Sufficiency evaluator that asks the executor for a verdict.
///
/// Whether `executor` is the pipeline's own executor or a private one is
/// decided by whoever constructs the evaluator.
pub struct LlmEvaluator {
    executor: Arc<dyn Executor>,
}

impl LlmEvaluator {
    pub fn new(executor: Arc<dyn Executor>) -> Self {
        Self { executor }
    }

    pub fn executor(&self) -> &Arc<dyn Executor> {
        &self.executor
    }

    fn build_prompt(state: &WorkflowState) -> String {
        let stage = state.get_str("stage").unwrap_or("unspecified");
        let mut keys: Vec<&str> = state.keys().map(String::as_str).collect();
        keys.sort_unstable();

        format!(
            "Evaluate whether the current project state is sufficient to proceed.\n\
             Current stage: {}\n\
             State keys: {}\n\n\
             Reply in the following format:\n\
             Evaluation: [SUFFICIENT/INSUFFICIENT]\n\
             Reasoning: [your reasoning]",
            stage,
            if keys.is_empty() { "(none)".to_string() } else { keys.join(", ") }
        )
    }
}

/// Interpret an executor reply as a sufficiency verdict.
///
/// Accepts `{"sufficient": bool, "reason": str}`, `{"evaluation": str,
/// "reasoning": str}`, or free text with `Evaluation:` / `Reasoning:` lines
/// (also when wrapped as `{"output": text}`). Anything else is insufficient.
pub fn parse_sufficiency_reply(reply: &Value) -> SufficiencyResult {
    if let Some(sufficient) = reply.get("sufficient").and_then(Value::as_bool) {
        let reason = reply
            .get("reason")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        return SufficiencyResult { sufficient, reason };
    }

    if let Some(evaluation) = reply.get("evaluation").and_then(Value::as_str) {
        let reason = reply
            .get("reasoning")
            .or_else(|| reply.get("reason"))
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        return SufficiencyResult {
            sufficient: evaluation.trim().eq_ignore_ascii_case("SUFFICIENT"),
            reason,
        };
    }

    let text = reply
        .as_str()
        .or_else(|| reply.get("output").and_then(Value::as_str));
    if let Some(text) = text
        && let Some(caps) = EVALUATION_LINE.captures(text)
    {
        let reason = REASONING_LINE
            .captures(text)
            .map(|c| c[1].trim().to_string())
            .unwrap_or_default();
        return SufficiencyResult {
            sufficient: caps[1].eq_ignore_ascii_case("SUFFICIENT"),
            reason,
        };
    }

    warn!("Unparseable sufficiency reply, treating state as insufficient");
    SufficiencyResult {
        sufficient: false,
        reason: "could not parse sufficiency evaluation reply".to_string(),
    }
}

#[async_trait]
impl SufficiencyEvaluator for LlmEvaluator {
    async fn evaluate(&self, state: &WorkflowState) -> Result<SufficiencyResult> {
        let request = Directions {
            kind: DirectionKind::Evaluate,
            instructions: vec![Self::build_prompt(state)],
            reason: None,
            state: state.clone(),
        };

        let reply = self.executor.execute_directions(&request).await?;
        let result = parse_sufficiency_reply(&reply);

        info!(
            "Sufficiency evaluation: {}",
            if result.sufficient { "Sufficient" } else { "Insufficient" }
        );
        Ok(result)
    }
}

#[async_trait]
impl Component for LlmEvaluator {
    fn name(&self) -> &str {
        "LLMEvaluator"
    }

    async fn execute(&self, mut state: WorkflowState) -> Result<WorkflowState> {
        let result = self.evaluate(&state).await?;
        state.insert("sufficiency", result)?;
        Ok(state)
    }
}
