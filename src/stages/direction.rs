use anyhow::Result;
use async_trait::async_trait;
use minijinja::{Environment, context};
use tracing::debug;

use crate::errors::{DirectorError, DirectorResult};
use crate::state::WorkflowState;

use super::{Component, DirectionGenerator, DirectionKind, Directions, Priorities};

/// Default instruction template for the proceed path.
pub const DEFAULT_PROCEED_TEMPLATE: &str = "{% if task %}Implement '{{ task }}'\
{% if stage %} for stage '{{ stage }}'{% endif %}.\
{% else %}Review the project state and identify the next task\
{% if stage %} for stage '{{ stage }}'{% endif %}.{% endif %}";

/// Default instruction template for the insufficiency path.
pub const DEFAULT_REMEDIATION_TEMPLATE: &str = "Address missing information before continuing: \
{{ reason }}{% if task %} (blocking '{{ task }}'){% endif %}.";

const PROCEED: &str = "proceed";
const REMEDIATION: &str = "remediation";

/// Renders one instruction per top-ranked priority through minijinja templates.
pub struct BasicDirectionGenerator {
    env: Environment<'static>,
    max_instructions: usize,
}

impl BasicDirectionGenerator {
    pub fn new() -> DirectorResult<Self> {
        Self::with_templates(DEFAULT_PROCEED_TEMPLATE, DEFAULT_REMEDIATION_TEMPLATE, 3)
    }

    pub fn with_templates(
        proceed: &str,
        remediation: &str,
        max_instructions: usize,
    ) -> DirectorResult<Self> {
        let mut env = Environment::new();
        env.add_template_owned(PROCEED, proceed.to_string())
            .map_err(|e| DirectorError::Configuration(format!("invalid proceed template: {}", e)))?;
        env.add_template_owned(REMEDIATION, remediation.to_string())
            .map_err(|e| DirectorError::Configuration(format!("invalid remediation template: {}", e)))?;
        Ok(Self {
            env,
            max_instructions: max_instructions.max(1),
        })
    }

    fn render(
        &self,
        template: &str,
        state: &WorkflowState,
        priorities: &Priorities,
        reason: Option<&str>,
    ) -> Result<Vec<String>> {
        let template = self.env.get_template(template)?;
        let stage = state.get_str("stage");

        if priorities.is_empty() {
            let instruction = template.render(context! {
                task => Option::<&str>::None,
                weight => Option::<f64>::None,
                stage => stage,
                reason => reason,
            })?;
            return Ok(vec![instruction]);
        }

        priorities
            .top(self.max_instructions)
            .map(|item| {
                template
                    .render(context! {
                        task => item.name.as_str(),
                        weight => item.weight,
                        stage => stage,
                        reason => reason,
                    })
                    .map_err(Into::into)
            })
            .collect()
    }
}

#[async_trait]
impl DirectionGenerator for BasicDirectionGenerator {
    async fn generate(&self, state: &WorkflowState, priorities: &Priorities) -> Result<Directions> {
        let instructions = self.render(PROCEED, state, priorities, None)?;
        debug!("Generated {} proceed instructions", instructions.len());
        Ok(Directions {
            kind: DirectionKind::Proceed,
            instructions,
            reason: None,
            state: state.clone(),
        })
    }

    async fn generate_for_insufficiency(
        &self,
        state: &WorkflowState,
        priorities: &Priorities,
        reason: &str,
    ) -> Result<Directions> {
        let instructions = self.render(REMEDIATION, state, priorities, Some(reason))?;
        debug!("Generated {} remediation instructions", instructions.len());
        Ok(Directions {
            kind: DirectionKind::Remediate,
            instructions,
            reason: Some(reason.to_string()),
            state: state.clone(),
        })
    }
}

#[async_trait]
impl Component for BasicDirectionGenerator {
    fn name(&self) -> &str {
        "BasicDirectionGenerator"
    }

    /// Uses the `priorities` and `sufficiency` keys left by earlier stages of
    /// a direct loop, and records the result under `directions`.
    async fn execute(&self, mut state: WorkflowState) -> Result<WorkflowState> {
        // Earlier directions would otherwise nest inside the new snapshot
        state.remove("directions");

        let priorities: Priorities = state
            .get("priorities")
            .and_then(|v| serde_json::from_value(v.clone()).ok())
            .unwrap_or_default();

        let insufficient_reason = state
            .get_object("sufficiency")
            .filter(|s| s.get("sufficient").and_then(|v| v.as_bool()) == Some(false))
            .map(|s| {
                s.get("reason")
                    .and_then(|v| v.as_str())
                    .unwrap_or("state judged insufficient")
                    .to_string()
            });

        let directions = match insufficient_reason {
            Some(reason) => self.generate_for_insufficiency(&state, &priorities, &reason).await?,
            None => self.generate(&state, &priorities).await?,
        };
        state.insert("directions", directions)?;
        Ok(state)
    }
}
