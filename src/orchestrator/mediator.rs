use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::errors::{DirectorError, DirectorResult, StateError};
use crate::stages::{
    DirectionGenerator, Executor, InteractionHandler, Prioritizer, ProgressTracker, StateManager,
    SufficiencyEvaluator, SufficiencyResult, Validator,
};
use crate::state::WorkflowState;

/// Convert a stage's `anyhow` error into a `DirectorError`, keeping typed
/// errors that stages raise themselves.
pub(crate) fn stage_error(stage: &str, error: anyhow::Error) -> DirectorError {
    let error = match error.downcast::<DirectorError>() {
        Ok(typed) => return typed,
        Err(other) => other,
    };
    match error.downcast::<StateError>() {
        Ok(state) => DirectorError::state_io(stage, state),
        Err(other) => DirectorError::stage(stage, other),
    }
}

/// Result of one mediator pass.
#[derive(Debug, Clone)]
pub struct PassOutcome {
    /// The executor's result, now persisted as canonical state
    pub state: WorkflowState,
    /// Verdict that chose the direction path
    pub sufficiency: SufficiencyResult,
    /// Whether the progress tracker judged the workflow complete
    pub complete: bool,
}

/// Coordinates one pass across all stages, strictly in order:
/// validate, prioritize, evaluate, direct, execute, persist, interact, track.
#[derive(Clone)]
pub struct Mediator {
    state_manager: Arc<dyn StateManager>,
    validator: Arc<dyn Validator>,
    prioritizer: Arc<dyn Prioritizer>,
    direction_generator: Arc<dyn DirectionGenerator>,
    executor: Arc<dyn Executor>,
    interaction: Arc<dyn InteractionHandler>,
    progress: Arc<dyn ProgressTracker>,
    evaluator: Arc<dyn SufficiencyEvaluator>,
}

impl Mediator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        state_manager: Arc<dyn StateManager>,
        validator: Arc<dyn Validator>,
        prioritizer: Arc<dyn Prioritizer>,
        direction_generator: Arc<dyn DirectionGenerator>,
        executor: Arc<dyn Executor>,
        interaction: Arc<dyn InteractionHandler>,
        progress: Arc<dyn ProgressTracker>,
        evaluator: Arc<dyn SufficiencyEvaluator>,
    ) -> Self {
        Self {
            state_manager,
            validator,
            prioritizer,
            direction_generator,
            executor,
            interaction,
            progress,
            evaluator,
        }
    }

    pub fn state_manager(&self) -> &Arc<dyn StateManager> {
        &self.state_manager
    }

    pub fn progress(&self) -> &Arc<dyn ProgressTracker> {
        &self.progress
    }

    pub fn interaction(&self) -> &Arc<dyn InteractionHandler> {
        &self.interaction
    }

    /// Execute one pass against `snapshot`.
    ///
    /// Interaction and progress observe `snapshot`, not the freshly persisted
    /// executor result: they judge whether the prior state was good enough to
    /// act on.
    pub async fn execute_pass(&self, snapshot: WorkflowState) -> DirectorResult<PassOutcome> {
        // 1. Constraints: collect every violation before failing
        debug!("Stage 1: validating constraints ({})", self.validator.name());
        let (valid, violations) = self.validator.validate_all(&snapshot);
        if !valid {
            warn!("Pass aborted by {} constraint violations", violations.len());
            return Err(DirectorError::ConstraintViolation {
                stage: self.validator.name().to_string(),
                violations,
            });
        }

        // 2. Priorities never fail
        debug!("Stage 2: determining priorities ({})", self.prioritizer.name());
        let priorities = self.prioritizer.determine_priorities(&snapshot);

        // 3. Sufficiency
        debug!("Stage 3: evaluating sufficiency ({})", self.evaluator.name());
        let sufficiency = self
            .evaluator
            .evaluate(&snapshot)
            .await
            .map_err(|e| stage_error(self.evaluator.name(), e))?;

        // 4. Exactly one direction path
        debug!(
            "Stage 4: generating directions ({}, sufficient={})",
            self.direction_generator.name(),
            sufficiency.sufficient
        );
        let generated = if sufficiency.sufficient {
            self.direction_generator.generate(&snapshot, &priorities).await
        } else {
            self.direction_generator
                .generate_for_insufficiency(&snapshot, &priorities, &sufficiency.reason)
                .await
        };
        let directions = generated.map_err(|e| stage_error(self.direction_generator.name(), e))?;

        // 5. Execute
        debug!("Stage 5: executing directions ({})", self.executor.name());
        let result = self
            .executor
            .execute_directions(&directions)
            .await
            .map_err(|e| stage_error(self.executor.name(), e))?;
        let updated = WorkflowState::from_value(result)
            .map_err(|e| DirectorError::stage(self.executor.name(), e.into()))?;

        // 6. Persist the result as canonical state
        debug!("Stage 6: persisting state ({})", self.state_manager.name());
        self.state_manager
            .save_state(&updated)
            .await
            .map_err(|e| DirectorError::state_io(self.state_manager.name(), e))?;

        // 7. Human interaction, judged on the pre-pass snapshot
        if self.interaction.is_interaction_required(&snapshot) {
            info!("Stage 7: human interaction required ({})", self.interaction.name());
            self.interaction
                .handle_interaction(&snapshot)
                .await
                .map_err(|e| stage_error(self.interaction.name(), e))?;
        }

        // 8. Progress, judged on the pre-pass snapshot
        debug!("Stage 8: updating progress ({})", self.progress.name());
        self.progress
            .update_progress(&snapshot)
            .await
            .map_err(|e| stage_error(self.progress.name(), e))?;
        let complete = self.progress.is_complete(&snapshot);

        info!(
            "Pass finished: sufficient={}, complete={}",
            sufficiency.sufficient, complete
        );

        Ok(PassOutcome {
            state: updated,
            sufficiency,
            complete,
        })
    }
}
