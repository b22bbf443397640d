use std::sync::Arc;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::{DirectorSettings, LoopMode, WorkflowConfig};
use crate::errors::{DirectorError, DirectorResult};
use crate::registry::ComponentRegistry;
use crate::stages::{
    DirectionGenerator, Executor, InteractionHandler, InteractionRecord, Prioritizer, ProgressRecord,
    ProgressTracker, Role, Stage, StateManager, SufficiencyEvaluator, Validator,
};
use crate::state::WorkflowState;

use super::bounded::{fault_barrier, run_bounded};
use super::mediator::{Mediator, stage_error};

/// Lifecycle of a director: `Idle -> Running -> {Completed, Failed, TimedOut}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirectorStatus {
    Idle,
    Running,
    Completed,
    Failed,
    TimedOut,
}

impl DirectorStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::TimedOut)
    }
}

/// Summary of a completed run.
#[derive(Debug, Clone)]
pub struct RunSummary {
    /// Iterations executed, including the completing one
    pub iterations: u32,
    /// State persisted by the last iteration
    pub final_state: WorkflowState,
    /// Progress tracker history at completion
    pub progress: Vec<ProgressRecord>,
    /// Questions put to the user during the run
    pub interactions: Vec<InteractionRecord>,
}

/// Drives passes until the progress tracker reports completion or a stage fails.
///
/// A director runs once. It does not retry: the first failing stage ends the
/// run.
pub struct Director {
    mediator: Mediator,
    /// Components in configuration order, for the direct loop
    stages: Vec<Stage>,
    settings: DirectorSettings,
    status: watch::Sender<DirectorStatus>,
}

impl Director {
    /// Build a director from one explicitly typed dependency per role.
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
        settings: DirectorSettings,
    ) -> Self {
        let stages = vec![
            Stage::StateManager(Arc::clone(&state_manager)),
            Stage::ConstraintEngine(Arc::clone(&validator)),
            Stage::PriorityManager(Arc::clone(&prioritizer)),
            Stage::DirectionGenerator(Arc::clone(&direction_generator)),
            Stage::Executor(Arc::clone(&executor)),
            Stage::UserInteractionHandler(Arc::clone(&interaction)),
            Stage::ProgressTracker(Arc::clone(&progress)),
            Stage::SufficiencyEvaluator(Arc::clone(&evaluator)),
        ];
        let mediator = Mediator::new(
            state_manager,
            validator,
            prioritizer,
            direction_generator,
            executor,
            interaction,
            progress,
            evaluator,
        );
        Self::from_parts(mediator, stages, settings)
    }

    fn from_parts(mediator: Mediator, stages: Vec<Stage>, settings: DirectorSettings) -> Self {
        let (status, _) = watch::channel(DirectorStatus::Idle);
        Self {
            mediator,
            stages,
            settings,
            status,
        }
    }

    /// Sort generic components into roles.
    ///
    /// Every role must be filled exactly once.
    pub fn from_components(stages: Vec<Stage>, settings: DirectorSettings) -> DirectorResult<Self> {
        let mut state_manager = None;
        let mut validator = None;
        let mut prioritizer = None;
        let mut direction_generator = None;
        let mut executor = None;
        let mut interaction = None;
        let mut progress = None;
        let mut evaluator = None;

        fn fill<T>(slot: &mut Option<T>, value: T, role: Role) -> DirectorResult<()> {
            if slot.is_some() {
                return Err(DirectorError::Configuration(format!(
                    "more than one component provided for role {}",
                    role
                )));
            }
            *slot = Some(value);
            Ok(())
        }

        for stage in &stages {
            let role = stage.role();
            match stage.clone() {
                Stage::StateManager(c) => fill(&mut state_manager, c, role)?,
                Stage::ConstraintEngine(c) => fill(&mut validator, c, role)?,
                Stage::PriorityManager(c) => fill(&mut prioritizer, c, role)?,
                Stage::DirectionGenerator(c) => fill(&mut direction_generator, c, role)?,
                Stage::Executor(c) => fill(&mut executor, c, role)?,
                Stage::UserInteractionHandler(c) => fill(&mut interaction, c, role)?,
                Stage::ProgressTracker(c) => fill(&mut progress, c, role)?,
                Stage::SufficiencyEvaluator(c) => fill(&mut evaluator, c, role)?,
            }
        }

        let present: Vec<Role> = stages.iter().map(Stage::role).collect();
        let missing: Vec<String> = Role::ALL
            .into_iter()
            .filter(|role| !present.contains(role))
            .map(|role| role.to_string())
            .collect();

        match (
            state_manager,
            validator,
            prioritizer,
            direction_generator,
            executor,
            interaction,
            progress,
            evaluator,
        ) {
            (Some(sm), Some(ce), Some(pm), Some(dg), Some(ex), Some(uih), Some(pt), Some(se)) => {
                let mediator = Mediator::new(sm, ce, pm, dg, ex, uih, pt, se);
                Ok(Self::from_parts(mediator, stages, settings))
            }
            _ => Err(DirectorError::Configuration(format!(
                "all required components must be provided (missing: {})",
                missing.join(", ")
            ))),
        }
    }

    /// Assemble a director from a workflow configuration.
    pub fn from_config(config: &WorkflowConfig, registry: &ComponentRegistry) -> DirectorResult<Self> {
        let stages = registry.assemble(config)?;
        Self::from_components(stages, config.director.clone())
    }

    pub fn settings(&self) -> &DirectorSettings {
        &self.settings
    }

    pub fn mediator(&self) -> &Mediator {
        &self.mediator
    }

    pub fn status(&self) -> DirectorStatus {
        *self.status.borrow()
    }

    /// Watch status transitions.
    pub fn subscribe(&self) -> watch::Receiver<DirectorStatus> {
        self.status.subscribe()
    }

    /// Move from `from` to `to`; no-op if the director is elsewhere.
    fn transition(&self, from: DirectorStatus, to: DirectorStatus) -> bool {
        self.status.send_if_modified(|status| {
            if *status == from {
                *status = to;
                true
            } else {
                false
            }
        })
    }

    /// Run to completion without a deadline.
    pub async fn run(&self) -> DirectorResult<RunSummary> {
        self.run_until(&CancellationToken::new()).await
    }

    /// Run until completion, failure, or until `cancel` fires at a pass boundary.
    pub async fn run_until(&self, cancel: &CancellationToken) -> DirectorResult<RunSummary> {
        if !self.transition(DirectorStatus::Idle, DirectorStatus::Running) {
            return Err(DirectorError::Configuration(format!(
                "director cannot start from status {:?}",
                self.status()
            )));
        }

        let result = self.run_loop(cancel).await;

        match &result {
            Ok(summary) => {
                self.transition(DirectorStatus::Running, DirectorStatus::Completed);
                info!("Workflow completed after {} iterations", summary.iterations);
            }
            Err(e) => {
                self.transition(DirectorStatus::Running, DirectorStatus::Failed);
                error!("Workflow failed: {}", e);
            }
        }
        result
    }

    async fn run_loop(&self, cancel: &CancellationToken) -> DirectorResult<RunSummary> {
        let mut iterations = 0u32;

        loop {
            if cancel.is_cancelled() {
                warn!("Run cancelled before iteration {}", iterations + 1);
                return Err(DirectorError::Timeout(self.settings.deadline()));
            }
            if let Some(limit) = self.settings.max_iterations
                && iterations >= limit
            {
                return Err(DirectorError::IterationLimit { limit });
            }

            iterations += 1;
            info!("=== Iteration {} ===", iterations);

            let (final_state, complete) = fault_barrier(self.run_pass()).await?;

            if complete {
                return Ok(RunSummary {
                    iterations,
                    final_state,
                    progress: self.mediator.progress().history(),
                    interactions: self.mediator.interaction().records(),
                });
            }

            // Cooperative yield so instant stages don't spin
            tokio::time::sleep(self.settings.pause()).await;
        }
    }

    /// Load the snapshot and run one pass in the configured mode.
    async fn run_pass(&self) -> DirectorResult<(WorkflowState, bool)> {
        let state_manager = self.mediator.state_manager();
        let snapshot = state_manager
            .load_state()
            .await
            .map_err(|e| DirectorError::state_io(state_manager.name(), e))?;

        match self.settings.mode {
            LoopMode::Mediated => self
                .mediator
                .execute_pass(snapshot)
                .await
                .map(|outcome| (outcome.state, outcome.complete)),
            LoopMode::Direct => self.direct_pass(snapshot).await,
        }
    }

    /// Legacy loop body: each component's generic transform, in order.
    async fn direct_pass(&self, snapshot: WorkflowState) -> DirectorResult<(WorkflowState, bool)> {
        let mut state = snapshot;
        for stage in &self.stages {
            debug!("Direct loop: executing {}", stage.name());
            state = stage
                .execute(state)
                .await
                .map_err(|e| stage_error(stage.name(), e))?;
        }
        let state_manager = self.mediator.state_manager();
        state_manager
            .save_state(&state)
            .await
            .map_err(|e| DirectorError::state_io(state_manager.name(), e))?;
        let complete = self.mediator.progress().is_complete(&state);
        Ok((state, complete))
    }

    /// Run on a dedicated task under the configured deadline.
    ///
    /// On timeout the caller gets `DirectorError::Timeout` right away; the
    /// worker is not killed and whatever it already persisted stays persisted.
    pub async fn run_with_deadline(self: Arc<Self>) -> DirectorResult<RunSummary> {
        let deadline = self.settings.deadline();
        let cancel = CancellationToken::new();
        let worker = Arc::clone(&self);
        let token = cancel.clone();

        info!("Starting workflow run with deadline {:?}", deadline);
        let result = run_bounded(async move { worker.run_until(&token).await }, deadline, cancel).await;

        match &result {
            Err(DirectorError::Timeout(_)) => {
                self.transition(DirectorStatus::Running, DirectorStatus::TimedOut);
                self.transition(DirectorStatus::Idle, DirectorStatus::TimedOut);
            }
            Err(DirectorError::PanicRecovered(_)) => {
                self.transition(DirectorStatus::Running, DirectorStatus::Failed);
            }
            _ => {}
        }
        result
    }
}
