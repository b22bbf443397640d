//! Stage contracts for the workflow pipeline.
//!
//! Every stage is a [`Component`]: it has a human-readable name and a generic
//! `execute(state) -> state` transform used by the direct loop. Each role adds
//! its own trait on top; the mediator only ever holds typed references to
//! those role traits.

pub mod constraint;
pub mod direction;
pub mod executor;
pub mod interaction;
pub mod priority;
pub mod progress;
pub mod sufficiency;

pub use constraint::{Constraint, ConstraintEngine, REQUIRED_DIRECTORIES, REQUIRED_FILES};
pub use direction::BasicDirectionGenerator;
pub use executor::{CommandExecutor, DryRunExecutor};
pub use interaction::{ConsoleInteractionHandler, InteractionMode, InteractionRecord};
pub use priority::BasicPriorityManager;
pub use progress::{BasicProgressTracker, ProgressRecord};
pub use sufficiency::LlmEvaluator;

use std::fmt;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::StateError;
use crate::state::WorkflowState;

// ============================================================================
// Data passed between stages
// ============================================================================

/// A single ranked entry produced by the priority manager.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriorityItem {
    pub name: String,
    pub weight: f64,
}

/// Ordered priority signal. Highest weight first.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Priorities {
    pub items: Vec<PriorityItem>,
}

impl Priorities {
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn top(&self, n: usize) -> impl Iterator<Item = &PriorityItem> {
        self.items.iter().take(n)
    }
}

/// What an executor payload asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DirectionKind {
    /// Normal path: the state is sufficient, act on priorities
    Proceed,
    /// Insufficiency path: gather what is missing
    Remediate,
    /// Sufficiency evaluation request
    Evaluate,
}

/// Instruction payload handed to the executor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Directions {
    pub kind: DirectionKind,
    pub instructions: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Snapshot the directions were derived from
    pub state: WorkflowState,
}

/// Verdict of the sufficiency evaluator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SufficiencyResult {
    pub sufficient: bool,
    pub reason: String,
}

// ============================================================================
// Component and role traits
// ============================================================================

/// Minimal capability shared by every stage.
#[async_trait]
pub trait Component: Send + Sync {
    /// Human-readable name used in logs and error wrapping
    fn name(&self) -> &str;

    /// Generic state transform used by the direct loop
    async fn execute(&self, state: WorkflowState) -> Result<WorkflowState>;
}

/// Loads and persists the canonical workflow state.
#[async_trait]
pub trait StateManager: Component {
    async fn load_state(&self) -> Result<WorkflowState, StateError>;
    async fn save_state(&self, state: &WorkflowState) -> Result<(), StateError>;
}

/// Validates a snapshot against every registered constraint.
pub trait Validator: Component {
    /// Returns `(all_valid, violations)`; never stops at the first failure.
    fn validate_all(&self, state: &WorkflowState) -> (bool, Vec<String>);
}

/// Derives a priority signal from a snapshot. Infallible.
pub trait Prioritizer: Component {
    fn determine_priorities(&self, state: &WorkflowState) -> Priorities;
}

/// Produces the next instruction set.
#[async_trait]
pub trait DirectionGenerator: Component {
    async fn generate(&self, state: &WorkflowState, priorities: &Priorities) -> Result<Directions>;

    async fn generate_for_insufficiency(
        &self,
        state: &WorkflowState,
        priorities: &Priorities,
        reason: &str,
    ) -> Result<Directions>;
}

/// Carries out directions and returns an opaque result.
#[async_trait]
pub trait Executor: Component {
    async fn execute_directions(&self, directions: &Directions) -> Result<Value>;
}

/// Judges whether a snapshot is advanced enough for the proceed path.
#[async_trait]
pub trait SufficiencyEvaluator: Component {
    async fn evaluate(&self, state: &WorkflowState) -> Result<SufficiencyResult>;
}

/// Decides whether a human must be involved and runs that step.
#[async_trait]
pub trait InteractionHandler: Component {
    fn is_interaction_required(&self, state: &WorkflowState) -> bool;
    async fn handle_interaction(&self, state: &WorkflowState) -> Result<()>;

    /// Questions asked so far, oldest first.
    fn records(&self) -> Vec<InteractionRecord> {
        Vec::new()
    }
}

/// Records progress and decides termination.
#[async_trait]
pub trait ProgressTracker: Component {
    async fn update_progress(&self, state: &WorkflowState) -> Result<()>;
    fn is_complete(&self, state: &WorkflowState) -> bool;

    /// Updates recorded so far, oldest first.
    fn history(&self) -> Vec<ProgressRecord> {
        Vec::new()
    }
}

// ============================================================================
// Roles
// ============================================================================

/// The eight pipeline roles, in canonical order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    StateManager,
    ConstraintEngine,
    PriorityManager,
    DirectionGenerator,
    Executor,
    UserInteractionHandler,
    ProgressTracker,
    SufficiencyEvaluator,
}

impl Role {
    pub const ALL: [Role; 8] = [
        Role::StateManager,
        Role::ConstraintEngine,
        Role::PriorityManager,
        Role::DirectionGenerator,
        Role::Executor,
        Role::UserInteractionHandler,
        Role::ProgressTracker,
        Role::SufficiencyEvaluator,
    ];

    /// Configuration type tag for this role.
    pub fn type_tag(self) -> &'static str {
        match self {
            Role::StateManager => "stateManager",
            Role::ConstraintEngine => "constraintEngine",
            Role::PriorityManager => "priorityManager",
            Role::DirectionGenerator => "directionGenerator",
            Role::Executor => "aiderInterface",
            Role::UserInteractionHandler => "userInteractionHandler",
            Role::ProgressTracker => "progressTracker",
            Role::SufficiencyEvaluator => "sufficiencyEvaluator",
        }
    }

    /// Parse a configuration type tag. `executor` is accepted as an alias.
    pub fn from_type_tag(tag: &str) -> Option<Self> {
        match tag {
            "executor" => Some(Role::Executor),
            _ => Role::ALL.into_iter().find(|role| role.type_tag() == tag),
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.type_tag())
    }
}

/// A constructed component tagged with the single role it fills.
#[derive(Clone)]
pub enum Stage {
    StateManager(Arc<dyn StateManager>),
    ConstraintEngine(Arc<dyn Validator>),
    PriorityManager(Arc<dyn Prioritizer>),
    DirectionGenerator(Arc<dyn DirectionGenerator>),
    Executor(Arc<dyn Executor>),
    UserInteractionHandler(Arc<dyn InteractionHandler>),
    ProgressTracker(Arc<dyn ProgressTracker>),
    SufficiencyEvaluator(Arc<dyn SufficiencyEvaluator>),
}

impl Stage {
    pub fn role(&self) -> Role {
        match self {
            Stage::StateManager(_) => Role::StateManager,
            Stage::ConstraintEngine(_) => Role::ConstraintEngine,
            Stage::PriorityManager(_) => Role::PriorityManager,
            Stage::DirectionGenerator(_) => Role::DirectionGenerator,
            Stage::Executor(_) => Role::Executor,
            Stage::UserInteractionHandler(_) => Role::UserInteractionHandler,
            Stage::ProgressTracker(_) => Role::ProgressTracker,
            Stage::SufficiencyEvaluator(_) => Role::SufficiencyEvaluator,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Stage::StateManager(c) => c.name(),
            Stage::ConstraintEngine(c) => c.name(),
            Stage::PriorityManager(c) => c.name(),
            Stage::DirectionGenerator(c) => c.name(),
            Stage::Executor(c) => c.name(),
            Stage::UserInteractionHandler(c) => c.name(),
            Stage::ProgressTracker(c) => c.name(),
            Stage::SufficiencyEvaluator(c) => c.name(),
        }
    }

    /// Run the component's generic transform.
    pub async fn execute(&self, state: WorkflowState) -> Result<WorkflowState> {
        match self {
            Stage::StateManager(c) => c.execute(state).await,
            Stage::ConstraintEngine(c) => c.execute(state).await,
            Stage::PriorityManager(c) => c.execute(state).await,
            Stage::DirectionGenerator(c) => c.execute(state).await,
            Stage::Executor(c) => c.execute(state).await,
            Stage::UserInteractionHandler(c) => c.execute(state).await,
            Stage::ProgressTracker(c) => c.execute(state).await,
            Stage::SufficiencyEvaluator(c) => c.execute(state).await,
        }
    }
}

impl fmt::Debug for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Stage")
            .field("role", &self.role())
            .field("name", &self.name())
            .finish()
    }
}
