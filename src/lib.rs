pub mod config;
pub mod errors;
pub mod orchestrator;
pub mod output;
pub mod registry;
pub mod stages;
pub mod state;

// Re-export main types
pub use config::{ComponentDescriptor, DirectorSettings, LoopMode, WorkflowConfig};
pub use errors::{DirectorError, DirectorResult, ErrorKind, StateError};
pub use orchestrator::{Director, DirectorStatus, Mediator, PassOutcome, RunSummary};
pub use output::{ReportFormat, StateReport};
pub use registry::{ComponentRegistry, ExecutorPolicy};
pub use stages::{
    Component, DirectionGenerator, Directions, Executor, InteractionHandler, Prioritizer, Priorities,
    ProgressTracker, Role, Stage, StateManager, SufficiencyEvaluator, SufficiencyResult, Validator,
};
pub use state::{FileStateManager, WorkflowState};
