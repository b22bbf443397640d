//! Component registry - builds typed stages from configuration descriptors.
//!
//! ## Executor sharing
//!
//! The sufficiency evaluator delegates through an executor. By default it
//! receives the same instance the pipeline uses (`"executor": "shared"`), so
//! executor-side history is shared. With `"executor": "private"` it gets an
//! independent instance built from its own `executor_options`.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use crate::config::{ComponentDescriptor, WorkflowConfig};
use crate::errors::{DirectorError, DirectorResult};
use crate::stages::direction::{DEFAULT_PROCEED_TEMPLATE, DEFAULT_REMEDIATION_TEMPLATE};
use crate::stages::progress::DEFAULT_COMPLETION_KEY;
use crate::stages::{
    BasicDirectionGenerator, BasicPriorityManager, BasicProgressTracker, CommandExecutor,
    ConsoleInteractionHandler, Constraint, ConstraintEngine, DryRunExecutor, Executor,
    InteractionMode, LlmEvaluator, Role, Stage,
};
use crate::state::{DEFAULT_STATE_FILE, FileStateManager};

// ============================================================================
// Per-role options
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(default)]
struct StateManagerOptions {
    file: PathBuf,
}

impl Default for StateManagerOptions {
    fn default() -> Self {
        Self {
            file: PathBuf::from(DEFAULT_STATE_FILE),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct PriorityOptions {
    weights: HashMap<String, f64>,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct DirectionOptions {
    max_instructions: usize,
    proceed_template: String,
    remediation_template: String,
}

impl Default for DirectionOptions {
    fn default() -> Self {
        Self {
            max_instructions: 3,
            proceed_template: DEFAULT_PROCEED_TEMPLATE.to_string(),
            remediation_template: DEFAULT_REMEDIATION_TEMPLATE.to_string(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ExecutorOptions {
    command: Option<String>,
    args: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct InteractionOptions {
    mode: InteractionMode,
}

impl Default for InteractionOptions {
    fn default() -> Self {
        Self {
            mode: InteractionMode::Console,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct ProgressOptions {
    completion_key: String,
}

impl Default for ProgressOptions {
    fn default() -> Self {
        Self {
            completion_key: DEFAULT_COMPLETION_KEY.to_string(),
        }
    }
}

/// Where the sufficiency evaluator's executor comes from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutorPolicy {
    /// Reuse the pipeline's executor instance
    #[default]
    Shared,
    /// Construct an independent executor
    Private,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct SufficiencyOptions {
    executor: ExecutorPolicy,
    executor_options: Map<String, Value>,
}

fn parse_options<T: DeserializeOwned>(kind: &str, options: &Map<String, Value>) -> DirectorResult<T> {
    serde_json::from_value(Value::Object(options.clone()))
        .map_err(|e| DirectorError::Configuration(format!("invalid options for '{}': {}", kind, e)))
}

// ============================================================================
// Registry
// ============================================================================

/// Factory for pipeline stages rooted at one project directory.
#[derive(Debug, Clone)]
pub struct ComponentRegistry {
    project_root: PathBuf,
}

impl ComponentRegistry {
    pub fn new(project_root: impl Into<PathBuf>) -> Self {
        Self {
            project_root: project_root.into(),
        }
    }

    pub fn project_root(&self) -> &Path {
        &self.project_root
    }

    /// Build an executor from `aiderInterface` options. No `command` means dry run.
    pub fn build_executor(&self, options: &Map<String, Value>) -> DirectorResult<Arc<dyn Executor>> {
        let opts: ExecutorOptions = parse_options(Role::Executor.type_tag(), options)?;
        Ok(match opts.command {
            Some(command) => Arc::new(CommandExecutor::new(command, opts.args, self.project_root.clone())),
            None => Arc::new(DryRunExecutor::new()),
        })
    }

    /// Build a constraint engine and register the configured constraints.
    pub fn build_constraint_engine(&self, constraints: &[ComponentDescriptor]) -> DirectorResult<ConstraintEngine> {
        let engine = ConstraintEngine::new();
        for descriptor in constraints {
            engine.add_constraint(Constraint::from_config(&descriptor.kind, &descriptor.options)?)?;
        }
        Ok(engine)
    }

    /// Construct exactly one stage for `descriptor`.
    ///
    /// `shared_executor` is used for the executor role itself and for a
    /// sufficiency evaluator with the shared policy. Without it, the executor
    /// role builds a fresh instance and a shared-policy evaluator is an error.
    pub fn build(
        &self,
        descriptor: &ComponentDescriptor,
        constraints: &[ComponentDescriptor],
        shared_executor: Option<&Arc<dyn Executor>>,
    ) -> DirectorResult<Stage> {
        let kind = descriptor.kind.as_str();
        let role = Role::from_type_tag(kind)
            .ok_or_else(|| DirectorError::UnknownComponentType(kind.to_string()))?;
        let options = &descriptor.options;

        let stage = match role {
            Role::StateManager => {
                let opts: StateManagerOptions = parse_options(kind, options)?;
                Stage::StateManager(Arc::new(FileStateManager::with_file(&self.project_root, opts.file)))
            }
            Role::ConstraintEngine => Stage::ConstraintEngine(Arc::new(self.build_constraint_engine(constraints)?)),
            Role::PriorityManager => {
                let opts: PriorityOptions = parse_options(kind, options)?;
                Stage::PriorityManager(Arc::new(BasicPriorityManager::with_weights(opts.weights)))
            }
            Role::DirectionGenerator => {
                let opts: DirectionOptions = parse_options(kind, options)?;
                Stage::DirectionGenerator(Arc::new(BasicDirectionGenerator::with_templates(
                    &opts.proceed_template,
                    &opts.remediation_template,
                    opts.max_instructions,
                )?))
            }
            Role::Executor => match shared_executor {
                Some(executor) => Stage::Executor(Arc::clone(executor)),
                None => Stage::Executor(self.build_executor(options)?),
            },
            Role::UserInteractionHandler => {
                let opts: InteractionOptions = parse_options(kind, options)?;
                Stage::UserInteractionHandler(Arc::new(ConsoleInteractionHandler::new(opts.mode)))
            }
            Role::ProgressTracker => {
                let opts: ProgressOptions = parse_options(kind, options)?;
                Stage::ProgressTracker(Arc::new(BasicProgressTracker::new(opts.completion_key)))
            }
            Role::SufficiencyEvaluator => {
                let opts: SufficiencyOptions = parse_options(kind, options)?;
                let executor = match (opts.executor, shared_executor) {
                    (ExecutorPolicy::Shared, Some(executor)) => Arc::clone(executor),
                    (ExecutorPolicy::Shared, None) => {
                        return Err(DirectorError::Configuration(
                            "sufficiencyEvaluator with a shared executor requires an aiderInterface component"
                                .to_string(),
                        ));
                    }
                    (ExecutorPolicy::Private, _) => self.build_executor(&opts.executor_options)?,
                };
                debug!("Sufficiency evaluator executor policy: {:?}", opts.executor);
                Stage::SufficiencyEvaluator(Arc::new(LlmEvaluator::new(executor)))
            }
        };

        debug!("Built component {} as {}", stage.name(), role);
        Ok(stage)
    }

    /// Build every configured component, in configuration order.
    ///
    /// The executor is constructed first so it can be injected into a
    /// shared-policy sufficiency evaluator regardless of list order.
    pub fn assemble(&self, config: &WorkflowConfig) -> DirectorResult<Vec<Stage>> {
        config.validate()?;

        // Surface unknown type tags before constructing anything
        if let Some(unknown) = config
            .components
            .iter()
            .find(|d| Role::from_type_tag(&d.kind).is_none())
        {
            return Err(DirectorError::UnknownComponentType(unknown.kind.clone()));
        }

        let shared_executor = config
            .components
            .iter()
            .find(|d| Role::from_type_tag(&d.kind) == Some(Role::Executor))
            .map(|d| self.build_executor(&d.options))
            .transpose()?;

        if !config.constraints.is_empty()
            && !config
                .components
                .iter()
                .any(|d| Role::from_type_tag(&d.kind) == Some(Role::ConstraintEngine))
        {
            warn!("Constraints configured without a constraintEngine component; they will not be checked");
        }

        let stages = config
            .components
            .iter()
            .map(|d| self.build(d, &config.constraints, shared_executor.as_ref()))
            .collect::<DirectorResult<Vec<_>>>()?;

        info!("Assembled {} components", stages.len());
        Ok(stages)
    }
}
