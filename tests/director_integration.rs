//! Integration tests for the workflow director.
//!
//! These tests drive complete runs through recording stand-in stages and
//! through the built-in components assembled from configuration:
//! - Stage ordering within a pass
//! - Snapshot semantics for interaction and progress
//! - Failure paths (constraints, stage errors, panics, deadlines)
//! - Configuration assembly and executor sharing

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use anyhow::{Result, bail};
use async_trait::async_trait;
use serde_json::{Value, json};
use tempfile::tempdir;
use tokio_util::sync::CancellationToken;

use workflow_director::stages::DirectionKind;
use workflow_director::{
    Component, ComponentRegistry, DirectionGenerator, Directions, Director, DirectorError, DirectorSettings,
    DirectorStatus, ErrorKind, Executor, FileStateManager, InteractionHandler, Prioritizer, Priorities,
    ProgressTracker, StateError, StateManager, SufficiencyEvaluator, SufficiencyResult, Validator,
    WorkflowConfig, WorkflowState,
};

// ============================================================================
// Recording stages
// ============================================================================

type Log = Arc<Mutex<Vec<String>>>;

fn record(log: &Log, entry: &str) {
    log.lock().unwrap().push(entry.to_string());
}

macro_rules! passthrough_component {
    ($ty:ty, $name:literal) => {
        #[async_trait]
        impl Component for $ty {
            fn name(&self) -> &str {
                $name
            }

            async fn execute(&self, state: WorkflowState) -> Result<WorkflowState> {
                Ok(state)
            }
        }
    };
}

#[derive(Clone, Copy, PartialEq)]
enum StoreFault {
    PanicOnLoad,
    FailOnSave,
}

struct MemoryStateManager {
    log: Log,
    state: Mutex<WorkflowState>,
    saves: AtomicUsize,
    fault: Option<StoreFault>,
}

#[async_trait]
impl StateManager for MemoryStateManager {
    async fn load_state(&self) -> Result<WorkflowState, StateError> {
        record(&self.log, "load");
        if self.fault == Some(StoreFault::PanicOnLoad) {
            panic!("state store poisoned");
        }
        Ok(self.state.lock().unwrap().clone())
    }

    async fn save_state(&self, state: &WorkflowState) -> Result<(), StateError> {
        record(&self.log, "save");
        if self.fault == Some(StoreFault::FailOnSave) {
            return Err(StateError::Unsupported("disk full".into()));
        }
        self.saves.fetch_add(1, Ordering::SeqCst);
        *self.state.lock().unwrap() = state.clone();
        Ok(())
    }
}
passthrough_component!(MemoryStateManager, "MemoryStateManager");

struct StubValidator {
    log: Log,
    violations: Vec<String>,
}

impl Validator for StubValidator {
    fn validate_all(&self, _state: &WorkflowState) -> (bool, Vec<String>) {
        record(&self.log, "validate");
        (self.violations.is_empty(), self.violations.clone())
    }
}
passthrough_component!(StubValidator, "StubValidator");

struct StubPrioritizer {
    log: Log,
}

impl Prioritizer for StubPrioritizer {
    fn determine_priorities(&self, _state: &WorkflowState) -> Priorities {
        record(&self.log, "prioritize");
        Priorities::default()
    }
}
passthrough_component!(StubPrioritizer, "StubPrioritizer");

struct StubDirections {
    log: Log,
}

#[async_trait]
impl DirectionGenerator for StubDirections {
    async fn generate(&self, state: &WorkflowState, _priorities: &Priorities) -> Result<Directions> {
        record(&self.log, "direct:proceed");
        Ok(Directions {
            kind: DirectionKind::Proceed,
            instructions: vec!["continue".into()],
            reason: None,
            state: state.clone(),
        })
    }

    async fn generate_for_insufficiency(
        &self,
        state: &WorkflowState,
        _priorities: &Priorities,
        reason: &str,
    ) -> Result<Directions> {
        record(&self.log, "direct:remediate");
        Ok(Directions {
            kind: DirectionKind::Remediate,
            instructions: vec!["gather requirements".into()],
            reason: Some(reason.to_string()),
            state: state.clone(),
        })
    }
}
passthrough_component!(StubDirections, "StubDirections");

#[derive(Default)]
enum ExecutorBehavior {
    /// Bump `passes`
    #[default]
    Advance,
    /// Bump `passes`; set `done` once it reaches the threshold
    CompleteAfter(u64),
    Fail,
    Panic,
    Stall(Duration),
}

struct StubExecutor {
    log: Log,
    behavior: ExecutorBehavior,
}

#[async_trait]
impl Executor for StubExecutor {
    async fn execute_directions(&self, directions: &Directions) -> Result<Value> {
        record(&self.log, "execute");
        match self.behavior {
            ExecutorBehavior::Fail => bail!("assistant unavailable"),
            ExecutorBehavior::Panic => panic!("executor blew up"),
            ExecutorBehavior::Stall(delay) => tokio::time::sleep(delay).await,
            _ => {}
        }

        let mut out = directions.state.clone();
        let passes = out.get("passes").and_then(Value::as_u64).unwrap_or(0) + 1;
        out.insert("passes", passes)?;
        out.insert("last_kind", directions.kind)?;
        if let ExecutorBehavior::CompleteAfter(n) = self.behavior
            && passes >= n
        {
            out.insert("done", true)?;
        }
        Ok(out.into_value())
    }
}
passthrough_component!(StubExecutor, "StubExecutor");

struct StubInteraction {
    log: Log,
    seen: Mutex<Vec<WorkflowState>>,
}

#[async_trait]
impl InteractionHandler for StubInteraction {
    fn is_interaction_required(&self, state: &WorkflowState) -> bool {
        state.get_bool("needs_human").unwrap_or(false)
    }

    async fn handle_interaction(&self, state: &WorkflowState) -> Result<()> {
        record(&self.log, "interact");
        self.seen.lock().unwrap().push(state.clone());
        Ok(())
    }
}
passthrough_component!(StubInteraction, "StubInteraction");

struct StubProgress {
    log: Log,
    seen: Mutex<Vec<WorkflowState>>,
}

#[async_trait]
impl ProgressTracker for StubProgress {
    async fn update_progress(&self, state: &WorkflowState) -> Result<()> {
        record(&self.log, "progress");
        self.seen.lock().unwrap().push(state.clone());
        Ok(())
    }

    fn is_complete(&self, state: &WorkflowState) -> bool {
        state.get_bool("done").unwrap_or(false)
    }
}
passthrough_component!(StubProgress, "StubProgress");

struct StubEvaluator {
    log: Log,
    sufficient: bool,
}

#[async_trait]
impl SufficiencyEvaluator for StubEvaluator {
    async fn evaluate(&self, _state: &WorkflowState) -> Result<SufficiencyResult> {
        record(&self.log, "evaluate");
        Ok(SufficiencyResult {
            sufficient: self.sufficient,
            reason: "missing requirements".into(),
        })
    }
}
passthrough_component!(StubEvaluator, "StubEvaluator");

// ============================================================================
// Harness
// ============================================================================

struct Harness {
    log: Log,
    state_manager: Arc<MemoryStateManager>,
    interaction: Arc<StubInteraction>,
    progress: Arc<StubProgress>,
    violations: Vec<String>,
    sufficient: bool,
    behavior: ExecutorBehavior,
}

impl Harness {
    fn new(initial: Value) -> Self {
        let log: Log = Arc::new(Mutex::new(Vec::new()));
        Self {
            state_manager: Arc::new(MemoryStateManager {
                log: Arc::clone(&log),
                state: Mutex::new(WorkflowState::from_value(initial).unwrap()),
                saves: AtomicUsize::new(0),
                fault: None,
            }),
            interaction: Arc::new(StubInteraction {
                log: Arc::clone(&log),
                seen: Mutex::new(Vec::new()),
            }),
            progress: Arc::new(StubProgress {
                log: Arc::clone(&log),
                seen: Mutex::new(Vec::new()),
            }),
            log,
            violations: Vec::new(),
            sufficient: true,
            behavior: ExecutorBehavior::default(),
        }
    }

    fn director(&mut self, settings: DirectorSettings) -> Director {
        Director::new(
            self.state_manager.clone(),
            Arc::new(StubValidator {
                log: Arc::clone(&self.log),
                violations: std::mem::take(&mut self.violations),
            }),
            Arc::new(StubPrioritizer {
                log: Arc::clone(&self.log),
            }),
            Arc::new(StubDirections {
                log: Arc::clone(&self.log),
            }),
            Arc::new(StubExecutor {
                log: Arc::clone(&self.log),
                behavior: std::mem::take(&mut self.behavior),
            }),
            self.interaction.clone(),
            self.progress.clone(),
            Arc::new(StubEvaluator {
                log: Arc::clone(&self.log),
                sufficient: self.sufficient,
            }),
            settings,
        )
    }

    fn with_store_fault(mut self, fault: StoreFault) -> Self {
        if let Some(store) = Arc::get_mut(&mut self.state_manager) {
            store.fault = Some(fault);
        }
        self
    }

    fn entries(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }

    fn persisted(&self) -> WorkflowState {
        self.state_manager.state.lock().unwrap().clone()
    }
}

fn fast_settings() -> DirectorSettings {
    DirectorSettings {
        pause_ms: 0,
        ..DirectorSettings::default()
    }
}

// ============================================================================
// Pass semantics
// ============================================================================

#[tokio::test]
async fn test_pass_runs_stages_in_order_once_when_already_complete() {
    let mut harness = Harness::new(json!({"done": true, "needs_human": true}));
    let director = harness.director(fast_settings());

    let summary = director.run().await.unwrap();

    assert_eq!(summary.iterations, 1);
    assert_eq!(
        harness.entries(),
        vec![
            "load",
            "validate",
            "prioritize",
            "evaluate",
            "direct:proceed",
            "execute",
            "save",
            "interact",
            "progress"
        ]
    );
    assert_eq!(director.status(), DirectorStatus::Completed);
}

#[tokio::test]
async fn test_interaction_and_progress_see_pre_pass_snapshot() {
    let mut harness = Harness::new(json!({"needs_human": true}));
    harness.behavior = ExecutorBehavior::CompleteAfter(1);
    let director = harness.director(fast_settings());

    let summary = director.run().await.unwrap();

    // Pass 1 persisted done=true, but completion is judged on the snapshot,
    // so only pass 2 observes it.
    assert_eq!(summary.iterations, 2);

    let progress_seen = harness.progress.seen.lock().unwrap().clone();
    assert_eq!(progress_seen.len(), 2);
    assert!(progress_seen[0].get("passes").is_none());
    assert!(progress_seen[0].get("done").is_none());
    assert_eq!(progress_seen[1].get("passes"), Some(&json!(1)));

    let interaction_seen = harness.interaction.seen.lock().unwrap().clone();
    assert!(interaction_seen[0].get("passes").is_none());

    assert_eq!(harness.persisted().get("passes"), Some(&json!(2)));
}

#[tokio::test]
async fn test_insufficient_state_takes_only_remediation_path() {
    let mut harness = Harness::new(json!({"done": true}));
    harness.sufficient = false;
    let director = harness.director(fast_settings());

    director.run().await.unwrap();

    let entries = harness.entries();
    assert!(entries.contains(&"direct:remediate".to_string()));
    assert!(!entries.contains(&"direct:proceed".to_string()));
    assert_eq!(harness.persisted().get_str("last_kind"), Some("remediate"));
}

#[tokio::test]
async fn test_interaction_skipped_when_not_required() {
    let mut harness = Harness::new(json!({"done": true}));
    let director = harness.director(fast_settings());

    director.run().await.unwrap();
    assert!(!harness.entries().contains(&"interact".to_string()));
}

// ============================================================================
// Failure paths
// ============================================================================

#[tokio::test]
async fn test_constraint_violations_abort_pass_before_other_stages() {
    let mut harness = Harness::new(json!({"done": true}));
    harness.violations = vec!["goal: missing".into(), "stage: missing".into()];
    let director = harness.director(fast_settings());

    let err = director.run().await.unwrap_err();

    match &err {
        DirectorError::ConstraintViolation { stage, violations } => {
            assert_eq!(stage, "StubValidator");
            assert_eq!(violations, &vec!["goal: missing".to_string(), "stage: missing".to_string()]);
        }
        other => panic!("expected constraint violation, got {:?}", other),
    }
    assert_eq!(err.kind(), ErrorKind::RunFailure);
    assert_eq!(harness.entries(), vec!["load", "validate"]);
    assert_eq!(harness.state_manager.saves.load(Ordering::SeqCst), 0);
    assert_eq!(director.status(), DirectorStatus::Failed);
}

#[tokio::test]
async fn test_stage_error_carries_stage_name() {
    let mut harness = Harness::new(json!({}));
    harness.behavior = ExecutorBehavior::Fail;
    let director = harness.director(fast_settings());

    let err = director.run().await.unwrap_err();

    assert!(matches!(&err, DirectorError::Stage { stage, .. } if stage == "StubExecutor"));
    assert!(err.to_string().contains("assistant unavailable"));
    // No retry: the failing stage ran exactly once
    assert_eq!(harness.entries().iter().filter(|e| *e == "execute").count(), 1);
}

#[tokio::test]
async fn test_panic_in_stage_becomes_error() {
    let mut harness = Harness::new(json!({}));
    harness.behavior = ExecutorBehavior::Panic;
    let director = harness.director(fast_settings());

    let err = director.run().await.unwrap_err();

    assert!(matches!(&err, DirectorError::PanicRecovered(m) if m == "executor blew up"));
    assert_eq!(director.status(), DirectorStatus::Failed);
}

#[tokio::test]
async fn test_panic_while_loading_state_becomes_error() {
    let mut harness = Harness::new(json!({})).with_store_fault(StoreFault::PanicOnLoad);
    let director = harness.director(fast_settings());

    let err = director.run().await.unwrap_err();

    assert!(matches!(&err, DirectorError::PanicRecovered(m) if m == "state store poisoned"));
    assert_eq!(err.kind(), ErrorKind::RunFailure);
    assert_eq!(harness.entries(), vec!["load"]);
    assert_eq!(director.status(), DirectorStatus::Failed);
}

#[tokio::test]
async fn test_save_failure_names_state_manager() {
    let mut harness = Harness::new(json!({"done": true})).with_store_fault(StoreFault::FailOnSave);
    let director = harness.director(fast_settings());

    let err = director.run().await.unwrap_err();

    assert!(matches!(&err, DirectorError::StateIo { stage, .. } if stage == "MemoryStateManager"));
    assert!(err.to_string().starts_with("Stage MemoryStateManager failed"));
    assert!(!harness.entries().contains(&"progress".to_string()));
    assert_eq!(director.status(), DirectorStatus::Failed);
}

#[tokio::test]
async fn test_deadline_returns_without_waiting_for_stalled_stage() {
    let mut harness = Harness::new(json!({}));
    harness.behavior = ExecutorBehavior::Stall(Duration::from_secs(5));
    let director = Arc::new(harness.director(DirectorSettings {
        deadline_secs: 1,
        ..fast_settings()
    }));

    let start = Instant::now();
    let err = Arc::clone(&director).run_with_deadline().await.unwrap_err();

    assert!(matches!(err, DirectorError::Timeout(d) if d == Duration::from_secs(1)));
    assert_eq!(err.kind(), ErrorKind::Timeout);
    assert!(start.elapsed() < Duration::from_secs(3));
    assert_eq!(director.status(), DirectorStatus::TimedOut);
}

#[tokio::test]
async fn test_cancelled_run_stops_before_first_pass() {
    let mut harness = Harness::new(json!({}));
    let director = harness.director(fast_settings());
    let cancel = CancellationToken::new();
    cancel.cancel();

    let err = director.run_until(&cancel).await.unwrap_err();
    assert!(matches!(err, DirectorError::Timeout(_)));
    assert!(harness.entries().is_empty());
}

#[tokio::test]
async fn test_status_transitions_are_observable() {
    let mut harness = Harness::new(json!({"done": true}));
    let director = harness.director(fast_settings());
    let mut status = director.subscribe();

    assert_eq!(*status.borrow(), DirectorStatus::Idle);
    director.run().await.unwrap();

    assert!(status.has_changed().unwrap());
    assert_eq!(*status.borrow_and_update(), DirectorStatus::Completed);
    assert!(director.status().is_terminal());
}

// ============================================================================
// Assembly from configuration
// ============================================================================

#[test]
fn test_missing_roles_rejected() {
    let dir = tempdir().unwrap();
    let config = WorkflowConfig::from_json(
        r#"{"components":[{"type":"stateManager"},{"type":"constraintEngine"}]}"#,
    )
    .unwrap();

    let err = Director::from_config(&config, &ComponentRegistry::new(dir.path()))
        .err()
        .unwrap();

    assert_eq!(err.kind(), ErrorKind::Configuration);
    assert!(err.to_string().contains("all required components must be provided"));
}

#[test]
fn test_unknown_type_and_empty_components_rejected() {
    let dir = tempdir().unwrap();
    let registry = ComponentRegistry::new(dir.path());

    let unknown = WorkflowConfig::from_json(r#"{"components":[{"type":"timeMachine"}]}"#).unwrap();
    let err = Director::from_config(&unknown, &registry).err().unwrap();
    assert!(matches!(err, DirectorError::UnknownComponentType(ref t) if t == "timeMachine"));
    assert_eq!(err.kind(), ErrorKind::Configuration);

    let err = WorkflowConfig::from_json(r#"{"components":[]}"#).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Configuration);
}

#[tokio::test]
async fn test_evaluator_shares_pipeline_executor_by_default() {
    let dir = tempdir().unwrap();
    let director = Director::from_config(&WorkflowConfig::default(), &ComponentRegistry::new(dir.path())).unwrap();

    let outcome = director.mediator().execute_pass(WorkflowState::new()).await.unwrap();

    // One evaluation request plus one directions payload on the same instance
    assert_eq!(outcome.state.get("executor_calls"), Some(&json!(2)));
    assert!(outcome.sufficiency.sufficient);
}

#[tokio::test]
async fn test_private_evaluator_executor_is_independent() {
    let dir = tempdir().unwrap();
    let config = WorkflowConfig::from_json(
        r#"{"components":[
            {"type":"stateManager"},
            {"type":"constraintEngine"},
            {"type":"priorityManager"},
            {"type":"directionGenerator"},
            {"type":"executor"},
            {"type":"userInteractionHandler"},
            {"type":"progressTracker"},
            {"type":"sufficiencyEvaluator","options":{"executor":"private"}}
        ]}"#,
    )
    .unwrap();
    let director = Director::from_config(&config, &ComponentRegistry::new(dir.path())).unwrap();

    let outcome = director.mediator().execute_pass(WorkflowState::new()).await.unwrap();
    assert_eq!(outcome.state.get("executor_calls"), Some(&json!(1)));
}

#[tokio::test]
async fn test_yaml_config_with_iteration_limit() {
    let dir = tempdir().unwrap();
    let config_path = dir.path().join("workflow.yaml");
    std::fs::write(
        &config_path,
        r#"
components:
  - type: stateManager
    options:
      file: .workflow/state.json
  - type: constraintEngine
  - type: priorityManager
  - type: directionGenerator
  - type: aiderInterface
  - type: userInteractionHandler
    options:
      mode: auto_approve
  - type: progressTracker
  - type: sufficiencyEvaluator
director:
  pause_ms: 0
  max_iterations: 2
"#,
    )
    .unwrap();

    let config = WorkflowConfig::load_or_default(Some(config_path.as_path())).unwrap();
    let director = Director::from_config(&config, &ComponentRegistry::new(dir.path())).unwrap();

    let err = director.run().await.unwrap_err();
    assert!(matches!(err, DirectorError::IterationLimit { limit: 2 }));
    assert_eq!(err.kind(), ErrorKind::RunFailure);

    let persisted = std::fs::read_to_string(dir.path().join(".workflow/state.json")).unwrap();
    let persisted: Value = serde_json::from_str(&persisted).unwrap();
    assert_eq!(persisted["iteration"], 2);
}

// ============================================================================
// Persistence
// ============================================================================

#[tokio::test]
async fn test_state_round_trips_through_file_manager() {
    let dir = tempdir().unwrap();
    let manager = FileStateManager::new(dir.path());

    assert!(manager.load_state().await.unwrap().is_empty());

    let state = WorkflowState::from_value(json!({
        "stage": "build",
        "tasks": [{"name": "write tests", "priority": 2}],
        "project_structure": {"directories": ["src"], "files": []},
        "completed": false
    }))
    .unwrap();
    manager.save_state(&state).await.unwrap();

    assert_eq!(manager.load_state().await.unwrap(), state);
}

#[tokio::test]
async fn test_completed_run_persists_executor_result() {
    let dir = tempdir().unwrap();
    std::fs::write(
        dir.path().join("state.json"),
        json!({"completed": true, "tasks": ["ship"]}).to_string(),
    )
    .unwrap();

    let director = Director::from_config(&WorkflowConfig::default(), &ComponentRegistry::new(dir.path())).unwrap();
    let summary = director.run().await.unwrap();

    let reloaded = FileStateManager::new(dir.path()).load_state().await.unwrap();
    assert_eq!(reloaded, summary.final_state);
    assert_eq!(reloaded.get("last_directions").unwrap()["instructions"][0], "Implement 'ship'.");
}

#[tokio::test]
async fn test_run_summary_carries_progress_and_interaction_history() {
    let dir = tempdir().unwrap();
    std::fs::write(
        dir.path().join("state.json"),
        json!({
            "completed": true,
            "requires_human_input": true,
            "human_input_reason": "Schema changed"
        })
        .to_string(),
    )
    .unwrap();
    let config = WorkflowConfig::from_json(
        r#"{"components":[
            {"type":"stateManager"},
            {"type":"constraintEngine"},
            {"type":"priorityManager"},
            {"type":"directionGenerator"},
            {"type":"executor"},
            {"type":"userInteractionHandler","options":{"mode":"auto_approve"}},
            {"type":"progressTracker"},
            {"type":"sufficiencyEvaluator"}
        ]}"#,
    )
    .unwrap();

    let director = Director::from_config(&config, &ComponentRegistry::new(dir.path())).unwrap();
    let summary = director.run().await.unwrap();

    assert_eq!(summary.progress.len(), 1);
    assert!(summary.progress[0].complete);
    assert_eq!(summary.interactions.len(), 1);
    assert!(summary.interactions[0].approved);
    assert_eq!(
        summary.interactions[0].question,
        "Schema changed. Continue the workflow? (y/n)"
    );
}
