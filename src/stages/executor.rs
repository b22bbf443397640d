//! Executors - carry out directions and return an opaque result.
//!
//! - `DryRunExecutor` never leaves the process; it records every payload and
//!   echoes the snapshot back with the directions applied as metadata
//! - `CommandExecutor` pipes the payload as JSON into an external coding
//!   assistant and reads its JSON reply from stdout

use std::path::PathBuf;
use std::io::ErrorKind;
use std::process::Stdio;
use std::sync::{Mutex, MutexGuard};

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use serde_json::{Value, json};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, info};

use crate::state::WorkflowState;

use super::{Component, DirectionKind, Directions, Executor};

/// Converts a direct-loop state into the directions it carries.
fn directions_from_state(state: &WorkflowState) -> Directions {
    let mut directions = state
        .get("directions")
        .and_then(|v| serde_json::from_value::<Directions>(v.clone()).ok())
        .unwrap_or_else(|| Directions {
            kind: DirectionKind::Proceed,
            instructions: Vec::new(),
            reason: None,
            state: WorkflowState::new(),
        });
    let mut snapshot = state.clone();
    snapshot.remove("directions");
    directions.state = snapshot;
    directions
}

async fn execute_into_state<E: Executor + ?Sized>(executor: &E, state: WorkflowState) -> Result<WorkflowState> {
    let directions = directions_from_state(&state);
    let result = executor.execute_directions(&directions).await?;
    WorkflowState::from_value(result).context("Executor result is not a workflow state")
}

// ============================================================================
// Dry-run executor
// ============================================================================

/// In-process executor that records payloads instead of invoking an assistant.
#[derive(Debug, Default)]
pub struct DryRunExecutor {
    history: Mutex<Vec<Directions>>,
}

impl DryRunExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Directions>> {
        self.history.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Every payload received so far, oldest first.
    pub fn history(&self) -> Vec<Directions> {
        self.lock().clone()
    }

    pub fn call_count(&self) -> usize {
        self.lock().len()
    }
}

#[async_trait]
impl Executor for DryRunExecutor {
    async fn execute_directions(&self, directions: &Directions) -> Result<Value> {
        let calls = {
            let mut history = self.lock();
            history.push(directions.clone());
            history.len()
        };

        if directions.kind == DirectionKind::Evaluate {
            return Ok(json!({
                "evaluation": "SUFFICIENT",
                "reasoning": "dry-run executor accepts every state",
            }));
        }

        let mut result = directions.state.clone();
        let iteration = result.get("iteration").and_then(Value::as_u64).unwrap_or(0);
        result.insert("iteration", iteration + 1)?;
        // Calls seen by this instance, including sufficiency evaluations
        result.insert("executor_calls", calls)?;
        result.insert(
            "last_directions",
            json!({
                "kind": directions.kind,
                "instructions": directions.instructions,
                "reason": directions.reason,
            }),
        )?;

        debug!("Dry-run executed {} instructions", directions.instructions.len());
        Ok(result.into_value())
    }
}

#[async_trait]
impl Component for DryRunExecutor {
    fn name(&self) -> &str {
        "DryRunAiderInterface"
    }

    async fn execute(&self, state: WorkflowState) -> Result<WorkflowState> {
        execute_into_state(self, state).await
    }
}

// ============================================================================
// Command executor
// ============================================================================

/// Runs an external assistant once per payload.
///
/// The payload is written to the child's stdin as JSON. Stdout is parsed as
/// JSON; anything else is wrapped as `{"output": "<text>"}`.
#[derive(Debug, Clone)]
pub struct CommandExecutor {
    program: String,
    args: Vec<String>,
    working_dir: PathBuf,
}

impl CommandExecutor {
    pub fn new(program: impl Into<String>, args: Vec<String>, working_dir: PathBuf) -> Self {
        Self {
            program: program.into(),
            args,
            working_dir,
        }
    }
}

#[async_trait]
impl Executor for CommandExecutor {
    async fn execute_directions(&self, directions: &Directions) -> Result<Value> {
        let payload = serde_json::to_vec(directions).context("Failed to serialize directions")?;

        info!("Spawning: {} {}", self.program, self.args.join(" "));
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .current_dir(&self.working_dir)
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("Failed to spawn executor command '{}'", self.program))?;

        // Feed stdin while draining stdout/stderr: a child that writes as it
        // reads would otherwise block on a full pipe while we block on stdin.
        let stdin = child.stdin.take();
        let feed = async move {
            if let Some(mut stdin) = stdin {
                stdin.write_all(&payload).await?;
                stdin.shutdown().await?;
            }
            Ok::<_, std::io::Error>(())
        };
        let (fed, output) = tokio::join!(feed, child.wait_with_output());
        let output = output.context("Failed to wait for executor command")?;

        // A child may exit without reading all of its input
        if let Err(e) = fed
            && e.kind() != ErrorKind::BrokenPipe
        {
            return Err(e).context("Failed to write directions to executor stdin");
        }

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!(
                "Executor command exited with {}: {}",
                output.status,
                stderr.trim()
            );
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let trimmed = stdout.trim();
        Ok(serde_json::from_str(trimmed).unwrap_or_else(|_| json!({ "output": trimmed })))
    }
}

#[async_trait]
impl Component for CommandExecutor {
    fn name(&self) -> &str {
        "CommandAiderInterface"
    }

    async fn execute(&self, state: WorkflowState) -> Result<WorkflowState> {
        execute_into_state(self, state).await
    }
}
