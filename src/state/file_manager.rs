use std::path::{Path, PathBuf};

use anyhow::Result;
use async_trait::async_trait;
use tokio::fs;
use tracing::{debug, info};

use crate::errors::StateError;
use crate::stages::{Component, StateManager};

use super::WorkflowState;

/// Default state document name, relative to the project root.
pub const DEFAULT_STATE_FILE: &str = "state.json";

/// Persists the workflow state as a JSON document inside the project directory.
///
/// A missing file loads as an empty state. A file that exists but does not
/// parse is a `StateError::Parse`; it is never replaced by an empty state.
pub struct FileStateManager {
    state_file: PathBuf,
}

impl FileStateManager {
    pub fn new(project_root: &Path) -> Self {
        Self::with_file(project_root, DEFAULT_STATE_FILE)
    }

    /// Use a custom project-relative (or absolute) state file.
    pub fn with_file(project_root: &Path, file: impl AsRef<Path>) -> Self {
        let file = file.as_ref();
        let state_file = if file.is_absolute() {
            file.to_path_buf()
        } else {
            project_root.join(file)
        };
        Self { state_file }
    }

    pub fn state_file(&self) -> &Path {
        &self.state_file
    }

    fn temp_file(&self) -> PathBuf {
        let name = self
            .state_file
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| DEFAULT_STATE_FILE.to_string());
        self.state_file.with_file_name(format!(".{}.tmp", name))
    }
}

#[async_trait]
impl StateManager for FileStateManager {
    async fn load_state(&self) -> Result<WorkflowState, StateError> {
        let content = match fs::read_to_string(&self.state_file).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No state file at {:?}, starting with empty state", self.state_file);
                return Ok(WorkflowState::new());
            }
            Err(source) => {
                return Err(StateError::Read {
                    path: self.state_file.clone(),
                    source,
                });
            }
        };

        let value: serde_json::Value =
            serde_json::from_str(&content).map_err(|source| StateError::Parse {
                path: self.state_file.clone(),
                source,
            })?;

        WorkflowState::from_value(value)
    }

    async fn save_state(&self, state: &WorkflowState) -> Result<(), StateError> {
        if let Some(parent) = self.state_file.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|source| StateError::Write {
                    path: parent.to_path_buf(),
                    source,
                })?;
        }

        let json = state.to_json_string()?;
        let temp_file = self.temp_file();

        // Write to temp file first, then rename over the real one
        fs::write(&temp_file, &json)
            .await
            .map_err(|source| StateError::Write {
                path: temp_file.clone(),
                source,
            })?;
        fs::rename(&temp_file, &self.state_file)
            .await
            .map_err(|source| StateError::Write {
                path: self.state_file.clone(),
                source,
            })?;

        info!("Persisted workflow state ({} keys) to {:?}", state.len(), self.state_file);
        Ok(())
    }
}

#[async_trait]
impl Component for FileStateManager {
    fn name(&self) -> &str {
        "FileStateManager"
    }

    async fn execute(&self, state: WorkflowState) -> Result<WorkflowState> {
        self.save_state(&state).await?;
        Ok(state)
    }
}
