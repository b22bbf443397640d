use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::errors::{DirectorError, DirectorResult};
use crate::stages::Role;

/// One entry of the `components` or `constraints` list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentDescriptor {
    /// Type tag, e.g. "stateManager"
    #[serde(rename = "type")]
    pub kind: String,
    /// Free-form options interpreted by the constructed component
    #[serde(default)]
    pub options: Map<String, Value>,
}

impl ComponentDescriptor {
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            options: Map::new(),
        }
    }

    pub fn with_option(mut self, key: impl Into<String>, value: Value) -> Self {
        self.options.insert(key.into(), value);
        self
    }
}

/// Which loop body the director drives.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoopMode {
    /// One mediator pass per iteration
    #[default]
    Mediated,
    /// Each component's generic transform, in configuration order
    Direct,
}

/// Termination and bounding policy for a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DirectorSettings {
    /// Wall-clock deadline for the whole run
    pub deadline_secs: u64,
    /// Cooperative pause between iterations
    pub pause_ms: u64,
    /// Fail the run once this many iterations ran without completion
    pub max_iterations: Option<u32>,
    pub mode: LoopMode,
}

impl Default for DirectorSettings {
    fn default() -> Self {
        Self {
            deadline_secs: 10,
            pause_ms: 10,
            max_iterations: None,
            mode: LoopMode::Mediated,
        }
    }
}

impl DirectorSettings {
    pub fn deadline(&self) -> Duration {
        Duration::from_secs(self.deadline_secs)
    }

    pub fn pause(&self) -> Duration {
        Duration::from_millis(self.pause_ms)
    }
}

/// Declarative description of a pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowConfig {
    #[serde(default)]
    pub components: Vec<ComponentDescriptor>,
    #[serde(default)]
    pub constraints: Vec<ComponentDescriptor>,
    #[serde(default)]
    pub director: DirectorSettings,
}

impl Default for WorkflowConfig {
    /// All eight canonical components with empty options, in pipeline order.
    fn default() -> Self {
        Self {
            components: Role::ALL
                .into_iter()
                .map(|role| ComponentDescriptor::new(role.type_tag()))
                .collect(),
            constraints: Vec::new(),
            director: DirectorSettings::default(),
        }
    }
}

impl WorkflowConfig {
    /// Parse a configuration document. YAML is accepted for `.yaml`/`.yml`
    /// files, JSON otherwise.
    pub fn from_file(path: &Path) -> DirectorResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            DirectorError::Configuration(format!("failed to read configuration file {:?}: {}", path, e))
        })?;

        let is_yaml = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("yaml") || e.eq_ignore_ascii_case("yml"));

        let config = if is_yaml {
            serde_yaml::from_str(&content).map_err(|e| {
                DirectorError::Configuration(format!("failed to parse configuration file {:?}: {}", path, e))
            })?
        } else {
            Self::from_json(&content)?
        };

        Ok(config)
    }

    /// Parse a JSON configuration document and validate it.
    pub fn from_json(content: &str) -> DirectorResult<Self> {
        let config: Self = serde_json::from_str(content).map_err(|e| {
            DirectorError::Configuration(format!("failed to parse configuration: {}", e))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration, falling back to the default document when no path is given.
    ///
    /// An explicit path that cannot be read is an error, not a fallback.
    pub fn load_or_default(path: Option<&Path>) -> DirectorResult<Self> {
        let config = match path {
            Some(p) => Self::from_file(p)?,
            None => Self::default(),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> DirectorResult<()> {
        if self.components.is_empty() {
            return Err(DirectorError::Configuration(
                "at least one component is required".to_string(),
            ));
        }
        if self.director.deadline_secs == 0 {
            return Err(DirectorError::Configuration(
                "director.deadline_secs must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}
