//! Constraint engine - named predicates validated against every snapshot.
//!
//! Besides the registered predicates, every validation also checks the
//! `project_structure` sub-mapping (when present) for a fixed set of
//! directories and files. All failures are collected; validation never stops
//! at the first one.

use std::fmt;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use regex::Regex;
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use crate::errors::{DirectorError, DirectorResult};
use crate::state::{PROJECT_STRUCTURE_KEY, WorkflowState};

use super::{Component, Validator};

/// Directories every `project_structure` mapping must list.
pub const REQUIRED_DIRECTORIES: [&str; 4] = ["src", "tests", "docs", "data"];

/// Files every `project_structure` mapping must list.
pub const REQUIRED_FILES: [&str; 3] = ["README.md", "requirements.txt", ".gitignore"];

type Predicate = dyn Fn(&WorkflowState) -> Result<bool> + Send + Sync;

/// A named predicate over the workflow state.
///
/// `Ok(false)` is a violation described by `description`; `Err(e)` is a
/// violation described by the error.
#[derive(Clone)]
pub struct Constraint {
    pub name: String,
    pub description: String,
    predicate: Arc<Predicate>,
}

impl Constraint {
    pub fn new<F>(name: impl Into<String>, description: impl Into<String>, predicate: F) -> Self
    where
        F: Fn(&WorkflowState) -> Result<bool> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            description: description.into(),
            predicate: Arc::new(predicate),
        }
    }

    /// Evaluate the predicate, returning a violation message on failure.
    pub fn check(&self, state: &WorkflowState) -> Option<String> {
        match (self.predicate)(state) {
            Ok(true) => None,
            Ok(false) => Some(format!("{}: {}", self.name, self.description)),
            Err(e) => Some(format!("{}: {}", self.name, e)),
        }
    }

    /// Build one of the built-in constraint types from configuration.
    ///
    /// Supported types: `requiredKeys`, `nonEmpty`, `pattern`, `jsonSchema`.
    pub fn from_config(kind: &str, options: &Map<String, Value>) -> DirectorResult<Self> {
        let name = options.get("name").and_then(Value::as_str);
        let description = options.get("description").and_then(Value::as_str);

        let constraint = match kind {
            "requiredKeys" => {
                let keys = string_list(options, "keys", kind)?;
                let default_desc = format!("state must contain keys {:?}", keys);
                Constraint::new(
                    name.unwrap_or("required_keys"),
                    description.map(String::from).unwrap_or(default_desc),
                    move |state| {
                        let missing: Vec<_> =
                            keys.iter().filter(|k| !state.contains_key(k)).cloned().collect();
                        if missing.is_empty() {
                            Ok(true)
                        } else {
                            Err(anyhow!("missing keys: {}", missing.join(", ")))
                        }
                    },
                )
            }
            "nonEmpty" => {
                let key = string_option(options, "key", kind)?;
                let default_name = format!("non_empty_{}", key);
                let default_desc = format!("'{}' must be present and non-empty", key);
                Constraint::new(
                    name.map(String::from).unwrap_or(default_name),
                    description.map(String::from).unwrap_or(default_desc),
                    move |state| Ok(state.get(&key).is_some_and(is_non_empty)),
                )
            }
            "pattern" => {
                let key = string_option(options, "key", kind)?;
                let raw = string_option(options, "regex", kind)?;
                let regex = Regex::new(&raw).map_err(|e| {
                    DirectorError::Configuration(format!("invalid regex for pattern constraint: {}", e))
                })?;
                let default_name = format!("pattern_{}", key);
                let default_desc = format!("'{}' must match /{}/", key, raw);
                Constraint::new(
                    name.map(String::from).unwrap_or(default_name),
                    description.map(String::from).unwrap_or(default_desc),
                    move |state| match state.get_str(&key) {
                        Some(text) => Ok(regex.is_match(text)),
                        None => Err(anyhow!("'{}' is missing or not a string", key)),
                    },
                )
            }
            "jsonSchema" => {
                let schema = options.get("schema").ok_or_else(|| {
                    DirectorError::Configuration("jsonSchema constraint requires a 'schema' option".into())
                })?;
                let validator = jsonschema::validator_for(schema).map_err(|e| {
                    DirectorError::Configuration(format!("invalid JSON schema: {}", e))
                })?;
                Constraint::new(
                    name.unwrap_or("json_schema"),
                    description.unwrap_or("state must match the configured JSON schema"),
                    move |state| {
                        let instance = Value::Object(state.as_map().clone());
                        if validator.is_valid(&instance) {
                            return Ok(true);
                        }
                        let messages: Vec<String> =
                            validator.iter_errors(&instance).map(|e| e.to_string()).collect();
                        Err(anyhow!("{}", messages.join("; ")))
                    },
                )
            }
            other => return Err(DirectorError::UnknownComponentType(format!("constraint type '{}'", other))),
        };

        Ok(constraint)
    }
}

impl fmt::Debug for Constraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Constraint")
            .field("name", &self.name)
            .field("description", &self.description)
            .finish_non_exhaustive()
    }
}

/// Registry of named constraints with reader/writer exclusion.
///
/// Many validations may run at once; registration takes the write lock so no
/// validation ever observes a half-registered constraint.
#[derive(Default)]
pub struct ConstraintEngine {
    constraints: RwLock<Vec<Constraint>>,
}

impl ConstraintEngine {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, Vec<Constraint>> {
        self.constraints.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Vec<Constraint>> {
        self.constraints.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Register a constraint. A duplicate name is rejected and the existing
    /// predicate is kept.
    pub fn add_constraint(&self, constraint: Constraint) -> DirectorResult<()> {
        let mut constraints = self.write();
        if constraints.iter().any(|c| c.name == constraint.name) {
            return Err(DirectorError::Configuration(format!(
                "constraint '{}' already exists",
                constraint.name
            )));
        }
        info!("Added constraint: {}", constraint.name);
        constraints.push(constraint);
        Ok(())
    }

    pub fn remove_constraint(&self, name: &str) -> Option<Constraint> {
        let mut constraints = self.write();
        let index = constraints.iter().position(|c| c.name == name)?;
        info!("Removed constraint: {}", name);
        Some(constraints.remove(index))
    }

    pub fn get_constraint(&self, name: &str) -> Option<Constraint> {
        self.read().iter().find(|c| c.name == name).cloned()
    }

    pub fn constraint_names(&self) -> Vec<String> {
        self.read().iter().map(|c| c.name.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }
}

/// Check the `project_structure` sub-mapping, if present.
///
/// An entry counts as present when it is a key of the mapping, or listed in
/// its `directories` / `files` arrays.
pub fn project_structure_violations(state: &WorkflowState) -> Vec<String> {
    let Some(structure) = state.get_object(PROJECT_STRUCTURE_KEY) else {
        return Vec::new();
    };

    let listed = |list_key: &str, entry: &str| {
        structure
            .get(list_key)
            .and_then(Value::as_array)
            .is_some_and(|items| items.iter().any(|i| i.as_str() == Some(entry)))
    };

    let missing_dirs = REQUIRED_DIRECTORIES
        .iter()
        .filter(|dir| !structure.contains_key(**dir) && !listed("directories", dir))
        .map(|dir| format!("{}: missing directory '{}'", PROJECT_STRUCTURE_KEY, dir));

    let missing_files = REQUIRED_FILES
        .iter()
        .filter(|file| !structure.contains_key(**file) && !listed("files", file))
        .map(|file| format!("{}: missing file '{}'", PROJECT_STRUCTURE_KEY, file));

    missing_dirs.chain(missing_files).collect()
}

impl Validator for ConstraintEngine {
    fn validate_all(&self, state: &WorkflowState) -> (bool, Vec<String>) {
        let mut violations: Vec<String> = {
            let constraints = self.read();
            debug!("Validating {} constraints", constraints.len());
            constraints.iter().filter_map(|c| c.check(state)).collect()
        };
        violations.extend(project_structure_violations(state));

        if violations.is_empty() {
            debug!("All constraints passed");
        } else {
            warn!("Constraint violations: {}", violations.join(", "));
        }

        (violations.is_empty(), violations)
    }
}

#[async_trait]
impl Component for ConstraintEngine {
    fn name(&self) -> &str {
        "BasicConstraintEngine"
    }

    async fn execute(&self, state: WorkflowState) -> Result<WorkflowState> {
        let (valid, violations) = self.validate_all(&state);
        if !valid {
            return Err(DirectorError::ConstraintViolation {
                stage: self.name().to_string(),
                violations,
            }
            .into());
        }
        Ok(state)
    }
}

fn is_non_empty(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::String(s) => !s.trim().is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
        Value::Bool(_) | Value::Number(_) => true,
    }
}

fn string_option(options: &Map<String, Value>, key: &str, kind: &str) -> DirectorResult<String> {
    options
        .get(key)
        .and_then(Value::as_str)
        .map(String::from)
        .ok_or_else(|| {
            DirectorError::Configuration(format!("{} constraint requires a string '{}' option", kind, key))
        })
}

fn string_list(options: &Map<String, Value>, key: &str, kind: &str) -> DirectorResult<Vec<String>> {
    let items = options.get(key).and_then(Value::as_array).ok_or_else(|| {
        DirectorError::Configuration(format!("{} constraint requires a '{}' array", kind, key))
    })?;
    items
        .iter()
        .map(|item| {
            item.as_str().map(String::from).ok_or_else(|| {
                DirectorError::Configuration(format!("{} constraint '{}' entries must be strings", kind, key))
            })
        })
        .collect()
}
