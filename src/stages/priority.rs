use std::collections::HashMap;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use crate::state::WorkflowState;

use super::{Component, Prioritizer, Priorities, PriorityItem};

/// State key holding the task list the priority manager ranks.
pub const TASKS_KEY: &str = "tasks";

/// Ranks open tasks from the `tasks` key of the state.
///
/// Tasks may be plain strings or objects with `name`, optional numeric
/// `priority`, and optional boolean `done`. A configured weight for a task
/// name wins over the task's own `priority`; otherwise earlier tasks rank
/// higher.
#[derive(Debug, Default)]
pub struct BasicPriorityManager {
    weights: HashMap<String, f64>,
}

impl BasicPriorityManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_weights(weights: HashMap<String, f64>) -> Self {
        Self { weights }
    }
}

impl Prioritizer for BasicPriorityManager {
    fn determine_priorities(&self, state: &WorkflowState) -> Priorities {
        let Some(tasks) = state.get(TASKS_KEY).and_then(Value::as_array) else {
            debug!("No task list in state, priorities are empty");
            return Priorities::default();
        };

        let total = tasks.len();
        let mut items: Vec<PriorityItem> = tasks
            .iter()
            .enumerate()
            .filter_map(|(index, task)| {
                let (name, own_priority) = match task {
                    Value::String(name) => (name.clone(), None),
                    Value::Object(obj) => {
                        if obj.get("done").and_then(Value::as_bool).unwrap_or(false) {
                            return None;
                        }
                        let name = obj.get("name").and_then(Value::as_str)?.to_string();
                        (name, obj.get("priority").and_then(Value::as_f64))
                    }
                    _ => return None,
                };

                let weight = self
                    .weights
                    .get(&name)
                    .copied()
                    .or(own_priority)
                    .unwrap_or((total - index) as f64);
                Some(PriorityItem { name, weight })
            })
            .collect();

        // Stable sort keeps list order among equal weights
        items.sort_by(|a, b| b.weight.total_cmp(&a.weight));

        debug!("Determined {} priorities", items.len());
        Priorities { items }
    }
}

#[async_trait]
impl Component for BasicPriorityManager {
    fn name(&self) -> &str {
        "BasicPriorityManager"
    }

    async fn execute(&self, mut state: WorkflowState) -> Result<WorkflowState> {
        let priorities = self.determine_priorities(&state);
        state.insert("priorities", priorities)?;
        Ok(state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn names(priorities: &Priorities) -> Vec<&str> {
        priorities.items.iter().map(|p| p.name.as_str()).collect()
    }

    #[test]
    fn test_no_tasks_yields_empty() {
        let manager = BasicPriorityManager::new();
        assert!(manager.determine_priorities(&WorkflowState::new()).is_empty());
    }

    #[test]
    fn test_list_order_is_default_rank() {
        let manager = BasicPriorityManager::new();
        let state = WorkflowState::from_value(json!({"tasks": ["design", "build", "test"]})).unwrap();
        assert_eq!(names(&manager.determine_priorities(&state)), vec!["design", "build", "test"]);
    }

    #[test]
    fn test_done_tasks_skipped_and_priority_respected() {
        let manager = BasicPriorityManager::new();
        let state = WorkflowState::from_value(json!({
            "tasks": [
                {"name": "docs", "priority": 1},
                {"name": "setup", "done": true},
                {"name": "core", "priority": 10},
                42
            ]
        }))
        .unwrap();

        assert_eq!(names(&manager.determine_priorities(&state)), vec!["core", "docs"]);
    }

    #[test]
    fn test_configured_weights_override() {
        let mut weights = HashMap::new();
        weights.insert("test".to_string(), 100.0);
        let manager = BasicPriorityManager::with_weights(weights);

        let state = WorkflowState::from_value(json!({"tasks": ["design", "build", "test"]})).unwrap();
        let priorities = manager.determine_priorities(&state);
        assert_eq!(priorities.items[0].name, "test");
        assert_eq!(priorities.items[0].weight, 100.0);
    }

    #[tokio::test]
    async fn test_execute_records_priorities() {
        let manager = BasicPriorityManager::new();
        let state = WorkflowState::from_value(json!({"tasks": ["only"]})).unwrap();
        let out = manager.execute(state).await.unwrap();
        assert_eq!(out.get("priorities").unwrap()["items"][0]["name"], "only");
    }
}
