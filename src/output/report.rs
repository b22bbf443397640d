use serde_json::Value;

use crate::stages::constraint::project_structure_violations;
use crate::stages::progress::DEFAULT_COMPLETION_KEY;
use crate::stages::{InteractionRecord, ProgressRecord};
use crate::state::{PROJECT_STRUCTURE_KEY, WorkflowState};

/// Output format for a state report.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum ReportFormat {
    #[default]
    Plain,
    Markdown,
}

/// Summary of a persisted workflow state.
#[derive(Debug, Clone)]
pub struct StateReport {
    pub keys: Vec<String>,
    pub complete: bool,
    pub iteration: Option<u64>,
    /// `None` when the state has no project structure to check
    pub structure_violations: Option<Vec<String>>,
    /// Progress updates from a run; empty when reporting a state at rest
    pub progress: Vec<ProgressRecord>,
    pub interactions: Vec<InteractionRecord>,
}

impl StateReport {
    pub fn from_state(state: &WorkflowState) -> Self {
        Self::with_completion_key(state, DEFAULT_COMPLETION_KEY)
    }

    pub fn with_completion_key(state: &WorkflowState, completion_key: &str) -> Self {
        let structure_violations = state
            .contains_key(PROJECT_STRUCTURE_KEY)
            .then(|| project_structure_violations(state));

        Self {
            keys: state.keys().map(String::from).collect(),
            complete: state.get_bool(completion_key).unwrap_or(false),
            iteration: state.get("iteration").and_then(Value::as_u64),
            structure_violations,
            progress: Vec::new(),
            interactions: Vec::new(),
        }
    }

    /// Attach the history a finished run collected.
    pub fn with_history(mut self, progress: Vec<ProgressRecord>, interactions: Vec<InteractionRecord>) -> Self {
        self.progress = progress;
        self.interactions = interactions;
        self
    }

    pub fn render(&self, format: ReportFormat) -> String {
        match format {
            ReportFormat::Plain => self.to_plain(),
            ReportFormat::Markdown => self.to_markdown(),
        }
    }

    fn to_plain(&self) -> String {
        let mut out = String::new();
        out.push_str("Workflow state report\n");
        out.push_str(&format!("Complete: {}\n", if self.complete { "yes" } else { "no" }));
        if let Some(iteration) = self.iteration {
            out.push_str(&format!("Iteration: {}\n", iteration));
        }
        out.push_str(&format!("Keys ({}): {}\n", self.keys.len(), self.keys.join(", ")));

        match &self.structure_violations {
            None => out.push_str("Project structure: not recorded\n"),
            Some(v) if v.is_empty() => out.push_str("Project structure: ok\n"),
            Some(violations) => {
                out.push_str("Project structure:\n");
                for violation in violations {
                    out.push_str(&format!("  - {}\n", violation));
                }
            }
        }

        if !self.progress.is_empty() {
            out.push_str(&format!("Progress updates ({}):\n", self.progress.len()));
            for record in &self.progress {
                out.push_str(&format!(
                    "  #{} {} complete={} keys={}\n",
                    record.iteration, record.timestamp, record.complete, record.keys
                ));
            }
        }
        for record in &self.interactions {
            out.push_str(&format!(
                "Asked: {} -> {}\n",
                record.question,
                if record.approved { "approved" } else { "declined" }
            ));
        }
        out
    }

    fn to_markdown(&self) -> String {
        let mut md = String::new();
        md.push_str("# Workflow State Report\n\n");
        md.push_str(&format!(
            "**Status**: {}\n",
            if self.complete { "Complete" } else { "In progress" }
        ));
        if let Some(iteration) = self.iteration {
            md.push_str(&format!("**Iteration**: {}\n", iteration));
        }
        md.push('\n');

        md.push_str("## State Keys\n\n");
        if self.keys.is_empty() {
            md.push_str("_State is empty._\n");
        }
        for key in &self.keys {
            md.push_str(&format!("- `{}`\n", key));
        }
        md.push('\n');

        md.push_str("## Project Structure\n\n");
        match &self.structure_violations {
            None => md.push_str("_Not recorded._\n"),
            Some(v) if v.is_empty() => md.push_str("All required directories and files are present.\n"),
            Some(violations) => {
                for violation in violations {
                    md.push_str(&format!("- [ ] {}\n", violation));
                }
            }
        }

        if !self.progress.is_empty() {
            md.push_str("\n## Progress History\n\n");
            md.push_str("| Update | Timestamp | Complete | Keys |\n");
            md.push_str("|---|---|---|---|\n");
            for record in &self.progress {
                md.push_str(&format!(
                    "| {} | {} | {} | {} |\n",
                    record.iteration,
                    record.timestamp,
                    if record.complete { "yes" } else { "no" },
                    record.keys
                ));
            }
        }

        if !self.interactions.is_empty() {
            md.push_str("\n## Human Interactions\n\n");
            for record in &self.interactions {
                md.push_str(&format!(
                    "- **{}**: {} ({})\n",
                    if record.approved { "Approved" } else { "Declined" },
                    record.question,
                    record.timestamp
                ));
            }
        }
        md
    }
}
