//! Collaboration patterns: named, fixed step lists that workflows execute.

use serde::{Deserialize, Serialize};

/// One step of a collaboration pattern.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowStep {
    /// Registry key of the agent that runs this step.
    pub agent: String,
    /// Task name handed to the agent.
    pub task: String,
    /// Output of an earlier step to merge into this step's context.
    #[serde(default, skip_serializing_if = "Option::is_none", alias = "input")]
    pub input_key: Option<String>,
    /// Key under which this step's result is stored for later steps.
    #[serde(default, skip_serializing_if = "Option::is_none", alias = "output")]
    pub output_key: Option<String>,
}

impl WorkflowStep {
    pub fn new(agent: impl Into<String>, task: impl Into<String>) -> Self {
        Self {
            agent: agent.into(),
            task: task.into(),
            input_key: None,
            output_key: None,
        }
    }

    pub fn with_input(mut self, key: impl Into<String>) -> Self {
        self.input_key = Some(key.into());
        self
    }

    pub fn with_output(mut self, key: impl Into<String>) -> Self {
        self.output_key = Some(key.into());
        self
    }

    /// The `agent:task` key this step's outcome is recorded under.
    pub fn result_key(&self) -> String {
        result_key(&self.agent, &self.task)
    }
}

pub(crate) fn result_key(agent: &str, task: &str) -> String {
    format!("{}:{}", agent, task)
}

/// A named, ordered pipeline of steps.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollaborationPattern {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub steps: Vec<WorkflowStep>,
}

impl CollaborationPattern {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            steps: Vec::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn add_step(mut self, step: WorkflowStep) -> Self {
        self.steps.push(step);
        self
    }

    /// Agent keys referenced by this pattern, in first-use order.
    pub fn agents(&self) -> Vec<&str> {
        let mut keys: Vec<&str> = Vec::new();
        for step in &self.steps {
            if !keys.contains(&step.agent.as_str()) {
                keys.push(&step.agent);
            }
        }
        keys
    }
}
