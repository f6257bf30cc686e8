use thiserror::Error;

use crate::registry::WorkerId;

/// Wiring problems found while building the registry context. Fatal at startup.
#[derive(Debug, Error)]
pub enum ConfigurationError {
    #[error("worker registry is empty")]
    EmptyRegistry,

    #[error("worker `{0}` is listed more than once")]
    DuplicateWorker(WorkerId),

    #[error("no prompt entry for worker `{0}`")]
    MissingPrompt(WorkerId),

    #[error("no tool group `{key}` for worker `{worker}`")]
    MissingToolSet { worker: WorkerId, key: String },

    #[error("worker `{worker}` is declared tool-free but tool group `{key}` exists")]
    ToolSetConflict { worker: WorkerId, key: String },

    #[error("cannot build agent for worker `{worker}`: {reason}")]
    AgentConstruction { worker: WorkerId, reason: String },

    #[error("failed to load {what}")]
    Load {
        what: String,
        #[source]
        source: anyhow::Error,
    },
}

/// Failures raised while an agent runs its model/tool loop.
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("model call failed for agent `{agent}`")]
    UpstreamModel {
        agent: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("tool `{tool}` failed for agent `{agent}`")]
    UpstreamTool {
        agent: String,
        tool: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("agent `{agent}` did not finish within {limit} iterations")]
    IterationLimit { agent: String, limit: usize },

    #[error("handoff limit of {limit} reached")]
    HandoffLimit { limit: usize },
}

/// Failure of a single delegation to a worker. Recoverable by the supervisor.
#[derive(Debug, Error)]
pub enum DelegationError {
    #[error("worker `{worker}` failed")]
    Invocation {
        worker: WorkerId,
        #[source]
        source: AgentError,
    },

    #[error("worker `{worker}` produced no answer")]
    EmptyResult { worker: WorkerId },
}

impl DelegationError {
    /// Text handed back to the supervisor in place of the worker's answer.
    pub fn to_tool_output(&self) -> String {
        let mut text = format!("Error: {self}");
        let mut source = std::error::Error::source(self);
        while let Some(cause) = source {
            text.push_str(": ");
            text.push_str(&cause.to_string());
            source = cause.source();
        }
        text
    }
}
