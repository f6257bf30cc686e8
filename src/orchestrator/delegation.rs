use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::{info, instrument, warn};

use crate::agents::{last_text, AgentRequest, SharedWorkerAgent};
use crate::error::DelegationError;
use crate::tools::ToolHandle;

/// Exposes a worker agent to the supervisor as a one-argument tool.
pub struct DelegationTool {
    name: String,
    description: String,
    agent: SharedWorkerAgent,
}

impl DelegationTool {
    pub fn wrap(
        agent: SharedWorkerAgent,
        name: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            agent,
        }
    }

    /// `<worker>_subagent`, described by the worker's subagent description.
    pub fn for_worker(agent: SharedWorkerAgent) -> Self {
        let name = agent.worker().subagent_tool_name();
        let description = agent.description().to_string();
        Self::wrap(agent, name, description)
    }

    /// Runs the worker on a brand new conversation holding only `request`
    /// and returns the text of its last message, which must not be blank.
    #[instrument(skip_all, fields(tool = %self.name))]
    pub async fn invoke(&self, request: &str) -> Result<String, DelegationError> {
        let seed = AgentRequest::new(request);
        let messages = self
            .agent
            .invoke(seed.messages, None)
            .await
            .map_err(|source| DelegationError::Invocation {
                worker: self.agent.worker().clone(),
                source,
            })?;

        let answer = last_text(&messages)
            .filter(|text| !text.trim().is_empty())
            .ok_or_else(|| DelegationError::EmptyResult {
                worker: self.agent.worker().clone(),
            })?;
        info!(answer_len = answer.len(), "Worker answered");
        Ok(answer.to_string())
    }
}

#[async_trait]
impl ToolHandle for DelegationTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "request": {
                    "type": "string",
                    "description": format!("Natural language request for the {} worker", self.agent.worker()),
                }
            },
            "required": ["request"],
        })
    }

    /// Never fails: worker errors become a textual result for the supervisor.
    async fn call(&self, arguments: Value) -> anyhow::Result<String> {
        let request = match &arguments {
            Value::Object(map) => map.get("request").and_then(Value::as_str),
            Value::String(raw) => Some(raw.as_str()),
            _ => None,
        };
        let Some(request) = request else {
            warn!(tool = %self.name, "Delegation called without a request string");
            return Ok(format!(
                "Error: {} expects a JSON object with a string field `request`.",
                self.name
            ));
        };

        Ok(match self.invoke(request).await {
            Ok(answer) => answer,
            Err(err) => {
                warn!(tool = %self.name, error = %err, "Delegation failed");
                err.to_tool_output()
            }
        })
    }
}
