use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, instrument};

use crate::error::{AgentError, ConfigurationError};
use crate::llm_client::SharedLlmClient;
use crate::registry::{PromptBundle, WorkerId};
use crate::tools::SharedTool;

use super::agent::Agent;
use super::traits::{AgentBehavior, AgentRequest, AgentResponse, Message, StepSender};

/// Specialist bound to one worker's prompt and tool group.
///
/// Holds configuration only; every invocation starts its own conversation.
pub struct WorkerAgent {
    worker: WorkerId,
    prompts: Arc<PromptBundle>,
    agent: Agent,
}

impl WorkerAgent {
    pub fn worker(&self) -> &WorkerId {
        &self.worker
    }

    /// `<worker>_agent`, also the name stamped on its messages.
    pub fn name(&self) -> &str {
        self.agent.name()
    }

    pub fn description(&self) -> &str {
        &self.prompts.subagent_description
    }

    pub fn tool_count(&self) -> usize {
        self.agent.tools().len()
    }

    /// Runs a fresh execution over `history` and returns the full transcript.
    #[instrument(skip_all, fields(worker = %self.worker))]
    pub async fn invoke(
        &self,
        history: Vec<Message>,
        sink: Option<&StepSender>,
    ) -> Result<Vec<Message>, AgentError> {
        self.agent.run(history, sink).await
    }
}

#[async_trait]
impl AgentBehavior for WorkerAgent {
    async fn handle(&self, request: AgentRequest) -> Result<AgentResponse, AgentError> {
        let messages = self.invoke(request.messages, None).await?;
        Ok(AgentResponse::new(messages))
    }
}

pub type SharedWorkerAgent = Arc<WorkerAgent>;

/// Binds worker configuration into runnable agents. Performs no I/O.
#[derive(Debug, Clone)]
pub struct AgentFactory {
    require_tools: bool,
    max_iterations: usize,
}

impl Default for AgentFactory {
    fn default() -> Self {
        Self {
            require_tools: false,
            max_iterations: Agent::DEFAULT_MAX_ITERATIONS,
        }
    }
}

impl AgentFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject workers whose tool group is empty.
    pub fn require_tools(mut self, require: bool) -> Self {
        self.require_tools = require;
        self
    }

    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    pub fn build(
        &self,
        worker: &WorkerId,
        llm_client: Option<SharedLlmClient>,
        prompts: Arc<PromptBundle>,
        tools: Vec<SharedTool>,
    ) -> Result<WorkerAgent, ConfigurationError> {
        let llm_client = llm_client.ok_or_else(|| ConfigurationError::AgentConstruction {
            worker: worker.clone(),
            reason: "no model handle".to_string(),
        })?;

        if tools.is_empty() && self.require_tools {
            return Err(ConfigurationError::AgentConstruction {
                worker: worker.clone(),
                reason: format!("tool group {} is empty", worker.tool_group_key()),
            });
        }

        debug!(worker = %worker, tools = tools.len(), "Building worker agent");
        let agent = Agent::new(
            worker.agent_name(),
            llm_client,
            prompts.system_prompt.as_str(),
            tools,
        )
        .with_max_iterations(self.max_iterations);

        Ok(WorkerAgent {
            worker: worker.clone(),
            prompts,
            agent,
        })
    }
}
