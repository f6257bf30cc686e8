//! Tool-using agent loop.
//!
//! 1. The model receives the system prompt, the conversation and the tool specs.
//! 2. If it answers without tool calls, the run is over.
//! 3. Otherwise each requested tool runs in order and its result is fed back.
use std::collections::HashMap;

use async_trait::async_trait;
use tracing::{debug, info, instrument, warn};

use crate::error::AgentError;
use crate::llm_client::SharedLlmClient;
use crate::tools::{SharedTool, ToolSpec};

use super::traits::{
    emit, AgentBehavior, AgentRequest, AgentResponse, Message, Role, StepKind, StepSender,
    StepUpdate, ToolCall,
};

/// A named agent: one model, one system prompt, one tool set.
#[derive(Clone)]
pub struct Agent {
    name: String,
    llm_client: SharedLlmClient,
    system_prompt: String,
    tools: Vec<SharedTool>,
    max_iterations: usize,
}

impl Agent {
    pub const DEFAULT_MAX_ITERATIONS: usize = 25;

    pub fn new(
        name: impl Into<String>,
        llm_client: SharedLlmClient,
        system_prompt: impl Into<String>,
        tools: Vec<SharedTool>,
    ) -> Self {
        Self {
            name: name.into(),
            llm_client,
            system_prompt: system_prompt.into(),
            tools,
            max_iterations: Self::DEFAULT_MAX_ITERATIONS,
        }
    }

    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations.max(1);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn tools(&self) -> &[SharedTool] {
        &self.tools
    }

    pub fn tool_specs(&self) -> Vec<ToolSpec> {
        self.tools
            .iter()
            .map(|tool| ToolSpec::of(tool.as_ref()))
            .collect()
    }

    /// One model consultation with an explicit tool list. Used by coordinators
    /// that offer tools this agent does not execute itself.
    pub(crate) async fn consult(
        &self,
        history: &[Message],
        specs: &[ToolSpec],
    ) -> Result<Message, AgentError> {
        let mut prompt = Vec::with_capacity(history.len() + 1);
        if !self.system_prompt.trim().is_empty() {
            prompt.push(Message::system(self.system_prompt.as_str()));
        }
        prompt.extend(history.iter().cloned());

        let reply = self
            .llm_client
            .chat(&prompt, specs)
            .await
            .map_err(|source| AgentError::UpstreamModel {
                agent: self.name.clone(),
                source,
            })?;

        Ok(Message {
            role: Role::Assistant,
            name: Some(self.name.clone()),
            ..reply
        })
    }

    /// Runs the loop to completion. Returns `history` followed by every message
    /// produced during the run; the system prompt is not included.
    #[instrument(skip_all, fields(agent = %self.name, history = history.len()))]
    pub async fn run(
        &self,
        history: Vec<Message>,
        sink: Option<&StepSender>,
    ) -> Result<Vec<Message>, AgentError> {
        let specs = self.tool_specs();
        let by_name: HashMap<&str, &SharedTool> =
            self.tools.iter().map(|tool| (tool.name(), tool)).collect();
        let mut transcript = history;

        for iteration in 1..=self.max_iterations {
            debug!(iteration, "Agent iteration");

            let reply = self.consult(&transcript, &specs).await?;
            emit(sink, || {
                StepUpdate::new(&self.name, StepKind::Model, vec![reply.clone()])
            });

            if !reply.has_tool_calls() {
                info!(iteration, "Agent responding without tool calls");
                transcript.push(reply);
                return Ok(transcript);
            }

            info!(count = reply.tool_calls.len(), "Agent making tool call(s)");
            let calls = reply.tool_calls.clone();
            transcript.push(reply);

            let mut results = Vec::with_capacity(calls.len());
            for call in &calls {
                let output = self.execute(&by_name, call).await?;
                results.push(Message::tool(call.id.as_str(), output));
            }

            emit(sink, || {
                StepUpdate::new(&self.name, StepKind::Tools, results.clone())
            });
            transcript.extend(results);
        }

        warn!(limit = self.max_iterations, "Agent reached max iterations");
        Err(AgentError::IterationLimit {
            agent: self.name.clone(),
            limit: self.max_iterations,
        })
    }

    async fn execute(
        &self,
        by_name: &HashMap<&str, &SharedTool>,
        call: &ToolCall,
    ) -> Result<String, AgentError> {
        let Some(tool) = by_name.get(call.name.as_str()) else {
            warn!(tool = %call.name, "Model requested an unknown tool");
            return Ok(format!(
                "Error: {} is not a valid tool, try one of [{}].",
                call.name,
                self.tools
                    .iter()
                    .map(|tool| tool.name())
                    .collect::<Vec<_>>()
                    .join(", ")
            ));
        };

        debug!(tool = %call.name, args = %call.arguments, "Executing tool");
        tool.call(call.arguments.clone())
            .await
            .map_err(|source| AgentError::UpstreamTool {
                agent: self.name.clone(),
                tool: call.name.clone(),
                source,
            })
    }
}

#[async_trait]
impl AgentBehavior for Agent {
    async fn handle(&self, request: AgentRequest) -> Result<AgentResponse, AgentError> {
        let messages = self.run(request.messages, None).await?;
        Ok(AgentResponse::new(messages))
    }
}
