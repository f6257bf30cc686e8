//! Handoff-coordinated supervisor.
//!
//! The supervisor model gets one `transfer_to_<agent>` tool per worker. Taking
//! one hands the whole conversation to that worker, which answers in the shared
//! transcript and then hands control back.
use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{info, instrument, warn};

use crate::agents::traits::emit;
use crate::agents::{
    Agent, AgentBehavior, AgentRequest, AgentResponse, Message, SharedWorkerAgent, StepKind,
    StepSender, StepUpdate, ToolCall,
};
use crate::config::AppConfig;
use crate::error::AgentError;
use crate::llm_client::SharedLlmClient;
use crate::tools::ToolSpec;

use super::context::RegistryContext;
use super::supervisor::SUPERVISOR_NAME;

const HANDOFF_PREFIX: &str = "transfer_to_";
const HANDOFF_BACK_TOOL: &str = "transfer_back_to_supervisor";

/// Which worker messages are kept in the shared transcript.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum OutputMode {
    /// Every message each worker produced, tool traffic included.
    #[default]
    FullHistory,
    /// Only each worker's final message.
    LastMessage,
}

impl fmt::Display for OutputMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            OutputMode::FullHistory => "full_history",
            OutputMode::LastMessage => "last_message",
        };
        write!(f, "{}", label)
    }
}

#[derive(Debug, Clone)]
pub struct HandoffOptions {
    /// Record each return of control with an explicit transfer-back exchange.
    pub add_handoff_back_messages: bool,
    pub output_mode: OutputMode,
    pub max_handoffs: usize,
}

impl Default for HandoffOptions {
    fn default() -> Self {
        Self {
            add_handoff_back_messages: true,
            output_mode: OutputMode::FullHistory,
            max_handoffs: AppConfig::DEFAULT_MAX_HANDOFFS,
        }
    }
}

impl HandoffOptions {
    /// Defaults, with the handoff bound taken from the context.
    pub fn for_context(context: &RegistryContext) -> Self {
        Self {
            max_handoffs: context.max_handoffs(),
            ..Self::default()
        }
    }

    pub fn with_output_mode(mut self, output_mode: OutputMode) -> Self {
        self.output_mode = output_mode;
        self
    }
}

pub struct HandoffSupervisor {
    supervisor: Agent,
    agents: Vec<SharedWorkerAgent>,
    options: HandoffOptions,
    max_turns: usize,
}

/// Builds a fresh handoff supervisor over the context's cached worker agents.
pub fn create_react_supervisor(
    context: &RegistryContext,
    options: HandoffOptions,
) -> HandoffSupervisor {
    HandoffSupervisor::new(
        context.llm_client().clone(),
        context.prompts().react_supervisor_prompt(),
        context.agents().to_vec(),
        options,
    )
    .with_max_turns(context.max_iterations())
}

impl HandoffSupervisor {
    pub fn new(
        llm_client: SharedLlmClient,
        system_prompt: impl Into<String>,
        agents: Vec<SharedWorkerAgent>,
        options: HandoffOptions,
    ) -> Self {
        Self {
            supervisor: Agent::new(SUPERVISOR_NAME, llm_client, system_prompt, Vec::new()),
            agents,
            options,
            max_turns: Agent::DEFAULT_MAX_ITERATIONS,
        }
    }

    pub fn with_max_turns(mut self, max_turns: usize) -> Self {
        self.max_turns = max_turns.max(1);
        self
    }

    fn handoff_specs(&self) -> Vec<ToolSpec> {
        self.agents
            .iter()
            .map(|agent| ToolSpec {
                name: format!("{HANDOFF_PREFIX}{}", agent.name()),
                description: format!(
                    "Ask agent '{}' for help. It can: {}",
                    agent.name(),
                    agent.description()
                ),
                parameters: json!({ "type": "object", "properties": {} }),
            })
            .collect()
    }

    fn agent_for_tool(&self, tool: &str) -> Option<&SharedWorkerAgent> {
        let target = tool.strip_prefix(HANDOFF_PREFIX)?;
        self.agents.iter().find(|agent| agent.name() == target)
    }

    #[instrument(skip_all, fields(mode = "handoff", output_mode = %self.options.output_mode))]
    async fn dispatch(
        &self,
        request: AgentRequest,
        sink: Option<&StepSender>,
    ) -> Result<AgentResponse, AgentError> {
        let specs = self.handoff_specs();
        let mut messages = request.messages;
        let mut handoffs: Vec<String> = Vec::new();

        for _ in 0..self.max_turns {
            let reply = self.supervisor.consult(&messages, &specs).await?;
            emit(sink, || {
                StepUpdate::new(SUPERVISOR_NAME, StepKind::Model, vec![reply.clone()])
            });

            if !reply.has_tool_calls() {
                messages.push(reply);
                let metadata = json!({
                    "router": {
                        "mode": "handoff",
                        "output_mode": self.options.output_mode.to_string(),
                        "handoffs": handoffs,
                    }
                });
                return Ok(AgentResponse::with_metadata(messages, metadata));
            }

            let calls = reply.tool_calls.clone();
            messages.push(reply);
            let (target, results) = self.answer_handoff_calls(&calls);
            emit(sink, || {
                StepUpdate::new(SUPERVISOR_NAME, StepKind::Tools, results.clone())
            });
            messages.extend(results);

            let Some(agent) = target else {
                continue;
            };

            if handoffs.len() >= self.options.max_handoffs {
                warn!(limit = self.options.max_handoffs, "Handoff limit reached");
                return Err(AgentError::HandoffLimit {
                    limit: self.options.max_handoffs,
                });
            }
            info!(agent = agent.name(), "Handing off");
            handoffs.push(agent.name().to_string());

            let produced = self.run_worker(&agent, &messages, sink).await;
            match self.options.output_mode {
                OutputMode::FullHistory => messages.extend(produced),
                OutputMode::LastMessage => messages.extend(produced.into_iter().last()),
            }

            if self.options.add_handoff_back_messages {
                let back = handoff_back_messages(agent.name(), handoffs.len());
                emit(sink, || {
                    StepUpdate::new(agent.name(), StepKind::Tools, back.clone())
                });
                messages.extend(back);
            }
        }

        Err(AgentError::IterationLimit {
            agent: SUPERVISOR_NAME.to_string(),
            limit: self.max_turns,
        })
    }

    /// Picks the first valid handoff of the turn; every call gets a tool result.
    fn answer_handoff_calls(
        &self,
        calls: &[ToolCall],
    ) -> (Option<SharedWorkerAgent>, Vec<Message>) {
        let mut target: Option<SharedWorkerAgent> = None;
        let mut results = Vec::with_capacity(calls.len());

        for call in calls {
            let content = match (self.agent_for_tool(&call.name), &target) {
                (Some(agent), None) => {
                    target = Some(agent.clone());
                    format!("Successfully transferred to {}", agent.name())
                }
                (Some(_), Some(chosen)) => format!(
                    "Error: control already transferred to {}; hand off to one agent at a time.",
                    chosen.name()
                ),
                (None, _) => format!(
                    "Error: {} is not a valid tool, try one of [{}].",
                    call.name,
                    self.agents
                        .iter()
                        .map(|agent| format!("{HANDOFF_PREFIX}{}", agent.name()))
                        .collect::<Vec<_>>()
                        .join(", ")
                ),
            };
            results.push(Message::tool(call.id.as_str(), content));
        }

        (target, results)
    }

    /// Runs the worker on the whole shared history and returns only what it
    /// added. A failed worker contributes an error message instead.
    async fn run_worker(
        &self,
        agent: &SharedWorkerAgent,
        history: &[Message],
        sink: Option<&StepSender>,
    ) -> Vec<Message> {
        let start = history.len();
        match agent.invoke(history.to_vec(), sink).await {
            Ok(transcript) => transcript.into_iter().skip(start).collect(),
            Err(err) => {
                warn!(agent = agent.name(), error = %err, "Worker failed during handoff");
                let err = anyhow::Error::from(err);
                vec![Message::assistant(format!("Error: {err:#}")).with_name(agent.name())]
            }
        }
    }
}

fn handoff_back_messages(agent_name: &str, handoff: usize) -> Vec<Message> {
    let call_id = format!("{HANDOFF_BACK_TOOL}_{handoff}");
    vec![
        Message::assistant("Transferring back to supervisor")
            .with_name(agent_name)
            .with_tool_calls(vec![ToolCall::new(
                call_id.as_str(),
                HANDOFF_BACK_TOOL,
                json!({}),
            )]),
        Message::tool(call_id, "Successfully transferred back to supervisor"),
    ]
}

#[async_trait]
impl AgentBehavior for HandoffSupervisor {
    async fn handle(&self, request: AgentRequest) -> Result<AgentResponse, AgentError> {
        self.dispatch(request, None).await
    }

    /// Streams supervisor and worker steps, keyed by agent name.
    async fn stream(
        &self,
        request: AgentRequest,
        sink: &StepSender,
    ) -> Result<AgentResponse, AgentError> {
        self.dispatch(request, Some(sink)).await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::agents::Role;
    use crate::testing::{FailingTool, ScriptedLlmClient, StaticTool};
    use crate::tools::ToolCatalog;

    const SUPERVISOR_KEY: &str = "RIA, a supervisor managing";
    const OPS_KEY: &str = "You are the devops agent";

    fn context(model: &ScriptedLlmClient) -> RegistryContext {
        RegistryContext::builder(Arc::new(model.clone()))
            .with_tools(
                ToolCatalog::new()
                    .with_group(
                        "mcp_devops_tools",
                        vec![StaticTool::shared("read_canaries", "2 failures in us-phoenix-1")],
                    )
                    .with_group("mcp_atlassian_tools", vec![]),
            )
            .build()
            .expect("wiring")
    }

    fn canary_script() -> ScriptedLlmClient {
        ScriptedLlmClient::new()
            .script(
                SUPERVISOR_KEY,
                vec![
                    Message::assistant("").with_tool_calls(vec![ToolCall::new(
                        "h-1",
                        "transfer_to_devops_agent",
                        json!({}),
                    )]),
                    Message::assistant("There are 2 canary failures in us-phoenix-1."),
                ],
            )
            .script(
                OPS_KEY,
                vec![
                    Message::assistant("").with_tool_calls(vec![ToolCall::new(
                        "w-1",
                        "read_canaries",
                        json!({ "region": "us-phoenix-1" }),
                    )]),
                    Message::assistant("Found 2 canary failures."),
                ],
            )
    }

    #[tokio::test]
    async fn full_history_keeps_every_participant_message() {
        let model = canary_script();
        let context = context(&model);
        let supervisor = create_react_supervisor(&context, HandoffOptions::default());

        let response = supervisor
            .handle(AgentRequest::new("Any canary failures in us-phoenix-1?"))
            .await
            .expect("answer");

        let turns = model.calls().len();
        assert_eq!(turns, 4);
        let offered = &model.calls()[0].2;
        assert_eq!(offered[0].name, "transfer_to_devops_agent");
        assert!(offered[1].description.contains("jira"));
        assert!(response.messages.len() >= turns);
        assert_eq!(response.messages.len(), 9);
        assert_eq!(response.output(), "There are 2 canary failures in us-phoenix-1.");

        let worker_messages: Vec<_> = response
            .messages
            .iter()
            .filter(|m| m.name.as_deref() == Some("devops_agent"))
            .collect();
        assert_eq!(worker_messages.len(), 3);
        assert_eq!(response.messages[2].content, "Successfully transferred to devops_agent");
        assert_eq!(response.messages[7].content, "Successfully transferred back to supervisor");
        assert_eq!(
            response.metadata.expect("metadata")["router"]["handoffs"][0],
            "devops_agent"
        );
    }

    #[tokio::test]
    async fn worker_receives_entire_conversation() {
        let model = canary_script();
        let context = context(&model);
        let request = AgentRequest {
            messages: vec![
                Message::user("I am on call for phonebook"),
                Message::assistant("Noted.").with_name(SUPERVISOR_NAME),
                Message::user("Any canary failures in us-phoenix-1?"),
            ],
        };

        create_react_supervisor(&context, HandoffOptions::default())
            .handle(request)
            .await
            .expect("answer");

        let worker_first_turn = &model.calls_for(OPS_KEY)[0];
        assert_eq!(worker_first_turn[0].role, Role::System);
        assert_eq!(worker_first_turn[1].content, "I am on call for phonebook");
        assert_eq!(
            worker_first_turn.last().map(|m| m.role),
            Some(Role::Tool)
        );
    }

    #[tokio::test]
    async fn last_message_mode_without_handoff_back() {
        let model = canary_script();
        let context = context(&model);
        let options = HandoffOptions {
            add_handoff_back_messages: false,
            output_mode: OutputMode::LastMessage,
            ..HandoffOptions::default()
        };

        let response = create_react_supervisor(&context, options)
            .handle(AgentRequest::new("Any canary failures?"))
            .await
            .expect("answer");

        // user, handoff call, handoff result, worker answer, final answer
        assert_eq!(response.messages.len(), 5);
        assert_eq!(response.messages[3].content, "Found 2 canary failures.");
        assert!(response
            .messages
            .iter()
            .all(|m| m.tool_calls.iter().all(|c| c.name != "read_canaries")));
    }

    #[tokio::test]
    async fn only_one_handoff_per_turn() {
        let model = ScriptedLlmClient::new()
            .script(
                SUPERVISOR_KEY,
                vec![
                    Message::assistant("").with_tool_calls(vec![
                        ToolCall::new("h-1", "transfer_to_devops_agent", json!({})),
                        ToolCall::new("h-2", "transfer_to_atlassian_agent", json!({})),
                        ToolCall::new("h-3", "transfer_to_nobody", json!({})),
                    ]),
                    Message::assistant("done"),
                ],
            )
            .script(OPS_KEY, vec![Message::assistant("ops answer")]);
        let context = context(&model);

        let response = create_react_supervisor(&context, HandoffOptions::default())
            .handle(AgentRequest::new("do both"))
            .await
            .expect("answer");

        let tool_results: Vec<_> = response
            .messages
            .iter()
            .filter(|m| m.role == Role::Tool)
            .map(|m| (m.tool_call_id.clone().unwrap_or_default(), m.content.clone()))
            .collect();
        assert!(tool_results[0].1.starts_with("Successfully transferred to devops_agent"));
        assert!(tool_results[1].1.starts_with("Error: control already transferred"));
        assert!(tool_results[2].1.starts_with("Error: transfer_to_nobody is not a valid tool"));
        assert!(model.calls_for("You are the atlassian agent").is_empty());
    }

    #[tokio::test]
    async fn failed_worker_hands_back_an_error() {
        let model = ScriptedLlmClient::new()
            .script(
                SUPERVISOR_KEY,
                vec![
                    Message::assistant("").with_tool_calls(vec![ToolCall::new(
                        "h-1",
                        "transfer_to_devops_agent",
                        json!({}),
                    )]),
                    Message::assistant("The devops servers are unreachable."),
                ],
            )
            .script(
                OPS_KEY,
                vec![Message::assistant("")
                    .with_tool_calls(vec![ToolCall::new("w-1", "read_logs", json!({}))])],
            );
        let context = RegistryContext::builder(Arc::new(model.clone()))
            .with_tools(
                ToolCatalog::new()
                    .with_group("mcp_devops_tools", vec![Arc::new(FailingTool::new("read_logs"))])
                    .with_group("mcp_atlassian_tools", vec![]),
            )
            .build()
            .expect("wiring");

        let response = create_react_supervisor(&context, HandoffOptions::default())
            .handle(AgentRequest::new("tail the logs"))
            .await
            .expect("supervisor survives");

        let failure = response
            .messages
            .iter()
            .find(|m| m.content.starts_with("Error: tool `read_logs`"))
            .expect("worker error in transcript");
        assert_eq!(failure.name.as_deref(), Some("devops_agent"));
        assert!(failure.content.contains("connection refused"));
        assert_eq!(response.output(), "The devops servers are unreachable.");
    }

    #[test]
    fn options_follow_configured_handoff_bound() {
        assert_eq!(HandoffOptions::default().max_handoffs, AppConfig::DEFAULT_MAX_HANDOFFS);

        let context = RegistryContext::builder(Arc::new(ScriptedLlmClient::new()))
            .with_tools(
                ToolCatalog::new()
                    .with_group("mcp_devops_tools", vec![])
                    .with_group("mcp_atlassian_tools", vec![]),
            )
            .with_max_handoffs(3)
            .build()
            .expect("wiring");
        assert_eq!(HandoffOptions::for_context(&context).max_handoffs, 3);
    }

    #[tokio::test]
    async fn handoffs_are_bounded() {
        let handoff = |id: &str| {
            Message::assistant("")
                .with_tool_calls(vec![ToolCall::new(id, "transfer_to_devops_agent", json!({}))])
        };
        let model = ScriptedLlmClient::new()
            .script(SUPERVISOR_KEY, vec![handoff("h-1"), handoff("h-2")])
            .script(OPS_KEY, vec![Message::assistant("again")]);
        let context = context(&model);
        let options = HandoffOptions {
            max_handoffs: 1,
            ..HandoffOptions::default()
        };

        let err = create_react_supervisor(&context, options)
            .handle(AgentRequest::new("loop"))
            .await
            .expect_err("limit");
        assert!(matches!(err, AgentError::HandoffLimit { limit: 1 }));
    }

    #[tokio::test]
    async fn stream_keys_steps_by_agent() {
        let model = canary_script();
        let context = context(&model);
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();

        create_react_supervisor(&context, HandoffOptions::default())
            .stream(AgentRequest::new("canaries?"), &tx)
            .await
            .expect("answer");
        drop(tx);

        let mut agents = Vec::new();
        while let Some(update) = rx.recv().await {
            agents.push(update.agent);
        }
        assert_eq!(
            agents,
            vec![
                "supervisor",
                "supervisor",
                "devops_agent",
                "devops_agent",
                "devops_agent",
                "devops_agent",
                "supervisor",
            ]
        );
    }
}
