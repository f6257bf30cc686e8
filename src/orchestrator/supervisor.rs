use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::{debug, instrument};

use crate::agents::{
    Agent, AgentBehavior, AgentRequest, AgentResponse, Message, Role, StepSender,
};
use crate::error::AgentError;
use crate::llm_client::SharedLlmClient;
use crate::tools::SharedTool;

use super::context::RegistryContext;
use super::delegation::DelegationTool;

pub const SUPERVISOR_NAME: &str = "supervisor";

/// Tool-delegation supervisor: every worker is one of its tools, and only
/// each worker's final answer ever reaches its transcript.
pub struct Supervisor {
    agent: Agent,
}

/// Builds a fresh supervisor over the context's cached worker agents.
pub fn create_supervisor(context: &RegistryContext) -> Supervisor {
    let delegations = context
        .agents()
        .iter()
        .map(|agent| DelegationTool::for_worker(agent.clone()))
        .collect();

    Supervisor::new(
        context.llm_client().clone(),
        context.prompts().supervisor_prompt(),
        delegations,
    )
    .with_max_iterations(context.max_iterations())
}

impl Supervisor {
    pub fn new(
        llm_client: SharedLlmClient,
        system_prompt: impl Into<String>,
        delegations: Vec<DelegationTool>,
    ) -> Self {
        let tools = delegations
            .into_iter()
            .map(|tool| Arc::new(tool) as SharedTool)
            .collect();

        Self {
            agent: Agent::new(SUPERVISOR_NAME, llm_client, system_prompt, tools),
        }
    }

    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.agent = self.agent.with_max_iterations(max_iterations);
        self
    }

    #[instrument(skip_all, fields(mode = "tool_delegation", messages = request.messages.len()))]
    async fn dispatch(
        &self,
        request: AgentRequest,
        sink: Option<&StepSender>,
    ) -> Result<AgentResponse, AgentError> {
        let start = request.messages.len();
        let messages = self.agent.run(request.messages, sink).await?;
        let metadata = Self::build_metadata(&messages[start..]);
        debug!(%metadata, "Supervisor finished");
        Ok(AgentResponse::with_metadata(messages, metadata))
    }

    fn build_metadata(produced: &[Message]) -> Value {
        let delegations: Vec<Value> = produced
            .iter()
            .filter(|message| message.role == Role::Assistant)
            .flat_map(|message| message.tool_calls.iter())
            .map(|call| {
                json!({
                    "call_id": call.id,
                    "tool": call.name,
                    "request": call.arguments.get("request").cloned().unwrap_or(Value::Null),
                })
            })
            .collect();

        json!({
            "router": {
                "mode": "tool_delegation",
                "delegations": delegations,
            }
        })
    }
}

#[async_trait]
impl AgentBehavior for Supervisor {
    async fn handle(&self, request: AgentRequest) -> Result<AgentResponse, AgentError> {
        self.dispatch(request, None).await
    }

    /// Streams supervisor steps only; worker runs stay private.
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
    use serde_json::json;

    use super::*;
    use crate::agents::ToolCall;
    use crate::testing::{FailingTool, ScriptedLlmClient, StaticTool};
    use crate::tools::ToolCatalog;

    const SUPERVISOR_KEY: &str = "RIA, a supervisor";
    const JIRA_KEY: &str = "You are the atlassian agent";
    const OPS_KEY: &str = "You are the devops agent";

    fn context(model: &ScriptedLlmClient, jira_tool: SharedTool) -> RegistryContext {
        RegistryContext::builder(Arc::new(model.clone()))
            .with_tools(
                ToolCatalog::new()
                    .with_group("mcp_devops_tools", vec![StaticTool::shared("read_logs", "ok")])
                    .with_group("mcp_atlassian_tools", vec![jira_tool]),
            )
            .build()
            .expect("wiring")
    }

    fn ticket_script(model: ScriptedLlmClient) -> ScriptedLlmClient {
        model
            .script(
                SUPERVISOR_KEY,
                vec![
                    Message::assistant("").with_tool_calls(vec![ToolCall::new(
                        "sup-1",
                        "atlassian_subagent",
                        json!({ "request": "Get the details of jira id EHRM-3552" }),
                    )]),
                    Message::assistant("EHRM-3552 is a P2 login bug assigned to Dana."),
                ],
            )
            .script(
                JIRA_KEY,
                vec![
                    Message::assistant("").with_tool_calls(vec![ToolCall::new(
                        "w-1",
                        "get_issue",
                        json!({ "key": "EHRM-3552" }),
                    )]),
                    Message::assistant("EHRM-3552: P2, login bug, assignee Dana"),
                ],
            )
    }

    #[tokio::test]
    async fn routes_ticket_request_to_atlassian_worker() {
        let model = ticket_script(ScriptedLlmClient::new());
        let issue = StaticTool::new("get_issue", r#"{"key":"EHRM-3552","priority":"P2"}"#);
        let context = context(&model, Arc::new(issue.clone()));
        let supervisor = create_supervisor(&context);

        let response = supervisor
            .handle(AgentRequest::new("Get details of ticket EHRM-3552"))
            .await
            .expect("answer");

        assert_eq!(response.output(), "EHRM-3552 is a P2 login bug assigned to Dana.");
        let offered: Vec<String> = model.calls()[0].2.iter().map(|spec| spec.name.clone()).collect();
        assert_eq!(offered, vec!["devops_subagent", "atlassian_subagent"]);
        assert_eq!(issue.received(), vec![json!({ "key": "EHRM-3552" })]);

        let worker_calls = model.calls_for(JIRA_KEY);
        assert_eq!(worker_calls[0].len(), 2);
        assert_eq!(worker_calls[0][1].content, "Get the details of jira id EHRM-3552");
        assert!(model.calls_for(OPS_KEY).is_empty());

        let metadata = response.metadata.expect("metadata");
        assert_eq!(metadata["router"]["delegations"][0]["tool"], "atlassian_subagent");
    }

    #[tokio::test]
    async fn supervisor_only_sees_final_worker_answers() {
        let model = ticket_script(ScriptedLlmClient::new());
        let context = context(&model, StaticTool::shared("get_issue", "{}"));
        let supervisor = create_supervisor(&context);

        supervisor
            .handle(AgentRequest::new("Get details of ticket EHRM-3552"))
            .await
            .expect("answer");

        let supervisor_inputs = model.calls_for(SUPERVISOR_KEY);
        let last = supervisor_inputs.last().expect("two supervisor turns");
        assert!(last.iter().all(|m| m.name.as_deref() != Some("atlassian_agent")));
        assert!(last
            .iter()
            .flat_map(|m| m.tool_calls.iter())
            .all(|call| call.name != "get_issue"));
        let tool_result = last
            .iter()
            .find(|m| m.role == Role::Tool)
            .expect("delegation result");
        assert_eq!(tool_result.tool_call_id.as_deref(), Some("sup-1"));
        assert_eq!(tool_result.content, "EHRM-3552: P2, login bug, assignee Dana");
    }

    #[tokio::test]
    async fn failed_delegation_degrades_instead_of_crashing() {
        let model = ScriptedLlmClient::new()
            .script(
                SUPERVISOR_KEY,
                vec![
                    Message::assistant("").with_tool_calls(vec![ToolCall::new(
                        "sup-1",
                        "atlassian_subagent",
                        json!({ "request": "EHRM-3552" }),
                    )]),
                    Message::assistant("Jira is unreachable right now."),
                ],
            )
            .script(
                JIRA_KEY,
                vec![Message::assistant("")
                    .with_tool_calls(vec![ToolCall::new("w-1", "get_issue", json!({}))])],
            );
        let context = context(&model, Arc::new(FailingTool::new("get_issue")));

        let response = create_supervisor(&context)
            .handle(AgentRequest::new("EHRM-3552?"))
            .await
            .expect("supervisor survives");

        let error_text = response
            .messages
            .iter()
            .find(|m| m.role == Role::Tool)
            .map(|m| m.content.clone())
            .expect("tool result");
        assert!(error_text.starts_with("Error: worker `atlassian` failed"));
        assert!(error_text.contains("connection refused"));
        assert_eq!(response.output(), "Jira is unreachable right now.");
    }

    #[tokio::test]
    async fn stream_reports_supervisor_steps_only() {
        let model = ticket_script(ScriptedLlmClient::new());
        let context = context(&model, StaticTool::shared("get_issue", "{}"));
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();

        create_supervisor(&context)
            .stream(AgentRequest::new("Get details of ticket EHRM-3552"), &tx)
            .await
            .expect("answer");
        drop(tx);

        let mut agents = Vec::new();
        while let Some(update) = rx.recv().await {
            agents.push(update.agent);
        }
        assert_eq!(agents.len(), 3);
        assert!(agents.iter().all(|agent| agent == SUPERVISOR_NAME));
    }
}
