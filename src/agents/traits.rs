use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;

use crate::error::AgentError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// A tool invocation requested by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: Value,
}

impl ToolCall {
    pub fn new(id: impl Into<String>, name: impl Into<String>, arguments: Value) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments,
        }
    }
}

/// One entry of a conversation transcript.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    /// Agent that produced an assistant message.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl Message {
    fn with_role(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            name: None,
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::with_role(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::with_role(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::with_role(Role::Assistant, content)
    }

    pub fn tool(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            tool_call_id: Some(tool_call_id.into()),
            ..Self::with_role(Role::Tool, content)
        }
    }

    pub fn with_tool_calls(mut self, tool_calls: Vec<ToolCall>) -> Self {
        self.tool_calls = tool_calls;
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }
}

/// Structured payload for messages entering the agent network.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentRequest {
    pub messages: Vec<Message>,
}

impl AgentRequest {
    /// A fresh conversation holding a single user message.
    pub fn new(input: impl Into<String>) -> Self {
        Self {
            messages: vec![Message::user(input)],
        }
    }
}

/// Full transcript of a run plus optional metadata for downstream tools.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentResponse {
    pub messages: Vec<Message>,
    pub metadata: Option<Value>,
}

impl AgentResponse {
    pub fn new(messages: Vec<Message>) -> Self {
        Self {
            messages,
            metadata: None,
        }
    }

    pub fn with_metadata(messages: Vec<Message>, metadata: Value) -> Self {
        Self {
            messages,
            metadata: Some(metadata),
        }
    }

    /// Content of the last message, which is the final answer of a run.
    pub fn output(&self) -> &str {
        last_text(&self.messages).unwrap_or_default()
    }
}

pub fn last_text(messages: &[Message]) -> Option<&str> {
    messages.last().map(|message| message.content.as_str())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepKind {
    Model,
    Tools,
}

/// Incremental output of one step, keyed by the agent that produced it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepUpdate {
    pub agent: String,
    pub kind: StepKind,
    pub messages: Vec<Message>,
    pub at: DateTime<Utc>,
}

impl StepUpdate {
    pub fn new(agent: impl Into<String>, kind: StepKind, messages: Vec<Message>) -> Self {
        Self {
            agent: agent.into(),
            kind,
            messages,
            at: Utc::now(),
        }
    }
}

pub type StepSender = mpsc::UnboundedSender<StepUpdate>;

pub(crate) fn emit(sink: Option<&StepSender>, update: impl FnOnce() -> StepUpdate) {
    if let Some(sender) = sink {
        // A dropped receiver only means nobody is watching.
        let _ = sender.send(update());
    }
}

#[async_trait]
pub trait AgentBehavior: Send + Sync {
    async fn handle(&self, request: AgentRequest) -> Result<AgentResponse, AgentError>;

    /// Like `handle`, also sending step updates to `sink`. Agents without
    /// intermediate steps just answer.
    async fn stream(
        &self,
        request: AgentRequest,
        _sink: &StepSender,
    ) -> Result<AgentResponse, AgentError> {
        self.handle(request).await
    }
}
