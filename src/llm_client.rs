use std::sync::Arc;

use anyhow::Context;
use async_openai::types::{
    ChatCompletionMessageToolCall, ChatCompletionRequestAssistantMessageArgs,
    ChatCompletionRequestMessage, ChatCompletionRequestSystemMessageArgs,
    ChatCompletionRequestToolMessageArgs, ChatCompletionRequestUserMessageArgs,
    ChatCompletionTool, ChatCompletionToolArgs, ChatCompletionToolType,
    CreateChatCompletionRequestArgs, FunctionCall, FunctionObjectArgs,
};
use async_openai::{config::OpenAIConfig, Client as AsyncOpenAiClient};
use async_trait::async_trait;
use serde_json::Value;
use tracing::{instrument, warn};

use crate::agents::{Message, Role, ToolCall};
use crate::config::LlmSettings;
use crate::tools::ToolSpec;

pub type SharedLlmClient = Arc<dyn LlmClient>;

/// Chat model shared by every agent. Returns one assistant message, which
/// either answers or asks for tool calls.
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn chat(&self, messages: &[Message], tools: &[ToolSpec]) -> anyhow::Result<Message>;
}

/// Offline stand-in: answers with the last user message and never calls tools.
#[derive(Debug, Default, Clone)]
pub struct EchoLlmClient;

#[async_trait]
impl LlmClient for EchoLlmClient {
    async fn chat(&self, messages: &[Message], _tools: &[ToolSpec]) -> anyhow::Result<Message> {
        let last_user = messages
            .iter()
            .rev()
            .find(|message| message.role == Role::User)
            .map(|message| message.content.as_str())
            .unwrap_or_default();

        Ok(Message::assistant(format!(
            "[offline model]\nI received: {last_user}\nNext step: connect an LLM backend."
        )))
    }
}

impl EchoLlmClient {
    pub fn shared() -> SharedLlmClient {
        Arc::new(Self)
    }
}

/// OpenAI-compatible client that can point at OpenAI, Ollama, vLLM, or any
/// HTTP-compatible backend.
pub struct OpenAiLlmClient {
    client: AsyncOpenAiClient<OpenAIConfig>,
    model: String,
    temperature: f32,
}

impl OpenAiLlmClient {
    pub fn new(settings: &LlmSettings) -> Self {
        let mut config = OpenAIConfig::new()
            .with_api_key(settings.api_key.clone())
            .with_api_base(settings.base_url.clone());
        if let Some(org) = &settings.organization {
            config = config.with_org_id(org.clone());
        }

        Self {
            client: AsyncOpenAiClient::with_config(config),
            model: settings.model.clone(),
            temperature: settings.temperature,
        }
    }

    pub fn shared(settings: &LlmSettings) -> SharedLlmClient {
        Arc::new(Self::new(settings))
    }

    fn to_request_message(message: &Message) -> anyhow::Result<ChatCompletionRequestMessage> {
        let converted = match message.role {
            Role::System => ChatCompletionRequestSystemMessageArgs::default()
                .content(message.content.as_str())
                .build()?
                .into(),
            Role::User => ChatCompletionRequestUserMessageArgs::default()
                .content(message.content.as_str())
                .build()?
                .into(),
            Role::Assistant => {
                let mut builder = ChatCompletionRequestAssistantMessageArgs::default();
                if !message.content.is_empty() {
                    builder.content(message.content.as_str());
                }
                if let Some(name) = &message.name {
                    builder.name(name.as_str());
                }
                if message.has_tool_calls() {
                    builder.tool_calls(
                        message
                            .tool_calls
                            .iter()
                            .map(|call| ChatCompletionMessageToolCall {
                                id: call.id.clone(),
                                r#type: ChatCompletionToolType::Function,
                                function: FunctionCall {
                                    name: call.name.clone(),
                                    arguments: call.arguments.to_string(),
                                },
                            })
                            .collect::<Vec<_>>(),
                    );
                }
                builder.build()?.into()
            }
            Role::Tool => ChatCompletionRequestToolMessageArgs::default()
                .content(message.content.as_str())
                .tool_call_id(message.tool_call_id.clone().unwrap_or_default())
                .build()?
                .into(),
        };

        Ok(converted)
    }

    fn to_tool(spec: &ToolSpec) -> anyhow::Result<ChatCompletionTool> {
        let function = FunctionObjectArgs::default()
            .name(spec.name.as_str())
            .description(spec.description.as_str())
            .parameters(spec.parameters.clone())
            .build()?;

        Ok(ChatCompletionToolArgs::default()
            .r#type(ChatCompletionToolType::Function)
            .function(function)
            .build()?)
    }

    fn parse_arguments(raw: &str) -> Value {
        if raw.trim().is_empty() {
            return Value::Object(Default::default());
        }
        serde_json::from_str(raw).unwrap_or_else(|err| {
            warn!(?err, "Tool call arguments are not valid JSON; passing them through as text");
            Value::String(raw.to_string())
        })
    }
}

#[async_trait]
impl LlmClient for OpenAiLlmClient {
    #[instrument(level = "debug", skip_all, fields(model = %self.model, messages = messages.len(), tools = tools.len()))]
    async fn chat(&self, messages: &[Message], tools: &[ToolSpec]) -> anyhow::Result<Message> {
        let request_messages = messages
            .iter()
            .map(Self::to_request_message)
            .collect::<anyhow::Result<Vec<_>>>()?;

        let mut builder = CreateChatCompletionRequestArgs::default();
        builder
            .model(self.model.as_str())
            .temperature(self.temperature)
            .messages(request_messages);
        if !tools.is_empty() {
            builder.tools(
                tools
                    .iter()
                    .map(Self::to_tool)
                    .collect::<anyhow::Result<Vec<_>>>()?,
            );
        }
        let request = builder.build()?;

        let response = self.client.chat().create(request).await?;
        let choice = response
            .choices
            .into_iter()
            .next()
            .context("LLM response did not contain any choices")?;

        let tool_calls = choice
            .message
            .tool_calls
            .unwrap_or_default()
            .into_iter()
            .map(|call| {
                ToolCall::new(
                    call.id,
                    call.function.name,
                    Self::parse_arguments(&call.function.arguments),
                )
            })
            .collect();

        Ok(Message::assistant(choice.message.content.unwrap_or_default()).with_tool_calls(tool_calls))
    }
}

/// Builds the OpenAI-compatible client, or the offline echo client when asked to.
pub fn build_llm_client(settings: &LlmSettings, offline: bool) -> SharedLlmClient {
    if offline {
        warn!("Using EchoLlmClient; no model backend will be contacted");
        return EchoLlmClient::shared();
    }
    OpenAiLlmClient::shared(settings)
}
