//! Deterministic collaborators for unit tests.
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use anyhow::anyhow;
use async_trait::async_trait;
use serde_json::Value;

use crate::agents::{Message, Role};
use crate::llm_client::LlmClient;
use crate::tools::{SharedTool, ToolHandle, ToolSpec};

type Call = (String, Vec<Message>, Vec<ToolSpec>);

struct Script {
    key: String,
    replies: VecDeque<Message>,
}

/// Model that replays canned replies. The script is picked by a key that must
/// appear in the system prompt, so one handle can drive several agents.
#[derive(Clone, Default)]
pub struct ScriptedLlmClient {
    scripts: Arc<Mutex<Vec<Script>>>,
    calls: Arc<Mutex<Vec<Call>>>,
}

impl ScriptedLlmClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script(self, key: impl Into<String>, replies: Vec<Message>) -> Self {
        self.scripts.lock().expect("lock poisoned").push(Script {
            key: key.into(),
            replies: replies.into(),
        });
        self
    }

    /// Every consultation so far: script key, messages sent, tools offered.
    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().expect("lock poisoned").clone()
    }

    pub fn calls_for(&self, key: &str) -> Vec<Vec<Message>> {
        self.calls()
            .into_iter()
            .filter(|(k, _, _)| k == key)
            .map(|(_, messages, _)| messages)
            .collect()
    }
}

#[async_trait]
impl LlmClient for ScriptedLlmClient {
    async fn chat(&self, messages: &[Message], tools: &[ToolSpec]) -> anyhow::Result<Message> {
        let system = messages
            .first()
            .filter(|message| message.role == Role::System)
            .map(|message| message.content.clone())
            .unwrap_or_default();

        let mut scripts = self.scripts.lock().expect("lock poisoned");
        let script = scripts
            .iter_mut()
            .find(|script| system.contains(&script.key))
            .ok_or_else(|| anyhow!("no script matches system prompt {system:?}"))?;

        self.calls.lock().expect("lock poisoned").push((
            script.key.clone(),
            messages.to_vec(),
            tools.to_vec(),
        ));

        script
            .replies
            .pop_front()
            .ok_or_else(|| anyhow!("script {} is exhausted", script.key))
    }
}

/// Tool that always returns the same output and records its arguments.
#[derive(Clone)]
pub struct StaticTool {
    name: String,
    description: String,
    output: String,
    received: Arc<Mutex<Vec<Value>>>,
}

impl StaticTool {
    pub fn new(name: impl Into<String>, output: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            description: format!("static tool {name}"),
            name,
            output: output.into(),
            received: Arc::default(),
        }
    }

    pub fn shared(name: impl Into<String>, output: impl Into<String>) -> SharedTool {
        Arc::new(Self::new(name, output))
    }

    pub fn received(&self) -> Vec<Value> {
        self.received.lock().expect("lock poisoned").clone()
    }
}

#[async_trait]
impl ToolHandle for StaticTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    async fn call(&self, arguments: Value) -> anyhow::Result<String> {
        self.received.lock().expect("lock poisoned").push(arguments);
        Ok(self.output.clone())
    }
}

/// Tool whose transport is down.
pub struct FailingTool {
    name: String,
}

impl FailingTool {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

#[async_trait]
impl ToolHandle for FailingTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        "always fails"
    }

    async fn call(&self, _arguments: Value) -> anyhow::Result<String> {
        Err(anyhow!("connection refused"))
    }
}
