use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex};

use anyhow::Context;
use serde::Deserialize;
use tracing::debug;

use crate::error::ConfigurationError;

use super::workers::{WorkerId, WorkerRegistry};

pub const SUPERVISOR_PROMPT: &str = "You are RIA, a supervisor that coordinates specialist workers. \
Each tool you have is a worker that handles one system. Break the user request into steps, call \
the worker whose description matches each step with a clear natural-language request, and combine \
their answers into one reply. Call one worker at a time. If a worker reports an error, say so and \
answer with what you do know. Never invent ticket, log or metric contents.";

pub const REACT_SUPERVISOR_PROMPT: &str = "You are RIA, a supervisor managing a team of agents. \
Each transfer tool hands the conversation to one agent and describes what that agent can do. \
Transfer control to the agent whose description matches the request. Assign work to one \
agent at a time and do not do the work yourself. When the agents are done, summarize their results \
for the user.";

/// System prompt and supervisor-facing description of one worker.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PromptBundle {
    pub system_prompt: String,
    #[serde(alias = "description")]
    pub subagent_description: String,
}

impl PromptBundle {
    pub fn new(system_prompt: impl Into<String>, subagent_description: impl Into<String>) -> Self {
        Self {
            system_prompt: system_prompt.into(),
            subagent_description: subagent_description.into(),
        }
    }
}

/// Backing store for worker prompts: a static table, a file, or remote config.
pub trait PromptSource: Send + Sync {
    fn lookup(&self, worker: &WorkerId) -> Option<PromptBundle>;

    fn supervisor_prompt(&self) -> Option<String> {
        None
    }

    fn react_supervisor_prompt(&self) -> Option<String> {
        None
    }

    /// Workers declared by the source itself, in order, if it declares any.
    fn workers(&self) -> Option<Vec<String>> {
        None
    }
}

/// Prompts compiled into the binary for the default workers.
#[derive(Debug, Default, Clone)]
pub struct BuiltinPrompts;

impl BuiltinPrompts {
    const DEVOPS_PROMPT: &'static str = "You are the devops agent. You read metrics, read and \
download logs, and look for canary failures on the devops servers using your tools. Always name \
the tenancy, region and service you queried. Report tool output faithfully and say plainly when a \
query returns nothing.";
    const DEVOPS_DESCRIPTION: &'static str = "read metrics, read logs, download logs from mc-dope \
(devops) servers.\nUse this when the user wants to read logs, read metrics, download logs, look \
for canaries etc from mc_devops server.\nInput: Natural language devops request (e.g., 'Are there \
any canary failures in mpaasoicnative tenancy of us-phoenix-1 region for the phonebook oracle \
integration cloud?')";

    const ATLASSIAN_PROMPT: &'static str = "You are the atlassian agent. You read jira issues, add \
or update comments and re-assign issues using your tools. Quote issue keys exactly (e.g. \
EHRM-3552), summarise status, assignee and latest comments, and confirm every change you make.";
    const ATLASSIAN_DESCRIPTION: &'static str = "read, update comments, re-assign jira issues.\n\
Input: Natural language request related to jira issue (e.g., 'Get the details of jira id \
EHRM-3552 the EHRM project queue')";
}

impl PromptSource for BuiltinPrompts {
    fn lookup(&self, worker: &WorkerId) -> Option<PromptBundle> {
        match worker.as_str() {
            "devops" => Some(PromptBundle::new(
                Self::DEVOPS_PROMPT,
                Self::DEVOPS_DESCRIPTION,
            )),
            "atlassian" => Some(PromptBundle::new(
                Self::ATLASSIAN_PROMPT,
                Self::ATLASSIAN_DESCRIPTION,
            )),
            _ => None,
        }
    }

    fn supervisor_prompt(&self) -> Option<String> {
        Some(SUPERVISOR_PROMPT.to_string())
    }

    fn react_supervisor_prompt(&self) -> Option<String> {
        Some(REACT_SUPERVISOR_PROMPT.to_string())
    }
}

/// Prompt table read from a JSON file.
///
/// ```json
/// {
///   "supervisor_prompt": "...",
///   "workers": {
///     "devops": { "system_prompt": "...", "description": "..." }
///   }
/// }
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct JsonPromptSource {
    #[serde(default)]
    supervisor_prompt: Option<String>,
    #[serde(default)]
    react_supervisor_prompt: Option<String>,
    #[serde(default)]
    worker_order: Option<Vec<String>>,
    workers: HashMap<String, PromptBundle>,
}

impl JsonPromptSource {
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigurationError> {
        let path = path.as_ref();
        let load = || -> anyhow::Result<Self> {
            let raw = fs::read_to_string(path)
                .with_context(|| format!("reading {}", path.display()))?;
            Self::from_json(&raw)
        };

        load().map_err(|source| ConfigurationError::Load {
            what: format!("prompt file {}", path.display()),
            source,
        })
    }

    pub fn from_json(raw: &str) -> anyhow::Result<Self> {
        serde_json::from_str(raw).context("prompt file is not valid JSON")
    }
}

impl PromptSource for JsonPromptSource {
    fn lookup(&self, worker: &WorkerId) -> Option<PromptBundle> {
        self.workers.get(worker.as_str()).cloned()
    }

    fn supervisor_prompt(&self) -> Option<String> {
        self.supervisor_prompt.clone()
    }

    fn react_supervisor_prompt(&self) -> Option<String> {
        self.react_supervisor_prompt.clone()
    }

    fn workers(&self) -> Option<Vec<String>> {
        if let Some(order) = &self.worker_order {
            return Some(order.clone());
        }
        let mut names: Vec<String> = self.workers.keys().cloned().collect();
        names.sort();
        Some(names)
    }
}

/// Resolves prompt bundles per worker, memoizing each lookup.
pub struct PromptResolver {
    source: Box<dyn PromptSource>,
    cache: Mutex<HashMap<WorkerId, Arc<PromptBundle>>>,
}

impl PromptResolver {
    pub fn new(source: impl PromptSource + 'static) -> Self {
        Self {
            source: Box::new(source),
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn resolve(&self, worker: &WorkerId) -> Result<Arc<PromptBundle>, ConfigurationError> {
        let mut cache = self
            .cache
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        if let Some(bundle) = cache.get(worker) {
            return Ok(bundle.clone());
        }

        let bundle = self
            .source
            .lookup(worker)
            .map(Arc::new)
            .ok_or_else(|| ConfigurationError::MissingPrompt(worker.clone()))?;
        debug!(worker = %worker, "Resolved worker prompt");
        cache.insert(worker.clone(), bundle.clone());
        Ok(bundle)
    }

    /// Resolves every registered worker, failing on the first gap.
    pub fn resolve_all(
        &self,
        registry: &WorkerRegistry,
    ) -> Result<Vec<(WorkerId, Arc<PromptBundle>)>, ConfigurationError> {
        registry
            .iter()
            .map(|worker| Ok((worker.clone(), self.resolve(worker)?)))
            .collect()
    }

    pub fn supervisor_prompt(&self) -> String {
        self.source
            .supervisor_prompt()
            .unwrap_or_else(|| SUPERVISOR_PROMPT.to_string())
    }

    pub fn react_supervisor_prompt(&self) -> String {
        self.source
            .react_supervisor_prompt()
            .unwrap_or_else(|| REACT_SUPERVISOR_PROMPT.to_string())
    }

    pub fn declared_workers(&self) -> Option<Vec<String>> {
        self.source.workers()
    }
}
