pub mod mcp;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{json, Value};

use crate::error::ConfigurationError;
use crate::registry::{WorkerId, WorkerRegistry};

pub use mcp::{load_tool_groups, McpConfig};

/// Capability handed to an agent. Execution details are opaque to the core.
#[async_trait]
pub trait ToolHandle: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// JSON schema of the arguments object.
    fn parameters(&self) -> Value {
        json!({ "type": "object", "properties": {} })
    }

    async fn call(&self, arguments: Value) -> anyhow::Result<String>;
}

pub type SharedTool = Arc<dyn ToolHandle>;

/// What the model sees of a tool.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

impl ToolSpec {
    pub fn of(tool: &dyn ToolHandle) -> Self {
        Self {
            name: tool.name().to_string(),
            description: tool.description().to_string(),
            parameters: tool.parameters(),
        }
    }
}

/// Tool groups keyed by name, e.g. `mcp_devops_tools`.
#[derive(Default, Clone)]
pub struct ToolCatalog {
    groups: HashMap<String, Vec<SharedTool>>,
}

impl ToolCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a group. An empty group is a valid, deliberate assignment.
    pub fn insert_group(&mut self, key: impl Into<String>, tools: Vec<SharedTool>) {
        self.groups.insert(key.into(), tools);
    }

    pub fn with_group(mut self, key: impl Into<String>, tools: Vec<SharedTool>) -> Self {
        self.insert_group(key, tools);
        self
    }

    pub fn group(&self, key: &str) -> Option<&[SharedTool]> {
        self.groups.get(key).map(Vec::as_slice)
    }

    pub fn group_names(&self) -> impl Iterator<Item = &str> {
        self.groups.keys().map(String::as_str)
    }
}

/// Routes tool groups to workers by the `mcp_<worker>_tools` convention.
pub struct ToolResolver {
    catalog: ToolCatalog,
}

impl ToolResolver {
    pub fn new(catalog: ToolCatalog) -> Self {
        Self { catalog }
    }

    pub fn resolve(&self, worker: &WorkerId) -> Result<Vec<SharedTool>, ConfigurationError> {
        let key = worker.tool_group_key();
        self.catalog
            .group(&key)
            .map(<[SharedTool]>::to_vec)
            .ok_or_else(|| ConfigurationError::MissingToolSet {
                worker: worker.clone(),
                key,
            })
    }

    pub fn resolve_all(
        &self,
        registry: &WorkerRegistry,
    ) -> Result<HashMap<WorkerId, Vec<SharedTool>>, ConfigurationError> {
        registry
            .iter()
            .map(|worker| Ok((worker.clone(), self.resolve(worker)?)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::StaticTool;

    #[test]
    fn resolves_group_by_worker_convention() {
        let catalog = ToolCatalog::new().with_group(
            "mcp_devops_tools",
            vec![StaticTool::shared("read_logs", "log lines")],
        );
        let resolver = ToolResolver::new(catalog);

        let tools = resolver.resolve(&WorkerId::new("devops")).expect("devops tools");
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0].name(), "read_logs");
    }

    #[test]
    fn missing_group_is_not_an_empty_set() {
        let resolver = ToolResolver::new(ToolCatalog::new().with_group("mcp_devops_tools", vec![]));

        assert!(resolver
            .resolve(&WorkerId::new("devops"))
            .expect("declared empty group")
            .is_empty());

        let err = resolver
            .resolve(&WorkerId::new("atlassian"))
            .err()
            .expect("undeclared group");
        match err {
            ConfigurationError::MissingToolSet { worker, key } => {
                assert_eq!(worker.as_str(), "atlassian");
                assert_eq!(key, "mcp_atlassian_tools");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn spec_mirrors_tool_metadata() {
        let tool = StaticTool::new("get_issue", "issue body");
        let spec = ToolSpec::of(&tool);
        assert_eq!(spec.name, "get_issue");
        assert_eq!(spec.parameters["type"], "object");
    }
}
