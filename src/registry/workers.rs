use std::collections::HashSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::ConfigurationError;

/// Workers wired in when nothing else is configured.
pub const DEFAULT_WORKERS: &[&str] = &["devops", "atlassian"];

/// Identifier of a worker; the join key for prompts, tool groups and agents.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkerId(String);

impl WorkerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into().trim().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Name of the tool group that holds this worker's tools.
    pub fn tool_group_key(&self) -> String {
        format!("mcp_{}_tools", self.0)
    }

    pub fn agent_name(&self) -> String {
        format!("{}_agent", self.0)
    }

    pub fn subagent_tool_name(&self) -> String {
        format!("{}_subagent", self.0)
    }
}

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for WorkerId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Ordered, duplicate-free list of workers. Read-only once built.
#[derive(Debug, Clone)]
pub struct WorkerRegistry {
    workers: Vec<WorkerId>,
}

impl WorkerRegistry {
    pub fn new<I, S>(ids: I) -> Result<Self, ConfigurationError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut seen = HashSet::new();
        let mut workers = Vec::new();

        for id in ids {
            let worker = WorkerId::new(id);
            if worker.as_str().is_empty() {
                continue;
            }
            if !seen.insert(worker.clone()) {
                return Err(ConfigurationError::DuplicateWorker(worker));
            }
            workers.push(worker);
        }

        if workers.is_empty() {
            return Err(ConfigurationError::EmptyRegistry);
        }

        Ok(Self { workers })
    }

    pub fn builtin() -> Self {
        Self {
            workers: DEFAULT_WORKERS.iter().copied().map(WorkerId::new).collect(),
        }
    }

    /// Parses a comma separated list such as `devops,atlassian`.
    pub fn parse(list: &str) -> Result<Self, ConfigurationError> {
        Self::new(list.split(',').map(str::to_string))
    }

    pub fn iter(&self) -> impl Iterator<Item = &WorkerId> {
        self.workers.iter()
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn contains(&self, id: &WorkerId) -> bool {
        self.workers.contains(id)
    }
}

impl<'a> IntoIterator for &'a WorkerRegistry {
    type Item = &'a WorkerId;
    type IntoIter = std::slice::Iter<'a, WorkerId>;

    fn into_iter(self) -> Self::IntoIter {
        self.workers.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_keeps_declaration_order() {
        let registry = WorkerRegistry::parse("devops, atlassian,grafana").expect("registry");
        let ids: Vec<&str> = registry.iter().map(WorkerId::as_str).collect();
        assert_eq!(ids, vec!["devops", "atlassian", "grafana"]);
    }

    #[test]
    fn duplicates_are_rejected() {
        let err = WorkerRegistry::parse("devops,atlassian,devops").expect_err("duplicate");
        assert!(matches!(err, ConfigurationError::DuplicateWorker(id) if id.as_str() == "devops"));
    }

    #[test]
    fn blank_list_is_an_empty_registry() {
        let err = WorkerRegistry::parse(" , ").expect_err("empty");
        assert!(matches!(err, ConfigurationError::EmptyRegistry));
    }

    #[test]
    fn derived_names_follow_conventions() {
        let id = WorkerId::new("atlassian");
        assert_eq!(id.tool_group_key(), "mcp_atlassian_tools");
        assert_eq!(id.agent_name(), "atlassian_agent");
        assert_eq!(id.subagent_tool_name(), "atlassian_subagent");
    }

    #[test]
    fn builtin_registry_lists_default_workers() {
        let registry = WorkerRegistry::builtin();
        assert_eq!(registry.len(), 2);
        assert!(registry.contains(&WorkerId::new("devops")));
    }
}
