use tracing::{info, instrument, warn};

use crate::agents::{AgentFactory, SharedWorkerAgent};
use crate::config::AppConfig;
use crate::error::ConfigurationError;
use crate::llm_client::SharedLlmClient;
use crate::registry::{BuiltinPrompts, JsonPromptSource, PromptResolver, WorkerId, WorkerRegistry};
use crate::tools::{load_tool_groups, McpConfig, ToolCatalog, ToolResolver};

/// Long-lived wiring shared by both supervisor factories: the model handle,
/// the worker registry, the resolvers and one cached agent per worker.
pub struct RegistryContext {
    llm_client: SharedLlmClient,
    registry: WorkerRegistry,
    prompts: PromptResolver,
    agents: Vec<SharedWorkerAgent>,
    max_iterations: usize,
    max_handoffs: usize,
}

impl RegistryContext {
    pub fn builder(llm_client: SharedLlmClient) -> RegistryContextBuilder {
        RegistryContextBuilder {
            llm_client,
            registry: None,
            prompts: None,
            catalog: ToolCatalog::new(),
            factory: AgentFactory::new(),
            max_iterations: AppConfig::DEFAULT_MAX_ITERATIONS,
            max_handoffs: AppConfig::DEFAULT_MAX_HANDOFFS,
        }
    }

    /// Full startup wiring from process configuration. Lists MCP tools once.
    pub async fn from_config(
        config: &AppConfig,
        llm_client: SharedLlmClient,
    ) -> Result<Self, ConfigurationError> {
        let prompts = match &config.prompts_file {
            Some(path) => PromptResolver::new(JsonPromptSource::from_path(path)?),
            None => PromptResolver::new(BuiltinPrompts),
        };

        let registry = match (&config.workers, prompts.declared_workers()) {
            (Some(list), _) => WorkerRegistry::parse(list)?,
            (None, Some(declared)) => WorkerRegistry::new(declared)?,
            (None, None) => WorkerRegistry::builtin(),
        };

        let mcp_config = McpConfig::load(config.mcp_config.as_deref())
            .map_err(|source| ConfigurationError::Load {
                what: "MCP config".to_string(),
                source,
            })?
            .unwrap_or_default();
        let mut catalog = load_tool_groups(&mcp_config).await;
        add_reasoning_groups(&mut catalog, &registry, &config.reasoning_workers)?;

        Self::builder(llm_client)
            .with_registry(registry)
            .with_prompts(prompts)
            .with_tools(catalog)
            .with_factory(AgentFactory::new().require_tools(config.require_tools))
            .with_max_iterations(config.max_iterations)
            .with_max_handoffs(config.max_handoffs)
            .build()
    }

    pub fn llm_client(&self) -> &SharedLlmClient {
        &self.llm_client
    }

    pub fn registry(&self) -> &WorkerRegistry {
        &self.registry
    }

    pub fn prompts(&self) -> &PromptResolver {
        &self.prompts
    }

    /// Worker agents in registry order.
    pub fn agents(&self) -> &[SharedWorkerAgent] {
        &self.agents
    }

    pub fn max_iterations(&self) -> usize {
        self.max_iterations
    }

    pub fn max_handoffs(&self) -> usize {
        self.max_handoffs
    }
}

/// Gives each declared tool-free worker an empty group. A worker that also has
/// a loaded tool group is a conflict, never a silent override.
fn add_reasoning_groups(
    catalog: &mut ToolCatalog,
    registry: &WorkerRegistry,
    reasoning_workers: &[String],
) -> Result<(), ConfigurationError> {
    for name in reasoning_workers {
        let worker = WorkerId::new(name.as_str());
        if !registry.contains(&worker) {
            warn!(worker = %worker, "Tool-free worker is not registered; ignoring");
            continue;
        }

        let key = worker.tool_group_key();
        if catalog.group(&key).is_some() {
            return Err(ConfigurationError::ToolSetConflict { worker, key });
        }
        catalog.insert_group(key, Vec::new());
    }
    Ok(())
}

pub struct RegistryContextBuilder {
    llm_client: SharedLlmClient,
    registry: Option<WorkerRegistry>,
    prompts: Option<PromptResolver>,
    catalog: ToolCatalog,
    factory: AgentFactory,
    max_iterations: usize,
    max_handoffs: usize,
}

impl RegistryContextBuilder {
    pub fn with_registry(mut self, registry: WorkerRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn with_prompts(mut self, prompts: PromptResolver) -> Self {
        self.prompts = Some(prompts);
        self
    }

    pub fn with_tools(mut self, catalog: ToolCatalog) -> Self {
        self.catalog = catalog;
        self
    }

    pub fn with_factory(mut self, factory: AgentFactory) -> Self {
        self.factory = factory;
        self
    }

    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    pub fn with_max_handoffs(mut self, max_handoffs: usize) -> Self {
        self.max_handoffs = max_handoffs;
        self
    }

    /// Resolves prompts and tools and builds an agent for every worker.
    /// Any gap aborts: a partially wired context is never returned.
    #[instrument(skip_all)]
    pub fn build(self) -> Result<RegistryContext, ConfigurationError> {
        let registry = self.registry.unwrap_or_else(WorkerRegistry::builtin);
        let prompts = self
            .prompts
            .unwrap_or_else(|| PromptResolver::new(BuiltinPrompts));
        let tools = ToolResolver::new(self.catalog);
        let factory = self.factory.with_max_iterations(self.max_iterations);

        let bundles = prompts.resolve_all(&registry)?;
        let mut tool_sets = tools.resolve_all(&registry)?;

        let mut agents = Vec::with_capacity(registry.len());
        for (worker, bundle) in bundles {
            let worker_tools = tool_sets.remove(&worker).unwrap_or_default();
            let agent = factory.build(
                &worker,
                Some(self.llm_client.clone()),
                bundle,
                worker_tools,
            )?;
            info!(
                worker = %worker,
                agent = agent.name(),
                tools = agent.tool_count(),
                "Worker wired"
            );
            agents.push(SharedWorkerAgent::new(agent));
        }

        Ok(RegistryContext {
            llm_client: self.llm_client,
            registry,
            prompts,
            agents,
            max_iterations: self.max_iterations,
            max_handoffs: self.max_handoffs,
        })
    }
}
