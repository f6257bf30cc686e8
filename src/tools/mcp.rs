//! MCP tool groups.
//!
//! Every server in `.mcp.json` becomes one tool group named `mcp_<server>_tools`.
//! Servers are spawned per operation over stdio: once at startup to list tools,
//! then once per tool call.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use rmcp::{
    model::{CallToolRequestParam, CallToolResult, RawContent},
    service::RunningService,
    transport::TokioChildProcess,
    RoleClient, ServiceExt,
};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::process::Command;
use tracing::{debug, info, instrument, warn};

use super::{SharedTool, ToolCatalog, ToolHandle};

/// Spawning plus the `initialize` handshake.
const DEFAULT_STARTUP_TIMEOUT: Duration = Duration::from_secs(30);

const DEFAULT_TOOL_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Default, Deserialize)]
pub struct McpConfig {
    #[serde(rename = "mcpServers", default)]
    pub mcp_servers: HashMap<String, McpServerConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct McpServerConfig {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
    #[serde(rename = "startupTimeoutSecs", default)]
    pub startup_timeout_secs: Option<u64>,
    #[serde(rename = "toolTimeoutSecs", default)]
    pub tool_timeout_secs: Option<u64>,
}

impl McpConfig {
    pub const FILE_NAME: &'static str = ".mcp.json";

    /// Loads the explicit path if given, otherwise the nearest `.mcp.json`
    /// walking up from the current directory.
    pub fn load(explicit: Option<&Path>) -> Result<Option<Self>> {
        let path = match explicit {
            Some(path) => Some(path.to_path_buf()),
            None => find_config_file(Self::FILE_NAME),
        };

        match path {
            Some(path) => {
                debug!("Loading MCP config from: {}", path.display());
                Self::load_from_path(&path).map(Some)
            }
            None => {
                debug!("No {} found", Self::FILE_NAME);
                Ok(None)
            }
        }
    }

    pub fn load_from_path(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        Self::from_json(&content)
    }

    pub fn from_json(raw: &str) -> Result<Self> {
        serde_json::from_str(raw).context("MCP config is not valid JSON")
    }
}

fn find_config_file(filename: &str) -> Option<PathBuf> {
    let mut current = std::env::current_dir().ok()?;

    loop {
        let candidate = current.join(filename);
        if candidate.exists() {
            return Some(candidate);
        }

        match current.parent() {
            Some(parent) => current = parent.to_path_buf(),
            None => return None,
        }
    }
}

impl McpServerConfig {
    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.command);
        if !self.args.is_empty() {
            cmd.args(&self.args);
        }
        for (key, value) in &self.env {
            let expanded = shellexpand::env(value).unwrap_or_else(|_| value.clone().into());
            cmd.env(key, expanded.as_ref());
        }
        cmd.kill_on_drop(true);
        cmd
    }

    fn startup_timeout(&self) -> Duration {
        self.startup_timeout_secs
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_STARTUP_TIMEOUT)
    }

    fn tool_timeout(&self) -> Duration {
        self.tool_timeout_secs
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_TOOL_TIMEOUT)
    }

    /// Spawns the server and completes the handshake within the startup timeout.
    async fn connect(&self, server: &str) -> Result<RunningService<RoleClient, ()>> {
        let startup_timeout = self.startup_timeout();
        tokio::time::timeout(startup_timeout, async {
            let transport = TokioChildProcess::new(self.command())?;
            let service = ().serve(transport).await?;
            Ok::<_, anyhow::Error>(service)
        })
        .await
        .map_err(|_| anyhow!("MCP server '{server}' startup timed out after {startup_timeout:?}"))?
    }
}

/// A tool exposed by one MCP server.
pub struct McpTool {
    server: String,
    config: Arc<McpServerConfig>,
    name: String,
    description: String,
    input_schema: Option<Value>,
}

#[async_trait]
impl ToolHandle for McpTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn parameters(&self) -> Value {
        self.input_schema
            .as_ref()
            .map(clean_schema)
            .unwrap_or_else(|| json!({ "type": "object", "properties": {} }))
    }

    #[instrument(skip_all, fields(server = %self.server, tool = %self.name))]
    async fn call(&self, arguments: Value) -> Result<String> {
        let result = call_tool(&self.server, &self.config, &self.name, arguments).await?;
        let text = render_result(&result);
        if result.is_error.unwrap_or(false) {
            warn!("MCP tool reported an error");
            return Ok(format!("Error: {text}"));
        }
        Ok(text)
    }
}

/// Lists tools from every configured server and groups them per server.
/// Servers that fail to answer are skipped; a worker bound to one of them
/// then fails resolution at startup.
pub async fn load_tool_groups(config: &McpConfig) -> ToolCatalog {
    let mut catalog = ToolCatalog::new();

    let mut servers: Vec<_> = config.mcp_servers.iter().collect();
    servers.sort_by(|(a, _), (b, _)| a.cmp(b));

    for (server, server_config) in servers {
        let server_config = Arc::new(server_config.clone());
        match list_tools(server, &server_config).await {
            Ok(tools) => {
                info!("Server '{}': {} tools", server, tools.len());
                catalog = catalog.with_group(format!("mcp_{server}_tools"), tools);
            }
            Err(err) => {
                warn!(?err, "Failed to list tools from '{}'", server);
            }
        }
    }

    let mut groups: Vec<&str> = catalog.group_names().collect();
    groups.sort_unstable();
    debug!(?groups, "MCP tool groups loaded");
    catalog
}

async fn list_tools(server: &str, config: &Arc<McpServerConfig>) -> Result<Vec<SharedTool>> {
    debug!("Connecting to MCP server: {}", server);

    let service = config.connect(server).await?;

    let list_timeout = config.startup_timeout();
    let response = tokio::time::timeout(list_timeout, service.list_tools(Default::default()))
        .await
        .map_err(|_| anyhow!("Listing tools on '{server}' timed out after {list_timeout:?}"))?
        .context("Failed to list tools")?;

    let tools = response
        .tools
        .into_iter()
        .map(|t| {
            Arc::new(McpTool {
                server: server.to_string(),
                config: config.clone(),
                name: t.name.to_string(),
                description: t.description.map(|d| d.to_string()).unwrap_or_default(),
                input_schema: serde_json::to_value(&t.input_schema).ok(),
            }) as SharedTool
        })
        .collect();

    service.cancel().await?;
    Ok(tools)
}

async fn call_tool(
    server: &str,
    config: &McpServerConfig,
    tool_name: &str,
    arguments: Value,
) -> Result<CallToolResult> {
    debug!("Connecting to MCP server: {} to call {}", server, tool_name);

    let service = config.connect(server).await?;

    let tool_timeout = config.tool_timeout();
    let result = tokio::time::timeout(
        tool_timeout,
        service.call_tool(CallToolRequestParam {
            name: tool_name.to_string().into(),
            arguments: arguments.as_object().cloned(),
            task: None,
        }),
    )
    .await
    .map_err(|_| anyhow!("Tool '{tool_name}' on '{server}' timed out after {tool_timeout:?}"))?
    .with_context(|| format!("Failed to call tool: {tool_name}"))?;

    service.cancel().await?;
    Ok(result)
}

fn render_result(result: &CallToolResult) -> String {
    let mut output = String::new();
    for content in &result.content {
        if !output.is_empty() {
            output.push('\n');
        }
        match &content.raw {
            RawContent::Text(text) => output.push_str(&text.text),
            other => output.push_str(&format!("{other:?}")),
        }
    }
    output
}

/// Strips schema keys that OpenAI-compatible backends reject or misread.
fn clean_schema(schema: &Value) -> Value {
    match schema {
        Value::Object(obj) => Value::Object(
            obj.iter()
                .filter(|(key, _)| !matches!(key.as_str(), "$schema" | "title"))
                .map(|(key, value)| {
                    let cleaned = match (key.as_str(), value) {
                        // Property names are data, not schema keywords.
                        ("properties", Value::Object(props)) => Value::Object(
                            props
                                .iter()
                                .map(|(name, prop)| (name.clone(), clean_schema(prop)))
                                .collect(),
                        ),
                        _ => clean_schema(value),
                    };
                    (key.clone(), cleaned)
                })
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.iter().map(clean_schema).collect()),
        other => other.clone(),
    }
}
