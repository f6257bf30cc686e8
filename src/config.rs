use std::env;
use std::path::PathBuf;

/// Connection settings for the OpenAI-compatible chat backend.
#[derive(Debug, Clone)]
pub struct LlmSettings {
    pub base_url: String,
    pub api_key: String,
    pub organization: Option<String>,
    pub model: String,
    pub temperature: f32,
}

impl LlmSettings {
    /// Local Ollama, which serves the OpenAI API under `/v1`.
    const DEFAULT_BASE_URL: &'static str = "http://localhost:11434/v1";
    const DEFAULT_MODEL: &'static str = "qwen2.5:14b";

    const BASE_URL_VARS: [&'static str; 2] = ["RIA_LLM_BASE_URL", "OPENAI_BASE_URL"];
    const API_KEY_VARS: [&'static str; 2] = ["RIA_LLM_API_KEY", "OPENAI_API_KEY"];
    const ORG_VARS: [&'static str; 2] = ["RIA_LLM_ORG", "OPENAI_ORG_ID"];
    const MODEL_VARS: [&'static str; 1] = ["RIA_LLM_MODEL"];
    const TEMPERATURE_VARS: [&'static str; 1] = ["RIA_LLM_TEMPERATURE"];

    pub fn from_env() -> Self {
        Self {
            base_url: read_env(&Self::BASE_URL_VARS)
                .unwrap_or_else(|| Self::DEFAULT_BASE_URL.to_string()),
            // Ollama ignores the key but the client always sends one.
            api_key: read_env(&Self::API_KEY_VARS).unwrap_or_else(|| "ollama".to_string()),
            organization: read_env(&Self::ORG_VARS),
            model: read_env(&Self::MODEL_VARS).unwrap_or_else(|| Self::DEFAULT_MODEL.to_string()),
            temperature: read_env(&Self::TEMPERATURE_VARS)
                .and_then(|value| value.parse().ok())
                .unwrap_or(0.0),
        }
    }
}

/// Process-level configuration, read once at startup.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub llm: LlmSettings,
    /// Comma separated worker list overriding the prompt source's own.
    pub workers: Option<String>,
    /// Workers that run without tools; they get an empty tool group.
    pub reasoning_workers: Vec<String>,
    pub prompts_file: Option<PathBuf>,
    pub mcp_config: Option<PathBuf>,
    pub max_iterations: usize,
    pub max_handoffs: usize,
    pub require_tools: bool,
}

impl AppConfig {
    pub const DEFAULT_MAX_ITERATIONS: usize = 25;
    pub const DEFAULT_MAX_HANDOFFS: usize = 10;

    pub fn from_env() -> Self {
        Self {
            llm: LlmSettings::from_env(),
            workers: read_env(&["RIA_WORKERS"]),
            reasoning_workers: read_env(&["RIA_REASONING_WORKERS"])
                .map(|list| split_list(&list))
                .unwrap_or_default(),
            prompts_file: read_env(&["RIA_PROMPTS_FILE"]).map(PathBuf::from),
            mcp_config: read_env(&["RIA_MCP_CONFIG"]).map(PathBuf::from),
            max_iterations: read_env(&["RIA_MAX_ITERATIONS"])
                .and_then(|value| value.parse().ok())
                .unwrap_or(Self::DEFAULT_MAX_ITERATIONS),
            max_handoffs: read_env(&["RIA_MAX_HANDOFFS"])
                .and_then(|value| value.parse().ok())
                .unwrap_or(Self::DEFAULT_MAX_HANDOFFS),
            require_tools: read_env(&["RIA_REQUIRE_TOOLS"])
                .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
                .unwrap_or(false),
        }
    }
}

fn read_env(candidates: &[&'static str]) -> Option<String> {
    candidates
        .iter()
        .find_map(|key| env::var(key).ok().filter(|value| !value.trim().is_empty()))
}

pub(crate) fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect()
}
