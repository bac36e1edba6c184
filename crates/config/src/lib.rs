//! Configuration loading, validation, and management for the Ema server.
//!
//! Loads configuration from a TOML file with environment variable
//! overrides. Validates all settings at load time. API keys never appear
//! in Debug output.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use ema_core::Error;
use serde::{Deserialize, Serialize};

/// The root configuration structure.
#[derive(Clone, Default, Serialize, Deserialize)]
pub struct EmaConfig {
    #[serde(default)]
    pub llm: LlmConfig,

    #[serde(default)]
    pub agent: AgentConfig,

    #[serde(default)]
    pub tools: ToolsConfig,

    #[serde(default)]
    pub mongo: MongoConfig,

    #[serde(default)]
    pub system: SystemConfig,
}

impl std::fmt::Debug for EmaConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmaConfig")
            .field("llm", &self.llm)
            .field("agent", &self.agent)
            .field("tools", &self.tools)
            .field("mongo", &self.mongo)
            .field("system", &self.system)
            .finish()
    }
}

/// Redact a secret for Debug output.
fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

#[derive(Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Which chat backend drives the agent
    #[serde(default = "default_chat_provider")]
    pub chat_provider: String,

    #[serde(default = "default_chat_model")]
    pub chat_model: String,

    #[serde(default)]
    pub openai: ProviderConfig,

    #[serde(default)]
    pub google: ProviderConfig,

    #[serde(default)]
    pub retry: RetryConfig,
}

fn default_chat_provider() -> String {
    "openai".into()
}
fn default_chat_model() -> String {
    "gpt-4o-mini".into()
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            chat_provider: default_chat_provider(),
            chat_model: default_chat_model(),
            openai: ProviderConfig::default(),
            google: ProviderConfig::default(),
            retry: RetryConfig::default(),
        }
    }
}

impl std::fmt::Debug for LlmConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LlmConfig")
            .field("chat_provider", &self.chat_provider)
            .field("chat_model", &self.chat_model)
            .field("openai", &self.openai)
            .field("google", &self.google)
            .field("retry", &self.retry)
            .finish()
    }
}

#[derive(Clone, Default, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http_proxy: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub https_proxy: Option<String>,
}

impl std::fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("key", &redact(&self.key))
            .field("base_url", &self.base_url)
            .field("http_proxy", &self.http_proxy)
            .field("https_proxy", &self.https_proxy)
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,

    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    #[serde(default = "default_exponential_base")]
    pub exponential_base: f64,
}

fn default_true() -> bool {
    true
}
fn default_max_retries() -> u32 {
    3
}
fn default_initial_delay_ms() -> u64 {
    500
}
fn default_max_delay_ms() -> u64 {
    30_000
}
fn default_exponential_base() -> f64 {
    2.0
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_retries: default_max_retries(),
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            exponential_base: default_exponential_base(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Maximum reasoning steps per run (safety limit)
    #[serde(default = "default_max_steps")]
    pub max_steps: u32,

    /// Context budget per run
    #[serde(default = "default_token_limit")]
    pub token_limit: u32,

    /// Path to the system prompt template
    #[serde(default = "default_system_prompt_file")]
    pub system_prompt_file: PathBuf,

    /// How many recent conversation turns feed the prompt's memory buffer
    #[serde(default = "default_memory_window")]
    pub memory_window: usize,
}

fn default_max_steps() -> u32 {
    20
}
fn default_token_limit() -> u32 {
    8192
}
fn default_system_prompt_file() -> PathBuf {
    PathBuf::from("system_prompt.txt")
}
fn default_memory_window() -> usize {
    10
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_steps: default_max_steps(),
            token_limit: default_token_limit(),
            system_prompt_file: default_system_prompt_file(),
            memory_window: default_memory_window(),
        }
    }
}

/// Boolean gates for the built-in tools. The reply tool is always on.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolsConfig {
    #[serde(default = "default_true")]
    pub memory_search: bool,

    #[serde(default = "default_true")]
    pub remember: bool,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            memory_search: true,
            remember: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MongoConfig {
    /// "memory" for the in-process backend, "remote" for an external server
    #[serde(default = "default_mongo_kind")]
    pub kind: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uri: Option<String>,

    #[serde(default = "default_db_name")]
    pub db_name: String,
}

fn default_mongo_kind() -> String {
    "memory".into()
}
fn default_db_name() -> String {
    "ema".into()
}

impl Default for MongoConfig {
    fn default() -> Self {
        Self {
            kind: default_mongo_kind(),
            uri: None,
            db_name: default_db_name(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemConfig {
    #[serde(default = "default_data_root")]
    pub data_root: PathBuf,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http_proxy: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub https_proxy: Option<String>,
}

fn default_data_root() -> PathBuf {
    PathBuf::from("./data")
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            data_root: default_data_root(),
            http_proxy: None,
            https_proxy: None,
        }
    }
}

impl EmaConfig {
    /// Load configuration from a TOML file, apply environment overrides
    /// from the process environment, and validate.
    pub fn load(path: &Path) -> Result<Self, Error> {
        let raw = std::fs::read_to_string(path).map_err(|e| Error::Config {
            message: format!("cannot read {}: {e}", path.display()),
        })?;
        let mut config: EmaConfig = toml::from_str(&raw).map_err(|e| Error::Config {
            message: format!("cannot parse {}: {e}", path.display()),
        })?;
        config.apply_env(&std::env::vars().collect());
        config.validate()?;
        Ok(config)
    }

    /// Apply environment overrides. Upper-case proxy variables win over
    /// lower-case ones.
    pub fn apply_env(&mut self, env: &HashMap<String, String>) {
        let get = |k: &str| env.get(k).filter(|v| !v.is_empty()).cloned();

        if let Some(v) = get("EMA_CHAT_PROVIDER") {
            self.llm.chat_provider = v;
        }
        if let Some(v) = get("EMA_CHAT_MODEL") {
            self.llm.chat_model = v;
        }
        if let Some(v) = get("OPENAI_API_KEY") {
            self.llm.openai.key = Some(v);
        }
        if let Some(v) = get("OPENAI_API_BASE") {
            self.llm.openai.base_url = Some(v);
        }
        if let Some(v) = get("GEMINI_API_KEY") {
            self.llm.google.key = Some(v);
        }
        if let Some(v) = get("GEMINI_API_BASE") {
            self.llm.google.base_url = Some(v);
        }

        let http_proxy = get("HTTP_PROXY").or_else(|| get("http_proxy"));
        let https_proxy = get("HTTPS_PROXY").or_else(|| get("https_proxy"));
        if let Some(v) = http_proxy {
            self.system.http_proxy = Some(v.clone());
            self.llm.openai.http_proxy = Some(v.clone());
            self.llm.google.http_proxy = Some(v);
        }
        if let Some(v) = https_proxy {
            self.system.https_proxy = Some(v.clone());
            self.llm.openai.https_proxy = Some(v.clone());
            self.llm.google.https_proxy = Some(v);
        }
    }

    /// Reject configurations the runtime cannot honor.
    pub fn validate(&self) -> Result<(), Error> {
        if !matches!(self.llm.chat_provider.as_str(), "openai" | "google") {
            return Err(Error::Config {
                message: format!("unknown llm.chat_provider: {}", self.llm.chat_provider),
            });
        }
        if self.agent.max_steps == 0 {
            return Err(Error::Config {
                message: "agent.max_steps must be positive".into(),
            });
        }
        if self.agent.token_limit == 0 {
            return Err(Error::Config {
                message: "agent.token_limit must be positive".into(),
            });
        }
        if !matches!(self.mongo.kind.as_str(), "memory" | "remote") {
            return Err(Error::Config {
                message: format!("unknown mongo.kind: {}", self.mongo.kind),
            });
        }
        if self.mongo.kind == "remote" && self.mongo.uri.is_none() {
            return Err(Error::Config {
                message: "mongo.kind = \"remote\" requires mongo.uri".into(),
            });
        }
        if self.llm.retry.exponential_base < 1.0 {
            return Err(Error::Config {
                message: "llm.retry.exponential_base must be >= 1.0".into(),
            });
        }
        Ok(())
    }
}
