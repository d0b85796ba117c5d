//! Root configuration model.
//!
//! Every section carries serde defaults so a partial (or missing) `config.toml`
//! still yields a usable configuration. Loading from disk lives in
//! `insight-infrastructure`.

use crate::llm::ProviderKind;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Deserialize, Serialize, Debug, Clone, Default, PartialEq)]
#[serde(default)]
pub struct RootConfig {
    pub data: DataConfig,
    pub providers: ProvidersConfig,
    pub gateway: GatewayConfig,
    pub workflow: WorkflowConfig,
    pub query: QueryConfig,
    pub sandbox: SandboxConfig,
    pub sessions: SessionsConfig,
}

/// Location of the dataset and its schema descriptor.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct DataConfig {
    pub database_path: PathBuf,
    pub schema_path: PathBuf,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from("data/transactions.db"),
            schema_path: PathBuf::from("data/schema.json"),
        }
    }
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct ProvidersConfig {
    /// Provider tried first when the caller expresses no preference.
    pub default: ProviderKind,
    pub gemini: ProviderConfig,
    pub groq: ProviderConfig,
}

impl Default for ProvidersConfig {
    fn default() -> Self {
        Self {
            default: ProviderKind::Groq,
            gemini: ProviderConfig::for_kind(ProviderKind::Gemini),
            groq: ProviderConfig::for_kind(ProviderKind::Groq),
        }
    }
}

impl ProvidersConfig {
    /// Returns the configuration block for a provider.
    pub fn get(&self, kind: ProviderKind) -> &ProviderConfig {
        match kind {
            ProviderKind::Gemini => &self.gemini,
            ProviderKind::Groq => &self.groq,
        }
    }

    pub fn get_mut(&mut self, kind: ProviderKind) -> &mut ProviderConfig {
        match kind {
            ProviderKind::Gemini => &mut self.gemini,
            ProviderKind::Groq => &mut self.groq,
        }
    }
}

/// Per-provider call settings.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub struct ProviderConfig {
    pub name: ProviderKind,
    pub model: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Retries of the same provider after the first attempt.
    #[serde(default = "default_provider_retries")]
    pub max_retries: u32,
    #[serde(default)]
    pub api_key: String,
    /// Overrides the provider's public endpoint (proxies, tests).
    #[serde(default)]
    pub base_url: Option<String>,
}

impl ProviderConfig {
    /// Default settings for a provider, without credentials.
    pub fn for_kind(kind: ProviderKind) -> Self {
        Self {
            name: kind,
            model: kind.default_model().to_string(),
            temperature: default_temperature(),
            timeout_ms: default_timeout_ms(),
            max_retries: default_provider_retries(),
            api_key: String::new(),
            base_url: None,
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn has_credentials(&self) -> bool {
        !self.api_key.trim().is_empty()
    }
}

fn default_temperature() -> f32 {
    0.1
}

fn default_timeout_ms() -> u64 {
    60_000
}

fn default_provider_retries() -> u32 {
    2
}

/// Backoff applied between retries of the same provider.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct GatewayConfig {
    pub backoff_base_ms: u64,
    pub backoff_max_ms: u64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            backoff_base_ms: 1_000,
            backoff_max_ms: 8_000,
        }
    }
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct WorkflowConfig {
    /// Repair attempts per step beyond the first execution.
    pub max_step_retries: u32,
    /// Number of most recent turns offered to the planner.
    pub history_turns: usize,
    /// Character budget for the rendered conversation history.
    pub history_chars: usize,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            max_step_retries: 3,
            history_turns: 10,
            history_chars: 2_000,
        }
    }
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct QueryConfig {
    pub timeout_ms: u64,
    pub max_rows: usize,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 30_000,
            max_rows: 10_000,
        }
    }
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct SandboxConfig {
    pub python: String,
    pub timeout_ms: u64,
    pub max_memory_mb: u64,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            python: "python3".to_string(),
            timeout_ms: 30_000,
            max_memory_mb: 512,
        }
    }
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct SessionsConfig {
    /// Turns kept per session; older turns are trimmed on append.
    pub max_turns: usize,
}

impl Default for SessionsConfig {
    fn default() -> Self {
        Self { max_turns: 50 }
    }
}
