//! Configuration loading.
//!
//! Reads `config.toml` (from `--config` or the platform config directory),
//! fills API keys from the environment when the file carries none, and
//! resolves relative data paths against the directory holding the file.

use crate::paths::InsightPaths;
use anyhow::{Context, Result};
use insight_core::config::RootConfig;
use insight_core::llm::ProviderKind;
use std::path::{Path, PathBuf};

/// A loaded configuration and where it came from.
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub config: RootConfig,
    /// `None` when no file existed and defaults were used.
    pub source: Option<PathBuf>,
}

pub struct ConfigService;

impl ConfigService {
    /// Loads from `path`, or from the default location when `None`.
    pub fn load(path: Option<&Path>) -> Result<LoadedConfig> {
        let path = match path {
            Some(path) => path.to_path_buf(),
            None => InsightPaths::config_file()
                .map_err(|e| anyhow::anyhow!("Failed to resolve config path: {}", e))?,
        };
        Self::load_with_env(&path, |name| std::env::var(name).ok())
    }

    /// Loads from `path`, reading environment variables through `env`.
    pub fn load_with_env(path: &Path, env: impl Fn(&str) -> Option<String>) -> Result<LoadedConfig> {
        let (mut config, source) = if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file {}", path.display()))?;
            let config: RootConfig = toml::from_str(&content)
                .with_context(|| format!("Failed to parse config file {}", path.display()))?;
            (config, Some(path.to_path_buf()))
        } else {
            tracing::info!(path = %path.display(), "No config file found, using defaults");
            (RootConfig::default(), None)
        };

        apply_env_overrides(&mut config, env);

        let base_dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => std::env::current_dir().context("Failed to resolve current directory")?,
        };
        resolve_relative_paths(&mut config, &base_dir);

        Ok(LoadedConfig { config, source })
    }
}

/// Fills empty API keys from `GEMINI_API_KEY` / `GROQ_API_KEY`.
pub fn apply_env_overrides(config: &mut RootConfig, env: impl Fn(&str) -> Option<String>) {
    for kind in [ProviderKind::Gemini, ProviderKind::Groq] {
        let provider = config.providers.get_mut(kind);
        if provider.has_credentials() {
            continue;
        }
        if let Some(key) = env(kind.api_key_env()).filter(|k| !k.trim().is_empty()) {
            tracing::debug!(provider = %kind, "API key taken from environment");
            provider.api_key = key;
        }
    }
}

pub fn resolve_relative_paths(config: &mut RootConfig, base_dir: &Path) {
    for path in [&mut config.data.database_path, &mut config.data.schema_path] {
        if path.is_relative() {
            *path = base_dir.join(&*path);
        }
    }
}
