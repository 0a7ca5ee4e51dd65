//! Application configuration loading and validation.
//!
//! Reads `aichat.yaml` and resolves environment variables. Every key is
//! optional; a missing file yields the built-in defaults.
//!
//! ```yaml
//! default_model: claude-3-5-haiku-latest
//! max_chained_requests: 5
//! prefer_streaming: true
//! providers:
//!   anthropic:
//!     api_key: ${ANTHROPIC_API_KEY}
//!   local:
//!     base_url: ${OLLAMA_URL:-http://localhost:11434/v1}
//!     tool_call_format: pythonic
//! ```

use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

use crate::agents::{Model, Provider};
use crate::inference::ToolCallFormat;

/// Config file name searched for on disk.
pub const CONFIG_FILE_NAME: &str = "aichat.yaml";

/// Env var pointing straight at a config file.
pub const CONFIG_ENV_VAR: &str = "AICHAT_CONFIG";

// ─── Errors ──────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {reason}")]
    ReadFailed { path: String, reason: String },

    #[error("failed to parse {path}: {reason}")]
    ParseFailed { path: String, reason: String },

    #[error("invalid config: {reason}")]
    Invalid { reason: String },
}

// ─── Public Types ────────────────────────────────────────────────────────────

/// Top-level application configuration (mirrors `aichat.yaml`).
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Model used when the caller does not pick one.
    pub default_model: Model,
    /// Tool executions allowed per user turn before the loop stops.
    pub max_chained_requests: u32,
    /// Use streaming requests when the agent supports them.
    pub prefer_streaming: bool,
    /// Use the debug database file.
    pub debug: bool,
    pub database_path: Option<PathBuf>,
    pub mcp_servers_path: Option<PathBuf>,
    pub tool_call_timeout_ms: u64,
    pub providers: ProviderOverrides,
    pub agent_name: String,
    pub user_name: String,
    pub app_name: String,
    /// Directory relative paths are resolved against (the config file's).
    #[serde(skip)]
    pub base_dir: Option<PathBuf>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            default_model: Model::Gpt4oMini,
            max_chained_requests: 5,
            prefer_streaming: true,
            debug: false,
            database_path: None,
            mcp_servers_path: None,
            tool_call_timeout_ms: 30_000,
            providers: ProviderOverrides::default(),
            agent_name: "Agent".into(),
            user_name: "User".into(),
            app_name: "App".into(),
            base_dir: None,
        }
    }
}

/// Per-provider entries as written in the file. Absent fields keep the defaults.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ProviderOverrides {
    pub openai: ProviderOverride,
    pub anthropic: ProviderOverride,
    pub gemini: ProviderOverride,
    pub deepseek: ProviderOverride,
    pub local: ProviderOverride,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ProviderOverride {
    pub base_url: Option<String>,
    pub api_key: Option<String>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
    pub tool_call_format: Option<ToolCallFormat>,
}

/// Resolved connection settings for one provider.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderSettings {
    pub base_url: String,
    pub api_key: Option<String>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
    pub tool_call_format: ToolCallFormat,
}

impl ProviderSettings {
    /// Built-in settings for `provider`, with the key taken from its usual env var.
    pub fn defaults_for(provider: Provider) -> Self {
        let (base_url, key_var, max_tokens) = match provider {
            Provider::OpenAi => ("https://api.openai.com/v1", Some("OPENAI_API_KEY"), None),
            Provider::Anthropic => (
                "https://api.anthropic.com/v1",
                Some("ANTHROPIC_API_KEY"),
                Some(2048),
            ),
            Provider::Gemini => (
                "https://generativelanguage.googleapis.com/v1beta/openai",
                Some("GEMINI_API_KEY"),
                None,
            ),
            Provider::DeepSeek => ("https://api.deepseek.com", Some("DEEPSEEK_API_KEY"), None),
            Provider::Local | Provider::Dummy => ("http://localhost:11434/v1", None, None),
        };

        Self {
            base_url: base_url.to_string(),
            api_key: key_var.and_then(|v| non_empty(std::env::var(v).ok())),
            max_tokens,
            temperature: None,
            tool_call_format: ToolCallFormat::NativeJson,
        }
    }

    fn merged(mut self, over: &ProviderOverride) -> Self {
        if let Some(url) = non_empty(over.base_url.clone()) {
            self.base_url = url;
        }
        if over.api_key.is_some() {
            // An explicit empty key (unset `${VAR}`) means "no key".
            self.api_key = non_empty(over.api_key.clone());
        }
        self.max_tokens = over.max_tokens.or(self.max_tokens);
        self.temperature = over.temperature.or(self.temperature);
        self.tool_call_format = over.tool_call_format.unwrap_or(self.tool_call_format);
        self
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

impl AppConfig {
    /// Settings for `provider`: defaults with the file's overrides applied.
    pub fn provider(&self, provider: Provider) -> ProviderSettings {
        let over = match provider {
            Provider::OpenAi => &self.providers.openai,
            Provider::Anthropic => &self.providers.anthropic,
            Provider::Gemini => &self.providers.gemini,
            Provider::DeepSeek => &self.providers.deepseek,
            Provider::Local | Provider::Dummy => &self.providers.local,
        };
        ProviderSettings::defaults_for(provider).merged(over)
    }

    /// SQLite file: configured path, or `aichat.db` / `aichat_dbg.db` in `data_dir`.
    pub fn database_path(&self, data_dir: &Path) -> PathBuf {
        match &self.database_path {
            Some(p) => self.resolve(p),
            None if self.debug => data_dir.join("aichat_dbg.db"),
            None => data_dir.join("aichat.db"),
        }
    }

    /// Tool-server registry file: configured path, or `mcp_servers.json` in `data_dir`.
    pub fn mcp_servers_path(&self, data_dir: &Path) -> PathBuf {
        match &self.mcp_servers_path {
            Some(p) => self.resolve(p),
            None => data_dir.join("mcp_servers.json"),
        }
    }

    fn resolve(&self, path: &Path) -> PathBuf {
        let expanded = PathBuf::from(expand_tilde(&path.to_string_lossy()));
        match &self.base_dir {
            Some(base) if expanded.is_relative() => base.join(expanded),
            _ => expanded,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_chained_requests < 1 {
            return Err(ConfigError::Invalid {
                reason: "max_chained_requests must be at least 1".into(),
            });
        }
        if self.tool_call_timeout_ms == 0 {
            return Err(ConfigError::Invalid {
                reason: "tool_call_timeout_ms must be positive".into(),
            });
        }
        Ok(())
    }
}

// ─── Loading ─────────────────────────────────────────────────────────────────

/// Locate the config file.
///
/// Order: `AICHAT_CONFIG`, then `aichat.yaml` in `start` or any parent,
/// then `aichat.yaml` in `data_dir`.
pub fn find_config_path(start: &Path, data_dir: &Path) -> Option<PathBuf> {
    if let Ok(explicit) = std::env::var(CONFIG_ENV_VAR) {
        let candidate = PathBuf::from(expand_tilde(&explicit));
        if candidate.exists() {
            return Some(candidate);
        }
        tracing::warn!(path = %candidate.display(), "{CONFIG_ENV_VAR} points to a missing file");
    }

    let mut dir = start.to_path_buf();
    loop {
        let candidate = dir.join(CONFIG_FILE_NAME);
        if candidate.exists() {
            return Some(candidate);
        }
        if !dir.pop() {
            break;
        }
    }

    let candidate = data_dir.join(CONFIG_FILE_NAME);
    candidate.exists().then_some(candidate)
}

/// Load, interpolate and validate a config file.
///
/// String values may use `${VAR_NAME}` or `${VAR_NAME:-default}`.
pub fn load_config(path: &Path) -> Result<AppConfig, ConfigError> {
    let raw = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFailed {
        path: path.display().to_string(),
        reason: e.to_string(),
    })?;

    let interpolated = interpolate_env_vars(&raw);

    // An empty file is a valid, all-defaults config.
    let mut config: AppConfig = if interpolated.trim().is_empty() {
        AppConfig::default()
    } else {
        serde_yaml::from_str(&interpolated).map_err(|e| ConfigError::ParseFailed {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?
    };
    config.base_dir = path.parent().map(Path::to_path_buf);
    config.validate()?;
    Ok(config)
}

/// Find and load the config, or fall back to defaults when there is none.
pub fn load_or_default(start: &Path, data_dir: &Path) -> Result<AppConfig, ConfigError> {
    match find_config_path(start, data_dir) {
        Some(path) => {
            let config = load_config(&path)?;
            tracing::info!(path = %path.display(), model = %config.default_model, "loaded config");
            Ok(config)
        }
        None => {
            tracing::info!("no {CONFIG_FILE_NAME} found, using defaults");
            Ok(AppConfig::default())
        }
    }
}

// ─── Env-var interpolation ───────────────────────────────────────────────────

/// Replace `${VAR}` and `${VAR:-default}` in a string.
fn interpolate_env_vars(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && chars.peek() == Some(&'{') {
            chars.next();
            let mut var_expr = String::new();
            for c in chars.by_ref() {
                if c == '}' {
                    break;
                }
                var_expr.push(c);
            }
            result.push_str(&resolve_var_expr(&var_expr));
        } else {
            result.push(ch);
        }
    }

    result
}

/// Resolve `VAR` or `VAR:-default`. Empty values count as unset.
fn resolve_var_expr(expr: &str) -> String {
    match expr.split_once(":-") {
        Some((var_name, default)) => non_empty(std::env::var(var_name).ok())
            .unwrap_or_else(|| expand_tilde(default)),
        None => std::env::var(expr).unwrap_or_default(),
    }
}

/// Expand a leading `~` to the user's home directory.
pub fn expand_tilde(path: &str) -> String {
    if let Some(rest) = path.strip_prefix('~') {
        if let Some(home) = dirs::home_dir() {
            return format!("{}{rest}", home.display());
        }
    }
    path.to_string()
}

// ─── Tests ───────────────────────────────────────────────────────────────────
