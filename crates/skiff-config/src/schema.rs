// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use serde::{Deserialize, Serialize};

/// Serde default helper — returns `true`.
///
/// Used for config fields that should be enabled unless the user explicitly
/// sets them to `false`.  `#[serde(default)]` on a `bool` always falls back
/// to `bool::default()` (i.e. `false`), so a named function is required.
fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub provider: ProviderConfig,
    #[serde(default)]
    pub middleware: MiddlewareConfig,
    #[serde(default)]
    pub approval: ApprovalConfig,
    #[serde(default)]
    pub cloud: CloudConfig,
}

/// HTTP listener settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Bind host.  Use `0.0.0.0` to accept external connections.
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Allowed CORS origins.  Empty → allow any origin (development default).
    #[serde(default)]
    pub cors_origins: Vec<String>,
}

fn default_host() -> String {
    "0.0.0.0".into()
}

fn default_port() -> u16 {
    8000
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            cors_origins: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Provider identifier: "deepseek" | "openai" | "mock".
    pub provider: String,
    /// Model name forwarded to the provider API.  When empty the provider's
    /// default model is used (e.g. `deepseek-chat`).
    #[serde(default)]
    pub model: String,
    /// Environment variable that holds the API key (read at runtime).
    pub api_key_env: Option<String>,
    /// Explicit API key; prefer api_key_env in config files to avoid secrets
    /// in version-controlled files.
    pub api_key: Option<String>,
    /// Base URL override.  Useful for local proxies or OpenAI-compatible
    /// servers; the hosted default is auto-selected per provider.
    pub base_url: Option<String>,
    /// Maximum tokens to request in a single completion.
    pub max_tokens: Option<u32>,
    /// Sampling temperature.  Clamped to the provider's documented range
    /// before each request.
    pub temperature: Option<f32>,
    /// Approximate prompt-token budget.  When set, oldest non-system messages
    /// are dropped until the serialized request fits.
    pub prompt_token_budget: Option<usize>,
    /// Send `parallel_tool_calls: false` with every tool-bearing request.
    #[serde(default)]
    pub disable_parallel_tool_calls: bool,
    /// Additional HTTP headers sent on every provider request.
    #[serde(default)]
    pub extra_headers: Vec<(String, String)>,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            provider: "deepseek".into(),
            model: String::new(),
            // api_key_env is intentionally None here.  The adapter factory
            // falls through to the canonical env-var name for each provider
            // (DEEPSEEK_API_KEY, OPENAI_API_KEY).
            api_key_env: None,
            api_key: None,
            base_url: None,
            max_tokens: None,
            temperature: None,
            prompt_token_budget: None,
            disable_parallel_tool_calls: false,
            extra_headers: Vec::new(),
        }
    }
}

/// Settings for the built-in middleware chain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MiddlewareConfig {
    /// Log every request start/finish with structured fields.
    #[serde(default = "default_true")]
    pub request_logging: bool,
    /// Collect request/latency/message counters.
    #[serde(default = "default_true")]
    pub metrics: bool,
    /// API keys accepted by the authentication middleware.  Empty → auth is
    /// disabled and every request passes.
    #[serde(default)]
    pub api_keys: Vec<String>,
    /// Per-thread request cap inside a sliding 60-second window.
    /// `None` disables rate limiting.
    pub rate_limit_per_minute: Option<u32>,
}

impl Default for MiddlewareConfig {
    fn default() -> Self {
        Self {
            request_logging: true,
            metrics: true,
            api_keys: Vec::new(),
            rate_limit_per_minute: None,
        }
    }
}

/// Which user interaction drives a gated tool-call decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalStrategyConfig {
    /// Pending calls wait in a queue for an explicit decision endpoint call.
    #[default]
    Queue,
    /// Same queue, but the prompt also asks the user to reply y/n in chat and
    /// a decision action resolves the pending call from the next user turn.
    Conversational,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalConfig {
    /// Action names that must be approved before their handler runs.
    #[serde(default)]
    pub required: Vec<String>,
    /// Maximum number of simultaneously pending approvals.  Enqueueing past
    /// this bound fails fast with an error result.
    #[serde(default = "default_capacity")]
    pub capacity: usize,
    #[serde(default)]
    pub strategy: ApprovalStrategyConfig,
}

fn default_capacity() -> usize {
    100
}

impl Default for ApprovalConfig {
    fn default() -> Self {
        Self {
            required: Vec::new(),
            capacity: default_capacity(),
            strategy: ApprovalStrategyConfig::Queue,
        }
    }
}

/// Cloud-side services (currently only the guardrails endpoint).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CloudConfig {
    /// Guardrails API base URL.  The `COPILOT_CLOUD_BASE_URL` environment
    /// variable takes precedence over this value.
    #[serde(default = "default_cloud_base_url")]
    pub base_url: String,
}

fn default_cloud_base_url() -> String {
    "https://api.cloud.copilotkit.ai".into()
}

impl Default for CloudConfig {
    fn default() -> Self {
        Self {
            base_url: default_cloud_base_url(),
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_deepseek() {
        let c = Config::default();
        assert_eq!(c.provider.provider, "deepseek");
        assert!(c.provider.model.is_empty());
    }

    #[test]
    fn default_server_binds_all_interfaces_on_8000() {
        let s = ServerConfig::default();
        assert_eq!(s.host, "0.0.0.0");
        assert_eq!(s.port, 8000);
    }

    #[test]
    fn empty_yaml_deserializes_to_defaults() {
        let c: Config = serde_yaml::from_str("{}").unwrap();
        assert_eq!(c.approval.capacity, 100);
        assert_eq!(c.approval.strategy, ApprovalStrategyConfig::Queue);
        assert!(c.middleware.request_logging);
        assert!(c.middleware.api_keys.is_empty());
    }

    #[test]
    fn approval_strategy_parses_snake_case() {
        let c: ApprovalConfig =
            serde_yaml::from_str("strategy: conversational\nrequired: [delete_file]").unwrap();
        assert_eq!(c.strategy, ApprovalStrategyConfig::Conversational);
        assert_eq!(c.required, vec!["delete_file"]);
    }

    #[test]
    fn middleware_defaults_enable_logging_and_metrics() {
        let m: MiddlewareConfig = serde_yaml::from_str("{}").unwrap();
        assert!(m.request_logging);
        assert!(m.metrics);
        assert!(m.rate_limit_per_minute.is_none());
    }

    #[test]
    fn cloud_base_url_has_hosted_default() {
        let c = CloudConfig::default();
        assert!(c.base_url.starts_with("https://"));
    }

    #[test]
    fn config_round_trips_through_yaml() {
        let mut c = Config::default();
        c.middleware.api_keys = vec!["sk-1".into()];
        c.approval.required = vec!["send_email".into()];
        let yaml = serde_yaml::to_string(&c).unwrap();
        let back: Config = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(back.middleware.api_keys, vec!["sk-1"]);
        assert_eq!(back.approval.required, vec!["send_email"]);
    }
}
