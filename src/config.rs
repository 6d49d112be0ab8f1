//! Configuration parsing and validation for chat-relay.

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::path::Path;

/// Environment variable consulted when no `api_key` is configured.
pub const CONVENTION_API_KEY_VAR: &str = "OPENAI_API_KEY";

/// Root configuration structure.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub upstream: UpstreamConfig,
    #[serde(default)]
    pub models: ModelsConfig,
    #[serde(default)]
    pub limits: LimitsConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// HTTP server configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Address to listen on (e.g., "0.0.0.0:3000")
    #[serde(default = "default_listen")]
    pub listen: String,
}

fn default_listen() -> String {
    "0.0.0.0:3000".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
        }
    }
}

/// Outbound request body layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RequestShape {
    /// `{ model, input: "<text>" }`
    #[default]
    Prompt,
    /// `{ model, messages: [{ role, content }] }`
    Conversation,
}

/// Upstream text-generation endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct UpstreamConfig {
    /// Full endpoint URL the relay POSTs to
    #[serde(default = "default_upstream_url")]
    pub url: String,
    /// Bearer credential
    pub api_key: Option<ApiKey>,
    #[serde(default)]
    pub shape: RequestShape,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
}

fn default_upstream_url() -> String {
    "https://api.openai.com/v1/responses".to_string()
}

fn default_timeout_secs() -> u64 {
    120
}

fn default_connect_timeout_secs() -> u64 {
    10
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            url: default_upstream_url(),
            api_key: None,
            shape: RequestShape::default(),
            timeout_secs: default_timeout_secs(),
            connect_timeout_secs: default_connect_timeout_secs(),
        }
    }
}

/// Candidate models and fallback policy.
#[derive(Debug, Clone, Deserialize)]
pub struct ModelsConfig {
    /// Candidate order used when the caller supplies none
    #[serde(default = "default_models")]
    pub default: Vec<String>,
    /// Treat any 404 as a missing model, even without a model-related message
    #[serde(default = "default_true")]
    pub retry_on_not_found: bool,
    /// Fall back past transport failures, 429 and 5xx responses
    #[serde(default = "default_true")]
    pub retry_on_server_error: bool,
}

pub fn default_models() -> Vec<String> {
    vec![
        "gpt-4o-mini".to_string(),
        "gpt-4.1-mini".to_string(),
        "gpt-3.5-turbo".to_string(),
    ]
}

impl Default for ModelsConfig {
    fn default() -> Self {
        Self {
            default: default_models(),
            retry_on_not_found: true,
            retry_on_server_error: true,
        }
    }
}

/// Inbound payload limits.
#[derive(Debug, Clone, Deserialize)]
pub struct LimitsConfig {
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
}

fn default_max_body_bytes() -> usize {
    20 * 1024
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_body_bytes: default_max_body_bytes(),
        }
    }
}

/// API key wrapper that redacts in Debug/Display/Serialize and zeroizes on drop.
#[derive(Clone)]
pub struct ApiKey(SecretString);

impl ApiKey {
    /// Access the raw key value. Every call site is auditable via `grep expose_secret`.
    pub fn expose_secret(&self) -> &str {
        self.0.expose_secret()
    }
}

impl std::fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[REDACTED]")
    }
}

impl std::fmt::Display for ApiKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[REDACTED]")
    }
}

impl Serialize for ApiKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str("[REDACTED]")
    }
}

impl<'de> serde::Deserialize<'de> for ApiKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        String::deserialize(deserializer).map(|s| ApiKey(SecretString::from(s)))
    }
}

impl From<String> for ApiKey {
    fn from(s: String) -> Self {
        ApiKey(SecretString::from(s))
    }
}

impl From<&str> for ApiKey {
    fn from(s: &str) -> Self {
        ApiKey(SecretString::from(s))
    }
}

/// How the upstream API key was resolved.
#[derive(Debug, Clone, PartialEq)]
pub enum KeySource {
    /// Key was a literal string in config (no ${} references)
    Literal,
    /// Key contained ${VAR} references expanded from environment
    EnvExpanded,
    /// Key was auto-discovered from convention env var (holds var name)
    Convention(String),
    /// No key available
    None,
}

impl std::fmt::Display for KeySource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            KeySource::Literal => write!(f, "config-literal"),
            KeySource::EnvExpanded => write!(f, "env-expanded"),
            KeySource::Convention(var) => write!(f, "convention ({})", var),
            KeySource::None => write!(f, "none"),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_true() -> bool {
    true
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Config {
    /// Parse configuration from a TOML string, without env var expansion.
    pub fn parse_str(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content).map_err(ConfigError::Parse)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    fn validate(&self) -> Result<(), ConfigError> {
        if self.upstream.url.is_empty() {
            return Err(ConfigError::Validation("upstream.url is empty".to_string()));
        }

        if self.models.default.is_empty() {
            return Err(ConfigError::Validation(
                "models.default must list at least one model".to_string(),
            ));
        }

        if self.models.default.iter().any(|m| m.trim().is_empty()) {
            return Err(ConfigError::Validation(
                "models.default contains an empty model name".to_string(),
            ));
        }

        if self.limits.max_body_bytes == 0 {
            return Err(ConfigError::Validation(
                "limits.max_body_bytes must be greater than zero".to_string(),
            ));
        }

        Ok(())
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Configuration validation error: {0}")]
    Validation(String),

    #[error("Environment variable '{var}' not set for '{field}': {message}")]
    EnvVar {
        var: String,
        field: String,
        message: String,
    },
}

/// Raw upstream config deserialized directly from TOML.
/// `url` and `api_key` may contain `${VAR}` references not yet expanded.
#[derive(Deserialize)]
pub struct RawUpstreamConfig {
    #[serde(default = "default_upstream_url")]
    url: String,
    api_key: Option<String>,
    #[serde(default)]
    shape: RequestShape,
    #[serde(default = "default_timeout_secs")]
    timeout_secs: u64,
    #[serde(default = "default_connect_timeout_secs")]
    connect_timeout_secs: u64,
}

impl Default for RawUpstreamConfig {
    fn default() -> Self {
        Self {
            url: default_upstream_url(),
            api_key: None,
            shape: RequestShape::default(),
            timeout_secs: default_timeout_secs(),
            connect_timeout_secs: default_connect_timeout_secs(),
        }
    }
}

/// Raw configuration deserialized directly from TOML.
#[derive(Deserialize)]
pub struct RawConfig {
    #[serde(default)]
    server: ServerConfig,
    #[serde(default)]
    upstream: RawUpstreamConfig,
    #[serde(default)]
    models: ModelsConfig,
    #[serde(default)]
    limits: LimitsConfig,
    #[serde(default)]
    logging: LoggingConfig,
}

/// Expand all `${VAR}` references in a string using a custom lookup function.
///
/// Supports multiple `${VAR}` in one string (e.g., `${SCHEME}://${HOST}/v1`).
/// Fails on first missing variable, unclosed `${`, or empty variable name.
fn expand_env_vars_with<F>(input: &str, field: &str, lookup: F) -> Result<String, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    if !input.contains("${") {
        return Ok(input.to_string());
    }

    let mut result = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(start) = rest.find("${") {
        result.push_str(&rest[..start]);
        let after = &rest[start + 2..];

        let end = after.find('}').ok_or_else(|| ConfigError::EnvVar {
            var: "<unclosed>".to_string(),
            field: field.to_string(),
            message: format!("Unclosed '${{' in config value for '{}'", field),
        })?;

        let var_name = &after[..end];
        if var_name.is_empty() {
            return Err(ConfigError::EnvVar {
                var: "".to_string(),
                field: field.to_string(),
                message: "Empty variable name in '${}' reference".to_string(),
            });
        }

        let value = lookup(var_name).ok_or_else(|| ConfigError::EnvVar {
            var: var_name.to_string(),
            field: field.to_string(),
            message: format!(
                "Environment variable '{}' is not set (referenced in '{}')",
                var_name, field
            ),
        })?;

        result.push_str(&value);
        rest = &after[end + 1..];
    }

    result.push_str(rest);
    Ok(result)
}

fn expand_env_vars(input: &str, field: &str) -> Result<String, ConfigError> {
    expand_env_vars_with(input, field, |name| std::env::var(name).ok())
}

/// Resolve the upstream key against an environment lookup.
fn resolve_api_key<F>(
    raw_key: Option<&str>,
    lookup: F,
) -> Result<(Option<ApiKey>, KeySource), ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match raw_key {
        Some(raw) if raw.contains("${") => {
            let expanded = expand_env_vars_with(raw, "upstream.api_key", &lookup)?;
            if expanded.is_empty() {
                return Ok((None, KeySource::None));
            }
            Ok((Some(ApiKey::from(expanded)), KeySource::EnvExpanded))
        }
        Some("") => Ok((None, KeySource::None)),
        Some(raw) => Ok((Some(ApiKey::from(raw)), KeySource::Literal)),
        None => match lookup(CONVENTION_API_KEY_VAR).filter(|v| !v.is_empty()) {
            Some(value) => Ok((
                Some(ApiKey::from(value)),
                KeySource::Convention(CONVENTION_API_KEY_VAR.to_string()),
            )),
            None => Ok((None, KeySource::None)),
        },
    }
}

impl Config {
    /// Convert raw (deserialized) config to final config with env var expansion.
    ///
    /// - `upstream.url` has its `${VAR}` references expanded
    /// - `upstream.api_key` with `${VAR}`: expanded, source = `EnvExpanded`
    /// - `upstream.api_key` literal: wrapped directly, source = `Literal`
    /// - `upstream.api_key` absent: `OPENAI_API_KEY`, source = `Convention` or `None`
    pub fn from_raw(raw: RawConfig) -> Result<(Self, KeySource), ConfigError> {
        let url = expand_env_vars(&raw.upstream.url, "upstream.url")?;
        let (api_key, key_source) =
            resolve_api_key(raw.upstream.api_key.as_deref(), |name| {
                std::env::var(name).ok()
            })?;

        let config = Config {
            server: raw.server,
            upstream: UpstreamConfig {
                url,
                api_key,
                shape: raw.upstream.shape,
                timeout_secs: raw.upstream.timeout_secs,
                connect_timeout_secs: raw.upstream.connect_timeout_secs,
            },
            models: raw.models,
            limits: raw.limits,
            logging: raw.logging,
        };

        Ok((config, key_source))
    }

    /// Load configuration from a TOML file with environment variable expansion.
    ///
    /// Reads the file, parses it as `RawConfig`, expands `${VAR}` references,
    /// applies the `OPENAI_API_KEY` convention and validates the result.
    pub fn from_file_with_env(path: impl AsRef<Path>) -> Result<(Self, KeySource), ConfigError> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| ConfigError::Io {
            path: path.as_ref().display().to_string(),
            source: e,
        })?;

        let raw: RawConfig = toml::from_str(&content).map_err(ConfigError::Parse)?;
        let (config, key_source) = Self::from_raw(raw)?;
        config.validate()?;

        Ok((config, key_source))
    }

    /// Build configuration purely from the environment.
    ///
    /// Uses built-in defaults, the `OPENAI_API_KEY` convention for the
    /// credential and `PORT` for the listen port.
    pub fn from_env() -> Result<(Self, KeySource), ConfigError> {
        let mut raw: RawConfig = toml::from_str("").map_err(ConfigError::Parse)?;
        if let Ok(port) = std::env::var("PORT") {
            raw.server.listen = format!("0.0.0.0:{}", port);
        }

        let (config, key_source) = Self::from_raw(raw)?;
        config.validate()?;

        Ok((config, key_source))
    }
}
