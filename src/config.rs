//! Client factory configuration
//!
//! `ClientConfig` mirrors the configuration record handed to the factory: the
//! provider name, the model, family-dependent tuning parameters, and optional
//! recording sub-configurations. Files load from YAML or TOML; keys the crate
//! does not interpret are preserved in declaration order.

use crate::{Error, Result};
use anyhow::Context;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;

/// Client creation path
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provider {
    /// Direct OpenAI API
    OpenAI,
    /// Azure OpenAI deployment
    AzureOpenAI,
    /// TRAPI research gateway
    Trapi,
    /// Phi inference gateway
    Phi,
}

impl Provider {
    /// Configuration string for this creation path
    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::OpenAI => "openai",
            Provider::AzureOpenAI => "azure_openai",
            Provider::Trapi => "trapi",
            Provider::Phi => "phi",
        }
    }
}

impl FromStr for Provider {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "openai" => Ok(Provider::OpenAI),
            "azure_openai" => Ok(Provider::AzureOpenAI),
            "trapi" => Ok(Provider::Trapi),
            "phi" => Ok(Provider::Phi),
            other => Err(Error::UnsupportedProvider(other.to_string())),
        }
    }
}

/// Recording wrapper mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecorderMode {
    /// Forward calls and capture each exchange
    Record,
    /// Serve captured exchanges without network access
    Replay,
}

impl RecorderMode {
    /// Configuration string for this mode
    pub fn as_str(&self) -> &'static str {
        match self {
            RecorderMode::Record => "record",
            RecorderMode::Replay => "replay",
        }
    }
}

/// Recording sub-configuration.
///
/// The `ChatCompletionClientRecorder` key honors `enabled` and names its
/// session through `session_name`; the legacy `ClientRecorder` key is applied
/// whenever present, whatever its flag says, and names its session through
/// `session_filename`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecorderConfig {
    /// Whether the wrapper applies (ignored by the legacy key)
    #[serde(default)]
    pub enabled: bool,

    /// Capture or replay
    pub mode: RecorderMode,

    /// Session identifier read by the gated wrapper
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_name: Option<String>,

    /// Session file read by the legacy wrapper
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_filename: Option<String>,
}

/// Capability descriptor for models the client library cannot introspect
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelInfo {
    /// Accepts image content
    pub vision: bool,
    /// Supports tool/function calling
    pub function_calling: bool,
    /// Can be asked for JSON output
    pub json_output: bool,
    /// Supports schema-constrained output
    pub structured_output: bool,
    /// Accepts more than one system message per request
    pub multiple_system_messages: bool,
    /// Model family tag
    pub family: String,
}

impl Default for ModelInfo {
    /// Permissive descriptor for models the catalog does not pin down
    fn default() -> Self {
        Self {
            vision: false,
            function_calling: true,
            json_output: true,
            structured_output: true,
            multiple_system_messages: true,
            family: "unknown".to_string(),
        }
    }
}

/// Configuration record consumed by the client factory
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Provider name, resolved to a creation path at client-creation time
    pub provider: String,

    /// Model identifier
    pub model: String,

    /// Reasoning-effort setting, consumed by reasoning-family models
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning_effort: Option<String>,

    /// Completion token limit (sampling-family models)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_completion_tokens: Option<u32>,

    /// Rate-limit retry budget (sampling-family models)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_retries: Option<u32>,

    /// Sampling temperature (sampling-family models)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,

    /// Presence penalty (sampling-family models)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub presence_penalty: Option<f64>,

    /// Frequency penalty (sampling-family models)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frequency_penalty: Option<f64>,

    /// Nucleus sampling cutoff (sampling-family models)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,

    /// API key for the direct-API path
    #[serde(default, skip_serializing)]
    pub api_key: Option<String>,

    /// Base URL override, honored on the direct-API path
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,

    /// Explicit capability descriptor for models the client library does not
    /// recognize
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_info: Option<ModelInfo>,

    /// Gated recording wrapper
    #[serde(
        rename = "ChatCompletionClientRecorder",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub chat_completion_client_recorder: Option<RecorderConfig>,

    /// Legacy recording wrapper, applied whenever present
    #[serde(
        rename = "ClientRecorder",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub client_recorder: Option<RecorderConfig>,

    /// Keys this crate does not interpret, kept in declaration order
    #[serde(flatten)]
    pub extra: IndexMap<String, serde_json::Value>,
}

impl ClientConfig {
    /// Minimal configuration for a provider/model pair; tuning fields start
    /// unset
    pub fn new(provider: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            model: model.into(),
            ..Default::default()
        }
    }

    /// Parse a YAML configuration document
    pub fn from_yaml_str(text: &str) -> anyhow::Result<Self> {
        serde_yaml::from_str(text).context("parsing YAML client configuration")
    }

    /// Parse a TOML configuration document
    pub fn from_toml_str(text: &str) -> anyhow::Result<Self> {
        toml::from_str(text).context("parsing TOML client configuration")
    }

    /// Load a YAML configuration file
    pub fn from_yaml_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        Self::from_yaml_str(&text)
    }

    /// Load a TOML configuration file
    pub fn from_toml_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        Self::from_toml_str(&text)
    }

    /// Load configuration from the default locations: `./modelgate.yaml`
    /// first, then `<config dir>/modelgate/config.yaml`.
    pub fn load_default() -> anyhow::Result<Self> {
        let local = Path::new("modelgate.yaml");
        if local.exists() {
            return Self::from_yaml_file(local);
        }
        if let Some(dir) = dirs::config_dir() {
            let global = dir.join("modelgate").join("config.yaml");
            if global.exists() {
                return Self::from_yaml_file(&global);
            }
        }
        anyhow::bail!(
            "no modelgate.yaml in the working directory or the user config directory"
        )
    }
}
