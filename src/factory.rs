//! Chat client construction
//!
//! Maps a [`ClientConfig`] to a ready-to-use chat client: resolves the
//! credential source, endpoint, deployment identifier, and per-model-family
//! tuning parameters, constructs the concrete client, logs the outcome, and
//! applies any configured recording wrapper.

use crate::catalog;
use crate::client::{AzureOpenAIChatClient, ChatClient, OpenAIChatClient};
use crate::config::{ClientConfig, ModelInfo, Provider, RecorderMode};
use crate::credential::{
    AzureCliCredential, BearerTokenProvider, ChainedTokenCredential, DefaultAzureCredential,
    TokenCredential,
};
use crate::logger::Logger;
use crate::recorder::ChatClientRecorder;
use crate::{Error, Result};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;

const OPENAI_PROVENANCE: &str = "  created through OpenAI";
const AZURE_OPENAI_PROVENANCE: &str = "  created through Azure OpenAI";
const TRAPI_PROVENANCE: &str = "  created through TRAPI";

/// Arguments handed to a client constructor.
///
/// Serialization omits unset fields and never emits the API key or the token
/// provider, so a dump of this struct is safe to log as-is.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ResolvedArgs {
    /// Model identifier
    pub model: String,

    /// Reasoning effort (reasoning-family models only)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning_effort: Option<String>,

    /// Completion token limit (sampling-family models only)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_completion_tokens: Option<u32>,

    /// Rate-limit retry budget (sampling-family models only)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_retries: Option<u32>,

    /// Sampling temperature (sampling-family models only)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,

    /// Presence penalty (sampling-family models only)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub presence_penalty: Option<f64>,

    /// Frequency penalty (sampling-family models only)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub frequency_penalty: Option<f64>,

    /// Nucleus sampling cutoff (sampling-family models only)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,

    /// Credential for the direct-API and phi paths; never serialized
    #[serde(skip_serializing)]
    pub api_key: Option<String>,

    /// Base URL override
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,

    /// Deployment name at the resolved endpoint
    #[serde(skip_serializing_if = "Option::is_none")]
    pub azure_deployment: Option<String>,

    /// Endpoint URL serving the deployment
    #[serde(skip_serializing_if = "Option::is_none")]
    pub azure_endpoint: Option<String>,

    /// API version pinned for the endpoint
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_version: Option<String>,

    /// Explicit model version, forwarded for select deployments
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_version: Option<String>,

    /// Capability descriptor for models the client cannot introspect
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_info: Option<ModelInfo>,

    /// Bearer-token source for the Azure-backed paths; not part of the dump
    #[serde(skip)]
    pub token_provider: Option<BearerTokenProvider>,
}

impl ResolvedArgs {
    /// Indented `key: value` lines with unset fields and credentials omitted
    pub fn redacted_lines(&self) -> Result<Vec<String>> {
        let value = serde_json::to_value(self)?;
        let mut lines = Vec::new();
        if let serde_json::Value::Object(map) = value {
            for (key, val) in map {
                let rendered = match val {
                    serde_json::Value::String(s) => s,
                    other => other.to_string(),
                };
                lines.push(format!("    {}: {}", key, rendered));
            }
        }
        Ok(lines)
    }
}

fn require<T>(value: Option<T>, key: &str) -> Result<T> {
    value.ok_or_else(|| Error::Config(format!("missing required config key: {}", key)))
}

/// Resolve constructor arguments and the provenance tag for a configuration.
///
/// Pure with respect to the network: credential providers are constructed but
/// fetch nothing until the client issues its first request.
pub fn resolve_args(config: &ClientConfig) -> Result<(ResolvedArgs, &'static str)> {
    let mut args = base_args(config)?;
    let provider: Provider = config.provider.parse()?;
    let provenance = match provider {
        Provider::OpenAI => resolve_openai(config, &mut args),
        Provider::AzureOpenAI => resolve_azure_openai(config, &mut args)?,
        Provider::Trapi => resolve_trapi(config, &mut args)?,
        Provider::Phi => resolve_phi(config, &mut args),
    };
    Ok((args, provenance))
}

/// Shared argument set; the reasoning and sampling families are disjoint.
fn base_args(config: &ClientConfig) -> Result<ResolvedArgs> {
    let mut args = ResolvedArgs {
        model: config.model.clone(),
        ..Default::default()
    };
    if catalog::is_reasoning_model(&config.model) {
        args.reasoning_effort =
            Some(require(config.reasoning_effort.clone(), "reasoning_effort")?);
    } else {
        args.max_completion_tokens =
            Some(require(config.max_completion_tokens, "max_completion_tokens")?);
        args.max_retries = Some(require(config.max_retries, "max_retries")?);
        args.temperature = Some(require(config.temperature, "temperature")?);
        args.presence_penalty = Some(require(config.presence_penalty, "presence_penalty")?);
        args.frequency_penalty = Some(require(config.frequency_penalty, "frequency_penalty")?);
        args.top_p = Some(require(config.top_p, "top_p")?);
    }
    Ok(args)
}

fn resolve_openai(config: &ClientConfig, args: &mut ResolvedArgs) -> &'static str {
    if let Some(key) = &config.api_key {
        args.api_key = Some(key.clone());
    }
    if let Some(base) = &config.base_url {
        args.base_url = Some(base.clone());
    }
    OPENAI_PROVENANCE
}

fn resolve_azure_openai(config: &ClientConfig, args: &mut ResolvedArgs) -> Result<&'static str> {
    let deployment = catalog::azure_openai_deployment(&config.model).ok_or_else(|| {
        Error::UnsupportedModel {
            provider: Provider::AzureOpenAI.as_str(),
            model: config.model.clone(),
        }
    })?;

    let credential: Arc<dyn TokenCredential> = Arc::new(DefaultAzureCredential::new());
    args.token_provider = Some(BearerTokenProvider::new(
        credential,
        catalog::AZURE_COGNITIVE_SCOPE,
    ));
    args.azure_deployment = Some(deployment.deployment.to_string());
    args.azure_endpoint = Some(deployment.endpoint.to_string());
    args.api_version = Some(catalog::AZURE_OPENAI_API_VERSION.to_string());
    Ok(AZURE_OPENAI_PROVENANCE)
}

fn resolve_trapi(config: &ClientConfig, args: &mut ResolvedArgs) -> Result<&'static str> {
    let deployment =
        catalog::trapi_deployment(&config.model).ok_or_else(|| Error::UnsupportedModel {
            provider: Provider::Trapi.as_str(),
            model: config.model.clone(),
        })?;

    // CLI first; the default chain keeps only managed identity as a fallback.
    let sources: Vec<Arc<dyn TokenCredential>> = vec![
        Arc::new(AzureCliCredential),
        Arc::new(
            DefaultAzureCredential::builder()
                .exclude_cli_credential()
                .exclude_environment_credential()
                .build(),
        ),
    ];
    let credential: Arc<dyn TokenCredential> = Arc::new(ChainedTokenCredential::new(sources));
    args.token_provider = Some(BearerTokenProvider::new(credential, catalog::TRAPI_SCOPE));
    args.azure_deployment = Some(deployment.deployment.to_string());
    // The model version is forwarded for o3-mini only.
    if config.model == "o3-mini" {
        args.model_version = deployment.model_version.map(str::to_string);
    }
    args.azure_endpoint = Some(catalog::trapi_endpoint());
    args.api_version = Some(catalog::TRAPI_API_VERSION.to_string());
    Ok(TRAPI_PROVENANCE)
}

fn resolve_phi(config: &ClientConfig, args: &mut ResolvedArgs) -> &'static str {
    args.api_key = std::env::var(catalog::PHI_API_KEY_ENV).ok();
    args.base_url = Some(catalog::PHI_BASE_URL.to_string());
    // The gateway's models are unknown to client capability tables, so a
    // descriptor always rides along; configuration may supply its own.
    args.model_info = Some(
        config
            .model_info
            .clone()
            .unwrap_or_else(catalog::phi_model_info),
    );
    AZURE_OPENAI_PROVENANCE
}

/// A recording wrapper to apply: mode plus the session file it targets
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecorderSpec {
    /// Capture or replay
    pub mode: RecorderMode,
    /// Session file the wrapper reads or writes
    pub session: PathBuf,
}

/// Which recording wrappers apply, in application order.
///
/// The `ChatCompletionClientRecorder` entry is honored only when enabled and
/// names its session through `session_name`. A `ClientRecorder` entry applies
/// regardless of its own flag and names its session through
/// `session_filename`.
pub fn recording_plan(config: &ClientConfig) -> Result<Vec<RecorderSpec>> {
    let mut plan = Vec::new();
    if let Some(recorder) = &config.chat_completion_client_recorder {
        if recorder.enabled {
            plan.push(RecorderSpec {
                mode: recorder.mode,
                session: PathBuf::from(require(recorder.session_name.clone(), "session_name")?),
            });
        }
    }
    if let Some(recorder) = &config.client_recorder {
        plan.push(RecorderSpec {
            mode: recorder.mode,
            session: PathBuf::from(require(
                recorder.session_filename.clone(),
                "session_filename",
            )?),
        });
    }
    Ok(plan)
}

/// Builds chat clients from a configuration record
pub struct ClientFactory {
    config: ClientConfig,
    logger: Arc<dyn Logger>,
}

impl ClientFactory {
    /// Factory over a configuration and a log sink
    pub fn new(config: ClientConfig, logger: Arc<dyn Logger>) -> Self {
        Self { config, logger }
    }

    /// Construct the configured client, log its provenance and resolved
    /// arguments, and apply any recording wrappers.
    pub fn create_client(&self) -> Result<Box<dyn ChatClient>> {
        self.logger.enter_function("create_client");
        let result = self.create_client_inner();
        self.logger.leave_function("create_client");
        result
    }

    fn create_client_inner(&self) -> Result<Box<dyn ChatClient>> {
        let (args, provenance) = resolve_args(&self.config)?;
        let provider: Provider = self.config.provider.parse()?;

        let mut client: Box<dyn ChatClient> = match provider {
            Provider::OpenAI | Provider::Phi => Box::new(OpenAIChatClient::new(&args)?),
            Provider::AzureOpenAI | Provider::Trapi => {
                Box::new(AzureOpenAIChatClient::new(&args)?)
            }
        };

        self.logger
            .info(&format!("Client:  {}", client.resolved_model()));
        self.logger.info(provenance);
        self.logger.info(&format!(
            "  Client args:\n{}",
            args.redacted_lines()?.join("\n")
        ));

        for spec in recording_plan(&self.config)? {
            client = Box::new(ChatClientRecorder::new(
                client,
                spec.mode,
                spec.session,
                Arc::clone(&self.logger),
            )?);
        }

        Ok(client)
    }
}

/// Convenience wrapper over [`ClientFactory`]
pub fn create_client(
    config: &ClientConfig,
    logger: Arc<dyn Logger>,
) -> Result<Box<dyn ChatClient>> {
    ClientFactory::new(config.clone(), logger).create_client()
}
