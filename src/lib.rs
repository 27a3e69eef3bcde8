//! Re-exports from all modules

pub mod catalog;
mod client;
mod config;
mod credential;
mod factory;
mod logger;
mod message;
mod recorder;

use thiserror::Error;

/// Result type for modelgate operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for modelgate operations
#[derive(Debug, Error)]
pub enum Error {
    /// API error
    #[error("API error: {0}")]
    Api(String),

    /// HTTP client error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// No creation path exists for the configured provider
    #[error("Unsupported provider: {0}")]
    UnsupportedProvider(String),

    /// The configured model has no deployment mapping under the provider
    #[error("Unsupported model for {provider}: {model}")]
    UnsupportedModel {
        /// Creation path the model was requested under
        provider: &'static str,
        /// Model name with no mapping entry
        model: String,
    },

    /// Bearer-token acquisition failure
    #[error("Credential error: {0}")]
    Credential(String),

    /// Session capture/replay failure
    #[error("Recording error: {0}")]
    Recording(String),

    /// Filesystem error while persisting or loading a session
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub use client::{AzureOpenAIChatClient, ChatClient, OpenAIChatClient, StreamEvent};
pub use config::{ClientConfig, ModelInfo, Provider, RecorderConfig, RecorderMode};
pub use credential::{
    AccessToken, AzureCliCredential, BearerTokenProvider, ChainedTokenCredential,
    DefaultAzureCredential, DefaultAzureCredentialBuilder, EnvironmentCredential,
    ManagedIdentityCredential, TokenCredential,
};
pub use factory::{create_client, recording_plan, resolve_args, ClientFactory, RecorderSpec, ResolvedArgs};
pub use logger::{BufferLogger, Logger, TracingLogger};
pub use message::{CreateResult, Message, MessageRole, Usage};
pub use recorder::ChatClientRecorder;
