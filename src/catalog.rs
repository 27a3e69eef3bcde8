//! Static deployment catalog for the gateway-backed providers
//!
//! Endpoint URLs, API versions, and deployment names are external contract
//! values, reproduced verbatim and resolved by exact match. Keeping them in
//! lookup tables (rather than chained conditionals) makes each (provider,
//! model) pair inspectable and testable on its own.

use crate::config::ModelInfo;

/// Token scope for Azure OpenAI deployments
pub const AZURE_COGNITIVE_SCOPE: &str = "https://cognitiveservices.azure.com/.default";

/// Token scope for the TRAPI gateway
pub const TRAPI_SCOPE: &str = "api://trapi/.default";

/// Azure OpenAI API version (latest GA release at the time of pinning)
pub const AZURE_OPENAI_API_VERSION: &str = "2024-12-01-preview";

/// TRAPI API version
pub const TRAPI_API_VERSION: &str = "2025-03-01-preview";

/// TRAPISuffix (without /openai) from the table at https://aka.ms/trapi/models
pub const TRAPI_SUFFIX: &str = "msraif/shared";

/// Base URL of the phi inference gateway
pub const PHI_BASE_URL: &str = "https://gateway.phyagi.net/api";

/// Environment variable supplying the phi gateway credential
pub const PHI_API_KEY_ENV: &str = "PHYAGI_API_KEY";

/// An Azure OpenAI deployment entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AzureDeployment {
    /// Model name as it appears in configuration
    pub model: &'static str,
    /// Deployment name hosted at the endpoint
    pub deployment: &'static str,
    /// Endpoint URL serving the deployment
    pub endpoint: &'static str,
}

/// Azure OpenAI deployments by model name
pub const AZURE_OPENAI_DEPLOYMENTS: &[AzureDeployment] = &[
    AzureDeployment {
        model: "gpt-4o-2024-11-20",
        deployment: "gpt-4o",
        endpoint: "https://agentic1.openai.azure.com/", // also on agentic2
    },
    AzureDeployment {
        model: "gpt-4.1",
        deployment: "gpt-4.1",
        endpoint: "https://aipmaker.openai.azure.com/",
    },
];

/// A TRAPI deployment entry; DeploymentName from the table at
/// https://aka.ms/trapi/models
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrapiDeployment {
    /// Model name as it appears in configuration
    pub model: &'static str,
    /// Deployment name at the TRAPI endpoint
    pub deployment: &'static str,
    /// Explicit model version carried by some deployments
    pub model_version: Option<&'static str>,
}

/// TRAPI deployments by model name
pub const TRAPI_DEPLOYMENTS: &[TrapiDeployment] = &[
    TrapiDeployment {
        model: "gpt-4o-2024-08-06",
        deployment: "gpt-4o_2024-08-06",
        model_version: None,
    },
    TrapiDeployment {
        model: "gpt-4o-2024-05-13",
        deployment: "gpt-4o_2024-05-13",
        model_version: None,
    },
    TrapiDeployment {
        model: "gpt-4o-2024-11-20",
        deployment: "gpt-4o_2024-11-20",
        model_version: None,
    },
    TrapiDeployment {
        model: "gpt-4.1-2025-04-14",
        deployment: "gpt-4.1_2025-04-14",
        model_version: None,
    },
    TrapiDeployment {
        model: "o1-preview",
        deployment: "o1-preview_2024-09-12",
        model_version: None,
    },
    TrapiDeployment {
        model: "o1",
        deployment: "o1_2024-12-17",
        model_version: None,
    },
    TrapiDeployment {
        model: "o3-mini",
        deployment: "o3-mini_2025-01-31",
        model_version: Some("2025-01-31"),
    },
    TrapiDeployment {
        model: "o4-mini",
        deployment: "o4-mini_2025-04-16",
        model_version: Some("2025-04-16"),
    },
    TrapiDeployment {
        model: "o4-mini-2025-04-16",
        deployment: "o4-mini_2025-04-16",
        model_version: Some("2025-04-16"),
    },
];

/// Look up the Azure OpenAI deployment for a model name
pub fn azure_openai_deployment(model: &str) -> Option<&'static AzureDeployment> {
    AZURE_OPENAI_DEPLOYMENTS.iter().find(|d| d.model == model)
}

/// Look up the TRAPI deployment for a model name
pub fn trapi_deployment(model: &str) -> Option<&'static TrapiDeployment> {
    TRAPI_DEPLOYMENTS.iter().find(|d| d.model == model)
}

/// TRAPI endpoint for the configured suffix
pub fn trapi_endpoint() -> String {
    format!("https://trapi.research.microsoft.com/{}", TRAPI_SUFFIX)
}

/// Capability descriptor for the phi gateway's models.
///
/// The gateway's models are absent from client capability tables, so every
/// capability is reported off and the family is pinned.
pub fn phi_model_info() -> ModelInfo {
    ModelInfo {
        vision: false,
        function_calling: false,
        json_output: false,
        structured_output: false,
        multiple_system_messages: false,
        family: "phi".to_string(),
    }
}

/// A model name starting with `o` follows the reasoning-family naming
/// convention and takes a reasoning-effort setting instead of sampling
/// parameters.
pub fn is_reasoning_model(model: &str) -> bool {
    model.starts_with('o')
}
