//! Structured extraction handoff
//!
//! This layer never invokes an LLM. Its whole contribution is the pre-flight
//! check: before any network call, verify that the provider's API key env
//! var is set and refuse with a structured message when it is not. The
//! extraction itself is the engine's business.

use serde::Deserialize;

use crate::engine::ExtractionRequest;
use crate::profiles::build_effective_config;
use crate::report::format_crawl_error;
use crate::tools::{AppContext, ConfigParams};

/// Provider-name prefix to required API key env var. `None` means the
/// provider is local and needs no key. Unknown providers pass the check and
/// are left for the engine to accept or reject.
pub const PROVIDER_ENV_VARS: &[(&str, Option<&str>)] = &[
    ("openai", Some("OPENAI_API_KEY")),
    ("anthropic", Some("ANTHROPIC_API_KEY")),
    ("gemini", Some("GEMINI_API_KEY")),
    ("deepseek", Some("DEEPSEEK_API_KEY")),
    ("groq", Some("GROQ_API_KEY")),
    ("ollama", None),
];

/// Validates that the provider's API key env var is set.
///
/// Returns a structured refusal when the key is missing, `None` when the key
/// is present, the provider is local, or the provider is unknown.
pub fn check_api_key(provider: &str) -> Option<String> {
    let prefix = provider
        .split('/')
        .next()
        .unwrap_or(provider)
        .to_ascii_lowercase();

    let env_var = match PROVIDER_ENV_VARS.iter().find(|(name, _)| *name == prefix) {
        Some((_, Some(var))) => var,
        // Local provider or unknown prefix: nothing to check here
        Some((_, None)) | None => return None,
    };

    let present = std::env::var(env_var)
        .map(|value| !value.is_empty())
        .unwrap_or(false);
    if present {
        return None;
    }
    Some(format!(
        "API key not set\n\
         Provider: {provider}\n\
         Required environment variable: {env_var}\n\
         Set it with: export {env_var}=your-key-here"
    ))
}

#[derive(Debug, Deserialize)]
pub struct ExtractStructuredParams {
    pub url: String,
    /// JSON Schema describing the desired output structure.
    pub schema: serde_json::Value,
    /// Natural-language instruction for the extraction.
    pub instruction: String,
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(flatten)]
    pub config: ConfigParams,
}

fn default_provider() -> String {
    "openai/gpt-4o-mini".to_string()
}

/// Extracts structured JSON from a page via the engine's LLM strategy.
///
/// Calls an external LLM API and incurs token costs; the credential
/// pre-flight runs before any network traffic so a missing key costs
/// nothing.
pub async fn extract_structured(ctx: &AppContext, params: ExtractStructuredParams) -> String {
    if let Some(refusal) = check_api_key(&params.provider) {
        return refusal;
    }

    tracing::info!(
        "extract_structured: {} (provider={})",
        params.url,
        params.provider
    );

    let overrides = params.config.overrides(None);
    let config = build_effective_config(&ctx.profiles, params.config.profile.as_deref(), overrides);
    let request = ExtractionRequest {
        schema: params.schema,
        instruction: params.instruction,
        provider: params.provider,
    };

    let outcome = ctx.engine.extract(&params.url, &config, &request).await;

    if !outcome.success {
        return format_crawl_error(&params.url, &outcome);
    }
    match outcome.content.as_deref() {
        Some(content) if !content.is_empty() => content.to_string(),
        _ => format!(
            "Extraction returned no data\nURL: {}\nThe extraction produced no structured output. \
             Check that the schema matches the page content.",
            params.url
        ),
    }
}
