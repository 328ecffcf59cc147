use reqwest::Client;
use serde_json::Value;
use std::cmp::Reverse;
use std::path::Path;
use tracing::{debug, info, warn};

use crate::credentials::CredentialSource;
use crate::preparer::{self, PrepareError};
use crate::provider::{Provider, DEFAULT_VISION_PROMPT};
use crate::types::{AnalysisResponse, DescriberConfig, EncodedPayload, PrepareOptions};

/// Provider error bodies are cut to this many characters.
const ERROR_BODY_LIMIT: usize = 300;

/// Send one analysis request to one provider.
///
/// Makes exactly one HTTP attempt bounded by the provider's timeout.
///
/// # Errors
///
/// Returns an error if:
/// - No credential is configured for the provider (`MissingCredential`)
/// - The request cannot be sent or times out (`Transport`)
/// - The provider answers with a non-2xx status (`Provider`)
/// - The body is not JSON or carries no text content (`InvalidResponse`)
pub async fn analyze(
    client: &Client,
    payload: &EncodedPayload,
    prompt: &str,
    provider: &Provider,
    credentials: &dyn CredentialSource,
) -> Result<AnalysisResponse, AnalyzeError> {
    let settings = provider.settings();
    let api_key = credentials
        .get_credential(&settings.name)
        .ok_or_else(|| AnalyzeError::MissingCredential(settings.name.clone()))?;

    let request = provider.analysis_request(prompt, payload);
    let body = provider.build_request(&request);
    let url = provider.request_url();
    debug!(
        provider = %settings.name,
        model = %settings.model,
        url = %url,
        vision = provider.is_vision(),
        "sending analysis request"
    );

    let resp = provider
        .authorize(client.post(&url), api_key)
        .timeout(settings.timeout)
        .json(&body)
        .send()
        .await
        .map_err(|e| AnalyzeError::Transport {
            provider: settings.name.clone(),
            message: if e.is_timeout() {
                format!("request timed out after {:?}", settings.timeout)
            } else {
                e.to_string()
            },
        })?;

    if !resp.status().is_success() {
        let status = resp.status().as_u16();
        let text = resp.text().await.unwrap_or_default();
        return Err(AnalyzeError::Provider {
            provider: settings.name.clone(),
            status,
            body: truncate(&text, ERROR_BODY_LIMIT),
        });
    }

    let json: Value = resp.json().await.map_err(|e| AnalyzeError::InvalidResponse {
        provider: settings.name.clone(),
        message: e.to_string(),
    })?;

    provider.parse_response(&json, &settings.model)
}

/// Prepare the image for every distinct byte ceiling, then try each credentialed provider in priority
/// order until one succeeds.
///
/// `prompt` overrides `config.prompt`; with neither set, vision providers use
/// [`DEFAULT_VISION_PROMPT`] and metadata-only providers run a standard
/// analysis. Attempts are strictly sequential.
///
/// # Errors
///
/// Returns an error if:
/// - No configured provider has a credential (`NoCredentials`, no I/O performed)
/// - The image cannot be prepared (`Prepare`, no request sent)
/// - Every provider failed (`AllProvidersFailed`, one entry per attempt)
pub async fn analyze_with_fallback(
    client: &Client,
    config: &DescriberConfig,
    image_path: &Path,
    prompt: Option<&str>,
    credentials: &dyn CredentialSource,
) -> Result<AnalysisResponse, AnalyzeError> {
    let mut candidates: Vec<&Provider> = config
        .providers
        .iter()
        .filter(|p| credentials.has_credential(p.name()))
        .collect();

    if candidates.is_empty() {
        return Err(AnalyzeError::NoCredentials);
    }
    candidates.sort_by_key(|p| p.priority());

    let names: Vec<&str> = candidates.iter().map(|p| p.name()).collect();
    info!(providers = ?names, "available providers");

    let limits: Vec<u64> = candidates
        .iter()
        .map(|p| p.byte_limit(config.prepare.max_bytes))
        .collect();
    let (payloads, slots) = prepare_payloads(image_path, &config.prepare, &limits)?;

    let custom = prompt.or(config.prompt.as_deref());
    let mut attempts = Vec::with_capacity(candidates.len());

    for (provider, slot) in candidates.into_iter().zip(slots) {
        let payload = &payloads[slot];
        let prompt = match (custom, provider) {
            (Some(p), _) => p,
            (None, Provider::VisionCapable(_)) => DEFAULT_VISION_PROMPT,
            (None, Provider::MetadataOnly(_)) => "",
        };

        info!(provider = provider.name(), vision = provider.is_vision(), "analyzing");
        match analyze(client, payload, prompt, provider, credentials).await {
            Ok(response) => return Ok(response),
            Err(error) => {
                warn!(provider = provider.name(), %error, "provider failed, trying next");
                attempts.push(ProviderAttempt {
                    provider: provider.name().to_string(),
                    error,
                });
            }
        }
    }

    Err(AnalyzeError::AllProvidersFailed { attempts })
}

/// Prepare one payload per distinct byte ceiling, largest ceiling first.
///
/// A payload already small enough for a tighter ceiling is reused rather than
/// re-encoded. Returns the payloads and, for each entry of `limits`, the index
/// of the payload to send.
fn prepare_payloads(
    path: &Path,
    options: &PrepareOptions,
    limits: &[u64],
) -> Result<(Vec<EncodedPayload>, Vec<usize>), PrepareError> {
    let mut order: Vec<usize> = (0..limits.len()).collect();
    order.sort_by_key(|&i| Reverse(limits[i]));

    let mut payloads: Vec<EncodedPayload> = Vec::new();
    let mut slots = vec![0; limits.len()];
    for i in order {
        let limit = limits[i];
        slots[i] = match payloads.iter().position(|p| p.byte_size <= limit) {
            Some(slot) => slot,
            None => {
                let payload = preparer::prepare(path, &options.clone().max_bytes(limit))?;
                info!(
                    limit,
                    width = payload.width,
                    height = payload.height,
                    bytes = payload.byte_size,
                    resize_passes = payload.resize_passes,
                    "image prepared"
                );
                payloads.push(payload);
                payloads.len() - 1
            }
        };
    }
    Ok((payloads, slots))
}

/// A failed provider call recorded during fallback.
#[derive(Debug)]
pub struct ProviderAttempt {
    pub provider: String,
    pub error: AnalyzeError,
}

/// Errors that can occur during analysis.
#[derive(Debug, thiserror::Error)]
pub enum AnalyzeError {
    #[error(transparent)]
    Prepare(#[from] PrepareError),

    #[error("No API keys configured (set OPENAI_API_KEY, ANTHROPIC_API_KEY or DEEPSEEK_API_KEY)")]
    NoCredentials,

    #[error("No API key configured for provider '{0}'")]
    MissingCredential(String),

    #[error("Cannot reach {provider}: {message}")]
    Transport { provider: String, message: String },

    #[error("{provider} returned HTTP {status}: {body}")]
    Provider {
        provider: String,
        status: u16,
        body: String,
    },

    #[error("Invalid response from {provider}: {message}")]
    InvalidResponse { provider: String, message: String },

    #[error("All providers failed: {}", summarize(.attempts))]
    AllProvidersFailed { attempts: Vec<ProviderAttempt> },
}

fn summarize(attempts: &[ProviderAttempt]) -> String {
    attempts
        .iter()
        .map(|a| a.error.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

fn truncate(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}
