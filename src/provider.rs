use reqwest::RequestBuilder;
use serde_json::{json, Value};
use std::time::Duration;

use crate::dispatcher::AnalyzeError;
use crate::parser;
use crate::types::{AnalysisRequest, AnalysisResponse, EncodedPayload, Usage};

/// Objective description followed by a JSON entities block.
pub const DEFAULT_VISION_PROMPT: &str = r#"Describe in detail what you observe in this image. Be specific about the visible elements, colors, composition, people, objects, text, and any other relevant detail. Keep the description objective and based only on what you can directly see. At the end, provide a JSON object with the detected entities using this format: { "entities": [ { "type": "person|object|place|text|shape|color", "name": "string", "confidence": 0-1, "details": "description" } ], "visual_elements": { "main_colors": [], "composition": "description", "lighting": "description" } }"#;

/// Compact one-paragraph scene brief, suitable for handing to a 3D/XR artist.
pub const SCENE_BRIEF_PROMPT: &str = "Describe the image without judgements or interpretation. Do not try to identify or describe specific people. Write it compactly in a single paragraph, as if it were the brief for an XR artist to rebuild the scene. Do not include technical requirements or tasks for the artist.";

/// Montage reading after Didi-Huberman and Benjamin: a compact paragraph plus
/// a mermaid diagram grouping visible elements under anachronism and
/// image-symptom.
pub const MONTAGE_PROMPT: &str = r#"Do not hold back from speculation or bias: the goal is creative and poetic. Describe the image objectively in a single compact paragraph of academic prose. The analysis follows Didi-Huberman's reading of Walter Benjamin's montage method and Rubén Dittus's M12 model; do not introduce concepts beyond those. Then give a mermaid diagram grouping the visible elements into the categories anachronism and image-symptom, using this structure (write A1, A2 and A3 in a relaxed haiku-like style, at most 70 characters per line):
graph TD
    A[[Anachronism]]
    B[[Image-Symptom]]

    A --> A1[Distorted temporal elements]
    A --> A2[Contradictions of the era]
    A --> A3[Hidden phenomena revealed]

    B --> B1[Reflection of society]
    B --> B2[Conditions of the present]"#;

const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Anthropic rejects images whose base64 form exceeds 5 MiB; this is the raw
/// size that encodes to exactly that.
const ANTHROPIC_IMAGE_BYTES: u64 = 5 * 1024 * 1024 / 4 * 3;

const OPENAI_IMAGE_BYTES: u64 = 20 * 1024 * 1024;

/// Wire format spoken by a provider endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatDialect {
    /// `POST /v1/chat/completions`, bearer auth, `choices[0].message.content`
    OpenAi,
    /// `POST /v1/messages`, `x-api-key` auth, `content[*].text`
    Anthropic,
}

impl ChatDialect {
    fn path(&self) -> &'static str {
        match self {
            Self::OpenAi => "/v1/chat/completions",
            Self::Anthropic => "/v1/messages",
        }
    }
}

/// Connection and generation settings for one provider.
#[derive(Debug, Clone)]
pub struct ProviderSettings {
    /// Credential key and label in logs/errors (e.g. "openai")
    pub name: String,
    /// Base URL without the API path (e.g. "https://api.openai.com")
    pub endpoint: String,
    pub model: String,
    /// Per-request timeout
    pub timeout: Duration,
    pub max_tokens: u32,
    pub temperature: f64,
    pub dialect: ChatDialect,
    /// Largest encoded image the API accepts. `None` for providers that never
    /// receive pixels.
    pub max_image_bytes: Option<u64>,
}

/// A configured provider, tagged by what it can do with an image.
#[derive(Debug, Clone)]
pub enum Provider {
    /// Receives the encoded image inline with the prompt.
    VisionCapable(ProviderSettings),
    /// Receives only a text description of the file's metadata.
    MetadataOnly(ProviderSettings),
}

impl Provider {
    /// OpenAI GPT-4o vision.
    pub fn openai() -> Self {
        Self::VisionCapable(ProviderSettings {
            name: "openai".to_string(),
            endpoint: "https://api.openai.com".to_string(),
            model: "gpt-4o".to_string(),
            timeout: Duration::from_secs(60),
            max_tokens: 4000,
            temperature: 0.1,
            dialect: ChatDialect::OpenAi,
            max_image_bytes: Some(OPENAI_IMAGE_BYTES),
        })
    }

    /// Anthropic Claude vision over the messages API.
    pub fn anthropic() -> Self {
        Self::VisionCapable(ProviderSettings {
            name: "anthropic".to_string(),
            endpoint: "https://api.anthropic.com".to_string(),
            model: "claude-3-5-sonnet-20241022".to_string(),
            timeout: Duration::from_secs(60),
            max_tokens: 4096,
            temperature: 0.1,
            dialect: ChatDialect::Anthropic,
            max_image_bytes: Some(ANTHROPIC_IMAGE_BYTES),
        })
    }

    /// DeepSeek chat: text-only, so it only ever sees image metadata.
    pub fn deepseek() -> Self {
        Self::MetadataOnly(ProviderSettings {
            name: "deepseek".to_string(),
            endpoint: "https://api.deepseek.com".to_string(),
            model: "deepseek-chat".to_string(),
            timeout: Duration::from_secs(30),
            max_tokens: 3000,
            temperature: 0.1,
            dialect: ChatDialect::OpenAi,
            max_image_bytes: None,
        })
    }

    /// Look up a built-in provider by name.
    pub fn preset(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "openai" => Some(Self::openai()),
            "anthropic" => Some(Self::anthropic()),
            "deepseek" => Some(Self::deepseek()),
            _ => None,
        }
    }

    pub fn settings(&self) -> &ProviderSettings {
        match self {
            Self::VisionCapable(s) | Self::MetadataOnly(s) => s,
        }
    }

    fn settings_mut(&mut self) -> &mut ProviderSettings {
        match self {
            Self::VisionCapable(s) | Self::MetadataOnly(s) => s,
        }
    }

    pub fn name(&self) -> &str {
        &self.settings().name
    }

    pub fn is_vision(&self) -> bool {
        matches!(self, Self::VisionCapable(_))
    }

    /// Dispatch order: vision-capable providers before metadata-only ones.
    pub fn priority(&self) -> u8 {
        match self {
            Self::VisionCapable(_) => 0,
            Self::MetadataOnly(_) => 1,
        }
    }

    /// Set the base endpoint.
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.settings_mut().endpoint = endpoint.into();
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.settings_mut().model = model.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.settings_mut().timeout = timeout;
        self
    }

    pub fn with_max_tokens(mut self, tokens: u32) -> Self {
        self.settings_mut().max_tokens = tokens;
        self
    }

    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.settings_mut().temperature = temperature;
        self
    }

    /// Cap the encoded image size sent to this provider.
    pub fn with_max_image_bytes(mut self, bytes: u64) -> Self {
        self.settings_mut().max_image_bytes = Some(bytes);
        self
    }

    /// Byte ceiling a payload must meet for this provider: the tighter of
    /// `configured` and the provider's own cap. Metadata-only providers
    /// ignore their cap since the image never leaves the machine.
    pub fn byte_limit(&self, configured: u64) -> u64 {
        match (self, self.settings().max_image_bytes) {
            (Self::VisionCapable(_), Some(cap)) => cap.min(configured),
            _ => configured,
        }
    }

    /// Full request URL for this provider's dialect.
    pub fn request_url(&self) -> String {
        let s = self.settings();
        format!("{}{}", s.endpoint.trim_end_matches('/'), s.dialect.path())
    }

    /// Assemble the per-call request from settings, prompt and payload.
    pub fn analysis_request<'a>(
        &'a self,
        prompt: &'a str,
        payload: &'a EncodedPayload,
    ) -> AnalysisRequest<'a> {
        let s = self.settings();
        AnalysisRequest {
            provider: &s.name,
            model: &s.model,
            prompt,
            payload,
            max_tokens: s.max_tokens,
            temperature: s.temperature,
        }
    }

    /// Attach the dialect's authentication headers.
    pub fn authorize(&self, builder: RequestBuilder, api_key: &str) -> RequestBuilder {
        match self.settings().dialect {
            ChatDialect::OpenAi => builder.bearer_auth(api_key),
            ChatDialect::Anthropic => builder
                .header("x-api-key", api_key)
                .header("anthropic-version", ANTHROPIC_VERSION),
        }
    }

    /// Build the JSON request body.
    ///
    /// Vision providers embed the image next to the prompt; metadata-only
    /// providers get a text prompt built from the file name, format and
    /// dimensions, with the caller's prompt appended as extra instructions.
    pub fn build_request(&self, request: &AnalysisRequest<'_>) -> Value {
        let s = self.settings();
        let content = match self {
            Self::VisionCapable(_) => match s.dialect {
                ChatDialect::OpenAi => json!([
                    {"type": "text", "text": request.prompt},
                    {
                        "type": "image_url",
                        "image_url": {
                            "url": request.payload.data_uri(),
                            "detail": "high",
                        }
                    }
                ]),
                ChatDialect::Anthropic => json!([
                    {
                        "type": "image",
                        "source": {
                            "type": "base64",
                            "media_type": request.payload.mime_type,
                            "data": request.payload.data,
                        }
                    },
                    {"type": "text", "text": request.prompt}
                ]),
            },
            Self::MetadataOnly(_) => json!(metadata_prompt(request.payload, request.prompt)),
        };

        json!({
            "model": request.model,
            "messages": [{"role": "user", "content": content}],
            "max_tokens": request.max_tokens,
            "temperature": request.temperature,
        })
    }

    /// Normalize a successful response body.
    ///
    /// # Errors
    ///
    /// Returns `InvalidResponse` when the reply carries no text content.
    pub fn parse_response(
        &self,
        body: &Value,
        requested_model: &str,
    ) -> Result<AnalysisResponse, AnalyzeError> {
        let s = self.settings();
        let invalid = |message: &str| AnalyzeError::InvalidResponse {
            provider: s.name.clone(),
            message: message.to_string(),
        };

        let (content, model, usage) = match s.dialect {
            ChatDialect::OpenAi => {
                let choice = body
                    .get("choices")
                    .and_then(|c| c.get(0))
                    .ok_or_else(|| invalid("response has no choices"))?;
                let content = choice
                    .get("message")
                    .and_then(|m| m.get("content"))
                    .and_then(|c| c.as_str())
                    .unwrap_or("");
                let model = choice
                    .get("model")
                    .or_else(|| body.get("model"))
                    .and_then(|m| m.as_str());
                let usage = body
                    .get("usage")
                    .and_then(|u| u.get("total_tokens"))
                    .and_then(|t| t.as_u64())
                    .map(|total_tokens| Usage { total_tokens });
                (content.to_string(), model, usage)
            }
            ChatDialect::Anthropic => {
                let blocks = body
                    .get("content")
                    .and_then(|c| c.as_array())
                    .ok_or_else(|| invalid("response has no content blocks"))?;
                let content = blocks
                    .iter()
                    .filter(|b| b.get("type").and_then(|t| t.as_str()) == Some("text"))
                    .filter_map(|b| b.get("text").and_then(|t| t.as_str()))
                    .collect::<Vec<_>>()
                    .join("\n");
                let model = body.get("model").and_then(|m| m.as_str());
                let usage = body.get("usage").and_then(|u| {
                    let input = u.get("input_tokens").and_then(|t| t.as_u64())?;
                    let output = u.get("output_tokens").and_then(|t| t.as_u64())?;
                    Some(Usage {
                        total_tokens: input + output,
                    })
                });
                (content, model, usage)
            }
        };

        if content.trim().is_empty() {
            return Err(invalid("response content is empty"));
        }

        Ok(AnalysisResponse {
            provider: s.name.clone(),
            model: model.unwrap_or(requested_model).to_string(),
            structured: parser::structured_block(&content),
            content,
            usage,
        })
    }
}

/// Text-only stand-in for the image: what a blind model can be told about it.
fn metadata_prompt(payload: &EncodedPayload, instructions: &str) -> String {
    let source = &payload.source;
    let instructions = if instructions.trim().is_empty() {
        "Standard analysis"
    } else {
        instructions
    };
    format!(
        "[IMAGE METADATA ANALYSIS]\n\
         Name: {name}\n\
         Format: {format}\n\
         Dimensions: {w}x{h}\n\n\
         LIMITATION: I have no vision capability and cannot see the actual content of the image.\n\n\
         As an image analysis expert, explain:\n\
         1. What specific information would be missing to produce a complete objective analysis\n\
         2. What methodology you would use if you could see the image\n\
         3. An example JSON framework showing how you would structure the analysis\n\n\
         Additional user instructions: {instructions}",
        name = source.file_name(),
        format = source.kind.name(),
        w = source.width,
        h = source.height,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ImageAsset, ImageKind, ShrinkOutcome};
    use std::path::PathBuf;

    fn payload() -> EncodedPayload {
        EncodedPayload {
            data: "AAAA".to_string(),
            mime_type: "image/png".to_string(),
            source: ImageAsset {
                path: PathBuf::from("/photos/harbor.png"),
                width: 4000,
                height: 3000,
                kind: ImageKind::Png,
                byte_size: 9_000_000,
            },
            width: 2048,
            height: 1536,
            byte_size: 3,
            resize_passes: 1,
            outcome: ShrinkOutcome::Fits,
        }
    }

    #[test]
    fn openai_vision_body_matches_wire_shape() {
        let provider = Provider::openai();
        let payload = payload();
        let body = provider.build_request(&provider.analysis_request("what is this?", &payload));

        assert_eq!(
            body,
            json!({
                "model": "gpt-4o",
                "messages": [{
                    "role": "user",
                    "content": [
                        {"type": "text", "text": "what is this?"},
                        {"type": "image_url", "image_url": {
                            "url": "data:image/png;base64,AAAA",
                            "detail": "high"
                        }}
                    ]
                }],
                "max_tokens": 4000,
                "temperature": 0.1,
            })
        );
    }

    #[test]
    fn anthropic_vision_body_uses_base64_source() {
        let provider = Provider::anthropic();
        let payload = payload();
        let body = provider.build_request(&provider.analysis_request("describe", &payload));

        let content = &body["messages"][0]["content"];
        assert_eq!(content[0]["type"], "image");
        assert_eq!(content[0]["source"]["media_type"], "image/png");
        assert_eq!(content[0]["source"]["data"], "AAAA");
        assert_eq!(content[1]["text"], "describe");
        assert_eq!(body["max_tokens"], 4096);
    }

    #[test]
    fn metadata_body_never_carries_pixels() {
        let provider = Provider::deepseek();
        let payload = payload();
        let body = provider.build_request(&provider.analysis_request("focus on color", &payload));

        let text = body["messages"][0]["content"].as_str().unwrap();
        assert!(text.contains("Name: harbor.png"));
        assert!(text.contains("Format: PNG"));
        assert!(text.contains("Dimensions: 4000x3000"));
        assert!(text.contains("Additional user instructions: focus on color"));
        assert!(!body.to_string().contains("AAAA"));
        assert!(!body.to_string().contains("image_url"));
        assert_eq!(body["model"], "deepseek-chat");
    }

    #[test]
    fn metadata_prompt_defaults_instructions() {
        let text = metadata_prompt(&payload(), "  ");
        assert!(text.ends_with("Additional user instructions: Standard analysis"));
    }

    #[test]
    fn request_url_joins_dialect_path() {
        let p = Provider::openai().with_endpoint("http://127.0.0.1:9000/");
        assert_eq!(p.request_url(), "http://127.0.0.1:9000/v1/chat/completions");
        assert_eq!(
            Provider::anthropic().request_url(),
            "https://api.anthropic.com/v1/messages"
        );
    }

    #[test]
    fn parse_openai_response() {
        let body = json!({
            "model": "gpt-4o-2024-08-06",
            "choices": [{"message": {"role": "assistant", "content": "A boat. {\"entities\": [{\"name\": \"boat\"}]}"}}],
            "usage": {"total_tokens": 812}
        });
        let resp = Provider::openai().parse_response(&body, "gpt-4o").unwrap();
        assert_eq!(resp.provider, "openai");
        assert_eq!(resp.model, "gpt-4o-2024-08-06");
        assert_eq!(resp.usage, Some(Usage { total_tokens: 812 }));
        assert_eq!(resp.structured.unwrap()["entities"][0]["name"], "boat");
    }

    #[test]
    fn parse_prefers_choice_model_and_falls_back_to_requested() {
        let body = json!({"choices": [{"model": "m-choice", "message": {"content": "x"}}], "model": "m-top"});
        let resp = Provider::openai().parse_response(&body, "req").unwrap();
        assert_eq!(resp.model, "m-choice");

        let body = json!({"choices": [{"message": {"content": "x"}}]});
        let resp = Provider::openai().parse_response(&body, "req").unwrap();
        assert_eq!(resp.model, "req");
        assert!(resp.usage.is_none());
        assert!(resp.structured.is_none());
    }

    #[test]
    fn parse_anthropic_response() {
        let body = json!({
            "model": "claude-3-5-sonnet-20241022",
            "content": [{"type": "text", "text": "A quiet harbor at dusk."}],
            "usage": {"input_tokens": 1500, "output_tokens": 40}
        });
        let resp = Provider::anthropic().parse_response(&body, "x").unwrap();
        assert_eq!(resp.content, "A quiet harbor at dusk.");
        assert_eq!(resp.usage, Some(Usage { total_tokens: 1540 }));
    }

    #[test]
    fn parse_rejects_missing_or_empty_content() {
        let err = Provider::openai().parse_response(&json!({}), "m").unwrap_err();
        assert!(matches!(err, AnalyzeError::InvalidResponse { .. }));

        let body = json!({"choices": [{"message": {"content": ""}}]});
        assert!(Provider::deepseek().parse_response(&body, "m").is_err());
    }

    #[test]
    fn priority_orders_vision_first() {
        assert!(Provider::openai().priority() < Provider::deepseek().priority());
        assert!(Provider::anthropic().is_vision());
        assert!(!Provider::deepseek().is_vision());
    }

    #[test]
    fn byte_limit_takes_tighter_cap() {
        let configured = 20 * 1024 * 1024;
        assert_eq!(Provider::openai().byte_limit(configured), configured);
        assert_eq!(Provider::anthropic().byte_limit(configured), 3_932_160);
        assert_eq!(Provider::anthropic().byte_limit(1_000), 1_000);
        assert_eq!(
            Provider::deepseek().with_max_image_bytes(10).byte_limit(configured),
            configured
        );
    }

    #[test]
    fn anthropic_cap_fits_base64_ceiling() {
        let cap = Provider::anthropic().settings().max_image_bytes.unwrap();
        // base64 emits 4 bytes per 3 input bytes
        assert!(cap.div_ceil(3) * 4 <= 5 * 1024 * 1024);
    }

    #[test]
    fn montage_prompt_carries_diagram_skeleton() {
        assert!(MONTAGE_PROMPT.contains("graph TD"));
        assert!(MONTAGE_PROMPT.contains("A --> A1"));
        assert!(MONTAGE_PROMPT.contains("B --> B2"));
    }

    #[test]
    fn preset_lookup() {
        assert_eq!(Provider::preset("OpenAI").unwrap().name(), "openai");
        assert!(Provider::preset("unknown").is_none());
    }
}
