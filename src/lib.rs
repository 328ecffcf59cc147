//! # vision-describe
//!
//! Prepare a local image and have a vision-capable chat completion API
//! describe it, falling back to other providers on failure.
//!
//! ## Features
//!
//! - **Image preparation** that keeps payloads under provider limits: Lanczos
//!   downscaling to a pixel ceiling, then bounded shrink-and-recompress passes
//!   until the encoded size fits
//! - **Provider fallback** across vision-capable providers (OpenAI, Anthropic)
//!   and a metadata-only text provider (DeepSeek) as last resort
//! - **Structured output** via brace-depth JSON block extraction from the
//!   model's free-form reply
//! - **Explicit credentials** assembled once from the environment, never logged
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use vision_describe::{Credentials, DescriberConfig};
//! use std::path::Path;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = DescriberConfig::default();
//!     let credentials = Credentials::from_env();
//!     let client = reqwest::Client::new();
//!
//!     let response = vision_describe::analyze_with_fallback(
//!         &client,
//!         &config,
//!         Path::new("photo.jpg"),
//!         None,
//!         &credentials,
//!     ).await?;
//!
//!     println!("{} ({}): {}", response.provider, response.model, response.content);
//!     if let Some(block) = response.structured {
//!         println!("{block:#}");
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## JSON Extraction
//!
//! ```rust
//! use vision_describe::extract_json_block;
//!
//! let reply = r#"A red kite over a beach. {"entities": [{"name": "kite"}]}"#;
//! let block = extract_json_block(reply).unwrap();
//! assert_eq!(block["entities"][0]["name"], "kite");
//!
//! // Unbalanced braces yield nothing
//! assert!(extract_json_block(r#"{"entities": ["#).is_none());
//! ```

pub mod credentials;
pub mod dispatcher;
pub mod parser;
pub mod preparer;
pub mod provider;
pub mod types;

// Re-export main types at crate root
pub use credentials::{CredentialSource, Credentials};
pub use dispatcher::{analyze, analyze_with_fallback, AnalyzeError, ProviderAttempt};
pub use parser::{extract_json_block, strip_think_tags};
pub use preparer::{inspect, prepare, PrepareError};
pub use provider::{
    ChatDialect, Provider, ProviderSettings, DEFAULT_VISION_PROMPT, MONTAGE_PROMPT,
    SCENE_BRIEF_PROMPT,
};
pub use types::{
    mime_type_for, AnalysisRequest, AnalysisResponse, DescriberConfig, EncodedPayload,
    ImageAsset, ImageKind, PrepareOptions, ResizeStrategy, ShrinkOutcome, Usage,
};
