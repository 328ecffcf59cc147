use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::provider::Provider;

/// Image containers accepted by the preparer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ImageKind {
    Jpeg,
    Png,
    WebP,
    Gif,
}

impl ImageKind {
    /// Resolve the container from a file extension (case-insensitive).
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "jpg" | "jpeg" => Some(Self::Jpeg),
            "png" => Some(Self::Png),
            "webp" => Some(Self::WebP),
            "gif" => Some(Self::Gif),
            _ => None,
        }
    }

    /// Resolve the container from a path's extension.
    pub fn from_path(path: &Path) -> Option<Self> {
        path.extension()
            .and_then(|e| e.to_str())
            .and_then(Self::from_extension)
    }

    pub fn mime_type(&self) -> &'static str {
        match self {
            Self::Jpeg => "image/jpeg",
            Self::Png => "image/png",
            Self::WebP => "image/webp",
            Self::Gif => "image/gif",
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            Self::Jpeg => "jpg",
            Self::Png => "png",
            Self::WebP => "webp",
            Self::Gif => "gif",
        }
    }

    /// Display name used in metadata prompts.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Jpeg => "JPEG",
            Self::Png => "PNG",
            Self::WebP => "WEBP",
            Self::Gif => "GIF",
        }
    }

    pub(crate) fn codec(&self) -> image::ImageFormat {
        match self {
            Self::Jpeg => image::ImageFormat::Jpeg,
            Self::Png => image::ImageFormat::Png,
            Self::WebP => image::ImageFormat::WebP,
            Self::Gif => image::ImageFormat::Gif,
        }
    }
}

/// MIME type for a path, falling back to `image/jpeg` for unknown extensions.
pub fn mime_type_for(path: &Path) -> &'static str {
    ImageKind::from_path(path)
        .map(|k| k.mime_type())
        .unwrap_or(FALLBACK_MIME_TYPE)
}

pub(crate) const FALLBACK_MIME_TYPE: &str = "image/jpeg";

/// A decoded image as found on disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageAsset {
    pub path: PathBuf,
    pub width: u32,
    pub height: u32,
    pub kind: ImageKind,
    /// File size in bytes
    pub byte_size: u64,
}

impl ImageAsset {
    /// File name component of the source path, or the full path if it has none.
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.path.display().to_string())
    }
}

/// Why the shrink loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ShrinkOutcome {
    /// The source file already satisfied every limit and was passed through.
    Untouched,
    /// A re-encoded image fits the byte ceiling.
    Fits,
    /// The retry budget ran out before the image fit.
    MaxRetriesExceeded,
}

/// Base64 image data ready to embed in a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedPayload {
    /// Standard base64 (with padding)
    pub data: String,
    pub mime_type: String,
    /// The image as it was on disk before preparation
    pub source: ImageAsset,
    /// Dimensions and size of the encoded bytes
    pub width: u32,
    pub height: u32,
    pub byte_size: u64,
    /// Number of downscale passes applied (0 when only recompressed or untouched)
    pub resize_passes: u32,
    pub outcome: ShrinkOutcome,
}

impl EncodedPayload {
    /// `data:<mime>;base64,<data>` reference for chat-completion image parts.
    pub fn data_uri(&self) -> String {
        format!("data:{};base64,{}", self.mime_type, self.data)
    }
}

/// One request to one provider.
#[derive(Debug, Clone)]
pub struct AnalysisRequest<'a> {
    pub provider: &'a str,
    pub model: &'a str,
    pub prompt: &'a str,
    pub payload: &'a EncodedPayload,
    pub max_tokens: u32,
    pub temperature: f64,
}

/// Token accounting reported by the provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub total_tokens: u64,
}

/// Normalized provider result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResponse {
    pub provider: String,
    pub model: String,
    /// Text exactly as returned by the model
    pub content: String,
    /// First balanced JSON object found in `content`, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub structured: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
}

/// How an oversized image is shrunk between re-encode attempts.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ResizeStrategy {
    /// Multiply both edges by the ratio (e.g. 0.8) each pass
    Proportional(f32),
    /// Halve both edges each pass
    Halve,
}

impl ResizeStrategy {
    /// Dimensions after one shrink pass. Never returns a zero edge.
    pub fn next_dimensions(&self, width: u32, height: u32) -> (u32, u32) {
        let (w, h) = match *self {
            Self::Proportional(ratio) => {
                let ratio = ratio.clamp(0.05, 0.95) as f64;
                (
                    (width as f64 * ratio).floor() as u32,
                    (height as f64 * ratio).floor() as u32,
                )
            }
            Self::Halve => (width / 2, height / 2),
        };
        (w.max(1), h.max(1))
    }
}

impl Default for ResizeStrategy {
    fn default() -> Self {
        Self::Proportional(0.8)
    }
}

/// Limits and knobs for [`crate::prepare`].
#[derive(Debug, Clone)]
pub struct PrepareOptions {
    /// Maximum width or height in pixels (default: 2048)
    pub max_pixel_edge: u32,
    /// Maximum encoded size in bytes, before base64 (default: 20 MiB).
    /// A vision provider's own `max_image_bytes` can tighten this per attempt.
    pub max_bytes: u64,
    pub strategy: ResizeStrategy,
    /// Shrink passes allowed after the first re-encode (default: 8)
    pub max_retries: u32,
    /// JPEG quality for re-encoded output (default: 85)
    pub jpeg_quality: u8,
    /// Directory for the scratch file (default: system temp dir)
    pub temp_dir: Option<PathBuf>,
}

impl Default for PrepareOptions {
    fn default() -> Self {
        Self {
            max_pixel_edge: 2048,
            max_bytes: 20 * 1024 * 1024,
            strategy: ResizeStrategy::default(),
            max_retries: 8,
            jpeg_quality: 85,
            temp_dir: None,
        }
    }
}

impl PrepareOptions {
    pub fn max_pixel_edge(mut self, edge: u32) -> Self {
        self.max_pixel_edge = edge;
        self
    }

    pub fn max_bytes(mut self, bytes: u64) -> Self {
        self.max_bytes = bytes;
        self
    }

    pub fn strategy(mut self, strategy: ResizeStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    pub fn jpeg_quality(mut self, quality: u8) -> Self {
        self.jpeg_quality = quality;
        self
    }

    pub fn temp_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.temp_dir = Some(dir.into());
        self
    }
}

/// Top-level configuration for [`crate::analyze_with_fallback`].
#[derive(Debug, Clone)]
pub struct DescriberConfig {
    /// Candidate providers. Reordered by capability before dispatch; ties keep this order.
    pub providers: Vec<Provider>,
    pub prepare: PrepareOptions,
    /// Custom prompt (overrides the provider default)
    pub prompt: Option<String>,
}

impl Default for DescriberConfig {
    fn default() -> Self {
        Self {
            providers: vec![Provider::openai(), Provider::anthropic(), Provider::deepseek()],
            prepare: PrepareOptions::default(),
            prompt: None,
        }
    }
}

impl DescriberConfig {
    /// Create a config with an explicit provider list.
    pub fn with_providers(providers: Vec<Provider>) -> Self {
        Self {
            providers,
            ..Default::default()
        }
    }

    pub fn prepare(mut self, options: PrepareOptions) -> Self {
        self.prepare = options;
        self
    }

    pub fn prompt(mut self, prompt: impl Into<String>) -> Self {
        self.prompt = Some(prompt.into());
        self
    }
}
