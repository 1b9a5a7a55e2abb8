pub mod gemini;

use async_trait::async_trait;
use serde_json::Value;

use crate::aspect::AspectRatioBucket;
use crate::media::MediaDescriptor;

pub use gemini::GeminiCapability;

#[derive(Debug, thiserror::Error)]
pub enum CapabilityError {
    /// The service cannot be reached at all, e.g. no credential configured.
    #[error("Capability unavailable: {0}")]
    Unavailable(String),
    #[error("Capability request failed: {0}")]
    Request(String),
    #[error("Capability returned an unusable response: {0}")]
    InvalidResponse(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SynthesisConfig {
    pub aspect_ratio: AspectRatioBucket,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponsePart {
    Text(String),
    InlineImage(MediaDescriptor),
}

/// Ordered parts returned by a synthesis call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SynthesisResponse {
    pub parts: Vec<ResponsePart>,
}

impl SynthesisResponse {
    pub fn first_image(&self) -> Option<&MediaDescriptor> {
        self.parts.iter().find_map(|part| match part {
            ResponsePart::InlineImage(media) => Some(media),
            ResponsePart::Text(_) => None,
        })
    }

    pub fn into_first_image(self) -> Option<MediaDescriptor> {
        self.parts.into_iter().find_map(|part| match part {
            ResponsePart::InlineImage(media) => Some(media),
            ResponsePart::Text(_) => None,
        })
    }

    /// Joined non-empty text parts, if any.
    pub fn text(&self) -> Option<String> {
        let texts = self
            .parts
            .iter()
            .filter_map(|part| match part {
                ResponsePart::Text(text) if !text.trim().is_empty() => Some(text.trim()),
                _ => None,
            })
            .collect::<Vec<_>>();
        if texts.is_empty() {
            None
        } else {
            Some(texts.join("\n"))
        }
    }
}

/// The vision-language service the pipelines call into.
#[async_trait]
pub trait Capability: Send + Sync {
    fn name(&self) -> &str;

    async fn analyze_text(
        &self,
        images: &[MediaDescriptor],
        prompt: &str,
    ) -> Result<String, CapabilityError>;

    async fn synthesize_image(
        &self,
        images: &[MediaDescriptor],
        prompt: &str,
        config: SynthesisConfig,
    ) -> Result<SynthesisResponse, CapabilityError>;

    /// Returns `Ok(None)` when the service answered but produced no payload.
    async fn analyze_structured(
        &self,
        images: &[MediaDescriptor],
        prompt: &str,
        schema: &Value,
    ) -> Result<Option<Value>, CapabilityError>;
}
