use std::time::Duration;

use async_trait::async_trait;
use base64::{engine::general_purpose, Engine as _};
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tracing::{debug, warn};

use crate::capability::{
    Capability, CapabilityError, ResponsePart, SynthesisConfig, SynthesisResponse,
};
use crate::config::Config;
use crate::media::{read_dimensions, MediaDescriptor};
use crate::utils::http::get_http_client;
use crate::utils::timing::log_capability_timing;

const GEMINI_RETRY_BASE_DELAY_MS: u64 = 900;
const PROVIDER: &str = "gemini";

#[derive(Debug, Deserialize)]
struct GeminiResponse {
    candidates: Option<Vec<GeminiCandidate>>,
    #[serde(rename = "promptFeedback")]
    prompt_feedback: Option<GeminiPromptFeedback>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiCandidate {
    content: Option<GeminiContent>,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GeminiContent {
    parts: Option<Vec<GeminiPart>>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum GeminiPart {
    Text {
        text: String,
    },
    InlineData {
        #[serde(rename = "inlineData")]
        inline_data: GeminiInlineData,
    },
    Other(serde::de::IgnoredAny),
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiInlineData {
    mime_type: String,
    data: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiPromptFeedback {
    block_reason: Option<String>,
}

/// `Capability` backed by the Gemini `generateContent` REST endpoint.
#[derive(Debug, Clone)]
pub struct GeminiCapability {
    api_key: String,
    base_url: String,
    text_model: String,
    image_model: String,
    temperature: f32,
    safety_profile: String,
    request_timeout: Duration,
    max_attempts: usize,
}

impl GeminiCapability {
    pub fn from_config(config: &Config) -> Self {
        Self {
            api_key: config.gemini_api_key.trim().to_string(),
            base_url: config.gemini_base_url.clone(),
            text_model: config.gemini_text_model.clone(),
            image_model: config.gemini_image_model.clone(),
            temperature: config.gemini_temperature,
            safety_profile: config.gemini_safety_settings.clone(),
            request_timeout: Duration::from_secs(config.gemini_request_timeout_seconds.max(1)),
            max_attempts: config.gemini_max_retry_attempts.max(1),
        }
    }

    pub fn text_model(&self) -> &str {
        &self.text_model
    }

    pub fn image_model(&self) -> &str {
        &self.image_model
    }

    fn ensure_credential(&self) -> Result<(), CapabilityError> {
        if self.api_key.is_empty() {
            return Err(CapabilityError::Unavailable(
                "GEMINI_API_KEY is not configured".to_string(),
            ));
        }
        Ok(())
    }

    fn redact(&self, text: &str) -> String {
        if self.api_key.is_empty() {
            return text.to_string();
        }
        text.replace(&self.api_key, "[redacted]")
    }

    fn endpoint(&self, model: &str) -> String {
        format!("{}/models/{}:generateContent", self.base_url, model)
    }

    async fn call_api(
        &self,
        model: &str,
        payload: Value,
    ) -> Result<GeminiResponse, CapabilityError> {
        self.ensure_credential()?;
        let client = get_http_client();
        let url = self.endpoint(model);

        if tracing::enabled!(tracing::Level::DEBUG) {
            let payload_summary = summarize_payload(&payload);
            debug!(target: "capability.gemini", model = model, payload = %payload_summary);
        }

        let mut attempt = 0usize;
        loop {
            attempt += 1;
            let response = match client
                .post(&url)
                .header("x-goog-api-key", &self.api_key)
                .timeout(self.request_timeout)
                .json(&payload)
                .send()
                .await
            {
                Ok(response) => response,
                Err(err) => {
                    let err_text = self.redact(&err.to_string());
                    let should_retry = should_retry_error(&err) && attempt < self.max_attempts;
                    warn!(
                        "Gemini request failed to send: {} (timeout={}, connect={}, retrying={})",
                        err_text,
                        err.is_timeout(),
                        err.is_connect(),
                        should_retry
                    );
                    if should_retry {
                        tokio::time::sleep(retry_delay(attempt)).await;
                        continue;
                    }
                    if err.is_connect() {
                        return Err(CapabilityError::Unavailable(err_text));
                    }
                    return Err(CapabilityError::Request(err_text));
                }
            };

            if !response.status().is_success() {
                let status = response.status();
                let body = response.text().await.unwrap_or_default();
                let (message, body_summary) = summarize_error_body(&body);
                let should_retry = should_retry_status(status) && attempt < self.max_attempts;
                warn!(
                    "Gemini API error: status={}, body={}, retrying={}",
                    status, body_summary, should_retry
                );
                if should_retry {
                    tokio::time::sleep(retry_delay(attempt)).await;
                    continue;
                }
                let detail = self.redact(&message.unwrap_or(body_summary));
                if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
                    return Err(CapabilityError::Unavailable(format!(
                        "Gemini rejected the credential ({status}): {detail}"
                    )));
                }
                return Err(CapabilityError::Request(format!(
                    "Gemini request failed with status {status}: {detail}"
                )));
            }

            let value = response
                .json::<GeminiResponse>()
                .await
                .map_err(|err| CapabilityError::InvalidResponse(self.redact(&err.to_string())))?;
            if tracing::enabled!(tracing::Level::DEBUG) {
                let response_summary = summarize_response(&value);
                debug!(target: "capability.gemini", model = model, response = %response_summary);
            }
            return Ok(value);
        }
    }
}

#[async_trait]
impl Capability for GeminiCapability {
    fn name(&self) -> &str {
        PROVIDER
    }

    async fn analyze_text(
        &self,
        images: &[MediaDescriptor],
        prompt: &str,
    ) -> Result<String, CapabilityError> {
        let payload = json!({
            "contents": [{ "role": "user", "parts": build_parts(prompt, images) }],
            "generationConfig": { "temperature": self.temperature },
            "safetySettings": build_safety_settings(&self.safety_profile),
        });
        let metadata = json!({ "images": images.len() });
        log_capability_timing(PROVIDER, &self.text_model, "analyze_text", Some(metadata), || async {
            let response = self.call_api(&self.text_model, payload).await?;
            Ok(extract_answer_text(response)?.unwrap_or_default())
        })
        .await
    }

    async fn synthesize_image(
        &self,
        images: &[MediaDescriptor],
        prompt: &str,
        config: SynthesisConfig,
    ) -> Result<SynthesisResponse, CapabilityError> {
        let payload = json!({
            "contents": [{ "role": "user", "parts": build_parts(prompt, images) }],
            "generationConfig": {
                "responseModalities": ["TEXT", "IMAGE"],
                "imageConfig": { "aspectRatio": config.aspect_ratio.as_str() },
            },
            "safetySettings": build_safety_settings(&self.safety_profile),
        });
        let metadata = json!({
            "images": images.len(),
            "aspectRatio": config.aspect_ratio.as_str(),
        });
        log_capability_timing(
            PROVIDER,
            &self.image_model,
            "synthesize_image",
            Some(metadata),
            || async {
                let response = self.call_api(&self.image_model, payload).await?;
                Ok(extract_parts(response))
            },
        )
        .await
    }

    async fn analyze_structured(
        &self,
        images: &[MediaDescriptor],
        prompt: &str,
        schema: &Value,
    ) -> Result<Option<Value>, CapabilityError> {
        let payload = json!({
            "contents": [{ "role": "user", "parts": build_parts(prompt, images) }],
            "generationConfig": {
                "temperature": self.temperature,
                "responseMimeType": "application/json",
                "responseSchema": schema,
            },
            "safetySettings": build_safety_settings(&self.safety_profile),
        });
        let metadata = json!({ "images": images.len() });
        log_capability_timing(
            PROVIDER,
            &self.text_model,
            "analyze_structured",
            Some(metadata),
            || async {
                let response = self.call_api(&self.text_model, payload).await?;
                match extract_answer_text(response)? {
                    Some(text) => parse_structured_text(&text),
                    None => Ok(None),
                }
            },
        )
        .await
    }
}

fn should_retry_error(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect()
}

fn should_retry_status(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT
        || status.is_server_error()
}

fn retry_delay(attempt: usize) -> Duration {
    let attempt = attempt.max(1) as u64;
    Duration::from_millis(GEMINI_RETRY_BASE_DELAY_MS.saturating_mul(attempt))
}

fn build_safety_settings(profile: &str) -> Vec<Value> {
    let threshold = match profile {
        "standard" => "BLOCK_MEDIUM_AND_ABOVE",
        "permissive" => "OFF",
        _ => {
            warn!(
                "Unknown GEMINI_SAFETY_SETTINGS value '{}', using permissive defaults.",
                profile
            );
            "OFF"
        }
    };

    vec![
        json!({ "category": "HARM_CATEGORY_HARASSMENT", "threshold": threshold }),
        json!({ "category": "HARM_CATEGORY_HATE_SPEECH", "threshold": threshold }),
        json!({ "category": "HARM_CATEGORY_SEXUALLY_EXPLICIT", "threshold": threshold }),
        json!({ "category": "HARM_CATEGORY_DANGEROUS_CONTENT", "threshold": threshold }),
    ]
}

/// Prompt text first, then every image in the order given.
fn build_parts(prompt: &str, images: &[MediaDescriptor]) -> Vec<Value> {
    let mut parts = Vec::with_capacity(images.len() + 1);
    parts.push(json!({ "text": prompt }));
    for image in images {
        parts.push(json!({
            "inlineData": {
                "mimeType": image.media_type,
                "data": general_purpose::STANDARD.encode(&image.data),
            }
        }));
    }
    parts
}

/// Flattens every candidate into response parts, returning the prompt block
/// reason alongside.
fn collect_parts(response: GeminiResponse) -> (Vec<ResponsePart>, Option<String>) {
    let mut parts = Vec::new();
    let block_reason = response
        .prompt_feedback
        .and_then(|feedback| feedback.block_reason);

    for candidate in response.candidates.unwrap_or_default() {
        if let Some(reason) = candidate.finish_reason.as_deref() {
            if reason != "STOP" {
                debug!(target: "capability.gemini", finish_reason = reason);
            }
        }
        let Some(content) = candidate.content else {
            continue;
        };
        for part in content.parts.unwrap_or_default() {
            match part {
                GeminiPart::Text { text } => parts.push(ResponsePart::Text(text)),
                GeminiPart::InlineData { inline_data } => {
                    if !inline_data.mime_type.starts_with("image/") {
                        continue;
                    }
                    match general_purpose::STANDARD.decode(inline_data.data) {
                        Ok(bytes) => {
                            let (width, height) = read_dimensions(&bytes).unwrap_or((0, 0));
                            parts.push(ResponsePart::InlineImage(MediaDescriptor::new(
                                bytes,
                                inline_data.mime_type,
                                width,
                                height,
                            )));
                        }
                        Err(err) => warn!("Discarding undecodable inline image: {err}"),
                    }
                }
                GeminiPart::Other(_) => {}
            }
        }
    }

    (parts, block_reason)
}

/// Synthesis result. A blocked prompt with nothing else becomes a text part
/// so the caller can report it as the reason no image came back.
fn extract_parts(response: GeminiResponse) -> SynthesisResponse {
    let (mut parts, block_reason) = collect_parts(response);
    if parts.is_empty() {
        if let Some(reason) = block_reason {
            parts.push(ResponsePart::Text(format!("Request blocked: {reason}")));
        }
    }
    SynthesisResponse { parts }
}

/// Text answer for analysis calls. A blocked prompt that produced no text is
/// an error here, never an answer.
fn extract_answer_text(response: GeminiResponse) -> Result<Option<String>, CapabilityError> {
    let (parts, block_reason) = collect_parts(response);
    let text = SynthesisResponse { parts }.text();
    match (text, block_reason) {
        (None, Some(reason)) => {
            warn!(block_reason = %reason, "Gemini blocked the analysis prompt");
            Err(CapabilityError::InvalidResponse(format!(
                "Request blocked: {reason}"
            )))
        }
        (text, _) => Ok(text),
    }
}

/// Parses a JSON answer, tolerating a Markdown code fence around it.
fn parse_structured_text(text: &str) -> Result<Option<Value>, CapabilityError> {
    let trimmed = text.trim();
    let unfenced = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .and_then(|rest| rest.strip_suffix("```"))
        .unwrap_or(trimmed)
        .trim();
    if unfenced.is_empty() {
        return Ok(None);
    }
    serde_json::from_str::<Value>(unfenced)
        .map(Some)
        .map_err(|err| {
            CapabilityError::InvalidResponse(format!(
                "structured answer is not valid JSON: {err} ({})",
                truncate_for_log(unfenced, 200)
            ))
        })
}

fn truncate_for_log(value: &str, limit: usize) -> String {
    if value.chars().count() <= limit {
        return value.to_string();
    }
    let truncated: String = value.chars().take(limit).collect();
    format!("{truncated}... (truncated)")
}

fn summarize_payload(payload: &Value) -> Value {
    let mut summary = Map::new();

    if let Some(contents) = payload.get("contents").and_then(|value| value.as_array()) {
        let parts = contents
            .iter()
            .filter_map(|content| content.get("parts").and_then(|value| value.as_array()))
            .flatten()
            .map(|part| {
                if let Some(text) = part.get("text").and_then(|value| value.as_str()) {
                    json!({ "text": truncate_for_log(text, 200) })
                } else if let Some(inline_data) = part.get("inlineData") {
                    let mime_type = inline_data
                        .get("mimeType")
                        .and_then(|value| value.as_str())
                        .unwrap_or("unknown");
                    let data_len = inline_data
                        .get("data")
                        .and_then(|value| value.as_str())
                        .map(|value| value.len())
                        .unwrap_or(0);
                    json!({ "inlineData": { "mimeType": mime_type, "dataLen": data_len } })
                } else {
                    json!({ "unknownPart": true })
                }
            })
            .collect::<Vec<_>>();
        summary.insert("parts".to_string(), Value::Array(parts));
    }

    if let Some(config) = payload.get("generationConfig") {
        let mut config = config.clone();
        if let Some(object) = config.as_object_mut() {
            if object.remove("responseSchema").is_some() {
                object.insert("responseSchema".to_string(), json!("<schema>"));
            }
        }
        summary.insert("generationConfig".to_string(), config);
    }

    Value::Object(summary)
}

fn summarize_response(response: &GeminiResponse) -> Value {
    let mut text_parts = 0usize;
    let mut image_parts = 0usize;
    let mut text_preview = None;

    for candidate in response.candidates.as_deref().unwrap_or(&[]) {
        let parts = candidate
            .content
            .as_ref()
            .and_then(|content| content.parts.as_deref())
            .unwrap_or(&[]);
        for part in parts {
            match part {
                GeminiPart::Text { text } => {
                    text_parts += 1;
                    if text_preview.is_none() && !text.trim().is_empty() {
                        text_preview = Some(truncate_for_log(text, 200));
                    }
                }
                GeminiPart::InlineData { inline_data } => {
                    if inline_data.mime_type.starts_with("image/") {
                        image_parts += 1;
                    }
                }
                GeminiPart::Other(_) => {}
            }
        }
    }

    json!({
        "candidates": response.candidates.as_ref().map(|candidates| candidates.len()).unwrap_or(0),
        "textParts": text_parts,
        "imageParts": image_parts,
        "textPreview": text_preview,
    })
}

fn summarize_error_body(body: &str) -> (Option<String>, String) {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return (None, "empty response body".to_string());
    }

    if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
        let message = value
            .pointer("/error/message")
            .and_then(|v| v.as_str())
            .map(|v| v.to_string())
            .or_else(|| {
                value
                    .get("message")
                    .and_then(|v| v.as_str())
                    .map(|v| v.to_string())
            });
        return (message, truncate_for_log(&value.to_string(), 2000));
    }

    (None, truncate_for_log(trimmed, 2000))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aspect::AspectRatioBucket;

    fn test_config(api_key: &str) -> Config {
        Config {
            log_level: "info".to_string(),
            log_dir: "logs".into(),
            gemini_api_key: api_key.to_string(),
            gemini_base_url: "http://127.0.0.1:9/v1beta".to_string(),
            gemini_text_model: "text-model".to_string(),
            gemini_image_model: "image-model".to_string(),
            gemini_temperature: 0.2,
            gemini_safety_settings: "standard".to_string(),
            gemini_request_timeout_seconds: 5,
            gemini_max_retry_attempts: 1,
        }
    }

    fn parse(value: Value) -> GeminiResponse {
        serde_json::from_value(value).expect("valid response fixture")
    }

    #[test]
    fn parts_put_prompt_before_images_in_order() {
        let images = vec![
            MediaDescriptor::new(vec![1, 2, 3], "image/png", 1, 1),
            MediaDescriptor::new(vec![4, 5], "image/jpeg", 1, 1),
        ];
        let parts = build_parts("wear this", &images);
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0]["text"], "wear this");
        assert_eq!(parts[1]["inlineData"]["mimeType"], "image/png");
        assert_eq!(parts[1]["inlineData"]["data"], "AQID");
        assert_eq!(parts[2]["inlineData"]["mimeType"], "image/jpeg");
    }

    #[test]
    fn extracts_text_and_inline_images() {
        let response = parse(json!({
            "candidates": [{
                "finishReason": "STOP",
                "content": { "parts": [
                    { "text": "Here is the result" },
                    { "inlineData": { "mimeType": "image/png", "data": "AQID" } },
                    { "inlineData": { "mimeType": "audio/wav", "data": "AQID" } },
                    { "thought": true }
                ]}
            }]
        }));
        let extracted = extract_parts(response);
        assert_eq!(extracted.parts.len(), 2);
        assert_eq!(extracted.text().as_deref(), Some("Here is the result"));
        let image = extracted.first_image().expect("image part");
        assert_eq!(image.data, vec![1, 2, 3]);
        assert_eq!(image.media_type, "image/png");
    }

    #[test]
    fn blocked_prompt_becomes_text_explanation() {
        let response = parse(json!({
            "promptFeedback": { "blockReason": "SAFETY" }
        }));
        let extracted = extract_parts(response);
        assert!(extracted.first_image().is_none());
        assert_eq!(extracted.text().as_deref(), Some("Request blocked: SAFETY"));
    }

    #[test]
    fn blocked_analysis_is_an_error_not_a_description() {
        let response = parse(json!({
            "promptFeedback": { "blockReason": "SAFETY" }
        }));
        match extract_answer_text(response) {
            Err(CapabilityError::InvalidResponse(message)) => {
                assert!(message.contains("SAFETY"))
            }
            other => panic!("unexpected result {other:?}"),
        }
    }

    #[test]
    fn analysis_text_is_joined_and_empty_answer_is_none() {
        let response = parse(json!({
            "candidates": [{ "content": { "parts": [
                { "text": " navy wool coat " },
                { "text": "with horn buttons" }
            ]}}]
        }));
        let text = extract_answer_text(response).expect("not blocked");
        assert_eq!(text.as_deref(), Some("navy wool coat\nwith horn buttons"));

        let empty = parse(json!({ "candidates": [] }));
        assert!(extract_answer_text(empty).expect("not blocked").is_none());
    }

    #[test]
    fn structured_text_accepts_fenced_json() {
        let value = parse_structured_text("```json\n{\"baseSize\": \"M\"}\n```")
            .expect("parses")
            .expect("present");
        assert_eq!(value["baseSize"], "M");
        assert!(parse_structured_text("   ").expect("empty ok").is_none());
        assert!(matches!(
            parse_structured_text("not json"),
            Err(CapabilityError::InvalidResponse(_))
        ));
    }

    #[test]
    fn error_body_prefers_api_message() {
        let (message, summary) =
            summarize_error_body(r#"{"error":{"code":400,"message":"Bad image"}}"#);
        assert_eq!(message.as_deref(), Some("Bad image"));
        assert!(summary.contains("400"));
        assert_eq!(summarize_error_body("").1, "empty response body");
    }

    #[test]
    fn payload_summary_hides_image_bytes_and_schema() {
        let payload = json!({
            "contents": [{ "role": "user", "parts": build_parts("p", &[MediaDescriptor::new(vec![9; 30], "image/png", 1, 1)]) }],
            "generationConfig": { "responseSchema": { "type": "OBJECT" } },
        });
        let summary = summarize_payload(&payload);
        assert_eq!(summary["parts"][1]["inlineData"]["dataLen"], 40);
        assert_eq!(summary["generationConfig"]["responseSchema"], "<schema>");
    }

    #[test]
    fn redacts_api_key() {
        let capability = GeminiCapability::from_config(&test_config("secret-key"));
        assert_eq!(
            capability.redact("url?key=secret-key failed"),
            "url?key=[redacted] failed"
        );
    }

    #[tokio::test]
    async fn missing_key_is_unavailable_before_any_request() {
        let capability = GeminiCapability::from_config(&test_config("  "));
        let err = capability
            .synthesize_image(
                &[],
                "prompt",
                SynthesisConfig {
                    aspect_ratio: AspectRatioBucket::Square,
                },
            )
            .await
            .expect_err("no key");
        assert!(matches!(err, CapabilityError::Unavailable(_)));
    }
}
