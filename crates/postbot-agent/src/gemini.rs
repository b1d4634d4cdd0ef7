use std::time::Duration;

use async_trait::async_trait;
use base64::Engine as _;
use postbot_core::config::CaptionConfig;
use postbot_scheduler::{CaptionGenerator, GenerationError};
use serde::Deserialize;
use tracing::{debug, warn};

use crate::error::AgentError;

const CAPTION_SYSTEM_INSTRUCTION: &str = "You are a social media expert who writes viral captions \
for short-form video platforms. Look at the attached media and write a short, engaging caption. \
The caption must be concise, catchy, under 150 characters, and include 3-5 relevant, trending \
hashtags and one or two emojis. Output the caption and hashtags only, as a single block of text.";

const CAPTION_USER_PROMPT: &str = "Write a caption for this media.";

/// Captions media with Gemini `generateContent`, sending the bytes inline.
pub struct GeminiCaptioner {
    client: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
    temperature: f32,
}

impl GeminiCaptioner {
    pub fn new(api_key: String, config: &CaptionConfig) -> Result<Self, AgentError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            api_key,
            model: config.model.clone(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            temperature: config.temperature,
        })
    }
}

#[async_trait]
impl CaptionGenerator for GeminiCaptioner {
    fn name(&self) -> &str {
        "gemini"
    }

    async fn generate_caption(
        &self,
        bytes: &[u8],
        mime_type: &str,
    ) -> Result<String, GenerationError> {
        let url = format!(
            "{}/v1beta/models/{}:generateContent",
            self.base_url, self.model
        );
        let body = build_request_body(bytes, mime_type, self.temperature);

        debug!(model = %self.model, size = bytes.len(), "requesting caption from Gemini");

        let resp = self
            .client
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| GenerationError::new(format!("network: {e}")))?;

        let status = resp.status().as_u16();
        if status == 429 {
            warn!("Gemini rate limit hit");
            return Err(GenerationError::new("rate limited"));
        }
        if !resp.status().is_success() {
            let text = resp.text().await.unwrap_or_default();
            warn!(status, body = %text, "Gemini API error");
            return Err(GenerationError::new(format!(
                "caption API error ({status}): {text}"
            )));
        }

        let api_resp: ApiResponse = resp.json().await.map_err(|e| {
            GenerationError::new(format!("caption API returned malformed response: {e}"))
        })?;
        parse_response(api_resp)
    }
}

fn build_request_body(bytes: &[u8], mime_type: &str, temperature: f32) -> serde_json::Value {
    let data = base64::engine::general_purpose::STANDARD.encode(bytes);
    serde_json::json!({
        "systemInstruction": {
            "parts": [{ "text": CAPTION_SYSTEM_INSTRUCTION }],
        },
        "contents": [{
            "role": "user",
            "parts": [
                { "inlineData": { "mimeType": mime_type, "data": data } },
                { "text": CAPTION_USER_PROMPT },
            ],
        }],
        "generationConfig": { "temperature": temperature },
    })
}

/// Join the text parts of the first candidate.
fn parse_response(resp: ApiResponse) -> Result<String, GenerationError> {
    let text: String = resp
        .candidates
        .into_iter()
        .next()
        .and_then(|c| c.content)
        .map(|content| {
            content
                .parts
                .into_iter()
                .filter_map(|p| p.text)
                .collect::<Vec<_>>()
                .join("")
        })
        .unwrap_or_default();

    let caption = text.trim();
    if caption.is_empty() {
        return Err(GenerationError::new("caption API returned no text"));
    }
    Ok(caption.to_string())
}

// --- Gemini API response types -----------------------------------------------

#[derive(Deserialize)]
struct ApiResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize)]
struct Candidate {
    content: Option<Content>,
}

#[derive(Deserialize)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Deserialize)]
struct Part {
    text: Option<String>,
}
