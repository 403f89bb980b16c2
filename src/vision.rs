//! Vision-model seam: image + prompt in, freeform text out.
//!
//! The model is consumed as an opaque service. The trait deliberately
//! returns the raw response text rather than parsed JSON: models disobey
//! formatting instructions often enough that trusting their output against
//! the typed schema without passing through the repairer first is a bug.
//! Parsing belongs to [`crate::pipeline::repair`].
//!
//! The built-in [`OpenAiVision`] adapter speaks the OpenAI-compatible
//! `chat/completions` dialect (also served by Ollama, LM Studio and most
//! gateway proxies), attaching the image as a base64 data-URI content part.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use crate::error::ExtractError;
use crate::pipeline::normalize::ImagePayload;

/// A vision-capable model: accepts system instructions, a user prompt and
/// one image, returns the model's freeform text reply.
#[async_trait]
pub trait VisionModel: Send + Sync {
    async fn complete(
        &self,
        system: &str,
        user: &str,
        image: &ImagePayload,
    ) -> Result<String, ExtractError>;
}

/// OpenAI-compatible chat-completions adapter.
pub struct OpenAiVision {
    base_url: String,
    api_key: Option<String>,
    model: String,
    temperature: f32,
    max_tokens: usize,
    client: reqwest::Client,
}

impl OpenAiVision {
    /// Build an adapter for the endpoint at `base_url` (e.g.
    /// `https://api.openai.com/v1` or `http://localhost:11434/v1`).
    pub fn new(
        base_url: impl Into<String>,
        api_key: Option<String>,
        model: impl Into<String>,
        temperature: f32,
        max_tokens: usize,
        timeout_secs: u64,
    ) -> Result<Self, ExtractError> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| ExtractError::Internal(format!("http client: {e}")))?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
            model: model.into(),
            temperature,
            max_tokens,
            client,
        })
    }
}

#[derive(Deserialize)]
struct ChatReply {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Deserialize)]
struct ChatMessage {
    content: Option<String>,
}

#[async_trait]
impl VisionModel for OpenAiVision {
    async fn complete(
        &self,
        system: &str,
        user: &str,
        image: &ImagePayload,
    ) -> Result<String, ExtractError> {
        let body = json!({
            "model": self.model,
            "temperature": self.temperature,
            "max_tokens": self.max_tokens,
            "messages": [
                {"role": "system", "content": system},
                {"role": "user", "content": [
                    {"type": "text", "text": user},
                    {"type": "image_url", "image_url": {"url": image.data_uri()}}
                ]}
            ]
        });

        let url = format!("{}/chat/completions", self.base_url);
        let mut request = self.client.post(&url).json(&body);
        if let Some(ref key) = self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await.map_err(|e| ExtractError::VisionApi {
            retries: 0,
            detail: e.to_string(),
        })?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(ExtractError::VisionApi {
                retries: 0,
                detail: format!("HTTP {status}: {text}"),
            });
        }

        let reply: ChatReply = response.json().await.map_err(|e| ExtractError::VisionApi {
            retries: 0,
            detail: format!("bad completion reply: {e}"),
        })?;

        let content = reply
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .unwrap_or_default();

        debug!(chars = content.len(), model = %self.model, "vision model replied");
        Ok(content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chat_reply_deserialises() {
        let json = r#"{"choices":[{"message":{"role":"assistant","content":"{\"metadata\":{}}"}}]}"#;
        let reply: ChatReply = serde_json::from_str(json).unwrap();
        assert_eq!(
            reply.choices[0].message.content.as_deref(),
            Some("{\"metadata\":{}}")
        );
    }

    #[test]
    fn chat_reply_tolerates_null_content() {
        let json = r#"{"choices":[{"message":{"role":"assistant","content":null}}]}"#;
        let reply: ChatReply = serde_json::from_str(json).unwrap();
        assert!(reply.choices[0].message.content.is_none());
    }
}
