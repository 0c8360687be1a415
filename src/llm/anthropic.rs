use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::errors::{TapwrightError, TapwrightResult};
use crate::llm::provider::LlmProvider;

const DEFAULT_MODEL: &str = "claude-sonnet-4-20250514";
const API_BASE: &str = "https://api.anthropic.com/v1";
const ANTHROPIC_VERSION: &str = "2023-06-01";
const MAX_TOKENS: u32 = 1024;

pub struct AnthropicProvider {
    api_base: String,
    api_key: String,
    model: String,
    temperature: f64,
    client: reqwest::Client,
}

impl AnthropicProvider {
    pub fn new(
        api_key: String,
        model: Option<String>,
        temperature: f64,
        timeout: Duration,
    ) -> TapwrightResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| TapwrightError::Llm(format!("build HTTP client: {e}")))?;
        Ok(Self {
            api_base: API_BASE.to_string(),
            api_key,
            model: model.unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            temperature,
            client,
        })
    }

    pub fn with_api_base(mut self, api_base: String) -> Self {
        self.api_base = api_base;
        self
    }

    async fn send(
        &self,
        content: Vec<ContentBlock>,
        system: Option<&str>,
    ) -> TapwrightResult<String> {
        let body = MessagesRequest {
            model: self.model.clone(),
            max_tokens: MAX_TOKENS,
            temperature: self.temperature,
            system: system.map(str::to_string),
            messages: vec![Message {
                role: "user".to_string(),
                content,
            }],
        };

        let url = format!("{}/messages", self.api_base.trim_end_matches('/'));
        tracing::debug!(provider = "anthropic", model = %self.model, "sending LLM request");

        let response = self
            .client
            .post(url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response
                .text()
                .await
                .unwrap_or_else(|_| "<response unavailable>".to_string());
            return Err(TapwrightError::Llm(format!("{status}: {text}")));
        }

        let parsed: MessagesResponse = response.json().await?;
        let content = parsed
            .content
            .iter()
            .filter_map(|block| block.text.as_deref())
            .collect::<Vec<_>>()
            .join("\n");

        if content.is_empty() {
            return Err(TapwrightError::Llm("response missing text content".into()));
        }
        tracing::debug!(content_len = content.len(), "LLM response received");
        Ok(content)
    }
}

#[async_trait]
impl LlmProvider for AnthropicProvider {
    fn name(&self) -> &str {
        "anthropic"
    }

    async fn query(&self, prompt: &str, system: Option<&str>) -> TapwrightResult<String> {
        self.send(vec![ContentBlock::text(prompt)], system).await
    }

    async fn query_with_vision(
        &self,
        prompt: &str,
        image_base64: &str,
        system: Option<&str>,
    ) -> TapwrightResult<String> {
        self.send(
            vec![ContentBlock::image(image_base64), ContentBlock::text(prompt)],
            system,
        )
        .await
    }
}

#[derive(Debug, Serialize)]
struct MessagesRequest {
    model: String,
    max_tokens: u32,
    temperature: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    messages: Vec<Message>,
}

#[derive(Debug, Serialize)]
struct Message {
    role: String,
    content: Vec<ContentBlock>,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentBlock {
    Text { text: String },
    Image { source: ImageSource },
}

impl ContentBlock {
    fn text(text: &str) -> Self {
        ContentBlock::Text {
            text: text.to_string(),
        }
    }

    fn image(base64_data: &str) -> Self {
        ContentBlock::Image {
            source: ImageSource {
                source_type: "base64".to_string(),
                media_type: "image/png".to_string(),
                data: base64_data.to_string(),
            },
        }
    }
}

#[derive(Debug, Serialize)]
struct ImageSource {
    #[serde(rename = "type")]
    source_type: String,
    media_type: String,
    data: String,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    content: Vec<ResponseBlock>,
}

#[derive(Debug, Deserialize)]
struct ResponseBlock {
    #[serde(default)]
    text: Option<String>,
}
