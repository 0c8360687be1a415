use std::time::Duration;

use async_trait::async_trait;

use crate::errors::{TapwrightError, TapwrightResult};
use crate::llm::provider::LlmProvider;

const DEFAULT_MODEL: &str = "gpt-4o";
const MAX_TOKENS: u32 = 1024;

pub struct OpenAiProvider {
    api_base: String,
    api_key: String,
    model: String,
    temperature: f64,
    client: reqwest::Client,
}

impl OpenAiProvider {
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
            api_base: "https://api.openai.com/v1/chat/completions".to_string(),
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

    async fn chat(&self, messages: serde_json::Value) -> TapwrightResult<String> {
        let body = serde_json::json!({
            "model": self.model,
            "messages": messages,
            "temperature": self.temperature,
            "max_tokens": MAX_TOKENS,
        });

        tracing::debug!(
            provider = "openai",
            model = %self.model,
            "sending LLM request"
        );

        let response = self
            .client
            .post(&self.api_base)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let err_body = response.text().await.unwrap_or_default();
            return Err(TapwrightError::Llm(format!("{status}: {err_body}")));
        }

        let json: serde_json::Value = response.json().await?;
        let content = json["choices"][0]["message"]["content"]
            .as_str()
            .unwrap_or("")
            .to_string();

        tracing::debug!(content_len = content.len(), "LLM response received");
        Ok(content)
    }
}

#[async_trait]
impl LlmProvider for OpenAiProvider {
    fn name(&self) -> &str {
        "openai"
    }

    async fn query(&self, prompt: &str, system: Option<&str>) -> TapwrightResult<String> {
        let mut messages = Vec::new();
        if let Some(sys) = system {
            messages.push(serde_json::json!({"role": "system", "content": sys}));
        }
        messages.push(serde_json::json!({"role": "user", "content": prompt}));
        self.chat(serde_json::Value::Array(messages)).await
    }

    async fn query_with_vision(
        &self,
        prompt: &str,
        image_base64: &str,
        system: Option<&str>,
    ) -> TapwrightResult<String> {
        let mut messages = Vec::new();
        if let Some(sys) = system {
            messages.push(serde_json::json!({"role": "system", "content": sys}));
        }
        messages.push(serde_json::json!({
            "role": "user",
            "content": [
                {
                    "type": "image_url",
                    "image_url": {
                        "url": format!("data:image/png;base64,{image_base64}")
                    }
                },
                { "type": "text", "text": prompt }
            ]
        }));
        self.chat(serde_json::Value::Array(messages)).await
    }
}
