use async_trait::async_trait;

use crate::errors::TapwrightResult;

/// Unified LLM capability consumed by the decision engine. Implementations
/// wrap one vendor's text and multimodal APIs; model selection and auth are
/// construction-time concerns.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Provider identifier (matches the config key).
    fn name(&self) -> &str;

    /// Text-only query. Returns the raw assistant text.
    async fn query(&self, prompt: &str, system: Option<&str>) -> TapwrightResult<String>;

    /// Vision query with a base64 PNG attached.
    async fn query_with_vision(
        &self,
        prompt: &str,
        image_base64: &str,
        system: Option<&str>,
    ) -> TapwrightResult<String>;
}
