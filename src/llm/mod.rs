pub mod anthropic;
pub mod openai;
pub mod parser;
pub mod prompts;
pub mod provider;

use std::sync::Arc;
use std::time::Duration;

use crate::config::{api_key_for, AgentConfig};
use crate::errors::{TapwrightError, TapwrightResult};

/// Bind the configured LLM adapter. Model and auth are resolved here; the
/// engine only ever sees the capability trait.
pub fn provider_from_config(
    config: &AgentConfig,
) -> TapwrightResult<Arc<dyn provider::LlmProvider>> {
    let timeout = Duration::from_secs(config.llm_timeout_secs);
    match config.llm_provider.as_str() {
        "openai" => Ok(Arc::new(openai::OpenAiProvider::new(
            api_key_for("openai")?,
            config.model.clone(),
            config.temperature,
            timeout,
        )?)),
        "anthropic" => Ok(Arc::new(anthropic::AnthropicProvider::new(
            api_key_for("anthropic")?,
            config.model.clone(),
            config.temperature,
            timeout,
        )?)),
        other => Err(TapwrightError::Config(format!(
            "unknown LLM provider '{other}'"
        ))),
    }
}
