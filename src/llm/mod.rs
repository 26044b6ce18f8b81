pub mod gemini;
pub mod openai_compat;
pub mod prompt;
pub mod provider;

use std::sync::Arc;

use crate::core::config::LlmConfig;
use crate::core::errors::ApiError;

pub use gemini::GeminiGenerator;
pub use openai_compat::OpenAiCompatGenerator;
pub use prompt::build_prompt;
pub use provider::TextGenerator;

/// Provider selection is a configuration value, not a type hierarchy.
pub fn generator_from_config(config: &LlmConfig) -> Result<Arc<dyn TextGenerator>, ApiError> {
    match config.provider.as_str() {
        "gemini" => Ok(Arc::new(GeminiGenerator::new(
            config.api_key.clone(),
            config.model.clone(),
        ))),
        "openai_compat" => {
            let base_url = config
                .base_url
                .clone()
                .ok_or_else(|| ApiError::BadRequest("llm.base_url is required".to_string()))?;
            Ok(Arc::new(OpenAiCompatGenerator::new(
                base_url,
                config.api_key.clone(),
                config.model.clone(),
            )))
        }
        other => Err(ApiError::BadRequest(format!(
            "unknown llm provider: {other}"
        ))),
    }
}
