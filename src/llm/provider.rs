use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::core::errors::ApiError;

/// Streaming text generation capability, one implementation per provider.
/// Fragments arrive in order; the caller concatenates them into the final
/// answer.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    /// provider name (e.g. "gemini", "openai_compat")
    fn name(&self) -> &str;

    /// model identifier the provider will answer with
    fn model(&self) -> &str;

    async fn stream_generate(
        &self,
        prompt: &str,
    ) -> Result<mpsc::Receiver<Result<String, ApiError>>, ApiError>;
}
