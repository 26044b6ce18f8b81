use thiserror::Error;

#[derive(Debug, Error)]
pub enum InitializationError {
    #[error("failed to load configuration: {0}")]
    Config(anyhow::Error),
    #[error("failed to initialize store: {0}")]
    Store(anyhow::Error),
    #[error("failed to initialize search retriever: {0}")]
    Search(anyhow::Error),
    #[error("failed to initialize llm provider: {0}")]
    Llm(anyhow::Error),
}
