//! The query pipeline: session resolution, question persistence, search
//! retrieval, answer generation, answer persistence.
//!
//! The question is written before any external call so it survives
//! downstream failures. Search failures degrade to an empty context (the
//! cause is logged and a search_results row is still written); generation
//! failures are retried a bounded number of times and then recorded as a
//! failed chat instead of leaving it pending forever.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;

use crate::core::errors::ApiError;
use crate::llm::{build_prompt, TextGenerator};
use crate::search::SearchRetriever;
use crate::store::{ChatStore, SessionRow};

const GENERATION_ATTEMPTS: u32 = 3;
const GENERATION_RETRY_DELAY: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, Serialize)]
pub struct QueryOutcome {
    pub answer: String,
    pub session_id: String,
    pub chat_id: i64,
}

pub struct QueryPipeline {
    store: ChatStore,
    retriever: Arc<dyn SearchRetriever>,
    generator: Arc<dyn TextGenerator>,
    max_results: usize,
    instruction: String,
}

impl QueryPipeline {
    pub fn new(
        store: ChatStore,
        retriever: Arc<dyn SearchRetriever>,
        generator: Arc<dyn TextGenerator>,
        max_results: usize,
        instruction: String,
    ) -> Self {
        Self {
            store,
            retriever,
            generator,
            max_results,
            instruction,
        }
    }

    pub async fn answer(
        &self,
        question: &str,
        session_id: Option<&str>,
        user_id: Option<i64>,
    ) -> Result<QueryOutcome, ApiError> {
        let question = question.trim();
        if question.is_empty() {
            return Err(ApiError::BadRequest("question must not be empty".to_string()));
        }

        let session = self.resolve_session(session_id, user_id).await?;

        let chat = self.store.insert_chat(&session.id, question, None).await?;
        tracing::info!("chat {} opened in session {}", chat.id, session.id);

        let contexts = match self.retriever.retrieve(question, self.max_results).await {
            Ok(contexts) => contexts,
            Err(err) => {
                tracing::warn!("search retrieval failed for chat {}: {}", chat.id, err);
                Vec::new()
            }
        };

        let urls: Vec<String> = contexts.iter().map(|c| c.url.clone()).collect();
        self.store.record_search_result(chat.id, &urls).await?;

        let prompt = build_prompt(question, &contexts, &self.instruction);
        let answer = match self.generate_with_retry(&prompt).await {
            Ok(answer) => answer,
            Err(err) => {
                if let Err(store_err) = self.store.mark_chat_failed(chat.id).await {
                    tracing::error!("failed to mark chat {} failed: {}", chat.id, store_err);
                }
                return Err(err);
            }
        };

        let model_id = self.store.ensure_model(self.generator.model()).await?;
        self.store
            .complete_chat(chat.id, &answer, Some(model_id))
            .await?;
        tracing::info!("chat {} answered ({} context pages)", chat.id, urls.len());

        Ok(QueryOutcome {
            answer,
            session_id: session.id,
            chat_id: chat.id,
        })
    }

    async fn resolve_session(
        &self,
        session_id: Option<&str>,
        user_id: Option<i64>,
    ) -> Result<SessionRow, ApiError> {
        if let Some(id) = session_id {
            return self
                .store
                .get_session(id)
                .await?
                .ok_or_else(|| ApiError::NotFound(format!("session {id} not found")));
        }

        if let Some(id) = user_id {
            if self.store.find_user(id).await?.is_none() {
                return Err(ApiError::NotFound(format!("user {id} not found")));
            }
        }

        self.store.create_session(user_id).await
    }

    async fn generate_with_retry(&self, prompt: &str) -> Result<String, ApiError> {
        let mut last_err = None;

        for attempt in 1..=GENERATION_ATTEMPTS {
            match self.generate_once(prompt).await {
                Ok(answer) => return Ok(answer),
                Err(err) => {
                    tracing::warn!(
                        "generation attempt {}/{} failed: {}",
                        attempt,
                        GENERATION_ATTEMPTS,
                        err
                    );
                    last_err = Some(err);
                    if attempt < GENERATION_ATTEMPTS {
                        tokio::time::sleep(GENERATION_RETRY_DELAY).await;
                    }
                }
            }
        }

        Err(last_err
            .unwrap_or_else(|| ApiError::Internal("generation produced no attempts".to_string())))
    }

    /// Drain the fragment stream fully; the concatenation is the answer.
    async fn generate_once(&self, prompt: &str) -> Result<String, ApiError> {
        let mut rx = self.generator.stream_generate(prompt).await?;

        let mut answer = String::new();
        while let Some(fragment) = rx.recv().await {
            answer.push_str(&fragment?);
        }

        Ok(answer)
    }
}
