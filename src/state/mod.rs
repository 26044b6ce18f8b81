use std::sync::Arc;

use crate::core::config::{AppConfig, AppPaths, ConfigService};
use crate::llm::generator_from_config;
use crate::pipeline::QueryPipeline;
use crate::search::GoogleSearchRetriever;
use crate::store::ChatStore;

pub mod error;

use error::InitializationError;

/// Application state shared across all routes.
///
/// Owns the store handle and the query pipeline; connection lifecycle
/// belongs to the process entry point, not to a module-level global.
#[derive(Clone)]
pub struct AppState {
    pub paths: Arc<AppPaths>,
    pub config: AppConfig,
    pub store: ChatStore,
    pub pipeline: Arc<QueryPipeline>,
}

impl AppState {
    pub async fn initialize() -> Result<Arc<Self>, InitializationError> {
        let paths = Arc::new(AppPaths::new());

        let config = ConfigService::new(paths.clone())
            .load()
            .map_err(|e| InitializationError::Config(e.into()))?;

        let store = ChatStore::new(paths.db_path.clone())
            .await
            .map_err(|e| InitializationError::Store(e.into()))?;

        let retriever = Arc::new(
            GoogleSearchRetriever::new(&config.search)
                .map_err(|e| InitializationError::Search(e.into()))?,
        );

        let generator =
            generator_from_config(&config.llm).map_err(|e| InitializationError::Llm(e.into()))?;

        let pipeline = Arc::new(QueryPipeline::new(
            store.clone(),
            retriever,
            generator,
            config.search.max_results,
            config.llm.instruction.clone(),
        ));

        Ok(Arc::new(AppState {
            paths,
            config,
            store,
            pipeline,
        }))
    }
}
