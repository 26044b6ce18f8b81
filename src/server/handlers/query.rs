use std::sync::Arc;

use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use serde_json::json;

use crate::core::errors::ApiError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct QueryRequest {
    pub question: String,
    pub session_id: Option<String>,
    pub user_id: Option<i64>,
}

pub async fn query(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<QueryRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let outcome = state
        .pipeline
        .answer(
            &payload.question,
            payload.session_id.as_deref(),
            payload.user_id,
        )
        .await?;

    Ok(Json(json!({
        "response": outcome.answer,
        "session_id": outcome.session_id,
        "chat_id": outcome.chat_id,
    })))
}
