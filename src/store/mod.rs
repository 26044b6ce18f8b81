//! SQLite persistence for the question/answer trail.
//!
//! Sessions, chats, search passes and the model catalog live in one
//! database. Full-text search over chat history is delegated to an FTS5
//! index kept in sync by triggers, so application code never writes the
//! tokenized columns.

use std::path::PathBuf;
use std::time::Duration;

use serde::Serialize;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::core::errors::ApiError;

const SCHEMA_VERSION: i64 = 1;
const MAX_SEARCH_LIMIT: i64 = 100;

pub const CHAT_STATUS_PENDING: &str = "pending";
pub const CHAT_STATUS_ANSWERED: &str = "answered";
pub const CHAT_STATUS_FAILED: &str = "failed";

#[derive(Debug, Clone, Serialize)]
pub struct UserRow {
    pub id: i64,
    pub user_name: Option<String>,
    pub email: Option<String>,
    pub created_on: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionRow {
    pub id: String,
    pub user_id: Option<i64>,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatRow {
    pub id: i64,
    pub session_id: String,
    pub parent_id: Option<i64>,
    pub question_text: String,
    pub answer_text: Option<String>,
    pub model_id: Option<i64>,
    pub status: String,
    pub asked_at: String,
    pub answered_at: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchResultRow {
    pub id: i64,
    pub chat_id: i64,
    pub search_result: String,
    pub created_at: String,
}

#[derive(Debug, Clone)]
pub struct ChatStore {
    db_path: PathBuf,
    pool: SqlitePool,
}

impl ChatStore {
    pub async fn new(db_path: PathBuf) -> Result<Self, ApiError> {
        let connect_options = SqliteConnectOptions::new()
            .filename(&db_path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .foreign_keys(true)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .min_connections(1)
            .max_connections(8)
            .acquire_timeout(Duration::from_secs(5))
            .connect_with(connect_options)
            .await
            .map_err(ApiError::internal)?;

        let store = Self { db_path, pool };
        store.init_db().await?;
        Ok(store)
    }

    pub fn db_path(&self) -> &PathBuf {
        &self.db_path
    }

    async fn init_db(&self) -> Result<(), ApiError> {
        let version: i64 = sqlx::query_scalar("PRAGMA user_version")
            .fetch_one(&self.pool)
            .await
            .map_err(ApiError::internal)?;

        if version != SCHEMA_VERSION {
            self.create_schema().await?;
        }

        Ok(())
    }

    async fn create_schema(&self) -> Result<(), ApiError> {
        let statements = [
            "CREATE TABLE IF NOT EXISTS users (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_name TEXT,
                email TEXT UNIQUE,
                created_on TEXT NOT NULL DEFAULT (STRFTIME('%Y-%m-%dT%H:%M:%fZ', 'now'))
            )",
            "CREATE TABLE IF NOT EXISTS sessions (
                id TEXT PRIMARY KEY,
                user_id INTEGER REFERENCES users(id),
                created_at TEXT NOT NULL DEFAULT (STRFTIME('%Y-%m-%dT%H:%M:%fZ', 'now'))
            )",
            "CREATE INDEX IF NOT EXISTS idx_sessions_user_id ON sessions(user_id)",
            "CREATE TABLE IF NOT EXISTS models (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                model_name TEXT NOT NULL UNIQUE
            )",
            "CREATE TABLE IF NOT EXISTS chats (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                session_id TEXT NOT NULL REFERENCES sessions(id) ON DELETE CASCADE,
                parent_id INTEGER REFERENCES chats(id),
                question_text TEXT NOT NULL,
                answer_text TEXT,
                model_id INTEGER REFERENCES models(id),
                status TEXT NOT NULL DEFAULT 'pending'
                    CHECK(status IN ('pending', 'answered', 'failed')),
                asked_at TEXT NOT NULL DEFAULT (STRFTIME('%Y-%m-%dT%H:%M:%fZ', 'now')),
                answered_at TEXT
            )",
            "CREATE INDEX IF NOT EXISTS idx_chats_session_id ON chats(session_id, id)",
            "CREATE TABLE IF NOT EXISTS search_results (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                chat_id INTEGER NOT NULL REFERENCES chats(id) ON DELETE CASCADE,
                search_result TEXT NOT NULL DEFAULT '',
                created_at TEXT NOT NULL DEFAULT (STRFTIME('%Y-%m-%dT%H:%M:%fZ', 'now'))
            )",
            "CREATE INDEX IF NOT EXISTS idx_search_results_chat_id ON search_results(chat_id)",
            // FTS5 index over question/answer text, external-content so the
            // tokenized columns are derived from the chats rows themselves.
            "CREATE VIRTUAL TABLE IF NOT EXISTS chats_fts USING fts5(
                question_text,
                answer_text,
                content='chats',
                content_rowid='id'
            )",
            "CREATE TRIGGER IF NOT EXISTS chats_fts_insert
             AFTER INSERT ON chats BEGIN
                 INSERT INTO chats_fts(rowid, question_text, answer_text)
                 VALUES (NEW.id, NEW.question_text, COALESCE(NEW.answer_text, ''));
             END",
            "CREATE TRIGGER IF NOT EXISTS chats_fts_delete
             AFTER DELETE ON chats BEGIN
                 INSERT INTO chats_fts(chats_fts, rowid, question_text, answer_text)
                 VALUES ('delete', OLD.id, OLD.question_text, COALESCE(OLD.answer_text, ''));
             END",
            "CREATE TRIGGER IF NOT EXISTS chats_fts_update
             AFTER UPDATE ON chats BEGIN
                 INSERT INTO chats_fts(chats_fts, rowid, question_text, answer_text)
                 VALUES ('delete', OLD.id, OLD.question_text, COALESCE(OLD.answer_text, ''));
                 INSERT INTO chats_fts(rowid, question_text, answer_text)
                 VALUES (NEW.id, NEW.question_text, COALESCE(NEW.answer_text, ''));
             END",
        ];

        for statement in statements {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .map_err(ApiError::internal)?;
        }

        let pragma = format!("PRAGMA user_version = {}", SCHEMA_VERSION);
        sqlx::query(&pragma)
            .execute(&self.pool)
            .await
            .map_err(ApiError::internal)?;

        Ok(())
    }

    pub async fn create_user(
        &self,
        user_name: Option<&str>,
        email: Option<&str>,
    ) -> Result<UserRow, ApiError> {
        let result = sqlx::query("INSERT INTO users (user_name, email) VALUES (?1, ?2)")
            .bind(user_name)
            .bind(email)
            .execute(&self.pool)
            .await
            .map_err(ApiError::internal)?;

        let user_id = result.last_insert_rowid();
        self.find_user(user_id)
            .await?
            .ok_or_else(|| ApiError::Internal(format!("user {user_id} missing after insert")))
    }

    pub async fn find_user(&self, user_id: i64) -> Result<Option<UserRow>, ApiError> {
        let row = sqlx::query("SELECT id, user_name, email, created_on FROM users WHERE id = ?1")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(ApiError::internal)?;

        row.map(user_from_row).transpose().map_err(ApiError::internal)
    }

    pub async fn create_session(&self, user_id: Option<i64>) -> Result<SessionRow, ApiError> {
        let session_id = Uuid::new_v4().to_string();

        sqlx::query("INSERT INTO sessions (id, user_id) VALUES (?1, ?2)")
            .bind(&session_id)
            .bind(user_id)
            .execute(&self.pool)
            .await
            .map_err(ApiError::internal)?;

        self.get_session(&session_id)
            .await?
            .ok_or_else(|| ApiError::Internal(format!("session {session_id} missing after insert")))
    }

    pub async fn get_session(&self, session_id: &str) -> Result<Option<SessionRow>, ApiError> {
        let row = sqlx::query("SELECT id, user_id, created_at FROM sessions WHERE id = ?1")
            .bind(session_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(ApiError::internal)?;

        row.map(session_from_row)
            .transpose()
            .map_err(ApiError::internal)
    }

    /// Persist the question before any external call is made. The row stays
    /// `pending` until generation resolves it.
    pub async fn insert_chat(
        &self,
        session_id: &str,
        question_text: &str,
        parent_id: Option<i64>,
    ) -> Result<ChatRow, ApiError> {
        let result = sqlx::query(
            "INSERT INTO chats (session_id, question_text, parent_id) VALUES (?1, ?2, ?3)",
        )
        .bind(session_id)
        .bind(question_text)
        .bind(parent_id)
        .execute(&self.pool)
        .await
        .map_err(ApiError::internal)?;

        let chat_id = result.last_insert_rowid();
        self.get_chat(chat_id)
            .await?
            .ok_or_else(|| ApiError::Internal(format!("chat {chat_id} missing after insert")))
    }

    pub async fn get_chat(&self, chat_id: i64) -> Result<Option<ChatRow>, ApiError> {
        let row = sqlx::query(
            "SELECT id, session_id, parent_id, question_text, answer_text, model_id,
                    status, asked_at, answered_at
             FROM chats WHERE id = ?1",
        )
        .bind(chat_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(ApiError::internal)?;

        row.map(chat_from_row).transpose().map_err(ApiError::internal)
    }

    /// One row per search pass, recorded even when the URL list is empty.
    pub async fn record_search_result(
        &self,
        chat_id: i64,
        urls: &[String],
    ) -> Result<SearchResultRow, ApiError> {
        let joined = urls.join(",");

        let result =
            sqlx::query("INSERT INTO search_results (chat_id, search_result) VALUES (?1, ?2)")
                .bind(chat_id)
                .bind(&joined)
                .execute(&self.pool)
                .await
                .map_err(ApiError::internal)?;

        let row_id = result.last_insert_rowid();
        let row = sqlx::query(
            "SELECT id, chat_id, search_result, created_at FROM search_results WHERE id = ?1",
        )
        .bind(row_id)
        .fetch_one(&self.pool)
        .await
        .map_err(ApiError::internal)?;

        search_result_from_row(row).map_err(ApiError::internal)
    }

    pub async fn search_results_for_chat(
        &self,
        chat_id: i64,
    ) -> Result<Vec<SearchResultRow>, ApiError> {
        let rows = sqlx::query(
            "SELECT id, chat_id, search_result, created_at
             FROM search_results WHERE chat_id = ?1 ORDER BY id",
        )
        .bind(chat_id)
        .fetch_all(&self.pool)
        .await
        .map_err(ApiError::internal)?;

        rows.into_iter()
            .map(search_result_from_row)
            .collect::<Result<Vec<_>, _>>()
            .map_err(ApiError::internal)
    }

    pub async fn complete_chat(
        &self,
        chat_id: i64,
        answer_text: &str,
        model_id: Option<i64>,
    ) -> Result<(), ApiError> {
        sqlx::query(
            "UPDATE chats
             SET answer_text = ?1,
                 model_id = ?2,
                 status = 'answered',
                 answered_at = STRFTIME('%Y-%m-%dT%H:%M:%fZ', 'now')
             WHERE id = ?3",
        )
        .bind(answer_text)
        .bind(model_id)
        .bind(chat_id)
        .execute(&self.pool)
        .await
        .map_err(ApiError::internal)?;

        Ok(())
    }

    /// Generation gave up after its retries; the chat is no longer pending.
    pub async fn mark_chat_failed(&self, chat_id: i64) -> Result<(), ApiError> {
        sqlx::query("UPDATE chats SET status = 'failed' WHERE id = ?1")
            .bind(chat_id)
            .execute(&self.pool)
            .await
            .map_err(ApiError::internal)?;

        Ok(())
    }

    pub async fn session_chats(
        &self,
        session_id: &str,
        limit: i64,
    ) -> Result<Vec<ChatRow>, ApiError> {
        let limit = sanitize_limit(limit);

        let rows = sqlx::query(
            "SELECT id, session_id, parent_id, question_text, answer_text, model_id,
                    status, asked_at, answered_at
             FROM chats WHERE session_id = ?1 ORDER BY id LIMIT ?2",
        )
        .bind(session_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(ApiError::internal)?;

        rows.into_iter()
            .map(chat_from_row)
            .collect::<Result<Vec<_>, _>>()
            .map_err(ApiError::internal)
    }

    pub async fn ensure_model(&self, model_name: &str) -> Result<i64, ApiError> {
        sqlx::query("INSERT OR IGNORE INTO models (model_name) VALUES (?1)")
            .bind(model_name)
            .execute(&self.pool)
            .await
            .map_err(ApiError::internal)?;

        sqlx::query_scalar::<_, i64>("SELECT id FROM models WHERE model_name = ?1")
            .bind(model_name)
            .fetch_one(&self.pool)
            .await
            .map_err(ApiError::internal)
    }

    /// Full-text search over question and answer text, best match first.
    pub async fn search_chats(&self, query: &str, limit: i64) -> Result<Vec<ChatRow>, ApiError> {
        let escaped = escape_fts_query(query);
        if escaped.is_empty() {
            return Ok(Vec::new());
        }
        let limit = sanitize_limit(limit);

        let rows = sqlx::query(
            "SELECT chats.id, chats.session_id, chats.parent_id, chats.question_text,
                    chats.answer_text, chats.model_id, chats.status, chats.asked_at,
                    chats.answered_at
             FROM chats_fts
             JOIN chats ON chats.id = chats_fts.rowid
             WHERE chats_fts MATCH ?1
             ORDER BY rank
             LIMIT ?2",
        )
        .bind(&escaped)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(ApiError::internal)?;

        rows.into_iter()
            .map(chat_from_row)
            .collect::<Result<Vec<_>, _>>()
            .map_err(ApiError::internal)
    }
}

fn user_from_row(row: sqlx::sqlite::SqliteRow) -> Result<UserRow, sqlx::Error> {
    Ok(UserRow {
        id: row.try_get("id")?,
        user_name: row.try_get("user_name")?,
        email: row.try_get("email")?,
        created_on: row.try_get("created_on")?,
    })
}

fn session_from_row(row: sqlx::sqlite::SqliteRow) -> Result<SessionRow, sqlx::Error> {
    Ok(SessionRow {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        created_at: row.try_get("created_at")?,
    })
}

fn chat_from_row(row: sqlx::sqlite::SqliteRow) -> Result<ChatRow, sqlx::Error> {
    Ok(ChatRow {
        id: row.try_get("id")?,
        session_id: row.try_get("session_id")?,
        parent_id: row.try_get("parent_id")?,
        question_text: row.try_get("question_text")?,
        answer_text: row.try_get("answer_text")?,
        model_id: row.try_get("model_id")?,
        status: row.try_get("status")?,
        asked_at: row.try_get("asked_at")?,
        answered_at: row.try_get("answered_at")?,
    })
}

fn search_result_from_row(row: sqlx::sqlite::SqliteRow) -> Result<SearchResultRow, sqlx::Error> {
    Ok(SearchResultRow {
        id: row.try_get("id")?,
        chat_id: row.try_get("chat_id")?,
        search_result: row.try_get("search_result")?,
        created_at: row.try_get("created_at")?,
    })
}

fn sanitize_limit(limit: i64) -> i64 {
    if limit <= 0 {
        return 1;
    }
    limit.min(MAX_SEARCH_LIMIT)
}

/// Quote each whitespace-separated token so user input cannot inject FTS5
/// query syntax. Tokens are AND-ed by FTS5.
fn escape_fts_query(query: &str) -> String {
    query
        .split_whitespace()
        .map(|token| format!("\"{}\"", token.replace('"', "\"\"")))
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn test_store() -> ChatStore {
        let path = std::env::temp_dir().join(format!("sibyl-store-test-{}.db", Uuid::new_v4()));
        ChatStore::new(path).await.unwrap()
    }

    #[tokio::test]
    async fn chat_lifecycle_pending_to_answered() {
        let store = test_store().await;

        let session = store.create_session(None).await.unwrap();
        assert!(session.user_id.is_none());

        let chat = store
            .insert_chat(&session.id, "What is the capital of France?", None)
            .await
            .unwrap();
        assert_eq!(chat.status, CHAT_STATUS_PENDING);
        assert!(chat.answer_text.is_none());
        assert!(chat.answered_at.is_none());

        let model_id = store.ensure_model("gemini-2.0-flash").await.unwrap();
        store
            .complete_chat(chat.id, "Paris is the capital.", Some(model_id))
            .await
            .unwrap();

        let chat = store.get_chat(chat.id).await.unwrap().unwrap();
        assert_eq!(chat.status, CHAT_STATUS_ANSWERED);
        assert_eq!(chat.answer_text.as_deref(), Some("Paris is the capital."));
        assert_eq!(chat.model_id, Some(model_id));
        assert!(chat.answered_at.is_some());
    }

    #[tokio::test]
    async fn sessions_attach_to_existing_users_only() {
        let store = test_store().await;

        assert!(store.find_user(42).await.unwrap().is_none());

        let user = store
            .create_user(Some("Ada"), Some("ada@example.com"))
            .await
            .unwrap();
        let session = store.create_session(Some(user.id)).await.unwrap();
        assert_eq!(session.user_id, Some(user.id));

        let fetched = store.get_session(&session.id).await.unwrap().unwrap();
        assert_eq!(fetched.id, session.id);
    }

    #[tokio::test]
    async fn search_result_row_recorded_even_when_empty() {
        let store = test_store().await;
        let session = store.create_session(None).await.unwrap();
        let chat = store.insert_chat(&session.id, "anything", None).await.unwrap();

        store.record_search_result(chat.id, &[]).await.unwrap();
        let rows = store.search_results_for_chat(chat.id).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].search_result, "");

        store
            .record_search_result(chat.id, &["https://example.com".to_string()])
            .await
            .unwrap();
        let rows = store.search_results_for_chat(chat.id).await.unwrap();
        assert_eq!(rows[1].search_result, "https://example.com");
    }

    #[tokio::test]
    async fn fts_index_follows_question_and_answer_text() {
        let store = test_store().await;
        let session = store.create_session(None).await.unwrap();
        let chat = store
            .insert_chat(&session.id, "How does the borrow checker work?", None)
            .await
            .unwrap();

        // Question text is searchable before any answer exists.
        let hits = store.search_chats("borrow", 10).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, chat.id);

        store
            .complete_chat(chat.id, "Ownership rules are enforced at compile time.", None)
            .await
            .unwrap();

        // The update trigger reindexes the row: new answer terms match...
        let hits = store.search_chats("ownership", 10).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, chat.id);

        // ...question terms still match, and absent terms do not.
        assert_eq!(store.search_chats("borrow", 10).await.unwrap().len(), 1);
        assert!(store.search_chats("garbage", 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn fts_query_syntax_cannot_be_injected() {
        let store = test_store().await;
        let session = store.create_session(None).await.unwrap();
        store
            .insert_chat(&session.id, "plain question text", None)
            .await
            .unwrap();

        // Operators and quotes are treated as literal tokens, not syntax.
        assert!(store.search_chats("\"unclosed", 10).await.unwrap().is_empty());
        assert!(store
            .search_chats("question AND text", 10)
            .await
            .unwrap()
            .is_empty());
        assert!(store.search_chats("   ", 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn session_chats_ordered_by_insertion() {
        let store = test_store().await;
        let session = store.create_session(None).await.unwrap();

        let first = store.insert_chat(&session.id, "first", None).await.unwrap();
        let second = store
            .insert_chat(&session.id, "second", Some(first.id))
            .await
            .unwrap();

        let chats = store.session_chats(&session.id, 10).await.unwrap();
        assert_eq!(chats.len(), 2);
        assert_eq!(chats[0].id, first.id);
        assert_eq!(chats[1].id, second.id);
        assert_eq!(chats[1].parent_id, Some(first.id));
    }

    #[tokio::test]
    async fn ensure_model_is_idempotent() {
        let store = test_store().await;
        let first = store.ensure_model("gemini-2.0-flash").await.unwrap();
        let second = store.ensure_model("gemini-2.0-flash").await.unwrap();
        assert_eq!(first, second);

        let other = store.ensure_model("gpt-4o-mini").await.unwrap();
        assert_ne!(first, other);
    }

    #[tokio::test]
    async fn failed_chat_is_not_left_pending() {
        let store = test_store().await;
        let session = store.create_session(None).await.unwrap();
        let chat = store.insert_chat(&session.id, "doomed", None).await.unwrap();

        store.mark_chat_failed(chat.id).await.unwrap();

        let chat = store.get_chat(chat.id).await.unwrap().unwrap();
        assert_eq!(chat.status, CHAT_STATUS_FAILED);
        assert!(chat.answer_text.is_none());
    }
}
