use chrono::Utc;
use serde::{de::DeserializeOwned, Serialize};
use sqlx::{sqlite::SqliteRow, Row};

use underwrite_core::domain::conversation::{
    ConversationThread, ConversationTurn, Role, ThreadHandle,
};

use super::{parse_timestamp, RepositoryError, ThreadRepository, ThreadSummary};
use crate::DbPool;

pub struct SqlThreadRepository {
    pool: DbPool,
}

impl SqlThreadRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl ThreadRepository for SqlThreadRepository {
    async fn save(
        &self,
        session_id: Option<&str>,
        thread: &ConversationThread,
    ) -> Result<(), RepositoryError> {
        let handle = thread.continuation_handle();
        let now = Utc::now().to_rfc3339();
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "INSERT INTO conversation_threads (handle, session_id, created_at, updated_at)
             VALUES (?, ?, ?, ?)
             ON CONFLICT(handle) DO UPDATE SET
                session_id = COALESCE(excluded.session_id, conversation_threads.session_id),
                updated_at = excluded.updated_at",
        )
        .bind(&handle.0)
        .bind(session_id)
        .bind(thread.created_at().to_rfc3339())
        .bind(&now)
        .execute(&mut *tx)
        .await?;

        let stored: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM conversation_turns WHERE handle = ?")
                .bind(&handle.0)
                .fetch_one(&mut *tx)
                .await?;
        let stored = usize::try_from(stored)
            .map_err(|_| RepositoryError::Decode(format!("negative turn count: {stored}")))?;
        if stored > thread.len() {
            return Err(RepositoryError::Decode(format!(
                "thread {handle} has {stored} stored turns but only {} in memory",
                thread.len()
            )));
        }

        for (seq, turn) in thread.turns().iter().enumerate().skip(stored) {
            sqlx::query(
                "INSERT INTO conversation_turns (
                    handle,
                    seq,
                    role,
                    author_name,
                    content,
                    tool_call_json,
                    tool_result_json,
                    metadata_json,
                    created_at
                 ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(&handle.0)
            .bind(seq as i64)
            .bind(turn.role.as_str())
            .bind(&turn.author_name)
            .bind(&turn.content)
            .bind(encode_optional(turn.tool_call.as_ref())?)
            .bind(encode_optional(turn.tool_result.as_ref())?)
            .bind(encode_optional(turn.metadata.as_ref())?)
            .bind(turn.created_at.to_rfc3339())
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn load(
        &self,
        handle: &ThreadHandle,
    ) -> Result<Option<ConversationThread>, RepositoryError> {
        let Some(row) = sqlx::query("SELECT created_at FROM conversation_threads WHERE handle = ?")
            .bind(&handle.0)
            .fetch_optional(&self.pool)
            .await?
        else {
            return Ok(None);
        };
        let created_at = parse_timestamp("created_at", row.try_get("created_at")?)?;

        let turns = sqlx::query(
            "SELECT
                role,
                author_name,
                content,
                tool_call_json,
                tool_result_json,
                metadata_json,
                created_at
             FROM conversation_turns
             WHERE handle = ?
             ORDER BY seq ASC",
        )
        .bind(&handle.0)
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(turn_from_row)
        .collect::<Result<Vec<_>, _>>()?;

        ConversationThread::restore(handle.clone(), created_at, turns)
            .map(Some)
            .map_err(|error| RepositoryError::Decode(format!("thread {handle}: {error}")))
    }

    async fn delete(&self, handle: &ThreadHandle) -> Result<bool, RepositoryError> {
        let result = sqlx::query("DELETE FROM conversation_threads WHERE handle = ?")
            .bind(&handle.0)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn list_recent(&self, limit: u32) -> Result<Vec<ThreadSummary>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT
                t.handle,
                t.session_id,
                t.updated_at,
                (SELECT COUNT(*) FROM conversation_turns c WHERE c.handle = t.handle) AS turn_count
             FROM conversation_threads t
             ORDER BY t.updated_at DESC, t.handle ASC
             LIMIT ?",
        )
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(summary_from_row).collect()
    }
}

fn encode_optional<T: Serialize>(value: Option<&T>) -> Result<Option<String>, RepositoryError> {
    value
        .map(|inner| {
            serde_json::to_string(inner)
                .map_err(|error| RepositoryError::Decode(format!("encode turn field: {error}")))
        })
        .transpose()
}

fn decode_optional<T: DeserializeOwned>(
    column: &'static str,
    value: Option<String>,
) -> Result<Option<T>, RepositoryError> {
    value
        .map(|raw| {
            serde_json::from_str(&raw)
                .map_err(|error| {
                    RepositoryError::Decode(format!("invalid json in {column}: {error}"))
                })
        })
        .transpose()
}

fn turn_from_row(row: SqliteRow) -> Result<ConversationTurn, RepositoryError> {
    let role_raw: String = row.try_get("role")?;
    let role = Role::parse(&role_raw)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown turn role: {role_raw}")))?;

    Ok(ConversationTurn {
        role,
        author_name: row.try_get("author_name")?,
        content: row.try_get("content")?,
        tool_call: decode_optional("tool_call_json", row.try_get("tool_call_json")?)?,
        tool_result: decode_optional("tool_result_json", row.try_get("tool_result_json")?)?,
        metadata: decode_optional("metadata_json", row.try_get("metadata_json")?)?,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
    })
}

fn summary_from_row(row: SqliteRow) -> Result<ThreadSummary, RepositoryError> {
    let turn_count: i64 = row.try_get("turn_count")?;
    Ok(ThreadSummary {
        handle: ThreadHandle(row.try_get("handle")?),
        session_id: row.try_get("session_id")?,
        turn_count: usize::try_from(turn_count)
            .map_err(|_| RepositoryError::Decode(format!("negative turn count: {turn_count}")))?,
        updated_at: parse_timestamp("updated_at", row.try_get("updated_at")?)?,
    })
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use underwrite_core::domain::conversation::{
        ConversationThread, ConversationTurn, ThreadHandle, ToolCall, ToolOutcome, ToolResult,
        TurnMetadata,
    };

    use super::SqlThreadRepository;
    use crate::repositories::ThreadRepository;
    use crate::{connect_with_settings, migrations};

    async fn setup() -> SqlThreadRepository {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");
        SqlThreadRepository::new(pool)
    }

    fn sample_thread() -> ConversationThread {
        let mut thread = ConversationThread::with_handle(ThreadHandle("thread-1".to_string()));
        thread.append(ConversationTurn::user("Assess risk for POL-123")).expect("user turn");
        thread
            .append(ConversationTurn::tool_call(
                "IUA",
                ToolCall {
                    id: "call-1".to_string(),
                    name: "assess_risk".to_string(),
                    arguments: json!({"policy_number": "POL-123"}),
                },
            ))
            .expect("call turn");
        thread
            .append(ConversationTurn::tool_result(ToolResult {
                call_id: "call-1".to_string(),
                name: "assess_risk".to_string(),
                outcome: ToolOutcome::Success,
                payload: json!({"risk_score": 0.48, "model_used": "heuristic-v1"}),
            }))
            .expect("result turn");
        thread
    }

    #[tokio::test]
    async fn save_then_load_restores_every_turn() {
        let repo = setup().await;
        let thread = sample_thread();
        repo.save(Some("session-1"), &thread).await.expect("save");

        let loaded = repo.load(thread.continuation_handle()).await.expect("load").expect("thread");
        assert_eq!(loaded.turns(), thread.turns());
        assert_eq!(loaded.continuation_handle(), thread.continuation_handle());
    }

    #[tokio::test]
    async fn repeated_saves_only_append_new_turns() {
        let repo = setup().await;
        let mut thread = sample_thread();
        repo.save(Some("session-1"), &thread).await.expect("first save");

        thread
            .append(
                ConversationTurn::assistant("IUA", "Risk score is 0.48.")
                    .with_metadata(TurnMetadata { step: Some(2), ..TurnMetadata::default() }),
            )
            .expect("reply");
        repo.save(None, &thread).await.expect("second save");
        repo.save(None, &thread).await.expect("idempotent save");

        let summaries = repo.list_recent(10).await.expect("list");
        assert_eq!(summaries.len(), 1);
        assert_eq!(summaries[0].turn_count, 4);
        assert_eq!(summaries[0].session_id.as_deref(), Some("session-1"));

        let loaded = repo.load(thread.continuation_handle()).await.expect("load").expect("thread");
        assert_eq!(
            loaded.last_reply().map(|turn| turn.content.as_str()),
            Some("Risk score is 0.48.")
        );
    }

    #[tokio::test]
    async fn delete_removes_thread_and_unknown_handles_load_as_none() {
        let repo = setup().await;
        let thread = sample_thread();
        repo.save(None, &thread).await.expect("save");

        assert!(repo.delete(thread.continuation_handle()).await.expect("delete"));
        assert!(!repo.delete(thread.continuation_handle()).await.expect("second delete"));
        assert!(repo.load(thread.continuation_handle()).await.expect("load").is_none());
    }
}
