// backend/src/services/conversation.rs
//
// Append-only conversation log. Turns are keyed by (conversation_id,
// sequence); `load_turns` returns them in ascending sequence with no gaps,
// and `append_turns` assigns contiguous sequences atomically. Turns are only
// appended after a turn reaches its terminal event, so re-entry never
// observes half-turns.

use crate::PgPool;
use crate::errors::AppError;
use crate::models::turns::{ContentBlock, NewTurn, Turn, TurnRole};
use crate::schema::conversation_turns;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use std::collections::HashMap;
use std::sync::Mutex;
use tracing::{info, instrument};

#[async_trait]
pub trait ConversationStore: Send + Sync {
    async fn load_turns(&self, conversation_id: &str) -> Result<Vec<Turn>, AppError>;
    async fn append_turns(
        &self,
        conversation_id: &str,
        turns: Vec<NewTurn>,
    ) -> Result<(), AppError>;
}

fn role_to_str(role: TurnRole) -> &'static str {
    match role {
        TurnRole::User => "user",
        TurnRole::Assistant => "assistant",
        TurnRole::Tool => "tool",
    }
}

fn role_from_str(s: &str) -> Result<TurnRole, AppError> {
    match s {
        "user" => Ok(TurnRole::User),
        "assistant" => Ok(TurnRole::Assistant),
        "tool" => Ok(TurnRole::Tool),
        other => Err(AppError::PersistenceRead(format!(
            "unknown turn role '{other}'"
        ))),
    }
}

// --- Postgres implementation ---

#[derive(Queryable, Selectable)]
#[diesel(table_name = conversation_turns)]
struct TurnRow {
    #[allow(dead_code)]
    conversation_id: String,
    sequence: i64,
    role: String,
    blocks: serde_json::Value,
    #[allow(dead_code)]
    created_at: DateTime<Utc>,
}

#[derive(Insertable)]
#[diesel(table_name = conversation_turns)]
struct NewTurnRow {
    conversation_id: String,
    sequence: i64,
    role: String,
    blocks: serde_json::Value,
    created_at: DateTime<Utc>,
}

pub struct PgConversationStore {
    pool: PgPool,
}

impl PgConversationStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ConversationStore for PgConversationStore {
    #[instrument(skip(self), err)]
    async fn load_turns(&self, conversation_id: &str) -> Result<Vec<Turn>, AppError> {
        let conn = self
            .pool
            .get()
            .await
            .map_err(|e| AppError::PersistenceRead(format!("pool: {e}")))?;
        let conversation_id = conversation_id.to_string();

        let rows: Vec<TurnRow> = conn
            .interact(move |conn| {
                conversation_turns::table
                    .filter(conversation_turns::conversation_id.eq(&conversation_id))
                    .order(conversation_turns::sequence.asc())
                    .select(TurnRow::as_select())
                    .load(conn)
            })
            .await
            .map_err(|e| AppError::PersistenceRead(format!("interact: {e}")))?
            .map_err(|e| AppError::PersistenceRead(format!("query: {e}")))?;

        rows.into_iter()
            .map(|row| {
                Ok(Turn {
                    role: role_from_str(&row.role)?,
                    blocks: serde_json::from_value::<Vec<ContentBlock>>(row.blocks)
                        .map_err(|e| AppError::PersistenceRead(format!("blocks: {e}")))?,
                    sequence: row.sequence,
                })
            })
            .collect()
    }

    #[instrument(skip(self, turns), fields(count = turns.len()), err)]
    async fn append_turns(
        &self,
        conversation_id: &str,
        turns: Vec<NewTurn>,
    ) -> Result<(), AppError> {
        if turns.is_empty() {
            return Ok(());
        }
        let conn = self
            .pool
            .get()
            .await
            .map_err(|e| AppError::PersistenceWrite(format!("pool: {e}")))?;
        let conversation_id = conversation_id.to_string();

        conn.interact(move |conn| {
            conn.transaction::<_, diesel::result::Error, _>(|conn| {
                let next: i64 = conversation_turns::table
                    .filter(conversation_turns::conversation_id.eq(&conversation_id))
                    .select(diesel::dsl::max(conversation_turns::sequence))
                    .first::<Option<i64>>(conn)?
                    .map_or(0, |max| max + 1);

                let now = Utc::now();
                let rows: Vec<NewTurnRow> = turns
                    .into_iter()
                    .enumerate()
                    .map(|(i, turn)| NewTurnRow {
                        conversation_id: conversation_id.clone(),
                        sequence: next + i as i64,
                        role: role_to_str(turn.role).to_string(),
                        blocks: serde_json::to_value(&turn.blocks)
                            .unwrap_or_else(|_| serde_json::json!([])),
                        created_at: now,
                    })
                    .collect();

                diesel::insert_into(conversation_turns::table)
                    .values(&rows)
                    .execute(conn)?;
                Ok(())
            })
        })
        .await
        .map_err(|e| AppError::PersistenceWrite(format!("interact: {e}")))?
        .map_err(|e| AppError::PersistenceWrite(format!("insert: {e}")))?;

        info!("Appended turns to conversation");
        Ok(())
    }
}

// --- In-memory implementation ---
//
// Dev/test fallback selected when DATABASE_URL is unset; same contract as the
// Postgres store, scoped to the process lifetime.

#[derive(Default)]
pub struct InMemoryConversationStore {
    inner: Mutex<HashMap<String, Vec<Turn>>>,
}

impl InMemoryConversationStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ConversationStore for InMemoryConversationStore {
    async fn load_turns(&self, conversation_id: &str) -> Result<Vec<Turn>, AppError> {
        let guard = self
            .inner
            .lock()
            .map_err(|_| AppError::PersistenceRead("store lock poisoned".into()))?;
        Ok(guard.get(conversation_id).cloned().unwrap_or_default())
    }

    async fn append_turns(
        &self,
        conversation_id: &str,
        turns: Vec<NewTurn>,
    ) -> Result<(), AppError> {
        let mut guard = self
            .inner
            .lock()
            .map_err(|_| AppError::PersistenceWrite("store lock poisoned".into()))?;
        let entry = guard.entry(conversation_id.to_string()).or_default();
        let mut next = entry.last().map_or(0, |t| t.sequence + 1);
        for turn in turns {
            entry.push(Turn {
                role: turn.role,
                blocks: turn.blocks,
                sequence: next,
            });
            next += 1;
        }
        Ok(())
    }
}
