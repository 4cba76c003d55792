//! Postgres-backed message log
//!
//! Schema is created lazily on first use so the server can boot with a
//! cold database. The BIGSERIAL id is the chronological tiebreaker.

use crate::error::EngineError;
use crate::models::{ConversationSummary, Message, NewMessage, Sender};
use crate::Result;
use sqlx::{PgPool, Row};
use std::sync::Arc;
use tokio::sync::OnceCell;

use super::{validate_new_message, MessageStore};

pub struct PgMessageStore {
    pool: PgPool,
    schema_ready: Arc<OnceCell<()>>,
}

impl PgMessageStore {
    /// Lazy pool: connection errors surface on first query, not at startup.
    pub fn connect_lazy(database_url: &str) -> Result<Self> {
        let pool = sqlx::postgres::PgPoolOptions::new()
            .max_connections(5)
            .connect_lazy(database_url)
            .map_err(|e| {
                EngineError::Persistence(format!("Failed to build postgres pool: {}", e))
            })?;

        Ok(Self {
            pool,
            schema_ready: Arc::new(OnceCell::new()),
        })
    }

    async fn ensure_schema(&self) -> Result<()> {
        self.schema_ready
            .get_or_try_init(|| async {
                sqlx::query(
                    r#"
                    CREATE TABLE IF NOT EXISTS support_messages (
                      id BIGSERIAL PRIMARY KEY,
                      sender TEXT NOT NULL,
                      content TEXT NOT NULL,
                      image_ref TEXT,
                      conversation_id TEXT NOT NULL,
                      display_name TEXT,
                      created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
                    );
                    "#,
                )
                .execute(&self.pool)
                .await?;

                sqlx::query(
                    r#"
                    CREATE INDEX IF NOT EXISTS idx_support_messages_conversation
                    ON support_messages (conversation_id, id);
                    "#,
                )
                .execute(&self.pool)
                .await?;

                Ok::<(), sqlx::Error>(())
            })
            .await
            .map_err(|e| {
                EngineError::Persistence(format!("Failed to initialize message schema: {}", e))
            })?;

        Ok(())
    }

    fn row_to_message(row: &sqlx::postgres::PgRow) -> Result<Message> {
        let id: i64 = row
            .try_get("id")
            .map_err(|e| EngineError::Persistence(format!("Bad message row: {}", e)))?;
        let sender: String = row.try_get("sender").unwrap_or_default();

        Ok(Message {
            id: id.max(0) as u64,
            sender: Sender::parse(&sender),
            content: row.try_get("content").unwrap_or_default(),
            image_ref: row.try_get("image_ref").ok().flatten(),
            conversation_id: row.try_get("conversation_id").unwrap_or_default(),
            display_name: row.try_get("display_name").ok().flatten(),
            created_at: row
                .try_get("created_at")
                .unwrap_or_else(|_| chrono::Utc::now()),
        })
    }
}

#[async_trait::async_trait]
impl MessageStore for PgMessageStore {
    async fn append(&self, new: NewMessage) -> Result<Message> {
        validate_new_message(&new)?;
        self.ensure_schema().await?;

        let row = sqlx::query(
            r#"
            INSERT INTO support_messages (sender, content, image_ref, conversation_id, display_name)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING id, sender, content, image_ref, conversation_id, display_name, created_at
            "#,
        )
        .bind(new.sender.as_str())
        .bind(&new.content)
        .bind(&new.image_ref)
        .bind(&new.conversation_id)
        .bind(&new.display_name)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| EngineError::Persistence(format!("Failed to append message: {}", e)))?;

        Self::row_to_message(&row)
    }

    async fn conversation(&self, conversation_id: &str, limit: usize) -> Result<Vec<Message>> {
        self.ensure_schema().await?;

        // Most recent `limit`, returned in ascending id order.
        let rows = sqlx::query(
            r#"
            SELECT id, sender, content, image_ref, conversation_id, display_name, created_at
            FROM (
              SELECT * FROM support_messages
              WHERE conversation_id = $1
              ORDER BY id DESC
              LIMIT $2
            ) recent
            ORDER BY id ASC
            "#,
        )
        .bind(conversation_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| EngineError::Persistence(format!("Failed to load conversation: {}", e)))?;

        rows.iter().map(Self::row_to_message).collect()
    }

    async fn recent_conversations(&self, limit: usize) -> Result<Vec<ConversationSummary>> {
        self.ensure_schema().await?;

        let rows = sqlx::query(
            r#"
            SELECT conversation_id, sender, content, display_name, created_at
            FROM (
              SELECT DISTINCT ON (conversation_id) *
              FROM support_messages
              ORDER BY conversation_id, id DESC
            ) latest
            ORDER BY id DESC
            LIMIT $1
            "#,
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            EngineError::Persistence(format!("Failed to load conversation summaries: {}", e))
        })?;

        let mut summaries = Vec::with_capacity(rows.len());
        for row in rows {
            let sender: String = row.try_get("sender").unwrap_or_default();
            summaries.push(ConversationSummary {
                conversation_id: row.try_get("conversation_id").unwrap_or_default(),
                last_sender: Sender::parse(&sender),
                last_message: row.try_get("content").unwrap_or_default(),
                display_name: row.try_get("display_name").ok().flatten(),
                updated_at: row
                    .try_get("created_at")
                    .unwrap_or_else(|_| chrono::Utc::now()),
            });
        }

        Ok(summaries)
    }
}
