use async_trait::async_trait;
use sqlx::{
    postgres::{PgPoolOptions, PgRow},
    PgPool, Row,
};
use uuid::Uuid;

use super::InboxStore;
use crate::error::{StoreError, StoreResult};
use crate::types::{
    now_iso, Conversation, ConversationStatus, InboundMessage, InboundRecord, Message, ReplyRecord,
    Sender,
};

const CONVERSATION_COLUMNS: &str =
    "id, phone, name, status, last_message, unread_count, created_at, updated_at";
const MESSAGE_COLUMNS: &str = "id, conversation_id, sender, message, is_read, created_at";

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub async fn connect(database_url: &str, max_connections: u32) -> StoreResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn migrate(&self) -> StoreResult<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }
}

fn parse_conversation_row(row: &PgRow) -> StoreResult<Conversation> {
    let status: String = row.try_get("status")?;
    Ok(Conversation {
        id: row.try_get("id")?,
        phone: row.try_get("phone")?,
        name: row.try_get("name")?,
        status: status.parse().map_err(StoreError::CorruptRow)?,
        last_message: row.try_get("last_message")?,
        unread_count: row.try_get("unread_count")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn parse_message_row(row: &PgRow) -> StoreResult<Message> {
    let sender: String = row.try_get("sender")?;
    Ok(Message {
        id: row.try_get("id")?,
        conversation_id: row.try_get("conversation_id")?,
        sender: sender.parse().map_err(StoreError::CorruptRow)?,
        message: row.try_get("message")?,
        is_read: row.try_get("is_read")?,
        created_at: row.try_get("created_at")?,
    })
}

async fn insert_message<'e, E>(
    executor: E,
    conversation_id: &str,
    sender: Sender,
    text: &str,
    created_at: &str,
) -> StoreResult<Message>
where
    E: sqlx::Executor<'e, Database = sqlx::Postgres>,
{
    let row = sqlx::query(&format!(
        "INSERT INTO messages (id, conversation_id, sender, message, is_read, created_at) \
         VALUES ($1, $2, $3, $4, $5, $6) \
         RETURNING {MESSAGE_COLUMNS}"
    ))
    .bind(Uuid::new_v4().to_string())
    .bind(conversation_id)
    .bind(sender.as_str())
    .bind(text)
    .bind(sender.read_on_insert())
    .bind(created_at)
    .fetch_one(executor)
    .await?;
    parse_message_row(&row)
}

#[async_trait]
impl InboxStore for PgStore {
    async fn record_inbound(&self, inbound: InboundMessage) -> StoreResult<InboundRecord> {
        let now = now_iso();
        let mut tx = self.pool.begin().await?;

        // `xmax = 0` only holds for a freshly inserted tuple.
        let row = sqlx::query(&format!(
            "INSERT INTO conversations \
             (id, phone, name, status, last_message, unread_count, created_at, updated_at) \
             VALUES ($1, $2, $3, 'bot', $4, 1, $5, $5) \
             ON CONFLICT (phone) DO UPDATE SET \
                 last_message = EXCLUDED.last_message, \
                 updated_at = EXCLUDED.updated_at, \
                 unread_count = conversations.unread_count + 1, \
                 name = COALESCE(conversations.name, EXCLUDED.name) \
             RETURNING {CONVERSATION_COLUMNS}, (xmax = 0) AS inserted"
        ))
        .bind(Uuid::new_v4().to_string())
        .bind(&inbound.phone)
        .bind(&inbound.name)
        .bind(&inbound.text)
        .bind(&now)
        .fetch_one(&mut *tx)
        .await?;
        let conversation = parse_conversation_row(&row)?;
        let created: bool = row.try_get("inserted")?;

        let message = insert_message(&mut *tx, &conversation.id, Sender::User, &inbound.text, &now).await?;
        tx.commit().await?;

        Ok(InboundRecord {
            conversation,
            message,
            created,
        })
    }

    async fn append_reply(
        &self,
        conversation_id: &str,
        sender: Sender,
        text: &str,
    ) -> StoreResult<Option<ReplyRecord>> {
        let now = now_iso();
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query(&format!(
            "UPDATE conversations SET last_message = $1, updated_at = $2 \
             WHERE id = $3 \
             RETURNING {CONVERSATION_COLUMNS}"
        ))
        .bind(text)
        .bind(&now)
        .bind(conversation_id)
        .fetch_optional(&mut *tx)
        .await?;
        let Some(row) = row else {
            tx.rollback().await?;
            return Ok(None);
        };
        let conversation = parse_conversation_row(&row)?;

        let message = insert_message(&mut *tx, conversation_id, sender, text, &now).await?;
        tx.commit().await?;

        Ok(Some(ReplyRecord {
            conversation,
            message,
        }))
    }

    async fn conversation_by_id(&self, id: &str) -> StoreResult<Option<Conversation>> {
        let row = sqlx::query(&format!(
            "SELECT {CONVERSATION_COLUMNS} FROM conversations WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(parse_conversation_row).transpose()
    }

    async fn conversation_by_phone(&self, phone: &str) -> StoreResult<Option<Conversation>> {
        let row = sqlx::query(&format!(
            "SELECT {CONVERSATION_COLUMNS} FROM conversations WHERE phone = $1"
        ))
        .bind(phone)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(parse_conversation_row).transpose()
    }

    async fn list_conversations(&self) -> StoreResult<Vec<Conversation>> {
        let rows = sqlx::query(&format!(
            "SELECT {CONVERSATION_COLUMNS} FROM conversations ORDER BY updated_at DESC, id ASC"
        ))
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(parse_conversation_row).collect()
    }

    async fn list_messages(&self, conversation_id: &str) -> StoreResult<Vec<Message>> {
        let rows = sqlx::query(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages \
             WHERE conversation_id = $1 \
             ORDER BY created_at ASC, id ASC"
        ))
        .bind(conversation_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(parse_message_row).collect()
    }

    async fn set_status(
        &self,
        id: &str,
        status: ConversationStatus,
    ) -> StoreResult<Option<Conversation>> {
        let row = sqlx::query(&format!(
            "UPDATE conversations SET status = $1 WHERE id = $2 RETURNING {CONVERSATION_COLUMNS}"
        ))
        .bind(status.as_str())
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(parse_conversation_row).transpose()
    }

    async fn reset_unread(&self, id: &str) -> StoreResult<Option<Conversation>> {
        let row = sqlx::query(&format!(
            "UPDATE conversations SET unread_count = 0 WHERE id = $1 RETURNING {CONVERSATION_COLUMNS}"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(parse_conversation_row).transpose()
    }

    async fn mark_user_messages_read(&self, conversation_id: &str) -> StoreResult<Vec<Message>> {
        let rows = sqlx::query(&format!(
            "UPDATE messages SET is_read = true \
             WHERE conversation_id = $1 AND sender = 'user' AND is_read = false \
             RETURNING {MESSAGE_COLUMNS}"
        ))
        .bind(conversation_id)
        .fetch_all(&self.pool)
        .await?;
        let mut messages = rows.iter().map(parse_message_row).collect::<StoreResult<Vec<_>>>()?;
        messages.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(messages)
    }

    fn backend(&self) -> &'static str {
        "postgres"
    }
}
