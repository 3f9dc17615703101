//! Persistence behind a narrow trait so handlers never embed SQL.
//!
//! [`postgres::PgStore`] is the production backend; [`memory::MemoryStore`]
//! keeps everything in process and backs development runs and tests.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;

use crate::error::StoreResult;
use crate::types::{
    Conversation, ConversationStatus, InboundMessage, InboundRecord, Message, ReplyRecord, Sender,
};

pub use memory::MemoryStore;
pub use postgres::PgStore;

#[async_trait]
pub trait InboxStore: Send + Sync {
    /// Upserts the conversation keyed by phone and appends the contact's
    /// message, as one atomic unit. A new conversation starts in `bot`
    /// status; an existing one gets its last message refreshed and its
    /// unread count incremented.
    async fn record_inbound(&self, inbound: InboundMessage) -> StoreResult<InboundRecord>;

    /// Appends a bot or human reply and refreshes `last_message`/`updated_at`
    /// without touching the unread count. `None` when the conversation does
    /// not exist, in which case nothing is written.
    async fn append_reply(
        &self,
        conversation_id: &str,
        sender: Sender,
        text: &str,
    ) -> StoreResult<Option<ReplyRecord>>;

    async fn conversation_by_id(&self, id: &str) -> StoreResult<Option<Conversation>>;

    async fn conversation_by_phone(&self, phone: &str) -> StoreResult<Option<Conversation>>;

    /// All conversations, most recently updated first.
    async fn list_conversations(&self) -> StoreResult<Vec<Conversation>>;

    /// Messages of one conversation, oldest first.
    async fn list_messages(&self, conversation_id: &str) -> StoreResult<Vec<Message>>;

    /// Writes the status column only. `None` when the conversation does not exist.
    async fn set_status(
        &self,
        id: &str,
        status: ConversationStatus,
    ) -> StoreResult<Option<Conversation>>;

    /// Sets `unread_count` to zero. `None` when the conversation does not exist.
    async fn reset_unread(&self, id: &str) -> StoreResult<Option<Conversation>>;

    /// Flips every unread `user` message of the conversation to read and
    /// returns the rows that changed.
    async fn mark_user_messages_read(&self, conversation_id: &str) -> StoreResult<Vec<Message>>;

    /// Short backend name for health output and logs.
    fn backend(&self) -> &'static str;
}
