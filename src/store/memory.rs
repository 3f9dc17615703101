use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::InboxStore;
use crate::error::StoreResult;
use crate::types::{
    now_iso, Conversation, ConversationStatus, InboundMessage, InboundRecord, Message, ReplyRecord,
    Sender,
};

#[derive(Default)]
struct MemoryState {
    conversations: HashMap<String, Conversation>,
    ids_by_phone: HashMap<String, String>,
    messages: Vec<Message>,
}

impl MemoryState {
    fn push_message(&mut self, conversation_id: &str, sender: Sender, text: &str, now: &str) -> Message {
        let message = Message {
            id: Uuid::new_v4().to_string(),
            conversation_id: conversation_id.to_string(),
            sender,
            message: text.to_string(),
            is_read: sender.read_on_insert(),
            created_at: now.to_string(),
        };
        self.messages.push(message.clone());
        message
    }
}

/// Everything lives in one lock; each trait call takes it once, so every
/// operation is atomic with respect to the others.
#[derive(Default)]
pub struct MemoryStore {
    state: RwLock<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl InboxStore for MemoryStore {
    async fn record_inbound(&self, inbound: InboundMessage) -> StoreResult<InboundRecord> {
        let now = now_iso();
        let mut state = self.state.write().await;

        let existing_id = state.ids_by_phone.get(&inbound.phone).cloned();
        let (conversation, created) = match existing_id
            .and_then(|id| state.conversations.get_mut(&id))
        {
            Some(existing) => {
                existing.last_message = Some(inbound.text.clone());
                existing.updated_at = now.clone();
                existing.unread_count += 1;
                if existing.name.is_none() {
                    existing.name = inbound.name.clone();
                }
                (existing.clone(), false)
            }
            None => {
                let conversation = Conversation {
                    id: Uuid::new_v4().to_string(),
                    phone: inbound.phone.clone(),
                    name: inbound.name.clone(),
                    status: ConversationStatus::Bot,
                    last_message: Some(inbound.text.clone()),
                    unread_count: 1,
                    created_at: now.clone(),
                    updated_at: now.clone(),
                };
                state
                    .ids_by_phone
                    .insert(conversation.phone.clone(), conversation.id.clone());
                state
                    .conversations
                    .insert(conversation.id.clone(), conversation.clone());
                (conversation, true)
            }
        };

        let message = state.push_message(&conversation.id, Sender::User, &inbound.text, &now);
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
        let mut state = self.state.write().await;

        let Some(existing) = state.conversations.get_mut(conversation_id) else {
            return Ok(None);
        };
        existing.last_message = Some(text.to_string());
        existing.updated_at = now.clone();
        let conversation = existing.clone();

        let message = state.push_message(conversation_id, sender, text, &now);
        Ok(Some(ReplyRecord {
            conversation,
            message,
        }))
    }

    async fn conversation_by_id(&self, id: &str) -> StoreResult<Option<Conversation>> {
        Ok(self.state.read().await.conversations.get(id).cloned())
    }

    async fn conversation_by_phone(&self, phone: &str) -> StoreResult<Option<Conversation>> {
        let state = self.state.read().await;
        Ok(state
            .ids_by_phone
            .get(phone)
            .and_then(|id| state.conversations.get(id))
            .cloned())
    }

    async fn list_conversations(&self) -> StoreResult<Vec<Conversation>> {
        let state = self.state.read().await;
        let mut list = state.conversations.values().cloned().collect::<Vec<_>>();
        list.sort_by(|a, b| b.updated_at.cmp(&a.updated_at).then_with(|| a.id.cmp(&b.id)));
        Ok(list)
    }

    async fn list_messages(&self, conversation_id: &str) -> StoreResult<Vec<Message>> {
        let state = self.state.read().await;
        // Insertion order already follows created_at.
        Ok(state
            .messages
            .iter()
            .filter(|m| m.conversation_id == conversation_id)
            .cloned()
            .collect())
    }

    async fn set_status(
        &self,
        id: &str,
        status: ConversationStatus,
    ) -> StoreResult<Option<Conversation>> {
        let mut state = self.state.write().await;
        Ok(state.conversations.get_mut(id).map(|conversation| {
            conversation.status = status;
            conversation.clone()
        }))
    }

    async fn reset_unread(&self, id: &str) -> StoreResult<Option<Conversation>> {
        let mut state = self.state.write().await;
        Ok(state.conversations.get_mut(id).map(|conversation| {
            conversation.unread_count = 0;
            conversation.clone()
        }))
    }

    async fn mark_user_messages_read(&self, conversation_id: &str) -> StoreResult<Vec<Message>> {
        let mut state = self.state.write().await;
        let mut flipped = Vec::new();
        for message in state.messages.iter_mut().filter(|m| {
            m.conversation_id == conversation_id && m.sender == Sender::User && !m.is_read
        }) {
            message.is_read = true;
            flipped.push(message.clone());
        }
        Ok(flipped)
    }

    fn backend(&self) -> &'static str {
        "memory"
    }
}
