#![allow(dead_code)]

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use inbox_server::{
    automation::AutomationDispatcher,
    error::{StoreError, StoreResult},
    realtime::ChangeFeed,
    router,
    store::{InboxStore, MemoryStore},
    types::{
        Conversation, ConversationStatus, InboundMessage, InboundRecord, Message, ReplyRecord,
        Sender,
    },
    AppState,
};
use serde_json::Value;
use tower::ServiceExt;

pub struct Harness {
    pub app: Router,
    pub store: Arc<FlakyStore>,
    pub changes: ChangeFeed,
}

pub fn harness() -> Harness {
    harness_with(AutomationDispatcher::disabled())
}

pub fn harness_with(automation: AutomationDispatcher) -> Harness {
    let store = Arc::new(FlakyStore::default());
    let changes = ChangeFeed::new(64);
    let state = AppState::new(store.clone(), changes.clone(), automation);
    Harness {
        app: router(state),
        store,
        changes,
    }
}

impl Harness {
    pub async fn request(&self, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let builder = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(body) => builder
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };
        self.send(request).await
    }

    async fn send(&self, request: Request<Body>) -> (StatusCode, Value) {
        let response = self.app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), 1024 * 256)
            .await
            .unwrap();
        let json = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or_else(|_| {
                Value::String(String::from_utf8_lossy(&bytes).into_owned())
            })
        };
        (status, json)
    }

    pub async fn post(&self, uri: &str, body: Value) -> (StatusCode, Value) {
        self.request("POST", uri, Some(body)).await
    }

    pub async fn post_raw(&self, uri: &str, raw: &'static str) -> (StatusCode, Value) {
        let request = Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(raw))
            .unwrap();
        self.send(request).await
    }

    pub async fn get(&self, uri: &str) -> (StatusCode, Value) {
        self.request("GET", uri, None).await
    }

    /// Delivers an inbound message and returns the resulting conversation.
    pub async fn inbound(&self, phone: &str, message: &str) -> Conversation {
        let (status, body) = self
            .post(
                "/webhook-incoming",
                serde_json::json!({ "phone": phone, "message": message }),
            )
            .await;
        assert_eq!(status, StatusCode::OK, "inbound failed: {body}");
        self.store
            .conversation_by_phone(phone)
            .await
            .unwrap()
            .expect("conversation exists after inbound")
    }
}

/// Memory store with switches that make selected operations fail.
#[derive(Default)]
pub struct FlakyStore {
    pub inner: MemoryStore,
    pub fail_writes: AtomicBool,
    pub fail_mark_messages: AtomicBool,
}

impl FlakyStore {
    fn check(&self, flag: &AtomicBool) -> StoreResult<()> {
        if flag.load(Ordering::SeqCst) {
            Err(StoreError::Unavailable("injected failure".into()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl InboxStore for FlakyStore {
    async fn record_inbound(&self, inbound: InboundMessage) -> StoreResult<InboundRecord> {
        self.check(&self.fail_writes)?;
        self.inner.record_inbound(inbound).await
    }

    async fn append_reply(
        &self,
        conversation_id: &str,
        sender: Sender,
        text: &str,
    ) -> StoreResult<Option<ReplyRecord>> {
        self.check(&self.fail_writes)?;
        self.inner.append_reply(conversation_id, sender, text).await
    }

    async fn conversation_by_id(&self, id: &str) -> StoreResult<Option<Conversation>> {
        self.inner.conversation_by_id(id).await
    }

    async fn conversation_by_phone(&self, phone: &str) -> StoreResult<Option<Conversation>> {
        self.inner.conversation_by_phone(phone).await
    }

    async fn list_conversations(&self) -> StoreResult<Vec<Conversation>> {
        self.inner.list_conversations().await
    }

    async fn list_messages(&self, conversation_id: &str) -> StoreResult<Vec<Message>> {
        self.inner.list_messages(conversation_id).await
    }

    async fn set_status(
        &self,
        id: &str,
        status: ConversationStatus,
    ) -> StoreResult<Option<Conversation>> {
        self.check(&self.fail_writes)?;
        self.inner.set_status(id, status).await
    }

    async fn reset_unread(&self, id: &str) -> StoreResult<Option<Conversation>> {
        self.check(&self.fail_writes)?;
        self.inner.reset_unread(id).await
    }

    async fn mark_user_messages_read(&self, conversation_id: &str) -> StoreResult<Vec<Message>> {
        self.check(&self.fail_mark_messages)?;
        self.inner.mark_user_messages_read(conversation_id).await
    }

    fn backend(&self) -> &'static str {
        "flaky-memory"
    }
}
