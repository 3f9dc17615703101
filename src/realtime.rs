//! Row-level change notifications.
//!
//! Every successful write publishes a [`ChangeEvent`] on the [`ChangeFeed`].
//! The WebSocket endpoint is one consumer of the feed: clients subscribe to
//! topics and receive matching events as `{"event": "change", "data": ...}`.

use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message as WsMessage, WebSocket},
        State, WebSocketUpgrade,
    },
    response::IntoResponse,
};
use futures_util::{sink::SinkExt, stream::StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::broadcast::{self, error::RecvError};

use crate::app::AppState;
use crate::types::{Conversation, Message};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Table {
    Conversations,
    Messages,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeKind {
    Insert,
    Update,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum ChangeRecord {
    Conversation(Conversation),
    Message(Message),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChangeEvent {
    pub table: Table,
    pub kind: ChangeKind,
    pub conversation_id: String,
    pub record: ChangeRecord,
}

impl ChangeEvent {
    pub fn conversation(kind: ChangeKind, conversation: &Conversation) -> Self {
        Self {
            table: Table::Conversations,
            kind,
            conversation_id: conversation.id.clone(),
            record: ChangeRecord::Conversation(conversation.clone()),
        }
    }

    pub fn message(kind: ChangeKind, message: &Message) -> Self {
        Self {
            table: Table::Messages,
            kind,
            conversation_id: message.conversation_id.clone(),
            record: ChangeRecord::Message(message.clone()),
        }
    }
}

/// A subscription topic: a whole table, or one conversation's rows in it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub struct Topic {
    pub table: Table,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
}

impl Topic {
    pub fn matches(&self, event: &ChangeEvent) -> bool {
        self.table == event.table
            && self
                .conversation_id
                .as_deref()
                .map_or(true, |id| id == event.conversation_id)
    }
}

/// Bounded broadcast hub. Publishing never waits on subscribers; a
/// subscriber that falls behind loses events and is told how many.
#[derive(Clone)]
pub struct ChangeFeed {
    tx: broadcast::Sender<ChangeEvent>,
}

impl ChangeFeed {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn publish(&self, event: ChangeEvent) {
        tracing::debug!(
            table = ?event.table,
            kind = ?event.kind,
            conversation_id = %event.conversation_id,
            "change published"
        );
        // No receivers is the normal idle state.
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ChangeEvent> {
        self.tx.subscribe()
    }

    pub fn receiver_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

#[derive(Debug, Deserialize)]
struct EventEnvelopeIn {
    event: String,
    #[serde(default)]
    data: Value,
}

fn event_payload<T: Serialize>(event: &str, data: T) -> Option<String> {
    serde_json::to_string(&json!({ "event": event, "data": data })).ok()
}

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    let feed = state.changes.clone();
    ws.on_upgrade(move |socket| handle_socket(socket, feed))
}

async fn handle_socket(socket: WebSocket, feed: ChangeFeed) {
    let mut changes = feed.subscribe();
    let mut topics: Vec<Topic> = Vec::new();
    let (mut ws_sender, mut ws_receiver) = socket.split();

    tracing::debug!(subscribers = feed.receiver_count(), "realtime client connected");

    loop {
        let outgoing = tokio::select! {
            incoming = ws_receiver.next() => {
                let text = match incoming {
                    Some(Ok(WsMessage::Text(text))) => text.to_string(),
                    Some(Ok(WsMessage::Close(_))) | None | Some(Err(_)) => break,
                    Some(Ok(_)) => continue,
                };
                handle_client_event(&text, &mut topics)
            }
            change = changes.recv() => match change {
                Ok(event) => topics
                    .iter()
                    .any(|topic| topic.matches(&event))
                    .then(|| event_payload("change", &event))
                    .flatten(),
                Err(RecvError::Lagged(missed)) => {
                    tracing::warn!(missed, "realtime client lagged; asking it to resync");
                    event_payload("resync", json!({ "missed": missed }))
                }
                Err(RecvError::Closed) => break,
            },
        };

        if let Some(payload) = outgoing {
            if ws_sender.send(WsMessage::Text(payload.into())).await.is_err() {
                break;
            }
        }
    }

    tracing::debug!("realtime client disconnected");
}

/// Applies one client envelope to the session's topic list and returns the
/// reply to send, if any.
fn handle_client_event(text: &str, topics: &mut Vec<Topic>) -> Option<String> {
    let Ok(envelope) = serde_json::from_str::<EventEnvelopeIn>(text) else {
        return event_payload("error", json!({ "message": "invalid envelope" }));
    };

    match envelope.event.as_str() {
        "subscribe" => match serde_json::from_value::<Topic>(envelope.data) {
            Ok(topic) => {
                if !topics.contains(&topic) {
                    topics.push(topic.clone());
                }
                event_payload("subscribed", topic)
            }
            Err(err) => event_payload("error", json!({ "message": err.to_string() })),
        },
        "unsubscribe" => match serde_json::from_value::<Topic>(envelope.data) {
            Ok(topic) => {
                topics.retain(|t| *t != topic);
                event_payload("unsubscribed", topic)
            }
            Err(err) => event_payload("error", json!({ "message": err.to_string() })),
        },
        "ping" => event_payload("pong", Value::Null),
        other => event_payload(
            "error",
            json!({ "message": format!("unknown event '{other}'") }),
        ),
    }
}
