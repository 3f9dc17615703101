mod common;

use std::sync::atomic::Ordering;

use inbox_server::realtime::{ChangeEvent, ChangeKind, ChangeRecord, Table};
use inbox_server::types::Sender;
use serde_json::json;
use tokio::sync::broadcast::Receiver;

use common::harness;

fn drain(rx: &mut Receiver<ChangeEvent>) -> Vec<(Table, ChangeKind)> {
    std::iter::from_fn(|| rx.try_recv().ok())
        .map(|event| (event.table, event.kind))
        .collect()
}

#[tokio::test]
async fn first_inbound_publishes_conversation_insert_then_message_insert() {
    let h = harness();
    let mut rx = h.changes.subscribe();

    h.inbound("5511999990000", "hello").await;
    assert_eq!(
        drain(&mut rx),
        [
            (Table::Conversations, ChangeKind::Insert),
            (Table::Messages, ChangeKind::Insert),
        ]
    );

    h.inbound("5511999990000", "again").await;
    assert_eq!(
        drain(&mut rx),
        [
            (Table::Conversations, ChangeKind::Update),
            (Table::Messages, ChangeKind::Insert),
        ]
    );
}

#[tokio::test]
async fn replies_publish_message_and_conversation() {
    let h = harness();
    let conversation = h.inbound("5511999990000", "hello").await;
    let mut rx = h.changes.subscribe();

    h.post(
        "/send",
        json!({ "conversation_id": conversation.id, "message": "operator" }),
    )
    .await;
    let event = rx.try_recv().unwrap();
    match event.record {
        ChangeRecord::Message(message) => {
            assert_eq!(message.sender, Sender::Human);
            assert_eq!(message.message, "operator");
        }
        other => panic!("expected message record, got {other:?}"),
    }
    let event = rx.try_recv().unwrap();
    assert_eq!((event.table, event.kind), (Table::Conversations, ChangeKind::Update));
    match event.record {
        ChangeRecord::Conversation(c) => assert_eq!(c.last_message.as_deref(), Some("operator")),
        other => panic!("expected conversation record, got {other:?}"),
    }

    h.post(
        "/bot-reply",
        json!({ "phone": "5511999990000", "message": "bot" }),
    )
    .await;
    assert_eq!(
        drain(&mut rx),
        [
            (Table::Messages, ChangeKind::Insert),
            (Table::Conversations, ChangeKind::Update),
        ]
    );
}

#[tokio::test]
async fn mark_read_publishes_conversation_and_each_flipped_message() {
    let h = harness();
    let conversation = h.inbound("5511999990000", "one").await;
    h.inbound("5511999990000", "two").await;
    let mut rx = h.changes.subscribe();

    h.post("/mark-read", json!({ "conversation_id": conversation.id }))
        .await;
    assert_eq!(
        drain(&mut rx),
        [
            (Table::Conversations, ChangeKind::Update),
            (Table::Messages, ChangeKind::Update),
            (Table::Messages, ChangeKind::Update),
        ]
    );
}

#[tokio::test]
async fn rejected_requests_publish_nothing() {
    let h = harness();
    let mut rx = h.changes.subscribe();

    h.post("/webhook-incoming", json!({ "phone": "5511999990000" }))
        .await;
    h.post(
        "/send",
        json!({ "conversation_id": "missing", "message": "hi" }),
    )
    .await;
    h.post(
        "/bot-reply",
        json!({ "phone": "5511000000000", "message": "hi" }),
    )
    .await;

    h.store.fail_writes.store(true, Ordering::SeqCst);
    h.post(
        "/webhook-incoming",
        json!({ "phone": "5511999990000", "message": "hi" }),
    )
    .await;

    assert!(drain(&mut rx).is_empty());
}

#[tokio::test]
async fn status_change_publishes_conversation_update() {
    let h = harness();
    let conversation = h.inbound("5511999990000", "hello").await;
    let mut rx = h.changes.subscribe();

    h.request(
        "PATCH",
        &format!("/api/conversations/{}/status", conversation.id),
        Some(json!({ "status": "human" })),
    )
    .await;
    let event = rx.try_recv().unwrap();
    assert_eq!(event.conversation_id, conversation.id);
    match event.record {
        ChangeRecord::Conversation(c) => assert_eq!(c.status.as_str(), "human"),
        other => panic!("expected conversation record, got {other:?}"),
    }
}
