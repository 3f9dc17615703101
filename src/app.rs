use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, patch, post},
    Json, Router,
};
use serde_json::json;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::automation::AutomationDispatcher;
use crate::config::{Config, StoreBackend};
use crate::error::ApiError;
use crate::inbox::{InboxFilter, InboxQuery};
use crate::realtime::{ws_handler, ChangeEvent, ChangeFeed, ChangeKind};
use crate::store::{InboxStore, MemoryStore, PgStore};
use crate::types::*;

pub struct AppState {
    pub store: Arc<dyn InboxStore>,
    pub changes: ChangeFeed,
    pub automation: AutomationDispatcher,
}

impl AppState {
    pub fn new(
        store: Arc<dyn InboxStore>,
        changes: ChangeFeed,
        automation: AutomationDispatcher,
    ) -> Arc<Self> {
        Arc::new(Self {
            store,
            changes,
            automation,
        })
    }

    fn publish_reply(&self, record: &ReplyRecord) {
        self.changes
            .publish(ChangeEvent::message(ChangeKind::Insert, &record.message));
        self.changes
            .publish(ChangeEvent::conversation(ChangeKind::Update, &record.conversation));
    }
}

type ApiResult = Result<axum::response::Response, ApiError>;

fn success() -> axum::response::Response {
    Json(json!({ "success": true })).into_response()
}

/// Turns axum's JSON rejection into the same `{error}` body every other
/// failure uses.
fn json_body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, ApiError> {
    payload
        .map(|Json(body)| body)
        .map_err(|rejection| ApiError::bad_request(format!("Invalid JSON body: {}", rejection.body_text())))
}

async fn webhook_incoming(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<IncomingBody>, JsonRejection>,
) -> ApiResult {
    let body = json_body(payload)?;
    let phone = non_blank(body.phone.as_deref()).and_then(normalize_phone);
    let text = non_blank(body.message.as_deref());
    let (Some(phone), Some(text)) = (phone, text) else {
        return Err(ApiError::bad_request("Missing phone or message"));
    };

    let inbound = InboundMessage {
        phone,
        name: non_blank(body.name.as_deref()).map(str::to_string),
        text: text.to_string(),
    };
    let record = state
        .store
        .record_inbound(inbound)
        .await
        .map_err(ApiError::store("Failed to save message"))?;

    tracing::info!(
        conversation_id = %record.conversation.id,
        phone = %record.conversation.phone,
        created = record.created,
        "inbound message recorded"
    );

    let kind = if record.created {
        ChangeKind::Insert
    } else {
        ChangeKind::Update
    };
    state
        .changes
        .publish(ChangeEvent::conversation(kind, &record.conversation));
    state
        .changes
        .publish(ChangeEvent::message(ChangeKind::Insert, &record.message));

    Ok(success())
}

async fn send_message(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<SendBody>, JsonRejection>,
) -> ApiResult {
    let body = json_body(payload)?;
    let conversation_id = non_blank(body.conversation_id.as_deref());
    let text = non_blank(body.message.as_deref());
    let (Some(conversation_id), Some(text)) = (conversation_id, text) else {
        return Err(ApiError::bad_request("Missing conversation_id or message"));
    };

    let record = state
        .store
        .append_reply(conversation_id, Sender::Human, text)
        .await
        .map_err(ApiError::store("Failed to save message"))?
        .ok_or_else(|| ApiError::not_found("Conversation not found"))?;

    tracing::info!(conversation_id = %conversation_id, "operator reply recorded");
    state.publish_reply(&record);

    let notice = OutboundNotice {
        phone: record.conversation.phone.clone(),
        message: record.message.message.clone(),
        status: record.conversation.status,
    };
    let outcome = state.automation.forward(&notice).await;
    tracing::debug!(conversation_id = %conversation_id, ?outcome, "automation dispatch finished");

    Ok(success())
}

async fn bot_reply(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<BotReplyBody>, JsonRejection>,
) -> ApiResult {
    let body = json_body(payload)?;
    let phone = non_blank(body.phone.as_deref()).and_then(normalize_phone);
    let text = non_blank(body.message.as_deref());
    let (Some(phone), Some(text)) = (phone, text) else {
        return Err(ApiError::bad_request("Missing phone or message"));
    };

    let not_found = || ApiError::not_found("Conversation not found. Bot cannot reply to unknown user.");
    let conversation = state
        .store
        .conversation_by_phone(&phone)
        .await
        .map_err(ApiError::store("Failed to save message"))?
        .ok_or_else(not_found)?;

    let record = state
        .store
        .append_reply(&conversation.id, Sender::Bot, text)
        .await
        .map_err(ApiError::store("Failed to save message"))?
        .ok_or_else(not_found)?;

    tracing::info!(conversation_id = %conversation.id, "bot reply recorded");
    state.publish_reply(&record);

    Ok(success())
}

async fn mark_read(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<MarkReadBody>, JsonRejection>,
) -> ApiResult {
    let body = json_body(payload)?;
    let Some(conversation_id) = non_blank(body.conversation_id.as_deref()) else {
        return Err(ApiError::bad_request("Missing conversation_id"));
    };

    let conversation = state
        .store
        .reset_unread(conversation_id)
        .await
        .map_err(ApiError::store("Failed to update conversation"))?;
    if let Some(conversation) = &conversation {
        state
            .changes
            .publish(ChangeEvent::conversation(ChangeKind::Update, conversation));
    }

    match state.store.mark_user_messages_read(conversation_id).await {
        Ok(flipped) => {
            tracing::debug!(conversation_id = %conversation_id, count = flipped.len(), "messages marked read");
            for message in &flipped {
                state
                    .changes
                    .publish(ChangeEvent::message(ChangeKind::Update, message));
            }
        }
        Err(err) => {
            tracing::warn!(conversation_id = %conversation_id, error = %err, "failed to mark messages read");
        }
    }

    Ok(success())
}

async fn check_status(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<CheckStatusBody>, JsonRejection>,
) -> ApiResult {
    let body = json_body(payload)?;
    let Some(phone) = non_blank(body.phone.as_deref()).and_then(normalize_phone) else {
        return Err(ApiError::bad_request("Missing phone"));
    };

    let conversation = state
        .store
        .conversation_by_phone(&phone)
        .await
        .map_err(ApiError::store("Internal Server Error"))?;

    // Unknown contacts are bot-handled by default; the 404 lets the caller decide.
    Ok(match conversation {
        Some(conversation) => {
            Json(json!({ "success": true, "status": conversation.status })).into_response()
        }
        None => (
            StatusCode::NOT_FOUND,
            Json(json!({
                "error": "Conversation not found",
                "status": ConversationStatus::Bot,
            })),
        )
            .into_response(),
    })
}

async fn patch_conversation_status(
    Path(conversation_id): Path<String>,
    State(state): State<Arc<AppState>>,
    payload: Result<Json<StatusBody>, JsonRejection>,
) -> ApiResult {
    let body = json_body(payload)?;
    let Some(raw) = non_blank(body.status.as_deref()) else {
        return Err(ApiError::bad_request("Missing status"));
    };
    let target = raw
        .parse::<ConversationStatus>()
        .map_err(ApiError::bad_request)?;
    if target == ConversationStatus::Closed {
        return Err(ApiError::bad_request("status must be 'bot' or 'human'"));
    }

    let current = state
        .store
        .conversation_by_id(&conversation_id)
        .await?
        .ok_or_else(|| ApiError::not_found("Conversation not found"))?;
    if !current.status.can_transition_to(target) {
        return Err(ApiError::Conflict(format!(
            "cannot change status of a {} conversation",
            current.status
        )));
    }
    if current.status == target {
        return Ok(Json(json!({ "success": true, "conversation": current })).into_response());
    }

    let updated = state
        .store
        .set_status(&conversation_id, target)
        .await
        .map_err(ApiError::store("Failed to update status"))?
        .ok_or_else(|| ApiError::not_found("Conversation not found"))?;

    tracing::info!(
        conversation_id = %conversation_id,
        from = %current.status,
        to = %target,
        "conversation status changed"
    );
    state
        .changes
        .publish(ChangeEvent::conversation(ChangeKind::Update, &updated));

    Ok(Json(json!({ "success": true, "conversation": updated })).into_response())
}

async fn list_conversations(
    State(state): State<Arc<AppState>>,
    Query(query): Query<InboxQuery>,
) -> ApiResult {
    let filter = InboxFilter::try_from(query).map_err(ApiError::bad_request)?;
    let conversations = filter.apply(state.store.list_conversations().await?);
    Ok(Json(json!({ "conversations": conversations })).into_response())
}

async fn get_conversation(
    Path(conversation_id): Path<String>,
    State(state): State<Arc<AppState>>,
) -> ApiResult {
    let conversation = state
        .store
        .conversation_by_id(&conversation_id)
        .await?
        .ok_or_else(|| ApiError::not_found("Conversation not found"))?;
    Ok(Json(json!({ "conversation": conversation })).into_response())
}

async fn get_messages(
    Path(conversation_id): Path<String>,
    State(state): State<Arc<AppState>>,
) -> ApiResult {
    if state.store.conversation_by_id(&conversation_id).await?.is_none() {
        return Err(ApiError::not_found("Conversation not found"));
    }
    let messages = state.store.list_messages(&conversation_id).await?;
    Ok(Json(json!({ "messages": messages })).into_response())
}

async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(json!({ "ok": true, "now": now_iso(), "store": state.store.backend() }))
}

/// Legacy paths still used by existing automation workflows.
fn whatsapp_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/incoming", post(webhook_incoming))
        .route("/send", post(send_message))
        .route("/bot", post(bot_reply))
        .route("/mark-read", post(mark_read))
        .route("/check-status", post(check_status))
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/webhook-incoming", post(webhook_incoming))
        .route("/send", post(send_message))
        .route("/bot-reply", post(bot_reply))
        .route("/mark-read", post(mark_read))
        .route("/check-status", post(check_status))
        .nest("/api/whatsapp", whatsapp_routes())
        .route("/api/conversations", get(list_conversations))
        .route("/api/conversations/{conversation_id}", get(get_conversation))
        .route(
            "/api/conversations/{conversation_id}/messages",
            get(get_messages),
        )
        .route(
            "/api/conversations/{conversation_id}/status",
            patch(patch_conversation_status),
        )
        .route("/ws", get(ws_handler))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn build_store(config: &Config) -> anyhow::Result<Arc<dyn InboxStore>> {
    match config.store {
        StoreBackend::Memory => {
            tracing::warn!("using in-memory store; data is lost on restart");
            Ok(Arc::new(MemoryStore::new()))
        }
        StoreBackend::Postgres => {
            let store = PgStore::connect(&config.database_url, config.db_max_connections).await?;
            if config.run_migrations {
                store.migrate().await?;
                tracing::info!("database migrations applied");
            }
            Ok(Arc::new(store))
        }
    }
}

pub async fn run(config: Config) -> anyhow::Result<()> {
    let store = build_store(&config).await?;
    let automation =
        AutomationDispatcher::new(config.automation_webhook_url.clone(), config.automation_timeout)?;
    if automation.endpoint().is_none() {
        tracing::warn!("AUTOMATION_WEBHOOK_URL not set; operator replies will not be forwarded");
    }

    let state = AppState::new(store, ChangeFeed::new(config.realtime_buffer), automation);
    let app = router(state);

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(%addr, store = ?config.store, "inbox server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("inbox server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %err, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}
