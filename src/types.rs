use std::{fmt, str::FromStr};

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

/// Timestamps are stored as text; fixed microsecond precision keeps lexical
/// order equal to chronological order.
pub fn now_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Reduces a contact phone to its ASCII digits. `None` when nothing is left.
pub fn normalize_phone(raw: &str) -> Option<String> {
    let digits = raw
        .chars()
        .filter(|c| c.is_ascii_digit())
        .collect::<String>();
    if digits.is_empty() {
        None
    } else {
        Some(digits)
    }
}

/// Trimmed text, or `None` when the field is absent or blank.
pub fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConversationStatus {
    Bot,
    Human,
    Closed,
}

impl ConversationStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Bot => "bot",
            Self::Human => "human",
            Self::Closed => "closed",
        }
    }

    /// Operators may only hand a conversation between the bot and a human.
    /// Re-applying the current status is allowed and is a no-op.
    pub fn can_transition_to(self, target: ConversationStatus) -> bool {
        !matches!((self, target), (Self::Closed, _) | (_, Self::Closed))
    }
}

impl fmt::Display for ConversationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConversationStatus {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "bot" => Ok(Self::Bot),
            "human" => Ok(Self::Human),
            "closed" => Ok(Self::Closed),
            other => Err(format!("unknown conversation status '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sender {
    User,
    Bot,
    Human,
}

impl Sender {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Bot => "bot",
            Self::Human => "human",
        }
    }

    /// Only messages from the contact count towards the unread state.
    pub fn read_on_insert(self) -> bool {
        !matches!(self, Self::User)
    }
}

impl fmt::Display for Sender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Sender {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "user" => Ok(Self::User),
            "bot" => Ok(Self::Bot),
            "human" => Ok(Self::Human),
            other => Err(format!("unknown message sender '{other}'")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: String,
    pub phone: String,
    pub name: Option<String>,
    pub status: ConversationStatus,
    pub last_message: Option<String>,
    pub unread_count: i32,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub conversation_id: String,
    pub sender: Sender,
    pub message: String,
    pub is_read: bool,
    pub created_at: String,
}

/// A message from the contact, already validated and normalized.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub phone: String,
    pub name: Option<String>,
    pub text: String,
}

/// Result of recording an inbound message.
#[derive(Debug, Clone)]
pub struct InboundRecord {
    pub conversation: Conversation,
    pub message: Message,
    pub created: bool,
}

/// Result of appending a bot or human reply to an existing conversation.
#[derive(Debug, Clone)]
pub struct ReplyRecord {
    pub conversation: Conversation,
    pub message: Message,
}

#[derive(Debug, Default, Deserialize)]
pub struct IncomingBody {
    pub phone: Option<String>,
    pub name: Option<String>,
    pub message: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct SendBody {
    pub conversation_id: Option<String>,
    pub message: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct BotReplyBody {
    pub phone: Option<String>,
    pub message: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct MarkReadBody {
    pub conversation_id: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct CheckStatusBody {
    pub phone: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct StatusBody {
    pub status: Option<String>,
}

/// Payload forwarded to the automation engine after a human reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboundNotice {
    pub phone: String,
    pub message: String,
    pub status: ConversationStatus,
}
