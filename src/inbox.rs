use serde::Deserialize;

use crate::types::{Conversation, ConversationStatus};

/// Raw query string of the inbox list endpoint.
#[derive(Debug, Default, Deserialize)]
pub struct InboxQuery {
    pub q: Option<String>,
    pub status: Option<String>,
    pub unread: Option<String>,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct InboxFilter {
    /// Lowercased needle matched against name, phone and last message.
    pub search: Option<String>,
    pub status: Option<ConversationStatus>,
    pub unread_only: bool,
}

impl TryFrom<InboxQuery> for InboxFilter {
    type Error = String;

    fn try_from(query: InboxQuery) -> Result<Self, Self::Error> {
        let search = query
            .q
            .map(|q| q.trim().to_lowercase())
            .filter(|q| !q.is_empty());
        let status = match query.status.as_deref().map(str::trim) {
            None | Some("") | Some("all") => None,
            Some(raw) => Some(raw.parse()?),
        };
        let unread_only = matches!(
            query.unread.as_deref().map(str::trim),
            Some("1" | "true" | "yes")
        );
        Ok(Self {
            search,
            status,
            unread_only,
        })
    }
}

impl InboxFilter {
    pub fn matches(&self, conversation: &Conversation) -> bool {
        if self.status.is_some_and(|status| status != conversation.status) {
            return false;
        }
        if self.unread_only && conversation.unread_count <= 0 {
            return false;
        }
        let Some(needle) = self.search.as_deref() else {
            return true;
        };
        let haystacks = [
            conversation.name.as_deref(),
            Some(conversation.phone.as_str()),
            conversation.last_message.as_deref(),
        ];
        haystacks
            .into_iter()
            .flatten()
            .any(|field| field.to_lowercase().contains(needle))
    }

    /// Keeps the input order, which the store already sorts newest first.
    pub fn apply(&self, conversations: Vec<Conversation>) -> Vec<Conversation> {
        conversations
            .into_iter()
            .filter(|c| self.matches(c))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn conversation(
        phone: &str,
        name: Option<&str>,
        status: ConversationStatus,
        last: &str,
        unread: i32,
    ) -> Conversation {
        Conversation {
            id: format!("id-{phone}"),
            phone: phone.to_string(),
            name: name.map(str::to_string),
            status,
            last_message: Some(last.to_string()),
            unread_count: unread,
            created_at: "2026-01-01T00:00:00.000000Z".into(),
            updated_at: "2026-01-01T00:00:00.000000Z".into(),
        }
    }

    fn sample() -> Vec<Conversation> {
        vec![
            conversation("5511999", Some("Maria Souza"), ConversationStatus::Human, "Need a refund", 2),
            conversation("5511888", None, ConversationStatus::Bot, "What are your hours?", 0),
            conversation("3460011", Some("Jordi"), ConversationStatus::Closed, "thanks", 0),
        ]
    }

    fn filter(q: Option<&str>, status: Option<&str>, unread: Option<&str>) -> InboxFilter {
        InboxFilter::try_from(InboxQuery {
            q: q.map(str::to_string),
            status: status.map(str::to_string),
            unread: unread.map(str::to_string),
        })
        .unwrap()
    }

    fn phones(list: &[Conversation]) -> Vec<&str> {
        list.iter().map(|c| c.phone.as_str()).collect()
    }

    #[test]
    fn empty_filter_keeps_everything_in_order() {
        let out = filter(None, None, None).apply(sample());
        assert_eq!(phones(&out), ["5511999", "5511888", "3460011"]);
    }

    #[test]
    fn search_covers_name_phone_and_last_message() {
        assert_eq!(phones(&filter(Some("maria"), None, None).apply(sample())), ["5511999"]);
        assert_eq!(phones(&filter(Some("5511"), None, None).apply(sample())), ["5511999", "5511888"]);
        assert_eq!(phones(&filter(Some("HOURS"), None, None).apply(sample())), ["5511888"]);
        assert!(filter(Some("nothing-like-this"), None, None).apply(sample()).is_empty());
    }

    #[test]
    fn status_and_unread_filters_combine() {
        assert_eq!(phones(&filter(None, Some("bot"), None).apply(sample())), ["5511888"]);
        assert_eq!(phones(&filter(None, None, Some("true")).apply(sample())), ["5511999"]);
        assert!(filter(None, Some("bot"), Some("1")).apply(sample()).is_empty());
        assert_eq!(filter(None, Some("all"), None).apply(sample()).len(), 3);
    }

    #[test]
    fn unknown_status_is_rejected() {
        let err = InboxFilter::try_from(InboxQuery {
            status: Some("pending".into()),
            ..InboxQuery::default()
        });
        assert!(err.is_err());
    }
}
