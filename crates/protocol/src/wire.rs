use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::event::{RagSource, null_as_empty};

/// Retention tier the service applies to a conversation's knowledge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KnowledgeTier {
    #[default]
    Ephemeral,
    Persistent,
}

/// Chat speaker role as spelled on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// Body of the streaming chat call.
///
/// `conversation_id` is `None` until the service has assigned a canonical id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatRequest {
    pub message: String,
    pub conversation_id: Option<String>,
    #[serde(default)]
    pub search_all: bool,
    #[serde(default)]
    pub knowledge_tier: KnowledgeTier,
}

impl ChatRequest {
    pub fn new(message: impl Into<String>, conversation_id: Option<String>) -> Self {
        Self {
            message: message.into(),
            conversation_id,
            search_all: false,
            knowledge_tier: KnowledgeTier::default(),
        }
    }

    pub fn with_search_all(mut self, search_all: bool) -> Self {
        self.search_all = search_all;
        self
    }

    pub fn with_knowledge_tier(mut self, knowledge_tier: KnowledgeTier) -> Self {
        self.knowledge_tier = knowledge_tier;
        self
    }
}

/// One row of the conversation listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationRecord {
    pub conversation_id: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub knowledge_tier: KnowledgeTier,
    pub started_at: DateTime<Utc>,
    pub last_active: DateTime<Utc>,
}

/// One row of a conversation's message history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageRecord {
    pub message_id: String,
    pub conversation_id: String,
    pub role: Role,
    pub content: String,
    #[serde(default)]
    pub model_used: Option<String>,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub rag_sources: Vec<RagSource>,
    pub timestamp: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_serializes_null_conversation_id() {
        let request = ChatRequest::new("Hello", None).with_search_all(true);
        let json = serde_json::to_value(&request).unwrap_or_default();

        assert_eq!(
            json,
            serde_json::json!({
                "message": "Hello",
                "conversation_id": null,
                "search_all": true,
                "knowledge_tier": "ephemeral",
            })
        );
    }

    #[test]
    fn listing_rows_parse_service_timestamps() {
        let rows: Vec<ConversationRecord> = serde_json::from_str(
            r#"[{"conversation_id":"conv_1","title":null,"knowledge_tier":"persistent",
                "started_at":"2026-01-02T03:04:05Z","last_active":"2026-01-02T03:05:00+00:00"}]"#,
        )
        .unwrap_or_default();

        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].knowledge_tier, KnowledgeTier::Persistent);
        assert!(rows[0].last_active > rows[0].started_at);
    }
}
