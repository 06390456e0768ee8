use athena_protocol::{ConversationRecord, KnowledgeTier, MessageRecord, RagSource, Role};
use chrono::{DateTime, Utc};

use super::ids::{CanonicalId, ConversationId, MessageId};

/// Title shown until the first exchange completes.
pub const DEFAULT_CONVERSATION_TITLE: &str = "New Conversation";

/// Longest title derived from a first message, in characters.
pub const TITLE_MAX_CHARS: usize = 50;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Conversation {
    pub id: ConversationId,
    pub title: String,
    pub knowledge_tier: KnowledgeTier,
    pub created_at: DateTime<Utc>,
    pub last_active: DateTime<Utc>,
}

impl Conversation {
    /// Placeholder inserted when a message is sent with no active conversation.
    pub fn placeholder(id: ConversationId, knowledge_tier: KnowledgeTier) -> Self {
        let now = Utc::now();
        Self {
            id,
            title: DEFAULT_CONVERSATION_TITLE.to_string(),
            knowledge_tier,
            created_at: now,
            last_active: now,
        }
    }

    pub fn has_placeholder_title(&self) -> bool {
        self.title == DEFAULT_CONVERSATION_TITLE
    }

    pub fn touch(&mut self) {
        self.last_active = Utc::now();
    }
}

impl From<ConversationRecord> for Conversation {
    fn from(record: ConversationRecord) -> Self {
        Self {
            id: ConversationId::Canonical(CanonicalId::new(record.conversation_id)),
            title: record
                .title
                .filter(|title| !title.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_CONVERSATION_TITLE.to_string()),
            knowledge_tier: record.knowledge_tier,
            created_at: record.started_at,
            last_active: record.last_active,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub id: MessageId,
    pub role: Role,
    pub content: String,
    pub model_used: Option<String>,
    pub citations: Vec<RagSource>,
    pub timestamp: DateTime<Utc>,
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            id: MessageId::new_v7(),
            role,
            content: content.into(),
            model_used: None,
            citations: Vec::new(),
            timestamp: Utc::now(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    /// Materializes an answer from the accumulated stream text.
    pub fn assistant(
        content: impl Into<String>,
        model: impl Into<String>,
        citations: Vec<RagSource>,
    ) -> Self {
        let mut message = Self::new(Role::Assistant, content);
        message.model_used = Some(model.into());
        message.citations = citations;
        message
    }
}

impl From<MessageRecord> for Message {
    fn from(record: MessageRecord) -> Self {
        Self {
            // Service ids are opaque strings; local ids only need to be unique per store.
            id: MessageId::new_v7(),
            role: record.role,
            content: record.content,
            model_used: record.model_used,
            citations: record.rag_sources,
            timestamp: record.timestamp,
        }
    }
}

/// Derives a conversation title from its first user message.
pub fn title_from_first_message(content: &str) -> String {
    let trimmed = content.trim();
    let mut title = trimmed.chars().take(TITLE_MAX_CHARS).collect::<String>();
    if trimmed.chars().count() > TITLE_MAX_CHARS {
        title = title.trim_end().to_string();
        title.push_str("...");
    }
    title
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_titles_are_kept_verbatim() {
        assert_eq!(title_from_first_message("  Hello  "), "Hello");
    }

    #[test]
    fn long_titles_are_cut_on_character_boundaries() {
        let content = "é".repeat(60);
        let title = title_from_first_message(&content);
        assert_eq!(title.chars().count(), TITLE_MAX_CHARS + 3);
        assert!(title.ends_with("..."));
    }

    #[test]
    fn blank_listing_titles_fall_back_to_placeholder() {
        let record = ConversationRecord {
            conversation_id: "conv_1".to_string(),
            title: Some("   ".to_string()),
            knowledge_tier: KnowledgeTier::Ephemeral,
            started_at: Utc::now(),
            last_active: Utc::now(),
        };
        let conversation = Conversation::from(record);
        assert!(conversation.has_placeholder_title());
        assert_eq!(conversation.id, ConversationId::canonical("conv_1"));
    }
}
