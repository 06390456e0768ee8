#![deny(unsafe_code)]

pub mod error;
/// Pending and per-conversation request flags.
pub mod flags;
pub mod ids;
/// Optimistic conversation state and identity reconciliation.
pub mod store;
pub mod types;

pub use error::{StoreError, StoreResult};
pub use flags::{ConversationFlags, FlagSlot, FlagTable};
pub use ids::{CanonicalId, ConversationId, MessageId, ProvisionalId};
pub use store::{CompletionOutcome, ConversationStore, LiveResponse};
pub use types::{
    Conversation, DEFAULT_CONVERSATION_TITLE, Message, TITLE_MAX_CHARS, title_from_first_message,
};
