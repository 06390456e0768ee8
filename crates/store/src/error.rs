use snafu::Snafu;

use super::ids::ConversationId;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum StoreError {
    #[snafu(display("message content is empty after trimming"))]
    EmptyContent { stage: &'static str },
    #[snafu(display("a stream session targeting {target} is already in flight"))]
    SessionInFlight {
        stage: &'static str,
        target: ConversationId,
    },
    #[snafu(display("conversation {conversation_id} is the target of the in-flight session"))]
    ConversationBusy {
        stage: &'static str,
        conversation_id: ConversationId,
    },
    #[snafu(display("conversation {conversation_id} is not in the store"))]
    UnknownConversation {
        stage: &'static str,
        conversation_id: ConversationId,
    },
}

pub type StoreResult<T> = Result<T, StoreError>;
