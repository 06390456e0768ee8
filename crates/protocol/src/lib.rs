#![deny(unsafe_code)]

//! Wire format spoken by the chat service: request bodies, listing rows, and the
//! line-oriented event stream returned by the streaming chat call.

/// Payload line decoding.
pub mod event;
/// Byte chunk to line framing.
pub mod framer;
pub mod stream;
pub mod wire;

pub use event::{Completion, DATA_PREFIX, RagSource, StreamEvent, decode_line};
pub use framer::LineFramer;
pub use stream::EventStream;
pub use wire::{ChatRequest, ConversationRecord, KnowledgeTier, MessageRecord, Role};
