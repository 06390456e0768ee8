#![deny(unsafe_code)]

//! Client side of the streaming chat: drives one request/response cycle at a time,
//! applies decoded events to the optimistic store, and reconciles provisional
//! conversation identity when the service reveals the canonical id.

pub mod auth;
pub mod cancel;
/// Send/stream state machine.
pub mod controller;
pub mod error;
pub mod http;
pub mod service;
pub mod settings;

pub use auth::{AuthSession, TokenStore};
pub use cancel::CancelHandle;
pub use controller::{
    ControllerError, ControllerResult, PreparedSession, ReconciliationController, SessionOutcome,
    SessionPhase, StreamUpdate,
};
pub use error::ClientError;
pub use http::HttpChatService;
pub use service::{BoxError, BoxFuture, ByteStream, ChatService, TransportError, TransportResult};
pub use settings::{ClientSettings, SettingsError, SettingsStore};
