use std::future::Future;
use std::pin::Pin;

use athena_protocol::{ChatRequest, ConversationRecord, MessageRecord};
use bytes::Bytes;
use futures::Stream;
use snafu::Snafu;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;
pub type TransportResult<T> = Result<T, TransportError>;
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Ordered response body of the streaming chat call.
pub type ByteStream = Pin<Box<dyn Stream<Item = TransportResult<Bytes>> + Send + 'static>>;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum TransportError {
    #[snafu(display("chat service rejected the credentials on `{stage}`"))]
    Unauthorized { stage: &'static str },
    #[snafu(display("chat service returned status {status} on `{stage}`: {body}"))]
    Status {
        stage: &'static str,
        status: u16,
        body: String,
    },
    #[snafu(display("failed to build http client on `{stage}`, {source}"))]
    BuildClient {
        stage: &'static str,
        source: reqwest::Error,
    },
    #[snafu(display("request to chat service failed on `{stage}`, {source}"))]
    Request {
        stage: &'static str,
        source: reqwest::Error,
    },
    /// The body stream failed after the service accepted the request.
    #[snafu(display("reading the response stream failed on `{stage}`, {source}"))]
    ReadChunk {
        stage: &'static str,
        source: BoxError,
    },
    #[snafu(display("failed to decode response body on `{stage}`, {source}"))]
    DecodeBody {
        stage: &'static str,
        source: reqwest::Error,
    },
}

impl TransportError {
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, Self::Unauthorized { .. })
    }
}

/// Remote chat service as seen by the client.
///
/// `open_stream` resolves once the service has accepted the request; the returned
/// stream then yields the raw response body.
pub trait ChatService: Send + Sync {
    fn open_stream<'a>(&'a self, request: ChatRequest) -> BoxFuture<'a, TransportResult<ByteStream>>;
    fn list_conversations<'a>(&'a self) -> BoxFuture<'a, TransportResult<Vec<ConversationRecord>>>;
    fn list_messages<'a>(
        &'a self,
        conversation_id: &'a str,
    ) -> BoxFuture<'a, TransportResult<Vec<MessageRecord>>>;
}
