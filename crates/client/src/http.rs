use std::sync::Arc;
use std::time::Duration;

use athena_protocol::{ChatRequest, ConversationRecord, MessageRecord};
use futures::StreamExt;
use reqwest::header::ACCEPT;
use reqwest::{RequestBuilder, Response, StatusCode};
use snafu::ResultExt;

use super::auth::AuthSession;
use super::service::{
    BoxError, BoxFuture, BuildClientSnafu, ByteStream, ChatService, DecodeBodySnafu,
    ReadChunkSnafu, RequestSnafu, StatusSnafu, TransportResult, UnauthorizedSnafu,
};
use super::settings::ClientSettings;

pub const CHAT_PATH: &str = "/api/chat";
pub const CONVERSATIONS_PATH: &str = "/api/chat/conversations";

/// [`ChatService`] over HTTP.
pub struct HttpChatService {
    client: reqwest::Client,
    base_url: String,
    auth: Arc<dyn AuthSession>,
}

impl HttpChatService {
    pub fn new(settings: &ClientSettings, auth: Arc<dyn AuthSession>) -> TransportResult<Self> {
        // No overall timeout: a healthy stream may stay open for minutes.
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(settings.connect_timeout_secs))
            .build()
            .context(BuildClientSnafu {
                stage: "http-service-new",
            })?;

        Ok(Self {
            client,
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            auth,
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn authorized(&self, builder: RequestBuilder) -> RequestBuilder {
        match self.auth.bearer_token() {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    async fn checked(response: Response, stage: &'static str) -> TransportResult<Response> {
        let status = response.status();
        if status == StatusCode::UNAUTHORIZED {
            return UnauthorizedSnafu { stage }.fail();
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::warn!(status = status.as_u16(), stage, "chat service returned an error status");
            return StatusSnafu {
                stage,
                status: status.as_u16(),
                body,
            }
            .fail();
        }
        Ok(response)
    }
}

impl ChatService for HttpChatService {
    fn open_stream<'a>(&'a self, request: ChatRequest) -> BoxFuture<'a, TransportResult<ByteStream>> {
        Box::pin(async move {
            let response = self
                .authorized(self.client.post(self.endpoint(CHAT_PATH)))
                .header(ACCEPT, "text/event-stream")
                .json(&request)
                .send()
                .await
                .context(RequestSnafu {
                    stage: "open-stream-send",
                })?;
            let response = Self::checked(response, "open-stream-status").await?;

            tracing::debug!(
                conversation_id = request.conversation_id.as_deref().unwrap_or("<new>"),
                "chat stream opened"
            );
            let chunks = response.bytes_stream().map(|chunk| {
                chunk
                    .map_err(BoxError::from)
                    .context(ReadChunkSnafu {
                        stage: "read-stream-chunk",
                    })
            });
            Ok(Box::pin(chunks) as ByteStream)
        })
    }

    fn list_conversations<'a>(&'a self) -> BoxFuture<'a, TransportResult<Vec<ConversationRecord>>> {
        Box::pin(async move {
            let response = self
                .authorized(self.client.get(self.endpoint(CONVERSATIONS_PATH)))
                .send()
                .await
                .context(RequestSnafu {
                    stage: "list-conversations-send",
                })?;
            let response = Self::checked(response, "list-conversations-status").await?;
            response.json().await.context(DecodeBodySnafu {
                stage: "list-conversations-decode",
            })
        })
    }

    fn list_messages<'a>(
        &'a self,
        conversation_id: &'a str,
    ) -> BoxFuture<'a, TransportResult<Vec<MessageRecord>>> {
        Box::pin(async move {
            let path = format!("{CONVERSATIONS_PATH}/{conversation_id}/messages");
            let response = self
                .authorized(self.client.get(self.endpoint(&path)))
                .send()
                .await
                .context(RequestSnafu {
                    stage: "list-messages-send",
                })?;
            let response = Self::checked(response, "list-messages-status").await?;
            response.json().await.context(DecodeBodySnafu {
                stage: "list-messages-decode",
            })
        })
    }
}
