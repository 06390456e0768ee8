use std::fmt;
use std::sync::{Arc, Weak};

use athena_protocol::{ChatRequest, Completion, EventStream, StreamEvent};
use athena_store::{
    CanonicalId, CompletionOutcome, ConversationId, ConversationStore, StoreError,
};
use futures::StreamExt;
use snafu::{ResultExt, Snafu, ensure};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::auth::AuthSession;
use super::cancel::CancelHandle;
use super::service::{ChatService, TransportError};

/// Where the controller is in a send cycle.
///
/// Terminal outcomes are reported through [`SessionOutcome`]; the controller itself
/// always returns to `Idle` once a session ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionPhase {
    #[default]
    Idle,
    Sending,
    Streaming,
}

impl fmt::Display for SessionPhase {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Idle => "idle",
            Self::Sending => "sending",
            Self::Streaming => "streaming",
        };
        formatter.write_str(label)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionOutcome {
    Completed {
        conversation_id: CanonicalId,
        model: String,
    },
    Errored {
        message: String,
    },
    Cancelled,
}

/// Progress published to renderers while a session runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamUpdate {
    Started { conversation_id: ConversationId },
    Status(String),
    Token(String),
    Finished(SessionOutcome),
}

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum ControllerError {
    #[snafu(display("a session is already {phase}; send rejected"))]
    SessionActive {
        stage: &'static str,
        phase: SessionPhase,
    },
    #[snafu(display("message content is empty"))]
    EmptyMessage { stage: &'static str },
    #[snafu(display("store rejected `{stage}`: {source}"))]
    Store {
        stage: &'static str,
        source: StoreError,
    },
    #[snafu(display("chat service call failed on `{stage}`: {source}"))]
    Transport {
        stage: &'static str,
        source: TransportError,
    },
}

pub type ControllerResult<T> = Result<T, ControllerError>;

/// A send accepted by [`ReconciliationController::begin_send`], waiting to be driven.
///
/// Dropping it undriven releases the controller: the next send or navigation call
/// ends the orphaned store session and returns to `Idle`.
#[derive(Debug)]
pub struct PreparedSession {
    target: ConversationId,
    content: String,
    cancel: CancelHandle,
    liveness: Arc<()>,
}

impl PreparedSession {
    pub fn target(&self) -> &ConversationId {
        &self.target
    }

    /// Handle that aborts this session from anywhere, before or during streaming.
    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }
}

/// Drives one request/response streaming cycle at a time against a store.
pub struct ReconciliationController {
    service: Arc<dyn ChatService>,
    auth: Arc<dyn AuthSession>,
    phase: SessionPhase,
    in_flight: Option<Weak<()>>,
    updates: Option<mpsc::UnboundedSender<StreamUpdate>>,
}

impl ReconciliationController {
    pub fn new(service: Arc<dyn ChatService>, auth: Arc<dyn AuthSession>) -> Self {
        Self {
            service,
            auth,
            phase: SessionPhase::Idle,
            in_flight: None,
            updates: None,
        }
    }

    pub fn with_updates(mut self, updates: mpsc::UnboundedSender<StreamUpdate>) -> Self {
        self.updates = Some(updates);
        self
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    /// Accepts a send and records the optimistic user message.
    ///
    /// Rejected with no store mutation while another session is active or when the
    /// trimmed content is empty.
    pub fn begin_send(
        &mut self,
        store: &mut ConversationStore,
        content: &str,
    ) -> ControllerResult<PreparedSession> {
        self.recover_orphaned(store);
        ensure!(
            self.phase == SessionPhase::Idle,
            SessionActiveSnafu {
                stage: "begin-send",
                phase: self.phase,
            }
        );
        let content = content.trim();
        ensure!(
            !content.is_empty(),
            EmptyMessageSnafu {
                stage: "begin-send"
            }
        );

        let target = store
            .begin_session(content)
            .context(StoreSnafu { stage: "begin-send" })?;
        self.phase = SessionPhase::Sending;
        self.publish(StreamUpdate::Started {
            conversation_id: target.clone(),
        });

        let liveness = Arc::new(());
        self.in_flight = Some(Arc::downgrade(&liveness));
        Ok(PreparedSession {
            target,
            content: content.to_string(),
            cancel: CancelHandle::new(),
            liveness,
        })
    }

    /// Runs a prepared session to its terminal state and returns to `Idle`.
    ///
    /// Dropping the returned future midway cancels the session in the store and
    /// still returns the controller to `Idle`.
    pub async fn drive(
        &mut self,
        store: &mut ConversationStore,
        session: PreparedSession,
    ) -> SessionOutcome {
        let PreparedSession {
            target,
            content,
            cancel,
            liveness: _liveness,
        } = session;

        let flags = store.session_flags();
        let request = ChatRequest::new(
            content,
            target.as_canonical().map(|id| id.as_str().to_string()),
        )
        .with_search_all(flags.search_all)
        .with_knowledge_tier(flags.knowledge_tier);

        let mut guard = DriveGuard {
            controller: self,
            store,
            armed: true,
        };
        let outcome = guard
            .controller
            .run(&mut *guard.store, request, cancel.token())
            .await;
        guard.finish(outcome)
    }

    /// Accepts and drives a send in one call.
    pub async fn send(
        &mut self,
        store: &mut ConversationStore,
        content: &str,
    ) -> ControllerResult<SessionOutcome> {
        let session = self.begin_send(store, content)?;
        Ok(self.drive(store, session).await)
    }

    /// Releases a prepared session that will never be driven.
    pub fn abandon(&mut self, store: &mut ConversationStore, session: PreparedSession) {
        tracing::debug!(conversation_id = %session.target, "prepared session abandoned");
        store.cancel();
        self.reset(SessionOutcome::Cancelled);
    }

    /// Reloads the conversation listing into the store.
    pub async fn refresh_conversations(
        &mut self,
        store: &mut ConversationStore,
    ) -> ControllerResult<usize> {
        let records = self
            .service
            .list_conversations()
            .await
            .map_err(|error| self.observe_transport_error(error))
            .context(TransportSnafu {
                stage: "refresh-conversations",
            })?;
        let count = records.len();
        store.replace_conversations(records);
        Ok(count)
    }

    /// Loads a conversation's history and makes it active.
    pub async fn open_conversation(
        &mut self,
        store: &mut ConversationStore,
        conversation_id: &CanonicalId,
    ) -> ControllerResult<()> {
        self.recover_orphaned(store);
        ensure!(
            self.phase == SessionPhase::Idle,
            SessionActiveSnafu {
                stage: "open-conversation",
                phase: self.phase,
            }
        );

        let records = self
            .service
            .list_messages(conversation_id.as_str())
            .await
            .map_err(|error| self.observe_transport_error(error))
            .context(TransportSnafu {
                stage: "open-conversation",
            })?;
        store
            .replace_messages(conversation_id, records)
            .context(StoreSnafu {
                stage: "open-conversation",
            })?;
        store
            .select_conversation(&ConversationId::Canonical(conversation_id.clone()))
            .context(StoreSnafu {
                stage: "open-conversation",
            })
    }

    async fn run(
        &mut self,
        store: &mut ConversationStore,
        request: ChatRequest,
        cancel: &CancellationToken,
    ) -> SessionOutcome {
        let opened = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            opened = self.service.open_stream(request) => Some(opened),
        };
        let chunks = match opened {
            None => return Self::finish_cancelled(store),
            Some(Ok(chunks)) => chunks,
            Some(Err(error)) => return self.finish_transport_error(store, error),
        };

        self.phase = SessionPhase::Streaming;
        let mut events = EventStream::new(chunks);

        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Self::finish_cancelled(store),
                next = events.next() => next,
            };
            // Events already buffered in the reader must not land after an abort.
            if cancel.is_cancelled() {
                return Self::finish_cancelled(store);
            }

            match next {
                Some(Ok(event)) => {
                    if let Some(outcome) = self.apply_event(store, event) {
                        return outcome;
                    }
                }
                Some(Err(error)) => return self.finish_transport_error(store, error),
                None => {
                    tracing::warn!(
                        lines_seen = events.lines_seen(),
                        "stream ended without a completion event"
                    );
                    let message = "stream ended before the response completed".to_string();
                    store.apply_error(message.clone());
                    return SessionOutcome::Errored { message };
                }
            }
        }
    }

    fn apply_event(
        &mut self,
        store: &mut ConversationStore,
        event: StreamEvent,
    ) -> Option<SessionOutcome> {
        match event {
            StreamEvent::Token { content } => {
                store.apply_token(&content);
                self.publish(StreamUpdate::Token(content));
                None
            }
            StreamEvent::Status { content } => {
                store.apply_status(Some(content.clone()));
                self.publish(StreamUpdate::Status(content));
                None
            }
            StreamEvent::ContextDebug { tokens } => {
                store.hold_context_metric(tokens);
                None
            }
            StreamEvent::Done(completion) => Some(Self::finish_completed(store, completion)),
            StreamEvent::Error { content } => {
                store.apply_error(content.clone());
                Some(SessionOutcome::Errored { message: content })
            }
            StreamEvent::MalformedCompletion { details } => {
                let message = format!("malformed completion: {details}");
                store.apply_error(message.clone());
                Some(SessionOutcome::Errored { message })
            }
        }
    }

    fn finish_completed(store: &mut ConversationStore, completion: Completion) -> SessionOutcome {
        let conversation_id = completion.conversation_id.trim();
        if conversation_id.is_empty() {
            let message = "completion carried an empty conversation id".to_string();
            store.apply_error(message.clone());
            return SessionOutcome::Errored { message };
        }

        let conversation_id = CanonicalId::new(conversation_id);
        tracing::debug!(
            conversation_id = %conversation_id,
            latency_ms = completion.latency_ms,
            citations = completion.rag_sources.len(),
            "completion received"
        );
        match store.apply_completion(
            conversation_id.clone(),
            &completion.model,
            completion.rag_sources,
        ) {
            CompletionOutcome::Reconciled { .. } | CompletionOutcome::AlreadyApplied => {
                SessionOutcome::Completed {
                    conversation_id,
                    model: completion.model,
                }
            }
            CompletionOutcome::NoSession => SessionOutcome::Errored {
                message: "completion arrived after the session ended".to_string(),
            },
        }
    }

    fn finish_cancelled(store: &mut ConversationStore) -> SessionOutcome {
        store.cancel();
        SessionOutcome::Cancelled
    }

    fn finish_transport_error(
        &self,
        store: &mut ConversationStore,
        error: TransportError,
    ) -> SessionOutcome {
        let error = self.observe_transport_error(error);
        tracing::error!(error = %error, "stream session failed in transport");
        let message = error.to_string();
        store.apply_error(message.clone());
        SessionOutcome::Errored { message }
    }

    fn observe_transport_error(&self, error: TransportError) -> TransportError {
        if error.is_unauthorized() {
            self.auth.logout();
        }
        error
    }

    /// Ends a session whose [`PreparedSession`] was dropped without being driven.
    fn recover_orphaned(&mut self, store: &mut ConversationStore) {
        if self.phase == SessionPhase::Idle
            || self
                .in_flight
                .as_ref()
                .is_some_and(|session| session.strong_count() > 0)
        {
            return;
        }
        tracing::warn!(phase = %self.phase, "prepared session dropped undriven; releasing it");
        store.cancel();
        self.reset(SessionOutcome::Cancelled);
    }

    fn reset(&mut self, outcome: SessionOutcome) {
        self.phase = SessionPhase::Idle;
        self.in_flight = None;
        self.publish(StreamUpdate::Finished(outcome));
    }

    fn publish(&self, update: StreamUpdate) {
        if let Some(updates) = &self.updates {
            // A closed receiver only means nobody is rendering.
            let _ = updates.send(update);
        }
    }
}

/// Holds both borrows for the length of a drive so an interrupted drive still ends
/// the store session and returns the controller to `Idle`.
struct DriveGuard<'a> {
    controller: &'a mut ReconciliationController,
    store: &'a mut ConversationStore,
    armed: bool,
}

impl DriveGuard<'_> {
    fn finish(mut self, outcome: SessionOutcome) -> SessionOutcome {
        self.armed = false;
        self.controller.reset(outcome.clone());
        outcome
    }
}

impl Drop for DriveGuard<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        tracing::warn!(phase = %self.controller.phase, "stream session dropped before a terminal event");
        self.store.cancel();
        self.controller.reset(SessionOutcome::Cancelled);
    }
}
