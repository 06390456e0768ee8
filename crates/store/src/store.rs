use std::collections::HashMap;

use athena_protocol::{ConversationRecord, KnowledgeTier, MessageRecord, RagSource, Role};
use snafu::ensure;

use super::error::{
    ConversationBusySnafu, EmptyContentSnafu, SessionInFlightSnafu, StoreResult,
    UnknownConversationSnafu,
};
use super::flags::{ConversationFlags, FlagSlot, FlagTable};
use super::ids::{CanonicalId, ConversationId};
use super::types::{Conversation, Message, title_from_first_message};

/// Text and phase label of the response currently being streamed.
///
/// Global to the in-flight session, not per conversation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LiveResponse {
    pub text: String,
    pub status: Option<String>,
}

impl LiveResponse {
    fn clear(&mut self) {
        self.text.clear();
        self.status = None;
    }
}

/// Store-side half of one in-flight stream.
#[derive(Debug, Clone, PartialEq, Eq)]
struct StreamSession {
    target: ConversationId,
    // Held until completion so it lands under whichever id turns out canonical.
    pending_context_tokens: Option<u64>,
}

#[derive(Debug, Clone, PartialEq)]
struct AppliedCompletion {
    conversation_id: CanonicalId,
    model: String,
    citations: Vec<RagSource>,
}

/// Result of [`ConversationStore::apply_completion`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompletionOutcome {
    Reconciled {
        conversation_id: CanonicalId,
        /// Identity the session targeted before reconciliation, when it differed.
        replaced: Option<ConversationId>,
    },
    /// Identical completion was already applied for the finished session.
    AlreadyApplied,
    /// No session was in flight and the completion matched nothing.
    NoSession,
}

/// Optimistic client-side view of conversations, messages, and the live response.
///
/// All operations are synchronous. The store is the sole owner of this state; the
/// controller mutates it only through these methods.
#[derive(Debug, Default)]
pub struct ConversationStore {
    conversations: Vec<Conversation>,
    messages: HashMap<ConversationId, Vec<Message>>,
    active: Option<ConversationId>,
    live: LiveResponse,
    session: Option<StreamSession>,
    flags: FlagTable,
    context_tokens: HashMap<CanonicalId, u64>,
    last_error: Option<String>,
    last_completion: Option<AppliedCompletion>,
}

impl ConversationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn conversations(&self) -> &[Conversation] {
        &self.conversations
    }

    pub fn conversation(&self, id: &ConversationId) -> Option<&Conversation> {
        self.conversations
            .iter()
            .find(|conversation| &conversation.id == id)
    }

    pub fn messages(&self, id: &ConversationId) -> &[Message] {
        self.messages.get(id).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn active_conversation(&self) -> Option<&ConversationId> {
        self.active.as_ref()
    }

    pub fn live(&self) -> &LiveResponse {
        &self.live
    }

    pub fn is_streaming(&self) -> bool {
        self.session.is_some()
    }

    pub fn session_target(&self) -> Option<&ConversationId> {
        self.session.as_ref().map(|session| &session.target)
    }

    /// Message of the last failed session, cleared when the next one begins.
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn context_tokens(&self, id: &CanonicalId) -> Option<u64> {
        self.context_tokens.get(id).copied()
    }

    pub fn flags(&self, slot: &FlagSlot) -> Option<ConversationFlags> {
        self.flags.get(slot)
    }

    /// Slot that user-facing toggles currently write to.
    pub fn current_flag_slot(&self) -> FlagSlot {
        match self.active.as_ref().and_then(ConversationId::as_canonical) {
            Some(id) => FlagSlot::Conversation(id.clone()),
            None => FlagSlot::Pending,
        }
    }

    pub fn current_flags(&self) -> ConversationFlags {
        self.flags.resolve(&self.current_flag_slot())
    }

    pub fn set_search_all(&mut self, search_all: bool) {
        let slot = self.current_flag_slot();
        self.flags.update(slot, |flags| flags.search_all = search_all);
    }

    pub fn set_knowledge_tier(&mut self, knowledge_tier: KnowledgeTier) {
        let slot = self.current_flag_slot();
        self.flags
            .update(slot, |flags| flags.knowledge_tier = knowledge_tier);
    }

    /// Opens a session for `content`.
    ///
    /// With no active conversation a provisional id is fabricated and a placeholder
    /// conversation is put at the head of the list. The user message is recorded
    /// optimistically under the target id and is never rolled back.
    pub fn begin_session(&mut self, content: &str) -> StoreResult<ConversationId> {
        let content = content.trim();
        ensure!(
            !content.is_empty(),
            EmptyContentSnafu {
                stage: "begin-session"
            }
        );
        if let Some(session) = &self.session {
            return SessionInFlightSnafu {
                stage: "begin-session",
                target: session.target.clone(),
            }
            .fail();
        }

        let target = match self.active.clone() {
            Some(id) => id,
            None => {
                let id = ConversationId::fresh_provisional();
                let tier = self.flags.resolve(&FlagSlot::Pending).knowledge_tier;
                self.conversations
                    .insert(0, Conversation::placeholder(id.clone(), tier));
                self.active = Some(id.clone());
                id
            }
        };

        self.messages
            .entry(target.clone())
            .or_default()
            .push(Message::user(content));
        self.touch(&target);

        self.live.clear();
        self.last_error = None;
        self.last_completion = None;
        self.session = Some(StreamSession {
            target: target.clone(),
            pending_context_tokens: None,
        });

        tracing::debug!(conversation_id = %target, "stream session started");
        Ok(target)
    }

    /// Flags to send with the in-flight request.
    pub fn session_flags(&self) -> ConversationFlags {
        let slot = match self
            .session
            .as_ref()
            .and_then(|session| session.target.as_canonical())
        {
            Some(id) => FlagSlot::Conversation(id.clone()),
            None => FlagSlot::Pending,
        };
        self.flags.resolve(&slot)
    }

    /// Appends a fragment to the live response. Any status label is cleared first.
    pub fn apply_token(&mut self, text: &str) -> bool {
        if self.session.is_none() {
            tracing::debug!("token arrived without a session; ignoring");
            return false;
        }
        self.live.status = None;
        self.live.text.push_str(text);
        true
    }

    pub fn apply_status(&mut self, label: Option<String>) -> bool {
        if self.session.is_none() {
            return false;
        }
        self.live.status = label;
        true
    }

    /// Holds a context figure until completion reveals which id it belongs to.
    pub fn hold_context_metric(&mut self, tokens: u64) -> bool {
        match self.session.as_mut() {
            Some(session) => {
                session.pending_context_tokens = Some(tokens);
                true
            }
            None => false,
        }
    }

    /// Ends the session successfully and reconciles identity.
    ///
    /// When the session targeted a different id (always the case for a provisional
    /// target) the conversation, its messages, its flags and its metrics move under
    /// `conversation_id`. Pending flags migrate exactly once. Re-applying the same
    /// completion after the session ended changes nothing.
    pub fn apply_completion(
        &mut self,
        conversation_id: CanonicalId,
        model: &str,
        citations: Vec<RagSource>,
    ) -> CompletionOutcome {
        let applied = AppliedCompletion {
            conversation_id: conversation_id.clone(),
            model: model.to_string(),
            citations,
        };

        let Some(session) = self.session.take() else {
            if self.last_completion.as_ref() == Some(&applied) {
                return CompletionOutcome::AlreadyApplied;
            }
            tracing::warn!(conversation_id = %conversation_id, "completion arrived without a session");
            return CompletionOutcome::NoSession;
        };

        let canonical = ConversationId::Canonical(conversation_id.clone());
        let replaced = if session.target != canonical {
            self.reconcile_identity(&session.target, &conversation_id);
            Some(session.target)
        } else {
            None
        };

        let text = std::mem::take(&mut self.live.text);
        if text.is_empty() {
            tracing::debug!(conversation_id = %conversation_id, "completion carried no text; no assistant message");
        } else {
            self.messages
                .entry(canonical.clone())
                .or_default()
                .push(Message::assistant(text, model, applied.citations.clone()));
        }

        self.retitle_from_first_message(&canonical);
        self.touch(&canonical);
        self.active = Some(canonical);

        if let Some(tokens) = session.pending_context_tokens {
            self.context_tokens.insert(conversation_id.clone(), tokens);
        }

        self.live.clear();
        self.last_error = None;
        self.last_completion = Some(applied);

        tracing::info!(
            conversation_id = %conversation_id,
            model = %model,
            reconciled = replaced.is_some(),
            "stream session completed"
        );
        CompletionOutcome::Reconciled {
            conversation_id,
            replaced,
        }
    }

    /// Ends the session abnormally. The user message stays; no answer is created.
    pub fn apply_error(&mut self, message: impl Into<String>) -> bool {
        self.end_session_without_answer(Some(message.into()))
    }

    /// Ends the session at the user's request, without a visible error.
    pub fn cancel(&mut self) -> bool {
        self.end_session_without_answer(None)
    }

    /// Makes an existing conversation active.
    pub fn select_conversation(&mut self, id: &ConversationId) -> StoreResult<()> {
        self.ensure_idle("select-conversation")?;
        ensure!(
            self.conversation(id).is_some(),
            UnknownConversationSnafu {
                stage: "select-conversation",
                conversation_id: id.clone(),
            }
        );
        self.active = Some(id.clone());
        Ok(())
    }

    /// Clears the active conversation so the next send starts a provisional one.
    pub fn start_new_conversation(&mut self) -> StoreResult<()> {
        self.ensure_idle("start-new-conversation")?;
        self.active = None;
        self.flags.clear_pending();
        Ok(())
    }

    /// Replaces canonical entries with a fresh server listing.
    ///
    /// Provisional placeholders and the in-flight target are kept at the head.
    pub fn replace_conversations(&mut self, records: Vec<ConversationRecord>) {
        let session_target = self.session_target().cloned();
        let mut retained = self
            .conversations
            .drain(..)
            .filter(|conversation| {
                conversation.id.is_provisional()
                    || Some(&conversation.id) == session_target.as_ref()
            })
            .collect::<Vec<_>>();

        let listed = records
            .into_iter()
            .map(Conversation::from)
            .filter(|conversation| !retained.iter().any(|kept| kept.id == conversation.id))
            .collect::<Vec<_>>();
        retained.extend(listed);
        self.conversations = retained;
    }

    /// Loads server history for one conversation, replacing the local copy.
    pub fn replace_messages(
        &mut self,
        id: &CanonicalId,
        records: Vec<MessageRecord>,
    ) -> StoreResult<()> {
        let conversation_id = ConversationId::Canonical(id.clone());
        ensure!(
            self.session_target() != Some(&conversation_id),
            ConversationBusySnafu {
                stage: "replace-messages",
                conversation_id,
            }
        );

        let messages = records.into_iter().map(Message::from).collect();
        self.messages.insert(conversation_id, messages);
        Ok(())
    }

    fn ensure_idle(&self, stage: &'static str) -> StoreResult<()> {
        match &self.session {
            Some(session) => SessionInFlightSnafu {
                stage,
                target: session.target.clone(),
            }
            .fail(),
            None => Ok(()),
        }
    }

    fn end_session_without_answer(&mut self, error: Option<String>) -> bool {
        let Some(session) = self.session.take() else {
            return false;
        };

        if let Some(tokens) = session.pending_context_tokens {
            tracing::debug!(tokens, "discarding held context metric");
        }
        match &error {
            Some(message) => {
                tracing::warn!(conversation_id = %session.target, error = %message, "stream session failed")
            }
            None => tracing::info!(conversation_id = %session.target, "stream session cancelled"),
        }

        self.live.clear();
        self.last_error = error;
        true
    }

    fn reconcile_identity(&mut self, from: &ConversationId, to: &CanonicalId) {
        let canonical = ConversationId::Canonical(to.clone());

        let moved = self.messages.remove(from).unwrap_or_default();
        // Hydrated history under the canonical id, if any, precedes this session's turns.
        self.messages.entry(canonical.clone()).or_default().extend(moved);

        let existing = self
            .conversations
            .iter()
            .position(|conversation| conversation.id == canonical);
        let source = self
            .conversations
            .iter()
            .position(|conversation| &conversation.id == from);

        match (source, existing) {
            (Some(index), None) => {
                self.conversations[index].id.migrate(to.clone());
            }
            (Some(index), Some(_)) => {
                self.conversations.remove(index);
            }
            (None, None) => {
                let tier = self.flags.resolve(&FlagSlot::Pending).knowledge_tier;
                self.conversations
                    .insert(0, Conversation::placeholder(canonical.clone(), tier));
            }
            (None, Some(_)) => {}
        }

        match from {
            ConversationId::Provisional(_) => {
                self.flags.migrate_pending(to);
            }
            ConversationId::Canonical(previous) => {
                self.flags.rekey(previous, to);
                if let Some(tokens) = self.context_tokens.remove(previous) {
                    self.context_tokens.insert(to.clone(), tokens);
                }
            }
        }

        if self.active.as_ref() == Some(from) {
            self.active = Some(canonical);
        }
    }

    fn retitle_from_first_message(&mut self, id: &ConversationId) {
        let first_user = self
            .messages(id)
            .iter()
            .find(|message| message.role == Role::User)
            .map(|message| title_from_first_message(&message.content));

        if let (Some(title), Some(conversation)) = (
            first_user,
            self.conversations
                .iter_mut()
                .find(|conversation| &conversation.id == id),
        ) && conversation.has_placeholder_title()
        {
            conversation.title = title;
        }
    }

    fn touch(&mut self, id: &ConversationId) {
        if let Some(conversation) = self
            .conversations
            .iter_mut()
            .find(|conversation| &conversation.id == id)
        {
            conversation.touch();
        }
    }
}
