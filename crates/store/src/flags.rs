use std::collections::HashMap;

use athena_protocol::KnowledgeTier;

use super::ids::CanonicalId;

/// Per-conversation request settings chosen by the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ConversationFlags {
    pub search_all: bool,
    pub knowledge_tier: KnowledgeTier,
}

/// Where a flag value lives.
///
/// Until a conversation has a canonical id its settings sit in the single `Pending`
/// slot rather than under the provisional id.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FlagSlot {
    Pending,
    Conversation(CanonicalId),
}

#[derive(Debug, Clone, Default)]
pub struct FlagTable {
    pending: Option<ConversationFlags>,
    by_conversation: HashMap<CanonicalId, ConversationFlags>,
}

impl FlagTable {
    /// Returns the stored value, if the slot has been written.
    pub fn get(&self, slot: &FlagSlot) -> Option<ConversationFlags> {
        match slot {
            FlagSlot::Pending => self.pending,
            FlagSlot::Conversation(id) => self.by_conversation.get(id).copied(),
        }
    }

    /// Returns the stored value or the defaults.
    pub fn resolve(&self, slot: &FlagSlot) -> ConversationFlags {
        self.get(slot).unwrap_or_default()
    }

    pub fn set(&mut self, slot: FlagSlot, flags: ConversationFlags) {
        match slot {
            FlagSlot::Pending => self.pending = Some(flags),
            FlagSlot::Conversation(id) => {
                self.by_conversation.insert(id, flags);
            }
        }
    }

    pub fn update(&mut self, slot: FlagSlot, apply: impl FnOnce(&mut ConversationFlags)) {
        let mut flags = self.resolve(&slot);
        apply(&mut flags);
        self.set(slot, flags);
    }

    pub fn clear_pending(&mut self) {
        self.pending = None;
    }

    /// Moves the pending slot under `to`, leaving the pending slot empty.
    ///
    /// Returns false when nothing was pending; a second call is therefore a no-op.
    pub fn migrate_pending(&mut self, to: &CanonicalId) -> bool {
        match self.pending.take() {
            Some(flags) => {
                self.by_conversation.insert(to.clone(), flags);
                true
            }
            None => false,
        }
    }

    /// Re-keys one conversation's flags, used when the service swaps a canonical id.
    pub fn rekey(&mut self, from: &CanonicalId, to: &CanonicalId) {
        if let Some(flags) = self.by_conversation.remove(from) {
            self.by_conversation.insert(to.clone(), flags);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pending_flags_migrate_exactly_once() {
        let mut table = FlagTable::default();
        table.update(FlagSlot::Pending, |flags| flags.search_all = true);

        let canonical = CanonicalId::new("conv_42");
        assert!(table.migrate_pending(&canonical));

        assert_eq!(table.get(&FlagSlot::Pending), None);
        assert_eq!(
            table.get(&FlagSlot::Conversation(canonical.clone())),
            Some(ConversationFlags {
                search_all: true,
                knowledge_tier: KnowledgeTier::Ephemeral,
            })
        );
        assert!(!table.migrate_pending(&canonical));
    }

    #[test]
    fn unset_slots_resolve_to_defaults() {
        let table = FlagTable::default();
        assert_eq!(
            table.resolve(&FlagSlot::Conversation(CanonicalId::new("conv_1"))),
            ConversationFlags::default()
        );
    }
}
