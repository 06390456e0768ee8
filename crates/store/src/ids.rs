use std::fmt;

use uuid::Uuid;

// Locally minted ids are v7 uuids: time-ordered and never reissued.
macro_rules! define_local_id {
    ($name:ident) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(Uuid);

        impl $name {
            pub fn new_v7() -> Self {
                Self(Uuid::now_v7())
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
                fmt::Display::fmt(&self.0, formatter)
            }
        }
    };
}

define_local_id!(ProvisionalId);
define_local_id!(MessageId);

/// Server-assigned, permanent conversation identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CanonicalId(String);

impl CanonicalId {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CanonicalId {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(&self.0)
    }
}

impl From<&str> for CanonicalId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for CanonicalId {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

/// Identity of a conversation as currently known to the client.
///
/// A `Provisional` id is fabricated locally before the first completion and is
/// retired by [`ConversationId::migrate`] once the service reveals the canonical id.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ConversationId {
    Provisional(ProvisionalId),
    Canonical(CanonicalId),
}

impl ConversationId {
    pub fn fresh_provisional() -> Self {
        Self::Provisional(ProvisionalId::new_v7())
    }

    pub fn canonical(raw: impl Into<String>) -> Self {
        Self::Canonical(CanonicalId::new(raw))
    }

    pub fn is_provisional(&self) -> bool {
        matches!(self, Self::Provisional(_))
    }

    pub fn as_canonical(&self) -> Option<&CanonicalId> {
        match self {
            Self::Canonical(id) => Some(id),
            Self::Provisional(_) => None,
        }
    }

    /// Replaces this identity with the canonical one, returning the retired
    /// provisional id if there was one.
    pub fn migrate(&mut self, canonical: CanonicalId) -> Option<ProvisionalId> {
        match std::mem::replace(self, Self::Canonical(canonical)) {
            Self::Provisional(retired) => Some(retired),
            Self::Canonical(_) => None,
        }
    }
}

impl fmt::Display for ConversationId {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Provisional(id) => write!(formatter, "provisional:{id}"),
            Self::Canonical(id) => write!(formatter, "{id}"),
        }
    }
}

impl From<CanonicalId> for ConversationId {
    fn from(value: CanonicalId) -> Self {
        Self::Canonical(value)
    }
}

impl From<ProvisionalId> for ConversationId {
    fn from(value: ProvisionalId) -> Self {
        Self::Provisional(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn migrate_retires_provisional_identity() {
        let mut id = ConversationId::fresh_provisional();
        let ConversationId::Provisional(original) = id.clone() else {
            panic!("fresh id must be provisional");
        };

        let retired = id.migrate(CanonicalId::new("conv_42"));

        assert_eq!(retired, Some(original));
        assert_eq!(id, ConversationId::canonical("conv_42"));
        assert_eq!(id.migrate(CanonicalId::new("conv_43")), None);
    }

    #[test]
    fn provisional_ids_are_never_reissued() {
        let first = ProvisionalId::new_v7();
        let second = ProvisionalId::new_v7();
        assert_ne!(first, second);
    }

    #[test]
    fn provisional_ids_display_with_a_marker() {
        let id = ConversationId::fresh_provisional();
        assert!(id.to_string().starts_with("provisional:"));
        assert_eq!(ConversationId::canonical("conv_7").to_string(), "conv_7");
    }
}
