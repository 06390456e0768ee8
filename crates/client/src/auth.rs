use std::sync::Arc;

use arc_swap::ArcSwapOption;

/// Credentials collaborator. The client never issues tokens itself.
pub trait AuthSession: Send + Sync {
    fn bearer_token(&self) -> Option<String>;

    /// Drops the current credentials after the service has rejected them.
    fn logout(&self);
}

/// In-memory bearer token holder.
#[derive(Debug, Default)]
pub struct TokenStore {
    token: ArcSwapOption<String>,
}

impl TokenStore {
    pub fn new(token: Option<String>) -> Self {
        let token = token
            .map(|token| token.trim().to_string())
            .filter(|token| !token.is_empty());
        Self {
            token: ArcSwapOption::from(token.map(Arc::new)),
        }
    }

    pub fn set_token(&self, token: impl Into<String>) {
        self.token.store(Some(Arc::new(token.into())));
    }

    pub fn is_logged_in(&self) -> bool {
        self.token.load().is_some()
    }
}

impl AuthSession for TokenStore {
    fn bearer_token(&self) -> Option<String> {
        self.token.load_full().map(|token| token.as_ref().clone())
    }

    fn logout(&self) {
        if self.token.swap(None).is_some() {
            tracing::info!("credentials rejected by chat service; logged out");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn logout_clears_token() {
        let store = TokenStore::new(Some(" secret ".to_string()));
        assert_eq!(store.bearer_token().as_deref(), Some("secret"));

        store.logout();
        assert!(!store.is_logged_in());
        assert_eq!(store.bearer_token(), None);
    }

    #[test]
    fn blank_token_means_logged_out() {
        let store = TokenStore::new(Some("  ".to_string()));
        assert!(!store.is_logged_in());

        store.set_token("fresh");
        assert_eq!(store.bearer_token().as_deref(), Some("fresh"));
    }
}
