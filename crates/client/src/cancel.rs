use tokio_util::sync::CancellationToken;

/// Requests cancellation of one stream session. Cheap to clone and `Send`.
#[derive(Debug, Clone, Default)]
pub struct CancelHandle {
    token: CancellationToken,
}

impl CancelHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true if this call is the one that cancelled the session.
    pub fn cancel(&self) -> bool {
        let first = !self.token.is_cancelled();
        self.token.cancel();
        first
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub(crate) fn token(&self) -> &CancellationToken {
        &self.token
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn clones_share_one_cancellation() {
        let handle = CancelHandle::new();
        assert!(!handle.is_cancelled());

        let remote = handle.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(5)).await;
            remote.cancel();
        });

        tokio::time::timeout(Duration::from_secs(1), handle.token().cancelled())
            .await
            .expect("cancellation should be observed");
        assert!(handle.is_cancelled());
        assert!(!handle.cancel());
    }
}
