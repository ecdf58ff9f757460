//! Resilience primitives for the orchestration layer.
//!
//! Provides the cancellable backoff executor used around every provider
//! attempt, and a request deadline built on cancellation tokens.

mod backoff;

pub use backoff::{BackoffError, BackoffExecutor, BackoffOptions};
pub use tokio_util::sync::CancellationToken;

use std::time::Duration;
use tokio::task::JoinHandle;

/// Time budget for a whole request.
///
/// Wraps a child of the caller's cancellation token that additionally fires
/// when the budget runs out. Cancelling the parent cancels the deadline too.
#[derive(Debug)]
pub struct Deadline {
    token: CancellationToken,
    timer: Option<JoinHandle<()>>,
}

impl Deadline {
    /// Creates a deadline under `parent`. Without a budget the deadline
    /// only follows the parent.
    pub fn new(parent: &CancellationToken, budget: Option<Duration>) -> Self {
        let token = parent.child_token();
        let timer = budget.map(|budget| {
            let token = token.clone();
            tokio::spawn(async move {
                tokio::time::sleep(budget).await;
                tracing::debug!(budget_ms = budget.as_millis(), "Request deadline reached");
                token.cancel();
            })
        });

        Self { token, timer }
    }

    /// Token to hand to the work bound by this deadline.
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Returns true once the deadline or the parent fired.
    pub fn is_expired(&self) -> bool {
        self.token.is_cancelled()
    }
}

impl Drop for Deadline {
    fn drop(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_deadline_fires_after_budget() {
        let parent = CancellationToken::new();
        let deadline = Deadline::new(&parent, Some(Duration::from_millis(50)));

        assert!(!deadline.is_expired());
        deadline.token().cancelled().await;
        assert!(deadline.is_expired());
        assert!(!parent.is_cancelled());
    }

    #[tokio::test]
    async fn test_deadline_follows_parent() {
        let parent = CancellationToken::new();
        let deadline = Deadline::new(&parent, None);

        parent.cancel();
        assert!(deadline.is_expired());
    }
}
