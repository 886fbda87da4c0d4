use std::time::Duration;

use tokio_util::sync::CancellationToken;

/// Explicit cancellation-plus-deadline handle threaded through every I/O-bearing call.
///
/// Replaces the "context object" that every call takes just to carry a cancellation
/// signal: here it's a plain value you can clone, derive a child from, or wrap with a
/// bounded timeout.
#[derive(Clone)]
pub struct Ctx {
    token: CancellationToken,
}

impl Ctx {
    pub fn background() -> Self {
        Self {
            token: CancellationToken::new(),
        }
    }

    /// A child context: cancelling it does not cancel `self`, but cancelling `self`
    /// cancels it too.
    pub fn child(&self) -> Self {
        Self {
            token: self.token.child_token(),
        }
    }

    /// A context unrelated to `self`'s cancellation, cancelled automatically after
    /// `timeout`. Used for compensation, which must run even if the context that
    /// triggered the rollback is already cancelled.
    pub fn fresh_with_timeout(timeout: Duration) -> Self {
        let token = CancellationToken::new();
        let guard = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            guard.cancel();
        });
        Self { token }
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub async fn cancelled(&self) {
        self.token.cancelled().await;
    }
}

impl Default for Ctx {
    fn default() -> Self {
        Self::background()
    }
}
