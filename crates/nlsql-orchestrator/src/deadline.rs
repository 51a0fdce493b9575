//! Cancellable deadlines for proxy and model round trips

use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Why a guarded future did not finish.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interrupted {
    Expired,
    Cancelled,
}

/// A time budget plus a cancellation token. The guarded future is dropped on
/// expiry or cancellation, which aborts any in-flight HTTP request it owns.
#[derive(Debug, Clone)]
pub struct Deadline {
    budget: Duration,
    token: CancellationToken,
}

impl Deadline {
    pub fn after(budget: Duration) -> Self {
        Self { budget, token: CancellationToken::new() }
    }

    pub fn with_token(budget: Duration, token: CancellationToken) -> Self {
        Self { budget, token }
    }

    pub fn budget(&self) -> Duration {
        self.budget
    }

    pub fn budget_ms(&self) -> u64 {
        self.budget.as_millis() as u64
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub async fn run<F>(&self, fut: F) -> Result<F::Output, Interrupted>
    where
        F: Future,
    {
        tokio::select! {
            biased;
            _ = self.token.cancelled() => Err(Interrupted::Cancelled),
            _ = tokio::time::sleep(self.budget) => Err(Interrupted::Expired),
            out = fut => Ok(out),
        }
    }
}
