//! Cooperative cancellation for workflow runs.
//!
//! A [`CancellationTokenSource`] owns the cancel switch; any number of
//! [`CancellationToken`] clones observe it. Tool calls receive a token and
//! are raced against it by the executor, so a cancelled run stops waiting
//! on in-flight I/O even if the tool itself never checks.
//!
//! # Example
//!
//! ```ignore
//! use waypoint_agent::workflow::CancellationTokenSource;
//!
//! let source = CancellationTokenSource::new();
//! let token = source.token();
//!
//! tokio::spawn(async move {
//!     tokio::select! {
//!         _ = token.cancelled() => { /* stop */ }
//!         _ = do_work() => {}
//!     }
//! });
//!
//! source.cancel();
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::Notify;

#[derive(Debug, Default)]
struct TokenState {
    cancelled: AtomicBool,
    notify: Notify,
}

/// Thread-safe cancellation token.
///
/// Cloning a token creates a new reference to the same cancellation state.
#[derive(Clone, Debug)]
pub struct CancellationToken {
    state: Arc<TokenState>,
}

impl CancellationToken {
    fn new() -> Self {
        Self {
            state: Arc::new(TokenState::default()),
        }
    }

    /// A token that is never cancelled.
    pub fn none() -> Self {
        Self::new()
    }

    /// Returns true if the token has been cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.state.cancelled.load(Ordering::SeqCst)
    }

    /// Completes once the token is cancelled.
    ///
    /// Returns immediately if cancellation already happened.
    pub async fn cancelled(&self) {
        loop {
            let notified = self.state.notify.notified();
            tokio::pin!(notified);
            // Register before checking the flag so a concurrent cancel is not missed
            notified.as_mut().enable();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }
}

/// Owner of a cancellation token.
///
/// Cloning a source creates a new handle to the same underlying token.
#[derive(Clone, Debug)]
pub struct CancellationTokenSource {
    token: CancellationToken,
}

impl CancellationTokenSource {
    pub fn new() -> Self {
        Self {
            token: CancellationToken::new(),
        }
    }

    /// Returns a token observing this source.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Cancels the token and wakes every waiter. Idempotent.
    pub fn cancel(&self) {
        self.token.state.cancelled.store(true, Ordering::SeqCst);
        self.token.state.notify.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

impl Default for CancellationTokenSource {
    fn default() -> Self {
        Self::new()
    }
}
