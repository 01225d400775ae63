//! Per-call cancellation and deadline state.

use std::fmt;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::status::Status;

/// Cancellation and deadline state shared by everything taking part in one
/// call: both ends of its channel, the handler, and the caller.
///
/// Cancellation is idempotent and the first reason recorded wins, so a call
/// that is both cancelled and timed out reports exactly one of the two.
#[derive(Clone)]
pub struct CallContext {
    token: CancellationToken,
    reason: Arc<OnceLock<Status>>,
    parent_reason: Option<Arc<OnceLock<Status>>>,
    deadline: Option<Instant>,
}

impl fmt::Debug for CallContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallContext")
            .field("cancelled", &self.token.is_cancelled())
            .field("deadline", &self.deadline)
            .finish_non_exhaustive()
    }
}

impl Default for CallContext {
    fn default() -> Self {
        Self::new()
    }
}

impl CallContext {
    /// A context with no deadline.
    pub fn new() -> Self {
        Self {
            token: CancellationToken::new(),
            reason: Arc::new(OnceLock::new()),
            parent_reason: None,
            deadline: None,
        }
    }

    /// A context whose deadline is `timeout` from now.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self::with_deadline(Instant::now() + timeout)
    }

    /// A context that expires at `deadline`.
    pub fn with_deadline(deadline: Instant) -> Self {
        Self {
            deadline: Some(deadline),
            ..Self::new()
        }
    }

    /// A context that is cancelled whenever `self` is, but can also be
    /// cancelled on its own without affecting `self`.
    pub fn child(&self) -> Self {
        Self {
            token: self.token.child_token(),
            reason: Arc::new(OnceLock::new()),
            parent_reason: Some(Arc::clone(&self.reason)),
            deadline: self.deadline,
        }
    }

    /// The instant at which the call expires, if any.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Time left before the deadline. `None` if the call has no deadline.
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }

    /// Cancel the call.
    ///
    /// Returns `true` if this cancellation decided the call's fate, `false`
    /// if the call had already been cancelled or had expired.
    pub fn cancel(&self) -> bool {
        self.cancel_with(Status::cancelled("call was cancelled"))
    }

    /// Mark the call as having run out of time.
    pub(crate) fn expire(&self) -> bool {
        self.cancel_with(Status::deadline_exceeded("deadline exceeded"))
    }

    fn cancel_with(&self, status: Status) -> bool {
        let won = self.reason.set(status).is_ok();
        self.token.cancel();
        won
    }

    /// Whether the call has been cancelled or its deadline has passed.
    pub fn is_cancelled(&self) -> bool {
        if !self.token.is_cancelled()
            && self
                .deadline
                .is_some_and(|deadline| Instant::now() >= deadline)
        {
            self.expire();
        }
        self.token.is_cancelled()
    }

    /// `Err` with the cancellation status if the call should stop.
    pub fn check(&self) -> Result<(), Status> {
        if self.is_cancelled() {
            Err(self.cancellation_status())
        } else {
            Ok(())
        }
    }

    /// Wait until the call is cancelled or expires, returning the status
    /// that describes why.
    pub async fn done(&self) -> Status {
        match self.deadline {
            Some(deadline) => {
                tokio::select! {
                    biased;
                    () = self.token.cancelled() => {}
                    () = tokio::time::sleep_until(deadline) => {
                        self.expire();
                    }
                }
            }
            None => self.token.cancelled().await,
        }
        self.cancellation_status()
    }

    /// Sleep for `duration`, waking early with an error if the call is
    /// cancelled or expires in the meantime.
    pub async fn sleep(&self, duration: Duration) -> Result<(), Status> {
        tokio::select! {
            biased;
            status = self.done() => Err(status),
            () = tokio::time::sleep(duration) => Ok(()),
        }
    }

    /// The status a cancelled call should report.
    ///
    /// A parent's reason takes precedence: a child cancelled because its
    /// parent timed out reports the timeout.
    pub fn cancellation_status(&self) -> Status {
        self.parent_reason
            .as_ref()
            .and_then(|reason| reason.get())
            .or_else(|| self.reason.get())
            .cloned()
            .unwrap_or_else(|| Status::cancelled("call was cancelled"))
    }
}

/// Cancels a call when dropped.
///
/// Callers that walk away from a call (drop its future or stream) cancel it,
/// which lets the far end unwind. Dropping after the call finished is a
/// no-op as far as the outcome is concerned.
#[derive(Debug)]
pub(crate) struct CancelOnDrop(pub(crate) CallContext);

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        self.0.cancel();
    }
}
