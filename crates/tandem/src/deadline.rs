//! Deadline guard for in-flight calls.
//!
//! The guard races the call against a timer. Whichever finishes first
//! decides the outcome; the loser is dropped. When the timer wins the call's
//! context is cancelled with `DeadlineExceeded`, so work still running on
//! the far end unwinds at its next blocking point instead of producing a
//! late outcome.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tracing::debug;

use crate::context::CallContext;
use crate::status::Status;

/// Run `call` for at most `timeout`.
///
/// If `call` finishes first its outcome is returned unchanged. Otherwise
/// `ctx` is cancelled and the result is `DeadlineExceeded`, whatever the
/// callee does afterwards.
pub async fn guard<F, T>(ctx: &CallContext, timeout: Duration, call: F) -> Result<T, Status>
where
    F: Future<Output = Result<T, Status>>,
{
    race(ctx, Instant::now() + timeout, call).await
}

/// Run `call` until the deadline carried by `ctx`, if it has one.
pub async fn enforce<F, T>(ctx: &CallContext, call: F) -> Result<T, Status>
where
    F: Future<Output = Result<T, Status>>,
{
    match ctx.deadline() {
        Some(deadline) => race(ctx, deadline, call).await,
        None => call.await,
    }
}

async fn race<F, T>(ctx: &CallContext, deadline: Instant, call: F) -> Result<T, Status>
where
    F: Future<Output = Result<T, Status>>,
{
    let started = Instant::now();
    tokio::select! {
        biased;
        outcome = call => outcome,
        () = tokio::time::sleep_until(deadline) => {
            ctx.expire();
            let elapsed = started.elapsed();
            debug!(?elapsed, "deadline exceeded, cancelling call");
            Err(Status::deadline_exceeded(format!(
                "deadline exceeded after {elapsed:?}"
            )))
        }
    }
}
