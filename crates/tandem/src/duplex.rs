//! Duplex coordinator for bidirectional streaming calls.
//!
//! The outbound and inbound halves of a channel are driven by two
//! independent contexts: the outbound one runs as its own task and paces
//! itself, the inbound one runs on the caller's task and reacts to each frame.
//! Neither waits on the other. The coordinator joins them and reports one
//! outcome: success if both finished cleanly, otherwise the first failure.
//!
//! When one side fails the other is stopped at its next blocking point, so
//! nothing is left waiting on a peer that has already given up.

use std::sync::{Arc, OnceLock};
use std::time::Duration;

use tracing::debug;

use crate::channel::{Receiver, Sender};
use crate::context::CallContext;
use crate::status::Status;

/// Frame counts of a finished duplex exchange.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Exchange {
    /// Frames delivered on the outbound half.
    pub sent: usize,
    /// Frames received on the inbound half.
    pub received: usize,
}

/// Drive both halves of a duplex channel to completion.
///
/// The outbound context sends `outbound` in order, sleeping `pacing` between
/// frames, then closes its half exactly once. The inbound context passes
/// every received frame to `reaction` until the far end ends its half. An
/// error from `reaction` fails the exchange.
///
/// Returns once both contexts have terminated.
pub async fn run<Out, In, I, R>(
    sender: Sender<Out>,
    mut receiver: Receiver<In>,
    outbound: I,
    pacing: Option<Duration>,
    mut reaction: R,
) -> Result<Exchange, Status>
where
    Out: Send + 'static,
    I: IntoIterator<Item = Out>,
    I::IntoIter: Send + 'static,
    R: FnMut(In) -> Result<(), Status>,
{
    let stop = receiver.context().child();
    let failure = Arc::new(OnceLock::new());

    let outbound = tokio::spawn(send_side(
        sender,
        outbound.into_iter(),
        pacing,
        stop.clone(),
        Arc::clone(&failure),
    ));

    let inbound = async {
        let mut received = 0;
        let result = loop {
            let next = tokio::select! {
                biased;
                status = stop.done() => Err(status),
                next = receiver.message() => next,
            };
            match next {
                Ok(Some(frame)) => {
                    received += 1;
                    if let Err(status) = reaction(frame) {
                        break Err(status);
                    }
                }
                Ok(None) => break Ok(received),
                Err(status) => break Err(status),
            }
        };
        if let Err(status) = &result {
            record(&failure, &stop, status.clone());
        }
        result
    };

    let (sent, received) = tokio::join!(outbound, inbound);
    let sent = sent.map_err(Status::from).and_then(|sent| sent);
    if let Err(status) = &sent {
        record(&failure, &stop, status.clone());
    }
    drop(receiver);

    match failure.get() {
        Some(status) => {
            debug!(code = %status.code(), "duplex exchange failed");
            Err(status.clone())
        }
        None => {
            let exchange = Exchange {
                sent: sent?,
                received: received?,
            };
            debug!(sent = exchange.sent, received = exchange.received, "duplex exchange complete");
            Ok(exchange)
        }
    }
}

async fn send_side<T, I>(
    mut sender: Sender<T>,
    items: I,
    pacing: Option<Duration>,
    stop: CallContext,
    failure: Arc<OnceLock<Status>>,
) -> Result<usize, Status>
where
    I: Iterator<Item = T>,
{
    let result = tokio::select! {
        biased;
        status = stop.done() => Err(status),
        sent = sender.send_all(items, pacing) => sent,
    };
    match result {
        Ok(sent) => {
            tokio::select! {
                biased;
                _ = stop.done() => {}
                () = sender.close() => {}
            }
            Ok(sent)
        }
        Err(status) => {
            record(&failure, &stop, status.clone());
            Err(status)
        }
    }
}

fn record(failure: &OnceLock<Status>, stop: &CallContext, status: Status) {
    if failure.set(status).is_ok() {
        stop.cancel();
    }
}
