//! In-process duplex channel carrying one call's frames.
//!
//! A channel is two independent half-streams: the request half (caller to
//! handler) and the response half (handler to caller). Each half is a
//! bounded, order-preserving queue of frames terminated by a trailer that
//! says whether the sender finished cleanly or with a [`Status`].
//!
//! ```text
//! Caller                                      Handler
//! │  Sender<Req>  ── Message, Message, End ──> Receiver<Req>  │
//! │  Receiver<Resp> <── Message, End(status) ── Sender<Resp>  │
//! ```
//!
//! A half is CLOSED once its receiver has observed the trailer or been
//! dropped. A sender that disappears without a trailer looks like a
//! cancellation to the receiver.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tracing::debug;

use crate::context::CallContext;
use crate::status::Status;

/// Which half of a channel a frame travels on.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Caller to handler.
    Request,
    /// Handler to caller.
    Response,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Request => f.write_str("request"),
            Direction::Response => f.write_str("response"),
        }
    }
}

/// State of one half-stream. A closed half never re-opens.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HalfState {
    /// Frames may still arrive.
    Open,
    /// No further frame will be observed.
    Closed,
}

/// State of both halves of a channel.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChannelState {
    /// The caller-to-handler half.
    pub request: HalfState,
    /// The handler-to-caller half.
    pub response: HalfState,
}

impl ChannelState {
    fn open() -> Self {
        Self {
            request: HalfState::Open,
            response: HalfState::Open,
        }
    }

    /// State of the half travelling in `direction`.
    pub fn half(&self, direction: Direction) -> HalfState {
        match direction {
            Direction::Request => self.request,
            Direction::Response => self.response,
        }
    }

    /// A channel is closed only when both halves are.
    pub fn is_closed(&self) -> bool {
        self.request == HalfState::Closed && self.response == HalfState::Closed
    }

    fn close(&mut self, direction: Direction) -> bool {
        let half = match direction {
            Direction::Request => &mut self.request,
            Direction::Response => &mut self.response,
        };
        let changed = *half == HalfState::Open;
        *half = HalfState::Closed;
        changed
    }
}

/// Read-only view of a channel's state, usable after the call is gone.
#[derive(Clone, Debug)]
pub struct ChannelMonitor {
    rx: watch::Receiver<ChannelState>,
}

impl ChannelMonitor {
    /// Current state of both halves.
    pub fn state(&self) -> ChannelState {
        *self.rx.borrow()
    }

    /// Whether both halves are closed.
    pub fn is_closed(&self) -> bool {
        self.state().is_closed()
    }

    /// Wait until both halves are closed.
    pub async fn closed(&self) {
        let mut rx = self.rx.clone();
        // Every half-end marks its half closed on drop, so the sender only
        // goes away after the state has become closed.
        let _ = rx.wait_for(ChannelState::is_closed).await;
    }
}

#[derive(Clone)]
struct HalfTracker {
    direction: Direction,
    state: Arc<watch::Sender<ChannelState>>,
}

impl HalfTracker {
    fn close(&self) {
        let direction = self.direction;
        self.state.send_if_modified(|state| state.close(direction));
    }
}

/// A unit on the wire: a frame, or the trailer that ends the half.
enum Item<T> {
    Message(T),
    End(Result<(), Status>),
}

/// Sending end of a half-stream.
///
/// Sending observes the call's cancellation and deadline. Closing is
/// idempotent: only the first [`close`](Sender::close) or
/// [`fail`](Sender::fail) emits a trailer.
pub struct Sender<T> {
    tx: Option<mpsc::Sender<Item<T>>>,
    ctx: CallContext,
    direction: Direction,
}

impl<T> fmt::Debug for Sender<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Sender")
            .field("direction", &self.direction)
            .field("closed", &self.tx.is_none())
            .finish_non_exhaustive()
    }
}

impl<T> Sender<T> {
    /// Send one frame.
    ///
    /// Fails with the call's status if it was cancelled or expired, with
    /// `Cancelled` if the receiving end has gone away, and with `Internal`
    /// if this half was already closed. When the far end has gone away the
    /// call's real outcome is whatever the other half reports.
    pub async fn send(&self, message: T) -> Result<(), Status> {
        let Some(tx) = &self.tx else {
            return Err(Status::internal(format!(
                "{} half already closed",
                self.direction
            )));
        };
        tokio::select! {
            biased;
            status = self.ctx.done() => Err(status),
            sent = tx.send(Item::Message(message)) => {
                sent.map_err(|_| Status::cancelled(format!("{} receiver went away", self.direction)))
            }
        }
    }

    /// Send every item in order, sleeping `pacing` between sends.
    ///
    /// Stops early without error if the receiving end goes away, returning
    /// how many frames were delivered. Does not close the half.
    pub async fn send_all<I>(&self, items: I, pacing: Option<Duration>) -> Result<usize, Status>
    where
        I: IntoIterator<Item = T>,
    {
        let mut sent = 0;
        for item in items {
            if sent > 0
                && let Some(pacing) = pacing
            {
                self.ctx.sleep(pacing).await?;
            }
            match self.send(item).await {
                Ok(()) => sent += 1,
                Err(_) if self.peer_gone() => {
                    debug!(direction = %self.direction, sent, "receiver went away, stopping");
                    break;
                }
                Err(status) => return Err(status),
            }
        }
        Ok(sent)
    }

    /// End the half cleanly. Later calls do nothing.
    pub async fn close(&mut self) {
        self.finish(Ok(())).await;
    }

    /// End the half with a failure trailer. Ignored if already closed.
    pub async fn fail(&mut self, status: Status) {
        self.finish(Err(status)).await;
    }

    async fn finish(&mut self, outcome: Result<(), Status>) {
        let Some(tx) = self.tx.take() else {
            return;
        };
        // The trailer is best-effort: if the call is gone or the receiver
        // has left, dropping `tx` is the signal.
        tokio::select! {
            biased;
            _ = self.ctx.done() => {}
            sent = tx.send(Item::End(outcome)) => {
                if sent.is_err() {
                    debug!(direction = %self.direction, "receiver gone before trailer");
                }
            }
        }
    }

    /// Whether this half has been closed by this sender.
    pub fn is_closed(&self) -> bool {
        self.tx.is_none()
    }

    /// Whether the receiving end is gone, so nothing sent will be seen.
    pub fn peer_gone(&self) -> bool {
        !self.ctx.is_cancelled() && self.tx.as_ref().is_none_or(|tx| tx.is_closed())
    }

    /// A handle that can send frames but never closes the half.
    pub fn sink(&self) -> Option<Sink<T>> {
        self.tx.as_ref().map(|tx| Sink {
            tx: tx.clone(),
            ctx: self.ctx.clone(),
            direction: self.direction,
        })
    }

    /// The call this half belongs to.
    pub fn context(&self) -> &CallContext {
        &self.ctx
    }
}

/// A send-only handle onto a half-stream.
///
/// Handlers get a `Sink` rather than the [`Sender`] so that the trailer is
/// always written by the call machinery, exactly once, after the handler
/// returns.
pub struct Sink<T> {
    tx: mpsc::Sender<Item<T>>,
    ctx: CallContext,
    direction: Direction,
}

impl<T> Clone for Sink<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            ctx: self.ctx.clone(),
            direction: self.direction,
        }
    }
}

impl<T> fmt::Debug for Sink<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Sink")
            .field("direction", &self.direction)
            .finish_non_exhaustive()
    }
}

impl<T> Sink<T> {
    /// Send one frame. Same failure modes as [`Sender::send`].
    pub async fn send(&self, message: T) -> Result<(), Status> {
        tokio::select! {
            biased;
            status = self.ctx.done() => Err(status),
            sent = self.tx.send(Item::Message(message)) => {
                sent.map_err(|_| Status::cancelled(format!("{} receiver went away", self.direction)))
            }
        }
    }

    /// The call this half belongs to.
    pub fn context(&self) -> &CallContext {
        &self.ctx
    }
}

/// Receiving end of a half-stream.
pub struct Receiver<T> {
    rx: mpsc::Receiver<Item<T>>,
    ctx: CallContext,
    tracker: HalfTracker,
    done: bool,
}

impl<T> fmt::Debug for Receiver<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Receiver")
            .field("direction", &self.tracker.direction)
            .field("done", &self.done)
            .finish_non_exhaustive()
    }
}

impl<T> Receiver<T> {
    /// Receive the next frame.
    ///
    /// - `Ok(Some(frame))`: a frame, in send order.
    /// - `Ok(None)`: the sender finished cleanly.
    /// - `Err(status)`: the sender failed, went away, or the call was
    ///   cancelled or expired.
    ///
    /// The terminal result is reported once; afterwards the half is closed
    /// and every call returns `Ok(None)`.
    pub async fn message(&mut self) -> Result<Option<T>, Status> {
        if self.done {
            return Ok(None);
        }
        let item = tokio::select! {
            biased;
            status = self.ctx.done() => {
                self.finish();
                return Err(status);
            }
            item = self.rx.recv() => item,
        };
        match item {
            Some(Item::Message(message)) => Ok(Some(message)),
            Some(Item::End(Ok(()))) => {
                self.finish();
                Ok(None)
            }
            Some(Item::End(Err(status))) => {
                self.finish();
                Err(status)
            }
            None => {
                self.finish();
                Err(Status::cancelled(format!(
                    "{} sender went away before ending the stream",
                    self.tracker.direction
                )))
            }
        }
    }

    /// Whether this half has reported its terminal result.
    pub fn is_closed(&self) -> bool {
        self.done
    }

    /// The call this half belongs to.
    pub fn context(&self) -> &CallContext {
        &self.ctx
    }

    fn finish(&mut self) {
        self.done = true;
        self.rx.close();
        self.tracker.close();
    }
}

impl<T> Drop for Receiver<T> {
    fn drop(&mut self) {
        self.tracker.close();
    }
}

/// The caller's side of a channel.
#[derive(Debug)]
pub struct ClientEnd<Req, Resp> {
    /// Frames to the handler.
    pub requests: Sender<Req>,
    /// Frames from the handler.
    pub responses: Receiver<Resp>,
}

/// The handler's side of a channel.
#[derive(Debug)]
pub struct ServerEnd<Req, Resp> {
    /// Frames from the caller.
    pub requests: Receiver<Req>,
    /// Frames to the caller.
    pub responses: Sender<Resp>,
}

/// Open a channel for one call.
///
/// Both ends share `ctx`, so cancelling the call is observed at every
/// blocking point on either side.
pub fn open<Req, Resp>(
    ctx: &CallContext,
    capacity: usize,
) -> (ClientEnd<Req, Resp>, ServerEnd<Req, Resp>, ChannelMonitor) {
    let capacity = capacity.max(1);
    let (state_tx, state_rx) = watch::channel(ChannelState::open());
    let state = Arc::new(state_tx);

    let (req_tx, req_rx) = mpsc::channel(capacity);
    let (resp_tx, resp_rx) = mpsc::channel(capacity);

    let client = ClientEnd {
        requests: Sender {
            tx: Some(req_tx),
            ctx: ctx.clone(),
            direction: Direction::Request,
        },
        responses: Receiver {
            rx: resp_rx,
            ctx: ctx.clone(),
            tracker: HalfTracker {
                direction: Direction::Response,
                state: Arc::clone(&state),
            },
            done: false,
        },
    };
    let server = ServerEnd {
        requests: Receiver {
            rx: req_rx,
            ctx: ctx.clone(),
            tracker: HalfTracker {
                direction: Direction::Request,
                state,
            },
            done: false,
        },
        responses: Sender {
            tx: Some(resp_tx),
            ctx: ctx.clone(),
            direction: Direction::Response,
        },
    };

    (client, server, ChannelMonitor { rx: state_rx })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::status::Code;

    fn pair() -> (ClientEnd<u32, u32>, ServerEnd<u32, u32>, ChannelMonitor) {
        open(&CallContext::new(), 8)
    }

    // ==================== Ordering ====================

    #[tokio::test]
    async fn test_frames_arrive_in_send_order() {
        let (mut client, mut server, _monitor) = pair();

        for n in 0..5 {
            client.requests.send(n).await.unwrap();
        }
        client.requests.close().await;

        let mut seen = Vec::new();
        while let Some(n) = server.requests.message().await.unwrap() {
            seen.push(n);
        }
        assert_eq!(seen, vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn test_halves_are_independent() {
        let (mut client, mut server, monitor) = pair();

        server.responses.send(7).await.unwrap();
        server.responses.close().await;
        assert_eq!(client.responses.message().await.unwrap(), Some(7));
        assert_eq!(client.responses.message().await.unwrap(), None);

        let state = monitor.state();
        assert_eq!(state.half(Direction::Response), HalfState::Closed);
        assert_eq!(state.half(Direction::Request), HalfState::Open);
        assert!(!state.is_closed());

        client.requests.send(1).await.unwrap();
        assert_eq!(server.requests.message().await.unwrap(), Some(1));
        assert_eq!(monitor.state().half(Direction::Request), HalfState::Open);
    }

    // ==================== Half-close ====================

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let (mut client, mut server, _monitor) = pair();

        client.requests.send(1).await.unwrap();
        client.requests.close().await;
        client.requests.close().await;

        assert_eq!(server.requests.message().await.unwrap(), Some(1));
        assert_eq!(server.requests.message().await.unwrap(), None);
        assert_eq!(server.requests.message().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_send_after_close_is_internal() {
        let (mut client, _server, _monitor) = pair();

        client.requests.close().await;
        let err = client.requests.send(1).await.unwrap_err();
        assert_eq!(err.code(), Code::Internal);
        assert!(client.requests.is_closed());
    }

    #[tokio::test]
    async fn test_failure_trailer_is_distinct_from_clean_end() {
        let (mut client, mut server, _monitor) = pair();

        server.responses.send(1).await.unwrap();
        server
            .responses
            .fail(Status::invalid_argument("bad input"))
            .await;

        assert_eq!(client.responses.message().await.unwrap(), Some(1));
        let err = client.responses.message().await.unwrap_err();
        assert_eq!(err.code(), Code::InvalidArgument);
        assert_eq!(err.message(), "bad input");
        // Terminal result is reported once.
        assert_eq!(client.responses.message().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_fail_after_close_is_ignored() {
        let (mut client, mut server, _monitor) = pair();

        server.responses.close().await;
        server.responses.fail(Status::internal("late")).await;

        assert_eq!(client.responses.message().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_dropped_sender_reads_as_cancelled() {
        let (client, mut server, _monitor) = pair();

        drop(client);
        let err = server.requests.message().await.unwrap_err();
        assert_eq!(err.code(), Code::Cancelled);
    }

    #[tokio::test]
    async fn test_no_frame_after_closed() {
        let (mut client, mut server, _monitor) = pair();

        server.responses.close().await;
        assert_eq!(client.responses.message().await.unwrap(), None);

        // A sink cloned earlier cannot smuggle frames past the trailer.
        let (mut client2, server2, _monitor2) = pair();
        let sink = server2.responses.sink().unwrap();
        let mut responses = server2.responses;
        responses.close().await;
        let _ = sink.send(9).await;
        assert_eq!(client2.responses.message().await.unwrap(), None);
        assert_eq!(client2.responses.message().await.unwrap(), None);
    }

    // ==================== Cancellation ====================

    #[tokio::test]
    async fn test_receive_observes_cancellation() {
        let ctx = CallContext::new();
        let (mut client, _server, _monitor) = open::<u32, u32>(&ctx, 4);

        let canceller = ctx.clone();
        tokio::spawn(async move {
            tokio::task::yield_now().await;
            canceller.cancel();
        });

        let err = client.responses.message().await.unwrap_err();
        assert_eq!(err.code(), Code::Cancelled);
        assert!(client.responses.is_closed());
    }

    #[tokio::test]
    async fn test_send_observes_cancellation_under_backpressure() {
        let ctx = CallContext::new();
        let (client, _server, _monitor) = open::<u32, u32>(&ctx, 1);

        client.requests.send(1).await.unwrap();
        let canceller = ctx.clone();
        tokio::spawn(async move {
            tokio::task::yield_now().await;
            canceller.cancel();
        });

        // Buffer is full and nobody reads: only cancellation can unblock.
        let err = client.requests.send(2).await.unwrap_err();
        assert_eq!(err.code(), Code::Cancelled);
    }

    #[tokio::test(start_paused = true)]
    async fn test_receive_observes_deadline() {
        let ctx = CallContext::with_timeout(Duration::from_millis(50));
        let (mut client, _server, _monitor) = open::<u32, u32>(&ctx, 4);

        let err = client.responses.message().await.unwrap_err();
        assert_eq!(err.code(), Code::DeadlineExceeded);
    }

    #[tokio::test]
    async fn test_send_to_gone_receiver() {
        let (client, server, _monitor) = pair();

        drop(server);
        assert!(client.requests.peer_gone());
        let err = client.requests.send(1).await.unwrap_err();
        assert_eq!(err.code(), Code::Cancelled);
    }

    #[tokio::test]
    async fn test_send_all_stops_when_receiver_leaves() {
        let (client, server, _monitor) = pair();

        drop(server);
        let sent = client.requests.send_all([1, 2, 3], None).await.unwrap();
        assert_eq!(sent, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_all_paces_between_frames() {
        let (mut client, mut server, _monitor) = pair();

        let start = tokio::time::Instant::now();
        let sent = client
            .requests
            .send_all([1, 2, 3], Some(Duration::from_millis(100)))
            .await
            .unwrap();
        client.requests.close().await;

        assert_eq!(sent, 3);
        // Two gaps for three frames, none after the last.
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(200));
        assert!(elapsed < Duration::from_millis(300));
        let mut seen = Vec::new();
        while let Some(n) = server.requests.message().await.unwrap() {
            seen.push(n);
        }
        assert_eq!(seen, vec![1, 2, 3]);
    }

    // ==================== Release ====================

    #[tokio::test]
    async fn test_channel_closed_when_both_ends_dropped() {
        let (client, server, monitor) = pair();
        assert!(!monitor.is_closed());

        drop(client);
        assert_eq!(monitor.state().response, HalfState::Closed);
        drop(server);
        assert!(monitor.is_closed());
        monitor.closed().await;
    }
}
