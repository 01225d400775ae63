//! Caller-facing entry points for the four call patterns.
//!
//! Every call opens its own channel, spawns the handler on the far end, and
//! hands the caller a typed handle for its side of the interaction:
//!
//! | Pattern       | Entry point                 | Caller gets            |
//! |---------------|-----------------------------|------------------------|
//! | Unary         | [`Client::unary`]           | [`UnaryCall`]          |
//! | Server stream | [`Client::server_stream`]   | [`ResponseStream`]     |
//! | Client stream | [`Client::client_stream`]   | [`ClientStreamCall`]   |
//! | Bidi stream   | [`Client::bidi`]            | [`BidiCall`]           |
//!
//! Dropping a handle before the call finishes cancels the call.

use std::fmt;
use std::future::{Future, IntoFuture};
use std::time::Duration;

use futures::Stream;
use futures::future::BoxFuture;
use tracing::debug;

use crate::channel::{self, ChannelMonitor, ClientEnd, Receiver, Sender, ServerEnd, Sink};
use crate::context::{CallContext, CancelOnDrop};
use crate::deadline;
use crate::duplex::{self, Exchange};
use crate::options::CallOptions;
use crate::server;
use crate::status::Status;

/// Makes calls against in-process handlers.
#[derive(Clone, Debug, Default)]
pub struct Client {
    options: CallOptions,
}

impl Client {
    /// Create a client that applies `options` to every call.
    pub fn new(options: CallOptions) -> Self {
        Self { options }
    }

    /// The options applied to each call.
    pub fn options(&self) -> &CallOptions {
        &self.options
    }

    /// A copy of this client whose calls time out after `timeout`.
    #[must_use]
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        Self {
            options: self.options.clone().timeout(timeout),
        }
    }

    fn open<Req, Resp>(
        &self,
        pattern: &'static str,
    ) -> (
        CallContext,
        ClientEnd<Req, Resp>,
        ServerEnd<Req, Resp>,
        ChannelMonitor,
    ) {
        let ctx = match self.options.timeout {
            Some(timeout) => CallContext::with_timeout(timeout),
            None => CallContext::new(),
        };
        let (client, server, monitor) = channel::open(&ctx, self.options.effective_capacity());
        debug!(pattern, timeout = ?self.options.timeout, "opening call");
        (ctx, client, server, monitor)
    }

    /// Start a unary call. Await the returned handle for the response.
    pub fn unary<Req, Resp, H, Fut>(&self, request: Req, handler: H) -> UnaryCall<Req, Resp>
    where
        Req: Send + 'static,
        Resp: Send + 'static,
        H: FnOnce(Req, CallContext) -> Fut + Send + 'static,
        Fut: Future<Output = Result<Resp, Status>> + Send + 'static,
    {
        let (ctx, end, server, monitor) = self.open("unary");
        tokio::spawn(server::serve_unary(server, handler));
        UnaryCall {
            request,
            end,
            cancel: CancelOnDrop(ctx.clone()),
            ctx,
            monitor,
        }
    }

    /// Start a server-streaming call.
    ///
    /// Returns once the request has been handed over; responses are pulled
    /// from the returned stream.
    pub async fn server_stream<Req, Resp, H, Fut>(
        &self,
        request: Req,
        handler: H,
    ) -> Result<ResponseStream<Resp>, Status>
    where
        Req: Send + 'static,
        Resp: Send + 'static,
        H: FnOnce(Req, Sink<Resp>, CallContext) -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), Status>> + Send + 'static,
    {
        let (ctx, end, server, monitor) = self.open("server_stream");
        let cancel = CancelOnDrop(ctx.clone());
        tokio::spawn(server::serve_server_stream(server, handler));

        let ClientEnd {
            mut requests,
            responses,
        } = end;
        send_last(&mut requests, request).await?;

        Ok(ResponseStream {
            responses,
            ctx,
            monitor,
            cancel,
        })
    }

    /// Start a client-streaming call.
    pub fn client_stream<Req, Resp, H, Fut>(&self, handler: H) -> ClientStreamCall<Req, Resp>
    where
        Req: Send + 'static,
        Resp: Send + 'static,
        H: FnOnce(Receiver<Req>, CallContext) -> Fut + Send + 'static,
        Fut: Future<Output = Result<Resp, Status>> + Send + 'static,
    {
        let (ctx, end, server, monitor) = self.open("client_stream");
        tokio::spawn(server::serve_client_stream(server, handler));
        ClientStreamCall {
            requests: end.requests,
            responses: end.responses,
            cancel: CancelOnDrop(ctx.clone()),
            ctx,
            monitor,
        }
    }

    /// Start a bidirectional streaming call.
    pub fn bidi<Req, Resp, H, Fut>(&self, handler: H) -> BidiCall<Req, Resp>
    where
        Req: Send + 'static,
        Resp: Send + 'static,
        H: FnOnce(Receiver<Req>, Sink<Resp>, CallContext) -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), Status>> + Send + 'static,
    {
        let (ctx, end, server, monitor) = self.open("bidi");
        tokio::spawn(server::serve_bidi(server, handler));
        BidiCall {
            requests: end.requests,
            responses: ResponseStream {
                responses: end.responses,
                cancel: CancelOnDrop(ctx.clone()),
                ctx,
                monitor,
            },
        }
    }
}

/// Send the only request of a call and end the request half.
///
/// If the handler has already gone away the response half carries the real
/// outcome, so that is not an error here.
async fn send_last<Req>(requests: &mut Sender<Req>, request: Req) -> Result<(), Status> {
    match requests.send(request).await {
        Ok(()) => {
            requests.close().await;
            Ok(())
        }
        Err(_) if requests.peer_gone() => Ok(()),
        Err(status) => Err(status),
    }
}

/// Wait for exactly one response followed by a clean end of stream.
async fn single_response<Resp>(responses: &mut Receiver<Resp>) -> Result<Resp, Status> {
    let response = responses
        .message()
        .await?
        .ok_or_else(|| Status::internal("response half ended without a response"))?;
    match responses.message().await? {
        None => Ok(response),
        Some(_) => Err(Status::internal(
            "more than one response on a single-response call",
        )),
    }
}

/// An in-flight unary call.
///
/// `.await` it for the outcome.
pub struct UnaryCall<Req, Resp> {
    request: Req,
    end: ClientEnd<Req, Resp>,
    ctx: CallContext,
    monitor: ChannelMonitor,
    cancel: CancelOnDrop,
}

impl<Req, Resp> fmt::Debug for UnaryCall<Req, Resp> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UnaryCall")
            .field("ctx", &self.ctx)
            .finish_non_exhaustive()
    }
}

impl<Req, Resp> UnaryCall<Req, Resp> {
    /// The call's cancellation and deadline state.
    pub fn context(&self) -> &CallContext {
        &self.ctx
    }

    /// A view of the call's channel that outlives the call.
    pub fn monitor(&self) -> ChannelMonitor {
        self.monitor.clone()
    }

    /// Send the request and wait for the response.
    pub async fn response(self) -> Result<Resp, Status> {
        let UnaryCall {
            request,
            end:
                ClientEnd {
                    mut requests,
                    mut responses,
                },
            ctx,
            cancel: _cancel,
            ..
        } = self;
        deadline::enforce(&ctx, async {
            send_last(&mut requests, request).await?;
            single_response(&mut responses).await
        })
        .await
    }
}

impl<Req, Resp> IntoFuture for UnaryCall<Req, Resp>
where
    Req: Send + 'static,
    Resp: Send + 'static,
{
    type Output = Result<Resp, Status>;
    type IntoFuture = BoxFuture<'static, Self::Output>;

    fn into_future(self) -> Self::IntoFuture {
        Box::pin(self.response())
    }
}

/// The response side of a server-streaming or bidi call.
///
/// Frames are pulled one at a time. The stream ends either cleanly
/// (`Ok(None)`) or with a failure status; frames received before a failure
/// stay received.
pub struct ResponseStream<T> {
    responses: Receiver<T>,
    ctx: CallContext,
    monitor: ChannelMonitor,
    cancel: CancelOnDrop,
}

impl<T> fmt::Debug for ResponseStream<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResponseStream")
            .field("responses", &self.responses)
            .finish_non_exhaustive()
    }
}

impl<T> ResponseStream<T> {
    /// Next response frame, `Ok(None)` at a clean end of stream.
    pub async fn message(&mut self) -> Result<Option<T>, Status> {
        self.responses.message().await
    }

    /// Cancel the call. The next [`message`](Self::message) reports
    /// `Cancelled` unless the stream had already ended.
    pub fn cancel(&self) {
        self.ctx.cancel();
    }

    /// The call's cancellation and deadline state.
    pub fn context(&self) -> &CallContext {
        &self.ctx
    }

    /// A view of the call's channel that outlives the call.
    pub fn monitor(&self) -> ChannelMonitor {
        self.monitor.clone()
    }

    /// Read to the end, returning every frame received together with how
    /// the stream ended.
    pub async fn drain(mut self) -> (Vec<T>, Result<(), Status>) {
        let mut frames = Vec::new();
        loop {
            match self.message().await {
                Ok(Some(frame)) => frames.push(frame),
                Ok(None) => return (frames, Ok(())),
                Err(status) => return (frames, Err(status)),
            }
        }
    }

    /// Adapt into a [`Stream`] of frames, ending after the first error.
    pub fn into_stream(self) -> impl Stream<Item = Result<T, Status>> {
        futures::stream::unfold(Some(self), |state| async move {
            let mut stream = state?;
            match stream.message().await {
                Ok(Some(frame)) => Some((Ok(frame), Some(stream))),
                Ok(None) => None,
                Err(status) => Some((Err(status), None)),
            }
        })
    }
}

/// An in-flight client-streaming call.
///
/// Push requests with [`send`](Self::send), then [`finish`](Self::finish)
/// to end the request half and wait for the aggregate response.
pub struct ClientStreamCall<Req, Resp> {
    requests: Sender<Req>,
    responses: Receiver<Resp>,
    ctx: CallContext,
    monitor: ChannelMonitor,
    cancel: CancelOnDrop,
}

impl<Req, Resp> fmt::Debug for ClientStreamCall<Req, Resp> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientStreamCall")
            .field("requests", &self.requests)
            .finish_non_exhaustive()
    }
}

impl<Req, Resp> ClientStreamCall<Req, Resp> {
    /// Send one request frame.
    ///
    /// An error here may just mean the handler has already finished; call
    /// [`finish`](Self::finish) for the call's outcome.
    pub async fn send(&self, request: Req) -> Result<(), Status> {
        self.requests.send(request).await
    }

    /// Send every request in order, sleeping `pacing` between frames.
    pub async fn send_all<I>(&self, requests: I, pacing: Option<Duration>) -> Result<usize, Status>
    where
        I: IntoIterator<Item = Req>,
    {
        self.requests.send_all(requests, pacing).await
    }

    /// End the request half. Calling it again does nothing.
    pub async fn close_send(&mut self) {
        self.requests.close().await;
    }

    /// Cancel the call.
    pub fn cancel(&self) {
        self.ctx.cancel();
    }

    /// The call's cancellation and deadline state.
    pub fn context(&self) -> &CallContext {
        &self.ctx
    }

    /// A view of the call's channel that outlives the call.
    pub fn monitor(&self) -> ChannelMonitor {
        self.monitor.clone()
    }

    /// End the request half if still open and wait for the response.
    pub async fn finish(self) -> Result<Resp, Status> {
        let ClientStreamCall {
            mut requests,
            mut responses,
            ctx,
            cancel: _cancel,
            ..
        } = self;
        deadline::enforce(&ctx, async {
            requests.close().await;
            single_response(&mut responses).await
        })
        .await
    }
}

/// An in-flight bidirectional call.
pub struct BidiCall<Req, Resp> {
    requests: Sender<Req>,
    responses: ResponseStream<Resp>,
}

impl<Req, Resp> fmt::Debug for BidiCall<Req, Resp> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BidiCall")
            .field("requests", &self.requests)
            .field("responses", &self.responses)
            .finish()
    }
}

impl<Req, Resp> BidiCall<Req, Resp> {
    /// The call's cancellation and deadline state.
    pub fn context(&self) -> &CallContext {
        self.responses.context()
    }

    /// A view of the call's channel that outlives the call.
    pub fn monitor(&self) -> ChannelMonitor {
        self.responses.monitor()
    }

    /// Cancel the call.
    pub fn cancel(&self) {
        self.responses.cancel();
    }

    /// Take both halves to drive them by hand.
    ///
    /// The call stays alive as long as the [`ResponseStream`] does.
    pub fn into_parts(self) -> (Sender<Req>, ResponseStream<Resp>) {
        (self.requests, self.responses)
    }

    /// Drive the call with the duplex coordinator: send `outbound` paced by
    /// `pacing` while handing each response to `reaction`.
    pub async fn run<I, R>(
        self,
        outbound: I,
        pacing: Option<Duration>,
        reaction: R,
    ) -> Result<Exchange, Status>
    where
        Req: Send + 'static,
        I: IntoIterator<Item = Req>,
        I::IntoIter: Send + 'static,
        R: FnMut(Resp) -> Result<(), Status>,
    {
        let BidiCall {
            requests,
            responses:
                ResponseStream {
                    responses,
                    ctx,
                    cancel: _cancel,
                    ..
                },
        } = self;
        deadline::enforce(
            &ctx,
            duplex::run(requests, responses, outbound, pacing, reaction),
        )
        .await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::status::Code;
    use futures::StreamExt;

    fn client() -> Client {
        Client::new(CallOptions::default().capacity(4))
    }

    // ==================== Unary ====================

    #[tokio::test]
    async fn test_unary_round_trip() {
        let response = client()
            .unary(20, |n: i64, _ctx| async move { Ok(n + 22) })
            .await
            .unwrap();

        assert_eq!(response, 42);
    }

    #[tokio::test]
    async fn test_unary_failure_kind_is_preserved() {
        let err = client()
            .unary(-1_i64, |n, _ctx| async move {
                if n < 0 {
                    Err(Status::invalid_argument(format!("negative: {n}")))
                } else {
                    Ok(n)
                }
            })
            .await
            .unwrap_err();

        assert_eq!(err.code(), Code::InvalidArgument);
        assert_eq!(err.message(), "negative: -1");
    }

    #[tokio::test(start_paused = true)]
    async fn test_unary_deadline_releases_channel() {
        let call = client()
            .with_timeout(Duration::from_millis(100))
            .unary((), |(), ctx: CallContext| async move {
                ctx.sleep(Duration::from_secs(3)).await?;
                Ok("done")
            });
        let monitor = call.monitor();

        let err = call.await.unwrap_err();
        assert_eq!(err.code(), Code::DeadlineExceeded);

        tokio::time::timeout(Duration::from_secs(1), monitor.closed())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_dropping_unary_call_releases_channel() {
        let call = client().unary((), |(), _ctx| async move { Ok(1) });
        let monitor = call.monitor();
        drop(call);

        monitor.closed().await;
    }

    // ==================== Server stream ====================

    #[tokio::test]
    async fn test_server_stream_lazy_pull() {
        let mut stream = client()
            .server_stream(3_u32, |n, sink: Sink<u32>, _ctx| async move {
                for i in 0..n {
                    sink.send(i).await?;
                }
                Ok(())
            })
            .await
            .unwrap();

        assert_eq!(stream.message().await.unwrap(), Some(0));
        assert_eq!(stream.message().await.unwrap(), Some(1));
        assert_eq!(stream.message().await.unwrap(), Some(2));
        assert_eq!(stream.message().await.unwrap(), None);
        assert_eq!(stream.message().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_server_stream_empty() {
        let stream = client()
            .server_stream((), |(), _sink: Sink<u32>, _ctx| async move { Ok(()) })
            .await
            .unwrap();

        let (frames, end) = stream.drain().await;
        assert!(frames.is_empty());
        assert!(end.is_ok());
    }

    #[tokio::test]
    async fn test_server_stream_into_stream() {
        let stream = client()
            .server_stream(4_u32, |n, sink: Sink<u32>, _ctx| async move {
                for i in 0..n {
                    sink.send(i * 10).await?;
                }
                Err(Status::internal("stopped"))
            })
            .await
            .unwrap();

        let items: Vec<_> = stream.into_stream().collect().await;
        assert_eq!(items.len(), 5);
        assert_eq!(items[3].as_ref().ok(), Some(&30));
        assert_eq!(items[4].as_ref().err().map(|s| s.code()), Some(Code::Internal));
    }

    #[tokio::test]
    async fn test_dropping_stream_cancels_handler() {
        let (tx, rx) = tokio::sync::oneshot::channel();
        let mut stream = client()
            .server_stream((), |(), sink: Sink<u32>, ctx: CallContext| async move {
                sink.send(1).await?;
                let status = ctx.done().await;
                let _ = tx.send(status.code());
                Err(status)
            })
            .await
            .unwrap();
        let monitor = stream.monitor();

        assert_eq!(stream.message().await.unwrap(), Some(1));
        drop(stream);

        assert_eq!(rx.await.unwrap(), Code::Cancelled);
        monitor.closed().await;
    }

    #[tokio::test]
    async fn test_cancel_twice_yields_one_outcome() {
        let mut stream = client()
            .server_stream((), |(), sink: Sink<u32>, ctx: CallContext| async move {
                sink.send(1).await?;
                ctx.done().await;
                Ok(())
            })
            .await
            .unwrap();

        assert_eq!(stream.message().await.unwrap(), Some(1));
        stream.cancel();
        stream.cancel();
        assert_eq!(stream.message().await.unwrap_err().code(), Code::Cancelled);
        assert_eq!(stream.message().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_cancel_after_completion_is_noop() {
        let mut stream = client()
            .server_stream((), |(), sink: Sink<u32>, _ctx| async move {
                sink.send(1).await?;
                Ok(())
            })
            .await
            .unwrap();

        assert_eq!(stream.message().await.unwrap(), Some(1));
        assert_eq!(stream.message().await.unwrap(), None);
        stream.cancel();
        assert_eq!(stream.message().await.unwrap(), None);
    }

    // ==================== Client stream ====================

    async fn sum(mut requests: Receiver<u32>, _ctx: CallContext) -> Result<u32, Status> {
        let mut total = 0;
        while let Some(n) = requests.message().await? {
            total += n;
        }
        Ok(total)
    }

    #[tokio::test]
    async fn test_client_stream_aggregate() {
        let call = client().client_stream(sum);
        for n in [1, 2, 3, 4] {
            call.send(n).await.unwrap();
        }

        assert_eq!(call.finish().await.unwrap(), 10);
    }

    #[tokio::test]
    async fn test_close_send_is_idempotent() {
        let mut call = client().client_stream(sum);
        call.send(5).await.unwrap();
        call.close_send().await;
        call.close_send().await;

        assert_eq!(call.send(1).await.unwrap_err().code(), Code::Internal);
        assert_eq!(call.finish().await.unwrap(), 5);
    }

    #[tokio::test]
    async fn test_client_stream_early_rejection() {
        let call = client().client_stream(|_requests: Receiver<u32>, _ctx| async move {
            Err::<u32, _>(Status::invalid_argument("not today"))
        });

        // Sends may or may not land before the handler gives up.
        let _ = call.send_all(0..100, None).await;

        assert_eq!(call.finish().await.unwrap_err().code(), Code::InvalidArgument);
    }

    #[tokio::test(start_paused = true)]
    async fn test_client_stream_deadline() {
        let call = client()
            .with_timeout(Duration::from_millis(150))
            .client_stream(sum);
        let monitor = call.monitor();

        let err = call
            .send_all(0..10, Some(Duration::from_millis(100)))
            .await
            .unwrap_err();
        assert_eq!(err.code(), Code::DeadlineExceeded);
        assert_eq!(call.finish().await.unwrap_err().code(), Code::DeadlineExceeded);

        monitor.closed().await;
    }

    // ==================== Bidi ====================

    async fn doubler(
        mut requests: Receiver<u32>,
        sink: Sink<u32>,
        _ctx: CallContext,
    ) -> Result<(), Status> {
        while let Some(n) = requests.message().await? {
            sink.send(n * 2).await?;
        }
        Ok(())
    }

    #[tokio::test]
    async fn test_bidi_run() {
        let mut seen = Vec::new();
        let exchange = client()
            .bidi(doubler)
            .run(vec![1, 2, 3], None, |n| {
                seen.push(n);
                Ok(())
            })
            .await
            .unwrap();

        assert_eq!(exchange, Exchange { sent: 3, received: 3 });
        assert_eq!(seen, vec![2, 4, 6]);
    }

    #[tokio::test]
    async fn test_bidi_by_hand() {
        let (mut requests, mut responses) = client().bidi(doubler).into_parts();

        requests.send(5).await.unwrap();
        assert_eq!(responses.message().await.unwrap(), Some(10));
        requests.send(6).await.unwrap();
        assert_eq!(responses.message().await.unwrap(), Some(12));
        requests.close().await;
        assert_eq!(responses.message().await.unwrap(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_bidi_deadline_releases_channel() {
        let call = client()
            .with_timeout(Duration::from_millis(500))
            .bidi(doubler);
        let monitor = call.monitor();

        let err = call
            .run(0..100, Some(Duration::from_millis(100)), |_| Ok(()))
            .await
            .unwrap_err();

        assert_eq!(err.code(), Code::DeadlineExceeded);
        tokio::time::timeout(Duration::from_secs(1), monitor.closed())
            .await
            .unwrap();
    }
}
