//! Handler-side drivers for the four call patterns.
//!
//! Each driver owns the handler's end of the channel, hands the handler
//! what it is allowed to touch, and writes the response trailer itself once
//! the handler returns. A handler therefore produces exactly one terminal
//! outcome, even if it panics.

use std::future::Future;
use std::panic::AssertUnwindSafe;

use futures::FutureExt;
use tracing::{debug, warn};

use crate::channel::{Receiver, Sender, ServerEnd, Sink};
use crate::context::CallContext;
use crate::status::Status;

/// Serve a unary call: one request in, one response or failure out.
pub async fn serve_unary<Req, Resp, H, Fut>(end: ServerEnd<Req, Resp>, handler: H)
where
    H: FnOnce(Req, CallContext) -> Fut,
    Fut: Future<Output = Result<Resp, Status>>,
{
    let ServerEnd {
        mut requests,
        mut responses,
    } = end;
    let ctx = requests.context().clone();

    let request = match single_request(&mut requests).await {
        Ok(request) => request,
        Err(status) => return responses.fail(status).await,
    };
    drop(requests);

    let outcome = guarded(handler(request, ctx)).await;
    respond(&mut responses, outcome).await;
}

/// Serve a server-streaming call: one request in, any number of frames out.
pub async fn serve_server_stream<Req, Resp, H, Fut>(end: ServerEnd<Req, Resp>, handler: H)
where
    H: FnOnce(Req, Sink<Resp>, CallContext) -> Fut,
    Fut: Future<Output = Result<(), Status>>,
{
    let ServerEnd {
        mut requests,
        mut responses,
    } = end;
    let ctx = requests.context().clone();

    let request = match single_request(&mut requests).await {
        Ok(request) => request,
        Err(status) => return responses.fail(status).await,
    };
    drop(requests);

    let Some(sink) = responses.sink() else {
        return;
    };
    let outcome = guarded(handler(request, sink, ctx)).await;
    finish(&mut responses, outcome).await;
}

/// Serve a client-streaming call: frames in until the caller ends its
/// half, then one response or failure out.
pub async fn serve_client_stream<Req, Resp, H, Fut>(end: ServerEnd<Req, Resp>, handler: H)
where
    H: FnOnce(Receiver<Req>, CallContext) -> Fut,
    Fut: Future<Output = Result<Resp, Status>>,
{
    let ServerEnd {
        requests,
        mut responses,
    } = end;
    let ctx = requests.context().clone();

    let outcome = guarded(handler(requests, ctx)).await;
    respond(&mut responses, outcome).await;
}

/// Serve a bidirectional call: frames flow both ways until the handler
/// returns.
pub async fn serve_bidi<Req, Resp, H, Fut>(end: ServerEnd<Req, Resp>, handler: H)
where
    H: FnOnce(Receiver<Req>, Sink<Resp>, CallContext) -> Fut,
    Fut: Future<Output = Result<(), Status>>,
{
    let ServerEnd {
        requests,
        mut responses,
    } = end;
    let ctx = requests.context().clone();

    let Some(sink) = responses.sink() else {
        return;
    };
    let outcome = guarded(handler(requests, sink, ctx)).await;
    finish(&mut responses, outcome).await;
}

async fn single_request<Req>(requests: &mut Receiver<Req>) -> Result<Req, Status> {
    match requests.message().await? {
        Some(request) => Ok(request),
        None => Err(Status::internal("request half ended before a request")),
    }
}

/// Poll a handler future, turning a panic into an `Internal` status.
async fn guarded<T, Fut>(handler: Fut) -> Result<T, Status>
where
    Fut: Future<Output = Result<T, Status>>,
{
    match AssertUnwindSafe(handler).catch_unwind().await {
        Ok(outcome) => outcome,
        Err(_) => {
            warn!("handler panicked");
            Err(Status::internal("handler panicked"))
        }
    }
}

async fn respond<Resp>(responses: &mut Sender<Resp>, outcome: Result<Resp, Status>) {
    let outcome = match outcome {
        Ok(response) => responses.send(response).await,
        Err(status) => Err(status),
    };
    finish(responses, outcome).await;
}

async fn finish<Resp>(responses: &mut Sender<Resp>, outcome: Result<(), Status>) {
    match outcome {
        Ok(()) => responses.close().await,
        Err(status) => {
            debug!(code = %status.code(), message = status.message(), "call failed");
            responses.fail(status).await;
        }
    }
}
