//! Greeting service

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tandem::{CallContext, Client, Receiver, ResponseStream, Sink, Status};

use crate::config::ClientConfig;

/// Frames sent by `greet_many_times`.
pub const GREET_MANY_TIMES_COUNT: u32 = 10;

/// Who to greet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Greeting {
    /// Used in every greeting
    pub first_name: String,
    /// Carried along but never used in a greeting
    pub last_name: String,
}

impl Greeting {
    /// Create a greeting for `first_name last_name`.
    pub fn new(first_name: impl Into<String>, last_name: impl Into<String>) -> Self {
        Self {
            first_name: first_name.into(),
            last_name: last_name.into(),
        }
    }
}

/// A greeting produced by the service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GreetResponse {
    /// The greeting text
    pub result: String,
}

impl GreetResponse {
    fn new(result: impl Into<String>) -> Self {
        Self {
            result: result.into(),
        }
    }
}

/// Handler side of the greeting service.
#[async_trait]
pub trait Greeter: Send + Sync + 'static {
    /// Greet once.
    async fn greet(&self, greeting: Greeting, ctx: &CallContext) -> Result<GreetResponse, Status>;

    /// Greet [`GREET_MANY_TIMES_COUNT`] times, one frame per greeting.
    async fn greet_many_times(
        &self,
        greeting: Greeting,
        responses: Sink<GreetResponse>,
        ctx: &CallContext,
    ) -> Result<(), Status>;

    /// Greet everyone the caller sends in one response.
    async fn long_greet(
        &self,
        requests: Receiver<Greeting>,
        ctx: &CallContext,
    ) -> Result<GreetResponse, Status>;

    /// Greet each caller frame as it arrives.
    async fn greet_everyone(
        &self,
        requests: Receiver<Greeting>,
        responses: Sink<GreetResponse>,
        ctx: &CallContext,
    ) -> Result<(), Status>;

    /// Greet once after a slow piece of work that stops if the call does.
    async fn greet_with_deadline(
        &self,
        greeting: Greeting,
        ctx: &CallContext,
    ) -> Result<GreetResponse, Status>;
}

/// The reference greeter.
///
/// Counts the unary greetings it has served. The counter belongs to the
/// service instance and is safe to bump from concurrent calls.
#[derive(Debug)]
pub struct GreetService {
    requests: AtomicU64,
    interval: Duration,
    work_step: Duration,
    work_steps: u32,
}

impl Default for GreetService {
    fn default() -> Self {
        Self {
            requests: AtomicU64::new(0),
            interval: Duration::from_secs(1),
            work_step: Duration::from_secs(1),
            work_steps: 3,
        }
    }
}

impl GreetService {
    /// A greeter with the default pacing: one second between streamed
    /// greetings and three one-second steps of slow work.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the delay between frames of `greet_many_times`.
    #[must_use]
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Set the slow work done by `greet_with_deadline`.
    #[must_use]
    pub fn with_work(mut self, step: Duration, steps: u32) -> Self {
        self.work_step = step;
        self.work_steps = steps;
        self
    }

    /// Unary greetings served so far.
    pub fn request_count(&self) -> u64 {
        self.requests.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl Greeter for GreetService {
    async fn greet(&self, greeting: Greeting, _ctx: &CallContext) -> Result<GreetResponse, Status> {
        let count = self.requests.fetch_add(1, Ordering::Relaxed) + 1;
        tracing::debug!("Greet invoked with {greeting:?}");
        tracing::info!("Received {count} greet requests so far");
        Ok(GreetResponse::new(format!("Hello {}", greeting.first_name)))
    }

    async fn greet_many_times(
        &self,
        greeting: Greeting,
        responses: Sink<GreetResponse>,
        ctx: &CallContext,
    ) -> Result<(), Status> {
        tracing::debug!("GreetManyTimes invoked with {greeting:?}");
        for i in 1..=GREET_MANY_TIMES_COUNT {
            if i > 1 {
                ctx.sleep(self.interval).await?;
            }
            responses
                .send(GreetResponse::new(format!(
                    "Hello {} for the {i} times",
                    greeting.first_name
                )))
                .await?;
        }
        Ok(())
    }

    async fn long_greet(
        &self,
        mut requests: Receiver<Greeting>,
        _ctx: &CallContext,
    ) -> Result<GreetResponse, Status> {
        tracing::debug!("LongGreet invoked with a request stream");
        let mut result = String::from("Hello ");
        while let Some(greeting) = requests.message().await? {
            result.push_str(&greeting.first_name);
            result.push_str("! ");
        }
        Ok(GreetResponse::new(result))
    }

    async fn greet_everyone(
        &self,
        mut requests: Receiver<Greeting>,
        responses: Sink<GreetResponse>,
        _ctx: &CallContext,
    ) -> Result<(), Status> {
        tracing::debug!("GreetEveryone invoked with a request stream");
        while let Some(greeting) = requests.message().await? {
            responses
                .send(GreetResponse::new(format!(
                    "Hello {}! ",
                    greeting.first_name
                )))
                .await?;
        }
        Ok(())
    }

    async fn greet_with_deadline(
        &self,
        greeting: Greeting,
        ctx: &CallContext,
    ) -> Result<GreetResponse, Status> {
        tracing::debug!("GreetWithDeadline invoked with {greeting:?}");
        for _ in 0..self.work_steps {
            if let Err(status) = ctx.sleep(self.work_step).await {
                tracing::info!("The caller abandoned the request: {status}");
                return Err(status);
            }
        }
        Ok(GreetResponse::new(format!("Hello {}", greeting.first_name)))
    }
}

/// Typed caller for a [`Greeter`].
#[derive(Debug)]
pub struct GreeterClient<S = GreetService> {
    client: Client,
    service: Arc<S>,
    config: ClientConfig,
}

impl<S: Greeter> GreeterClient<S> {
    /// Create a client calling `service`.
    pub fn new(service: Arc<S>, config: ClientConfig) -> Self {
        Self {
            client: Client::new(config.call.clone()),
            service,
            config,
        }
    }

    /// Greet once.
    pub async fn greet(&self, greeting: Greeting) -> Result<String, Status> {
        let service = Arc::clone(&self.service);
        let response = self
            .client
            .unary(greeting, move |greeting, ctx| async move {
                service.greet(greeting, &ctx).await
            })
            .await?;
        Ok(response.result)
    }

    /// Start the stream of repeated greetings.
    pub async fn greet_many_times(
        &self,
        greeting: Greeting,
    ) -> Result<ResponseStream<GreetResponse>, Status> {
        let service = Arc::clone(&self.service);
        self.client
            .server_stream(greeting, move |greeting, responses, ctx| async move {
                service.greet_many_times(greeting, responses, &ctx).await
            })
            .await
    }

    /// Send every greeting, paced by the configured delay, and return the
    /// combined reply.
    pub async fn long_greet<I>(&self, greetings: I) -> Result<String, Status>
    where
        I: IntoIterator<Item = Greeting>,
    {
        let service = Arc::clone(&self.service);
        let call = self
            .client
            .client_stream(move |requests, ctx| async move {
                service.long_greet(requests, &ctx).await
            });

        call.send_all(greetings, self.config.client_stream_pacing())
            .await?;
        Ok(call.finish().await?.result)
    }

    /// Send every greeting, paced by the configured delay, collecting the
    /// replies as they arrive.
    pub async fn greet_everyone<I>(&self, greetings: I) -> Result<Vec<String>, Status>
    where
        I: IntoIterator<Item = Greeting>,
        I::IntoIter: Send + 'static,
    {
        let service = Arc::clone(&self.service);
        let call = self
            .client
            .bidi(move |requests, responses, ctx| async move {
                service.greet_everyone(requests, responses, &ctx).await
            });

        let mut replies = Vec::new();
        call.run(greetings, self.config.bidi_pacing(), |response| {
            tracing::debug!("Response from GreetEveryone: {}", response.result);
            replies.push(response.result);
            Ok(())
        })
        .await?;
        Ok(replies)
    }

    /// Greet once, giving up after `timeout`.
    pub async fn greet_with_deadline(
        &self,
        greeting: Greeting,
        timeout: Duration,
    ) -> Result<String, Status> {
        let service = Arc::clone(&self.service);
        let response = self
            .client
            .with_timeout(timeout)
            .unary(greeting, move |greeting, ctx| async move {
                service.greet_with_deadline(greeting, &ctx).await
            })
            .await?;
        Ok(response.result)
    }
}
