//! Calculator service: one arithmetic method per call pattern.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tandem::{CallContext, Client, Receiver, ResponseStream, Sink, Status};

use crate::config::ClientConfig;

/// Two numbers to add.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CalculateRequest {
    /// First operand
    pub num_one: i64,
    /// Second operand
    pub num_two: i64,
}

/// The sum of a [`CalculateRequest`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CalculateResponse {
    /// `num_one + num_two`
    pub result: i64,
}

/// A number to decompose into prime factors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrimeNumberRequest {
    /// The number to decompose
    pub number: i64,
}

/// One prime factor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrimeNumberResponse {
    /// A prime factor; factors arrive in non-decreasing order
    pub result: i64,
}

/// One number of the sequence to average.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComputeAverageRequest {
    /// The number
    pub number: i64,
}

/// The mean of every number received.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ComputeAverageResponse {
    /// Arithmetic mean
    pub answer: f64,
}

/// One number of the sequence to track the maximum of.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FindMaximumRequest {
    /// The number
    pub number: i64,
}

/// A new running maximum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FindMaximumResponse {
    /// Largest number seen so far
    pub result: i64,
}

/// A number to take the square root of.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SquareRootRequest {
    /// Must not be negative
    pub number: i64,
}

/// The square root of a [`SquareRootRequest`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SquareRootResponse {
    /// `sqrt(number)`
    pub number_root: f64,
}

/// Handler side of the calculator.
#[async_trait]
pub trait Calculator: Send + Sync + 'static {
    /// Add two numbers.
    async fn calculate(
        &self,
        request: CalculateRequest,
        ctx: &CallContext,
    ) -> Result<CalculateResponse, Status>;

    /// Stream the prime factors of a number.
    async fn prime_number_decomposition(
        &self,
        request: PrimeNumberRequest,
        responses: Sink<PrimeNumberResponse>,
        ctx: &CallContext,
    ) -> Result<(), Status>;

    /// Average every number the caller sends.
    async fn compute_average(
        &self,
        requests: Receiver<ComputeAverageRequest>,
        ctx: &CallContext,
    ) -> Result<ComputeAverageResponse, Status>;

    /// Reply with each new maximum as numbers arrive.
    async fn find_maximum(
        &self,
        requests: Receiver<FindMaximumRequest>,
        responses: Sink<FindMaximumResponse>,
        ctx: &CallContext,
    ) -> Result<(), Status>;

    /// Square root of a non-negative number.
    async fn square_root(
        &self,
        request: SquareRootRequest,
        ctx: &CallContext,
    ) -> Result<SquareRootResponse, Status>;
}

/// The reference calculator.
#[derive(Debug, Default, Clone, Copy)]
pub struct CalculatorService;

#[async_trait]
impl Calculator for CalculatorService {
    async fn calculate(
        &self,
        request: CalculateRequest,
        _ctx: &CallContext,
    ) -> Result<CalculateResponse, Status> {
        tracing::debug!("Calculate invoked with {request:?}");
        let result = request
            .num_one
            .checked_add(request.num_two)
            .ok_or_else(|| Status::invalid_argument("sum overflows a 64-bit integer"))?;
        Ok(CalculateResponse { result })
    }

    async fn prime_number_decomposition(
        &self,
        request: PrimeNumberRequest,
        responses: Sink<PrimeNumberResponse>,
        _ctx: &CallContext,
    ) -> Result<(), Status> {
        tracing::debug!("PrimeNumberDecomposition invoked with {request:?}");
        for factor in prime_factors(request.number) {
            responses.send(PrimeNumberResponse { result: factor }).await?;
        }
        Ok(())
    }

    async fn compute_average(
        &self,
        mut requests: Receiver<ComputeAverageRequest>,
        _ctx: &CallContext,
    ) -> Result<ComputeAverageResponse, Status> {
        tracing::debug!("ComputeAverage invoked with a request stream");
        let mut sum = 0.0;
        let mut count = 0_u64;
        while let Some(request) = requests.message().await? {
            sum += request.number as f64;
            count += 1;
        }
        if count == 0 {
            return Err(Status::invalid_argument(
                "cannot average an empty sequence of numbers",
            ));
        }
        Ok(ComputeAverageResponse {
            answer: sum / count as f64,
        })
    }

    async fn find_maximum(
        &self,
        mut requests: Receiver<FindMaximumRequest>,
        responses: Sink<FindMaximumResponse>,
        _ctx: &CallContext,
    ) -> Result<(), Status> {
        tracing::debug!("FindMaximum invoked with a request stream");
        let mut maximum: Option<i64> = None;
        while let Some(request) = requests.message().await? {
            if maximum.is_none_or(|max| request.number > max) {
                maximum = Some(request.number);
                responses
                    .send(FindMaximumResponse {
                        result: request.number,
                    })
                    .await?;
            }
        }
        Ok(())
    }

    async fn square_root(
        &self,
        request: SquareRootRequest,
        _ctx: &CallContext,
    ) -> Result<SquareRootResponse, Status> {
        tracing::debug!("SquareRoot invoked with {request:?}");
        if request.number < 0 {
            return Err(Status::invalid_argument(format!(
                "Received a negative number: {}",
                request.number
            )));
        }
        Ok(SquareRootResponse {
            number_root: (request.number as f64).sqrt(),
        })
    }
}

/// Prime factors of `n` by trial division, smallest first. Empty for `n <= 1`.
pub fn prime_factors(mut n: i64) -> Vec<i64> {
    let mut factors = Vec::new();
    let mut divisor = 2_i64;
    while n > 1 {
        // Once divisor² exceeds what is left, the remainder is prime.
        if divisor.checked_mul(divisor).is_none_or(|square| square > n) {
            factors.push(n);
            break;
        }
        if n % divisor == 0 {
            factors.push(divisor);
            n /= divisor;
        } else {
            divisor += 1;
        }
    }
    factors
}

/// Typed caller for a [`Calculator`].
#[derive(Debug)]
pub struct CalculatorClient<S = CalculatorService> {
    client: Client,
    service: Arc<S>,
    config: ClientConfig,
}

impl<S: Calculator> CalculatorClient<S> {
    /// Create a client calling `service`.
    pub fn new(service: Arc<S>, config: ClientConfig) -> Self {
        Self {
            client: Client::new(config.call.clone()),
            service,
            config,
        }
    }

    /// Add two numbers.
    pub async fn calculate(&self, num_one: i64, num_two: i64) -> Result<i64, Status> {
        let service = Arc::clone(&self.service);
        let response = self
            .client
            .unary(
                CalculateRequest { num_one, num_two },
                move |request, ctx| async move { service.calculate(request, &ctx).await },
            )
            .await?;
        Ok(response.result)
    }

    /// Start streaming the prime factors of `number`.
    pub async fn prime_number_decomposition(
        &self,
        number: i64,
    ) -> Result<ResponseStream<PrimeNumberResponse>, Status> {
        let service = Arc::clone(&self.service);
        self.client
            .server_stream(
                PrimeNumberRequest { number },
                move |request, responses, ctx| async move {
                    service
                        .prime_number_decomposition(request, responses, &ctx)
                        .await
                },
            )
            .await
    }

    /// Send every number, paced by the configured delay, and return the mean.
    pub async fn compute_average<I>(&self, numbers: I) -> Result<f64, Status>
    where
        I: IntoIterator<Item = i64>,
    {
        let service = Arc::clone(&self.service);
        let call = self
            .client
            .client_stream(move |requests, ctx| async move {
                service.compute_average(requests, &ctx).await
            });

        let requests = numbers
            .into_iter()
            .map(|number| ComputeAverageRequest { number });
        let sent = call
            .send_all(requests, self.config.client_stream_pacing())
            .await?;
        tracing::debug!("Sent {sent} numbers to ComputeAverage");

        Ok(call.finish().await?.answer)
    }

    /// Send every number, paced by the configured delay, and collect each new
    /// maximum the service reports.
    pub async fn find_maximum<I>(&self, numbers: I) -> Result<Vec<i64>, Status>
    where
        I: IntoIterator<Item = i64>,
        I::IntoIter: Send + 'static,
    {
        let service = Arc::clone(&self.service);
        let call = self
            .client
            .bidi(move |requests, responses, ctx| async move {
                service.find_maximum(requests, responses, &ctx).await
            });

        let mut maxima = Vec::new();
        let requests = numbers
            .into_iter()
            .map(|number| FindMaximumRequest { number });
        call.run(requests, self.config.bidi_pacing(), |response| {
            maxima.push(response.result);
            Ok(())
        })
        .await?;
        Ok(maxima)
    }

    /// Square root of `number`; negative input is rejected by the service.
    pub async fn square_root(&self, number: i64) -> Result<f64, Status> {
        let service = Arc::clone(&self.service);
        let response = self
            .client
            .unary(SquareRootRequest { number }, move |request, ctx| async move {
                service.square_root(request, &ctx).await
            })
            .await?;
        Ok(response.number_root)
    }
}
