//! Property-based tests for the calculator over the call engine.
//!
//! # Server stream
//! - Prime decomposition multiplies back to the input
//! - Every emitted factor is prime, in non-decreasing order
//!
//! # Client stream
//! - The average equals the arithmetic mean of exactly the frames sent
//!
//! # Bidi stream
//! - The running maximum emits exactly the strict prefix maxima, in order
//!
//! # Unary
//! - Square root never completes for negative input

#![allow(clippy::unwrap_used)]

use std::sync::Arc;

use proptest::prelude::*;
use tandem::Code;
use tandem_services::{CalculatorClient, CalculatorService, ClientConfig, prime_factors};

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()
        .unwrap()
}

fn client() -> CalculatorClient {
    CalculatorClient::new(Arc::new(CalculatorService), ClientConfig::unpaced())
}

fn is_prime(n: i64) -> bool {
    n >= 2 && (2..).take_while(|d| d * d <= n).all(|d| n % d != 0)
}

fn prefix_maxima(numbers: &[i64]) -> Vec<i64> {
    let mut maxima: Vec<i64> = Vec::new();
    for &n in numbers {
        if maxima.last().is_none_or(|&max| n > max) {
            maxima.push(n);
        }
    }
    maxima
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_prime_factors_multiply_back(n in 2_i64..1_000_000) {
        let factors = prime_factors(n);

        prop_assert_eq!(factors.iter().product::<i64>(), n);
        prop_assert!(factors.iter().all(|&f| is_prime(f)));
        prop_assert!(factors.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn prop_streamed_factors_match(n in 2_i64..100_000) {
        let (frames, end) = runtime().block_on(async {
            client().prime_number_decomposition(n).await.unwrap().drain().await
        });

        prop_assert!(end.is_ok());
        let streamed: Vec<i64> = frames.iter().map(|f| f.result).collect();
        prop_assert_eq!(streamed, prime_factors(n));
    }

    #[test]
    fn prop_average_is_mean_of_frames(numbers in prop::collection::vec(-1_000_000_i64..1_000_000, 1..64)) {
        let expected = numbers.iter().sum::<i64>() as f64 / numbers.len() as f64;

        let average = runtime()
            .block_on(client().compute_average(numbers.clone()))
            .unwrap();

        prop_assert!((average - expected).abs() < 1e-6);
    }

    #[test]
    fn prop_running_maximum_is_prefix_maxima(numbers in prop::collection::vec(any::<i64>(), 0..64)) {
        let maxima = runtime()
            .block_on(client().find_maximum(numbers.clone()))
            .unwrap();

        prop_assert_eq!(maxima, prefix_maxima(&numbers));
    }

    #[test]
    fn prop_negative_square_root_fails(n in i64::MIN..0) {
        let err = runtime().block_on(client().square_root(n)).unwrap_err();

        prop_assert_eq!(err.code(), Code::InvalidArgument);
    }
}
