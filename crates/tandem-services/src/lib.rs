//! Tandem services
//!
//! Two small services that exercise every call pattern of the [`tandem`]
//! engine, each with a typed client:
//!
//! | Method                         | Pattern       |
//! |--------------------------------|---------------|
//! | `calculate`, `square_root`     | Unary         |
//! | `prime_number_decomposition`   | Server stream |
//! | `compute_average`              | Client stream |
//! | `find_maximum`                 | Bidi stream   |
//! | `greet`, `greet_with_deadline` | Unary         |
//! | `greet_many_times`             | Server stream |
//! | `long_greet`                   | Client stream |
//! | `greet_everyone`               | Bidi stream   |

mod calculator;
mod config;
mod greet;

pub use calculator::{
    CalculateRequest, CalculateResponse, Calculator, CalculatorClient, CalculatorService,
    ComputeAverageRequest, ComputeAverageResponse, FindMaximumRequest, FindMaximumResponse,
    PrimeNumberRequest, PrimeNumberResponse, SquareRootRequest, SquareRootResponse,
    prime_factors,
};
pub use config::ClientConfig;
pub use greet::{GREET_MANY_TIMES_COUNT, GreetResponse, GreetService, Greeter, GreeterClient, Greeting};
