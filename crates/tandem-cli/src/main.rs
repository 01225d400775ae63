//! Tandem CLI - Demo client for the tandem call engine
//!
//! Runs one call against the in-process calculator or greeting service and
//! prints every frame and the final outcome.
//!
//! Usage:
//!   tandem calculate 15 25                 Unary
//!   tandem primes 32078938212              Server stream
//!   tandem average 10 20 33 27 46 93       Client stream
//!   tandem maximum 1 5 6 3 4 8 10 9        Bidi stream
//!   tandem sqrt -10                        Unary, rejected
//!   tandem greet-deadline George --deadline-ms 1000

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use serde_json::{Value, json};
use tokio_stream::StreamExt;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use tandem::{Code, ResponseStream, Status};
use tandem_services::{
    CalculatorClient, CalculatorService, ClientConfig, GreetResponse, GreetService, GreeterClient,
    Greeting,
};

/// Tandem - drive the reference services over every call pattern
#[derive(Parser, Debug)]
#[command(name = "tandem")]
#[command(about = "Demo client for the tandem duplex call engine")]
struct Args {
    /// JSON file with client options (timeout, capacity, pacing)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Per-call timeout in milliseconds
    #[arg(long)]
    timeout_ms: Option<u64>,

    /// Frames buffered per half-stream
    #[arg(long)]
    capacity: Option<usize>,

    /// Delay between client-stream frames in milliseconds
    #[arg(long)]
    client_stream_pacing_ms: Option<u64>,

    /// Delay between bidi frames in milliseconds
    #[arg(long)]
    bidi_pacing_ms: Option<u64>,

    /// Delay between streamed greetings in milliseconds
    #[arg(long, default_value_t = 1000)]
    interval_ms: u64,

    /// Print one JSON object per frame and outcome
    #[arg(long)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Add two numbers (unary)
    Calculate {
        #[arg(allow_negative_numbers = true)]
        num_one: i64,
        #[arg(allow_negative_numbers = true)]
        num_two: i64,
    },
    /// Stream the prime factors of a number (server stream)
    Primes {
        #[arg(allow_negative_numbers = true)]
        number: i64,
    },
    /// Average a sequence of numbers (client stream)
    Average {
        #[arg(required = true, allow_negative_numbers = true)]
        numbers: Vec<i64>,
    },
    /// Report each new maximum of a sequence (bidi stream)
    Maximum {
        #[arg(allow_negative_numbers = true, default_values_t = [1, 5, 6, 3, 4, 8, 10, 9])]
        numbers: Vec<i64>,
    },
    /// Square root of a number (unary)
    Sqrt {
        #[arg(allow_negative_numbers = true)]
        number: i64,
    },
    /// Greet once (unary)
    Greet {
        first_name: String,
        #[arg(default_value = "")]
        last_name: String,
    },
    /// Greet ten times (server stream)
    GreetMany { first_name: String },
    /// Greet everyone in one reply (client stream)
    LongGreet {
        #[arg(required = true)]
        first_names: Vec<String>,
    },
    /// Greet everyone one by one (bidi stream)
    GreetEveryone {
        #[arg(required = true)]
        first_names: Vec<String>,
    },
    /// Greet after three seconds of work, giving up at the deadline (unary)
    GreetDeadline {
        first_name: String,
        #[arg(long, default_value_t = 5000)]
        deadline_ms: u64,
    },
}

impl Command {
    fn method(&self) -> &'static str {
        match self {
            Command::Calculate { .. } => "calculate",
            Command::Primes { .. } => "prime_number_decomposition",
            Command::Average { .. } => "compute_average",
            Command::Maximum { .. } => "find_maximum",
            Command::Sqrt { .. } => "square_root",
            Command::Greet { .. } => "greet",
            Command::GreetMany { .. } => "greet_many_times",
            Command::LongGreet { .. } => "long_greet",
            Command::GreetEveryone { .. } => "greet_everyone",
            Command::GreetDeadline { .. } => "greet_with_deadline",
        }
    }
}

impl Args {
    fn client_config(&self) -> anyhow::Result<ClientConfig> {
        let mut config = match &self.config {
            Some(path) => load_config(path)?,
            None => ClientConfig::default(),
        };
        if let Some(ms) = self.timeout_ms {
            config.call.timeout = Some(Duration::from_millis(ms));
        }
        if let Some(capacity) = self.capacity {
            config.call.capacity = capacity;
        }
        if let Some(ms) = self.client_stream_pacing_ms {
            config.client_stream_pacing = Duration::from_millis(ms);
        }
        if let Some(ms) = self.bidi_pacing_ms {
            config.bidi_pacing = Duration::from_millis(ms);
        }
        Ok(config)
    }
}

fn load_config(path: &Path) -> anyhow::Result<ClientConfig> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("invalid config {}", path.display()))
}

/// Writes frames and outcomes as text or JSON lines.
struct Printer {
    method: &'static str,
    json: bool,
}

impl Printer {
    fn frame(&self, value: Value) {
        if self.json {
            println!("{}", json!({ "method": self.method, "frame": value }));
        } else {
            println!("Response from {}: {}", self.method, display(&value));
        }
    }

    /// Print the outcome, returning whether the call succeeded.
    fn outcome(&self, outcome: Result<Value, Status>) -> bool {
        match outcome {
            Ok(value) => {
                if self.json {
                    println!("{}", json!({ "method": self.method, "ok": value }));
                } else {
                    println!("{} completed: {}", self.method, display(&value));
                }
                true
            }
            Err(status) => {
                if self.json {
                    println!("{}", json!({ "method": self.method, "error": status }));
                } else {
                    println!("{} failed: {status}", self.method);
                    match status.code() {
                        Code::InvalidArgument => println!("We probably sent a bad argument"),
                        Code::DeadlineExceeded => println!("Timeout was hit! Deadline was exceeded"),
                        _ => {}
                    }
                }
                false
            }
        }
    }
}

fn display(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn greetings(first_names: Vec<String>) -> Vec<Greeting> {
    first_names
        .into_iter()
        .map(|name| Greeting::new(name, ""))
        .collect()
}

async fn print_greetings(
    mut stream: ResponseStream<GreetResponse>,
    out: &Printer,
) -> Result<Value, Status> {
    let mut count = 0;
    while let Some(frame) = stream.message().await? {
        out.frame(json!(frame.result));
        count += 1;
    }
    Ok(json!(count))
}

async fn run(
    command: Command,
    config: ClientConfig,
    interval: Duration,
    out: &Printer,
) -> Result<Value, Status> {
    let calculator = CalculatorClient::new(Arc::new(CalculatorService), config.clone());
    let greeter = GreeterClient::new(
        Arc::new(GreetService::new().with_interval(interval)),
        config,
    );

    match command {
        Command::Calculate { num_one, num_two } => {
            Ok(json!(calculator.calculate(num_one, num_two).await?))
        }
        Command::Primes { number } => {
            let stream = calculator.prime_number_decomposition(number).await?;
            let mut frames = std::pin::pin!(stream.into_stream());
            let mut factors = Vec::new();
            while let Some(frame) = frames.next().await {
                let factor = frame?.result;
                out.frame(json!(factor));
                factors.push(factor);
            }
            Ok(json!(factors))
        }
        Command::Average { numbers } => Ok(json!(calculator.compute_average(numbers).await?)),
        Command::Maximum { numbers } => Ok(json!(calculator.find_maximum(numbers).await?)),
        Command::Sqrt { number } => Ok(json!(calculator.square_root(number).await?)),
        Command::Greet {
            first_name,
            last_name,
        } => Ok(json!(
            greeter.greet(Greeting::new(first_name, last_name)).await?
        )),
        Command::GreetMany { first_name } => {
            let stream = greeter
                .greet_many_times(Greeting::new(first_name, ""))
                .await?;
            print_greetings(stream, out).await
        }
        Command::LongGreet { first_names } => {
            Ok(json!(greeter.long_greet(greetings(first_names)).await?))
        }
        Command::GreetEveryone { first_names } => {
            let replies = greeter.greet_everyone(greetings(first_names)).await?;
            for reply in &replies {
                out.frame(json!(reply));
            }
            Ok(json!(replies.len()))
        }
        Command::GreetDeadline {
            first_name,
            deadline_ms,
        } => Ok(json!(
            greeter
                .greet_with_deadline(
                    Greeting::new(first_name, ""),
                    Duration::from_millis(deadline_ms)
                )
                .await?
        )),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    // Logs go to stderr so stdout stays machine-readable with --json
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    let args = Args::parse();
    let config = args.client_config()?;
    let interval = Duration::from_millis(args.interval_ms);
    let out = Printer {
        method: args.command.method(),
        json: args.json,
    };

    tracing::debug!("Running {} with {:?}", out.method, config);
    let outcome = run(args.command, config, interval, &out).await;

    if out.outcome(outcome) {
        Ok(ExitCode::SUCCESS)
    } else {
        Ok(ExitCode::FAILURE)
    }
}
