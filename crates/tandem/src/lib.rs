//! Tandem: Duplex Streaming Call Engine
//!
//! Tandem runs typed request/response calls between a caller and an
//! in-process handler over a duplex channel. Four call patterns are
//! supported: unary, server-streaming, client-streaming and bidirectional.
//!
//! # Architecture
//!
//! Every call owns one [`CallContext`] (cancellation plus an optional
//! deadline) and one channel made of two independent half-streams. Each end
//! can close its sending half without affecting the other half, and every
//! blocking point on either side observes the call's cancellation.
//!
//! Handlers never write the response trailer themselves. The drivers in
//! [`server`] do that once the handler returns, so every call has exactly
//! one terminal outcome.
//!
//! # Example Flow
//!
//! ```text
//! Caller                                    Handler
//! │                                           │
//! │  Message(5)                               │
//! │ ─────────────────────────────────────────>│
//! │                                           │
//! │                                Message(5) │
//! │<───────────────────────────────────────── │
//! │                                           │
//! │  Message(1)                               │
//! │ ─────────────────────────────────────────>│
//! │                                           │
//! │  End(ok)                                  │
//! │ ─────────────────────────────────────────>│
//! │                                           │
//! │                                   End(ok) │
//! │<───────────────────────────────────────── │
//! ```

pub mod channel;
mod client;
mod context;
pub mod deadline;
pub mod duplex;
mod options;
pub mod server;
mod status;

pub use channel::{ChannelMonitor, ChannelState, Direction, HalfState, Receiver, Sender, Sink};
pub use client::{BidiCall, Client, ClientStreamCall, ResponseStream, UnaryCall};
pub use context::CallContext;
pub use duplex::Exchange;
pub use options::{CallOptions, DEFAULT_CAPACITY, duration_ms};
pub use status::{Code, Status};
