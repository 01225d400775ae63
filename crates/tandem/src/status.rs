//! Status codes exchanged between the two ends of a call.
//!
//! Every failed call carries exactly one [`Code`] and a free-text message.
//! Control flow should only ever branch on the code; the message is for
//! humans.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The fixed vocabulary of call outcomes.
///
/// Numeric values follow the well-known RPC status codes so they can be
/// carried over a wire format unchanged.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Code {
    /// The call completed successfully.
    Ok = 0,
    /// Either party aborted the call before natural completion.
    Cancelled = 1,
    /// The request payload violates a handler precondition.
    InvalidArgument = 3,
    /// The caller's time budget elapsed before the call completed.
    DeadlineExceeded = 4,
    /// Anything not attributable to the codes above.
    Internal = 13,
}

impl Code {
    /// Map a numeric status code back to a [`Code`].
    ///
    /// Numbers outside the vocabulary map to [`Code::Internal`].
    pub fn from_i32(value: i32) -> Self {
        match value {
            0 => Code::Ok,
            1 => Code::Cancelled,
            3 => Code::InvalidArgument,
            4 => Code::DeadlineExceeded,
            _ => Code::Internal,
        }
    }

    /// The numeric value of this code.
    pub fn as_i32(self) -> i32 {
        self as i32
    }

    /// Stable, human-readable name of the code.
    pub fn as_str(self) -> &'static str {
        match self {
            Code::Ok => "OK",
            Code::Cancelled => "Cancelled",
            Code::InvalidArgument => "InvalidArgument",
            Code::DeadlineExceeded => "DeadlineExceeded",
            Code::Internal => "Internal",
        }
    }
}

impl fmt::Display for Code {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A failed call outcome: one [`Code`] plus a message.
#[derive(Clone, Debug, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{code}: {message}")]
pub struct Status {
    code: Code,
    message: String,
}

impl Status {
    /// Create a status with the given code and message.
    pub fn new(code: Code, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// The request violated a handler precondition.
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::new(Code::InvalidArgument, message)
    }

    /// The call's deadline elapsed.
    pub fn deadline_exceeded(message: impl Into<String>) -> Self {
        Self::new(Code::DeadlineExceeded, message)
    }

    /// The call was aborted by either party.
    pub fn cancelled(message: impl Into<String>) -> Self {
        Self::new(Code::Cancelled, message)
    }

    /// Anything else, e.g. a transport failure or a panicking handler.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(Code::Internal, message)
    }

    /// The status code.
    pub fn code(&self) -> Code {
        self.code
    }

    /// The human-readable message.
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<tokio::task::JoinError> for Status {
    fn from(err: tokio::task::JoinError) -> Self {
        if err.is_cancelled() {
            Status::cancelled("task was aborted")
        } else {
            Status::internal(format!("handler panicked: {err}"))
        }
    }
}
