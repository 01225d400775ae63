//! Per-call options

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default number of frames a half-stream buffers before `send` waits.
pub const DEFAULT_CAPACITY: usize = 32;

/// Options applied to each call a [`Client`](crate::Client) makes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallOptions {
    /// Deadline for the whole call, measured from when it starts.
    /// `None` means the call may run forever.
    #[serde(default, with = "duration_ms::option")]
    pub timeout: Option<Duration>,
    /// Frames buffered per half-stream
    #[serde(default = "default_capacity")]
    pub capacity: usize,
}

impl Default for CallOptions {
    fn default() -> Self {
        Self {
            timeout: None,
            capacity: DEFAULT_CAPACITY,
        }
    }
}

impl CallOptions {
    /// Set the call timeout.
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Set the per-half buffer capacity. Zero is treated as one.
    #[must_use]
    pub fn capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    pub(crate) fn effective_capacity(&self) -> usize {
        self.capacity.max(1)
    }
}

fn default_capacity() -> usize {
    DEFAULT_CAPACITY
}

/// Serde helpers that carry a [`Duration`] as whole milliseconds.
///
/// Use with `#[serde(with = "tandem::duration_ms")]`, or
/// `tandem::duration_ms::option` for `Option<Duration>`. Durations past
/// `u64::MAX` milliseconds saturate.
pub mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    /// Serialize a duration as milliseconds.
    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        millis(duration).serialize(serializer)
    }

    /// Deserialize a duration from milliseconds.
    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let ms = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(ms))
    }

    fn millis(duration: &Duration) -> u64 {
        u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
    }

    /// The same encoding for `Option<Duration>`, with `None` as null.
    pub mod option {
        use std::time::Duration;

        use serde::{Deserialize, Deserializer, Serialize, Serializer};

        /// Serialize an optional duration as milliseconds.
        pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
        where
            S: Serializer,
        {
            duration.as_ref().map(super::millis).serialize(serializer)
        }

        /// Deserialize an optional duration from milliseconds.
        pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
        where
            D: Deserializer<'de>,
        {
            let ms = Option::<u64>::deserialize(deserializer)?;
            Ok(ms.map(Duration::from_millis))
        }
    }
}
