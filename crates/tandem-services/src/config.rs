//! Client-side configuration for the typed service clients

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tandem::CallOptions;

/// Options shared by the typed clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Per-call timeout and channel capacity
    #[serde(flatten)]
    pub call: CallOptions,
    /// Delay between frames of a client-streaming call
    #[serde(with = "tandem::duration_ms", default = "default_client_stream_pacing")]
    pub client_stream_pacing: Duration,
    /// Delay between outbound frames of a bidi call
    #[serde(with = "tandem::duration_ms", default = "default_bidi_pacing")]
    pub bidi_pacing: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            call: CallOptions::default(),
            client_stream_pacing: default_client_stream_pacing(),
            bidi_pacing: default_bidi_pacing(),
        }
    }
}

impl ClientConfig {
    /// Config with no delay between frames, for tests and batch use.
    pub fn unpaced() -> Self {
        Self {
            client_stream_pacing: Duration::ZERO,
            bidi_pacing: Duration::ZERO,
            ..Self::default()
        }
    }

    pub(crate) fn client_stream_pacing(&self) -> Option<Duration> {
        pacing(self.client_stream_pacing)
    }

    pub(crate) fn bidi_pacing(&self) -> Option<Duration> {
        pacing(self.bidi_pacing)
    }
}

fn pacing(delay: Duration) -> Option<Duration> {
    (!delay.is_zero()).then_some(delay)
}

fn default_client_stream_pacing() -> Duration {
    Duration::from_millis(100)
}

fn default_bidi_pacing() -> Duration {
    Duration::from_millis(1000)
}
