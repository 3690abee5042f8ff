//! Pipeline configuration.

use std::time::Duration;

/// What to do with a request arriving at a full ingress buffer.
///
/// Backpressure is the only policy that preserves all requests; every other
/// policy propagates the loss back to the affected caller as a
/// [`BufferOverflow`] error answer rather than dropping silently.
///
/// [`BufferOverflow`]: crate::error::ErrorType::BufferOverflow
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[non_exhaustive]
pub enum OverflowPolicy {
    /// Producers wait until the buffer has room.
    Backpressure,
    /// The arriving request is rejected.
    DropNew,
    /// The oldest buffered request is rejected to make room.
    DropOld,
    /// The entire buffer is rejected to make room.
    DropBuffer,
    /// The arriving request is rejected and the ingress closes; subsequent
    /// submissions observe a shut-down pipeline.
    Fail,
}

/// Configuration of a pipeline.
///
/// Refer to each field for its default.
#[derive(Clone, Debug)]
pub struct Config {
    /// Capacity of the ingress buffer, which also bounds the retry channel
    /// and the answer channel.
    ///
    /// Defaults to 100.
    pub buffer_size: usize,
    /// Timeout of a single HTTP send.
    ///
    /// Defaults to 30 seconds.
    pub http_timeout: Duration,
    /// Emit a debug log line for ratelimit header observations.
    ///
    /// Defaults to `false`.
    pub log_ratelimit_events: bool,
    /// Emit a debug log line for every received response.
    ///
    /// Defaults to `false`.
    pub log_received_rest: bool,
    /// Emit a debug log line for every sent request.
    ///
    /// Defaults to `false`.
    pub log_sent_rest: bool,
    /// Longest predicted ratelimit wait before a request is dropped instead
    /// of deferred. The bound is inclusive.
    ///
    /// Defaults to 2 minutes.
    pub max_allowed_wait: Duration,
    /// How often a failed request is re-sent. Zero disables the retry layer.
    ///
    /// Defaults to 3.
    pub max_retries: u32,
    /// Ask the API for millisecond-precision reset headers.
    ///
    /// Defaults to `true`.
    pub millisecond_precision: bool,
    /// Policy for requests arriving at a full ingress buffer.
    ///
    /// Defaults to [`OverflowPolicy::Backpressure`].
    pub overflow: OverflowPolicy,
    /// Maximum number of in-flight HTTP sends.
    ///
    /// Defaults to 4.
    pub parallelism: usize,
    /// Prefer the relative reset-after header over the absolute reset
    /// timestamp, which is robust when the local clock skews from the API's.
    ///
    /// Defaults to `true`.
    pub relative_time: bool,
}

impl Config {
    /// Create a configuration with every field at its default.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            buffer_size: 100,
            http_timeout: Duration::from_secs(30),
            log_ratelimit_events: false,
            log_received_rest: false,
            log_sent_rest: false,
            max_allowed_wait: Duration::from_secs(120),
            max_retries: 3,
            millisecond_precision: true,
            overflow: OverflowPolicy::Backpressure,
            parallelism: 4,
            relative_time: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{Config, OverflowPolicy};
    use static_assertions::assert_impl_all;
    use std::{fmt::Debug, time::Duration};

    assert_impl_all!(Config: Clone, Debug, Send, Sync);
    assert_impl_all!(OverflowPolicy: Clone, Copy, Debug, Eq, PartialEq, Send, Sync);

    #[test]
    fn defaults() {
        let config = Config::new();

        assert_eq!(100, config.buffer_size);
        assert_eq!(Duration::from_secs(30), config.http_timeout);
        assert_eq!(Duration::from_secs(120), config.max_allowed_wait);
        assert_eq!(3, config.max_retries);
        assert_eq!(OverflowPolicy::Backpressure, config.overflow);
        assert_eq!(4, config.parallelism);
        assert!(config.millisecond_precision);
        assert!(config.relative_time);
    }
}
