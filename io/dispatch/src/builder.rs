//! Dispatcher builder with fluent API.

use std::time::Duration;

use crate::conn::Connection;
use crate::dispatcher::Dispatcher;
use crate::error::Result;
use crate::poll::{DEFAULT_EVENTS_CAPACITY, MioMultiplexer, Multiplexer};
use crate::pool;

/// Default upper bound on an idle wait when no timers are armed.
pub const DEFAULT_IDLE_WAIT: Duration = Duration::from_secs(10);

/// Default lower clamp on the wait so an already-due timer cannot busy-spin
/// the loop.
pub const DEFAULT_MIN_WAIT: Duration = Duration::from_millis(1);

/// Builder for a [`Dispatcher`] with custom configuration.
///
/// # Example
///
/// ```ignore
/// use io_dispatch::{DispatcherBuilder, TcpConnection};
/// use std::time::Duration;
///
/// let dispatcher = DispatcherBuilder::new()
///     .idle_wait(Duration::from_secs(1))
///     .events_capacity(256)
///     .build::<TcpConnection>()?;
/// ```
#[derive(Debug, Clone)]
pub struct DispatcherBuilder {
    idle_wait: Duration,
    min_wait: Duration,
    events_capacity: usize,
    pool_retain: usize,
    pool_buffer_cap: usize,
}

impl Default for DispatcherBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl DispatcherBuilder {
    /// Create a builder with default settings.
    pub fn new() -> Self {
        Self {
            idle_wait: DEFAULT_IDLE_WAIT,
            min_wait: DEFAULT_MIN_WAIT,
            events_capacity: DEFAULT_EVENTS_CAPACITY,
            pool_retain: pool::DEFAULT_RETAIN,
            pool_buffer_cap: pool::DEFAULT_BUFFER_CAP,
        }
    }

    /// Upper bound on a wait when no timers are armed.
    /// Default: 10 s.
    pub fn idle_wait(mut self, bound: Duration) -> Self {
        self.idle_wait = bound;
        self
    }

    /// Lower clamp on every wait.
    /// Default: 1 ms.
    pub fn min_wait(mut self, clamp: Duration) -> Self {
        self.min_wait = clamp;
        self
    }

    /// Readiness events collected per wait.
    /// Default: 1024.
    pub fn events_capacity(mut self, capacity: usize) -> Self {
        self.events_capacity = capacity;
        self
    }

    /// Number of spent payload vectors the buffer pool retains.
    /// Default: 64.
    pub fn pool_retain(mut self, count: usize) -> Self {
        self.pool_retain = count;
        self
    }

    /// Largest payload allocation the buffer pool will retain, in bytes.
    /// Default: 256 KiB.
    pub fn pool_buffer_cap(mut self, bytes: usize) -> Self {
        self.pool_buffer_cap = bytes;
        self
    }

    /// Build a dispatcher over the mio backend (epoll/kqueue).
    pub fn build<C: Connection>(self) -> Result<Dispatcher<C>> {
        let backend = MioMultiplexer::with_capacity(self.events_capacity)?;
        Ok(self.build_with(Box::new(backend)))
    }

    /// Build a dispatcher over a caller-supplied backend.
    pub fn build_with<C: Connection>(self, backend: Box<dyn Multiplexer>) -> Dispatcher<C> {
        Dispatcher::from_parts(
            backend,
            self.idle_wait,
            self.min_wait,
            self.pool_retain,
            self.pool_buffer_cap,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conn::TcpConnection;

    #[test]
    fn test_builder_defaults() {
        let builder = DispatcherBuilder::new();
        assert_eq!(builder.idle_wait, DEFAULT_IDLE_WAIT);
        assert_eq!(builder.min_wait, DEFAULT_MIN_WAIT);
        assert_eq!(builder.events_capacity, DEFAULT_EVENTS_CAPACITY);
    }

    #[test]
    fn test_builder_chaining() {
        let builder = DispatcherBuilder::new()
            .idle_wait(Duration::from_secs(2))
            .min_wait(Duration::from_millis(5))
            .events_capacity(64)
            .pool_retain(8)
            .pool_buffer_cap(4096);
        assert_eq!(builder.idle_wait, Duration::from_secs(2));
        assert_eq!(builder.min_wait, Duration::from_millis(5));
        assert_eq!(builder.events_capacity, 64);
        assert_eq!(builder.pool_retain, 8);
        assert_eq!(builder.pool_buffer_cap, 4096);
    }

    #[test]
    fn test_builder_build() {
        let result = DispatcherBuilder::new().build::<TcpConnection>();
        assert!(result.is_ok());
    }
}
