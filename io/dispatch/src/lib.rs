//! io-dispatch - single-threaded asynchronous I/O dispatcher.
//!
//! A readiness-driven event loop that multiplexes many byte-stream
//! connections over one thread: exact-length buffered and pinned-block reads
//! and writes with completion callbacks, plus repeating timers fired from a
//! monotonic priority heap whose next deadline paces the poll timeout.
//!
//! # Model
//!
//! - **One thread.** Every callback runs on the thread that calls
//!   [`Dispatcher::run`] (or [`Dispatcher::dispatch`] in tests). The only
//!   blocking point is the backend wait. From other threads, only the
//!   [`DispatcherHandle`] operations (`terminate`, `interrupt`) are safe.
//! - **FIFO per connection and direction.** Completion callbacks fire in
//!   enqueue order for a given connection and direction; there is no ordering
//!   across connections.
//! - **Absorbed closures.** Peer closure mid-transfer is not an error: the
//!   completion callback fires with an empty buffer (buffered reads), the
//!   moved block (block reads), or normally (writes). Anything else the
//!   transport reports is fatal and unwinds out of the loop.
//!
//! # Quick Start
//!
//! ```ignore
//! use io_dispatch::{Dispatcher, TcpConnection};
//! use std::time::Duration;
//!
//! let mut dispatcher = Dispatcher::new()?;
//! let conn = dispatcher.register(TcpConnection::connect("10.0.0.1:9000")?);
//!
//! dispatcher.async_write_copy(conn, "hello")?;
//! dispatcher.async_read(conn, 5, |ctx, conn, buffer| {
//!     println!("got {} bytes", buffer.len());
//!     ctx.terminate();
//! })?;
//!
//! dispatcher.add_timer(Duration::from_secs(1), |ctx| {
//!     println!("tick");
//!     true // keep repeating
//! });
//!
//! dispatcher.run()?;
//! ```
//!
//! # Backends
//!
//! The dispatcher drives any [`Multiplexer`]; the shipped [`MioMultiplexer`]
//! uses mio (epoll on Linux, kqueue on the BSDs and macOS).

pub mod block;
pub mod buffer;
mod builder;
pub mod conn;
mod dispatcher;
pub mod error;
pub mod poll;
mod pool;
mod registry;
mod timer;
mod transfer;
pub mod types;

// Public API re-exports
pub use block::PinnedBlock;
pub use buffer::Buffer;
pub use builder::{DEFAULT_IDLE_WAIT, DEFAULT_MIN_WAIT, DispatcherBuilder};
pub use conn::{Connection, TcpConnection};
pub use dispatcher::{
    DispatchCtx, Dispatcher, DispatcherHandle, ReadBlockCallback, ReadCallback, TimerCallback,
    WriteCallback,
};
pub use error::{Error, Result};
pub use poll::{Interrupt, MioMultiplexer, Multiplexer};
pub use types::{ConnId, Readiness};
