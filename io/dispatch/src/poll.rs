//! Multiplexer backend contract and the mio implementation.
//!
//! Backends own no transfer-level state: they map a connection id to the set
//! of directions being watched and report readiness. The shipped backend uses
//! mio, which is epoll on Linux and kqueue on the BSDs/macOS. mio delivers
//! edge-triggered events, so the dispatcher drains each ready direction until
//! the kernel reports would-block before going back to waiting.

use std::collections::HashMap;
use std::io;
use std::os::unix::io::RawFd;
use std::sync::Arc;
use std::time::Duration;

use mio::unix::SourceFd;
use mio::{Events, Interest, Poll, Token, Waker};

use crate::types::{ConnId, Readiness};

/// Token reserved for the wakeup channel; never collides with connection
/// slots.
const WAKER_TOKEN: Token = Token(usize::MAX);

/// Default readiness event capacity per wait.
pub(crate) const DEFAULT_EVENTS_CAPACITY: usize = 1024;

/// Wakes a blocked [`Multiplexer::wait`] from another thread.
///
/// The wakeup consumes no readiness reports: the next wait simply returns
/// early without firing any transfer handler.
pub trait Interrupt: Send + Sync {
    /// Cause the next (or current) wait to return promptly.
    fn interrupt(&self) -> io::Result<()>;
}

impl Interrupt for Waker {
    fn interrupt(&self) -> io::Result<()> {
        self.wake()
    }
}

/// Readiness-notification backend the dispatcher drives.
///
/// Watch registration is idempotent per (connection, direction): adding an
/// already-watched direction is a no-op, and removal of the last direction
/// drops the descriptor from the poll set entirely.
pub trait Multiplexer {
    /// Watch `fd` for read readiness on behalf of `conn`.
    fn add_read(&mut self, fd: RawFd, conn: ConnId) -> io::Result<()>;

    /// Watch `fd` for write readiness on behalf of `conn`.
    fn add_write(&mut self, fd: RawFd, conn: ConnId) -> io::Result<()>;

    /// Stop watching the read direction for `conn`.
    fn remove_read(&mut self, conn: ConnId);

    /// Stop watching the write direction for `conn`.
    fn remove_write(&mut self, conn: ConnId);

    /// Drop both directions for `conn`.
    fn cancel(&mut self, conn: ConnId);

    /// Block for up to `timeout`, appending one [`Readiness`] per ready
    /// connection to `ready`. Directions not currently watched are masked
    /// out. Returns with an empty list on timeout or interruption.
    fn wait(&mut self, timeout: Duration, ready: &mut Vec<Readiness>) -> io::Result<()>;

    /// A handle other threads can use to unblock [`Multiplexer::wait`].
    fn interrupter(&self) -> Arc<dyn Interrupt>;
}

struct Watch {
    fd: RawFd,
    readable: bool,
    writable: bool,
}

impl Watch {
    fn interests(&self) -> Option<Interest> {
        match (self.readable, self.writable) {
            (true, true) => Some(Interest::READABLE | Interest::WRITABLE),
            (true, false) => Some(Interest::READABLE),
            (false, true) => Some(Interest::WRITABLE),
            (false, false) => None,
        }
    }
}

/// mio-backed multiplexer (epoll/kqueue).
pub struct MioMultiplexer {
    poll: Poll,
    events: Events,
    waker: Arc<Waker>,
    watches: HashMap<usize, Watch>,
}

impl MioMultiplexer {
    /// Create a backend with the default event capacity.
    pub fn new() -> io::Result<Self> {
        Self::with_capacity(DEFAULT_EVENTS_CAPACITY)
    }

    /// Create a backend sized for `events` readiness reports per wait.
    pub fn with_capacity(events: usize) -> io::Result<Self> {
        let poll = Poll::new()?;
        let waker = Arc::new(Waker::new(poll.registry(), WAKER_TOKEN)?);
        Ok(Self {
            poll,
            events: Events::with_capacity(events),
            waker,
            watches: HashMap::new(),
        })
    }

    fn set(&mut self, fd: RawFd, conn: ConnId, readable: bool, writable: bool) -> io::Result<()> {
        let key = conn.as_usize();
        match self.watches.get_mut(&key) {
            Some(watch) => {
                let wanted_r = watch.readable || readable;
                let wanted_w = watch.writable || writable;
                if wanted_r == watch.readable && wanted_w == watch.writable {
                    return Ok(());
                }
                watch.readable = wanted_r;
                watch.writable = wanted_w;
                let interests = watch.interests().expect("at least one direction set");
                self.poll
                    .registry()
                    .reregister(&mut SourceFd(&fd), Token(key), interests)
            }
            None => {
                let watch = Watch {
                    fd,
                    readable,
                    writable,
                };
                let interests = watch.interests().expect("at least one direction set");
                self.poll
                    .registry()
                    .register(&mut SourceFd(&fd), Token(key), interests)?;
                self.watches.insert(key, watch);
                Ok(())
            }
        }
    }

    fn clear(&mut self, conn: ConnId, readable: bool, writable: bool) {
        let key = conn.as_usize();
        let Some(watch) = self.watches.get_mut(&key) else {
            return;
        };
        if readable {
            watch.readable = false;
        }
        if writable {
            watch.writable = false;
        }
        let fd = watch.fd;
        match watch.interests() {
            Some(interests) => {
                // Closed fds are dropped from the poll set by the kernel;
                // a failed downgrade is not actionable.
                let _ = self
                    .poll
                    .registry()
                    .reregister(&mut SourceFd(&fd), Token(key), interests);
            }
            None => {
                let _ = self.poll.registry().deregister(&mut SourceFd(&fd));
                self.watches.remove(&key);
            }
        }
    }
}

impl Multiplexer for MioMultiplexer {
    fn add_read(&mut self, fd: RawFd, conn: ConnId) -> io::Result<()> {
        self.set(fd, conn, true, false)
    }

    fn add_write(&mut self, fd: RawFd, conn: ConnId) -> io::Result<()> {
        self.set(fd, conn, false, true)
    }

    fn remove_read(&mut self, conn: ConnId) {
        self.clear(conn, true, false);
    }

    fn remove_write(&mut self, conn: ConnId) {
        self.clear(conn, false, true);
    }

    fn cancel(&mut self, conn: ConnId) {
        self.clear(conn, true, true);
    }

    fn wait(&mut self, timeout: Duration, ready: &mut Vec<Readiness>) -> io::Result<()> {
        match self.poll.poll(&mut self.events, Some(timeout)) {
            Ok(()) => {}
            // A signal landed mid-wait; the caller recomputes its deadline.
            Err(e) if e.kind() == io::ErrorKind::Interrupted => return Ok(()),
            Err(e) => return Err(e),
        }

        for event in self.events.iter() {
            if event.token() == WAKER_TOKEN {
                continue;
            }
            let key = event.token().0;
            let Some(watch) = self.watches.get(&key) else {
                continue;
            };
            // Errors and half-closes surface through the watched directions
            // so the transfer sees the recv/send result and classifies it.
            let readable = watch.readable
                && (event.is_readable() || event.is_read_closed() || event.is_error());
            let writable = watch.writable
                && (event.is_writable() || event.is_write_closed() || event.is_error());
            if readable || writable {
                ready.push(Readiness {
                    conn: ConnId::from_usize(key),
                    readable,
                    writable,
                });
            }
        }
        Ok(())
    }

    fn interrupter(&self) -> Arc<dyn Interrupt> {
        self.waker.clone()
    }
}
