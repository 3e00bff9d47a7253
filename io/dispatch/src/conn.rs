//! Connection contract and the TCP implementation.

use std::fmt;
use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::os::unix::io::{AsRawFd, RawFd};

/// A nonblocking byte-stream connection the dispatcher can multiplex.
///
/// The dispatcher owns registered connections and drives them through
/// one-shot `recv_one`/`send_one` calls from its readiness handlers. The raw
/// fd is used only for backend registration; the `Display` impl supplies the
/// diagnostic string attached to fatal transfer errors. Connections are
/// owned for the life of the dispatcher, hence the `'static` bound.
pub trait Connection: AsRawFd + fmt::Display + 'static {
    /// One nonblocking receive into `buf`.
    ///
    /// Returns the byte count on progress, `Ok(0)` when the peer closed the
    /// stream, and `WouldBlock`/`Interrupted` errors for transient conditions.
    fn recv_one(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// One nonblocking send of `buf`.
    ///
    /// Returns the byte count accepted by the kernel, with the same transient
    /// error conventions as [`Connection::recv_one`].
    fn send_one(&mut self, buf: &[u8]) -> io::Result<usize>;

    /// Whether the handle still refers to a live socket.
    fn is_valid(&self) -> bool;
}

/// A TCP stream in nonblocking mode.
pub struct TcpConnection {
    stream: TcpStream,
    peer: Option<SocketAddr>,
    local: Option<SocketAddr>,
}

impl TcpConnection {
    /// Wrap an already-connected stream, switching it to nonblocking mode.
    pub fn new(stream: TcpStream) -> io::Result<Self> {
        stream.set_nonblocking(true)?;
        let peer = stream.peer_addr().ok();
        let local = stream.local_addr().ok();
        Ok(Self {
            stream,
            peer,
            local,
        })
    }

    /// Connect to `addr` and wrap the resulting stream.
    pub fn connect<A: ToSocketAddrs>(addr: A) -> io::Result<Self> {
        Self::new(TcpStream::connect(addr)?)
    }

    /// The remote address, if known.
    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer
    }

    /// The local address, if known.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local
    }

    /// Access the underlying stream, e.g. to set socket options.
    pub fn stream(&self) -> &TcpStream {
        &self.stream
    }
}

impl Connection for TcpConnection {
    fn recv_one(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.stream.read(buf)
    }

    fn send_one(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.stream.write(buf)
    }

    fn is_valid(&self) -> bool {
        self.stream.as_raw_fd() >= 0
    }
}

impl AsRawFd for TcpConnection {
    fn as_raw_fd(&self) -> RawFd {
        self.stream.as_raw_fd()
    }
}

impl fmt::Display for TcpConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tcp fd={}", self.stream.as_raw_fd())?;
        if let Some(peer) = self.peer {
            write!(f, " peer={}", peer)?;
        }
        Ok(())
    }
}
