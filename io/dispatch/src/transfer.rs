//! Per-operation transfer records and their readiness state machines.
//!
//! Each pending async operation is one record in a FIFO queue. A record moves
//! from active to done in a single step: either the cursor reaches the total,
//! or a peer closure is absorbed. The readiness handler performs exactly one
//! recv/send per call; the dispatch loop keeps calling it until the kernel
//! reports would-block, which is what edge-triggered backends require.

use std::io;

use tracing::debug;

use crate::block::PinnedBlock;
use crate::buffer::Buffer;
use crate::conn::Connection;
use crate::dispatcher::{ReadBlockCallback, ReadCallback, WriteCallback};
use crate::types::ConnId;

/// Outcome of driving a record once.
pub(crate) enum Step<C: Connection> {
    /// Progress was made (or the call should be retried immediately) and the
    /// transfer is not finished.
    Partial,
    /// The kernel buffer is drained; wait for the next readiness event.
    Blocked,
    /// The transfer finished; deliver this completion.
    Complete(Completion<C>),
}

/// A completion extracted from a finished record.
///
/// Extraction happens while queue borrows are still alive; the callback runs
/// afterwards with a fresh context borrow, so completion callbacks are free to
/// enqueue further operations.
pub(crate) enum Completion<C: Connection> {
    Read {
        cb: Option<ReadCallback<C>>,
        buffer: Buffer,
    },
    ReadBlock {
        cb: Option<ReadBlockCallback<C>>,
        block: PinnedBlock,
    },
    Write {
        cb: Option<WriteCallback<C>>,
        /// Spent payload allocation, returned to the buffer pool.
        spent: Option<Vec<u8>>,
    },
}

enum IoStatus {
    Bytes(usize),
    /// Would-block: keep the registration, wait for the next event.
    Blocked,
    /// Interrupted by a signal: retry immediately.
    Retry,
    /// Peer closed the stream; absorb and complete.
    Closed,
    Failed(io::Error),
}

fn classify(res: io::Result<usize>) -> IoStatus {
    match res {
        Ok(0) => IoStatus::Closed,
        Ok(n) => IoStatus::Bytes(n),
        Err(e) => match e.kind() {
            io::ErrorKind::WouldBlock => IoStatus::Blocked,
            io::ErrorKind::Interrupted => IoStatus::Retry,
            io::ErrorKind::BrokenPipe
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::UnexpectedEof => IoStatus::Closed,
            _ => IoStatus::Failed(e),
        },
    }
}

/// Buffered read: fill an owned buffer of exactly `total` bytes.
pub(crate) struct ReadTransfer<C: Connection> {
    pub(crate) conn: ConnId,
    pub(crate) seq: u64,
    buffer: Option<Buffer>,
    pos: usize,
    total: usize,
    cb: Option<ReadCallback<C>>,
}

impl<C: Connection> ReadTransfer<C> {
    pub(crate) fn new(conn: ConnId, seq: u64, buffer: Buffer, cb: Option<ReadCallback<C>>) -> Self {
        let total = buffer.len();
        Self {
            conn,
            seq,
            buffer: Some(buffer),
            pos: 0,
            total,
            cb,
        }
    }

    pub(crate) fn is_done(&self) -> bool {
        self.pos == self.total || self.buffer.is_none()
    }

    pub(crate) fn on_ready(&mut self, conn: &mut C) -> io::Result<Step<C>> {
        let Some(buffer) = self.buffer.as_mut() else {
            return Ok(Step::Blocked);
        };
        match classify(conn.recv_one(&mut buffer[self.pos..self.total])) {
            IoStatus::Bytes(n) => {
                self.pos += n;
                if self.pos == self.total {
                    Ok(Step::Complete(Completion::Read {
                        cb: self.cb.take(),
                        buffer: self.buffer.take().unwrap_or_default(),
                    }))
                } else {
                    Ok(Step::Partial)
                }
            }
            IoStatus::Blocked => Ok(Step::Blocked),
            IoStatus::Retry => Ok(Step::Partial),
            IoStatus::Closed => {
                // Partially read bytes are dropped: closure before completion
                // delivers an empty buffer.
                debug!(conn = %self.conn, read = self.pos, of = self.total, "peer closed during buffered read");
                self.pos = self.total;
                self.buffer = None;
                Ok(Step::Complete(Completion::Read {
                    cb: self.cb.take(),
                    buffer: Buffer::new(),
                }))
            }
            IoStatus::Failed(e) => Err(e),
        }
    }

    /// Force completion with an empty payload, for cancellation.
    pub(crate) fn cancel(&mut self) -> Completion<C> {
        self.pos = self.total;
        self.buffer = None;
        Completion::Read {
            cb: self.cb.take(),
            buffer: Buffer::new(),
        }
    }
}

/// Buffered write: drain an owned buffer onto the wire.
pub(crate) struct WriteTransfer<C: Connection> {
    pub(crate) conn: ConnId,
    pub(crate) seq: u64,
    buffer: Option<Buffer>,
    pos: usize,
    total: usize,
    cb: Option<WriteCallback<C>>,
}

impl<C: Connection> WriteTransfer<C> {
    pub(crate) fn new(conn: ConnId, seq: u64, buffer: Buffer, cb: Option<WriteCallback<C>>) -> Self {
        let total = buffer.len();
        Self {
            conn,
            seq,
            buffer: Some(buffer),
            pos: 0,
            total,
            cb,
        }
    }

    pub(crate) fn is_done(&self) -> bool {
        self.pos == self.total
    }

    pub(crate) fn on_ready(&mut self, conn: &mut C) -> io::Result<Step<C>> {
        let Some(buffer) = self.buffer.as_ref() else {
            return Ok(Step::Blocked);
        };
        match classify(conn.send_one(&buffer[self.pos..self.total])) {
            IoStatus::Bytes(n) => {
                self.pos += n;
                if self.pos == self.total {
                    Ok(Step::Complete(self.finish()))
                } else {
                    Ok(Step::Partial)
                }
            }
            IoStatus::Blocked => Ok(Step::Blocked),
            IoStatus::Retry => Ok(Step::Partial),
            IoStatus::Closed => {
                debug!(conn = %self.conn, sent = self.pos, of = self.total, "peer closed during buffered write");
                self.pos = self.total;
                Ok(Step::Complete(self.finish()))
            }
            IoStatus::Failed(e) => Err(e),
        }
    }

    pub(crate) fn cancel(&mut self) -> Completion<C> {
        self.pos = self.total;
        self.finish()
    }

    fn finish(&mut self) -> Completion<C> {
        Completion::Write {
            cb: self.cb.take(),
            spent: self.buffer.take().map(Buffer::into_vec),
        }
    }
}

/// Block read: fill the leading `total` bytes of a pinned block.
pub(crate) struct BlockReadTransfer<C: Connection> {
    pub(crate) conn: ConnId,
    pub(crate) seq: u64,
    block: Option<PinnedBlock>,
    pos: usize,
    total: usize,
    cb: Option<ReadBlockCallback<C>>,
}

impl<C: Connection> BlockReadTransfer<C> {
    pub(crate) fn new(
        conn: ConnId,
        seq: u64,
        total: usize,
        block: PinnedBlock,
        cb: Option<ReadBlockCallback<C>>,
    ) -> Self {
        debug_assert!(total <= block.len());
        Self {
            conn,
            seq,
            block: Some(block),
            pos: 0,
            total,
            cb,
        }
    }

    pub(crate) fn is_done(&self) -> bool {
        self.pos == self.total || self.block.is_none()
    }

    pub(crate) fn on_ready(&mut self, conn: &mut C) -> io::Result<Step<C>> {
        let Some(block) = self.block.as_ref() else {
            return Ok(Step::Blocked);
        };
        let res = block.with_mut(|bytes| conn.recv_one(&mut bytes[self.pos..self.total]));
        match classify(res) {
            IoStatus::Bytes(n) => {
                self.pos += n;
                if self.pos == self.total {
                    Ok(Step::Complete(self.finish()))
                } else {
                    Ok(Step::Partial)
                }
            }
            IoStatus::Blocked => Ok(Step::Blocked),
            IoStatus::Retry => Ok(Step::Partial),
            IoStatus::Closed => {
                // Unlike the buffered path, the block (with whatever bytes
                // arrived) is still handed over by move.
                debug!(conn = %self.conn, read = self.pos, of = self.total, "peer closed during block read");
                self.pos = self.total;
                Ok(Step::Complete(self.finish()))
            }
            IoStatus::Failed(e) => Err(e),
        }
    }

    pub(crate) fn cancel(&mut self) -> Completion<C> {
        self.pos = self.total;
        self.finish()
    }

    fn finish(&mut self) -> Completion<C> {
        Completion::ReadBlock {
            cb: self.cb.take(),
            block: self.block.take().unwrap_or_else(|| PinnedBlock::zeroed(0)),
        }
    }
}

/// Block write: drain a pinned block onto the wire.
///
/// The record holds a pin for the duration of the transfer; the caller keeps
/// its own handle.
pub(crate) struct BlockWriteTransfer<C: Connection> {
    pub(crate) conn: ConnId,
    pub(crate) seq: u64,
    block: PinnedBlock,
    pos: usize,
    total: usize,
    cb: Option<WriteCallback<C>>,
}

impl<C: Connection> BlockWriteTransfer<C> {
    pub(crate) fn new(
        conn: ConnId,
        seq: u64,
        block: PinnedBlock,
        cb: Option<WriteCallback<C>>,
    ) -> Self {
        let total = block.len();
        Self {
            conn,
            seq,
            block,
            pos: 0,
            total,
            cb,
        }
    }

    pub(crate) fn is_done(&self) -> bool {
        self.pos == self.total
    }

    pub(crate) fn on_ready(&mut self, conn: &mut C) -> io::Result<Step<C>> {
        let res = self
            .block
            .with(|bytes| conn.send_one(&bytes[self.pos..self.total]));
        match classify(res) {
            IoStatus::Bytes(n) => {
                self.pos += n;
                if self.pos == self.total {
                    Ok(Step::Complete(self.finish()))
                } else {
                    Ok(Step::Partial)
                }
            }
            IoStatus::Blocked => Ok(Step::Blocked),
            IoStatus::Retry => Ok(Step::Partial),
            IoStatus::Closed => {
                debug!(conn = %self.conn, sent = self.pos, of = self.total, "peer closed during block write");
                self.pos = self.total;
                Ok(Step::Complete(self.finish()))
            }
            IoStatus::Failed(e) => Err(e),
        }
    }

    pub(crate) fn cancel(&mut self) -> Completion<C> {
        self.pos = self.total;
        self.finish()
    }

    fn finish(&mut self) -> Completion<C> {
        Completion::Write {
            cb: self.cb.take(),
            spent: None,
        }
    }
}
