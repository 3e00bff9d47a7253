//! The dispatcher: timer heap, transfer queues, and the event loop.
//!
//! One thread owns the dispatcher and everything it touches. The only
//! suspension point is the backend wait; every callback runs on the loop
//! thread and must not block, though it is free to enqueue further async
//! operations through the [`DispatchCtx`] it receives.

use std::collections::VecDeque;
use std::io;
use std::os::unix::io::{AsRawFd, RawFd};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use tracing::{debug, trace};

use crate::block::PinnedBlock;
use crate::buffer::Buffer;
use crate::builder::DispatcherBuilder;
use crate::conn::Connection;
use crate::error::{Error, Result};
use crate::poll::{Interrupt, Multiplexer};
use crate::pool::BufferPool;
use crate::registry::ConnTable;
use crate::timer::TimerHeap;
use crate::transfer::{
    BlockReadTransfer, BlockWriteTransfer, Completion, ReadTransfer, Step, WriteTransfer,
};
use crate::types::{ConnId, Readiness};

/// Completion callback for a buffered read.
///
/// The buffer holds exactly the requested byte count, or is empty if the peer
/// closed the stream (or the operation was cancelled) before the read
/// completed.
pub type ReadCallback<C> = Box<dyn FnOnce(&mut DispatchCtx<'_, C>, ConnId, Buffer)>;

/// Completion callback for a block read. The block is returned by move; on
/// peer closure it carries whatever bytes arrived before the close.
pub type ReadBlockCallback<C> = Box<dyn FnOnce(&mut DispatchCtx<'_, C>, ConnId, PinnedBlock)>;

/// Completion callback for a write, buffered or block. Fires once all bytes
/// are on the wire or a peer closure was absorbed mid-transfer.
pub type WriteCallback<C> = Box<dyn FnOnce(&mut DispatchCtx<'_, C>, ConnId)>;

/// Timer callback. Returning true reschedules the timer one interval after
/// its previous deadline (drift-free); false drops it.
pub type TimerCallback<C> = Box<dyn FnMut(&mut DispatchCtx<'_, C>) -> bool>;

/// Everything the dispatcher owns besides the backend; split out so a
/// [`DispatchCtx`] can borrow it alongside the backend.
pub(crate) struct Inner<C: Connection> {
    table: ConnTable<C>,
    timers: TimerHeap<TimerCallback<C>>,
    reads: VecDeque<ReadTransfer<C>>,
    block_reads: VecDeque<BlockReadTransfer<C>>,
    writes: VecDeque<WriteTransfer<C>>,
    block_writes: VecDeque<BlockWriteTransfer<C>>,
    pool: BufferPool,
    terminate: Arc<AtomicBool>,
    seq: u64,
    idle_wait: Duration,
    min_wait: Duration,
}

impl<C: Connection> Inner<C> {
    fn next_seq(&mut self) -> u64 {
        let seq = self.seq;
        self.seq += 1;
        seq
    }
}

/// Which read queue holds the head pending record for a connection.
enum ReadSlot {
    Buffer(usize),
    Block(usize),
}

/// Which write queue holds the head pending record for a connection.
enum WriteSlot {
    Buffer(usize),
    Block(usize),
}

/// Single-threaded asynchronous I/O dispatcher.
///
/// Multiplexes registered connections against a readiness backend, drives
/// exact-length reads and writes to completion in per-connection FIFO order,
/// and fires repeating timers from a monotonic priority heap.
pub struct Dispatcher<C: Connection> {
    backend: Box<dyn Multiplexer>,
    inner: Inner<C>,
    interrupter: Arc<dyn Interrupt>,
    ready: Vec<Readiness>,
}

/// Cross-thread control handle for a running dispatcher.
///
/// Only termination and wakeup are safe to drive from other threads; all
/// other operations belong to the loop thread.
#[derive(Clone)]
pub struct DispatcherHandle {
    terminate: Arc<AtomicBool>,
    interrupter: Arc<dyn Interrupt>,
}

impl DispatcherHandle {
    /// Request loop termination and wake the backend so the request is seen
    /// promptly. The loop exits after its current iteration.
    pub fn terminate(&self) {
        self.terminate.store(true, Ordering::Release);
        let _ = self.interrupter.interrupt();
    }

    /// Wake the backend from a blocked wait without terminating.
    pub fn interrupt(&self) -> io::Result<()> {
        self.interrupter.interrupt()
    }
}

impl<C: Connection> Dispatcher<C> {
    /// Create a dispatcher over the mio backend with default settings.
    pub fn new() -> Result<Self> {
        DispatcherBuilder::new().build()
    }

    /// Create a builder for custom configuration.
    pub fn builder() -> DispatcherBuilder {
        DispatcherBuilder::new()
    }

    pub(crate) fn from_parts(
        backend: Box<dyn Multiplexer>,
        idle_wait: Duration,
        min_wait: Duration,
        pool_retain: usize,
        pool_buffer_cap: usize,
    ) -> Self {
        let interrupter = backend.interrupter();
        Self {
            backend,
            inner: Inner {
                table: ConnTable::new(),
                timers: TimerHeap::new(),
                reads: VecDeque::new(),
                block_reads: VecDeque::new(),
                writes: VecDeque::new(),
                block_writes: VecDeque::new(),
                pool: BufferPool::new(pool_retain, pool_buffer_cap),
                terminate: Arc::new(AtomicBool::new(false)),
                seq: 0,
                idle_wait,
                min_wait,
            },
            interrupter,
            ready: Vec::new(),
        }
    }

    fn as_ctx(&mut self) -> DispatchCtx<'_, C> {
        DispatchCtx {
            backend: &mut *self.backend,
            inner: &mut self.inner,
        }
    }

    /// Hand a connection to the dispatcher.
    ///
    /// # Panics
    ///
    /// Panics if the connection is not valid.
    pub fn register(&mut self, conn: C) -> ConnId {
        assert!(conn.is_valid(), "cannot register invalid connection {conn}");
        let id = self.inner.table.insert(conn);
        trace!(%id, "registered connection");
        id
    }

    /// Cancel all pending work for `id` and take the connection back.
    ///
    /// Pending transfers complete with empty payloads (their callbacks fire
    /// exactly once, before this returns). Returns `None` for an unknown id.
    pub fn unregister(&mut self, id: ConnId) -> Option<C> {
        if !self.inner.table.contains(id) {
            return None;
        }
        self.as_ctx().cancel(id);
        self.inner.table.remove(id)
    }

    /// Borrow a registered connection.
    pub fn connection(&self, id: ConnId) -> Option<&C> {
        self.inner.table.get(id)
    }

    /// Mutably borrow a registered connection.
    pub fn connection_mut(&mut self, id: ConnId) -> Option<&mut C> {
        self.inner.table.get_mut(id)
    }

    /// Number of registered connections.
    pub fn connection_count(&self) -> usize {
        self.inner.table.len()
    }

    /// Register a relative timer.
    ///
    /// `cb` fires on the loop thread once `timeout` elapses; returning true
    /// reschedules it at the original cadence (`k * timeout` from now,
    /// independent of callback latency), returning false drops it.
    pub fn add_timer(
        &mut self,
        timeout: Duration,
        cb: impl FnMut(&mut DispatchCtx<'_, C>) -> bool + 'static,
    ) {
        self.as_ctx().add_timer(timeout, cb);
    }

    /// Read exactly `n` bytes and deliver them to `done_cb`.
    ///
    /// A zero-length read completes synchronously before this returns.
    pub fn async_read(
        &mut self,
        conn: ConnId,
        n: usize,
        done_cb: impl FnOnce(&mut DispatchCtx<'_, C>, ConnId, Buffer) + 'static,
    ) -> Result<()> {
        self.as_ctx().async_read(conn, n, done_cb)
    }

    /// Read exactly `n` bytes into `block` and deliver it to `done_cb`.
    pub fn async_read_block(
        &mut self,
        conn: ConnId,
        n: usize,
        block: PinnedBlock,
        done_cb: impl FnOnce(&mut DispatchCtx<'_, C>, ConnId, PinnedBlock) + 'static,
    ) -> Result<()> {
        self.as_ctx().async_read_block(conn, n, block, done_cb)
    }

    /// Write the entire buffer; no completion callback.
    pub fn async_write(&mut self, conn: ConnId, buffer: Buffer) -> Result<()> {
        self.as_ctx().async_write(conn, buffer)
    }

    /// Write the entire buffer and fire `done_cb` once it is on the wire.
    pub fn async_write_with(
        &mut self,
        conn: ConnId,
        buffer: Buffer,
        done_cb: impl FnOnce(&mut DispatchCtx<'_, C>, ConnId) + 'static,
    ) -> Result<()> {
        self.as_ctx().async_write_with(conn, buffer, done_cb)
    }

    /// Write the entire pinned block; the pin is retained until done.
    pub fn async_write_block(&mut self, conn: ConnId, block: PinnedBlock) -> Result<()> {
        self.as_ctx().async_write_block(conn, block)
    }

    /// Write the entire pinned block and fire `done_cb` when done.
    pub fn async_write_block_with(
        &mut self,
        conn: ConnId,
        block: PinnedBlock,
        done_cb: impl FnOnce(&mut DispatchCtx<'_, C>, ConnId) + 'static,
    ) -> Result<()> {
        self.as_ctx().async_write_block_with(conn, block, done_cb)
    }

    /// Copy `data` into an owned buffer and write it.
    pub fn async_write_copy(&mut self, conn: ConnId, data: impl AsRef<[u8]>) -> Result<()> {
        self.as_ctx().async_write_copy(conn, data)
    }

    /// Copy `data` into an owned buffer, write it, and fire `done_cb`.
    pub fn async_write_copy_with(
        &mut self,
        conn: ConnId,
        data: impl AsRef<[u8]>,
        done_cb: impl FnOnce(&mut DispatchCtx<'_, C>, ConnId) + 'static,
    ) -> Result<()> {
        self.as_ctx().async_write_copy_with(conn, data, done_cb)
    }

    /// Detach `conn` from the backend and complete every pending transfer on
    /// it with an empty payload, in enqueue order, before returning.
    pub fn cancel(&mut self, conn: ConnId) {
        self.as_ctx().cancel(conn);
    }

    /// Whether either write queue still holds records.
    pub fn has_async_writes(&self) -> bool {
        !self.inner.writes.is_empty() || !self.inner.block_writes.is_empty()
    }

    /// Request loop termination. `run` exits after the current iteration.
    pub fn terminate(&self) {
        self.inner.terminate.store(true, Ordering::Release);
    }

    /// Wake the backend from a blocked wait.
    pub fn interrupt(&self) -> io::Result<()> {
        self.interrupter.interrupt()
    }

    /// A cloneable handle for terminating or waking the loop from another
    /// thread.
    pub fn handle(&self) -> DispatcherHandle {
        DispatcherHandle {
            terminate: self.inner.terminate.clone(),
            interrupter: self.interrupter.clone(),
        }
    }

    /// One loop iteration: fire due timers, wait for readiness up to the next
    /// timer deadline, drive ready transfers, reap finished records.
    pub fn dispatch(&mut self) -> Result<()> {
        let now = Instant::now();

        // Fire timers that lie in the past. Rescheduling at deadline +
        // interval (not now + interval) makes a late iteration catch up
        // instead of drifting.
        while !self.inner.terminate.load(Ordering::Acquire) {
            let Some(mut timer) = self.inner.timers.pop_due(now) else {
                break;
            };
            let deadline = timer.deadline;
            let interval = timer.interval;
            let again = {
                let mut ctx = DispatchCtx {
                    backend: &mut *self.backend,
                    inner: &mut self.inner,
                };
                (timer.cb)(&mut ctx)
            };
            if again {
                self.inner
                    .timers
                    .schedule(deadline + interval, interval, timer.cb);
            }
        }

        if self.inner.terminate.load(Ordering::Acquire) {
            return Ok(());
        }

        let timeout = wait_budget(
            self.inner.timers.next_deadline(),
            now,
            self.inner.idle_wait,
            self.inner.min_wait,
        );
        trace!(?timeout, "waiting for readiness");

        let mut ready = std::mem::take(&mut self.ready);
        ready.clear();
        let outcome = match self.backend.wait(timeout, &mut ready) {
            Ok(()) => self.drive(&ready),
            Err(e) => Err(Error::Io(e)),
        };
        self.ready = ready;
        outcome?;

        self.reap();
        Ok(())
    }

    /// Repeat [`Dispatcher::dispatch`] until terminated.
    pub fn run(&mut self) -> Result<()> {
        debug!("dispatch loop started");
        while !self.inner.terminate.load(Ordering::Acquire) {
            self.dispatch()?;
        }
        debug!("dispatch loop stopped");
        Ok(())
    }

    fn drive(&mut self, ready: &[Readiness]) -> Result<()> {
        for ev in ready {
            if ev.readable {
                self.drive_readable(ev.conn)?;
            }
            if ev.writable {
                self.drive_writable(ev.conn)?;
            }
        }
        Ok(())
    }

    /// Drain the read direction of `conn`: keep driving the head pending
    /// record until the kernel would block or no pending record remains.
    /// Required for edge-triggered backends.
    fn drive_readable(&mut self, conn: ConnId) -> Result<()> {
        loop {
            let Some(slot) = next_pending_read(&self.inner, conn) else {
                self.backend.remove_read(conn);
                return Ok(());
            };
            let Some(c) = self.inner.table.get_mut(conn) else {
                self.backend.cancel(conn);
                return Ok(());
            };
            let step = match slot {
                ReadSlot::Buffer(i) => self.inner.reads[i].on_ready(c),
                ReadSlot::Block(i) => self.inner.block_reads[i].on_ready(c),
            };
            match step {
                Ok(Step::Blocked) => return Ok(()),
                Ok(Step::Partial) => continue,
                Ok(Step::Complete(completion)) => {
                    let mut ctx = DispatchCtx {
                        backend: &mut *self.backend,
                        inner: &mut self.inner,
                    };
                    ctx.deliver(conn, completion);
                }
                Err(source) => return Err(self.transfer_error(conn, source)),
            }
        }
    }

    fn drive_writable(&mut self, conn: ConnId) -> Result<()> {
        loop {
            let Some(slot) = next_pending_write(&self.inner, conn) else {
                self.backend.remove_write(conn);
                return Ok(());
            };
            let Some(c) = self.inner.table.get_mut(conn) else {
                self.backend.cancel(conn);
                return Ok(());
            };
            let step = match slot {
                WriteSlot::Buffer(i) => self.inner.writes[i].on_ready(c),
                WriteSlot::Block(i) => self.inner.block_writes[i].on_ready(c),
            };
            match step {
                Ok(Step::Blocked) => return Ok(()),
                Ok(Step::Partial) => continue,
                Ok(Step::Complete(completion)) => {
                    let mut ctx = DispatchCtx {
                        backend: &mut *self.backend,
                        inner: &mut self.inner,
                    };
                    ctx.deliver(conn, completion);
                }
                Err(source) => return Err(self.transfer_error(conn, source)),
            }
        }
    }

    fn transfer_error(&self, conn: ConnId, source: io::Error) -> Error {
        let desc = self
            .inner
            .table
            .get(conn)
            .map(|c| c.to_string())
            .unwrap_or_else(|| conn.to_string());
        Error::Transfer { conn: desc, source }
    }

    /// Pop finished records from the front of each queue, preserving FIFO and
    /// the positions of records behind an unfinished head.
    fn reap(&mut self) {
        let inner = &mut self.inner;
        while inner.reads.front().is_some_and(ReadTransfer::is_done) {
            inner.reads.pop_front();
        }
        while inner
            .block_reads
            .front()
            .is_some_and(BlockReadTransfer::is_done)
        {
            inner.block_reads.pop_front();
        }
        while inner.writes.front().is_some_and(WriteTransfer::is_done) {
            inner.writes.pop_front();
        }
        while inner
            .block_writes
            .front()
            .is_some_and(BlockWriteTransfer::is_done)
        {
            inner.block_writes.pop_front();
        }
    }
}

/// Head pending read record for `conn`: the earliest-enqueued not-done record
/// across the buffered and block read queues.
fn next_pending_read<C: Connection>(inner: &Inner<C>, conn: ConnId) -> Option<ReadSlot> {
    let buf = inner
        .reads
        .iter()
        .position(|r| r.conn == conn && !r.is_done());
    let block = inner
        .block_reads
        .iter()
        .position(|r| r.conn == conn && !r.is_done());
    match (buf, block) {
        (Some(i), Some(j)) => {
            if inner.reads[i].seq < inner.block_reads[j].seq {
                Some(ReadSlot::Buffer(i))
            } else {
                Some(ReadSlot::Block(j))
            }
        }
        (Some(i), None) => Some(ReadSlot::Buffer(i)),
        (None, Some(j)) => Some(ReadSlot::Block(j)),
        (None, None) => None,
    }
}

fn next_pending_write<C: Connection>(inner: &Inner<C>, conn: ConnId) -> Option<WriteSlot> {
    let buf = inner
        .writes
        .iter()
        .position(|r| r.conn == conn && !r.is_done());
    let block = inner
        .block_writes
        .iter()
        .position(|r| r.conn == conn && !r.is_done());
    match (buf, block) {
        (Some(i), Some(j)) => {
            if inner.writes[i].seq < inner.block_writes[j].seq {
                Some(WriteSlot::Buffer(i))
            } else {
                Some(WriteSlot::Block(j))
            }
        }
        (Some(i), None) => Some(WriteSlot::Buffer(i)),
        (None, Some(j)) => Some(WriteSlot::Block(j)),
        (None, None) => None,
    }
}

/// How long the backend may block: up to the next timer deadline, bounded by
/// `idle` when no timers are armed, and clamped below by `min` so an
/// already-due timer cannot busy-spin.
fn wait_budget(next: Option<Instant>, now: Instant, idle: Duration, min: Duration) -> Duration {
    match next {
        None => idle,
        Some(deadline) => deadline.saturating_duration_since(now).max(min),
    }
}

/// Borrow of the dispatcher internals handed to every callback.
///
/// All enqueue operations mirror the [`Dispatcher`] surface, so a completion
/// callback can chain further reads and writes, install timers, cancel
/// connections, or request termination.
pub struct DispatchCtx<'a, C: Connection> {
    pub(crate) backend: &'a mut dyn Multiplexer,
    pub(crate) inner: &'a mut Inner<C>,
}

impl<C: Connection> DispatchCtx<'_, C> {
    /// Borrow a registered connection.
    pub fn connection(&self, id: ConnId) -> Option<&C> {
        self.inner.table.get(id)
    }

    /// Mutably borrow a registered connection.
    pub fn connection_mut(&mut self, id: ConnId) -> Option<&mut C> {
        self.inner.table.get_mut(id)
    }

    /// See [`Dispatcher::add_timer`].
    pub fn add_timer(
        &mut self,
        timeout: Duration,
        cb: impl FnMut(&mut DispatchCtx<'_, C>) -> bool + 'static,
    ) {
        self.inner
            .timers
            .schedule(Instant::now() + timeout, timeout, Box::new(cb));
    }

    /// See [`Dispatcher::async_read`].
    pub fn async_read(
        &mut self,
        conn: ConnId,
        n: usize,
        done_cb: impl FnOnce(&mut DispatchCtx<'_, C>, ConnId, Buffer) + 'static,
    ) -> Result<()> {
        let fd = self.require_fd(conn);
        if n == 0 {
            done_cb(self, conn, Buffer::new());
            return Ok(());
        }
        self.backend.add_read(fd, conn)?;
        let buffer = Buffer::from_vec(self.inner.pool.take(n));
        let seq = self.inner.next_seq();
        self.inner
            .reads
            .push_back(ReadTransfer::new(conn, seq, buffer, Some(Box::new(done_cb))));
        Ok(())
    }

    /// See [`Dispatcher::async_read_block`].
    pub fn async_read_block(
        &mut self,
        conn: ConnId,
        n: usize,
        block: PinnedBlock,
        done_cb: impl FnOnce(&mut DispatchCtx<'_, C>, ConnId, PinnedBlock) + 'static,
    ) -> Result<()> {
        let fd = self.require_fd(conn);
        assert!(
            n <= block.len(),
            "read length {n} exceeds block size {}",
            block.len()
        );
        if n == 0 || block.is_empty() {
            done_cb(self, conn, block);
            return Ok(());
        }
        self.backend.add_read(fd, conn)?;
        let seq = self.inner.next_seq();
        self.inner.block_reads.push_back(BlockReadTransfer::new(
            conn,
            seq,
            n,
            block,
            Some(Box::new(done_cb)),
        ));
        Ok(())
    }

    /// See [`Dispatcher::async_write`].
    pub fn async_write(&mut self, conn: ConnId, buffer: Buffer) -> Result<()> {
        self.write_common(conn, buffer, None)
    }

    /// See [`Dispatcher::async_write_with`].
    pub fn async_write_with(
        &mut self,
        conn: ConnId,
        buffer: Buffer,
        done_cb: impl FnOnce(&mut DispatchCtx<'_, C>, ConnId) + 'static,
    ) -> Result<()> {
        self.write_common(conn, buffer, Some(Box::new(done_cb)))
    }

    /// See [`Dispatcher::async_write_block`].
    pub fn async_write_block(&mut self, conn: ConnId, block: PinnedBlock) -> Result<()> {
        self.write_block_common(conn, block, None)
    }

    /// See [`Dispatcher::async_write_block_with`].
    pub fn async_write_block_with(
        &mut self,
        conn: ConnId,
        block: PinnedBlock,
        done_cb: impl FnOnce(&mut DispatchCtx<'_, C>, ConnId) + 'static,
    ) -> Result<()> {
        self.write_block_common(conn, block, Some(Box::new(done_cb)))
    }

    /// See [`Dispatcher::async_write_copy`].
    pub fn async_write_copy(&mut self, conn: ConnId, data: impl AsRef<[u8]>) -> Result<()> {
        let buffer = self.copy_in(data.as_ref());
        self.write_common(conn, buffer, None)
    }

    /// See [`Dispatcher::async_write_copy_with`].
    pub fn async_write_copy_with(
        &mut self,
        conn: ConnId,
        data: impl AsRef<[u8]>,
        done_cb: impl FnOnce(&mut DispatchCtx<'_, C>, ConnId) + 'static,
    ) -> Result<()> {
        let buffer = self.copy_in(data.as_ref());
        self.write_common(conn, buffer, Some(Box::new(done_cb)))
    }

    /// See [`Dispatcher::cancel`].
    pub fn cancel(&mut self, conn: ConnId) {
        debug!(%conn, "cancelling pending transfers");
        self.backend.cancel(conn);

        // Synthesize completions for every pending record on this
        // connection, ordered by enqueue sequence across all four queues.
        let mut pending: Vec<(u64, Completion<C>)> = Vec::new();
        for rec in self.inner.reads.iter_mut() {
            if rec.conn == conn && !rec.is_done() {
                pending.push((rec.seq, rec.cancel()));
            }
        }
        for rec in self.inner.block_reads.iter_mut() {
            if rec.conn == conn && !rec.is_done() {
                pending.push((rec.seq, rec.cancel()));
            }
        }
        for rec in self.inner.writes.iter_mut() {
            if rec.conn == conn && !rec.is_done() {
                pending.push((rec.seq, rec.cancel()));
            }
        }
        for rec in self.inner.block_writes.iter_mut() {
            if rec.conn == conn && !rec.is_done() {
                pending.push((rec.seq, rec.cancel()));
            }
        }
        pending.sort_by_key(|(seq, _)| *seq);
        for (_, completion) in pending {
            self.deliver(conn, completion);
        }
    }

    /// See [`Dispatcher::has_async_writes`].
    pub fn has_async_writes(&self) -> bool {
        !self.inner.writes.is_empty() || !self.inner.block_writes.is_empty()
    }

    /// See [`Dispatcher::terminate`].
    pub fn terminate(&self) {
        self.inner.terminate.store(true, Ordering::Release);
    }

    fn copy_in(&mut self, data: &[u8]) -> Buffer {
        let mut v = self.inner.pool.take(data.len());
        v.copy_from_slice(data);
        Buffer::from_vec(v)
    }

    fn write_common(
        &mut self,
        conn: ConnId,
        buffer: Buffer,
        done_cb: Option<WriteCallback<C>>,
    ) -> Result<()> {
        let fd = self.require_fd(conn);
        if buffer.is_empty() {
            self.inner.pool.put(buffer.into_vec());
            if let Some(cb) = done_cb {
                cb(self, conn);
            }
            return Ok(());
        }
        self.backend.add_write(fd, conn)?;
        let seq = self.inner.next_seq();
        self.inner
            .writes
            .push_back(WriteTransfer::new(conn, seq, buffer, done_cb));
        Ok(())
    }

    fn write_block_common(
        &mut self,
        conn: ConnId,
        block: PinnedBlock,
        done_cb: Option<WriteCallback<C>>,
    ) -> Result<()> {
        let fd = self.require_fd(conn);
        if block.is_empty() {
            if let Some(cb) = done_cb {
                cb(self, conn);
            }
            return Ok(());
        }
        self.backend.add_write(fd, conn)?;
        let seq = self.inner.next_seq();
        self.inner
            .block_writes
            .push_back(BlockWriteTransfer::new(conn, seq, block, done_cb));
        Ok(())
    }

    /// Precondition check shared by every async operation.
    ///
    /// # Panics
    ///
    /// Panics if `conn` is not registered or no longer valid; passing an
    /// invalid connection is a programming error.
    fn require_fd(&self, conn: ConnId) -> RawFd {
        let c = self
            .inner
            .table
            .get(conn)
            .unwrap_or_else(|| panic!("{conn} is not registered with this dispatcher"));
        assert!(c.is_valid(), "invalid connection {c}");
        c.as_raw_fd()
    }

    /// Run a completion callback, recycling spent write payloads first.
    pub(crate) fn deliver(&mut self, conn: ConnId, completion: Completion<C>) {
        match completion {
            Completion::Read { cb, buffer } => {
                if let Some(cb) = cb {
                    cb(self, conn, buffer);
                }
            }
            Completion::ReadBlock { cb, block } => {
                if let Some(cb) = cb {
                    cb(self, conn, block);
                }
            }
            Completion::Write { cb, spent } => {
                if let Some(v) = spent {
                    self.inner.pool.put(v);
                }
                if let Some(cb) = cb {
                    cb(self, conn);
                }
            }
        }
    }
}
