//! Pool-backed accumulation buffer.
//!
//! Free buffers are kept in a bounded lock-free queue. Taking from an empty
//! pool allocates, returning to a full pool drops the buffer.

use std::sync::{Arc, OnceLock};

use crossbeam_channel::{bounded, Receiver, Sender};

use super::PackBuffer;
use crate::config::DEFAULT_MAX_SEND_BLOCK_SIZE;

/// Number of idle buffers kept by the process-wide pool.
const GLOBAL_POOL_BUFFERS: usize = 256;

/// A pool of reusable byte buffers.
#[derive(Debug)]
pub struct BufferPool {
    /// Returned buffers.
    free_tx: Sender<Vec<u8>>,

    /// Buffers ready for reuse.
    free_rx: Receiver<Vec<u8>>,

    /// Capacity of freshly allocated buffers.
    buffer_capacity: usize,

    /// Buffers that grew beyond this capacity are not retained.
    retain_limit: usize,
}

impl BufferPool {
    /// Creates a pool retaining at most `max_buffers` idle buffers.
    pub fn new(max_buffers: usize, buffer_capacity: usize) -> Self {
        let (free_tx, free_rx) = bounded(max_buffers.max(1));
        Self {
            free_tx,
            free_rx,
            buffer_capacity,
            retain_limit: buffer_capacity.saturating_mul(2),
        }
    }

    /// Returns the pool shared by every [`PoolBuffer::new`] buffer.
    pub fn global() -> Arc<BufferPool> {
        static GLOBAL: OnceLock<Arc<BufferPool>> = OnceLock::new();
        GLOBAL
            .get_or_init(|| {
                Arc::new(BufferPool::new(
                    GLOBAL_POOL_BUFFERS,
                    DEFAULT_MAX_SEND_BLOCK_SIZE,
                ))
            })
            .clone()
    }

    /// Takes an empty buffer, allocating when none is idle.
    pub fn get(&self) -> Vec<u8> {
        self.free_rx
            .try_recv()
            .unwrap_or_else(|_| Vec::with_capacity(self.buffer_capacity))
    }

    /// Returns a buffer to the pool.
    pub fn put(&self, mut buf: Vec<u8>) {
        if buf.capacity() == 0 || buf.capacity() > self.retain_limit {
            return;
        }
        buf.clear();
        let _ = self.free_tx.try_send(buf);
    }

    /// Returns the number of idle buffers.
    pub fn idle(&self) -> usize {
        self.free_rx.len()
    }
}

/// Default [`PackBuffer`] drawing its storage from a [`BufferPool`].
#[derive(Debug)]
pub struct PoolBuffer {
    pool: Arc<BufferPool>,
    buf: Option<Vec<u8>>,
}

impl PoolBuffer {
    /// Creates a buffer backed by the process-wide pool.
    pub fn new() -> Self {
        Self::with_pool(BufferPool::global())
    }

    pub fn with_pool(pool: Arc<BufferPool>) -> Self {
        Self { pool, buf: None }
    }
}

impl Default for PoolBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl PackBuffer for PoolBuffer {
    fn get_buffer(&mut self) -> Vec<u8> {
        match self.buf.take() {
            Some(buf) => buf,
            None => self.pool.get(),
        }
    }

    fn on_update(&mut self, buf: Vec<u8>) -> &[u8] {
        self.buf.insert(buf).as_slice()
    }

    fn as_bytes(&self) -> &[u8] {
        self.buf.as_deref().unwrap_or(&[])
    }

    fn release_buffer(&mut self) {
        if let Some(buf) = self.buf.take() {
            self.pool.put(buf);
        }
    }

    fn reset_buffer(&mut self) {
        if let Some(buf) = self.buf.as_mut() {
            buf.clear();
        }
    }

    fn clear(&mut self) {
        self.release_buffer();
    }
}

impl Drop for PoolBuffer {
    fn drop(&mut self) {
        self.release_buffer();
    }
}
