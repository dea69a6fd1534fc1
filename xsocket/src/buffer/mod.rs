//! Accumulation buffers for the send path.
//!
//! Writing every object with its own transport call is expensive for many
//! small objects. The send task instead packs objects into a [`PackBuffer`]
//! and hands the whole region to the transport once it is large enough or
//! nothing else is queued.
//!
//! - PackBuffer: the buffer protocol driven by the send task
//! - PoolBuffer: default implementation backed by a [`BufferPool`]

mod pool;

pub use pool::{BufferPool, PoolBuffer};

/// Buffer protocol used by the send task.
///
/// One send cycle is `get_buffer` -> pack -> `on_update`, repeated until a
/// flush. After a flush issued by the normal send loop the task calls
/// `release_buffer`; after a forced flush while draining on shutdown it calls
/// `reset_buffer`. `clear` runs once when the send task exits.
pub trait PackBuffer: Send {
    /// Takes the current buffer so a packer can append to it.
    fn get_buffer(&mut self) -> Vec<u8>;

    /// Stores the buffer returned by the packer and returns its contents.
    ///
    /// The next `get_buffer` returns this buffer.
    fn on_update(&mut self, buf: Vec<u8>) -> &[u8];

    /// Returns the bytes accumulated so far.
    fn as_bytes(&self) -> &[u8];

    /// Called after the whole buffer was written to the transport.
    ///
    /// The storage may be reused by anyone.
    fn release_buffer(&mut self);

    /// Discards the accumulated bytes without returning the storage.
    fn reset_buffer(&mut self);

    /// Called once when the send task exits. Pool-backed buffers should hand
    /// their storage back here.
    fn clear(&mut self);
}
