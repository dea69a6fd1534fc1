//! Conversion between domain packets and byte regions.
//!
//! The engine never looks inside packets. A [`Decoder`] turns the bytes of one
//! transport receive into a packet, and a [`Packer`] appends a packet to the
//! send task's accumulation buffer. [`Identity`] is the default pair; it passes
//! bytes through untouched so structured codecs can be swapped in without
//! touching the engine.

use crate::error::{Error, Result};

/// Turns received bytes into a packet.
pub trait Decoder<P>: Send + Sync {
    /// Decodes one received byte region.
    ///
    /// An error is fatal for the socket that received the bytes.
    fn decode(&self, buf: &[u8]) -> Result<P>;
}

/// Appends packets to an accumulation buffer.
pub trait Packer<P>: Send {
    /// Packs `packet` at the end of `buf` and returns the updated buffer.
    ///
    /// The packer may grow or replace the buffer; bytes already present must
    /// be preserved in order. An error is fatal for the sending socket.
    fn pack(&mut self, buf: Vec<u8>, packet: P) -> Result<Vec<u8>>;
}

/// Byte passthrough codec.
#[derive(Debug, Default, Clone, Copy)]
pub struct Identity;

impl Decoder<Vec<u8>> for Identity {
    fn decode(&self, buf: &[u8]) -> Result<Vec<u8>> {
        Ok(buf.to_vec())
    }
}

impl<P: AsRef<[u8]>> Packer<P> for Identity {
    fn pack(&mut self, mut buf: Vec<u8>, packet: P) -> Result<Vec<u8>> {
        buf.extend_from_slice(packet.as_ref());
        Ok(buf)
    }
}

/// Size of the big-endian length header written by [`LengthPrefixed`].
pub const LENGTH_PREFIX_SIZE: usize = 4;

/// Packer that frames each packet with a 4-byte big-endian length.
///
/// Batched writes on a stream transport coalesce packets; pair this packer
/// with [`LengthPrefixedReceiver`](crate::transport::LengthPrefixedReceiver)
/// on the receiving side to split them again.
///
/// Payloads are limited to `u32::MAX` bytes. Packing a larger one fails with
/// an `Encode` error, which closes the sending socket.
#[derive(Debug, Default, Clone, Copy)]
pub struct LengthPrefixed;

/// Returns the length header for a payload of `len` bytes, if it fits.
fn frame_header(len: usize) -> Option<[u8; LENGTH_PREFIX_SIZE]> {
    u32::try_from(len).ok().map(u32::to_be_bytes)
}

impl<P: AsRef<[u8]>> Packer<P> for LengthPrefixed {
    fn pack(&mut self, mut buf: Vec<u8>, packet: P) -> Result<Vec<u8>> {
        let data = packet.as_ref();
        let header = frame_header(data.len()).ok_or_else(|| {
            Error::encode(format!(
                "payload of {} bytes exceeds the 4-byte length header",
                data.len()
            ))
        })?;
        buf.reserve(LENGTH_PREFIX_SIZE + data.len());
        buf.extend_from_slice(&header);
        buf.extend_from_slice(data);
        Ok(buf)
    }
}
