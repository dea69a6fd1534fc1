//! Frame receivers for byte-stream transports.
//!
//! A stream has no message boundaries, so a [`StreamSocket`](super::StreamSocket)
//! delegates "what is one received chunk" to a [`FrameReceiver`].

use std::io::{self, Read};

use crate::codec::LENGTH_PREFIX_SIZE;

/// Read size used by [`RawReceiver::new`].
pub const DEFAULT_RECV_BUFFER_SIZE: usize = 4096;

/// Splits a byte stream into received chunks.
pub trait FrameReceiver: Send + 'static {
    /// Reads the next chunk from `reader`.
    ///
    /// A read timeout must be returned unchanged so the caller can classify
    /// it; implementations keep any partially read data for the next call.
    fn recv_frame(&mut self, reader: &mut dyn Read) -> io::Result<Vec<u8>>;
}

/// Returns whatever a single read yields.
#[derive(Debug)]
pub struct RawReceiver {
    buf: Vec<u8>,
}

impl RawReceiver {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_RECV_BUFFER_SIZE)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: vec![0u8; capacity.max(1)],
        }
    }
}

impl Default for RawReceiver {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameReceiver for RawReceiver {
    fn recv_frame(&mut self, reader: &mut dyn Read) -> io::Result<Vec<u8>> {
        loop {
            match reader.read(&mut self.buf) {
                Ok(0) => return Err(io::ErrorKind::UnexpectedEof.into()),
                Ok(n) => return Ok(self.buf[..n].to_vec()),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
    }
}

/// Reads frames carrying a 4-byte big-endian length header and returns
/// their payloads.
#[derive(Debug)]
pub struct LengthPrefixedReceiver {
    /// Bytes read but not yet returned.
    pending: Vec<u8>,

    /// Scratch read buffer.
    scratch: Vec<u8>,

    /// Largest accepted payload.
    max_frame_size: usize,
}

impl LengthPrefixedReceiver {
    pub fn new(max_frame_size: usize) -> Self {
        Self {
            pending: Vec::new(),
            scratch: vec![0u8; DEFAULT_RECV_BUFFER_SIZE],
            max_frame_size,
        }
    }

    fn take_frame(&mut self) -> io::Result<Option<Vec<u8>>> {
        if self.pending.len() < LENGTH_PREFIX_SIZE {
            return Ok(None);
        }
        let header = [
            self.pending[0],
            self.pending[1],
            self.pending[2],
            self.pending[3],
        ];
        let len = u32::from_be_bytes(header) as usize;
        if len > self.max_frame_size {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("frame of {} bytes exceeds limit of {}", len, self.max_frame_size),
            ));
        }
        let end = LENGTH_PREFIX_SIZE + len;
        if self.pending.len() < end {
            return Ok(None);
        }
        let frame = self.pending[LENGTH_PREFIX_SIZE..end].to_vec();
        self.pending.drain(..end);
        Ok(Some(frame))
    }
}

impl FrameReceiver for LengthPrefixedReceiver {
    fn recv_frame(&mut self, reader: &mut dyn Read) -> io::Result<Vec<u8>> {
        loop {
            if let Some(frame) = self.take_frame()? {
                return Ok(frame);
            }
            match reader.read(&mut self.scratch) {
                Ok(0) => return Err(io::ErrorKind::UnexpectedEof.into()),
                Ok(n) => self.pending.extend_from_slice(&self.scratch[..n]),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    /// Reader replaying scripted results, one per read call.
    struct ScriptedReader {
        steps: VecDeque<io::Result<Vec<u8>>>,
    }

    impl ScriptedReader {
        fn new(steps: Vec<io::Result<Vec<u8>>>) -> Self {
            Self {
                steps: steps.into(),
            }
        }
    }

    impl Read for ScriptedReader {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            match self.steps.pop_front() {
                Some(Ok(data)) => {
                    buf[..data.len()].copy_from_slice(&data);
                    Ok(data.len())
                }
                Some(Err(e)) => Err(e),
                None => Ok(0),
            }
        }
    }

    #[test]
    fn test_raw_receiver() {
        let mut receiver = RawReceiver::with_capacity(8);
        let mut reader = ScriptedReader::new(vec![Ok(b"hello".to_vec())]);
        assert_eq!(receiver.recv_frame(&mut reader).unwrap(), b"hello");
        let err = receiver.recv_frame(&mut reader).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[test]
    fn test_length_prefixed_split_frames() {
        let mut receiver = LengthPrefixedReceiver::new(1024);
        let mut reader = ScriptedReader::new(vec![
            Ok(vec![0, 0, 0, 3, b'a', b'b']),
            Ok(vec![b'c', 0, 0, 0, 1, b'd', 0, 0]),
            Ok(vec![0, 0]),
        ]);
        assert_eq!(receiver.recv_frame(&mut reader).unwrap(), b"abc");
        assert_eq!(receiver.recv_frame(&mut reader).unwrap(), b"d");
        assert_eq!(receiver.recv_frame(&mut reader).unwrap(), b"");
    }

    #[test]
    fn test_length_prefixed_survives_timeout() {
        let mut receiver = LengthPrefixedReceiver::new(1024);
        let mut reader = ScriptedReader::new(vec![
            Ok(vec![0, 0, 0, 4, b'p']),
            Err(io::ErrorKind::WouldBlock.into()),
            Ok(vec![b'i', b'n', b'g']),
        ]);
        let err = receiver.recv_frame(&mut reader).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::WouldBlock);
        assert_eq!(receiver.recv_frame(&mut reader).unwrap(), b"ping");
    }

    #[test]
    fn test_length_prefixed_rejects_oversized() {
        let mut receiver = LengthPrefixedReceiver::new(4);
        let mut reader = ScriptedReader::new(vec![Ok(vec![0, 0, 0, 5])]);
        let err = receiver.recv_frame(&mut reader).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }
}
