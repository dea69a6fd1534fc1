//! Send side of the socket engine.
//!
//! Objects queued by callers are packed into the accumulation buffer by the
//! send task. The buffer goes to the transport in one write once it reaches
//! `max_send_block_size` bytes or the queue runs empty, so bursts of small
//! objects cost few transport calls while a lone object is not delayed.

use std::time::Instant;

use crossbeam_channel::{select, Receiver, TrySendError};
use log::{debug, trace, warn};

use super::{AsyncSocket, SendHalf};
use crate::error::{Error, ErrorKind, Result};
use crate::io::is_timeout;

impl<P> SendHalf<P> {
    /// Packs `packet` into the buffer and returns the buffered length.
    fn pack(&mut self, packet: P) -> Result<usize> {
        let buf = self.buffer.get_buffer();
        let buf = self.packer.pack(buf, packet)?;
        Ok(self.buffer.on_update(buf).len())
    }
}

impl<P: Send + 'static> AsyncSocket<P> {
    /// Queues `packet`, blocking while the send queue is full.
    ///
    /// Fails with `Closed` if the socket shuts down first.
    pub fn send(&self, packet: P) -> Result<()> {
        self.start_sender();
        if self.is_shutdown() {
            return Err(Error::new(ErrorKind::Closed));
        }
        let shared = &*self.shared;
        select! {
            recv(shared.die_rx) -> _ => Err(Error::new(ErrorKind::Closed)),
            send(shared.send_req_tx, packet) -> res => {
                res.map_err(|_| Error::new(ErrorKind::Closed))
            }
        }
    }

    /// Queues `packet` without blocking.
    ///
    /// Fails with `SendTimeout` if the send queue is full.
    pub fn try_send(&self, packet: P) -> Result<()> {
        self.start_sender();
        if self.is_shutdown() {
            return Err(Error::new(ErrorKind::Closed));
        }
        match self.shared.send_req_tx.try_send(packet) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => Err(Error::new(ErrorKind::SendTimeout)),
            Err(TrySendError::Disconnected(_)) => Err(Error::new(ErrorKind::Closed)),
        }
    }

    /// Queues `packet`, waiting for queue space until `deadline`.
    ///
    /// A deadline that has already passed makes this behave like
    /// [`try_send`](Self::try_send). Fails with `SendTimeout` when the
    /// deadline elapses and with `Closed` on shutdown.
    pub fn send_deadline(&self, packet: P, deadline: Instant) -> Result<()> {
        let now = Instant::now();
        if deadline <= now {
            return self.try_send(packet);
        }
        self.start_sender();
        if self.is_shutdown() {
            return Err(Error::new(ErrorKind::Closed));
        }
        let shared = &*self.shared;
        select! {
            recv(shared.die_rx) -> _ => Err(Error::new(ErrorKind::Closed)),
            send(shared.send_req_tx, packet) -> res => {
                res.map_err(|_| Error::new(ErrorKind::Closed))
            }
            default(deadline - now) => Err(Error::new(ErrorKind::SendTimeout)),
        }
    }

    /// Queues `packet`, blocking until there is room, the socket shuts down or
    /// `cancel` fires.
    ///
    /// `cancel` fires when it yields a message or is disconnected, so both
    /// `crossbeam_channel::after` timers and dropped senders work. Cancelling
    /// only releases this caller; objects already queued are still sent.
    pub fn send_with_cancel<T>(&self, cancel: &Receiver<T>, packet: P) -> Result<()> {
        self.start_sender();
        if self.is_shutdown() {
            return Err(Error::new(ErrorKind::Closed));
        }
        let shared = &*self.shared;
        select! {
            recv(shared.die_rx) -> _ => Err(Error::new(ErrorKind::Closed)),
            send(shared.send_req_tx, packet) -> res => {
                res.map_err(|_| Error::new(ErrorKind::Closed))
            }
            recv(cancel) -> _ => Err(Error::new(ErrorKind::Cancelled)),
        }
    }

    fn start_sender(&self) {
        self.shared
            .send_once
            .call_once(|| self.start_task("xsocket-send", Self::send_loop));
    }

    fn send_loop(&self) {
        let taken = self
            .shared
            .send_half
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .take();
        let Some(mut half) = taken else {
            return;
        };
        self.run_sender(&mut half);
        half.buffer.clear();
    }

    fn run_sender(&self, half: &mut SendHalf<P>) {
        let shared = &*self.shared;
        let block_size = shared.config.max_send_block_size;
        loop {
            select! {
                recv(shared.die_rx) -> _ => {
                    self.drain(half);
                    return;
                }
                recv(shared.send_req_rx) -> packet => {
                    let Ok(packet) = packet else { return };
                    let len = match half.pack(packet) {
                        Ok(len) => len,
                        Err(err) => {
                            warn!("Pack failed, closing: {}", err);
                            self.close(Some(err));
                            return;
                        }
                    };
                    if len >= block_size || (len > 0 && shared.send_req_rx.is_empty()) {
                        if let Err(err) = self.flush(half.buffer.as_bytes()) {
                            warn!("Send failed, closing: {}", err);
                            self.close(Some(err));
                            return;
                        }
                        half.buffer.release_buffer();
                    }
                }
            }
        }
    }

    /// Best-effort delivery of everything accepted before shutdown.
    fn drain(&self, half: &mut SendHalf<P>) {
        let shared = &*self.shared;
        let block_size = shared.config.max_send_block_size;
        let mut drained = 0usize;
        while let Ok(packet) = shared.send_req_rx.try_recv() {
            drained += 1;
            let len = match half.pack(packet) {
                Ok(len) => len,
                Err(err) => {
                    debug!("Drain aborted after {} objects: {}", drained, err);
                    return;
                }
            };
            if len >= block_size {
                if let Err(err) = self.flush(half.buffer.as_bytes()) {
                    debug!("Drain aborted after {} objects: {}", drained, err);
                    return;
                }
                half.buffer.reset_buffer();
            }
        }
        if !half.buffer.as_bytes().is_empty() {
            if let Err(err) = self.flush(half.buffer.as_bytes()) {
                debug!("Final flush failed: {}", err);
            }
        }
        debug!("Send task drained {} objects", drained);
    }

    fn flush(&self, buf: &[u8]) -> Result<()> {
        let shared = &*self.shared;
        let deadline = shared
            .config
            .async_send_timeout
            .map(|timeout| Instant::now() + timeout);
        match shared.transport.send(buf, deadline) {
            Ok(n) => {
                trace!("Flushed {} bytes", n);
                Ok(())
            }
            Err(err) if is_timeout(&err) => {
                Err(Error::with_source(ErrorKind::AsyncSendTimeout, err))
            }
            Err(err) => Err(err.into()),
        }
    }
}
