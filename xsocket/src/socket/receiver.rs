//! Receive side of the socket engine.

use std::time::Instant;

use crossbeam_channel::select;
use log::{trace, warn};

use super::AsyncSocket;
use crate::error::Error;
use crate::io::is_timeout;

impl<P: Send + 'static> AsyncSocket<P> {
    /// Requests the next packet.
    ///
    /// When bytes arrive before `deadline` they are decoded and passed to the
    /// packet handler; when the deadline elapses first the receive-timeout
    /// callback runs. `None` waits indefinitely.
    ///
    /// At most one request is pending at a time: a request made while another
    /// one is still waiting to be served is dropped, as is any request made
    /// after shutdown.
    pub fn recv(&self, deadline: Option<Instant>) {
        self.shared
            .recv_once
            .call_once(|| self.start_task("xsocket-recv", Self::recv_loop));
        if self.is_shutdown() {
            return;
        }
        if self.shared.recv_req_tx.try_send(deadline).is_err() {
            trace!("Receive request already pending, dropped");
        }
    }

    fn recv_loop(&self) {
        let shared = &*self.shared;
        loop {
            let deadline = select! {
                recv(shared.die_rx) -> _ => return,
                recv(shared.recv_req_rx) -> req => match req {
                    Ok(deadline) => deadline,
                    Err(_) => return,
                },
            };

            let received = shared.transport.recv(deadline);
            if self.is_shutdown() {
                // shutdown raced the receive; whatever arrived is dropped
                return;
            }

            match received {
                Ok(buf) => {
                    trace!("Received {} bytes", buf.len());
                    match shared.decoder.decode(&buf) {
                        Ok(packet) => (shared.on_packet)(self, packet),
                        Err(err) => {
                            warn!("Decode failed, closing: {}", err);
                            self.close(Some(err));
                        }
                    }
                }
                Err(err) if is_timeout(&err) => (shared.on_recv_timeout)(self),
                Err(err) => {
                    warn!("Receive failed, closing: {}", err);
                    self.close(Some(Error::from(err)));
                }
            }
        }
    }
}
