use super::{
    AsyncSocket, CloseCallback, PacketHandler, RecvTimeoutCallback, SendHalf,
};
use crate::buffer::{PackBuffer, PoolBuffer};
use crate::codec::{Decoder, Identity, Packer};
use crate::config::SocketConfig;
use crate::error::{Error, ErrorKind};
use crate::transport::Transport;

/// Builder for [`AsyncSocket`].
///
/// Every part is optional except the transport:
///
/// | part | default |
/// |------|---------|
/// | codec | [`Identity`] |
/// | config | [`SocketConfig::default`] |
/// | pack buffer | [`PoolBuffer`] on the global pool |
/// | close callback | does nothing |
/// | receive-timeout callback | closes with `RecvTimeout` |
/// | packet handler | requests the next receive without deadline |
pub struct SocketBuilder<P> {
    transport: Box<dyn Transport>,
    decoder: Box<dyn Decoder<P>>,
    packer: Box<dyn Packer<P>>,
    buffer: Option<Box<dyn PackBuffer>>,
    config: SocketConfig,
    on_close: Option<CloseCallback<P>>,
    on_recv_timeout: Option<RecvTimeoutCallback<P>>,
    on_packet: Option<PacketHandler<P>>,
}

impl SocketBuilder<Vec<u8>> {
    pub fn new<T: Transport>(transport: T) -> Self {
        Self::with_codec(transport, Identity, Identity)
    }
}

impl<P: Send + 'static> SocketBuilder<P> {
    /// Starts a builder with a custom codec pair.
    pub fn with_codec<T, D, K>(transport: T, decoder: D, packer: K) -> Self
    where
        T: Transport,
        D: Decoder<P> + 'static,
        K: Packer<P> + 'static,
    {
        Self {
            transport: Box::new(transport),
            decoder: Box::new(decoder),
            packer: Box::new(packer),
            buffer: None,
            config: SocketConfig::default(),
            on_close: None,
            on_recv_timeout: None,
            on_packet: None,
        }
    }

    pub fn config(mut self, config: SocketConfig) -> Self {
        self.config = config;
        self
    }

    pub fn pack_buffer<B: PackBuffer + 'static>(mut self, buffer: B) -> Self {
        self.buffer = Some(Box::new(buffer));
        self
    }

    pub fn on_close<F>(mut self, callback: F) -> Self
    where
        F: Fn(&AsyncSocket<P>, Option<Error>) + Send + Sync + 'static,
    {
        self.on_close = Some(Box::new(callback));
        self
    }

    pub fn on_recv_timeout<F>(mut self, callback: F) -> Self
    where
        F: Fn(&AsyncSocket<P>) + Send + Sync + 'static,
    {
        self.on_recv_timeout = Some(Box::new(callback));
        self
    }

    pub fn on_packet<F>(mut self, handler: F) -> Self
    where
        F: Fn(&AsyncSocket<P>, P) + Send + Sync + 'static,
    {
        self.on_packet = Some(Box::new(handler));
        self
    }

    pub fn build(self) -> AsyncSocket<P> {
        let buffer: Box<dyn PackBuffer> = match self.buffer {
            Some(buffer) => buffer,
            None => Box::new(PoolBuffer::new()),
        };
        let on_close: CloseCallback<P> = match self.on_close {
            Some(callback) => callback,
            None => Box::new(|_: &AsyncSocket<P>, _: Option<Error>| {}),
        };
        let on_recv_timeout: RecvTimeoutCallback<P> = match self.on_recv_timeout {
            Some(callback) => callback,
            None => Box::new(|socket: &AsyncSocket<P>| {
                socket.close(Some(Error::new(ErrorKind::RecvTimeout)))
            }),
        };
        let on_packet: PacketHandler<P> = match self.on_packet {
            Some(handler) => handler,
            None => Box::new(|socket: &AsyncSocket<P>, _: P| socket.recv(None)),
        };

        AsyncSocket::from_parts(
            self.transport,
            self.decoder,
            SendHalf {
                packer: self.packer,
                buffer,
            },
            self.config,
            on_close,
            on_recv_timeout,
            on_packet,
        )
    }
}
