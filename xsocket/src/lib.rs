//! # XSocket - Asynchronous Packet Socket Engine
//!
//! XSocket turns a blocking, connected byte transport into a packet-oriented
//! socket driven by two background tasks:
//!
//! - **Receive on request**: each `recv` call serves at most one packet, with
//!   an optional absolute deadline
//! - **Send batching**: queued objects are packed into one buffer and flushed
//!   once it is large enough or the queue runs empty
//! - **Graceful close**: queued objects are drained before the transport is
//!   closed, and the close callback runs exactly once with the first reason
//! - **Pluggable parts**: transports, codecs and pack buffers are traits
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                    Application Layer                     │
//! │        send / try_send / recv / close / callbacks        │
//! ├─────────────────────────────────────────────────────────┤
//! │                      AsyncSocket                         │
//! │  ┌─────────────┐ ┌─────────────┐ ┌─────────────────┐   │
//! │  │ Recv Task   │ │ Send Task   │ │ Close Protocol  │   │
//! │  └─────────────┘ └─────────────┘ └─────────────────┘   │
//! ├─────────────────────────────────────────────────────────┤
//! │                     Codec Layer                          │
//! │  ┌─────────────┐ ┌─────────────┐ ┌─────────────────┐   │
//! │  │  Decoder    │ │  Packer     │ │  Pack Buffer    │   │
//! │  └─────────────┘ └─────────────┘ └─────────────────┘   │
//! ├─────────────────────────────────────────────────────────┤
//! │                    Transport Layer                       │
//! │  ┌─────────────────────────────────────────────────┐   │
//! │  │   TCP / Unix / Vsock streams, in-memory pipes   │   │
//! │  └─────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::net::TcpStream;
//! use xsocket::transport::StreamSocket;
//! use xsocket::AsyncSocket;
//!
//! let stream = TcpStream::connect("127.0.0.1:8110")?;
//! let socket = AsyncSocket::builder(StreamSocket::new(stream))
//!     .on_packet(|socket, packet| {
//!         println!("echo: {:?}", packet);
//!         socket.recv(None);
//!     })
//!     .on_close(|_, reason| println!("closed: {:?}", reason))
//!     .build();
//!
//! socket.recv(None);
//! socket.send(b"Hello, World!".to_vec())?;
//! socket.close(None);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod buffer;
pub mod codec;
pub mod config;
pub mod error;
pub mod io;
pub mod socket;
pub mod transport;

// Re-export commonly used types
pub use buffer::{BufferPool, PackBuffer, PoolBuffer};
pub use codec::{Decoder, Identity, LengthPrefixed, Packer};
pub use config::SocketConfig;
pub use error::{Error, ErrorKind, Result};
pub use socket::{AsyncSocket, SocketBuilder, SocketState};
pub use transport::Transport;
