use std::fmt;
use std::io;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Closed,
    RecvTimeout,
    SendTimeout,
    AsyncSendTimeout,
    Cancelled,
    Decode,
    Encode,
    Io,
}

/// Error reported by the socket engine.
///
/// Errors are cheap to clone: the close reason is kept by the socket and
/// handed to the close callback, so the source is shared.
#[derive(Debug, Clone)]
pub struct Error {
    kind: ErrorKind,
    source: Option<Arc<dyn std::error::Error + Send + Sync>>,
}

impl Error {
    pub fn new(kind: ErrorKind) -> Self {
        Error { kind, source: None }
    }

    pub fn with_source<E>(kind: ErrorKind, source: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Error {
            kind,
            source: Some(Arc::from(source.into())),
        }
    }

    /// Wraps a decoder failure.
    pub fn decode<E>(source: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Self::with_source(ErrorKind::Decode, source)
    }

    /// Wraps a packer failure.
    pub fn encode<E>(source: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Self::with_source(ErrorKind::Encode, source)
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Returns true for the three timeout kinds.
    pub fn is_timeout(&self) -> bool {
        matches!(
            self.kind,
            ErrorKind::RecvTimeout | ErrorKind::SendTimeout | ErrorKind::AsyncSendTimeout
        )
    }

    /// Returns the underlying I/O error kind, if the error came from a transport.
    pub fn io_kind(&self) -> Option<io::ErrorKind> {
        self.source
            .as_ref()
            .and_then(|source| source.downcast_ref::<io::Error>())
            .map(io::Error::kind)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            ErrorKind::Closed => write!(f, "Socket closed")?,
            ErrorKind::RecvTimeout => write!(f, "Receive timeout")?,
            ErrorKind::SendTimeout => write!(f, "Send timeout")?,
            ErrorKind::AsyncSendTimeout => write!(f, "Async send timeout")?,
            ErrorKind::Cancelled => write!(f, "Send cancelled")?,
            ErrorKind::Decode => write!(f, "Decode error")?,
            ErrorKind::Encode => write!(f, "Encode error")?,
            ErrorKind::Io => write!(f, "I/O error")?,
        }
        if let Some(source) = &self.source {
            write!(f, ": {}", source)?;
        }
        Ok(())
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_ref()
            .map(|source| source.as_ref() as &(dyn std::error::Error + 'static))
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Self::with_source(ErrorKind::Io, err)
    }
}

impl From<Error> for io::Error {
    fn from(err: Error) -> io::Error {
        let kind = match err.kind {
            ErrorKind::Closed => io::ErrorKind::NotConnected,
            ErrorKind::RecvTimeout | ErrorKind::SendTimeout | ErrorKind::AsyncSendTimeout => {
                io::ErrorKind::TimedOut
            }
            ErrorKind::Cancelled => io::ErrorKind::Interrupted,
            ErrorKind::Decode | ErrorKind::Encode => io::ErrorKind::InvalidData,
            ErrorKind::Io => err.io_kind().unwrap_or(io::ErrorKind::Other),
        };
        io::Error::new(kind, err)
    }
}

pub type Result<T> = std::result::Result<T, Error>;
