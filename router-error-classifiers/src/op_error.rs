use std::{error::Error, fmt, net::SocketAddr};

use thiserror::Error as ThisError;

/// The network operation that was in progress when an [`OpError`] occurred.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Op {
    /// Establishing a connection to the backend.
    Dial,
    /// Reading from an established connection.
    Read,
    /// Writing to an established connection.
    Write,
    /// Closing a connection.
    Close,
    /// The peer reported an error, such as a TLS alert.
    RemoteError,
}

impl Op {
    /// Gets the operation tag, as rendered in error messages.
    pub fn as_str(self) -> &'static str {
        match self {
            Op::Dial => "dial",
            Op::Read => "read",
            Op::Write => "write",
            Op::Close => "close",
            Op::RemoteError => "remote error",
        }
    }
}

impl fmt::Display for Op {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A failed network operation against a backend.
///
/// Wraps the underlying failure with the operation that was being performed, and the backend
/// address, if known.
#[derive(Debug, ThisError)]
#[error("{op}{}: {source}", .addr.map(|addr| format!(" {addr}")).unwrap_or_default())]
pub struct OpError {
    op: Op,
    addr: Option<SocketAddr>,
    source: Box<dyn Error + Send + Sync + 'static>,
}

impl OpError {
    /// Creates a new `OpError`.
    pub fn new<E>(op: Op, source: E) -> OpError
    where
        E: Into<Box<dyn Error + Send + Sync + 'static>>,
    {
        OpError { op, addr: None, source: source.into() }
    }

    /// Attaches the address of the backend the operation targeted.
    #[must_use]
    pub fn with_addr(mut self, addr: SocketAddr) -> OpError {
        self.addr = Some(addr);
        self
    }

    /// Gets the operation that failed.
    pub fn op(&self) -> Op {
        self.op
    }

    /// Gets the address of the backend, if known.
    pub fn addr(&self) -> Option<SocketAddr> {
        self.addr
    }

    /// Gets the underlying failure.
    pub fn inner(&self) -> &(dyn Error + Send + Sync + 'static) {
        self.source.as_ref()
    }
}
