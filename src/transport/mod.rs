//! Transport abstraction: a plain TCP stream or an OpenSSL-wrapped one,
//! behind a single `read`/`write` contract so the rest of pgvictoria never
//! branches on whether TLS is active.

mod plain;
mod tls;

pub use plain::PlainTransport;
pub use tls::TlsTransport;

use std::io;
use std::net::TcpStream;

use crate::error::{Error, Result};

/// A byte-stream transport. `read` returns `Ok(0)` on clean EOF, matching
/// `std::io::Read`, so callers can tell a closed connection from a timeout.
pub trait Transport: io::Read + io::Write + Send {
    /// The underlying TCP stream, for setting options like `TCP_NODELAY`
    /// or read timeouts that apply regardless of whether TLS is active.
    fn tcp_stream(&self) -> &TcpStream;

    /// True if TLS is active on this transport.
    fn is_tls(&self) -> bool;
}

/// Either a plain or TLS-wrapped connection.
pub enum Connection {
    Plain(PlainTransport),
    Tls(TlsTransport),
}

impl Connection {
    pub fn plain(stream: TcpStream) -> Self {
        Connection::Plain(PlainTransport::new(stream))
    }

    pub fn tls(stream: TlsTransport) -> Self {
        Connection::Tls(stream)
    }

    pub fn is_tls(&self) -> bool {
        matches!(self, Connection::Tls(_))
    }

    pub fn tcp_stream(&self) -> &TcpStream {
        match self {
            Connection::Plain(t) => t.tcp_stream(),
            Connection::Tls(t) => t.tcp_stream(),
        }
    }

    /// Unwrap into the underlying `TcpStream`, discarding whatever TLS
    /// session was layered on top of it. Used to hand the raw socket to a
    /// fresh `SslAcceptor`/`SslConnector` when negotiating TLS mid-session.
    pub fn into_tcp_stream(self) -> TcpStream {
        match self {
            Connection::Plain(t) => t.into_inner(),
            Connection::Tls(t) => t.into_inner(),
        }
    }

    /// Read one length-prefixed protocol frame: a 1-byte tag followed by a
    /// 4-byte big-endian length (inclusive of itself) and `length - 4`
    /// bytes of payload. Matches the spec's "kind, length, data" frame
    /// triple (§3); the type byte is advisory, framing itself comes only
    /// from the length field.
    pub fn read_frame(&mut self, buffer_set: &mut crate::buffer_set::BufferSet) -> Result<()> {
        let mut type_byte = [0u8; 1];
        self.read_exact(&mut type_byte)?;
        buffer_set.type_byte = type_byte[0];

        let mut length_bytes = [0u8; 4];
        self.read_exact(&mut length_bytes)?;
        let length = i32::from_be_bytes(length_bytes);
        if length < 4 {
            return Err(Error::Protocol(format!("invalid frame length: {length}")));
        }

        let payload_len = length as usize - 4;
        buffer_set.read_buffer.clear();
        buffer_set.read_buffer.resize(payload_len, 0);
        self.read_exact(&mut buffer_set.read_buffer)
    }

    /// Read exactly `buf.len()` bytes, translating a clean EOF mid-message
    /// into a protocol error rather than a short read.
    pub fn read_exact(&mut self, buf: &mut [u8]) -> Result<()> {
        match self {
            Connection::Plain(t) => io::Read::read_exact(t, buf).map_err(map_io_err),
            Connection::Tls(t) => io::Read::read_exact(t, buf).map_err(map_io_err),
        }
    }

    pub fn write_all(&mut self, buf: &[u8]) -> Result<()> {
        let result = match self {
            Connection::Plain(t) => io::Write::write_all(t, buf),
            Connection::Tls(t) => io::Write::write_all(t, buf),
        };
        result.map_err(map_io_err)?;
        self.flush()
    }

    pub fn flush(&mut self) -> Result<()> {
        let result = match self {
            Connection::Plain(t) => io::Write::flush(t),
            Connection::Tls(t) => io::Write::flush(t),
        };
        result.map_err(map_io_err)
    }
}

fn map_io_err(err: io::Error) -> Error {
    if err.kind() == io::ErrorKind::WouldBlock || err.kind() == io::ErrorKind::TimedOut {
        Error::TransportTimeout
    } else {
        Error::Transport(err.to_string())
    }
}
