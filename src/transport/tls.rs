//! TLS transport via OpenSSL.
//!
//! Connections are blocking `TcpStream`s, so `SslStream::read`/`write` already
//! block until data is available or the peer closes; the WANT_READ/WANT_WRITE
//! retry cases only arise from renegotiation, which `classify_ssl_error`
//! surfaces to the caller rather than retrying silently.

use std::io::{self, Read, Write};
use std::net::TcpStream;

use openssl::ssl::{ErrorCode, SslAcceptor, SslConnector, SslMethod, SslStream, SslVerifyMode};

use crate::error::{Error, Result};

use super::Transport;

pub struct TlsTransport {
    stream: SslStream<TcpStream>,
}

impl TlsTransport {
    /// Perform a client-role TLS handshake toward a backend server.
    pub fn connect(stream: TcpStream, domain: &str, verify_peer: bool) -> Result<Self> {
        let mut builder = SslConnector::builder(SslMethod::tls())?;
        if !verify_peer {
            builder.set_verify(SslVerifyMode::NONE);
        }
        let connector = builder.build();
        let stream = connector
            .connect(domain, stream)
            .map_err(|e| Error::Transport(format!("TLS connect failed: {e}")))?;
        Ok(Self { stream })
    }

    /// Perform a server-role TLS handshake with a connecting client, using a
    /// certificate/key pair loaded from the configured PEM files.
    pub fn accept(stream: TcpStream, cert_path: &str, key_path: &str) -> Result<Self> {
        let mut builder = SslAcceptor::mozilla_intermediate_v5(SslMethod::tls())?;
        builder.set_certificate_chain_file(cert_path)?;
        builder.set_private_key_file(key_path, openssl::ssl::SslFiletype::PEM)?;
        builder.check_private_key()?;
        let acceptor = builder.build();
        let stream = acceptor
            .accept(stream)
            .map_err(|e| Error::Transport(format!("TLS accept failed: {e}")))?;
        Ok(Self { stream })
    }

    pub fn into_inner(self) -> TcpStream {
        self.stream.into_inner()
    }
}

impl Read for TlsTransport {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.stream.ssl_read(buf).map_err(ssl_err_to_io)
    }
}

impl Write for TlsTransport {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.stream.ssl_write(buf).map_err(ssl_err_to_io)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.stream.flush()
    }
}

/// Convert an OpenSSL read/write error into the `io::Error` the rest of the
/// transport layer expects, logging WANT_*/renegotiation codes under their
/// real name instead of letting them surface as a bare `SSL` error.
fn ssl_err_to_io(err: openssl::ssl::Error) -> io::Error {
    let code = err.code();
    let label = classify_ssl_error(code);
    if code != ErrorCode::ZERO_RETURN {
        tracing::debug!(code = label, "TLS stream error");
    }
    err.into_io_error().unwrap_or_else(|e| io::Error::new(io::ErrorKind::Other, e))
}

impl Transport for TlsTransport {
    fn tcp_stream(&self) -> &TcpStream {
        self.stream.get_ref()
    }

    fn is_tls(&self) -> bool {
        true
    }
}

/// Translate an OpenSSL error code into the vocabulary pgvictoria logs and
/// retries on. The error stack is always cleared afterward so a later,
/// unrelated OpenSSL call doesn't pick up a stale error.
pub fn classify_ssl_error(code: ErrorCode) -> &'static str {
    let classified = match code {
        ErrorCode::WANT_READ => "WANT_READ",
        ErrorCode::WANT_WRITE => "WANT_WRITE",
        ErrorCode::WANT_CONNECT => "WANT_CONNECT",
        ErrorCode::WANT_ACCEPT => "WANT_ACCEPT",
        ErrorCode::WANT_X509_LOOKUP => "WANT_X509_LOOKUP",
        ErrorCode::WANT_ASYNC => "WANT_ASYNC",
        ErrorCode::WANT_ASYNC_JOB => "WANT_ASYNC_JOB",
        ErrorCode::WANT_CLIENT_HELLO_CB => "WANT_CLIENT_HELLO_CB",
        ErrorCode::ZERO_RETURN => "ZERO_RETURN",
        ErrorCode::SYSCALL => "SYSCALL",
        ErrorCode::SSL => "SSL",
        _ => "UNKNOWN",
    };
    // Draining the stack here clears it so a later, unrelated OpenSSL call
    // doesn't see a stale error.
    let _ = openssl::error::ErrorStack::get();
    classified
}
