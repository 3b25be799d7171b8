//! Unencrypted TCP transport.

use std::io::{self, Read, Write};
use std::net::TcpStream;

use super::Transport;

pub struct PlainTransport {
    stream: TcpStream,
}

impl PlainTransport {
    pub fn new(stream: TcpStream) -> Self {
        Self { stream }
    }

    pub fn into_inner(self) -> TcpStream {
        self.stream
    }
}

impl Read for PlainTransport {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.stream.read(buf)
    }
}

impl Write for PlainTransport {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.stream.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.stream.flush()
    }
}

impl Transport for PlainTransport {
    fn tcp_stream(&self) -> &TcpStream {
        &self.stream
    }

    fn is_tls(&self) -> bool {
        false
    }
}
