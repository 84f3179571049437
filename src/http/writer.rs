use std::io::{self, Write};
use std::sync::atomic::Ordering;

use bytes::{BufMut, Bytes, BytesMut};

use crate::http::response::{Body, ResponseState};
use crate::signal;

const HTTP_VERSION: &str = "HTTP/1.1";

/// Serializes the status line, headers, blank line and every body chunk.
///
/// No `Content-Length` is added and nothing is chunked: the peer detects the
/// end of the body by the connection closing.
pub fn serialize_response(state: &ResponseState, body: Body) -> Bytes {
    let mut buf = BytesMut::with_capacity(256);

    // Status line
    buf.put_slice(HTTP_VERSION.as_bytes());
    buf.put_u8(b' ');
    buf.put_slice(state.status_line.as_bytes());
    buf.put_slice(b"\r\n");

    // Headers
    for (k, v) in &state.headers {
        buf.put_slice(k.as_bytes());
        buf.put_slice(b": ");
        buf.put_slice(v.as_bytes());
        buf.put_slice(b"\r\n");
    }

    // Header/body separator
    buf.put_slice(b"\r\n");

    // Body
    for chunk in body {
        buf.put_slice(&chunk);
    }

    buf.freeze()
}

pub struct ResponseWriter {
    buffer: Bytes,
    written: usize,
}

impl ResponseWriter {
    pub fn new(state: &ResponseState, body: Body) -> Self {
        Self {
            buffer: serialize_response(state, body),
            written: 0,
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buffer
    }

    /// Bytes not yet accepted by the socket.
    pub fn remaining(&self) -> usize {
        self.buffer.len() - self.written
    }

    pub fn write_to<W: Write>(&mut self, stream: &mut W) -> io::Result<()> {
        while self.written < self.buffer.len() {
            let n = match stream.write(&self.buffer[self.written..]) {
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {
                    if signal::INTERRUPTED.load(Ordering::SeqCst) {
                        return Err(e);
                    }
                    continue;
                }
                Err(e) => return Err(e),
            };

            if n == 0 {
                return Err(io::Error::new(
                    io::ErrorKind::WriteZero,
                    "connection closed while writing",
                ));
            }

            self.written += n;
        }

        stream.flush()
    }
}
