use thiserror::Error;

use crate::http::request::RequestLine;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("empty request")]
    Empty,
    #[error("request line is not valid UTF-8")]
    InvalidEncoding,
    #[error("malformed request line {0:?}")]
    MalformedRequestLine(String),
}

/// Parses the first line of `buf` into method, path and version.
///
/// The line ends at the first CRLF, or at the end of the buffer when no
/// terminator was read. It must split on whitespace into exactly three tokens.
/// A line cut short by the read is not detected: `GET / HTTP/1` parses, with
/// `HTTP/1` as the version.
pub fn parse_request_line(buf: &[u8]) -> Result<RequestLine, ParseError> {
    if buf.is_empty() {
        return Err(ParseError::Empty);
    }

    let line_end = find(buf, b"\r\n").unwrap_or(buf.len());
    let line = std::str::from_utf8(&buf[..line_end]).map_err(|_| ParseError::InvalidEncoding)?;

    let mut parts = line.split_whitespace();
    match (parts.next(), parts.next(), parts.next(), parts.next()) {
        (Some(method), Some(path), Some(version), None) => {
            Ok(RequestLine::new(method, path, version))
        }
        _ => Err(ParseError::MalformedRequestLine(line.to_string())),
    }
}

/// Offset of the first byte after the header block, or `buf.len()` if the
/// blank line was not part of this read.
pub fn body_offset(buf: &[u8]) -> usize {
    find(buf, b"\r\n\r\n")
        .map(|pos| pos + 4)
        .unwrap_or(buf.len())
}

fn find(buf: &[u8], needle: &[u8]) -> Option<usize> {
    buf.windows(needle.len()).position(|w| w == needle)
}
