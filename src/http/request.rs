use std::fmt;

/// The three tokens of an HTTP request line.
///
/// Headers are never parsed; whatever follows the first line is left to the
/// application through the request body stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestLine {
    /// The request method exactly as sent (e.g. "GET")
    pub method: String,
    /// The raw request target, query string included
    pub path: String,
    /// Protocol version token (typically "HTTP/1.1")
    pub version: String,
}

impl RequestLine {
    pub fn new(
        method: impl Into<String>,
        path: impl Into<String>,
        version: impl Into<String>,
    ) -> Self {
        Self {
            method: method.into(),
            path: path.into(),
            version: version.into(),
        }
    }
}

impl fmt::Display for RequestLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.method, self.path, self.version)
    }
}
