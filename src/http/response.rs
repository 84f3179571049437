use std::time::SystemTime;

use bytes::Bytes;
use thiserror::Error;

/// A response header as supplied by the application, casing untouched.
pub type Header = (String, String);

/// Misuse of the two-phase start-then-body protocol.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum ContractViolation {
    #[error("start_response called more than once")]
    AlreadyStarted,
    #[error("application returned without calling start_response")]
    NotStarted,
}

/// Status line and headers collected for one response.
///
/// The header list starts out holding `Date` and `Server`; application
/// headers are appended after them in call order. Nothing is deduplicated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseState {
    /// Status line without the protocol prefix, e.g. "200 OK"
    pub status_line: String,
    /// Headers in the order they will be written
    pub headers: Vec<Header>,
}

impl ResponseState {
    /// Creates a state seeded with the current date and the given server name.
    pub fn new(server_software: &str) -> Self {
        Self::with_date(httpdate::fmt_http_date(SystemTime::now()), server_software)
    }

    /// Creates a state seeded with an explicit `Date` value.
    pub fn with_date(date: impl Into<String>, server_software: impl Into<String>) -> Self {
        Self {
            status_line: String::new(),
            headers: vec![
                ("Date".to_string(), date.into()),
                ("Server".to_string(), server_software.into()),
            ],
        }
    }
}

/// The response-start callable handed to the application.
///
/// Succeeds at most once per request. A second call is rejected, leaves the
/// collected state untouched and poisons the response so the connection is
/// closed without writing anything.
#[derive(Debug)]
pub struct StartResponse {
    state: ResponseState,
    started: bool,
    violated: bool,
}

impl StartResponse {
    pub fn new(state: ResponseState) -> Self {
        Self {
            state,
            started: false,
            violated: false,
        }
    }

    /// Records the status line and appends `headers` after the seeded ones.
    ///
    /// `exc_info` is accepted for parity with the two-phase protocol but
    /// restarting a response after an error is not supported.
    pub fn start<I, K, V>(
        &mut self,
        status: impl Into<String>,
        headers: I,
        exc_info: Option<&dyn std::error::Error>,
    ) -> Result<(), ContractViolation>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        if let Some(err) = exc_info {
            tracing::warn!(error = %err, "start_response called with error info");
        }

        if self.started {
            self.violated = true;
            return Err(ContractViolation::AlreadyStarted);
        }

        self.started = true;
        self.state.status_line = status.into();
        self.state
            .headers
            .extend(headers.into_iter().map(|(k, v)| (k.into(), v.into())));
        Ok(())
    }

    pub fn is_started(&self) -> bool {
        self.started
    }

    /// Whether `start` was called more than once.
    pub fn is_violated(&self) -> bool {
        self.violated
    }

    /// Read-only view of what has been collected so far.
    pub fn state(&self) -> &ResponseState {
        &self.state
    }

    /// Hands back the collected state once the application has returned.
    pub fn finish(self) -> Result<ResponseState, ContractViolation> {
        if self.violated {
            return Err(ContractViolation::AlreadyStarted);
        }
        if !self.started {
            return Err(ContractViolation::NotStarted);
        }
        Ok(self.state)
    }
}

/// A finite, single-pass sequence of body chunks.
///
/// Chunks are produced lazily and consumed exactly once by the writer.
pub struct Body {
    chunks: Box<dyn Iterator<Item = Bytes>>,
}

impl Body {
    pub fn empty() -> Self {
        Self {
            chunks: Box::new(std::iter::empty()),
        }
    }

    /// Wraps any iterator of chunks without realizing it.
    pub fn from_chunks<I, C>(chunks: I) -> Self
    where
        I: IntoIterator<Item = C>,
        I::IntoIter: 'static,
        C: Into<Bytes> + 'static,
    {
        Self {
            chunks: Box::new(chunks.into_iter().map(Into::into)),
        }
    }
}

impl Iterator for Body {
    type Item = Bytes;

    fn next(&mut self) -> Option<Bytes> {
        self.chunks.next()
    }
}

impl std::fmt::Debug for Body {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Body").finish_non_exhaustive()
    }
}

impl From<Bytes> for Body {
    fn from(chunk: Bytes) -> Self {
        Self::from_chunks(std::iter::once(chunk))
    }
}

impl From<Vec<u8>> for Body {
    fn from(chunk: Vec<u8>) -> Self {
        Self::from(Bytes::from(chunk))
    }
}

impl From<String> for Body {
    fn from(chunk: String) -> Self {
        Self::from(Bytes::from(chunk))
    }
}

impl From<&'static str> for Body {
    fn from(chunk: &'static str) -> Self {
        Self::from(Bytes::from_static(chunk.as_bytes()))
    }
}
