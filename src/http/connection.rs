use std::io::{self, Read, Write};
use std::net::SocketAddr;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::Ordering;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use thiserror::Error;

use crate::app::Application;
use crate::http::environ::{Environ, ServerIdentity};
use crate::http::parser::{ParseError, body_offset, parse_request_line};
use crate::http::response::{ContractViolation, ResponseState, StartResponse};
use crate::http::writer::ResponseWriter;
use crate::signal;

/// Everything that ends a single connection without taking the worker down.
#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("malformed request: {0}")]
    Malformed(#[from] ParseError),
    #[error("request does not fit in a single {0}-byte read")]
    RequestTooLarge(usize),
    #[error("contract violation: {0}")]
    ContractViolation(#[from] ContractViolation),
    #[error("application error: {0:#}")]
    Application(anyhow::Error),
    #[error("application panicked: {0}")]
    Panicked(String),
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("connection already finished")]
    Finished,
}

/// A client socket the connection handler can drive.
pub trait Socket: Read + Write {
    /// Puts the socket in blocking mode so the response is written in one go.
    fn prepare_write(&self, timeout: Option<Duration>) -> io::Result<()>;
}

impl Socket for std::net::TcpStream {
    fn prepare_write(&self, timeout: Option<Duration>) -> io::Result<()> {
        self.set_nonblocking(false)?;
        self.set_write_timeout(timeout)
    }
}

impl Socket for mio::net::TcpStream {
    fn prepare_write(&self, timeout: Option<Duration>) -> io::Result<()> {
        let sock = socket2::SockRef::from(self);
        sock.set_nonblocking(false)?;
        sock.set_write_timeout(timeout)
    }
}

pub enum ConnectionState {
    AwaitingRequest,
    Processing(Bytes),
    Writing(ResponseWriter),
    Done,
}

/// How a call to [`Connection::run`] ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// A full response was written.
    Responded,
    /// The peer closed before sending anything.
    PeerClosed,
    /// Spurious readiness, nothing to read yet. The connection stays open.
    Pending,
}

enum ReadOutcome {
    Request(Bytes),
    Closed,
    WouldBlock,
}

/// One accepted client socket and its single request/response cycle.
///
/// The caller closes the socket after [`Connection::run`] returns anything
/// other than [`Outcome::Pending`], including every error.
pub struct Connection<S> {
    stream: S,
    peer: SocketAddr,
    read_capacity: usize,
    state: ConnectionState,
}

impl<S: Socket> Connection<S> {
    pub fn new(stream: S, peer: SocketAddr, read_capacity: usize) -> Self {
        Self {
            stream,
            peer,
            read_capacity,
            state: ConnectionState::AwaitingRequest,
        }
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn stream_mut(&mut self) -> &mut S {
        &mut self.stream
    }

    pub fn into_stream(self) -> S {
        self.stream
    }

    pub fn is_done(&self) -> bool {
        matches!(self.state, ConnectionState::Done)
    }

    pub fn run<A: Application + ?Sized>(
        &mut self,
        app: &A,
        identity: &ServerIdentity,
        write_timeout: Option<Duration>,
    ) -> Result<Outcome, ConnectionError> {
        loop {
            // Any error leaves the state at Done.
            match std::mem::replace(&mut self.state, ConnectionState::Done) {
                ConnectionState::AwaitingRequest => match self.read_request()? {
                    ReadOutcome::Request(buf) => {
                        self.state = ConnectionState::Processing(buf);
                    }
                    ReadOutcome::Closed => {
                        return Ok(Outcome::PeerClosed);
                    }
                    ReadOutcome::WouldBlock => {
                        self.state = ConnectionState::AwaitingRequest;
                        return Ok(Outcome::Pending);
                    }
                },

                ConnectionState::Processing(buf) => {
                    let writer = catch_unwind(AssertUnwindSafe(|| respond(&buf, app, identity)))
                        .map_err(|payload| ConnectionError::Panicked(panic_message(&*payload)))??;
                    self.state = ConnectionState::Writing(writer);
                }

                ConnectionState::Writing(mut writer) => {
                    self.stream.prepare_write(write_timeout)?;
                    writer.write_to(&mut self.stream)?;
                    return Ok(Outcome::Responded);
                }

                ConnectionState::Done => {
                    return Err(ConnectionError::Finished);
                }
            }
        }
    }

    /// A single bounded read. A request that fills the whole buffer may have
    /// been cut short and is rejected rather than answered from partial data.
    /// A read interrupted by a signal is retried unless the process is
    /// shutting down.
    fn read_request(&mut self) -> Result<ReadOutcome, ConnectionError> {
        let mut buf = BytesMut::zeroed(self.read_capacity);

        loop {
            match self.stream.read(&mut buf) {
                Ok(0) => return Ok(ReadOutcome::Closed),
                Ok(n) if n >= self.read_capacity => {
                    return Err(ConnectionError::RequestTooLarge(self.read_capacity));
                }
                Ok(n) => {
                    buf.truncate(n);
                    return Ok(ReadOutcome::Request(buf.freeze()));
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    return Ok(ReadOutcome::WouldBlock);
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {
                    if signal::INTERRUPTED.load(Ordering::SeqCst) {
                        return Err(e.into());
                    }
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
}

/// Parses `buf`, runs the application and serializes its response.
///
/// Nothing is written here; a failure at any step leaves the socket untouched.
pub fn respond<A: Application + ?Sized>(
    buf: &Bytes,
    app: &A,
    identity: &ServerIdentity,
) -> Result<ResponseWriter, ConnectionError> {
    let request = parse_request_line(buf)?;
    tracing::debug!(request = %request, "parsed request line");

    let body = buf.slice(body_offset(buf)..);
    let mut environ = Environ::build(request, body, identity);
    let mut start_response = StartResponse::new(ResponseState::new(&identity.software));

    let body = app
        .call(&mut environ, &mut start_response)
        .map_err(|e| application_error(e, &start_response))?;
    let state = start_response.finish()?;

    Ok(ResponseWriter::new(&state, body))
}

/// A second `start` propagated with `?` arrives wrapped in the application's
/// error; it is still a contract violation.
fn application_error(e: anyhow::Error, start_response: &StartResponse) -> ConnectionError {
    if start_response.is_violated() {
        return ContractViolation::AlreadyStarted.into();
    }
    match e.downcast::<ContractViolation>() {
        Ok(violation) => violation.into(),
        Err(e) => ConnectionError::Application(e),
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
