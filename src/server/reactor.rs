use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;
use std::os::fd::AsRawFd;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use mio::net::TcpStream;
use mio::unix::SourceFd;
use mio::{Events, Interest, Poll, Token};
use tracing::{debug, info, warn};

use crate::app::Application;
use crate::http::connection::{Connection, Outcome};
use crate::server::listener::{self, Accept};
use crate::server::{ServerContext, log_outcome};

/// Token of the shared listening socket.
pub const LISTENER: Token = Token(0);

const EVENT_CAPACITY: usize = 1024;

/// A single-threaded readiness loop over the shared listening socket and the
/// client sockets this process accepted.
///
/// Each ready socket is handled to completion before the next one; a client
/// socket is deregistered and closed after its one request.
pub struct Reactor<'a, A> {
    ctx: &'a ServerContext<A>,
    poll: Poll,
    events: Events,
    connections: HashMap<Token, Connection<TcpStream>>,
    next_token: usize,
    accepted: u64,
}

impl<'a, A: Application> Reactor<'a, A> {
    pub fn new(ctx: &'a ServerContext<A>) -> io::Result<Self> {
        let poll = Poll::new()?;
        let fd = ctx.listener.as_raw_fd();
        poll.registry()
            .register(&mut SourceFd(&fd), LISTENER, Interest::READABLE)?;

        Ok(Self {
            ctx,
            poll,
            events: Events::with_capacity(EVENT_CAPACITY),
            connections: HashMap::new(),
            next_token: LISTENER.0 + 1,
            accepted: 0,
        })
    }

    /// Number of sockets currently registered, the listener included.
    pub fn registered(&self) -> usize {
        self.connections.len() + 1
    }

    /// Connections accepted by this reactor so far.
    pub fn accepted(&self) -> u64 {
        self.accepted
    }

    /// Runs until `stop` is set. Only a failure of the listening socket ends
    /// the loop early.
    pub fn run(&mut self, stop: &AtomicBool) -> io::Result<()> {
        let timeout = self.ctx.config.poll_interval();
        while !stop.load(Ordering::SeqCst) {
            self.turn(Some(timeout), stop)?;
        }

        info!(
            pid = std::process::id(),
            open = self.connections.len(),
            "reactor stopped"
        );
        Ok(())
    }

    /// Waits once for readiness and dispatches every reported event.
    ///
    /// Returns the number of events handled. An interrupted wait handles
    /// nothing, and once `stop` is set remaining events are dropped.
    pub fn turn(&mut self, timeout: Option<Duration>, stop: &AtomicBool) -> io::Result<usize> {
        match self.poll.poll(&mut self.events, timeout) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::Interrupted => return Ok(0),
            Err(e) => return Err(e),
        }

        let ready: Vec<Token> = self.events.iter().map(|event| event.token()).collect();
        let mut handled = 0;
        for token in ready {
            if stop.load(Ordering::SeqCst) {
                break;
            }
            match token {
                LISTENER => self.accept_ready()?,
                token => self.connection_ready(token),
            }
            handled += 1;
        }

        Ok(handled)
    }

    /// Drains the accept queue. Readiness is edge-triggered, so stopping
    /// before would-block could strand pending connections.
    fn accept_ready(&mut self) -> io::Result<()> {
        loop {
            match listener::accept(&self.ctx.listener)? {
                Accept::Accepted(stream, peer) => self.register(stream, peer),
                Accept::WouldBlock => return Ok(()),
            }
        }
    }

    fn register(&mut self, stream: std::net::TcpStream, peer: SocketAddr) {
        if let Err(e) = stream.set_nonblocking(true) {
            warn!(%peer, error = %e, "could not make client socket non-blocking");
            return;
        }

        let mut stream = TcpStream::from_std(stream);
        let token = self.allocate_token();
        if let Err(e) = self
            .poll
            .registry()
            .register(&mut stream, token, Interest::READABLE)
        {
            warn!(%peer, error = %e, "could not register client socket");
            return;
        }

        self.accepted += 1;
        debug!(%peer, token = token.0, "accepted connection");
        self.connections.insert(
            token,
            Connection::new(stream, peer, self.ctx.config.read_buffer_size),
        );
    }

    fn connection_ready(&mut self, token: Token) {
        let Some(conn) = self.connections.get_mut(&token) else {
            return;
        };

        let result = conn.run(
            &self.ctx.app,
            &self.ctx.identity,
            self.ctx.config.write_timeout(),
        );
        log_outcome(conn.peer(), &result);

        if let Ok(Outcome::Pending) = result {
            return;
        }
        self.close(token);
    }

    fn close(&mut self, token: Token) {
        if let Some(mut conn) = self.connections.remove(&token) {
            if let Err(e) = self.poll.registry().deregister(conn.stream_mut()) {
                debug!(peer = %conn.peer(), error = %e, "deregister failed");
            }
        }
    }

    fn allocate_token(&mut self) -> Token {
        loop {
            let token = Token(self.next_token);
            self.next_token = self.next_token.wrapping_add(1);
            if token != LISTENER && !self.connections.contains_key(&token) {
                return token;
            }
        }
    }
}
