//! Accepting connections and driving them through the handler.
//!
//! - **`listener`**: Binding or adopting the shared listening socket
//! - **`reactor`**: Readiness-driven event loop for one process
//! - **`worker`**: One reactor per worker process
//! - **`supervisor`**: Spawning and joining the worker pool
//! - **`blocking`**: The serial, thread-per-connection and fork-per-connection variants

pub mod blocking;
pub mod listener;
pub mod reactor;
pub mod supervisor;
pub mod worker;

use std::io;
use std::net::{SocketAddr, TcpListener};

use tracing::{debug, error, trace};

use crate::app::Application;
use crate::config::{Config, Mode};
use crate::http::connection::{ConnectionError, Outcome};
use crate::http::environ::ServerIdentity;
use crate::signal;

/// Everything a serving process needs, built once at startup and passed by
/// reference to the supervisor, the workers and their reactors.
pub struct ServerContext<A> {
    pub config: Config,
    pub listener: TcpListener,
    pub identity: ServerIdentity,
    pub app: A,
}

impl<A: Application> ServerContext<A> {
    pub fn new(config: Config, listener: TcpListener, app: A) -> io::Result<Self> {
        let identity = listener::server_identity(&listener, &config)?;
        Ok(Self::with_identity(config, listener, identity, app))
    }

    pub fn with_identity(
        config: Config,
        listener: TcpListener,
        identity: ServerIdentity,
        app: A,
    ) -> Self {
        Self {
            config,
            listener,
            identity,
            app,
        }
    }
}

/// Serves until interrupted, using the configured concurrency mode.
pub fn serve<A: Application>(ctx: &ServerContext<A>) -> anyhow::Result<()> {
    match ctx.config.mode {
        Mode::Blocking => blocking::serve_serial(ctx, &signal::INTERRUPTED),
        Mode::Threaded => blocking::serve_threaded(ctx, &signal::INTERRUPTED),
        Mode::Forking => blocking::serve_forking(ctx, &signal::INTERRUPTED),
        Mode::Reactor => {
            let mut reactor = reactor::Reactor::new(ctx)?;
            reactor.run(&signal::INTERRUPTED)?;
            Ok(())
        }
        Mode::Prefork => supervisor::run(ctx),
    }
}

pub(crate) fn log_outcome(peer: SocketAddr, result: &Result<Outcome, ConnectionError>) {
    match result {
        Ok(Outcome::Responded) => debug!(%peer, "response sent"),
        Ok(Outcome::PeerClosed) => debug!(%peer, "peer closed without sending a request"),
        Ok(Outcome::Pending) => trace!(%peer, "nothing to read yet"),
        Err(e) => error!(%peer, error = ?e, "connection failed"),
    }
}
