//! Single-acceptor variants: serial, one thread per connection, and one
//! forked child per connection.
//!
//! All three wait for accept-readiness through a readiness wait on the
//! listener alone, so an interrupt ends them the same way it ends a reactor.
//! Client reads block for at most one poll interval at a time, so an idle
//! client cannot hold a handler past shutdown.

use std::io;
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::os::fd::AsRawFd;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use mio::unix::SourceFd;
use mio::{Events, Interest, Poll};
use nix::sys::wait::{WaitPidFlag, WaitStatus, waitpid};
use nix::unistd::{ForkResult, Pid, fork};
use tracing::{debug, error, info, warn};

use crate::app::Application;
use crate::http::connection::{Connection, Outcome};
use crate::server::listener::{self, Accept};
use crate::server::reactor::LISTENER;
use crate::server::{ServerContext, log_outcome};

/// How long a stopping forking server waits for its handlers to exit.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);
const REAP_INTERVAL: Duration = Duration::from_millis(10);

struct AcceptWait {
    poll: Poll,
    events: Events,
}

impl AcceptWait {
    fn new(listener: &TcpListener) -> io::Result<Self> {
        let poll = Poll::new()?;
        let fd = listener.as_raw_fd();
        poll.registry()
            .register(&mut SourceFd(&fd), LISTENER, Interest::READABLE)?;
        Ok(Self {
            poll,
            events: Events::with_capacity(1),
        })
    }

    /// Blocks until the listener may be readable. Returns false once `stop`
    /// is set.
    fn wait(&mut self, timeout: Duration, stop: &AtomicBool) -> io::Result<bool> {
        match self.poll.poll(&mut self.events, Some(timeout)) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
        Ok(!stop.load(Ordering::SeqCst))
    }
}

/// Accepts and answers one connection at a time.
pub fn serve_serial<A: Application>(
    ctx: &ServerContext<A>,
    stop: &AtomicBool,
) -> anyhow::Result<()> {
    let mut acceptor = AcceptWait::new(&ctx.listener)?;

    while acceptor.wait(ctx.config.poll_interval(), stop)? {
        while let Accept::Accepted(stream, peer) = listener::accept(&ctx.listener)? {
            handle(ctx, stream, peer, stop);
            if stop.load(Ordering::SeqCst) {
                break;
            }
        }
    }

    info!("serial server stopped");
    Ok(())
}

/// Accepts in this thread and answers every connection on its own thread.
///
/// Returns once `stop` is set and every handler thread has finished.
pub fn serve_threaded<A: Application>(
    ctx: &ServerContext<A>,
    stop: &AtomicBool,
) -> anyhow::Result<()> {
    let mut acceptor = AcceptWait::new(&ctx.listener)?;

    thread::scope(|scope| -> anyhow::Result<()> {
        while acceptor.wait(ctx.config.poll_interval(), stop)? {
            while let Accept::Accepted(stream, peer) = listener::accept(&ctx.listener)? {
                let spawned = thread::Builder::new()
                    .name(format!("conn-{}", peer))
                    .spawn_scoped(scope, move || handle(ctx, stream, peer, stop));
                if let Err(e) = spawned {
                    error!(%peer, error = %e, "thread spawn failed, dropping connection");
                }
            }
        }
        Ok(())
    })?;

    info!("threaded server stopped");
    Ok(())
}

/// Accepts in this process and answers every connection in a forked child.
pub fn serve_forking<A: Application>(
    ctx: &ServerContext<A>,
    stop: &AtomicBool,
) -> anyhow::Result<()> {
    let mut acceptor = AcceptWait::new(&ctx.listener)?;
    let mut live = 0usize;

    while acceptor.wait(ctx.config.poll_interval(), stop)? {
        while let Accept::Accepted(stream, peer) = listener::accept(&ctx.listener)? {
            // Safety: the acceptor runs no other threads, and the child
            // leaves through process::exit.
            match unsafe { fork() } {
                Ok(ForkResult::Child) => {
                    handle(ctx, stream, peer, stop);
                    std::process::exit(0);
                }
                Ok(ForkResult::Parent { child }) => {
                    debug!(%peer, pid = child.as_raw(), "forked connection handler");
                    live += 1;
                    drop(stream);
                }
                Err(e) => {
                    error!(%peer, error = %e, "fork failed, dropping connection");
                }
            }
        }
        live = live.saturating_sub(reap_children());
    }

    let deadline = Instant::now() + SHUTDOWN_GRACE;
    live = live.saturating_sub(reap_children());
    while live > 0 && Instant::now() < deadline {
        thread::sleep(REAP_INTERVAL);
        live = live.saturating_sub(reap_children());
    }
    if live > 0 {
        warn!(live, "connection handlers still running at shutdown");
    }

    info!("forking server stopped");
    Ok(())
}

/// Drives one connection on a blocking socket.
///
/// Each read waits at most one poll interval; an idle client is waited on
/// until `stop` is set.
fn handle<A: Application>(
    ctx: &ServerContext<A>,
    stream: TcpStream,
    peer: SocketAddr,
    stop: &AtomicBool,
) {
    let ready = stream
        .set_nonblocking(false)
        .and_then(|()| stream.set_read_timeout(Some(ctx.config.poll_interval())));
    if let Err(e) = ready {
        warn!(%peer, error = %e, "could not configure client socket");
        return;
    }
    debug!(%peer, "accepted connection");

    let mut conn = Connection::new(stream, peer, ctx.config.read_buffer_size);
    loop {
        let result = conn.run(&ctx.app, &ctx.identity, ctx.config.write_timeout());
        if matches!(result, Ok(Outcome::Pending)) && !stop.load(Ordering::SeqCst) {
            continue;
        }
        log_outcome(peer, &result);
        return;
    }
}

/// Collects every finished child without blocking. Returns how many were
/// collected.
fn reap_children() -> usize {
    let mut reaped = 0;
    loop {
        match waitpid(Pid::from_raw(-1), Some(WaitPidFlag::WNOHANG)) {
            Ok(WaitStatus::StillAlive) | Err(_) => return reaped,
            Ok(status @ (WaitStatus::Exited(..) | WaitStatus::Signaled(..))) => {
                debug!(?status, "reaped connection handler");
                reaped += 1;
            }
            Ok(status) => debug!(?status, "connection handler changed state"),
        }
    }
}
