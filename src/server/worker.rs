use tracing::{error, info};

use crate::app::Application;
use crate::server::ServerContext;
use crate::server::reactor::Reactor;
use crate::signal;

/// Exit status of a worker that stopped because it was interrupted.
pub const EXIT_OK: i32 = 0;
/// Exit status of a worker whose listening socket failed.
pub const EXIT_LISTENER_FAILED: i32 = 1;

/// Body of one worker process: its own reactor over the shared listener,
/// run until interrupted. Returns the process exit status.
pub fn run<A: Application>(ctx: &ServerContext<A>, index: usize) -> i32 {
    let pid = std::process::id();
    info!(worker = index, pid, "worker started");

    let result = Reactor::new(ctx).and_then(|mut reactor| reactor.run(&signal::INTERRUPTED));
    match result {
        Ok(()) => {
            info!(worker = index, pid, "worker stopped");
            EXIT_OK
        }
        Err(e) => {
            error!(worker = index, pid, error = %e, "listening socket failed, worker exiting");
            EXIT_LISTENER_FAILED
        }
    }
}
