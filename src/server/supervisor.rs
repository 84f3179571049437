use anyhow::Context;
use nix::errno::Errno;
use nix::sys::signal::{Signal, kill};
use nix::sys::wait::{WaitStatus, waitpid};
use nix::unistd::{ForkResult, Pid, fork};
use tracing::{info, warn};

use crate::app::Application;
use crate::server::{ServerContext, worker};

/// A forked worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerProcess {
    pub index: usize,
    pub pid: Pid,
}

/// How waiting on one worker ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinOutcome {
    Exited(i32),
    Signaled(Signal),
    /// The wait itself was interrupted; the worker was left unreaped.
    Interrupted,
    Failed(Errno),
}

/// Owns the worker pool. Dead workers are not restarted.
#[derive(Debug)]
pub struct Supervisor {
    workers: Vec<WorkerProcess>,
}

impl Supervisor {
    /// Forks `count` workers. Each child runs `worker_main(index)` and exits
    /// with the status it returns; it never comes back to the caller.
    pub fn spawn<F>(count: usize, worker_main: F) -> anyhow::Result<Self>
    where
        F: Fn(usize) -> i32,
    {
        let mut workers = Vec::with_capacity(count);

        for index in 0..count {
            // Safety: the supervisor runs no other threads, and the child
            // leaves through process::exit.
            match unsafe { fork() } {
                Ok(ForkResult::Child) => {
                    let code = worker_main(index);
                    std::process::exit(code);
                }
                Ok(ForkResult::Parent { child }) => {
                    info!(worker = index, pid = child.as_raw(), "started worker");
                    workers.push(WorkerProcess { index, pid: child });
                }
                Err(e) => {
                    for w in &workers {
                        let _ = kill(w.pid, Signal::SIGTERM);
                    }
                    let _ = Self { workers }.join();
                    return Err(e).context("forking worker");
                }
            }
        }

        Ok(Self { workers })
    }

    pub fn workers(&self) -> &[WorkerProcess] {
        &self.workers
    }

    /// Waits for every worker in spawn order. An interrupted wait gives up on
    /// that worker only and moves on to the next.
    pub fn join(self) -> Vec<(WorkerProcess, JoinOutcome)> {
        self.workers
            .into_iter()
            .map(|w| {
                let outcome = join_one(w.pid);
                info!(worker = w.index, pid = w.pid.as_raw(), ?outcome, "stopped worker");
                (w, outcome)
            })
            .collect()
    }
}

fn join_one(pid: Pid) -> JoinOutcome {
    loop {
        match waitpid(pid, None) {
            Ok(WaitStatus::Exited(_, code)) => return JoinOutcome::Exited(code),
            Ok(WaitStatus::Signaled(_, signal, _)) => return JoinOutcome::Signaled(signal),
            Ok(_) => continue,
            Err(Errno::EINTR) => return JoinOutcome::Interrupted,
            Err(e) => return JoinOutcome::Failed(e),
        }
    }
}

/// Pre-forked serving: one reactor per CPU (or per configured worker), all on
/// the same listening socket.
pub fn run<A: Application>(ctx: &ServerContext<A>) -> anyhow::Result<()> {
    let supervisor = Supervisor::spawn(ctx.config.workers, |index| worker::run(ctx, index))?;

    let unclean = supervisor
        .join()
        .into_iter()
        .filter(|(_, outcome)| {
            !matches!(
                outcome,
                JoinOutcome::Exited(worker::EXIT_OK) | JoinOutcome::Interrupted
            )
        })
        .count();
    if unclean > 0 {
        warn!(unclean, "some workers did not shut down cleanly");
    }

    Ok(())
}
