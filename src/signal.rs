//! Interrupt handling.
//!
//! `SIGINT` is installed without `SA_RESTART`, so a blocking readiness wait
//! or `waitpid` returns `EINTR` and the caller gets a chance to look at
//! [`INTERRUPTED`].

use std::sync::atomic::{AtomicBool, Ordering};

use nix::sys::signal::{SaFlags, SigAction, SigHandler, SigSet, Signal, sigaction};

/// Set once an interrupt has been delivered to this process.
pub static INTERRUPTED: AtomicBool = AtomicBool::new(false);

extern "C" fn on_interrupt(_: nix::libc::c_int) {
    INTERRUPTED.store(true, Ordering::SeqCst);
}

/// Installs the interrupt handler. Forked workers inherit it.
pub fn install_interrupt_handler() -> nix::Result<()> {
    let action = SigAction::new(
        SigHandler::Handler(on_interrupt),
        SaFlags::empty(),
        SigSet::empty(),
    );
    // The handler only touches an atomic.
    unsafe { sigaction(Signal::SIGINT, &action) }?;
    Ok(())
}
