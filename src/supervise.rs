use nix::errno::Errno;
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use std::io;
use std::process::{Child, ExitStatus};
use std::thread;
use std::time::{Duration, Instant};

use crate::error::FunctestError;

const POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    Exited(ExitStatus),
    TimedOut,
}

/// First phase: wait for `child` to exit, at most `timeout`. A timeout too
/// large to be represented as an `Instant` means no deadline.
pub fn wait_bounded(child: &mut Child, timeout: Duration) -> io::Result<WaitOutcome> {
    let deadline = Instant::now().checked_add(timeout);
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(WaitOutcome::Exited(status));
        }
        let pause = match deadline {
            Some(deadline) => {
                let now = Instant::now();
                if now >= deadline {
                    return Ok(WaitOutcome::TimedOut);
                }
                POLL_INTERVAL.min(deadline - now)
            }
            None => POLL_INTERVAL,
        };
        thread::sleep(pause);
    }
}

/// Asks the child to exit with SIGTERM. Never escalates to SIGKILL.
pub fn terminate(child: &Child) -> Result<(), FunctestError> {
    let pid = Pid::from_raw(child.id() as i32);
    match kill(pid, Signal::SIGTERM) {
        Ok(()) | Err(Errno::ESRCH) => Ok(()),
        Err(err) => Err(err.into()),
    }
}

/// Second phase: after `terminate`, block until the child is reaped. There is
/// no deadline here; a child ignoring SIGTERM blocks the caller.
pub fn terminate_and_reap(child: &mut Child) -> Result<ExitStatus, FunctestError> {
    terminate(child)?;
    tracing::debug!(pid = child.id(), "sent SIGTERM, waiting for exit");
    Ok(child.wait()?)
}
