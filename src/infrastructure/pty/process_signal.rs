use std::io;

use crate::domain::primitive::Signal;

fn to_pid(pid: u32) -> io::Result<libc::pid_t> {
    libc::pid_t::try_from(pid)
        .ok()
        .filter(|pid| *pid > 0)
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, format!("invalid pid {pid}")))
}

fn kill(target: libc::pid_t, signal: Signal) -> io::Result<()> {
    // SAFETY: `kill` has no memory-safety preconditions; an invalid target is
    // reported through errno.
    let rc = unsafe { libc::kill(target, signal.as_raw()) };
    if rc == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}

fn ignore_vanished(result: io::Result<()>) -> io::Result<()> {
    match result {
        Err(e) if e.raw_os_error() == Some(libc::ESRCH) => Ok(()),
        other => other,
    }
}

/// Signal the process group led by `pid`, falling back to `pid` alone when the
/// group cannot be signalled. A process that no longer exists is not an error.
pub(crate) fn signal_group(pid: u32, signal: Signal) -> io::Result<()> {
    let pid = to_pid(pid)?;
    match kill(-pid, signal) {
        Ok(()) => Ok(()),
        Err(_) => ignore_vanished(kill(pid, signal)),
    }
}

/// Signal `pid` only. A process that no longer exists is not an error.
pub(crate) fn signal_process(pid: u32, signal: Signal) -> io::Result<()> {
    ignore_vanished(kill(to_pid(pid)?, signal))
}
