//! OS-level process liveness checks
//!
//! `kill(pid, 0)` answers whether the kernel knows a pid, but a child that
//! exited and was not yet reaped still answers "yes". On Linux the process
//! state in `/proc/<pid>/stat` tells those zombies apart.

/// What the OS reports about a pid.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Liveness {
    /// The process exists and is running.
    Alive,
    /// The kernel knows the pid but its state is not observable yet.
    Initializing,
    /// No such process, or it has exited (zombie).
    Dead,
}

impl Liveness {
    /// Anything short of confirmed death counts as alive.
    pub fn is_alive(self) -> bool {
        !matches!(self, Liveness::Dead)
    }
}

/// Probe the OS for the state of `pid`.
pub fn probe_process(pid: u32) -> Liveness {
    if pid == 0 {
        return Liveness::Dead;
    }

    #[cfg(unix)]
    {
        probe_unix(pid)
    }

    #[cfg(not(unix))]
    {
        Liveness::Dead
    }
}

/// Return `true` if an OS process with the given pid is alive.
pub fn is_pid_alive(pid: u32) -> bool {
    probe_process(pid).is_alive()
}

#[cfg(unix)]
fn probe_unix(pid: u32) -> Liveness {
    let Ok(raw) = libc::pid_t::try_from(pid) else {
        return Liveness::Dead;
    };

    // SAFETY: kill with sig=0 never sends a signal; it only checks pid existence.
    let result = unsafe { libc::kill(raw, 0) };
    if result != 0 {
        let err = std::io::Error::last_os_error();
        // EPERM: the process exists but belongs to someone else.
        return if err.raw_os_error() == Some(libc::EPERM) {
            Liveness::Alive
        } else {
            Liveness::Dead
        };
    }

    proc_state(pid)
}

#[cfg(target_os = "linux")]
fn proc_state(pid: u32) -> Liveness {
    let Ok(stat) = std::fs::read_to_string(format!("/proc/{pid}/stat")) else {
        return Liveness::Initializing;
    };
    // Format: "pid (comm) S ...". comm may contain spaces and parens, so
    // look for the state after the last ')'.
    let state = stat
        .rfind(')')
        .and_then(|idx| stat[idx + 1..].split_whitespace().next());
    match state {
        Some("Z") | Some("X") | Some("x") => Liveness::Dead,
        Some(_) => Liveness::Alive,
        None => Liveness::Initializing,
    }
}

#[cfg(all(unix, not(target_os = "linux")))]
fn proc_state(_pid: u32) -> Liveness {
    Liveness::Alive
}
