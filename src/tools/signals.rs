// Signal delivery to launched utilities
//
// Stop/continue is a narrow, platform-dependent capability: it only works when
// the signalled PID is the process doing the work. A sudo wrapper relays
// SIGTERM to its child but cannot relay SIGSTOP, so elevated processes are
// never reported as pausable.
//
// SIGKILL is not relayed either. Every utility is spawned as the leader of its
// own process group, so an elevated kill targets the whole group through the
// elevation wrapper instead of leaving the tool orphaned behind a dead sudo.

use super::gateway::{PrivilegeToken, ToolCommand, ToolRunner};
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use std::io;
use std::sync::Arc;

/// Stop/continue capability for targets known to honor SIGSTOP/SIGCONT.
pub trait Pausable: Send + Sync {
    fn pause(&self) -> io::Result<()>;
    fn resume(&self) -> io::Result<()>;
}

pub trait ProcessSignals: Send + Sync {
    /// Polite termination request; the process may ignore it.
    fn terminate(&self) -> io::Result<()>;

    /// Forceful termination.
    fn kill(&self) -> io::Result<()>;

    fn pausable(&self) -> Option<&dyn Pausable>;
}

fn send(pid: u32, signal: Signal) -> io::Result<()> {
    #[allow(clippy::cast_possible_wrap)]
    let target = Pid::from_raw(pid as i32);
    kill(target, signal).map_err(io::Error::from)
}

/// Direct child signalled by PID
#[derive(Debug, Clone, Copy)]
pub struct UnixSignals {
    pid: u32,
}

impl UnixSignals {
    pub fn new(pid: u32) -> Self {
        Self { pid }
    }
}

impl Pausable for UnixSignals {
    fn pause(&self) -> io::Result<()> {
        send(self.pid, Signal::SIGSTOP)
    }

    fn resume(&self) -> io::Result<()> {
        send(self.pid, Signal::SIGCONT)
    }
}

impl ProcessSignals for UnixSignals {
    fn terminate(&self) -> io::Result<()> {
        send(self.pid, Signal::SIGTERM)
    }

    fn kill(&self) -> io::Result<()> {
        send(self.pid, Signal::SIGKILL)
    }

    fn pausable(&self) -> Option<&dyn Pausable> {
        Some(self)
    }
}

/// Process running behind the elevation wrapper. `pid` is the wrapper's PID,
/// which is also the process group of everything it started.
pub struct WrappedSignals {
    pid: u32,
    runner: Arc<dyn ToolRunner>,
    privilege: PrivilegeToken,
}

impl WrappedSignals {
    pub fn new(pid: u32, runner: Arc<dyn ToolRunner>, privilege: PrivilegeToken) -> Self {
        Self {
            pid,
            runner,
            privilege,
        }
    }

    pub(crate) fn group_kill_command(&self) -> ToolCommand {
        ToolCommand::new("kill-process-group", "kill").args([
            "-s".to_string(),
            "KILL".to_string(),
            "--".to_string(),
            format!("-{}", self.pid),
        ])
    }
}

impl std::fmt::Debug for WrappedSignals {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WrappedSignals").field("pid", &self.pid).finish()
    }
}

impl ProcessSignals for WrappedSignals {
    fn terminate(&self) -> io::Result<()> {
        send(self.pid, Signal::SIGTERM)
    }

    fn kill(&self) -> io::Result<()> {
        let cmd = self.group_kill_command();
        let escalated = match self.runner.execute(&cmd, Some(&self.privilege)) {
            Ok(output) if output.success() => return Ok(()),
            Ok(output) => format!("exit {}: {}", output.exit_code, output.stderr.trim()),
            Err(e) => e.to_string(),
        };

        // At least take the wrapper down so the waiter is released
        tracing::warn!(pid = self.pid, reason = %escalated, "Elevated group kill failed");
        send(self.pid, Signal::SIGKILL)?;
        Err(io::Error::new(
            io::ErrorKind::Other,
            format!("process group {} not killed: {}", self.pid, escalated),
        ))
    }

    fn pausable(&self) -> Option<&dyn Pausable> {
        None
    }
}
