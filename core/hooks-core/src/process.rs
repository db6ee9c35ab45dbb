//! Process liveness and signalling.
//!
//! Registry rows reference pids that may have exited (or been recycled)
//! without cleanup. Callers ask through `ProcessProbe` so the registry and
//! launcher logic stays testable and portable.

use sysinfo::{Pid, ProcessRefreshKind, System, UpdateKind};

pub trait ProcessProbe: Send + Sync {
    fn is_alive(&self, pid: u32) -> bool;
}

pub trait ProcessSignals: Send + Sync {
    /// Requests a graceful stop (SIGTERM).
    fn terminate(&self, pid: u32) -> bool;
    /// Forces the process down (SIGKILL).
    fn kill(&self, pid: u32) -> bool;
}

/// Liveness and signals backed by the operating system.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemProcesses;

impl ProcessProbe for SystemProcesses {
    fn is_alive(&self, pid: u32) -> bool {
        is_pid_alive(pid)
    }
}

impl ProcessSignals for SystemProcesses {
    fn terminate(&self, pid: u32) -> bool {
        send_signal(pid, Signal::Terminate)
    }

    fn kill(&self, pid: u32) -> bool {
        send_signal(pid, Signal::Kill)
    }
}

/// Signal 0 probe. EPERM means the process exists but belongs to someone else.
pub fn is_pid_alive(pid: u32) -> bool {
    if pid == 0 || pid > i32::MAX as u32 {
        return false;
    }
    #[cfg(unix)]
    {
        // SAFETY: kill with signal 0 performs only the existence/permission check.
        #[allow(unsafe_code)]
        let result = unsafe { libc::kill(pid as i32, 0) };
        if result == 0 {
            return true;
        }
        std::io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
    }
    #[cfg(not(unix))]
    {
        let mut sys = System::new();
        let sys_pid = Pid::from_u32(pid);
        sys.refresh_process_specifics(sys_pid, ProcessRefreshKind::new());
        sys.process(sys_pid).is_some()
    }
}

#[derive(Debug, Clone, Copy)]
enum Signal {
    Terminate,
    Kill,
}

fn send_signal(pid: u32, signal: Signal) -> bool {
    if pid == 0 || pid > i32::MAX as u32 {
        return false;
    }
    #[cfg(unix)]
    {
        let signo = match signal {
            Signal::Terminate => libc::SIGTERM,
            Signal::Kill => libc::SIGKILL,
        };
        // SAFETY: plain POSIX signal delivery to a positive pid.
        #[allow(unsafe_code)]
        let result = unsafe { libc::kill(pid as i32, signo) };
        result == 0
    }
    #[cfg(not(unix))]
    {
        let _ = signal;
        let mut sys = System::new();
        let sys_pid = Pid::from_u32(pid);
        sys.refresh_process_specifics(sys_pid, ProcessRefreshKind::new());
        sys.process(sys_pid).map(|p| p.kill()).unwrap_or(false)
    }
}

/// Pid of the process that invoked us.
pub fn parent_pid() -> u32 {
    #[cfg(unix)]
    {
        // SAFETY: getppid has no preconditions and cannot fail.
        #[allow(unsafe_code)]
        let ppid = unsafe { libc::getppid() };
        ppid as u32
    }
    #[cfg(not(unix))]
    {
        std::process::id()
    }
}

/// Walks up the process tree from `start` looking for the assistant binary.
///
/// Hooks run a few shells deep under the assistant, so the direct parent is
/// not necessarily the process that owns the session.
pub fn find_assistant_pid(start: u32, binary_name: &str) -> Option<u32> {
    let mut sys = System::new();
    sys.refresh_processes_specifics(ProcessRefreshKind::new().with_cmd(UpdateKind::Always));

    let mut current = Pid::from_u32(start);
    for _ in 0..32 {
        let process = sys.process(current)?;
        let name = process.name().to_lowercase();
        let cmd = process.cmd();
        let first_arg_matches = cmd
            .first()
            .map(|arg| arg == binary_name || arg.ends_with(&format!("/{}", binary_name)))
            .unwrap_or(false);
        if name == binary_name || first_arg_matches {
            return Some(current.as_u32());
        }
        current = process.parent()?;
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn current_process_is_alive() {
        assert!(is_pid_alive(std::process::id()));
        assert!(SystemProcesses.is_alive(std::process::id()));
    }

    #[test]
    fn invalid_pids_are_dead() {
        assert!(!is_pid_alive(0));
        assert!(!is_pid_alive(u32::MAX));
        assert!(!SystemProcesses.terminate(0));
    }

    #[cfg(unix)]
    #[test]
    fn exited_child_is_dead() {
        let mut child = std::process::Command::new("true")
            .spawn()
            .expect("spawn true");
        let pid = child.id();
        child.wait().expect("wait");
        assert!(!is_pid_alive(pid));
    }

    #[cfg(unix)]
    #[test]
    fn terminate_stops_a_sleeping_child() {
        let mut child = std::process::Command::new("sleep")
            .arg("30")
            .spawn()
            .expect("spawn sleep");
        assert!(SystemProcesses.terminate(child.id()));
        let status = child.wait().expect("wait");
        assert!(!status.success());
    }

    #[test]
    fn parent_pid_is_alive() {
        assert!(is_pid_alive(parent_pid()));
    }

    #[test]
    fn missing_assistant_yields_none() {
        assert_eq!(
            find_assistant_pid(std::process::id(), "definitely-not-a-real-binary"),
            None
        );
    }
}
