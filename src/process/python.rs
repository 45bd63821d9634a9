//! Python interpreter process bootstrap and interrupt delivery.

use std::process::Stdio;

use tokio::process::{Child, Command};

use super::ProcessHandle;
use crate::kernel::{KernelError, KernelResult};

/// Request loop run inside the interpreter. Reads one JSON request per line
/// on stdin and answers with NDJSON on stdout.
pub const BOOTSTRAP: &str = include_str!("bootstrap.py");

pub fn start_python(python: &str, bootstrap: &str) -> KernelResult<ProcessHandle> {
    let mut cmd = Command::new(python);
    cmd.arg("-u") // unbuffered
        .arg("-c")
        .arg(bootstrap)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child: Child = cmd.spawn().map_err(KernelError::Spawn)?;
    let stdin = child
        .stdin
        .take()
        .ok_or_else(|| KernelError::Protocol("interpreter has no stdin".into()))?;
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| KernelError::Protocol("interpreter has no stdout".into()))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| KernelError::Protocol("interpreter has no stderr".into()))?;

    Ok(ProcessHandle {
        child,
        stdin,
        stdout,
        stderr,
    })
}

/// Deliver SIGINT to the interpreter with `pid`. The bootstrap turns it into
/// `KeyboardInterrupt` while user code runs and ignores it otherwise.
#[cfg(unix)]
pub fn send_interrupt(pid: u32) -> KernelResult<()> {
    use nix::errno::Errno;
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    let pid = i32::try_from(pid).map_err(|_| KernelError::Protocol(format!("pid {pid} out of range")))?;
    match kill(Pid::from_raw(pid), Signal::SIGINT) {
        Ok(()) => Ok(()),
        Err(Errno::ESRCH) => Err(KernelError::ProcessExited),
        Err(errno) => Err(KernelError::Io(errno.into())),
    }
}
