//! Interpreter process management (startup/IO/teardown).

use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout};

pub mod python;

pub struct ProcessHandle {
    pub child: Child,
    pub stdin: ChildStdin,
    pub stdout: ChildStdout,
    pub stderr: ChildStderr,
}
