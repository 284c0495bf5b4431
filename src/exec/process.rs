// src/exec/process.rs

use std::fmt;
use std::path::PathBuf;

use anyhow::Result;
use tokio::sync::oneshot;
use tracing::debug;

/// How an external process terminated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitStatus {
    /// The process exited on its own with this code (0 = success).
    Exited(i32),
    /// The process was terminated through [`ProcessHandle::kill`].
    Killed,
}

impl ExitStatus {
    pub fn success(self) -> bool {
        self == ExitStatus::Exited(0)
    }

    /// Integer code reported to observers; `Killed` maps to -1.
    pub fn code(self) -> i32 {
        match self {
            ExitStatus::Exited(code) => code,
            ExitStatus::Killed => -1,
        }
    }
}

impl fmt::Display for ExitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExitStatus::Exited(code) => write!(f, "exit code {code}"),
            ExitStatus::Killed => write!(f, "killed"),
        }
    }
}

/// Everything needed to start one external solver invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessSpec {
    /// Executable name or path.
    pub program: String,
    pub working_dir: PathBuf,
    pub args: Vec<String>,
    /// Routing key for the completion event.
    pub signature: String,
}

/// Handle to a started external process.
///
/// Dropping the handle without calling [`kill`](Self::kill) also terminates
/// the process; either way its completion is still reported.
#[derive(Debug)]
pub struct ProcessHandle {
    signature: String,
    pid: Option<u32>,
    cancel: Option<oneshot::Sender<()>>,
}

impl ProcessHandle {
    pub fn new(signature: String, pid: Option<u32>, cancel: oneshot::Sender<()>) -> Self {
        Self {
            signature,
            pid,
            cancel: Some(cancel),
        }
    }

    pub fn signature(&self) -> &str {
        &self.signature
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Request termination. Only the first call has an effect; returns
    /// whether this call sent the request.
    pub fn kill(&mut self) -> bool {
        match self.cancel.take() {
            Some(cancel) => {
                if cancel.send(()).is_err() {
                    debug!(signature = %self.signature, "process already finished while killing");
                }
                true
            }
            None => false,
        }
    }

    pub fn kill_requested(&self) -> bool {
        self.cancel.is_none()
    }
}

/// Starts external processes on behalf of tasks.
///
/// `launch` is synchronous: it returns as soon as the process is spawned.
/// Implementations must later deliver exactly one completion for the
/// returned handle's signature.
pub trait ProcessLauncher: Send {
    fn launch(&mut self, spec: ProcessSpec) -> Result<ProcessHandle>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kill_is_idempotent() {
        let (tx, mut rx) = oneshot::channel();
        let mut handle = ProcessHandle::new("prog@/tmp".to_string(), Some(42), tx);

        assert!(handle.kill());
        assert!(!handle.kill());
        assert!(handle.kill_requested());
        assert_eq!(rx.try_recv(), Ok(()));
    }

    #[test]
    fn killed_is_not_success() {
        assert!(ExitStatus::Exited(0).success());
        assert!(!ExitStatus::Exited(3).success());
        assert!(!ExitStatus::Killed.success());
        assert_eq!(ExitStatus::Killed.code(), -1);
    }
}
