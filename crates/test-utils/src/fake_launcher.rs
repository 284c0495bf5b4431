use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Result};
use tokio::sync::oneshot;
use stagechain::exec::{ProcessHandle, ProcessLauncher, ProcessSpec};

#[derive(Default)]
struct LogState {
    specs: Vec<ProcessSpec>,
    cancels: HashMap<String, oneshot::Receiver<()>>,
    killed: HashSet<String>,
    refused: HashSet<String>,
}

/// Shared view of what a `FakeLauncher` was asked to do.
#[derive(Clone, Default)]
pub struct LaunchLog {
    state: Arc<Mutex<LogState>>,
}

impl LaunchLog {
    pub fn specs(&self) -> Vec<ProcessSpec> {
        self.state.lock().unwrap().specs.clone()
    }

    pub fn signatures(&self) -> Vec<String> {
        self.specs().into_iter().map(|s| s.signature).collect()
    }

    pub fn programs(&self) -> Vec<String> {
        self.specs().into_iter().map(|s| s.program).collect()
    }

    /// Make launching `program` fail as if it was not installed.
    pub fn refuse_program(&self, program: &str) {
        self.state.lock().unwrap().refused.insert(program.to_string());
    }

    /// Whether `kill()` was called on the handle of `signature`.
    pub fn kill_requested(&self, signature: &str) -> bool {
        let mut state = self.state.lock().unwrap();
        if state.killed.contains(signature) {
            return true;
        }
        let killed = state
            .cancels
            .get_mut(signature)
            .is_some_and(|rx| rx.try_recv().is_ok());
        if killed {
            state.killed.insert(signature.to_string());
        }
        killed
    }
}

/// A fake launcher that:
/// - records every process spec it is asked to start
/// - never runs anything; tests deliver completions themselves.
pub struct FakeLauncher {
    log: LaunchLog,
    next_pid: u32,
}

impl FakeLauncher {
    pub fn new() -> (Self, LaunchLog) {
        let log = LaunchLog::default();
        (
            Self {
                log: log.clone(),
                next_pid: 1000,
            },
            log,
        )
    }
}

impl ProcessLauncher for FakeLauncher {
    fn launch(&mut self, spec: ProcessSpec) -> Result<ProcessHandle> {
        let mut state = self.log.state.lock().unwrap();
        if state.refused.contains(&spec.program) {
            return Err(anyhow!("program '{}' not found", spec.program));
        }

        let (tx, rx) = oneshot::channel();
        state.cancels.insert(spec.signature.clone(), rx);
        state.killed.remove(&spec.signature);
        state.specs.push(spec.clone());

        self.next_pid += 1;
        Ok(ProcessHandle::new(spec.signature, Some(self.next_pid), tx))
    }
}
