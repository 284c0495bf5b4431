// src/exec/launcher.rs

//! Production process launcher built on `tokio::process`.

use std::process::Stdio;

use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

use crate::engine::RuntimeEvent;

use super::process::{ExitStatus, ProcessHandle, ProcessLauncher, ProcessSpec};

/// Spawns external programs and reports their termination to the runtime.
#[derive(Debug, Clone)]
pub struct TokioLauncher {
    runtime_tx: mpsc::Sender<RuntimeEvent>,
}

impl TokioLauncher {
    pub fn new(runtime_tx: mpsc::Sender<RuntimeEvent>) -> Self {
        Self { runtime_tx }
    }
}

impl ProcessLauncher for TokioLauncher {
    fn launch(&mut self, spec: ProcessSpec) -> Result<ProcessHandle> {
        info!(
            program = %spec.program,
            dir = %spec.working_dir.display(),
            args = ?spec.args,
            "starting process"
        );

        let mut cmd = Command::new(&spec.program);
        cmd.args(&spec.args)
            .current_dir(&spec.working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let child = cmd.spawn().with_context(|| {
            format!(
                "spawning '{}' in {}",
                spec.program,
                spec.working_dir.display()
            )
        })?;

        let pid = child.id();
        let (cancel_tx, cancel_rx) = oneshot::channel();
        tokio::spawn(supervise(
            child,
            spec.signature.clone(),
            self.runtime_tx.clone(),
            cancel_rx,
        ));

        Ok(ProcessHandle::new(spec.signature, pid, cancel_tx))
    }
}

/// Wait for the child (or a kill request) and send exactly one
/// `ProcessExited` event for it.
async fn supervise(
    mut child: Child,
    signature: String,
    runtime_tx: mpsc::Sender<RuntimeEvent>,
    mut cancel_rx: oneshot::Receiver<()>,
) {
    forward_output(&mut child, &signature);

    let status = tokio::select! {
        biased;

        wait_res = child.wait() => match wait_res {
            Ok(status) => ExitStatus::Exited(status.code().unwrap_or(-1)),
            Err(e) => {
                error!(signature = %signature, error = %e, "waiting for process failed");
                ExitStatus::Exited(-1)
            }
        },
        cancel = &mut cancel_rx => {
            if cancel.is_err() {
                debug!(signature = %signature, "process handle dropped; killing process");
            } else {
                info!(signature = %signature, "kill requested; terminating process");
            }
            if let Err(e) = child.kill().await {
                warn!(signature = %signature, error = %e, "failed to kill process");
            }
            ExitStatus::Killed
        }
    };

    info!(signature = %signature, %status, "process exited");

    if runtime_tx
        .send(RuntimeEvent::ProcessExited { signature, status })
        .await
        .is_err()
    {
        debug!("runtime gone; dropping process completion");
    }
}

/// Consume stdout/stderr so pipes never fill. Solver console messages go to
/// info, stderr to debug.
fn forward_output(child: &mut Child, signature: &str) {
    if let Some(stdout) = child.stdout.take() {
        let signature = signature.to_string();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                info!(process = %signature, "{}", line);
            }
        });
    }

    if let Some(stderr) = child.stderr.take() {
        let signature = signature.to_string();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                debug!(process = %signature, "stderr: {}", line);
            }
        });
    }
}
