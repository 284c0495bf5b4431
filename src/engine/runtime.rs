// src/engine/runtime.rs

use std::fmt;

use tokio::sync::mpsc;
use tracing::{debug, error, info};

use crate::errors::Result;
use crate::exec::Exporter;

use super::batch_exit::ExitRequest;
use super::scheduler::Scheduler;
use super::RuntimeEvent;

/// Exit status after a user shutdown (Ctrl-C / `quit`).
pub const SHUTDOWN_STATUS: i32 = 130;

/// Drives the scheduler in response to `RuntimeEvent`s and runs the
/// batch-exit export steps through an `Exporter`.
///
/// The scheduler holds all semantics; this shell only reads events from the
/// channel and decides when the program is done.
pub struct Runtime<X: Exporter> {
    scheduler: Scheduler,
    event_rx: mpsc::Receiver<RuntimeEvent>,
    exporter: X,
    finishing: bool,
    shutting_down: bool,
}

impl<X: Exporter> fmt::Debug for Runtime<X> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("scheduler", &self.scheduler)
            .field("finishing", &self.finishing)
            .field("shutting_down", &self.shutting_down)
            .finish_non_exhaustive()
    }
}

impl<X: Exporter> Runtime<X> {
    pub fn new(scheduler: Scheduler, event_rx: mpsc::Receiver<RuntimeEvent>, exporter: X) -> Self {
        Self {
            scheduler,
            event_rx,
            exporter,
            finishing: false,
            shutting_down: false,
        }
    }

    /// Main event loop. Returns the process exit status.
    ///
    /// - unattended: once the scheduler is idle (batch-exit policy)
    /// - interactive: once input is finished and the scheduler is idle
    /// - shutdown: once every killed process has reported back
    pub async fn run(mut self) -> Result<i32> {
        info!(mode = ?self.scheduler.mode(), "stagechain runtime started");

        loop {
            let event = match self.event_rx.recv().await {
                Some(e) => e,
                None => {
                    info!("runtime event channel closed; exiting");
                    self.scheduler.kill_all(true);
                    return Ok(self.scheduler.failure_status().unwrap_or(0));
                }
            };

            debug!(?event, "runtime received event");
            let exit = self.handle_event(event);

            if self.shutting_down {
                if self.scheduler.is_idle() {
                    info!("shutdown complete");
                    return Ok(SHUTDOWN_STATUS);
                }
                continue;
            }

            if let Some(request) = exit {
                return Ok(self.finish_batch(request).await);
            }

            if self.finishing && self.scheduler.is_idle() {
                info!("no more requests; exiting");
                return Ok(0);
            }
        }
    }

    fn handle_event(&mut self, event: RuntimeEvent) -> Option<ExitRequest> {
        match event {
            RuntimeEvent::Push(tasks) => {
                if self.shutting_down {
                    debug!(count = tasks.len(), "ignoring requests during shutdown");
                    return None;
                }
                let accepted = self.scheduler.push_all(tasks);
                debug!(accepted, "tasks requested");
                self.scheduler.drain()
            }
            RuntimeEvent::ProcessExited { signature, status } => {
                self.scheduler.on_completion(&signature, status)
            }
            RuntimeEvent::KillAll => {
                info!("kill requested");
                self.scheduler.kill_all(true);
                self.scheduler.drain()
            }
            RuntimeEvent::SetConcurrency(limit) => {
                self.scheduler.limit().set(limit);
                info!(limit = self.scheduler.limit().get(), "concurrency ceiling changed");
                self.scheduler.drain()
            }
            RuntimeEvent::FinishRequested => {
                self.finishing = true;
                self.scheduler.drain()
            }
            RuntimeEvent::ShutdownRequested => {
                info!("shutdown requested; killing all tasks");
                self.shutting_down = true;
                self.scheduler.kill_all(true);
                None
            }
        }
    }

    async fn finish_batch(&mut self, request: ExitRequest) -> i32 {
        if request.status != 0 {
            error!(status = request.status, "batch run failed");
            return request.status;
        }

        for step in &request.exports {
            if let Err(e) = self.exporter.run_export(step.label(), step.command()).await {
                error!(export = step.label(), error = %format!("{e:#}"), "auto-export failed");
                return 1;
            }
        }
        info!("batch run finished");
        0
    }
}
