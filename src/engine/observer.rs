// src/engine/observer.rs

use tracing::{info, warn};

use crate::exec::ExitStatus;
use crate::task::TaskIdentity;

/// Notifications about task lifecycle, e.g. for a front-end.
pub trait TaskObserver: Send {
    fn task_started(&mut self, identity: &TaskIdentity, signature: &str);
    fn task_finished(&mut self, identity: &TaskIdentity, status: ExitStatus);
    fn task_abandoned(&mut self, identity: &TaskIdentity, reason: &str);
    /// Nothing is pending or running anymore.
    fn idle(&mut self);
}

/// Default observer: reports through `tracing`.
#[derive(Debug, Default)]
pub struct LogObserver;

impl TaskObserver for LogObserver {
    fn task_started(&mut self, identity: &TaskIdentity, signature: &str) {
        info!(task = %identity, signature, "task started");
    }

    fn task_finished(&mut self, identity: &TaskIdentity, status: ExitStatus) {
        info!(task = %identity, %status, "task finished");
    }

    fn task_abandoned(&mut self, identity: &TaskIdentity, reason: &str) {
        warn!(task = %identity, reason, "task abandoned");
    }

    fn idle(&mut self) {
        info!("all tasks finished");
    }
}
