// src/engine/mod.rs

//! Orchestration engine for stagechain.
//!
//! This module ties together:
//! - the process registry (running tasks keyed by process signature)
//! - the scheduler (LIFO stack, FIFO dependency queue, concurrency ceiling)
//! - the batch-exit policy for unattended runs
//! - the main runtime event loop that reacts to:
//!   - task requests from the command line or console
//!   - process completions
//!   - kill / shutdown requests
//!
//! The scheduler is synchronous and never blocks; the async/IO shell is
//! implemented in [`runtime`].

use crate::exec::ExitStatus;
use crate::task::BoxedTask;

/// Events flowing into the runtime from the console, launcher and signals.
#[derive(Debug)]
pub enum RuntimeEvent {
    /// Tasks requested by the user, in the order they should run.
    Push(Vec<BoxedTask>),
    /// An external process terminated.
    ProcessExited {
        signature: String,
        status: ExitStatus,
    },
    /// Abandon everything pending and kill all running processes.
    KillAll,
    /// Change the concurrency ceiling.
    SetConcurrency(usize),
    /// No more requests will arrive; exit once everything has finished.
    FinishRequested,
    /// Kill everything and exit after the last completion (e.g. Ctrl-C).
    ShutdownRequested,
}

pub mod batch_exit;
pub mod observer;
pub mod registry;
pub mod runtime;
pub mod scheduler;

pub use batch_exit::{BatchExitPolicy, ExitRequest, ExportStep};
pub use observer::{LogObserver, TaskObserver};
pub use registry::{ProcessRegistry, RunningEntry};
pub use runtime::Runtime;
pub use scheduler::Scheduler;
