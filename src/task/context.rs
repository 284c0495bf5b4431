// src/task/context.rs

use std::collections::HashSet;
use std::fmt;

use crate::exec::ProcessLauncher;
use crate::fs::FileSystem;
use crate::types::RunMode;

use super::{TaskIdentity, TaskKind};
use super::model::{EventId, Model};

/// Read-only view of which task kinds currently have a running process.
pub trait RunningView {
    fn is_kind_running(&self, kind: TaskKind) -> bool;
    fn is_kind_running_for_event(&self, kind: TaskKind, event: Option<&str>) -> bool;
}

/// The simulation event whose parameters are currently in effect.
///
/// `None` is the master event.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActiveEvent(Option<EventId>);

impl ActiveEvent {
    pub fn current(&self) -> Option<&str> {
        self.0.as_deref()
    }

    /// Switch to `event`, returning the previously active one.
    pub fn activate(&mut self, event: Option<EventId>) -> Option<EventId> {
        std::mem::replace(&mut self.0, event)
    }

    pub fn restore(&mut self, previous: Option<EventId>) {
        self.0 = previous;
    }
}

/// Everything a task may touch while checking or starting itself.
pub struct TaskContext<'a> {
    pub model: &'a Model,
    pub fs: &'a dyn FileSystem,
    pub running: &'a dyn RunningView,
    pub launcher: &'a mut dyn ProcessLauncher,
    pub active_event: &'a mut ActiveEvent,
    pub mode: RunMode,
    /// Concurrency ceiling in effect for this decision.
    pub ceiling: usize,
    /// Set while preparing a batch run: tasks whose input files were
    /// written during this pass.
    pub prepared: Option<&'a HashSet<TaskIdentity>>,
}

impl TaskContext<'_> {
    /// Input files are written but no process is started.
    pub fn is_preparing(&self) -> bool {
        self.prepared.is_some()
    }

    /// `identity` had its inputs prepared, so its outputs will exist when
    /// the batch runs.
    pub fn is_prepared(&self, identity: &TaskIdentity) -> bool {
        self.prepared.is_some_and(|p| p.contains(identity))
    }
}

impl fmt::Debug for TaskContext<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskContext")
            .field("active_event", &self.active_event)
            .field("mode", &self.mode)
            .field("ceiling", &self.ceiling)
            .field("preparing", &self.is_preparing())
            .finish_non_exhaustive()
    }
}
