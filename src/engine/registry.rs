// src/engine/registry.rs

//! Running tasks keyed by process signature.

use std::collections::BTreeMap;

use crate::task::{BoxedTask, RunningView, TaskIdentity, TaskKind};

/// A started task and the pending tasks waiting for it.
#[derive(Debug)]
pub struct RunningEntry {
    pub task: BoxedTask,
    pub identity: TaskIdentity,
    pub needed_by: Vec<TaskIdentity>,
}

#[derive(Debug, Default)]
pub struct ProcessRegistry {
    entries: BTreeMap<String, RunningEntry>,
}

impl ProcessRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Register a started task. Returns the entry it replaced, which the
    /// caller treats as a lost completion.
    pub fn insert(&mut self, signature: String, entry: RunningEntry) -> Option<RunningEntry> {
        self.entries.insert(signature, entry)
    }

    pub fn remove(&mut self, signature: &str) -> Option<RunningEntry> {
        self.entries.remove(signature)
    }

    pub fn contains_signature(&self, signature: &str) -> bool {
        self.entries.contains_key(signature)
    }

    pub fn contains_identity(&self, identity: &TaskIdentity) -> bool {
        self.entries.values().any(|e| &e.identity == identity)
    }

    pub fn entry_by_identity_mut(&mut self, identity: &TaskIdentity) -> Option<&mut RunningEntry> {
        self.entries.values_mut().find(|e| &e.identity == identity)
    }

    pub fn signatures(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn entries_mut(&mut self) -> impl Iterator<Item = &mut RunningEntry> {
        self.entries.values_mut()
    }
}

impl RunningView for ProcessRegistry {
    fn is_kind_running(&self, kind: TaskKind) -> bool {
        self.entries.values().any(|e| e.identity.kind == kind)
    }

    fn is_kind_running_for_event(&self, kind: TaskKind, event: Option<&str>) -> bool {
        self.entries
            .values()
            .any(|e| e.identity.kind == kind && e.identity.event.as_deref() == event)
    }
}
