// src/engine/scheduler.rs

//! Dependency-resolving task scheduler.
//!
//! Pending tasks live on a LIFO stack (user requests and freshly discovered
//! prerequisites) or in a FIFO dependency queue (tasks parked until some
//! other work has made progress). Started tasks live in the
//! [`ProcessRegistry`] until their completion arrives.
//!
//! [`Scheduler::drain`] is the only place tasks are executed. It never
//! blocks: it starts as many tasks as the concurrency ceiling allows and
//! returns. Completions come back through [`Scheduler::on_completion`].
//!
//! Termination of the dependency closure: progress is counted in
//! `generation` (completions and already-current results). A queue entry is
//! only retried after progress, or once the stack its prerequisites went to
//! is empty, and each (dependent, prerequisite) pair is expanded at most once
//! per busy period. When nothing runs and no entry is eligible, the
//! remaining entries can never make progress and are abandoned.

use std::collections::{HashSet, VecDeque};
use std::fmt;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::exec::{ExitStatus, ProcessLauncher};
use crate::fs::FileSystem;
use crate::task::{ActiveEvent, BoxedTask, ExecuteOutcome, Model, TaskContext, TaskIdentity};
use crate::types::{ConcurrencyLimit, RunMode};

use super::batch_exit::{BatchExitPolicy, ExitRequest};
use super::observer::{LogObserver, TaskObserver};
use super::registry::{ProcessRegistry, RunningEntry};

#[derive(Debug)]
struct PendingEntry {
    task: BoxedTask,
    identity: TaskIdentity,
    /// Pending tasks that asked for this one as a prerequisite.
    needed_by: Vec<TaskIdentity>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ParkReason {
    /// Prerequisites were pushed on the stack.
    Dependencies,
    /// Blocked by a running process or by prerequisites that are already
    /// pending elsewhere.
    Wait,
}

#[derive(Debug)]
struct ParkedEntry {
    entry: PendingEntry,
    parked_at: u64,
    reason: ParkReason,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Origin {
    Stack,
    Queue,
}

pub struct Scheduler {
    stack: Vec<PendingEntry>,
    queue: VecDeque<ParkedEntry>,
    registry: ProcessRegistry,

    model: Arc<Model>,
    fs: Arc<dyn FileSystem>,
    launcher: Box<dyn ProcessLauncher>,
    observer: Box<dyn TaskObserver>,
    policy: BatchExitPolicy,
    limit: ConcurrencyLimit,
    mode: RunMode,
    active_event: ActiveEvent,

    generation: u64,
    /// Identities that failed during the current busy period.
    failed: HashSet<TaskIdentity>,
    /// (dependent, prerequisite) pairs expanded during the current busy period.
    expanded: HashSet<(TaskIdentity, TaskIdentity)>,
    /// Identities whose batch inputs were written; `Some` only when preparing.
    prepared: Option<HashSet<TaskIdentity>>,
    failure_status: Option<i32>,
    busy: bool,
    exit_requested: bool,
}

impl fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scheduler")
            .field("stack", &self.stack.len())
            .field("queue", &self.queue.len())
            .field("running", &self.registry.len())
            .field("mode", &self.mode)
            .field("limit", &self.limit.get())
            .field("generation", &self.generation)
            .field("failure_status", &self.failure_status)
            .finish_non_exhaustive()
    }
}

impl Scheduler {
    pub fn new(
        model: Arc<Model>,
        fs: Arc<dyn FileSystem>,
        launcher: Box<dyn ProcessLauncher>,
        limit: ConcurrencyLimit,
        mode: RunMode,
    ) -> Self {
        let policy = BatchExitPolicy::new(mode, &model.export);
        Self {
            stack: Vec::new(),
            queue: VecDeque::new(),
            registry: ProcessRegistry::new(),
            model,
            fs,
            launcher,
            observer: Box::new(LogObserver),
            policy,
            limit,
            mode,
            active_event: ActiveEvent::default(),
            generation: 0,
            failed: HashSet::new(),
            expanded: HashSet::new(),
            prepared: None,
            failure_status: None,
            busy: false,
            exit_requested: false,
        }
    }

    pub fn with_observer(mut self, observer: Box<dyn TaskObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// Write the input files of every task for a later batch run instead
    /// of starting processes.
    pub fn preparing_batch(mut self) -> Self {
        self.prepared = Some(HashSet::new());
        self
    }

    pub fn is_preparing(&self) -> bool {
        self.prepared.is_some()
    }

    pub fn model(&self) -> &Model {
        &self.model
    }

    pub fn limit(&self) -> &ConcurrencyLimit {
        &self.limit
    }

    pub fn mode(&self) -> RunMode {
        self.mode
    }

    pub fn running_count(&self) -> usize {
        self.registry.len()
    }

    pub fn running_signatures(&self) -> Vec<String> {
        self.registry.signatures().map(str::to_string).collect()
    }

    pub fn stack_len(&self) -> usize {
        self.stack.len()
    }

    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    /// Nothing pending and nothing running.
    pub fn is_idle(&self) -> bool {
        self.stack.is_empty() && self.queue.is_empty() && self.registry.is_empty()
    }

    pub fn failure_status(&self) -> Option<i32> {
        self.failure_status
    }

    pub fn active_event(&self) -> Option<&str> {
        self.active_event.current()
    }

    /// Push a task on the stack. Returns false if an equivalent task is
    /// already pending or running.
    pub fn push(&mut self, task: BoxedTask) -> bool {
        self.push_entry(task, Vec::new())
    }

    /// Push tasks so that the first one is executed first. Returns the
    /// number accepted.
    pub fn push_all(&mut self, tasks: Vec<BoxedTask>) -> usize {
        let mut accepted = 0;
        for task in tasks.into_iter().rev() {
            if self.push(task) {
                accepted += 1;
            }
        }
        accepted
    }

    fn push_entry(&mut self, task: BoxedTask, needed_by: Vec<TaskIdentity>) -> bool {
        let identity = task.identity();
        if self.is_known(&identity) {
            debug!(task = %identity, "equivalent task already pending or running; discarded");
            for dependent in &needed_by {
                self.add_dependent(&identity, dependent);
            }
            return false;
        }

        debug!(task = %identity, "task pushed");
        self.stack.push(PendingEntry {
            task,
            identity,
            needed_by,
        });
        self.busy = true;
        true
    }

    fn is_known(&self, identity: &TaskIdentity) -> bool {
        self.stack.iter().any(|e| &e.identity == identity)
            || self.queue.iter().any(|p| &p.entry.identity == identity)
            || self.registry.contains_identity(identity)
    }

    /// Record that `dependent` waits for the task with `identity`, wherever
    /// that task currently is.
    fn add_dependent(&mut self, identity: &TaskIdentity, dependent: &TaskIdentity) {
        let needed_by = if let Some(e) = self.stack.iter_mut().find(|e| &e.identity == identity) {
            &mut e.needed_by
        } else if let Some(p) = self.queue.iter_mut().find(|p| &p.entry.identity == identity) {
            &mut p.entry.needed_by
        } else if let Some(r) = self.registry.entry_by_identity_mut(identity) {
            &mut r.needed_by
        } else {
            return;
        };
        if !needed_by.contains(dependent) {
            needed_by.push(dependent.clone());
        }
    }

    /// Execute pending tasks until the ceiling is reached or nothing more
    /// can be done. Returns an exit request when an unattended run is over.
    pub fn drain(&mut self) -> Option<ExitRequest> {
        loop {
            if self.stack.is_empty() && self.queue.is_empty() {
                if self.registry.is_empty() {
                    return self.on_idle();
                }
                return None;
            }

            let ceiling = self.limit.get();
            if self.registry.len() >= ceiling {
                debug!(running = self.registry.len(), ceiling, "concurrency ceiling reached");
                return None;
            }

            match self.pick() {
                Some((entry, origin)) => self.run_entry(entry, origin, ceiling),
                None if !self.registry.is_empty() => return None,
                None => self.abandon_stuck(),
            }
        }
    }

    /// Oldest eligible queue entry, else the stack top.
    fn pick(&mut self) -> Option<(PendingEntry, Origin)> {
        let generation = self.generation;
        let stack_empty = self.stack.is_empty();
        let eligible = self.queue.iter().position(|p| {
            p.parked_at < generation || (p.reason == ParkReason::Dependencies && stack_empty)
        });

        if let Some(pos) = eligible {
            return self.queue.remove(pos).map(|p| (p.entry, Origin::Queue));
        }
        self.stack.pop().map(|e| (e, Origin::Stack))
    }

    fn abandon_stuck(&mut self) {
        let stuck: Vec<PendingEntry> = self.queue.drain(..).map(|p| p.entry).collect();
        for entry in stuck {
            self.not_executable(entry, "its prerequisites could not be resolved");
        }
    }

    fn run_entry(&mut self, entry: PendingEntry, origin: Origin, ceiling: usize) {
        let mut entry = entry;

        let signature = entry.task.signature(&self.model);
        if self.registry.contains_identity(&entry.identity)
            || self.registry.contains_signature(&signature)
        {
            debug!(task = %entry.identity, signature, "equivalent task already running; discarded");
            for dependent in &entry.needed_by {
                self.add_dependent(&entry.identity, dependent);
            }
            return;
        }

        let saved = self.active_event.clone();
        let outcome = {
            let mut ctx = TaskContext {
                model: self.model.as_ref(),
                fs: self.fs.as_ref(),
                running: &self.registry,
                launcher: self.launcher.as_mut(),
                active_event: &mut self.active_event,
                mode: self.mode,
                ceiling,
                prepared: self.prepared.as_ref(),
            };
            entry.task.execute(&mut ctx)
        };
        self.active_event = saved;

        match outcome {
            ExecuteOutcome::ResultsAlreadyOk => {
                info!(task = %entry.identity, "results are up to date");
                self.generation += 1;
            }
            ExecuteOutcome::Prepared => {
                if let Some(prepared) = self.prepared.as_mut() {
                    prepared.insert(entry.identity);
                }
                self.generation += 1;
            }
            ExecuteOutcome::NotExecutable(reason) => self.not_executable(entry, &reason),
            ExecuteOutcome::PendingDependencies(prereqs) => self.expand(entry, origin, prereqs),
            ExecuteOutcome::PendingButWait => {
                debug!(task = %entry.identity, "task must wait");
                self.park(entry, ParkReason::Wait);
            }
            ExecuteOutcome::Started { signature } => {
                self.observer.task_started(&entry.identity, &signature);
                let running = RunningEntry {
                    task: entry.task,
                    identity: entry.identity,
                    needed_by: entry.needed_by,
                };
                if let Some(lost) = self.registry.insert(signature.clone(), running) {
                    warn!(
                        task = %lost.identity,
                        signature,
                        "process signature reused while still running"
                    );
                }
            }
        }
    }

    fn expand(&mut self, entry: PendingEntry, origin: Origin, prereqs: Vec<BoxedTask>) {
        let dependent = entry.identity.clone();

        let failed = prereqs
            .iter()
            .map(|p| p.identity())
            .find(|id| self.failed.contains(id));
        if let Some(failed) = failed {
            let reason = format!("prerequisite {failed} failed");
            self.not_executable(entry, &reason);
            return;
        }

        let mut fresh = Vec::new();
        for prereq in prereqs {
            let identity = prereq.identity();
            let pair = (dependent.clone(), identity.clone());
            if self.expanded.contains(&pair) || self.is_known(&identity) {
                self.add_dependent(&identity, &dependent);
                continue;
            }
            self.expanded.insert(pair);
            fresh.push(prereq);
        }

        if fresh.is_empty() {
            debug!(task = %dependent, "prerequisites already pending; waiting");
            self.park(entry, ParkReason::Wait);
            return;
        }

        debug!(
            task = %dependent,
            prerequisites = fresh.len(),
            "pushing prerequisites"
        );
        match origin {
            Origin::Stack => self.stack.push(entry),
            Origin::Queue => self.park(entry, ParkReason::Dependencies),
        }
        for prereq in fresh.into_iter().rev() {
            self.push_entry(prereq, vec![dependent.clone()]);
        }
    }

    fn park(&mut self, entry: PendingEntry, reason: ParkReason) {
        self.queue.push_back(ParkedEntry {
            entry,
            parked_at: self.generation,
            reason,
        });
    }

    fn not_executable(&mut self, entry: PendingEntry, reason: &str) {
        warn!(task = %entry.identity, reason, "task is not executable");
        self.observer.task_abandoned(&entry.identity, reason);
        self.failed.insert(entry.identity.clone());

        match self.mode {
            RunMode::Unattended => {
                self.record_failure(1);
                self.kill_all(true);
            }
            RunMode::Interactive => self.abandon_dependents(&entry.identity, entry.needed_by),
        }
    }

    /// Drop every pending task that transitively needed `cause`.
    fn abandon_dependents(&mut self, cause: &TaskIdentity, needed_by: Vec<TaskIdentity>) {
        let reason = format!("prerequisite {cause} failed");
        let mut work = needed_by;
        while let Some(identity) = work.pop() {
            let Some(entry) = self.take_pending(&identity) else {
                continue;
            };
            info!(task = %entry.identity, reason, "abandoning dependent task");
            self.observer.task_abandoned(&entry.identity, &reason);
            work.extend(entry.needed_by);
        }
    }

    fn take_pending(&mut self, identity: &TaskIdentity) -> Option<PendingEntry> {
        if let Some(pos) = self.stack.iter().position(|e| &e.identity == identity) {
            return Some(self.stack.remove(pos));
        }
        let pos = self.queue.iter().position(|p| &p.entry.identity == identity)?;
        self.queue.remove(pos).map(|p| p.entry)
    }

    fn record_failure(&mut self, code: i32) {
        let status = if code > 0 { code } else { 1 };
        self.failure_status.get_or_insert(status);
    }

    /// A process with `signature` terminated.
    pub fn on_completion(&mut self, signature: &str, status: ExitStatus) -> Option<ExitRequest> {
        let Some(mut entry) = self.registry.remove(signature) else {
            warn!(signature, %status, "completion for unknown process");
            if self.mode.is_unattended() {
                self.record_failure(2);
            }
            return self.drain();
        };
        self.generation += 1;

        {
            let ctx = TaskContext {
                model: self.model.as_ref(),
                fs: self.fs.as_ref(),
                running: &self.registry,
                launcher: self.launcher.as_mut(),
                active_event: &mut self.active_event,
                mode: self.mode,
                ceiling: self.limit.get(),
                prepared: self.prepared.as_ref(),
            };
            entry.task.on_death(status, &ctx);
        }
        self.observer.task_finished(&entry.identity, status);

        if !status.success() {
            self.failed.insert(entry.identity.clone());
            match self.mode {
                RunMode::Unattended => {
                    self.record_failure(status.code());
                    self.kill_all(true);
                }
                RunMode::Interactive => self.abandon_dependents(&entry.identity, entry.needed_by),
            }
        }

        self.drain()
    }

    /// Abandon everything pending; with `running_also`, also kill every
    /// running process. Running tasks stay registered until their
    /// completion arrives.
    pub fn kill_all(&mut self, running_also: bool) {
        let pending: Vec<PendingEntry> = self
            .stack
            .drain(..)
            .chain(self.queue.drain(..).map(|p| p.entry))
            .collect();
        for entry in pending {
            info!(task = %entry.identity, "abandoning pending task");
            self.observer.task_abandoned(&entry.identity, "killed");
        }

        if running_also {
            for running in self.registry.entries_mut() {
                running.task.kill();
            }
        }
    }

    fn on_idle(&mut self) -> Option<ExitRequest> {
        if self.busy {
            self.busy = false;
            self.failed.clear();
            self.expanded.clear();
            if let Some(prepared) = self.prepared.as_mut() {
                prepared.clear();
            }
            self.observer.idle();
        }
        if self.exit_requested {
            return None;
        }
        let request = self.policy.on_idle(self.failure_status)?;
        self.exit_requested = true;
        Some(request)
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;
    use std::sync::Mutex;

    use tokio::sync::oneshot;

    use super::*;
    use crate::config::{ConfigFile, PartConfig, RawConfigFile};
    use crate::exec::{ProcessHandle, ProcessSpec};
    use crate::fs::mock::MockFileSystem;
    use crate::task::{DependencyCheck, Task, TaskKind};

    /// Launcher that records signatures and keeps cancel receivers alive.
    #[derive(Default)]
    struct RecordingLauncher {
        started: Arc<Mutex<Vec<String>>>,
        cancels: Vec<oneshot::Receiver<()>>,
    }

    impl ProcessLauncher for RecordingLauncher {
        fn launch(&mut self, spec: ProcessSpec) -> anyhow::Result<ProcessHandle> {
            let (tx, rx) = oneshot::channel();
            self.cancels.push(rx);
            self.started.lock().unwrap().push(spec.signature.clone());
            Ok(ProcessHandle::new(spec.signature, None, tx))
        }
    }

    #[derive(Debug, Clone)]
    enum Step {
        Start,
        Wait,
        Needs(Vec<&'static str>),
        Fail,
    }

    /// Task named by a part; its outcomes follow a script, repeating the
    /// last step.
    #[derive(Debug)]
    struct Scripted {
        name: &'static str,
        steps: Vec<Step>,
        handle: Option<ProcessHandle>,
    }

    fn scripted(name: &'static str, steps: Vec<Step>) -> BoxedTask {
        Box::new(Scripted {
            name,
            steps,
            handle: None,
        })
    }

    impl Task for Scripted {
        fn identity(&self) -> TaskIdentity {
            TaskIdentity::new(TaskKind::Reduce, None, Some(self.name.to_string()))
        }

        fn signature(&self, _model: &Model) -> String {
            format!("fake@{}", self.name)
        }

        fn check_dependencies(&self, _ctx: &TaskContext<'_>) -> DependencyCheck {
            DependencyCheck::Ready
        }

        fn execute(&mut self, ctx: &mut TaskContext<'_>) -> ExecuteOutcome {
            let step = if self.steps.len() > 1 {
                self.steps.remove(0)
            } else {
                self.steps[0].clone()
            };
            match step {
                Step::Start => {
                    let spec = ProcessSpec {
                        program: "fake".to_string(),
                        working_dir: PathBuf::from("/"),
                        args: Vec::new(),
                        signature: format!("fake@{}", self.name),
                    };
                    let handle = ctx.launcher.launch(spec).unwrap();
                    let signature = handle.signature().to_string();
                    self.handle = Some(handle);
                    ExecuteOutcome::Started { signature }
                }
                Step::Wait => ExecuteOutcome::PendingButWait,
                Step::Needs(names) => ExecuteOutcome::PendingDependencies(
                    names.into_iter().map(|n| scripted(n, vec![Step::Start])).collect(),
                ),
                Step::Fail => ExecuteOutcome::NotExecutable("scripted failure".to_string()),
            }
        }

        fn kill(&mut self) {
            if let Some(handle) = self.handle.as_mut() {
                handle.kill();
            }
        }

        fn on_death(&mut self, _status: ExitStatus, _ctx: &TaskContext<'_>) {
            self.handle = None;
        }
    }

    fn model() -> Arc<Model> {
        let mut raw: RawConfigFile = toml::from_str("").unwrap();
        raw.part.insert(
            "arm".to_string(),
            PartConfig {
                fe_file: "arm.ftl".to_string(),
                modes: 0,
                locked: false,
                groups: Vec::new(),
            },
        );
        let cfg = ConfigFile::try_from(raw).unwrap();
        Arc::new(Model::from_config(&cfg, std::path::Path::new("/m")))
    }

    fn scheduler(ceiling: usize, mode: RunMode) -> (Scheduler, Arc<Mutex<Vec<String>>>) {
        let launcher = RecordingLauncher::default();
        let started = launcher.started.clone();
        let scheduler = Scheduler::new(
            model(),
            Arc::new(MockFileSystem::new()),
            Box::new(launcher),
            ConcurrencyLimit::new(ceiling),
            mode,
        );
        (scheduler, started)
    }

    #[test]
    fn duplicate_push_is_discarded() {
        let (mut s, _) = scheduler(1, RunMode::Interactive);
        assert!(s.push(scripted("a", vec![Step::Start])));
        assert!(!s.push(scripted("a", vec![Step::Start])));
        assert_eq!(s.stack_len(), 1);

        s.drain();
        assert!(!s.push(scripted("a", vec![Step::Start])));
        assert_eq!(s.running_count(), 1);
        assert_eq!(s.stack_len(), 0);
    }

    #[test]
    fn push_all_runs_first_task_first() {
        let (mut s, started) = scheduler(3, RunMode::Interactive);
        s.push_all(vec![
            scripted("a", vec![Step::Start]),
            scripted("b", vec![Step::Start]),
        ]);
        s.drain();
        assert_eq!(*started.lock().unwrap(), vec!["fake@a", "fake@b"]);
    }

    #[test]
    fn waiting_task_runs_before_stack_after_completion() {
        let (mut s, started) = scheduler(2, RunMode::Interactive);
        s.push(scripted("w", vec![Step::Wait, Step::Start]));
        s.push(scripted("r", vec![Step::Start]));
        s.drain();
        assert_eq!(s.queue_len(), 1);

        s.push(scripted("late", vec![Step::Start]));
        s.on_completion("fake@r", ExitStatus::Exited(0));
        assert_eq!(
            *started.lock().unwrap(),
            vec!["fake@r", "fake@w", "fake@late"]
        );
    }

    #[test]
    fn prerequisites_run_before_dependent() {
        let (mut s, started) = scheduler(1, RunMode::Interactive);
        s.push(scripted("top", vec![Step::Needs(vec!["p1", "p2"]), Step::Start]));
        s.drain();
        assert_eq!(*started.lock().unwrap(), vec!["fake@p1"]);

        s.on_completion("fake@p1", ExitStatus::Exited(0));
        s.on_completion("fake@p2", ExitStatus::Exited(0));
        assert_eq!(
            *started.lock().unwrap(),
            vec!["fake@p1", "fake@p2", "fake@top"]
        );
    }

    #[test]
    fn failed_prerequisite_abandons_dependents_only() {
        let (mut s, started) = scheduler(1, RunMode::Interactive);
        s.push(scripted("other", vec![Step::Start]));
        s.push(scripted("top", vec![Step::Needs(vec!["p"]), Step::Start]));
        s.drain();
        assert_eq!(*started.lock().unwrap(), vec!["fake@p"]);

        s.on_completion("fake@p", ExitStatus::Exited(4));
        assert_eq!(*started.lock().unwrap(), vec!["fake@p", "fake@other"]);
        assert_eq!(s.stack_len(), 0);
        assert_eq!(s.queue_len(), 0);
    }

    #[test]
    fn task_waiting_without_running_work_is_abandoned() {
        let (mut s, started) = scheduler(2, RunMode::Interactive);
        s.push(scripted("stuck", vec![Step::Wait]));
        assert_eq!(s.drain(), None);
        assert!(s.is_idle());
        assert!(started.lock().unwrap().is_empty());
    }

    #[test]
    fn unattended_not_executable_aborts_run() {
        let (mut s, _) = scheduler(2, RunMode::Unattended);
        s.push_all(vec![
            scripted("a", vec![Step::Start]),
            scripted("bad", vec![Step::Fail]),
            scripted("c", vec![Step::Start]),
        ]);
        assert_eq!(s.drain(), None);
        assert_eq!(s.running_count(), 1);
        assert_eq!(s.stack_len(), 0);

        let request = s.on_completion("fake@a", ExitStatus::Killed).unwrap();
        assert_eq!(request.status, 1);
        assert!(request.exports.is_empty());
    }

    #[test]
    fn unknown_completion_is_recorded_in_batch_mode() {
        let (mut s, _) = scheduler(1, RunMode::Unattended);
        let request = s.on_completion("ghost@/nowhere", ExitStatus::Exited(0)).unwrap();
        assert_eq!(request.status, 2);
    }
}
