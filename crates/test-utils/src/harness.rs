use std::collections::VecDeque;
use std::path::Path;
use std::sync::{Arc, Mutex};

use stagechain::engine::{ExitRequest, Scheduler, TaskObserver};
use stagechain::exec::{ExitStatus, ProcessSpec};
use stagechain::fs::mock::MockFileSystem;
use stagechain::task::{BoxedTask, Model, TaskIdentity};
use stagechain::types::{ConcurrencyLimit, RunMode};

use crate::fake_launcher::{FakeLauncher, LaunchLog};

/// Observer notification captured by `RecordingObserver`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Observed {
    Started(TaskIdentity),
    Finished(TaskIdentity, ExitStatus),
    Abandoned(TaskIdentity),
    Idle,
}

#[derive(Clone, Default)]
pub struct RecordingObserver {
    events: Arc<Mutex<Vec<Observed>>>,
}

impl RecordingObserver {
    pub fn events(&self) -> Vec<Observed> {
        self.events.lock().unwrap().clone()
    }
}

impl TaskObserver for RecordingObserver {
    fn task_started(&mut self, identity: &TaskIdentity, _signature: &str) {
        self.events.lock().unwrap().push(Observed::Started(identity.clone()));
    }

    fn task_finished(&mut self, identity: &TaskIdentity, status: ExitStatus) {
        self.events
            .lock()
            .unwrap()
            .push(Observed::Finished(identity.clone(), status));
    }

    fn task_abandoned(&mut self, identity: &TaskIdentity, _reason: &str) {
        self.events.lock().unwrap().push(Observed::Abandoned(identity.clone()));
    }

    fn idle(&mut self) {
        self.events.lock().unwrap().push(Observed::Idle);
    }
}

/// Synchronous driver around a `Scheduler` using the fake launcher and the
/// in-memory filesystem. Completions are delivered by the test, in launch
/// order, and successful solver runs leave their result files behind.
pub struct Harness {
    pub scheduler: Scheduler,
    pub fs: MockFileSystem,
    pub model: Arc<Model>,
    pub log: LaunchLog,
    pub observer: RecordingObserver,
    outstanding: VecDeque<ProcessSpec>,
    seen: usize,
    max_running: usize,
    exit: Option<ExitRequest>,
}

impl Harness {
    pub fn new(model: Model, fs: MockFileSystem, ceiling: usize, mode: RunMode) -> Self {
        let model = Arc::new(model);
        let (launcher, log) = FakeLauncher::new();
        let observer = RecordingObserver::default();
        let scheduler = Scheduler::new(
            model.clone(),
            Arc::new(fs.clone()),
            Box::new(launcher),
            ConcurrencyLimit::new(ceiling),
            mode,
        )
        .with_observer(Box::new(observer.clone()));

        Self {
            scheduler,
            fs,
            model,
            log,
            observer,
            outstanding: VecDeque::new(),
            seen: 0,
            max_running: 0,
            exit: None,
        }
    }

    pub fn push(&mut self, tasks: Vec<BoxedTask>) {
        self.scheduler.push_all(tasks);
        let exit = self.scheduler.drain();
        self.after_step(exit);
    }

    /// Deliver the completion of the oldest outstanding process.
    pub fn complete_next(&mut self, status: ExitStatus) -> Option<ProcessSpec> {
        let spec = self.outstanding.pop_front()?;
        if status.success() {
            write_outputs(&self.fs, &self.model, &spec);
        }
        let exit = self.scheduler.on_completion(&spec.signature, status);
        self.after_step(exit);
        Some(spec)
    }

    /// Complete processes successfully until nothing is outstanding.
    /// Returns the number of completions; panics after `limit`.
    pub fn run_to_idle(&mut self, limit: usize) -> usize {
        let mut completions = 0;
        while self.complete_next(ExitStatus::Exited(0)).is_some() {
            completions += 1;
            assert!(completions <= limit, "no quiescence after {limit} completions");
        }
        completions
    }

    pub fn outstanding(&self) -> Vec<ProcessSpec> {
        self.outstanding.iter().cloned().collect()
    }

    pub fn launched_programs(&self) -> Vec<String> {
        self.log.programs()
    }

    pub fn max_running(&self) -> usize {
        self.max_running
    }

    pub fn exit_request(&self) -> Option<&ExitRequest> {
        self.exit.as_ref()
    }

    fn after_step(&mut self, exit: Option<ExitRequest>) {
        let specs = self.log.specs();
        self.outstanding.extend(specs[self.seen..].iter().cloned());
        self.seen = specs.len();
        self.max_running = self.max_running.max(self.scheduler.running_count());
        if let Some(exit) = exit {
            assert!(self.exit.is_none(), "batch exit requested twice");
            self.exit = Some(exit);
        }
    }
}

/// Result files a successful run of `spec` leaves behind.
pub fn write_outputs(fs: &MockFileSystem, model: &Model, spec: &ProcessSpec) {
    let programs = &model.programs;
    let dir = &spec.working_dir;

    if spec.program == programs.reducer {
        let part = part_of(dir);
        let files = model.layout.reduced_files(&part);
        for matrix in files.matrices() {
            fs.add_file(matrix, format!("{} matrix", part));
        }
    } else if spec.program == programs.solver {
        fs.add_file(dir.join(format!("{}_1.frs", programs.solver)), "solver results");
    } else if [&programs.stress, &programs.mode_shapes, &programs.gage, &programs.fatigue]
        .contains(&&spec.program)
    {
        fs.add_file(dir.join(format!("{}.res", spec.program)), "recovery done");
    }
}

fn part_of(dir: &Path) -> String {
    dir.file_name()
        .and_then(|n| n.to_str())
        .unwrap_or_default()
        .to_string()
}
