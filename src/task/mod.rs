// src/task/mod.rs

//! Solver tasks and the contract the scheduler drives them through.
//!
//! A task knows how to check its own prerequisites and start its external
//! program. It never pushes other tasks itself: missing prerequisites are
//! returned as data (`NeedsPrerequisites` / `PendingDependencies`) and the
//! scheduler decides what to do with them, so the dependency graph is
//! discovered one hop at a time.

pub mod context;
pub mod layout;
pub mod model;
pub mod options;
pub mod recovery;
pub mod reduce;
pub mod solve;

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use tracing::{error, info, warn};

use crate::errors::{Result, StageError};
use crate::exec::{ExitStatus, ProcessHandle, ProcessSpec};

pub use context::{ActiveEvent, RunningView, TaskContext};
pub use model::{EventId, Model, Part, PartId, SimEvent};
pub use recovery::{RecoveryKind, RecoveryTask};
pub use reduce::ReduceTask;
pub use solve::SolveTask;

use options::{OptionFiles, write_option_files};

/// Solver stage a task runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TaskKind {
    Reduce,
    DynamicSolve,
    StressRecovery,
    ModeShapeRecovery,
    GageRecovery,
    FatigueRecovery,
}

impl TaskKind {
    /// Name used in task requests.
    pub fn request_name(self) -> &'static str {
        match self {
            TaskKind::Reduce => "reduce",
            TaskKind::DynamicSolve => "solve",
            TaskKind::StressRecovery => "stress",
            TaskKind::ModeShapeRecovery => "modes",
            TaskKind::GageRecovery => "gage",
            TaskKind::FatigueRecovery => "fatigue",
        }
    }

    fn from_request_name(name: &str) -> Option<Self> {
        match name {
            "reduce" => Some(TaskKind::Reduce),
            "solve" => Some(TaskKind::DynamicSolve),
            "stress" => Some(TaskKind::StressRecovery),
            "modes" => Some(TaskKind::ModeShapeRecovery),
            "gage" => Some(TaskKind::GageRecovery),
            "fatigue" => Some(TaskKind::FatigueRecovery),
            _ => None,
        }
    }

    pub fn recovery_kind(self) -> Option<RecoveryKind> {
        match self {
            TaskKind::StressRecovery => Some(RecoveryKind::Stress),
            TaskKind::ModeShapeRecovery => Some(RecoveryKind::ModeShapes),
            TaskKind::GageRecovery => Some(RecoveryKind::Gage),
            TaskKind::FatigueRecovery => Some(RecoveryKind::Fatigue),
            TaskKind::Reduce | TaskKind::DynamicSolve => None,
        }
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TaskKind::Reduce => "reduction",
            TaskKind::DynamicSolve => "dynamic solve",
            TaskKind::StressRecovery => "stress recovery",
            TaskKind::ModeShapeRecovery => "mode shape recovery",
            TaskKind::GageRecovery => "gage recovery",
            TaskKind::FatigueRecovery => "fatigue recovery",
        };
        f.write_str(name)
    }
}

/// What makes two tasks duplicates of each other.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskIdentity {
    pub kind: TaskKind,
    /// `None` is the master event.
    pub event: Option<EventId>,
    pub part: Option<PartId>,
}

impl TaskIdentity {
    pub fn new(kind: TaskKind, event: Option<EventId>, part: Option<PartId>) -> Self {
        Self { kind, event, part }
    }
}

impl fmt::Display for TaskIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind)?;
        match (&self.event, &self.part) {
            (Some(event), Some(part)) => write!(f, " [{event}/{part}]"),
            (Some(event), None) => write!(f, " [{event}]"),
            (None, Some(part)) => write!(f, " [{part}]"),
            (None, None) => Ok(()),
        }
    }
}

pub type BoxedTask = Box<dyn Task>;

/// Result of a task's prerequisite check.
#[derive(Debug)]
pub enum DependencyCheck {
    Ready,
    /// These tasks must produce their results first.
    NeedsPrerequisites(Vec<BoxedTask>),
    /// A conflicting process is running; try again after it finishes.
    Blocked,
    /// The task can never run in the current model state.
    Failed(String),
}

impl DependencyCheck {
    /// The execute outcome for anything but `Ready`.
    pub fn into_outcome(self) -> Option<ExecuteOutcome> {
        match self {
            DependencyCheck::Ready => None,
            DependencyCheck::NeedsPrerequisites(prereqs) => {
                Some(ExecuteOutcome::PendingDependencies(prereqs))
            }
            DependencyCheck::Blocked => Some(ExecuteOutcome::PendingButWait),
            DependencyCheck::Failed(reason) => Some(ExecuteOutcome::NotExecutable(reason)),
        }
    }
}

/// Result of `Task::execute`.
#[derive(Debug)]
pub enum ExecuteOutcome {
    ResultsAlreadyOk,
    /// Input files were written for a later batch run; nothing was started.
    Prepared,
    NotExecutable(String),
    PendingDependencies(Vec<BoxedTask>),
    PendingButWait,
    Started { signature: String },
}

/// One unit of solver work.
pub trait Task: Send + fmt::Debug {
    fn identity(&self) -> TaskIdentity;

    /// `"<program>@<run dir>"` of the process this task would start.
    fn signature(&self, model: &Model) -> String;

    fn check_dependencies(&self, ctx: &TaskContext<'_>) -> DependencyCheck;

    /// Own outputs exist and are current.
    fn results_up_to_date(&self, _ctx: &TaskContext<'_>) -> bool {
        false
    }

    fn execute(&mut self, ctx: &mut TaskContext<'_>) -> ExecuteOutcome;

    /// Request termination of the started process. Safe to call repeatedly
    /// and before the task was started.
    fn kill(&mut self);

    /// The task's process has terminated. Called once per started process.
    fn on_death(&mut self, status: ExitStatus, ctx: &TaskContext<'_>);
}

pub fn process_signature(program: &str, run_dir: &Path) -> String {
    format!("{program}@{}", run_dir.display())
}

/// Write the option files into `run_dir` and launch `program` there,
/// keeping the handle in `slot`. When preparing a batch run the option
/// files are all that is produced.
pub(crate) fn launch(
    ctx: &mut TaskContext<'_>,
    program: &str,
    run_dir: &Path,
    files: &OptionFiles,
    slot: &mut Option<ProcessHandle>,
) -> ExecuteOutcome {
    let args = match write_option_files(ctx.fs, run_dir, program, files, ctx.mode, ctx.ceiling) {
        Ok(args) => args,
        Err(e) => return ExecuteOutcome::NotExecutable(format!("{e:#}")),
    };

    if ctx.is_preparing() {
        info!(
            dir = %run_dir.display(),
            command = %format!("{program} {}", args.join(" ")),
            "input files for batch execution of {program} created"
        );
        return ExecuteOutcome::Prepared;
    }

    let spec = ProcessSpec {
        program: program.to_string(),
        working_dir: run_dir.to_path_buf(),
        args,
        signature: process_signature(program, run_dir),
    };
    match ctx.launcher.launch(spec) {
        Ok(handle) => {
            let signature = handle.signature().to_string();
            *slot = Some(handle);
            ExecuteOutcome::Started { signature }
        }
        Err(e) => ExecuteOutcome::NotExecutable(format!("could not start {program}: {e:#}")),
    }
}

pub(crate) fn kill_handle(identity: &TaskIdentity, handle: &mut Option<ProcessHandle>) {
    if let Some(handle) = handle.as_mut() {
        if handle.kill() {
            info!(task = %identity, pid = ?handle.pid(), "killing process");
        }
    }
}

pub(crate) fn report_death(
    identity: &TaskIdentity,
    program: &str,
    run_dir: &Path,
    status: ExitStatus,
) {
    match status {
        ExitStatus::Exited(0) => info!(task = %identity, "{program} done"),
        ExitStatus::Killed => warn!(task = %identity, "{program} terminated by user"),
        ExitStatus::Exited(code) => {
            let res = run_dir.join(format!("{program}.res"));
            error!(
                task = %identity,
                code,
                "{program} failed; see {} for details",
                res.display()
            );
        }
    }
}

/// A user request `kind[:event[:part]]`.
///
/// - `stress:storm:arm`: stress recovery of part `arm` for event `storm`
/// - `modes::arm`: mode shape recovery of `arm` for the master event
/// - `gage:storm`: gage recovery of every unlocked part for `storm`
/// - `fatigue::arm`: fatigue (damage) recovery of `arm` for the master event
/// - `solve:storm`, `solve`
/// - `reduce::arm`, `reduce`: reduction of one or all unlocked parts
///
/// An empty event field or `master` means the master event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskRequest {
    pub kind: TaskKind,
    pub event: Option<EventId>,
    pub part: Option<PartId>,
}

impl FromStr for TaskRequest {
    type Err = StageError;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = |why: &str| StageError::InvalidRequest(format!("'{s}': {why}"));

        let mut fields = s.trim().split(':');
        let kind_name = fields.next().unwrap_or_default();
        let kind = TaskKind::from_request_name(kind_name).ok_or_else(|| {
            invalid("unknown task kind (expected reduce, solve, stress, modes, gage or fatigue)")
        })?;

        let event = fields
            .next()
            .map(str::trim)
            .filter(|e| !e.is_empty() && *e != crate::config::MASTER_EVENT_DIR)
            .map(str::to_string);
        let part = fields
            .next()
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .map(str::to_string);

        if fields.next().is_some() {
            return Err(invalid("too many fields"));
        }
        if kind == TaskKind::Reduce && event.is_some() {
            return Err(invalid("reduction does not depend on an event; use reduce::<part>"));
        }
        if kind == TaskKind::DynamicSolve && part.is_some() {
            return Err(invalid("the dynamic solve covers all parts"));
        }

        Ok(Self { kind, event, part })
    }
}

/// Turn a request into tasks, expanding a missing part to every unlocked
/// part of the model.
pub fn build_tasks(request: &TaskRequest, model: &Model) -> Result<Vec<BoxedTask>> {
    if let Some(event) = &request.event {
        model.event(event)?;
    }

    let parts: Vec<&Part> = match &request.part {
        Some(name) => vec![model.part(name)?],
        None => model.unlocked_parts().collect(),
    };

    let tasks: Vec<BoxedTask> = match request.kind {
        TaskKind::Reduce => parts
            .into_iter()
            .map(|p| Box::new(ReduceTask::new(p.name.clone())) as BoxedTask)
            .collect(),
        TaskKind::DynamicSolve => vec![Box::new(SolveTask::new(request.event.clone()))],
        kind => {
            let Some(recovery) = kind.recovery_kind() else {
                return Ok(Vec::new());
            };
            parts
                .into_iter()
                .map(|p| {
                    Box::new(RecoveryTask::new(
                        recovery,
                        request.event.clone(),
                        p.name.clone(),
                        p.groups.clone(),
                    )) as BoxedTask
                })
                .collect()
        }
    };
    Ok(tasks)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_requests() {
        let req: TaskRequest = "stress:storm:arm".parse().unwrap();
        assert_eq!(req.kind, TaskKind::StressRecovery);
        assert_eq!(req.event.as_deref(), Some("storm"));
        assert_eq!(req.part.as_deref(), Some("arm"));

        let req: TaskRequest = "modes:master:arm".parse().unwrap();
        assert_eq!(req.event, None);

        let req: TaskRequest = "reduce::arm".parse().unwrap();
        assert_eq!(req.kind, TaskKind::Reduce);
        assert_eq!(req.part.as_deref(), Some("arm"));

        let req: TaskRequest = "solve".parse().unwrap();
        assert_eq!(
            req,
            TaskRequest {
                kind: TaskKind::DynamicSolve,
                event: None,
                part: None
            }
        );

        let req: TaskRequest = "fatigue:storm".parse().unwrap();
        assert_eq!(req.kind, TaskKind::FatigueRecovery);
        assert_eq!(req.kind.recovery_kind(), Some(RecoveryKind::Fatigue));
    }

    #[test]
    fn rejects_malformed_requests() {
        for bad in ["", "damage", "reduce:storm", "solve::arm", "gage:a:b:c"] {
            let err = bad.parse::<TaskRequest>().unwrap_err();
            assert!(matches!(err, StageError::InvalidRequest(_)), "{bad}: {err}");
        }
    }

    #[test]
    fn identity_display_names_event_and_part() {
        let id = TaskIdentity::new(
            TaskKind::StressRecovery,
            Some("storm".to_string()),
            Some("arm".to_string()),
        );
        assert_eq!(id.to_string(), "stress recovery [storm/arm]");
        assert_eq!(
            TaskIdentity::new(TaskKind::DynamicSolve, None, None).to_string(),
            "dynamic solve"
        );
    }
}
