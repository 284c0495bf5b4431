// src/task/recovery.rs

//! Recovery of part results (stresses, mode shapes, gage strains, fatigue
//! damage) from the dynamic solve.

use std::path::PathBuf;

use regex::Regex;
use tracing::debug;

use crate::config::{OptionsSection, ProgramsSection};
use crate::exec::{ExitStatus, ProcessHandle};

use super::layout::{files_matching, is_newer_or_same, next_increment, verify_dir};
use super::model::{EventId, Model, Part, PartId};
use super::options::{OptionFile, OptionFiles};
use super::reduce::{ReduceTask, reduce_identity, reduction_current};
use super::solve::{SolveTask, solver_input_file, solver_results};
use super::{
    DependencyCheck, ExecuteOutcome, Task, TaskContext, TaskIdentity, TaskKind, kill_handle,
    launch, process_signature, report_death,
};

/// Lines of a `.frs` header searched for the producing module.
const FRS_HEADER_LINES: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecoveryKind {
    Stress,
    ModeShapes,
    Gage,
    /// Damage and fatigue life summaries over the strain coat of a part.
    Fatigue,
}

impl RecoveryKind {
    pub fn task_kind(self) -> TaskKind {
        match self {
            RecoveryKind::Stress => TaskKind::StressRecovery,
            RecoveryKind::ModeShapes => TaskKind::ModeShapeRecovery,
            RecoveryKind::Gage => TaskKind::GageRecovery,
            RecoveryKind::Fatigue => TaskKind::FatigueRecovery,
        }
    }

    /// Directory name under the event directory.
    pub fn subtask(self) -> &'static str {
        match self {
            RecoveryKind::Stress => "timehist_rcy",
            RecoveryKind::ModeShapes => "eigval_rcy",
            RecoveryKind::Gage => "timehist_gage_rcy",
            RecoveryKind::Fatigue => "summary_rcy",
        }
    }

    pub fn program(self, programs: &ProgramsSection) -> &str {
        match self {
            RecoveryKind::Stress => &programs.stress,
            RecoveryKind::ModeShapes => &programs.mode_shapes,
            RecoveryKind::Gage => &programs.gage,
            RecoveryKind::Fatigue => &programs.fatigue,
        }
    }

    fn additional_options(self, options: &OptionsSection) -> Option<String> {
        match self {
            RecoveryKind::Stress => options.stress.clone(),
            RecoveryKind::ModeShapes => options.mode_shapes.clone(),
            RecoveryKind::Gage => options.gage.clone(),
            RecoveryKind::Fatigue => options.fatigue.clone(),
        }
    }
}

#[derive(Debug)]
pub struct RecoveryTask {
    kind: RecoveryKind,
    event: Option<EventId>,
    part: PartId,
    /// Element groups to restrict the recovery to; empty means all.
    groups: Vec<String>,
    handle: Option<ProcessHandle>,
}

/// Inputs of a stress recovery run straight from a reducer direct solution.
#[derive(Debug, Clone, PartialEq, Eq)]
struct DirectSolution {
    sam: PathBuf,
    frs: PathBuf,
}

impl RecoveryTask {
    pub fn new(
        kind: RecoveryKind,
        event: Option<EventId>,
        part: PartId,
        groups: Vec<String>,
    ) -> Self {
        Self {
            kind,
            event,
            part,
            groups,
            handle: None,
        }
    }

    fn run_dir(&self, model: &Model) -> PathBuf {
        model
            .layout
            .recovery_dir(self.event.as_deref(), self.kind.subtask(), &self.part)
    }

    /// A reducer direct solution placed in the run directory: exactly one
    /// SAM file and an `.frs` whose header names the reducer, newer than
    /// the part's FE data.
    fn direct_solution(&self, ctx: &TaskContext<'_>, part: &Part) -> Option<DirectSolution> {
        if self.kind != RecoveryKind::Stress {
            return None;
        }
        let run_dir = self.run_dir(ctx.model);

        let sams = files_matching(ctx.fs, &run_dir, "*.fsm").ok()?;
        let [sam] = sams.as_slice() else {
            return None;
        };

        let module = Regex::new(r"(?i)^\s*module\s*[:=]\s*(\S+)").ok()?;
        let reducer = &ctx.model.programs.reducer;
        let frs = files_matching(ctx.fs, &run_dir, "*.frs")
            .ok()?
            .into_iter()
            .find(|frs| {
                ctx.fs.read_to_string(frs).is_ok_and(|text| {
                    text.lines()
                        .take(FRS_HEADER_LINES)
                        .filter_map(|line| module.captures(line))
                        .any(|caps| caps[1].trim_matches('"') == reducer.as_str())
                })
            })?;

        if !is_newer_or_same(ctx.fs, &frs, &part.fe_file) {
            debug!(part = %part.name, "direct solution is older than the FE data");
            return None;
        }
        Some(DirectSolution {
            sam: sam.clone(),
            frs,
        })
    }

    fn start(&mut self, ctx: &mut TaskContext<'_>) -> ExecuteOutcome {
        if let Some(outcome) = self.check_dependencies(ctx).into_outcome() {
            return outcome;
        }

        let model = ctx.model;
        let Ok(part) = model.part(&self.part) else {
            return ExecuteOutcome::NotExecutable(format!("unknown part '{}'", self.part));
        };
        let run_dir = self.run_dir(model);
        if let Err(e) = verify_dir(ctx.fs, &run_dir) {
            return ExecuteOutcome::NotExecutable(format!("{e:#}"));
        }

        let program = self.kind.program(&model.programs);
        let reduced = model.layout.reduced_files(&part.name);
        let (sam, frs_files, b_matrix) = match self.direct_solution(ctx, part) {
            Some(direct) => (direct.sam, vec![direct.frs], None),
            None => {
                let frs = match solver_results(ctx.fs, model, self.event.as_deref()) {
                    Ok(frs) => frs,
                    Err(e) => return ExecuteOutcome::NotExecutable(format!("{e:#}")),
                };
                (reduced.sam.clone(), frs, Some(reduced.b_matrix.clone()))
            }
        };
        let increment = match next_increment(ctx.fs, &run_dir, program, "frs") {
            Ok(inc) => inc,
            Err(e) => return ExecuteOutcome::NotExecutable(format!("{e:#}")),
        };

        let mut calculation = OptionFile::new()
            .comment(format!(
                "{} of part {}, event {}",
                self.kind.task_kind(),
                part.name,
                ctx.active_event
                    .current()
                    .unwrap_or(crate::config::MASTER_EVENT_DIR)
            ))
            .path("linkfile", &part.fe_file)
            .value("linkId", part.base_id)
            .path("samfile", &sam)
            .paths("frsfile", &frs_files);
        match self.kind {
            RecoveryKind::ModeShapes => calculation = calculation.value("neval", part.modes),
            RecoveryKind::Stress | RecoveryKind::Gage => {
                if let Some(b_matrix) = &b_matrix {
                    calculation = calculation.path("Bmatfile", b_matrix);
                }
            }
            RecoveryKind::Fatigue => {
                calculation = calculation
                    .path("Bmatfile", &reduced.b_matrix)
                    .path("fsifile", &solver_input_file(model, self.event.as_deref()));
                if part.modes > 0 {
                    calculation = calculation.path("eigfile", &reduced.eigenvectors);
                }
            }
        }
        if !self.groups.is_empty() {
            calculation = calculation.quoted("group", self.groups.join(" "));
        }

        let mut output = OptionFile::new()
            .quoted("resfile", format!("{program}.res"))
            .quoted("rdbfile", format!("{program}_{increment}.frs"))
            .value("rdbinc", increment);
        if self.kind == RecoveryKind::Fatigue {
            output = output.quoted("fppfile", format!("{program}_{increment:03}.fpp"));
        }

        let option_files = OptionFiles {
            calculation,
            output,
            additional: self.kind.additional_options(&model.options),
        };

        launch(ctx, program, &run_dir, &option_files, &mut self.handle)
    }
}

impl Task for RecoveryTask {
    fn identity(&self) -> TaskIdentity {
        TaskIdentity::new(
            self.kind.task_kind(),
            self.event.clone(),
            Some(self.part.clone()),
        )
    }

    fn signature(&self, model: &Model) -> String {
        process_signature(self.kind.program(&model.programs), &self.run_dir(model))
    }

    fn check_dependencies(&self, ctx: &TaskContext<'_>) -> DependencyCheck {
        let event = self.event.as_deref();
        let part = match ctx.model.part(&self.part) {
            Ok(part) => part,
            Err(e) => return DependencyCheck::Failed(e.to_string()),
        };

        // A direct solution needs nothing from the solver or the reducer.
        if self.direct_solution(ctx, part).is_some() {
            return DependencyCheck::Ready;
        }

        if ctx
            .running
            .is_kind_running_for_event(TaskKind::DynamicSolve, event)
            || ctx.running.is_kind_running(TaskKind::Reduce)
        {
            return DependencyCheck::Blocked;
        }

        let solve = SolveTask::new(self.event.clone());
        let solved = ctx.is_prepared(&solve.identity())
            || (solver_results(ctx.fs, ctx.model, event).is_ok_and(|frs| !frs.is_empty())
                && ctx.fs.is_file(&solver_input_file(ctx.model, event)));
        if !solved {
            return DependencyCheck::NeedsPrerequisites(vec![Box::new(solve)]);
        }

        if reduction_current(ctx.fs, ctx.model, part) || ctx.is_prepared(&reduce_identity(part)) {
            return DependencyCheck::Ready;
        }
        if part.locked {
            return DependencyCheck::Failed(format!(
                "part '{}' is locked and has no reduced matrices",
                part.name
            ));
        }
        if !ctx.fs.is_file(&part.fe_file) {
            return DependencyCheck::Failed(format!(
                "FE data file {} of part '{}' is missing",
                part.fe_file.display(),
                part.name
            ));
        }
        DependencyCheck::NeedsPrerequisites(vec![Box::new(ReduceTask::new(part.name.clone()))])
    }

    fn execute(&mut self, ctx: &mut TaskContext<'_>) -> ExecuteOutcome {
        let previous = ctx.active_event.activate(self.event.clone());
        let outcome = self.start(ctx);
        ctx.active_event.restore(previous);
        outcome
    }

    fn kill(&mut self) {
        kill_handle(&self.identity(), &mut self.handle);
    }

    fn on_death(&mut self, status: ExitStatus, ctx: &TaskContext<'_>) {
        self.handle = None;
        report_death(
            &self.identity(),
            self.kind.program(&ctx.model.programs),
            &self.run_dir(ctx.model),
            status,
        );
    }
}
