// src/task/solve.rs

//! Dynamic solve of one simulation event over all parts.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use anyhow::Result;

use crate::exec::{ExitStatus, ProcessHandle};
use crate::fs::FileSystem;

use super::layout::{files_matching, newest, next_increment, verify_dir};
use super::model::{EventId, Model};
use super::options::{OptionFile, OptionFiles};
use super::reduce::{ReduceTask, reduce_identity, reduction_current};
use super::{
    BoxedTask, DependencyCheck, ExecuteOutcome, Task, TaskContext, TaskIdentity, TaskKind,
    kill_handle, launch, process_signature, report_death,
};

#[derive(Debug)]
pub struct SolveTask {
    event: Option<EventId>,
    handle: Option<ProcessHandle>,
}

impl SolveTask {
    pub fn new(event: Option<EventId>) -> Self {
        Self {
            event,
            handle: None,
        }
    }

    fn run_dir(&self, model: &Model) -> PathBuf {
        model.layout.solve_dir(self.event.as_deref())
    }
}

/// `<solver>.fsi` in the solve directory of `event`.
pub fn solver_input_file(model: &Model, event: Option<&str>) -> PathBuf {
    model
        .layout
        .solve_dir(event)
        .join(format!("{}.fsi", model.programs.solver))
}

/// Solver result files (`*.frs`) of `event`.
pub fn solver_results(
    fs: &dyn FileSystem,
    model: &Model,
    event: Option<&str>,
) -> Result<Vec<PathBuf>> {
    files_matching(fs, &model.layout.solve_dir(event), "*.frs")
}

/// Part manifest read by the solver: one line per part.
fn render_solver_input(model: &Model, event: Option<&str>) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "# solver input, event {}",
        event.unwrap_or(crate::config::MASTER_EVENT_DIR)
    );
    for part in model.parts.values() {
        let files = model.layout.reduced_files(&part.name);
        let _ = writeln!(
            out,
            "PART {} {} \"{}\" \"{}\" \"{}\" \"{}\"",
            part.base_id,
            part.name,
            files.sam.display(),
            files.stiffness.display(),
            files.mass.display(),
            files.gravity.display()
        );
    }
    out
}

impl Task for SolveTask {
    fn identity(&self) -> TaskIdentity {
        TaskIdentity::new(TaskKind::DynamicSolve, self.event.clone(), None)
    }

    fn signature(&self, model: &Model) -> String {
        process_signature(&model.programs.solver, &self.run_dir(model))
    }

    fn check_dependencies(&self, ctx: &TaskContext<'_>) -> DependencyCheck {
        if ctx.running.is_kind_running(TaskKind::Reduce) {
            return DependencyCheck::Blocked;
        }
        if ctx.model.parts.is_empty() {
            return DependencyCheck::Failed("the model has no parts".to_string());
        }

        let mut pending: Vec<BoxedTask> = Vec::new();
        let mut unreducible = None;
        for part in ctx.model.parts.values() {
            if reduction_current(ctx.fs, ctx.model, part)
                || ctx.is_prepared(&reduce_identity(part))
            {
                continue;
            }
            if part.locked {
                unreducible.get_or_insert_with(|| {
                    format!("part '{}' is locked and has no reduced matrices", part.name)
                });
            } else if !ctx.fs.is_file(&part.fe_file) {
                unreducible.get_or_insert_with(|| {
                    format!("FE data file of part '{}' is missing", part.name)
                });
            } else {
                pending.push(Box::new(ReduceTask::new(part.name.clone())));
            }
        }

        // Pending reductions win; the unreducible part is reported when the
        // solve is retried after they finish.
        if !pending.is_empty() {
            return DependencyCheck::NeedsPrerequisites(pending);
        }
        match unreducible {
            Some(reason) => DependencyCheck::Failed(reason),
            None => DependencyCheck::Ready,
        }
    }

    fn results_up_to_date(&self, ctx: &TaskContext<'_>) -> bool {
        let event = self.event.as_deref();
        if !ctx
            .model
            .parts
            .values()
            .all(|p| reduction_current(ctx.fs, ctx.model, p))
        {
            return false;
        }
        if !ctx.fs.is_file(&solver_input_file(ctx.model, event)) {
            return false;
        }
        let Ok(results) = solver_results(ctx.fs, ctx.model, event) else {
            return false;
        };
        let result_refs: Vec<&Path> = results.iter().map(PathBuf::as_path).collect();
        let Some(results_time) = newest(ctx.fs, &result_refs) else {
            return false;
        };

        let mut matrices = Vec::new();
        for part in ctx.model.parts.values() {
            matrices.push(ctx.model.layout.reduced_files(&part.name));
        }
        let matrix_refs: Vec<&Path> = matrices.iter().flat_map(|f| f.matrices()).collect();
        match newest(ctx.fs, &matrix_refs) {
            Some(matrix_time) => results_time >= matrix_time,
            None => false,
        }
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
            &ctx.model.programs.solver,
            &self.run_dir(ctx.model),
            status,
        );
    }
}

impl SolveTask {
    fn start(&mut self, ctx: &mut TaskContext<'_>) -> ExecuteOutcome {
        if self.results_up_to_date(ctx) {
            return ExecuteOutcome::ResultsAlreadyOk;
        }
        if let Some(outcome) = self.check_dependencies(ctx).into_outcome() {
            return outcome;
        }

        let model = ctx.model;
        let event = self.event.as_deref();
        let run_dir = self.run_dir(model);
        if let Err(e) = verify_dir(ctx.fs, &run_dir) {
            return ExecuteOutcome::NotExecutable(format!("{e:#}"));
        }

        let program = &model.programs.solver;
        let fsi = solver_input_file(model, event);
        if let Err(e) = ctx.fs.write(&fsi, render_solver_input(model, event).as_bytes()) {
            return ExecuteOutcome::NotExecutable(format!("{e:#}"));
        }
        let increment = match next_increment(ctx.fs, &run_dir, program, "frs") {
            Ok(inc) => inc,
            Err(e) => return ExecuteOutcome::NotExecutable(format!("{e:#}")),
        };

        let event_options = event
            .and_then(|name| model.events.get(name))
            .and_then(|e| e.solver_options.as_deref());
        let additional = [model.options.solver.as_deref(), event_options]
            .into_iter()
            .flatten()
            .collect::<Vec<_>>()
            .join("\n");

        let option_files = OptionFiles {
            calculation: OptionFile::new()
                .comment(format!(
                    "dynamic solve, event {}",
                    ctx.active_event.current().unwrap_or(crate::config::MASTER_EVENT_DIR)
                ))
                .path("fsifile", &fsi),
            output: OptionFile::new()
                .quoted("frsfile", format!("{program}_{increment}.frs"))
                .value("rdbinc", increment)
                .quoted("resfile", format!("{program}.res")),
            additional: Some(additional),
        };

        launch(ctx, program, &run_dir, &option_files, &mut self.handle)
    }
}
