// src/task/reduce.rs

//! Part reduction: produces the reduced matrices the solver and recovery
//! stages build on.

use anyhow::Result;
use tracing::{debug, warn};

use crate::exec::{ExitStatus, ProcessHandle};
use crate::fs::FileSystem;

use super::layout::{ReducedFiles, is_newer_or_same, verify_dir};
use super::model::{Model, Part, PartId};
use super::options::{OptionFile, OptionFiles};
use super::{
    DependencyCheck, ExecuteOutcome, Task, TaskContext, TaskIdentity, TaskKind, kill_handle,
    launch, process_signature, report_death,
};

#[derive(Debug)]
pub struct ReduceTask {
    part: PartId,
    handle: Option<ProcessHandle>,
    /// Checksum of the inputs this run reduces, stored once it succeeds.
    pending_checksum: Option<String>,
}

impl ReduceTask {
    pub fn new(part: PartId) -> Self {
        Self {
            part,
            handle: None,
            pending_checksum: None,
        }
    }
}

/// blake3 digest of the reduction inputs: FE file contents and mode count.
pub fn reduction_checksum(fs: &dyn FileSystem, part: &Part) -> Result<String> {
    let data = fs.read(&part.fe_file)?;
    let mut hasher = blake3::Hasher::new();
    hasher.update(&data);
    hasher.update(&part.modes.to_le_bytes());
    Ok(hasher.finalize().to_hex().to_string())
}

/// Whether the part's reduced matrices can be used as they are.
///
/// Locked parts are never re-reduced, so for them existing matrices are
/// enough.
pub fn reduction_current(fs: &dyn FileSystem, model: &Model, part: &Part) -> bool {
    let files = model.layout.reduced_files(&part.name);
    if !files.matrices().iter().all(|m| fs.is_file(m)) {
        return false;
    }
    if part.locked {
        return true;
    }
    if !files
        .matrices()
        .iter()
        .all(|m| is_newer_or_same(fs, m, &part.fe_file))
    {
        debug!(part = %part.name, "reduced matrices older than FE data");
        return false;
    }
    stored_checksum_matches(fs, part, &files)
}

fn stored_checksum_matches(fs: &dyn FileSystem, part: &Part, files: &ReducedFiles) -> bool {
    let Ok(stored) = fs.read_to_string(&files.checksum) else {
        return false;
    };
    match reduction_checksum(fs, part) {
        Ok(current) => stored.trim() == current,
        Err(_) => false,
    }
}

pub fn reduce_identity(part: &Part) -> TaskIdentity {
    TaskIdentity::new(TaskKind::Reduce, None, Some(part.name.clone()))
}

impl Task for ReduceTask {
    fn identity(&self) -> TaskIdentity {
        TaskIdentity::new(TaskKind::Reduce, None, Some(self.part.clone()))
    }

    fn signature(&self, model: &Model) -> String {
        process_signature(&model.programs.reducer, &model.layout.reduce_dir(&self.part))
    }

    fn check_dependencies(&self, ctx: &TaskContext<'_>) -> DependencyCheck {
        let part = match ctx.model.part(&self.part) {
            Ok(part) => part,
            Err(e) => return DependencyCheck::Failed(e.to_string()),
        };
        if part.locked {
            return DependencyCheck::Failed(format!("part '{}' is locked", part.name));
        }
        if !ctx.fs.is_file(&part.fe_file) {
            return DependencyCheck::Failed(format!(
                "FE data file {} of part '{}' is missing",
                part.fe_file.display(),
                part.name
            ));
        }
        DependencyCheck::Ready
    }

    fn results_up_to_date(&self, ctx: &TaskContext<'_>) -> bool {
        ctx.model
            .part(&self.part)
            .is_ok_and(|part| reduction_current(ctx.fs, ctx.model, part))
    }

    fn execute(&mut self, ctx: &mut TaskContext<'_>) -> ExecuteOutcome {
        if self.results_up_to_date(ctx) {
            return ExecuteOutcome::ResultsAlreadyOk;
        }
        if let Some(outcome) = self.check_dependencies(ctx).into_outcome() {
            return outcome;
        }

        let model = ctx.model;
        let Ok(part) = model.part(&self.part) else {
            return ExecuteOutcome::NotExecutable(format!("unknown part '{}'", self.part));
        };
        let run_dir = model.layout.reduce_dir(&part.name);
        if let Err(e) = verify_dir(ctx.fs, &run_dir) {
            return ExecuteOutcome::NotExecutable(format!("{e:#}"));
        }

        match reduction_checksum(ctx.fs, part) {
            Ok(sum) => self.pending_checksum = Some(sum),
            Err(e) => return ExecuteOutcome::NotExecutable(format!("{e:#}")),
        }

        let files = model.layout.reduced_files(&part.name);
        let mut output = OptionFile::new()
            .path("samfile", &files.sam)
            .path("stiffile", &files.stiffness)
            .path("massfile", &files.mass)
            .path("gravfile", &files.gravity)
            .path("Bmatfile", &files.b_matrix);
        if part.modes > 0 {
            output = output.path("eigfile", &files.eigenvectors);
        }
        let option_files = OptionFiles {
            calculation: OptionFile::new()
                .comment(format!("reduction of part {}", part.name))
                .path("linkfile", &part.fe_file)
                .value("linkId", part.base_id)
                .value("neval", part.modes),
            output: output.quoted("resfile", format!("{}.res", model.programs.reducer)),
            additional: model.options.reducer.clone(),
        };

        launch(ctx, &model.programs.reducer, &run_dir, &option_files, &mut self.handle)
    }

    fn kill(&mut self) {
        kill_handle(&self.identity(), &mut self.handle);
    }

    fn on_death(&mut self, status: ExitStatus, ctx: &TaskContext<'_>) {
        self.handle = None;
        let run_dir = ctx.model.layout.reduce_dir(&self.part);
        report_death(&self.identity(), &ctx.model.programs.reducer, &run_dir, status);

        if let (true, Some(sum)) = (status.success(), self.pending_checksum.take()) {
            let path = ctx.model.layout.reduced_files(&self.part).checksum;
            if let Err(e) = ctx.fs.write(&path, sum.as_bytes()) {
                warn!(part = %self.part, error = %e, "could not store reduction checksum");
            }
        }
    }
}
