// src/task/layout.rs

//! Result directory hierarchy and the disk probes built on it.
//!
//! ```text
//! <results>/parts/<part>/                 reduced part matrices
//! <results>/<event>/timehist_prim/        dynamic solver run
//! <results>/<event>/<subtask>/<part>/     recovery runs
//! ```
//!
//! `<event>` is `master` for the event-less model.

use std::path::{Path, PathBuf};
use std::time::SystemTime;

use anyhow::{Context, Result};
use globset::Glob;
use regex::Regex;

use crate::config::MASTER_EVENT_DIR;
use crate::fs::FileSystem;

pub const SOLVE_SUBDIR: &str = "timehist_prim";
pub const PARTS_SUBDIR: &str = "parts";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResultLayout {
    root: PathBuf,
}

impl ResultLayout {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn event_dir(&self, event: Option<&str>) -> PathBuf {
        self.root.join(event.unwrap_or(MASTER_EVENT_DIR))
    }

    pub fn solve_dir(&self, event: Option<&str>) -> PathBuf {
        self.event_dir(event).join(SOLVE_SUBDIR)
    }

    pub fn recovery_dir(&self, event: Option<&str>, subtask: &str, part: &str) -> PathBuf {
        self.event_dir(event).join(subtask).join(part)
    }

    pub fn reduce_dir(&self, part: &str) -> PathBuf {
        self.root.join(PARTS_SUBDIR).join(part)
    }

    /// Reduced matrix files of a part.
    pub fn reduced_files(&self, part: &str) -> ReducedFiles {
        let dir = self.reduce_dir(part);
        ReducedFiles {
            stiffness: dir.join(format!("{part}_S.fmx")),
            mass: dir.join(format!("{part}_M.fmx")),
            gravity: dir.join(format!("{part}_G.fmx")),
            b_matrix: dir.join(format!("{part}_B.fmx")),
            sam: dir.join(format!("{part}_SAM.fsm")),
            eigenvectors: dir.join(format!("{part}_E.fmx")),
            checksum: dir.join(format!("{part}.chk")),
        }
    }
}

/// Output files of a part reduction, plus the checksum sidecar.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReducedFiles {
    pub stiffness: PathBuf,
    pub mass: PathBuf,
    pub gravity: PathBuf,
    pub b_matrix: PathBuf,
    pub sam: PathBuf,
    /// Only written when component modes are kept.
    pub eigenvectors: PathBuf,
    pub checksum: PathBuf,
}

impl ReducedFiles {
    /// The matrix files every reduction produces.
    pub fn matrices(&self) -> [&Path; 5] {
        [
            &self.stiffness,
            &self.mass,
            &self.gravity,
            &self.b_matrix,
            &self.sam,
        ]
    }
}

/// Make sure a run directory exists.
pub fn verify_dir(fs: &dyn FileSystem, dir: &Path) -> Result<()> {
    if fs.is_dir(dir) {
        return Ok(());
    }
    fs.create_dir_all(dir)
        .with_context(|| format!("could not create directory {}", dir.display()))
}

/// Files directly in `dir` whose name matches a glob pattern, sorted.
/// A missing directory has no matches.
pub fn files_matching(fs: &dyn FileSystem, dir: &Path, pattern: &str) -> Result<Vec<PathBuf>> {
    if !fs.is_dir(dir) {
        return Ok(Vec::new());
    }
    let matcher = Glob::new(pattern)
        .with_context(|| format!("invalid file pattern '{pattern}'"))?
        .compile_matcher();

    let files = fs
        .read_dir(dir)?
        .into_iter()
        .filter(|p| fs.is_file(p))
        .filter(|p| p.file_name().is_some_and(|name| matcher.is_match(name)))
        .collect();
    Ok(files)
}

/// Latest modification time among `files`; `None` if any is missing.
pub fn newest(fs: &dyn FileSystem, files: &[&Path]) -> Option<SystemTime> {
    let mut newest = None;
    for file in files {
        let modified = fs.modified(file).ok()?;
        newest = newest.max(Some(modified));
    }
    newest
}

/// Whether `file` exists and is not older than `reference`.
pub fn is_newer_or_same(fs: &dyn FileSystem, file: &Path, reference: &Path) -> bool {
    match (fs.modified(file), fs.modified(reference)) {
        (Ok(file), Ok(reference)) => file >= reference,
        _ => false,
    }
}

/// Next result database increment in `dir` for files named
/// `<stem>_<n>.<ext>` (1 when there are none).
pub fn next_increment(fs: &dyn FileSystem, dir: &Path, stem: &str, ext: &str) -> Result<u32> {
    let pattern = format!(r"^{}_(\d+)\.{}$", regex::escape(stem), regex::escape(ext));
    let re = Regex::new(&pattern).context("building increment pattern")?;

    let highest = files_matching(fs, dir, &format!("{stem}_*.{ext}"))?
        .iter()
        .filter_map(|p| p.file_name().and_then(|n| n.to_str()))
        .filter_map(|name| re.captures(name))
        .filter_map(|caps| caps[1].parse::<u32>().ok())
        .max()
        .unwrap_or(0);
    Ok(highest + 1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::mock::MockFileSystem;

    #[test]
    fn directories_follow_event_hierarchy() {
        let layout = ResultLayout::new(PathBuf::from("/m/results"));

        assert_eq!(
            layout.solve_dir(None),
            PathBuf::from("/m/results/master/timehist_prim")
        );
        assert_eq!(
            layout.recovery_dir(Some("storm"), "timehist_rcy", "arm"),
            PathBuf::from("/m/results/storm/timehist_rcy/arm")
        );
        assert_eq!(
            layout.reduced_files("arm").sam,
            PathBuf::from("/m/results/parts/arm/arm_SAM.fsm")
        );
    }

    #[test]
    fn matching_and_increments() {
        let fs = MockFileSystem::new();
        fs.add_file("/r/dynsolver_1.frs", "");
        fs.add_file("/r/dynsolver_3.frs", "");
        fs.add_file("/r/dynsolver.fsi", "");

        let frs = files_matching(&fs, Path::new("/r"), "*.frs").unwrap();
        assert_eq!(frs.len(), 2);
        assert!(files_matching(&fs, Path::new("/none"), "*.frs").unwrap().is_empty());
        assert_eq!(next_increment(&fs, Path::new("/r"), "dynsolver", "frs").unwrap(), 4);
        assert_eq!(next_increment(&fs, Path::new("/r"), "stress_rcy", "frs").unwrap(), 1);
    }

    #[test]
    fn freshness_uses_modification_order() {
        let fs = MockFileSystem::new();
        fs.add_file("/m/arm.ftl", "fe");
        fs.add_file("/m/out.fmx", "k");

        assert!(is_newer_or_same(&fs, Path::new("/m/out.fmx"), Path::new("/m/arm.ftl")));
        assert!(!is_newer_or_same(&fs, Path::new("/m/arm.ftl"), Path::new("/m/out.fmx")));
        assert!(!is_newer_or_same(&fs, Path::new("/m/missing"), Path::new("/m/arm.ftl")));
        assert!(newest(&fs, &[Path::new("/m/arm.ftl"), Path::new("/m/missing")]).is_none());
    }
}
