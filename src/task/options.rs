// src/task/options.rs

//! Solver option files and launch arguments.
//!
//! Every solver stage reads its inputs from option files in its run
//! directory:
//!
//! - `<program>.fco`: calculation options (input files, model data)
//! - `<program>.fop`: output options (result files, database increment)
//! - `<program>.fao`: additional user options, only when configured
//!
//! Each line is `-key = value`; `#` starts a comment line.

use std::fmt::{Display, Write as _};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::fs::FileSystem;
use crate::types::RunMode;

/// Builder for one option file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OptionFile {
    lines: Vec<String>,
}

impl OptionFile {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn comment(mut self, text: impl Display) -> Self {
        self.lines.push(format!("# {text}"));
        self
    }

    pub fn value(mut self, key: &str, value: impl Display) -> Self {
        self.lines.push(format!("-{key} = {value}"));
        self
    }

    /// A quoted value, for file names and lists.
    pub fn quoted(mut self, key: &str, value: impl Display) -> Self {
        self.lines.push(format!("-{key} = \"{value}\""));
        self
    }

    pub fn path(self, key: &str, path: &Path) -> Self {
        let shown = path.display().to_string();
        self.quoted(key, shown)
    }

    /// A `<f1,f2,...>` file list.
    pub fn paths(self, key: &str, paths: &[PathBuf]) -> Self {
        let list = paths
            .iter()
            .map(|p| p.display().to_string())
            .collect::<Vec<_>>()
            .join(",");
        self.value(key, format!("<\"{list}\">"))
    }

    pub fn flag(self, key: &str, on: bool) -> Self {
        self.value(key, if on { "true" } else { "false" })
    }

    /// Verbatim user options, one per line.
    pub fn raw(mut self, text: &str) -> Self {
        self.lines.extend(
            text.lines()
                .map(str::trim)
                .filter(|l| !l.is_empty())
                .map(str::to_string),
        );
        self
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        for line in &self.lines {
            let _ = writeln!(out, "{line}");
        }
        out
    }

    pub fn write(&self, fs: &dyn FileSystem, path: &Path) -> Result<()> {
        fs.write(path, self.render().as_bytes())
            .with_context(|| format!("writing option file {}", path.display()))
    }
}

/// The option files of one solver run.
#[derive(Debug, Clone)]
pub struct OptionFiles {
    pub calculation: OptionFile,
    pub output: OptionFile,
    pub additional: Option<String>,
}

/// Write `<program>.fco/.fop[/.fao]` into `run_dir` and return the
/// program's argument list.
pub fn write_option_files(
    fs: &dyn FileSystem,
    run_dir: &Path,
    program: &str,
    files: &OptionFiles,
    mode: RunMode,
    ceiling: usize,
) -> Result<Vec<String>> {
    let fco = format!("{program}.fco");
    let fop = format!("{program}.fop");
    files.calculation.write(fs, &run_dir.join(&fco))?;
    files.output.write(fs, &run_dir.join(&fop))?;

    let mut args = vec!["-fco".to_string(), fco, "-fop".to_string(), fop];

    let additional = files.additional.as_deref().map(str::trim).filter(|s| !s.is_empty());
    if let Some(additional) = additional {
        let fao = format!("{program}.fao");
        OptionFile::new().raw(additional).write(fs, &run_dir.join(&fao))?;
        args.push("-fao".to_string());
        args.push(fao);
    }

    args.push("-consolemsg".to_string());
    // User options may pick their own terminal unit for parallel batch runs.
    let user_terminal = additional.is_some_and(|a| a.contains("-terminal"));
    match mode {
        RunMode::Interactive => args.extend(["-terminal".to_string(), "7".to_string()]),
        RunMode::Unattended if ceiling > 1 && !user_terminal => {
            args.extend(["-terminal".to_string(), "-1".to_string()])
        }
        RunMode::Unattended => {}
    }
    Ok(args)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::mock::MockFileSystem;

    fn files(additional: Option<&str>) -> OptionFiles {
        OptionFiles {
            calculation: OptionFile::new()
                .comment("stress recovery")
                .path("linkfile", Path::new("/m/arm.ftl"))
                .value("neval", 4),
            output: OptionFile::new().flag("double", true),
            additional: additional.map(str::to_string),
        }
    }

    #[test]
    fn renders_key_value_lines() {
        let text = files(None).calculation.render();
        assert_eq!(
            text,
            "# stress recovery\n-linkfile = \"/m/arm.ftl\"\n-neval = 4\n"
        );
    }

    #[test]
    fn interactive_args_include_terminal_7() {
        let fs = MockFileSystem::new();
        let args = write_option_files(
            &fs,
            Path::new("/r"),
            "stress_rcy",
            &files(None),
            RunMode::Interactive,
            1,
        )
        .unwrap();

        assert_eq!(
            args,
            vec![
                "-fco",
                "stress_rcy.fco",
                "-fop",
                "stress_rcy.fop",
                "-consolemsg",
                "-terminal",
                "7"
            ]
        );
        assert!(fs.is_file(Path::new("/r/stress_rcy.fco")));
        assert!(!fs.exists(Path::new("/r/stress_rcy.fao")));
    }

    #[test]
    fn batch_args_depend_on_ceiling_and_additional_options() {
        let fs = MockFileSystem::new();
        let serial = write_option_files(
            &fs,
            Path::new("/r"),
            "dynsolver",
            &files(Some("  ")),
            RunMode::Unattended,
            1,
        )
        .unwrap();
        assert_eq!(serial.last().map(String::as_str), Some("-consolemsg"));

        let parallel = write_option_files(
            &fs,
            Path::new("/r"),
            "dynsolver",
            &files(Some("-debug\n-tolerance = 1e-6")),
            RunMode::Unattended,
            3,
        )
        .unwrap();
        assert!(parallel.contains(&"-fao".to_string()));
        assert_eq!(&parallel[parallel.len() - 2..], ["-terminal", "-1"]);
        assert_eq!(
            fs.read_to_string(Path::new("/r/dynsolver.fao")).unwrap(),
            "-debug\n-tolerance = 1e-6\n"
        );
    }

    #[test]
    fn user_terminal_option_suppresses_batch_redirect() {
        let fs = MockFileSystem::new();
        let args = write_option_files(
            &fs,
            Path::new("/r"),
            "dynsolver",
            &files(Some("-terminal = 6")),
            RunMode::Unattended,
            4,
        )
        .unwrap();

        assert_eq!(
            args,
            vec![
                "-fco",
                "dynsolver.fco",
                "-fop",
                "dynsolver.fop",
                "-fao",
                "dynsolver.fao",
                "-consolemsg"
            ]
        );
    }
}
