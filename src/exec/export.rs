// src/exec/export.rs

//! Auto-export commands run once an unattended batch has succeeded.

use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::process::Stdio;

use anyhow::{Context, Result, bail};
use tokio::process::Command;
use tracing::info;

/// Runs shell commands for the export steps of a batch exit.
pub trait Exporter: Send {
    fn run_export<'a>(
        &'a mut self,
        label: &'a str,
        cmd: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>>;
}

/// Runs each export through the platform shell in the model directory.
#[derive(Debug, Clone)]
pub struct CommandExporter {
    working_dir: PathBuf,
}

impl CommandExporter {
    pub fn new(working_dir: PathBuf) -> Self {
        Self { working_dir }
    }
}

impl Exporter for CommandExporter {
    fn run_export<'a>(
        &'a mut self,
        label: &'a str,
        cmd: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
        Box::pin(async move {
            info!(export = label, cmd, "running export");

            let mut command = if cfg!(windows) {
                let mut c = Command::new("cmd");
                c.arg("/C").arg(cmd);
                c
            } else {
                let mut c = Command::new("sh");
                c.arg("-c").arg(cmd);
                c
            };

            let status = command
                .current_dir(&self.working_dir)
                .stdin(Stdio::null())
                .status()
                .await
                .with_context(|| format!("running {label} export"))?;

            if !status.success() {
                bail!("{label} export failed with {status}");
            }
            Ok(())
        })
    }
}
