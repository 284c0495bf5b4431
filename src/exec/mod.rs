// src/exec/mod.rs

//! Process execution layer.
//!
//! Tasks start their external solver programs through a [`ProcessLauncher`]
//! and keep the returned [`ProcessHandle`] for `kill()`. The launcher reports
//! every process termination back to the runtime as exactly one
//! `RuntimeEvent::ProcessExited`, including processes that were killed.
//!
//! - [`process`] holds the launcher contract, process specs, handles and
//!   exit statuses.
//! - [`launcher`] is the production launcher built on `tokio::process`.
//! - [`export`] runs the auto-export steps requested by the batch-exit policy.

pub mod export;
pub mod launcher;
pub mod process;

pub use export::{CommandExporter, Exporter};
pub use launcher::TokioLauncher;
pub use process::{ExitStatus, ProcessHandle, ProcessLauncher, ProcessSpec};
