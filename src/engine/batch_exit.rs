// src/engine/batch_exit.rs

//! What an unattended run does once the scheduler goes idle.

use crate::config::ExportSection;
use crate::types::RunMode;

/// An auto-export command run after a successful batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExportStep {
    Curves(String),
    Animations(String),
}

impl ExportStep {
    pub fn label(&self) -> &'static str {
        match self {
            ExportStep::Curves(_) => "curves",
            ExportStep::Animations(_) => "animations",
        }
    }

    pub fn command(&self) -> &str {
        match self {
            ExportStep::Curves(cmd) | ExportStep::Animations(cmd) => cmd,
        }
    }
}

/// Request to terminate the program with `status` after running `exports`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExitRequest {
    pub status: i32,
    pub exports: Vec<ExportStep>,
}

#[derive(Debug, Clone)]
pub struct BatchExitPolicy {
    mode: RunMode,
    exports: Vec<ExportStep>,
}

impl BatchExitPolicy {
    pub fn new(mode: RunMode, export: &ExportSection) -> Self {
        let mut exports = Vec::new();
        if let Some(cmd) = export.curves_cmd.as_ref().filter(|c| !c.trim().is_empty()) {
            exports.push(ExportStep::Curves(cmd.clone()));
        }
        if let Some(cmd) = export.animations_cmd.as_ref().filter(|c| !c.trim().is_empty()) {
            exports.push(ExportStep::Animations(cmd.clone()));
        }
        Self { mode, exports }
    }

    /// Decide on exit once idle. `failure` is the recorded failure status,
    /// if any. Interactive runs never exit from here.
    pub fn on_idle(&self, failure: Option<i32>) -> Option<ExitRequest> {
        if !self.mode.is_unattended() {
            return None;
        }
        Some(match failure {
            None => ExitRequest {
                status: 0,
                exports: self.exports.clone(),
            },
            Some(status) => ExitRequest {
                status,
                exports: Vec::new(),
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn export() -> ExportSection {
        ExportSection {
            curves_cmd: Some("export_curves".to_string()),
            animations_cmd: Some(" ".to_string()),
        }
    }

    #[test]
    fn interactive_never_exits() {
        let policy = BatchExitPolicy::new(RunMode::Interactive, &export());
        assert_eq!(policy.on_idle(None), None);
        assert_eq!(policy.on_idle(Some(3)), None);
    }

    #[test]
    fn success_runs_configured_exports() {
        let policy = BatchExitPolicy::new(RunMode::Unattended, &export());
        let request = policy.on_idle(None).unwrap();
        assert_eq!(request.status, 0);
        assert_eq!(request.exports, vec![ExportStep::Curves("export_curves".to_string())]);
    }

    #[test]
    fn failure_skips_exports() {
        let policy = BatchExitPolicy::new(RunMode::Unattended, &export());
        let request = policy.on_idle(Some(2)).unwrap();
        assert_eq!(request.status, 2);
        assert!(request.exports.is_empty());
    }
}
