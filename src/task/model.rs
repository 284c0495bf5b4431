// src/task/model.rs

//! Resolved view of the configured mechanism model.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::config::{ConfigFile, ExportSection, OptionsSection, ProgramsSection};
use crate::errors::{Result, StageError};

use super::layout::ResultLayout;

pub type PartId = String;
pub type EventId = String;

/// One FE part of the model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Part {
    pub name: PartId,
    /// 1-based position among the model's parts, used in solver manifests.
    pub base_id: u32,
    /// Absolute path of the FE data file.
    pub fe_file: PathBuf,
    pub modes: u32,
    pub locked: bool,
    pub groups: Vec<String>,
}

/// A simulation event: an alternative parameter set for the dynamic solve.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimEvent {
    pub name: EventId,
    pub description: Option<String>,
    pub solver_options: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Model {
    pub root: PathBuf,
    pub layout: ResultLayout,
    pub parts: BTreeMap<PartId, Part>,
    pub events: BTreeMap<EventId, SimEvent>,
    pub programs: ProgramsSection,
    pub options: OptionsSection,
    pub export: ExportSection,
}

impl Model {
    /// Build the model from a validated config; relative paths resolve
    /// against `root`.
    pub fn from_config(cfg: &ConfigFile, root: &Path) -> Self {
        let parts = cfg
            .part
            .iter()
            .enumerate()
            .map(|(idx, (name, part))| {
                let part = Part {
                    name: name.clone(),
                    base_id: idx as u32 + 1,
                    fe_file: root.join(&part.fe_file),
                    modes: part.modes,
                    locked: part.locked,
                    groups: part.groups.clone(),
                };
                (name.clone(), part)
            })
            .collect();

        let events = cfg
            .event
            .iter()
            .map(|(name, event)| {
                let event = SimEvent {
                    name: name.clone(),
                    description: event.description.clone(),
                    solver_options: event.solver_options.clone(),
                };
                (name.clone(), event)
            })
            .collect();

        Self {
            root: root.to_path_buf(),
            layout: ResultLayout::new(root.join(&cfg.config.results_dir)),
            parts,
            events,
            programs: cfg.programs.clone(),
            options: cfg.options.clone(),
            export: cfg.export.clone(),
        }
    }

    pub fn part(&self, name: &str) -> Result<&Part> {
        self.parts
            .get(name)
            .ok_or_else(|| StageError::UnknownPart(name.to_string()))
    }

    pub fn event(&self, name: &str) -> Result<&SimEvent> {
        self.events
            .get(name)
            .ok_or_else(|| StageError::UnknownEvent(name.to_string()))
    }

    /// Parts that solver stages are allowed to process, in name order.
    pub fn unlocked_parts(&self) -> impl Iterator<Item = &Part> {
        self.parts.values().filter(|p| !p.locked)
    }
}
