// src/config/model.rs

use std::collections::BTreeMap;

use serde::Deserialize;

/// Raw configuration as read from a TOML file, before validation.
///
/// ```toml
/// [config]
/// max_concurrent_processes = 2
/// results_dir = "results"
///
/// [programs]
/// stress = "stress_rcy"
///
/// [options]
/// stress = "-double"
///
/// [export]
/// curves_cmd = "curve_export --out curves"
///
/// [part.bracket]
/// fe_file = "parts/bracket.ftl"
/// modes = 4
///
/// [event.storm]
/// description = "100 year storm"
/// ```
///
/// All sections except `[part.<name>]` are optional and have defaults.
#[derive(Debug, Clone, Deserialize)]
pub struct RawConfigFile {
    #[serde(default)]
    pub config: ConfigSection,

    #[serde(default)]
    pub programs: ProgramsSection,

    #[serde(default)]
    pub options: OptionsSection,

    #[serde(default)]
    pub export: ExportSection,

    /// FE parts keyed by part name.
    #[serde(default)]
    pub part: BTreeMap<String, PartConfig>,

    /// Simulation events keyed by event name. A model without events only
    /// has the master event.
    #[serde(default)]
    pub event: BTreeMap<String, EventConfig>,
}

/// Validated configuration. Only obtainable through `TryFrom<RawConfigFile>`.
#[derive(Debug, Clone)]
pub struct ConfigFile {
    pub config: ConfigSection,
    pub programs: ProgramsSection,
    pub options: OptionsSection,
    pub export: ExportSection,
    pub part: BTreeMap<String, PartConfig>,
    pub event: BTreeMap<String, EventConfig>,
}

impl ConfigFile {
    pub(crate) fn new_unchecked(raw: RawConfigFile) -> Self {
        Self {
            config: raw.config,
            programs: raw.programs,
            options: raw.options,
            export: raw.export,
            part: raw.part,
            event: raw.event,
        }
    }
}

/// `[config]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct ConfigSection {
    /// Ceiling on concurrently running solver processes.
    #[serde(default = "default_max_concurrent_processes")]
    pub max_concurrent_processes: usize,

    /// Unattended execution (may also be switched on with `--batch`).
    #[serde(default)]
    pub batch: bool,

    /// Root of the result directory hierarchy, relative to the config file.
    #[serde(default = "default_results_dir")]
    pub results_dir: String,
}

fn default_max_concurrent_processes() -> usize {
    1
}

fn default_results_dir() -> String {
    "results".to_string()
}

impl Default for ConfigSection {
    fn default() -> Self {
        Self {
            max_concurrent_processes: default_max_concurrent_processes(),
            batch: false,
            results_dir: default_results_dir(),
        }
    }
}

/// `[programs]` section: executable name of each solver stage.
#[derive(Debug, Clone, Deserialize)]
pub struct ProgramsSection {
    #[serde(default = "default_reducer")]
    pub reducer: String,
    #[serde(default = "default_solver")]
    pub solver: String,
    #[serde(default = "default_stress")]
    pub stress: String,
    #[serde(default = "default_mode_shapes")]
    pub mode_shapes: String,
    #[serde(default = "default_gage")]
    pub gage: String,
    #[serde(default = "default_fatigue")]
    pub fatigue: String,
}

fn default_reducer() -> String {
    "reducer".to_string()
}

fn default_solver() -> String {
    "dynsolver".to_string()
}

fn default_stress() -> String {
    "stress_rcy".to_string()
}

fn default_mode_shapes() -> String {
    "mode_rcy".to_string()
}

fn default_gage() -> String {
    "gage_rcy".to_string()
}

fn default_fatigue() -> String {
    "fatigue_rcy".to_string()
}

impl Default for ProgramsSection {
    fn default() -> Self {
        Self {
            reducer: default_reducer(),
            solver: default_solver(),
            stress: default_stress(),
            mode_shapes: default_mode_shapes(),
            gage: default_gage(),
            fatigue: default_fatigue(),
        }
    }
}

/// `[options]` section: additional user options per stage, written to the
/// `.fao` option file when non-empty.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct OptionsSection {
    #[serde(default)]
    pub reducer: Option<String>,
    #[serde(default)]
    pub solver: Option<String>,
    #[serde(default)]
    pub stress: Option<String>,
    #[serde(default)]
    pub mode_shapes: Option<String>,
    #[serde(default)]
    pub gage: Option<String>,
    #[serde(default)]
    pub fatigue: Option<String>,
}

/// `[export]` section: auto-export steps run after a successful batch run.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ExportSection {
    /// Shell command exporting the curves toggled for auto-export.
    #[serde(default)]
    pub curves_cmd: Option<String>,

    /// Shell command exporting the animations toggled for auto-export.
    #[serde(default)]
    pub animations_cmd: Option<String>,
}

/// `[part.<name>]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct PartConfig {
    /// FE data file, relative to the config file.
    pub fe_file: String,

    /// Number of component modes kept by the reduction.
    #[serde(default)]
    pub modes: u32,

    /// Usage of this part in solver stages is denied.
    #[serde(default)]
    pub locked: bool,

    /// Element groups to restrict stress recovery to. Empty means all.
    #[serde(default)]
    pub groups: Vec<String>,
}

/// `[event.<name>]` section.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct EventConfig {
    #[serde(default)]
    pub description: Option<String>,

    /// Extra solver options for this event only.
    #[serde(default)]
    pub solver_options: Option<String>,
}
