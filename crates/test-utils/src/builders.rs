#![allow(dead_code)]

use std::collections::BTreeMap;
use std::path::Path;

use stagechain::config::{
    ConfigFile, ConfigSection, EventConfig, ExportSection, OptionsSection, PartConfig,
    ProgramsSection, RawConfigFile,
};
use stagechain::fs::mock::MockFileSystem;
use stagechain::task::Model;

/// Builder for `ConfigFile` to simplify test setup.
pub struct ConfigFileBuilder {
    config: RawConfigFile,
}

impl ConfigFileBuilder {
    pub fn new() -> Self {
        Self {
            config: RawConfigFile {
                config: ConfigSection::default(),
                programs: ProgramsSection::default(),
                options: OptionsSection::default(),
                export: ExportSection::default(),
                part: BTreeMap::new(),
                event: BTreeMap::new(),
            },
        }
    }

    pub fn with_part(mut self, name: &str, part: PartConfigBuilder) -> Self {
        self.config.part.insert(name.to_string(), part.build());
        self
    }

    pub fn with_event(mut self, name: &str) -> Self {
        self.config.event.insert(name.to_string(), EventConfig::default());
        self
    }

    pub fn with_event_options(mut self, name: &str, solver_options: &str) -> Self {
        self.config.event.insert(
            name.to_string(),
            EventConfig {
                description: None,
                solver_options: Some(solver_options.to_string()),
            },
        );
        self
    }

    pub fn max_concurrent(mut self, n: usize) -> Self {
        self.config.config.max_concurrent_processes = n;
        self
    }

    pub fn batch(mut self, batch: bool) -> Self {
        self.config.config.batch = batch;
        self
    }

    pub fn curves_cmd(mut self, cmd: &str) -> Self {
        self.config.export.curves_cmd = Some(cmd.to_string());
        self
    }

    pub fn animations_cmd(mut self, cmd: &str) -> Self {
        self.config.export.animations_cmd = Some(cmd.to_string());
        self
    }

    pub fn solver_options(mut self, options: &str) -> Self {
        self.config.options.solver = Some(options.to_string());
        self
    }

    pub fn raw(self) -> RawConfigFile {
        self.config
    }

    pub fn build(self) -> ConfigFile {
        ConfigFile::try_from(self.config).expect("Failed to build valid config from builder")
    }
}

impl Default for ConfigFileBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for `PartConfig`.
pub struct PartConfigBuilder {
    part: PartConfig,
}

impl PartConfigBuilder {
    pub fn new(fe_file: &str) -> Self {
        Self {
            part: PartConfig {
                fe_file: fe_file.to_string(),
                modes: 0,
                locked: false,
                groups: vec![],
            },
        }
    }

    pub fn modes(mut self, modes: u32) -> Self {
        self.part.modes = modes;
        self
    }

    pub fn locked(mut self) -> Self {
        self.part.locked = true;
        self
    }

    pub fn group(mut self, group: &str) -> Self {
        self.part.groups.push(group.to_string());
        self
    }

    pub fn build(self) -> PartConfig {
        self.part
    }
}

/// Model rooted at `/model`.
pub fn model_from(cfg: &ConfigFile) -> Model {
    Model::from_config(cfg, Path::new("/model"))
}

/// Write an FE data file for every part of the model.
pub fn seed_fe_files(fs: &MockFileSystem, model: &Model) {
    for part in model.parts.values() {
        fs.add_file(&part.fe_file, format!("FE data of {}", part.name));
    }
}
