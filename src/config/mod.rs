// src/config/mod.rs

//! Configuration loading and validation for stagechain.
//!
//! Responsibilities:
//! - Define the TOML-backed data model (`model.rs`).
//! - Load a config file from disk (`loader.rs`).
//! - Validate basic invariants like naming and concurrency (`validate.rs`).

pub mod loader;
pub mod model;
pub mod validate;

pub use loader::{config_root_dir, load_and_validate, load_from_path};
pub use model::{
    ConfigFile, ConfigSection, EventConfig, ExportSection, OptionsSection, PartConfig,
    ProgramsSection, RawConfigFile,
};
pub use validate::MASTER_EVENT_DIR;
