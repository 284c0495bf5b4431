// src/config/validate.rs

use crate::config::model::{ConfigFile, RawConfigFile};
use crate::errors::{Result, StageError};

/// Name reserved for the master (event-less) result directory.
pub const MASTER_EVENT_DIR: &str = "master";

impl TryFrom<RawConfigFile> for ConfigFile {
    type Error = StageError;

    fn try_from(raw: RawConfigFile) -> std::result::Result<Self, Self::Error> {
        validate_raw_config(&raw)?;
        Ok(ConfigFile::new_unchecked(raw))
    }
}

fn validate_raw_config(cfg: &RawConfigFile) -> Result<()> {
    ensure_has_parts(cfg)?;
    validate_global_config(cfg)?;
    validate_programs(cfg)?;
    validate_parts(cfg)?;
    validate_events(cfg)?;
    Ok(())
}

fn ensure_has_parts(cfg: &RawConfigFile) -> Result<()> {
    if cfg.part.is_empty() {
        return Err(StageError::ConfigError(
            "config must contain at least one [part.<name>] section".to_string(),
        ));
    }
    Ok(())
}

fn validate_global_config(cfg: &RawConfigFile) -> Result<()> {
    if cfg.config.max_concurrent_processes == 0 {
        return Err(StageError::ConfigError(
            "[config].max_concurrent_processes must be >= 1 (got 0)".to_string(),
        ));
    }
    if cfg.config.results_dir.trim().is_empty() {
        return Err(StageError::ConfigError(
            "[config].results_dir must not be empty".to_string(),
        ));
    }
    Ok(())
}

fn validate_programs(cfg: &RawConfigFile) -> Result<()> {
    let programs = [
        ("reducer", &cfg.programs.reducer),
        ("solver", &cfg.programs.solver),
        ("stress", &cfg.programs.stress),
        ("mode_shapes", &cfg.programs.mode_shapes),
        ("gage", &cfg.programs.gage),
        ("fatigue", &cfg.programs.fatigue),
    ];
    for (key, program) in programs {
        if program.trim().is_empty() || program.contains(char::is_whitespace) {
            return Err(StageError::ConfigError(format!(
                "[programs].{key} must be a single executable name (got '{program}')"
            )));
        }
    }
    Ok(())
}

fn validate_parts(cfg: &RawConfigFile) -> Result<()> {
    for (name, part) in cfg.part.iter() {
        ensure_dir_name("part", name)?;
        if part.fe_file.trim().is_empty() {
            return Err(StageError::ConfigError(format!(
                "part '{name}' has an empty fe_file"
            )));
        }
    }
    Ok(())
}

fn validate_events(cfg: &RawConfigFile) -> Result<()> {
    for name in cfg.event.keys() {
        ensure_dir_name("event", name)?;
        if name == MASTER_EVENT_DIR {
            return Err(StageError::ConfigError(format!(
                "event name '{MASTER_EVENT_DIR}' is reserved for the master event"
            )));
        }
    }
    Ok(())
}

/// Part and event names become directory names in the result hierarchy.
fn ensure_dir_name(what: &str, name: &str) -> Result<()> {
    let bad = name.is_empty()
        || name == "."
        || name == ".."
        || name.contains(['/', '\\', ':'])
        || name.contains(char::is_whitespace);
    if bad {
        return Err(StageError::ConfigError(format!(
            "{what} name '{name}' cannot be used as a directory name"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(toml_src: &str) -> RawConfigFile {
        toml::from_str(toml_src).unwrap()
    }

    #[test]
    fn minimal_config_gets_defaults() {
        let cfg = ConfigFile::try_from(raw(
            r#"
[part.bracket]
fe_file = "bracket.ftl"
"#,
        ))
        .unwrap();

        assert_eq!(cfg.config.max_concurrent_processes, 1);
        assert!(!cfg.config.batch);
        assert_eq!(cfg.config.results_dir, "results");
        assert_eq!(cfg.programs.reducer, "reducer");
        assert!(cfg.event.is_empty());
    }

    #[test]
    fn zero_concurrency_is_rejected() {
        let err = ConfigFile::try_from(raw(
            r#"
[config]
max_concurrent_processes = 0

[part.bracket]
fe_file = "bracket.ftl"
"#,
        ))
        .unwrap_err();

        assert!(
            matches!(err, StageError::ConfigError(msg) if msg.contains("max_concurrent_processes"))
        );
    }

    #[test]
    fn reserved_event_name_is_rejected() {
        let err = ConfigFile::try_from(raw(
            r#"
[part.bracket]
fe_file = "bracket.ftl"

[event.master]
"#,
        ))
        .unwrap_err();

        assert!(matches!(err, StageError::ConfigError(msg) if msg.contains("reserved")));
    }

    #[test]
    fn part_names_must_be_directory_safe() {
        let err = ConfigFile::try_from(raw(
            r#"
[part."a/b"]
fe_file = "x.ftl"
"#,
        ))
        .unwrap_err();

        assert!(matches!(err, StageError::ConfigError(msg) if msg.contains("directory name")));
    }

    #[test]
    fn program_with_spaces_is_rejected() {
        let err = ConfigFile::try_from(raw(
            r#"
[programs]
solver = "dyn solver"

[part.bracket]
fe_file = "bracket.ftl"
"#,
        ))
        .unwrap_err();

        assert!(matches!(err, StageError::ConfigError(msg) if msg.contains("[programs].solver")));
    }
}
