// tests/config_loading.rs

use std::io::Write;
use std::path::Path;

use stagechain::config::load_and_validate;
use stagechain::errors::StageError;
use stagechain::task::Model;
use tempfile::NamedTempFile;

fn config_file(contents: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    write!(file, "{contents}").unwrap();
    file
}

#[test]
fn full_config_resolves_into_model() {
    let file = config_file(
        r#"
[config]
max_concurrent_processes = 3
batch = true
results_dir = "out"

[programs]
solver = "fedsolve"

[options]
stress = "-double"

[export]
curves_cmd = "curves.sh"

[part.arm]
fe_file = "parts/arm.ftl"
modes = 6
groups = ["welds", "bolts"]

[part.base]
fe_file = "parts/base.ftl"
locked = true

[event.storm]
description = "100 year storm"
solver_options = "-tstop = 20"
"#,
    );

    let cfg = load_and_validate(file.path()).unwrap();
    assert_eq!(cfg.config.max_concurrent_processes, 3);
    assert!(cfg.config.batch);
    assert_eq!(cfg.programs.solver, "fedsolve");
    assert_eq!(cfg.programs.reducer, "reducer");

    let model = Model::from_config(&cfg, Path::new("/work"));
    assert_eq!(model.layout.root(), Path::new("/work/out"));
    let arm = model.part("arm").unwrap();
    assert_eq!(arm.fe_file, Path::new("/work/parts/arm.ftl"));
    assert_eq!(arm.base_id, 1);
    assert_eq!(arm.groups, vec!["welds", "bolts"]);
    assert_eq!(
        model.unlocked_parts().map(|p| p.name.as_str()).collect::<Vec<_>>(),
        vec!["arm"]
    );
    assert_eq!(
        model.event("storm").unwrap().solver_options.as_deref(),
        Some("-tstop = 20")
    );
}

#[test]
fn config_without_parts_is_rejected() {
    let file = config_file("[config]\nmax_concurrent_processes = 2\n");
    match load_and_validate(file.path()) {
        Err(StageError::ConfigError(msg)) => assert!(msg.contains("[part.<name>]")),
        other => panic!("Expected ConfigError, got: {other:?}"),
    }
}

#[test]
fn zero_concurrency_is_rejected() {
    let file = config_file(
        r#"
[config]
max_concurrent_processes = 0

[part.arm]
fe_file = "arm.ftl"
"#,
    );
    assert!(matches!(
        load_and_validate(file.path()),
        Err(StageError::ConfigError(_))
    ));
}

#[test]
fn malformed_toml_returns_toml_error() {
    let file = config_file("[part.arm\nfe_file = ");
    assert!(matches!(
        load_and_validate(file.path()),
        Err(StageError::TomlError(_))
    ));
}

#[test]
fn missing_file_returns_io_error() {
    let dir = tempfile::tempdir().unwrap();
    let result = load_and_validate(dir.path().join("missing.toml"));
    assert!(matches!(result, Err(StageError::IoError(_))));
}

#[test]
fn unknown_part_and_event_lookups_fail() {
    let file = config_file("[part.arm]\nfe_file = \"arm.ftl\"\n");
    let cfg = load_and_validate(file.path()).unwrap();
    let model = Model::from_config(&cfg, Path::new("/work"));

    assert!(matches!(model.part("leg"), Err(StageError::UnknownPart(_))));
    assert!(matches!(model.event("storm"), Err(StageError::UnknownEvent(_))));
}
