// tests/scenarios.rs

use stagechain::exec::ExitStatus;
use stagechain::fs::mock::MockFileSystem;
use stagechain::task::{
    BoxedTask, Model, RecoveryKind, RecoveryTask, ReduceTask, TaskIdentity, TaskKind,
};
use stagechain::types::RunMode;
use stagechain_test_utils::{
    ConfigFileBuilder, Harness, Observed, PartConfigBuilder, init_tracing, model_from,
    seed_fe_files,
};

fn model() -> (Model, MockFileSystem) {
    let cfg = ConfigFileBuilder::new()
        .with_part("arm", PartConfigBuilder::new("parts/arm.ftl").modes(4))
        .with_part("base", PartConfigBuilder::new("parts/base.ftl"))
        .with_event("storm")
        .curves_cmd("export_curves")
        .build();
    let model = model_from(&cfg);
    let fs = MockFileSystem::new();
    seed_fe_files(&fs, &model);
    (model, fs)
}

fn reduce(part: &str) -> BoxedTask {
    Box::new(ReduceTask::new(part.to_string()))
}

fn stress(event: Option<&str>, part: &str) -> BoxedTask {
    Box::new(RecoveryTask::new(
        RecoveryKind::Stress,
        event.map(str::to_string),
        part.to_string(),
        vec![],
    ))
}

fn identity(kind: TaskKind, event: Option<&str>, part: Option<&str>) -> TaskIdentity {
    TaskIdentity::new(kind, event.map(str::to_string), part.map(str::to_string))
}

/// Reduce every part so only the solve is missing.
fn reduced_harness(ceiling: usize, mode: RunMode) -> Harness {
    let (model, fs) = model();
    let mut h = Harness::new(model, fs, ceiling, mode);
    h.push(vec![reduce("arm"), reduce("base")]);
    h.run_to_idle(4);
    assert!(h.scheduler.is_idle());
    h
}

#[test]
fn recovery_pulls_in_solve_then_starts() {
    init_tracing();
    let mut h = reduced_harness(1, RunMode::Interactive);

    h.push(vec![stress(Some("storm"), "arm")]);
    let outstanding = h.outstanding();
    assert_eq!(outstanding.len(), 1);
    assert_eq!(outstanding[0].program, "dynsolver");
    assert_eq!(h.scheduler.stack_len(), 1);

    h.complete_next(ExitStatus::Exited(0));
    let outstanding = h.outstanding();
    assert_eq!(outstanding.len(), 1);
    assert_eq!(outstanding[0].program, "stress_rcy");

    h.complete_next(ExitStatus::Exited(0));
    assert!(h.scheduler.is_idle());
    assert_eq!(h.scheduler.running_count(), 0);

    let finished: Vec<TaskIdentity> = h
        .observer
        .events()
        .into_iter()
        .filter_map(|e| match e {
            Observed::Finished(id, _) => Some(id),
            _ => None,
        })
        .collect();
    assert_eq!(
        finished[2..],
        [
            identity(TaskKind::DynamicSolve, Some("storm"), None),
            identity(TaskKind::StressRecovery, Some("storm"), Some("arm")),
        ]
    );
}

#[test]
fn ceiling_of_one_keeps_second_task_on_stack() {
    init_tracing();
    let (model, fs) = model();
    let mut h = Harness::new(model, fs, 1, RunMode::Interactive);

    h.push(vec![reduce("arm"), reduce("base")]);
    assert_eq!(h.scheduler.running_count(), 1);
    assert_eq!(h.scheduler.stack_len(), 1);
    assert!(h.outstanding()[0].working_dir.ends_with("parts/arm"));

    h.complete_next(ExitStatus::Exited(0));
    assert_eq!(h.scheduler.running_count(), 1);
    assert_eq!(h.scheduler.stack_len(), 0);
    assert!(h.outstanding()[0].working_dir.ends_with("parts/base"));
}

#[test]
fn unattended_not_executable_kills_everything_and_exits_nonzero() {
    init_tracing();
    let cfg = ConfigFileBuilder::new()
        .with_part("arm", PartConfigBuilder::new("parts/arm.ftl"))
        .with_part("base", PartConfigBuilder::new("parts/base.ftl").locked())
        .with_part("tip", PartConfigBuilder::new("parts/tip.ftl"))
        .curves_cmd("export_curves")
        .build();
    let model = model_from(&cfg);
    let fs = MockFileSystem::new();
    seed_fe_files(&fs, &model);
    let mut h = Harness::new(model, fs, 2, RunMode::Unattended);

    h.push(vec![reduce("arm"), reduce("base"), reduce("tip")]);

    let arm = h.log.signatures()[0].clone();
    assert_eq!(h.log.signatures().len(), 1, "tip must not be started");
    assert!(h.log.kill_requested(&arm));
    assert_eq!(h.scheduler.stack_len(), 0);
    assert!(h.exit_request().is_none(), "exit waits for running processes");

    h.complete_next(ExitStatus::Killed);
    let exit = h.exit_request().expect("batch exit");
    assert_eq!(exit.status, 1);
    assert!(exit.exports.is_empty());
}

#[test]
fn identical_push_before_start_is_discarded() {
    init_tracing();
    let (model, fs) = model();
    let mut h = Harness::new(model, fs, 1, RunMode::Interactive);

    h.push(vec![reduce("arm")]);
    h.push(vec![reduce("base")]);
    h.push(vec![reduce("base")]);
    assert_eq!(h.scheduler.stack_len(), 1);

    h.run_to_idle(4);
    let base_runs = h
        .log
        .signatures()
        .iter()
        .filter(|s| s.ends_with("parts/base"))
        .count();
    assert_eq!(base_runs, 1);
}

#[test]
fn successful_batch_requests_exports() {
    init_tracing();
    let (model, fs) = model();
    let mut h = Harness::new(model, fs, 2, RunMode::Unattended);

    h.push(vec![stress(None, "arm")]);
    h.run_to_idle(8);

    assert_eq!(
        h.launched_programs(),
        vec!["reducer", "reducer", "dynsolver", "stress_rcy"]
    );
    let exit = h.exit_request().expect("batch exit");
    assert_eq!(exit.status, 0);
    assert_eq!(exit.exports.len(), 1);
    assert_eq!(exit.exports[0].command(), "export_curves");
    assert!(h.max_running() <= 2);
}
