use std::collections::{BTreeMap, HashSet};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use stagechain::exec::{ExitStatus, ProcessHandle, ProcessSpec};
use stagechain::task::{
    BoxedTask, DependencyCheck, ExecuteOutcome, Model, Task, TaskContext, TaskIdentity, TaskKind,
};

#[derive(Default)]
struct GraphState {
    completed: HashSet<String>,
    started: Vec<String>,
}

/// An acyclic dependency graph of named tasks, independent of any solver.
///
/// Each task finds its missing prerequisites by looking at which graph
/// nodes have completed successfully, so the scheduler discovers the graph
/// one hop at a time like it does for real solver stages.
#[derive(Clone, Default)]
pub struct TaskGraph {
    deps: Arc<BTreeMap<String, Vec<String>>>,
    state: Arc<Mutex<GraphState>>,
}

impl TaskGraph {
    /// `edges[i]` lists the prerequisites of node `i`.
    pub fn new(edges: Vec<(String, Vec<String>)>) -> Self {
        Self {
            deps: Arc::new(edges.into_iter().collect()),
            state: Arc::default(),
        }
    }

    pub fn task(&self, name: &str) -> BoxedTask {
        Box::new(GraphTask {
            name: name.to_string(),
            graph: self.clone(),
            handle: None,
        })
    }

    pub fn nodes(&self) -> Vec<String> {
        self.deps.keys().cloned().collect()
    }

    pub fn prerequisites(&self, name: &str) -> Vec<String> {
        self.deps.get(name).cloned().unwrap_or_default()
    }

    pub fn started(&self) -> Vec<String> {
        self.state.lock().unwrap().started.clone()
    }

    pub fn is_completed(&self, name: &str) -> bool {
        self.state.lock().unwrap().completed.contains(name)
    }

    pub fn signature_of(name: &str) -> String {
        format!("graph@{name}")
    }
}

#[derive(Debug)]
struct GraphTask {
    name: String,
    graph: TaskGraph,
    handle: Option<ProcessHandle>,
}

impl std::fmt::Debug for TaskGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskGraph").field("nodes", &self.deps.len()).finish()
    }
}

impl Task for GraphTask {
    fn identity(&self) -> TaskIdentity {
        TaskIdentity::new(TaskKind::Reduce, None, Some(self.name.clone()))
    }

    fn signature(&self, _model: &Model) -> String {
        TaskGraph::signature_of(&self.name)
    }

    fn check_dependencies(&self, _ctx: &TaskContext<'_>) -> DependencyCheck {
        let missing: Vec<BoxedTask> = self
            .graph
            .prerequisites(&self.name)
            .iter()
            .filter(|dep| !self.graph.is_completed(dep))
            .map(|dep| self.graph.task(dep))
            .collect();
        if missing.is_empty() {
            DependencyCheck::Ready
        } else {
            DependencyCheck::NeedsPrerequisites(missing)
        }
    }

    fn results_up_to_date(&self, _ctx: &TaskContext<'_>) -> bool {
        self.graph.is_completed(&self.name)
    }

    fn execute(&mut self, ctx: &mut TaskContext<'_>) -> ExecuteOutcome {
        if self.results_up_to_date(ctx) {
            return ExecuteOutcome::ResultsAlreadyOk;
        }
        if let Some(outcome) = self.check_dependencies(ctx).into_outcome() {
            return outcome;
        }

        let spec = ProcessSpec {
            program: "graph".to_string(),
            working_dir: PathBuf::from("/graph"),
            args: vec![self.name.clone()],
            signature: TaskGraph::signature_of(&self.name),
        };
        match ctx.launcher.launch(spec) {
            Ok(handle) => {
                self.graph.state.lock().unwrap().started.push(self.name.clone());
                let signature = handle.signature().to_string();
                self.handle = Some(handle);
                ExecuteOutcome::Started { signature }
            }
            Err(e) => ExecuteOutcome::NotExecutable(e.to_string()),
        }
    }

    fn kill(&mut self) {
        if let Some(handle) = self.handle.as_mut() {
            handle.kill();
        }
    }

    fn on_death(&mut self, status: ExitStatus, _ctx: &TaskContext<'_>) {
        self.handle = None;
        if status.success() {
            self.graph.state.lock().unwrap().completed.insert(self.name.clone());
        }
    }
}
