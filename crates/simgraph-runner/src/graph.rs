//! Task graph synthesis: provisioning chain, per-experiment launches and aggregates.

use std::collections::{BTreeSet, HashMap};
use std::path::PathBuf;

use serde::Serialize;

use crate::budget::ResourceBudget;
use crate::config::LauncherConfig;
use crate::discovery::ExperimentDescriptor;
use crate::error::{Error, Result};
use crate::platform::{CommandSpec, Platform};
use crate::provision::{setup_chain, ProvisionLayout, ProvisionStep, ProvisioningTask};

pub const TASK_GROUP: &str = "Run experiments";

/// Capitalized name taken by the aggregates (`runAllGraphic`, `runAllBatch`).
pub const AGGREGATE_STEM: &str = "All";

/// Simulated time after which CI launches are terminated.
pub const CI_TERMINATION_TIME: u64 = 5;

const VERBOSITY: &str = "error";
const DISABLE_OPENGL: &str = "-Dsun.java2d.opengl=false";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LaunchMode {
    Graphic,
    Batch,
}

impl LaunchMode {
    pub fn suffix(&self) -> &'static str {
        match self {
            LaunchMode::Graphic => "Graphic",
            LaunchMode::Batch => "Batch",
        }
    }

    pub fn aggregate_name(&self) -> String {
        self.task_name(AGGREGATE_STEM)
    }

    pub fn task_name(&self, capitalized: &str) -> String {
        format!("run{}{}", capitalized, self.suffix())
    }
}

/// One launch of the external simulator for one experiment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LaunchTask {
    pub experiment: String,
    pub mode: LaunchMode,
    pub jvm_args: Vec<String>,
    pub args: Vec<String>,
    pub heap_mb: Option<u64>,
    /// Directories created (idempotently) before the process starts.
    pub ensure_dirs: Vec<PathBuf>,
}

impl LaunchTask {
    pub fn command(&self, launcher: &LauncherConfig) -> CommandSpec {
        let mut args = self.jvm_args.clone();
        if let Some(heap) = self.heap_mb {
            args.push(format!("{}{}m", launcher.heap_flag_prefix, heap));
        }
        args.extend(launcher.args.iter().cloned());
        args.extend(self.args.iter().cloned());
        CommandSpec {
            program: launcher.program.clone(),
            args,
            working_dir: None,
        }
    }
}

/// Roll-up target; membership only, the member tasks live in the graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AggregateTarget {
    pub mode: LaunchMode,
    pub members: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TaskAction {
    Provision(ProvisioningTask),
    Launch(LaunchTask),
    Aggregate(AggregateTarget),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Task {
    pub name: String,
    pub group: String,
    pub description: String,
    pub depends_on: Vec<String>,
    pub action: TaskAction,
}

/// Inputs to synthesis besides the experiments and the budget.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GraphSettings {
    pub ci: bool,
    pub platform: Platform,
    pub layout: ProvisionLayout,
    pub effects_dir: String,
    pub data_dir: PathBuf,
}

/// Tasks in registration order. A task may only depend on tasks registered
/// before it, so registration order is always a valid execution order.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TaskGraph {
    tasks: Vec<Task>,
    #[serde(skip)]
    index: HashMap<String, usize>,
}

impl TaskGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, task: Task) -> Result<()> {
        if self.index.contains_key(&task.name) {
            return Err(Error::DuplicateTask(task.name));
        }
        if let Some(missing) = task
            .depends_on
            .iter()
            .find(|dep| !self.index.contains_key(dep.as_str()))
        {
            return Err(Error::MissingDependency {
                task: task.name.clone(),
                dependency: missing.clone(),
            });
        }
        self.index.insert(task.name.clone(), self.tasks.len());
        self.tasks.push(task);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&Task> {
        self.index.get(name).map(|&i| &self.tasks[i])
    }

    pub fn tasks(&self) -> &[Task] {
        &self.tasks
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Every task needed to run `targets`, each exactly once, grouped into
    /// levels: a task's dependencies all sit in earlier levels.
    pub fn execution_levels(&self, targets: &[String]) -> Result<Vec<Vec<&Task>>> {
        let mut needed: BTreeSet<usize> = BTreeSet::new();
        let mut stack = Vec::new();
        for target in targets {
            let idx = *self
                .index
                .get(target)
                .ok_or_else(|| Error::UnknownTask(target.clone()))?;
            stack.push(idx);
        }
        while let Some(idx) = stack.pop() {
            if !needed.insert(idx) {
                continue;
            }
            for dep in &self.tasks[idx].depends_on {
                stack.push(self.index[dep.as_str()]);
            }
        }

        let mut depth: HashMap<usize, usize> = HashMap::new();
        let mut levels: Vec<Vec<&Task>> = Vec::new();
        // ascending index order visits dependencies first
        for idx in needed {
            let task = &self.tasks[idx];
            let level = task
                .depends_on
                .iter()
                .map(|dep| depth[&self.index[dep.as_str()]] + 1)
                .max()
                .unwrap_or(0);
            depth.insert(idx, level);
            if levels.len() <= level {
                levels.resize_with(level + 1, Vec::new);
            }
            levels[level].push(task);
        }
        Ok(levels)
    }
}

fn provisioning_task(task: ProvisioningTask) -> Task {
    Task {
        name: task.step.task_name().to_string(),
        group: TASK_GROUP.to_string(),
        description: task.step.description().to_string(),
        depends_on: task
            .step
            .predecessors()
            .iter()
            .map(|p| p.task_name().to_string())
            .collect(),
        action: TaskAction::Provision(task),
    }
}

fn run_args(experiment: &ExperimentDescriptor) -> Vec<String> {
    vec![
        "run".to_string(),
        experiment.definition_path.to_string_lossy().to_string(),
    ]
}

fn termination_override() -> [String; 2] {
    [
        "--override".to_string(),
        format!(
            "terminate: {{ type: AfterTime, parameters: [{}] }}",
            CI_TERMINATION_TIME
        ),
    ]
}

fn graphic_task(experiment: &ExperimentDescriptor, settings: &GraphSettings) -> Task {
    let mut args = run_args(experiment);
    args.push("--override".to_string());
    args.push(format!(
        "monitors: {{ type: SwingGUI, parameters: {{ graphics: {}/{}.json }} }}",
        settings.effects_dir, experiment.name
    ));
    args.push("--verbosity".to_string());
    args.push(VERBOSITY.to_string());
    if settings.ci {
        args.extend(termination_override());
    }
    Task {
        name: LaunchMode::Graphic.task_name(&experiment.capitalized_name()),
        group: TASK_GROUP.to_string(),
        description: format!("Launches graphic simulation {}", experiment.name),
        depends_on: Vec::new(),
        action: TaskAction::Launch(LaunchTask {
            experiment: experiment.name.clone(),
            mode: LaunchMode::Graphic,
            jvm_args: vec![DISABLE_OPENGL.to_string()],
            args,
            heap_mb: None,
            ensure_dirs: Vec::new(),
        }),
    }
}

fn batch_task(
    experiment: &ExperimentDescriptor,
    budget: ResourceBudget,
    settings: &GraphSettings,
) -> Task {
    let capitalized = experiment.capitalized_name();
    let mut args = run_args(experiment);
    args.push("--verbosity".to_string());
    args.push(VERBOSITY.to_string());
    let (depends_on, heap_mb, ensure_dirs) = if settings.ci {
        args.extend(termination_override());
        (Vec::new(), None, Vec::new())
    } else {
        (
            vec![ProvisionStep::LAST.task_name().to_string()],
            Some(budget.batch_heap_mb()),
            vec![settings.data_dir.clone()],
        )
    };
    Task {
        name: LaunchMode::Batch.task_name(&capitalized),
        group: TASK_GROUP.to_string(),
        description: format!("Launches batch experiments for {}", capitalized),
        depends_on,
        action: TaskAction::Launch(LaunchTask {
            experiment: experiment.name.clone(),
            mode: LaunchMode::Batch,
            jvm_args: Vec::new(),
            args,
            heap_mb,
            ensure_dirs,
        }),
    }
}

fn aggregate_task(mode: LaunchMode, members: Vec<String>) -> Task {
    let description = match mode {
        LaunchMode::Graphic => "Launches all simulations with the graphic subsystem enabled",
        LaunchMode::Batch => "Launches all experiments",
    };
    Task {
        name: mode.aggregate_name(),
        group: TASK_GROUP.to_string(),
        description: description.to_string(),
        depends_on: members.clone(),
        action: TaskAction::Aggregate(AggregateTarget { mode, members }),
    }
}

/// Maps discovered experiments to the full task graph. Pure: the same inputs
/// always produce the same graph.
pub fn build_graph(
    experiments: &[ExperimentDescriptor],
    budget: ResourceBudget,
    settings: &GraphSettings,
) -> Result<TaskGraph> {
    let mut graph = TaskGraph::new();
    for task in setup_chain(settings.platform, &settings.layout) {
        graph.register(provisioning_task(task))?;
    }

    let mut graphic = Vec::with_capacity(experiments.len());
    let mut batch = Vec::with_capacity(experiments.len());
    for experiment in experiments {
        let g = graphic_task(experiment, settings);
        graphic.push(g.name.clone());
        graph.register(g)?;

        let b = batch_task(experiment, budget, settings);
        batch.push(b.name.clone());
        graph.register(b)?;
    }

    graph.register(aggregate_task(LaunchMode::Graphic, graphic))?;
    graph.register(aggregate_task(LaunchMode::Batch, batch))?;
    tracing::debug!(
        experiments = experiments.len(),
        tasks = graph.len(),
        ci = settings.ci,
        "task graph synthesized"
    );
    Ok(graph)
}
