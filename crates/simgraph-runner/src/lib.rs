//! Builds the task graph for a directory of simulation experiments and runs it.
//!
//! Planning happens in two pure phases, [`discover`] then [`build_graph`],
//! after the [`ResourceBudget`] has been computed once for the host.

pub mod budget;
pub mod config;
pub mod discovery;
pub mod error;
pub mod exec;
pub mod graph;
pub mod platform;
pub mod provision;

pub use budget::{compute_budget, MemoryProbe, MemorySource, ProcMeminfo, ResourceBudget};
pub use config::{BuildConfig, ConfigOverrides, LauncherConfig, ProjectConfig};
pub use discovery::{discover, ExperimentDescriptor};
pub use error::{Error, Result};
pub use exec::{ExecOptions, ExecutionReport, Executor, TaskOutcome, TaskReport};
pub use graph::{build_graph, LaunchMode, LaunchTask, Task, TaskAction, TaskGraph};
pub use platform::{CommandSpec, HostInfo, Platform};
pub use provision::{setup_chain, ProvisionLayout, ProvisionStep};

/// The planned build for one invocation.
#[derive(Debug, Clone)]
pub struct Plan {
    pub budget: ResourceBudget,
    pub experiments: Vec<ExperimentDescriptor>,
    pub graph: TaskGraph,
}

pub fn resource_budget(config: &BuildConfig, probe: &dyn MemoryProbe) -> Result<ResourceBudget> {
    compute_budget(
        config.project.max_heap_mb,
        config.project.task_size_mb,
        config.host.is_linux,
        config.host.cpu_count,
        probe,
    )
}

/// Budget, discovery and synthesis. Fails before any task exists if the
/// configuration or the experiment set is unusable.
pub fn plan(config: &BuildConfig, probe: &dyn MemoryProbe) -> Result<Plan> {
    let budget = resource_budget(config, probe)?;
    let experiments = discover(&config.experiments_dir(), &config.project.extension)?;
    let graph = build_graph(&experiments, budget, &config.graph_settings())?;
    Ok(Plan {
        budget,
        experiments,
        graph,
    })
}
