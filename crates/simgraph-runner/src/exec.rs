//! Runs the dependency closure of requested tasks as external processes.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::thread;

use serde::Serialize;

use crate::config::LauncherConfig;
use crate::error::{Error, Result};
use crate::graph::{Task, TaskAction, TaskGraph};
use crate::platform::{normalize_path, CommandSpec};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecOptions {
    /// Upper bound on processes running at the same time.
    pub jobs: usize,
    pub dry_run: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TaskOutcome {
    Succeeded,
    DryRun,
    Failed { message: String },
    Skipped { blocked_by: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskReport {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(flatten)]
    pub outcome: TaskOutcome,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ExecutionReport {
    pub tasks: Vec<TaskReport>,
}

impl ExecutionReport {
    pub fn is_success(&self) -> bool {
        self.tasks.iter().all(|t| {
            matches!(t.outcome, TaskOutcome::Succeeded | TaskOutcome::DryRun)
        })
    }

    pub fn failed(&self) -> impl Iterator<Item = &TaskReport> {
        self.tasks
            .iter()
            .filter(|t| matches!(t.outcome, TaskOutcome::Failed { .. }))
    }

    pub fn get(&self, name: &str) -> Option<&TaskReport> {
        self.tasks.iter().find(|t| t.name == name)
    }
}

pub struct Executor<'a> {
    project_root: &'a Path,
    launcher: &'a LauncherConfig,
    options: ExecOptions,
}

impl<'a> Executor<'a> {
    pub fn new(project_root: &'a Path, launcher: &'a LauncherConfig, options: ExecOptions) -> Self {
        Self {
            project_root,
            launcher,
            options,
        }
    }

    /// Runs every task needed by `targets` once. A failed task blocks its
    /// dependents; unrelated tasks keep going.
    pub fn run(&self, graph: &TaskGraph, targets: &[String]) -> Result<ExecutionReport> {
        let levels = graph.execution_levels(targets)?;
        let jobs = self.options.jobs.max(1);
        let mut report = ExecutionReport::default();
        let mut broken: HashMap<String, String> = HashMap::new();

        for level in levels {
            let mut runnable: Vec<&Task> = Vec::new();
            for task in level {
                let blocker = task
                    .depends_on
                    .iter()
                    .find(|dep| broken.contains_key(dep.as_str()));
                match blocker {
                    Some(dep) => {
                        let root_cause = broken[dep.as_str()].clone();
                        tracing::warn!(task = %task.name, blocked_by = %root_cause, "skipping task");
                        broken.insert(task.name.clone(), root_cause.clone());
                        report.tasks.push(TaskReport {
                            name: task.name.clone(),
                            command: None,
                            outcome: TaskOutcome::Skipped {
                                blocked_by: root_cause,
                            },
                        });
                    }
                    None => runnable.push(task),
                }
            }

            for result in self.run_level(&runnable, jobs) {
                if let TaskOutcome::Failed { .. } = result.outcome {
                    broken.insert(result.name.clone(), result.name.clone());
                }
                report.tasks.push(result);
            }
        }
        Ok(report)
    }

    /// Up to `jobs` workers pull tasks from a shared cursor, so a free slot is
    /// refilled as soon as any task finishes. Reports keep `runnable` order.
    fn run_level(&self, runnable: &[&Task], jobs: usize) -> Vec<TaskReport> {
        let next = AtomicUsize::new(0);
        let slots: Vec<Mutex<Option<TaskReport>>> =
            runnable.iter().map(|_| Mutex::new(None)).collect();
        thread::scope(|scope| {
            let workers: Vec<_> = (0..jobs.min(runnable.len()))
                .map(|_| {
                    scope.spawn(|| loop {
                        let idx = next.fetch_add(1, Ordering::SeqCst);
                        let Some(task) = runnable.get(idx) else {
                            break;
                        };
                        let result = self.run_task(task);
                        if let Ok(mut slot) = slots[idx].lock() {
                            *slot = Some(result);
                        }
                    })
                })
                .collect();
            for worker in workers {
                // a panicked worker leaves its slot empty; reported below
                let _ = worker.join();
            }
        });
        slots
            .into_iter()
            .zip(runnable)
            .map(|(slot, task)| {
                slot.into_inner()
                    .unwrap_or_else(|poisoned| poisoned.into_inner())
                    .unwrap_or_else(|| TaskReport {
                        name: task.name.clone(),
                        command: None,
                        outcome: TaskOutcome::Failed {
                            message: "task runner panicked".to_string(),
                        },
                    })
            })
            .collect()
    }

    fn run_task(&self, task: &Task) -> TaskReport {
        let command = self.command_for(task);
        let rendered = command.as_ref().map(CommandSpec::display);
        let outcome = if self.options.dry_run {
            TaskOutcome::DryRun
        } else {
            tracing::info!(task = %task.name, "starting");
            match self.execute(task, command.as_ref()) {
                Ok(()) => {
                    tracing::info!(task = %task.name, "finished");
                    TaskOutcome::Succeeded
                }
                Err(e) => {
                    tracing::warn!(task = %task.name, error = %e, "failed");
                    TaskOutcome::Failed {
                        message: e.to_string(),
                    }
                }
            }
        };
        TaskReport {
            name: task.name.clone(),
            command: rendered,
            outcome,
        }
    }

    fn command_for(&self, task: &Task) -> Option<CommandSpec> {
        match &task.action {
            TaskAction::Provision(p) => Some(p.command.clone()),
            TaskAction::Launch(l) => Some(l.command(self.launcher)),
            TaskAction::Aggregate(_) => None,
        }
    }

    fn execute(&self, task: &Task, command: Option<&CommandSpec>) -> Result<()> {
        match &task.action {
            TaskAction::Provision(_) => {
                if let Some(cmd) = command {
                    self.spawn(cmd).map_err(|message| Error::Provisioning {
                        task: task.name.clone(),
                        message,
                    })?;
                }
            }
            TaskAction::Launch(launch) => {
                for dir in &launch.ensure_dirs {
                    // create_dir_all tolerates concurrent creation by sibling tasks
                    fs::create_dir_all(self.project_root.join(dir))?;
                }
                if let Some(cmd) = command {
                    self.spawn(cmd).map_err(|message| Error::Execution {
                        task: task.name.clone(),
                        message,
                    })?;
                }
            }
            TaskAction::Aggregate(_) => {}
        }
        Ok(())
    }

    fn spawn(&self, spec: &CommandSpec) -> std::result::Result<(), String> {
        let cwd = match &spec.working_dir {
            Some(dir) => self.project_root.join(dir),
            None => self.project_root.to_path_buf(),
        };
        let program = resolve_program(&spec.program, &cwd);
        let status = Command::new(&program)
            .args(&spec.args)
            .current_dir(&cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .status()
            .map_err(|e| format!("cannot start {}: {}", program.display(), e))?;
        if status.success() {
            return Ok(());
        }
        Err(match status.code() {
            Some(code) => format!("{} exited with status {}", spec.program, code),
            None => format!("{} terminated by signal", spec.program),
        })
    }
}

/// Path-like relative programs are resolved against the command's working directory.
fn resolve_program(program: &str, cwd: &Path) -> PathBuf {
    let p = Path::new(program);
    if p.is_relative() && (program.contains('/') || program.contains('\\')) {
        normalize_path(&cwd.join(p))
    } else {
        p.to_path_buf()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{AggregateTarget, LaunchMode, LaunchTask, TASK_GROUP};
    use crate::provision::{ProvisionStep, ProvisioningTask};

    fn provision(name: &str, deps: &[&str], program: &str, args: &[&str]) -> Task {
        Task {
            name: name.to_string(),
            group: TASK_GROUP.to_string(),
            description: String::new(),
            depends_on: deps.iter().map(|d| d.to_string()).collect(),
            action: TaskAction::Provision(ProvisioningTask {
                step: ProvisionStep::CreateVirtualEnv,
                command: CommandSpec::new(program, args.iter().copied()),
            }),
        }
    }

    fn launch(name: &str, deps: &[&str], ensure_dirs: Vec<PathBuf>) -> Task {
        Task {
            name: name.to_string(),
            group: TASK_GROUP.to_string(),
            description: String::new(),
            depends_on: deps.iter().map(|d| d.to_string()).collect(),
            action: TaskAction::Launch(LaunchTask {
                experiment: name.to_string(),
                mode: LaunchMode::Batch,
                jvm_args: Vec::new(),
                args: vec!["run".to_string(), format!("{}.yml", name)],
                heap_mb: Some(64),
                ensure_dirs,
            }),
        }
    }

    fn aggregate(name: &str, members: &[&str]) -> Task {
        let members: Vec<String> = members.iter().map(|m| m.to_string()).collect();
        Task {
            name: name.to_string(),
            group: TASK_GROUP.to_string(),
            description: String::new(),
            depends_on: members.clone(),
            action: TaskAction::Aggregate(AggregateTarget {
                mode: LaunchMode::Batch,
                members,
            }),
        }
    }

    fn launcher(program: &str) -> LauncherConfig {
        LauncherConfig {
            program: program.to_string(),
            args: Vec::new(),
            heap_flag_prefix: "-Xmx".to_string(),
        }
    }

    #[test]
    fn dry_run_renders_commands_without_spawning() {
        let root = tempfile::tempdir().expect("tempdir");
        let mut graph = TaskGraph::new();
        graph
            .register(provision("setup", &[], "does-not-exist", &["x"]))
            .expect("register");
        graph
            .register(launch("exp", &["setup"], vec![PathBuf::from("data")]))
            .expect("register");
        let launcher = launcher("java");
        let exec = Executor::new(
            root.path(),
            &launcher,
            ExecOptions {
                jobs: 2,
                dry_run: true,
            },
        );
        let report = exec.run(&graph, &["exp".to_string()]).expect("run");
        assert!(report.is_success());
        assert_eq!(
            report.get("exp").and_then(|t| t.command.clone()),
            Some("java -Xmx64m run exp.yml".to_string())
        );
        assert!(!root.path().join("data").exists());
    }

    #[cfg(unix)]
    #[test]
    fn successful_chain_runs_each_task_once() {
        let root = tempfile::tempdir().expect("tempdir");
        let mut graph = TaskGraph::new();
        graph
            .register(provision("setup", &[], "sh", &["-c", "echo x >> setup.log"]))
            .expect("register");
        graph
            .register(launch("a", &["setup"], vec![PathBuf::from("data")]))
            .expect("register");
        graph
            .register(launch("b", &["setup"], vec![PathBuf::from("data")]))
            .expect("register");
        graph.register(aggregate("all", &["a", "b"])).expect("register");

        let launcher = launcher("true");
        let exec = Executor::new(
            root.path(),
            &launcher,
            ExecOptions {
                jobs: 4,
                dry_run: false,
            },
        );
        let report = exec
            .run(&graph, &["all".to_string(), "a".to_string()])
            .expect("run");
        assert!(report.is_success(), "report: {:?}", report);
        assert_eq!(report.tasks.len(), 4);
        let log = fs::read_to_string(root.path().join("setup.log")).expect("log");
        assert_eq!(log.lines().count(), 1);
        assert!(root.path().join("data").is_dir());
    }

    #[cfg(unix)]
    #[test]
    fn provisioning_failure_blocks_dependents_only() {
        let root = tempfile::tempdir().expect("tempdir");
        let mut graph = TaskGraph::new();
        graph
            .register(provision("setup", &[], "false", &[]))
            .expect("register");
        graph.register(launch("graphic", &[], Vec::new())).expect("register");
        graph.register(launch("batch", &["setup"], Vec::new())).expect("register");
        graph
            .register(aggregate("all", &["graphic", "batch"]))
            .expect("register");

        let launcher = launcher("true");
        let exec = Executor::new(
            root.path(),
            &launcher,
            ExecOptions {
                jobs: 1,
                dry_run: false,
            },
        );
        let report = exec.run(&graph, &["all".to_string()]).expect("run");
        assert!(!report.is_success());
        assert!(matches!(
            report.get("setup").map(|t| &t.outcome),
            Some(TaskOutcome::Failed { message }) if message.contains("provisioning step 'setup'")
        ));
        assert_eq!(
            report.get("graphic").map(|t| &t.outcome),
            Some(&TaskOutcome::Succeeded)
        );
        assert_eq!(
            report.get("batch").map(|t| &t.outcome),
            Some(&TaskOutcome::Skipped {
                blocked_by: "setup".to_string()
            })
        );
        assert_eq!(
            report.get("all").map(|t| &t.outcome),
            Some(&TaskOutcome::Skipped {
                blocked_by: "setup".to_string()
            })
        );
        assert_eq!(report.failed().count(), 1);
    }

    #[cfg(unix)]
    #[test]
    fn launch_failure_does_not_abort_siblings() {
        let root = tempfile::tempdir().expect("tempdir");
        let mut graph = TaskGraph::new();
        graph.register(launch("a", &[], Vec::new())).expect("register");
        graph.register(launch("b", &[], Vec::new())).expect("register");

        let launcher = launcher("false");
        let exec = Executor::new(
            root.path(),
            &launcher,
            ExecOptions {
                jobs: 2,
                dry_run: false,
            },
        );
        let report = exec
            .run(&graph, &["a".to_string(), "b".to_string()])
            .expect("run");
        assert_eq!(report.failed().count(), 2);
    }

    #[cfg(unix)]
    #[test]
    fn free_slot_is_refilled_before_slow_task_ends() {
        let root = tempfile::tempdir().expect("tempdir");
        let mut graph = TaskGraph::new();
        graph
            .register(provision(
                "slow",
                &[],
                "sh",
                &["-c", "sleep 1 && echo slow >> order.log"],
            ))
            .expect("register");
        graph
            .register(provision("quick", &[], "sh", &["-c", "echo quick >> order.log"]))
            .expect("register");
        graph
            .register(provision(
                "queued",
                &[],
                "sh",
                &["-c", "sleep 0.2 && echo queued >> order.log"],
            ))
            .expect("register");

        let launcher = launcher("true");
        let exec = Executor::new(
            root.path(),
            &launcher,
            ExecOptions {
                jobs: 2,
                dry_run: false,
            },
        );
        let targets: Vec<String> = ["slow", "quick", "queued"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let report = exec.run(&graph, &targets).expect("run");
        assert!(report.is_success(), "report: {:?}", report);
        let names: Vec<_> = report.tasks.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["slow", "quick", "queued"]);

        let log = fs::read_to_string(root.path().join("order.log")).expect("log");
        let order: Vec<_> = log.lines().collect();
        assert_eq!(order, vec!["quick", "queued", "slow"]);
    }

    #[test]
    fn unknown_target_fails_before_running_anything() {
        let root = tempfile::tempdir().expect("tempdir");
        let graph = TaskGraph::new();
        let launcher = launcher("true");
        let exec = Executor::new(
            root.path(),
            &launcher,
            ExecOptions {
                jobs: 1,
                dry_run: false,
            },
        );
        assert!(matches!(
            exec.run(&graph, &["missing".to_string()]),
            Err(Error::UnknownTask(_))
        ));
    }

    #[test]
    fn relative_tool_paths_resolve_against_working_dir() {
        let cwd = Path::new("/project/python");
        assert_eq!(
            resolve_program("../env/bin/python3", cwd),
            PathBuf::from("/project/env/bin/python3")
        );
        assert_eq!(resolve_program("java", cwd), PathBuf::from("java"));
    }
}
