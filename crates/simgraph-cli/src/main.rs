use anyhow::Result;
use clap::{Parser, Subcommand};
use serde_json::{json, Value};
use simgraph_runner::{
    BuildConfig, ConfigOverrides, ExecOptions, Executor, Plan, ProcMeminfo, TaskOutcome,
};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "simgraph",
    version = "0.3.0",
    about = "Discover simulation experiments and run their task graph"
)]
struct Cli {
    /// Project root containing the experiments directory and simgraph.yaml
    #[arg(long, global = true, default_value = ".")]
    project_dir: PathBuf,
    /// Memory in MB available to batch runs, skipping detection
    #[arg(long, global = true)]
    max_heap: Option<u64>,
    /// Memory in MB assumed per concurrent batch run
    #[arg(long, global = true)]
    task_size: Option<u64>,
    /// Force reduced-scope CI behaviour regardless of the CI variable
    #[arg(long, global = true)]
    ci: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the memory and parallelism budget for this host
    Budget {
        #[arg(long)]
        json: bool,
    },
    /// List every registered task
    Tasks {
        /// Also show each task's dependencies
        #[arg(long)]
        deps: bool,
        #[arg(long)]
        json: bool,
    },
    /// Run tasks and everything they depend on
    Run {
        #[arg(required = true)]
        tasks: Vec<String>,
        /// Maximum concurrent processes (defaults to the budget's parallelism)
        #[arg(long)]
        jobs: Option<usize>,
        #[arg(long)]
        dry_run: bool,
        #[arg(long)]
        json: bool,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let json_mode = command_json_mode(&cli.command);
    let result = run_command(cli);
    match result {
        Ok(Outcome { payload, success }) => {
            if let Some(payload) = payload {
                emit_json(&payload);
            }
            if !success {
                std::process::exit(1);
            }
            Ok(())
        }
        Err(err) => {
            if json_mode {
                emit_json(&json_error("command_failed", err.to_string(), json!({})));
                std::process::exit(1);
            }
            Err(err)
        }
    }
}

struct Outcome {
    payload: Option<Value>,
    success: bool,
}

impl Outcome {
    fn done(payload: Option<Value>) -> Self {
        Self {
            payload,
            success: true,
        }
    }
}

fn load_config(cli: &Cli) -> Result<BuildConfig> {
    let root = cli
        .project_dir
        .canonicalize()
        .unwrap_or_else(|_| cli.project_dir.clone());
    let overrides = ConfigOverrides {
        max_heap_mb: cli.max_heap,
        task_size_mb: cli.task_size,
        ci: if cli.ci { Some(true) } else { None },
    };
    Ok(BuildConfig::resolve(&root, overrides)?)
}

fn run_command(cli: Cli) -> Result<Outcome> {
    let config = load_config(&cli)?;
    let probe = ProcMeminfo::default();
    match cli.command {
        Commands::Budget { json } => {
            let budget = simgraph_runner::resource_budget(&config, &probe)?;
            if json {
                return Ok(Outcome::done(Some(json!({
                    "ok": true,
                    "command": "budget",
                    "budget": budget,
                    "batch_heap_mb": budget.batch_heap_mb(),
                    "ci": config.ci,
                }))));
            }
            println!("available_memory_mb: {}", budget.available_memory_mb);
            println!("memory_source: {}", budget.source.as_str());
            println!("task_size_mb: {}", budget.task_size_mb);
            println!("cpu_count: {}", budget.cpu_count);
            println!("parallelism: {}", budget.parallelism);
            println!("batch_heap_mb: {}", budget.batch_heap_mb());
            println!("ci: {}", config.ci);
        }
        Commands::Tasks { deps, json } => {
            let plan = simgraph_runner::plan(&config, &probe)?;
            if json {
                return Ok(Outcome::done(Some(json!({
                    "ok": true,
                    "command": "tasks",
                    "experiments": plan.experiments,
                    "tasks": plan.graph,
                }))));
            }
            print_tasks(&plan, deps);
        }
        Commands::Run {
            tasks,
            jobs,
            dry_run,
            json,
        } => {
            let plan = simgraph_runner::plan(&config, &probe)?;
            let options = ExecOptions {
                jobs: jobs.unwrap_or(plan.budget.parallelism as usize),
                dry_run,
            };
            let executor = Executor::new(&config.project_root, &config.project.launcher, options);
            let report = executor.run(&plan.graph, &tasks)?;
            let success = report.is_success();
            if json {
                return Ok(Outcome {
                    payload: Some(json!({
                        "ok": success,
                        "command": "run",
                        "dry_run": dry_run,
                        "jobs": options.jobs,
                        "report": report,
                    })),
                    success,
                });
            }
            for task in &report.tasks {
                match &task.outcome {
                    TaskOutcome::DryRun => match &task.command {
                        Some(cmd) => println!("{}: {}", task.name, cmd),
                        None => println!("{}", task.name),
                    },
                    TaskOutcome::Succeeded => println!("{}: ok", task.name),
                    TaskOutcome::Failed { message } => println!("{}: FAILED ({})", task.name, message),
                    TaskOutcome::Skipped { blocked_by } => {
                        println!("{}: skipped (blocked by {})", task.name, blocked_by)
                    }
                }
            }
            return Ok(Outcome {
                payload: None,
                success,
            });
        }
    }
    Ok(Outcome::done(None))
}

fn emit_json(value: &Value) {
    match serde_json::to_string(value) {
        Ok(s) => println!("{}", s),
        Err(_) => println!(
            "{{\"ok\":false,\"error\":{{\"code\":\"serialization_error\",\"message\":\"failed to serialize JSON payload\",\"details\":{{}}}}}}"
        ),
    }
}

fn json_error(code: &str, message: String, details: Value) -> Value {
    json!({
        "ok": false,
        "error": {
            "code": code,
            "message": message,
            "details": details
        }
    })
}

fn command_json_mode(command: &Commands) -> bool {
    match command {
        Commands::Budget { json }
        | Commands::Tasks { json, .. }
        | Commands::Run { json, .. } => *json,
    }
}

fn print_tasks(plan: &Plan, deps: bool) {
    let mut current_group: Option<&str> = None;
    for task in plan.graph.tasks() {
        if current_group != Some(task.group.as_str()) {
            println!("{} tasks", task.group);
            println!("{}", "-".repeat(task.group.len() + 6));
            current_group = Some(task.group.as_str());
        }
        println!("{} - {}", task.name, task.description);
        if deps && !task.depends_on.is_empty() {
            println!("    depends on: {}", task.depends_on.join(", "));
        }
    }
    println!();
    println!("experiments: {}", plan.experiments.len());
    println!(
        "budget: {}MB available ({}), parallelism {}",
        plan.budget.available_memory_mb,
        plan.budget.source.as_str(),
        plan.budget.parallelism
    );
}
