//! tessera - run a pipeline of dependent shell commands.
//!
//! Usage:
//!   tessera run <pipeline.yaml>       Run every task and print the results
//!   tessera validate <pipeline.yaml>  Check the pipeline file without running
//!   tessera list <pipeline.yaml>      List the tasks and their dependencies

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tessera::config::PipelineBuilder;
use tessera::{Event, EventBus, EventHandler, Progress, RetryPolicy, load_pipeline};
use tracing::{error, info, warn};

/// tessera - run a graph of dependent shell commands
#[derive(Parser)]
#[command(name = "tessera")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run every task of a pipeline
    Run {
        /// Path to the pipeline YAML file
        #[arg(value_name = "PIPELINE")]
        pipeline: PathBuf,

        /// Maximum concurrent tasks (default: from the pipeline, else 4)
        #[arg(short = 'j', long)]
        max_concurrency: Option<usize>,

        /// Give up on a task after this many attempts (default: retry forever)
        #[arg(long)]
        max_attempts: Option<u32>,

        /// Abort the whole run after this many seconds
        #[arg(long, value_name = "SECS")]
        timeout: Option<u64>,
    },

    /// Validate a pipeline file without running it
    Validate {
        /// Path to the pipeline YAML file
        #[arg(value_name = "PIPELINE")]
        pipeline: PathBuf,
    },

    /// List the tasks of a pipeline
    List {
        /// Path to the pipeline YAML file
        #[arg(value_name = "PIPELINE")]
        pipeline: PathBuf,
    },
}

/// Logs task lifecycle events in a human-readable form.
struct LoggingHandler;

#[async_trait::async_trait]
impl EventHandler for LoggingHandler {
    async fn handle(&self, event: &Event) {
        match event {
            Event::RunStarted {
                run_id, task_count, ..
            } => {
                info!("Run {} started with {} task(s)", run_id, task_count);
            }
            Event::TaskStarted { task_id, .. } => {
                info!("  Task '{}' started", task_id);
            }
            Event::TaskCompleted {
                task_id, duration, ..
            } => {
                info!("  Task '{}' completed in {:?}", task_id, duration);
            }
            Event::TaskFailed { task_id, error, .. } => {
                warn!("  Task '{}' failed: {}", task_id, error);
            }
            Event::TaskRetrying {
                task_id,
                attempt,
                max_attempts,
                ..
            } => match max_attempts {
                Some(max) => warn!("  Task '{}' will retry (attempt {}/{})", task_id, attempt, max),
                None => warn!("  Task '{}' will retry (attempt {})", task_id, attempt),
            },
            Event::TaskAbandoned {
                task_id, attempts, ..
            } => {
                error!("  Task '{}' abandoned after {} attempt(s)", task_id, attempts);
            }
            Event::RunCompleted {
                run_id,
                success,
                duration,
                ..
            } => {
                if *success {
                    info!("Run {} completed successfully in {:?}", run_id, duration);
                } else {
                    error!("Run {} failed after {:?}", run_id, duration);
                }
            }
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            pipeline,
            max_concurrency,
            max_attempts,
            timeout,
        } => {
            run_pipeline(pipeline, max_concurrency, max_attempts, timeout).await?;
        }
        Commands::Validate { pipeline } => {
            validate_pipeline(pipeline)?;
        }
        Commands::List { pipeline } => {
            list_tasks(pipeline)?;
        }
    }

    Ok(())
}

/// Run a pipeline and print its results as JSON.
async fn run_pipeline(
    path: PathBuf,
    max_concurrency: Option<usize>,
    max_attempts: Option<u32>,
    timeout: Option<u64>,
) -> Result<(), Box<dyn std::error::Error>> {
    info!("Loading pipeline from: {}", path.display());
    let config = load_pipeline(&path)?;

    let event_bus = Arc::new(EventBus::new());
    event_bus.register(Arc::new(LoggingHandler)).await;

    let mut graph = PipelineBuilder::build(&config).with_event_bus(event_bus);
    if let Some(max) = max_attempts {
        graph = graph.with_retry_policy(RetryPolicy::max_attempts(max));
    }
    let max_concurrency = max_concurrency.unwrap_or(config.graph.max_concurrency);

    if !graph.retry_policy().is_bounded() {
        info!("Failing tasks are retried until they succeed; press Ctrl+C to stop");
    }

    let reporter = |progress: &Progress| {
        if progress.halted {
            warn!("{}", progress);
        } else {
            info!("{}", progress);
        }
    };
    let run = graph.execute_all(max_concurrency, Some(&reporter));
    let deadline = async {
        match timeout {
            Some(secs) => tokio::time::sleep(Duration::from_secs(secs)).await,
            None => std::future::pending().await,
        }
    };

    let results = tokio::select! {
        outcome = run => outcome?,
        _ = deadline => {
            error!("Run timed out, unresolved: {:?}", pending(&graph));
            return Err(format!("pipeline '{}' timed out", config.name).into());
        }
        _ = tokio::signal::ctrl_c() => {
            warn!("Interrupted, unresolved: {:?}", pending(&graph));
            return Err("interrupted".into());
        }
    };

    let ordered: std::collections::BTreeMap<_, _> = results.into_iter().collect();
    println!("{}", serde_json::to_string_pretty(&ordered)?);
    Ok(())
}

fn pending(graph: &tessera::TaskGraph) -> Vec<String> {
    graph
        .task_ids()
        .into_iter()
        .filter(|id| graph.result(id).is_none())
        .map(|id| id.to_string())
        .collect()
}

/// Validate a pipeline file without running it.
fn validate_pipeline(path: PathBuf) -> Result<(), Box<dyn std::error::Error>> {
    info!("Validating pipeline: {}", path.display());

    match load_pipeline(&path) {
        Ok(config) => {
            info!("Pipeline '{}' is valid: {} task(s)", config.name, config.tasks.len());
            for task in &config.tasks {
                for dep in &task.depends_on {
                    if config.task(dep).is_none() {
                        warn!(
                            "  Task '{}' depends on unknown task '{}' and will never run",
                            task.id, dep
                        );
                    }
                }
            }
            Ok(())
        }
        Err(e) => {
            error!("Validation failed: {}", e);
            Err(e.into())
        }
    }
}

/// List the tasks of a pipeline.
fn list_tasks(path: PathBuf) -> Result<(), Box<dyn std::error::Error>> {
    let config = load_pipeline(&path)?;

    println!("Pipeline: {}", config.name);
    if let Some(description) = &config.description {
        println!("  {}", description);
    }
    println!("  Max concurrency: {}", config.graph.max_concurrency);
    match config.graph.retry.max_attempts {
        Some(max) => println!("  Max attempts: {}", max),
        None => println!("  Max attempts: unbounded"),
    }
    println!();

    for task in &config.tasks {
        if task.depends_on.is_empty() {
            println!("  - {}", task.id);
        } else {
            println!("  - {} (depends on: {})", task.id, task.depends_on.join(", "));
        }
        println!("      $ {}", task.command);
    }

    Ok(())
}
