//! crontide - run recurring tasks on cron schedules.
//!
//! Usage:
//!   crontide run <TASKS>       Run the scheduler with tasks from a YAML file
//!   crontide validate <TASKS>  Check every cron expression without running
//!   crontide list <TASKS>      List installed jobs with their next fire time
//!   crontide next <EXPR>       Preview upcoming fire times of an expression

use chrono::Utc;
use clap::{Parser, Subcommand};
use crontide::scheduler::parse_timezone;
use crontide::{
    CronTrigger, EngineConfig, LoggingListener, ReloadSummary, Scheduler, TasksFile, YamlLoader,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

/// crontide - run recurring tasks on cron schedules
#[derive(Parser)]
#[command(name = "crontide")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the scheduler until interrupted
    Run {
        /// Path to the tasks YAML file
        #[arg(value_name = "TASKS")]
        tasks: PathBuf,

        /// Path to the engine configuration YAML file
        #[arg(short, long, value_name = "FILE")]
        config: Option<PathBuf>,
    },

    /// Validate cron expressions without running
    Validate {
        /// Path to the tasks YAML file
        #[arg(value_name = "TASKS")]
        tasks: PathBuf,

        /// Path to the engine configuration YAML file
        #[arg(short, long, value_name = "FILE")]
        config: Option<PathBuf>,
    },

    /// List the jobs the tasks file would install
    List {
        /// Path to the tasks YAML file
        #[arg(value_name = "TASKS")]
        tasks: PathBuf,

        /// Path to the engine configuration YAML file
        #[arg(short, long, value_name = "FILE")]
        config: Option<PathBuf>,

        /// Print as JSON
        #[arg(long)]
        json: bool,
    },

    /// Preview the next fire times of a cron expression
    Next {
        /// Cron expression (5 or 6 fields)
        #[arg(value_name = "EXPR")]
        expr: String,

        /// Number of fire times to print
        #[arg(short = 'n', long, default_value = "5")]
        count: usize,

        /// Timezone in which to evaluate the expression
        #[arg(short, long, default_value = "UTC")]
        timezone: String,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run { tasks, config } => {
            run_scheduler(&tasks, config.as_deref()).await?;
        }
        Commands::Validate { tasks, config } => {
            validate_tasks(&tasks, config.as_deref()).await?;
        }
        Commands::List {
            tasks,
            config,
            json,
        } => {
            list_jobs(&tasks, config.as_deref(), json).await?;
        }
        Commands::Next {
            expr,
            count,
            timezone,
        } => {
            preview(&expr, count, &timezone)?;
        }
    }

    Ok(())
}

fn load_engine_config(path: Option<&Path>) -> Result<EngineConfig, Box<dyn std::error::Error>> {
    match path {
        Some(path) => {
            info!("Loading engine configuration from: {}", path.display());
            Ok(YamlLoader::load_engine_config(path)?)
        }
        None => Ok(EngineConfig::default()),
    }
}

/// Build a stopped scheduler for the tasks file and reload it.
///
/// Reload events go to a [`LoggingListener`].
async fn build_scheduler(
    tasks_path: &Path,
    config_path: Option<&Path>,
) -> Result<(Scheduler, ReloadSummary), Box<dyn std::error::Error>> {
    let engine = load_engine_config(config_path)?;
    let tasks: TasksFile = YamlLoader::load_tasks(tasks_path)?;

    let installed = tasks
        .install(engine.to_scheduler_config()?, Arc::new(LoggingListener::new()))
        .await;
    Ok(installed)
}

/// Run the scheduler until Ctrl+C.
async fn run_scheduler(
    tasks_path: &Path,
    config_path: Option<&Path>,
) -> Result<(), Box<dyn std::error::Error>> {
    info!("Loading tasks from: {}", tasks_path.display());

    let (scheduler, summary) = build_scheduler(tasks_path, config_path).await?;
    if summary.installed.is_empty() {
        warn!("No schedulable tasks in {}", tasks_path.display());
        return Ok(());
    }

    scheduler.start().await;
    info!("Press Ctrl+C to stop");

    tokio::signal::ctrl_c().await?;
    info!("Shutting down...");
    scheduler.stop().await;

    info!("Goodbye!");
    Ok(())
}

/// Check every cron expression in the tasks file.
async fn validate_tasks(
    tasks_path: &Path,
    config_path: Option<&Path>,
) -> Result<(), Box<dyn std::error::Error>> {
    info!("Validating tasks in: {}", tasks_path.display());

    let (_, summary) = build_scheduler(tasks_path, config_path).await?;

    if summary.is_clean() {
        info!("All {} schedulable task(s) are valid", summary.installed.len());
        Ok(())
    } else {
        Err(format!("{} task(s) have invalid cron expressions", summary.rejected.len()).into())
    }
}

/// List the jobs the tasks file installs.
async fn list_jobs(
    tasks_path: &Path,
    config_path: Option<&Path>,
    json: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let (_, summary) = build_scheduler(tasks_path, config_path).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&summary.installed)?);
        return Ok(());
    }

    if summary.installed.is_empty() {
        println!("No jobs in {}", tasks_path.display());
        return Ok(());
    }

    println!("Jobs in {}:", tasks_path.display());
    println!();

    for job in &summary.installed {
        println!("ID: {}", job.id);
        println!("  Name: {}", job.name);
        println!("  Trigger: {}", job.trigger);
        match job.next_fire_time {
            Some(next) => println!("  Next run: {}", next.to_rfc3339()),
            None => println!("  Next run: never"),
        }
        println!();
    }

    Ok(())
}

/// Print the next fire times of an expression.
fn preview(expr: &str, count: usize, timezone: &str) -> Result<(), Box<dyn std::error::Error>> {
    let tz = parse_timezone(timezone)?;
    let trigger = CronTrigger::parse(expr, tz)?;

    let times = trigger.next_n_after(Utc::now(), count);
    if times.is_empty() {
        println!("'{}' never fires", expr);
        return Ok(());
    }

    for time in times {
        println!("{}", time.with_timezone(&tz).to_rfc3339());
    }

    Ok(())
}
