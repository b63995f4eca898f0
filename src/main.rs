use clap::Parser;
use colored::*;
use eyre::{Context as _, Result};
use log::info;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tempo::{Context, EntryState, Scheduler};

mod cli;
mod config;
mod demo;

use cli::{Cli, Commands};
use config::Config;
use demo::{JitterRecorder, Panel, RunLog};

/// Poll period while waiting for demo entries to drain.
const DRAIN_POLL: Duration = Duration::from_millis(200);
/// Upper bound on the tasks demo.
const TASKS_DEADLINE: Duration = Duration::from_secs(5);

fn setup_logging(verbose: bool, level: Option<&str>) -> Result<()> {
    // Create log directory
    let log_dir = dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("tempo")
        .join("logs");

    fs::create_dir_all(&log_dir).context("Failed to create log directory")?;

    let log_file = log_dir.join("tempo.log");

    let mut builder = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level.unwrap_or("info")));
    if verbose {
        builder.target(env_logger::Target::Stderr);
    } else {
        // Setup env_logger with file output
        let target = Box::new(
            fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&log_file)
                .context("Failed to open log file")?,
        );
        builder.target(env_logger::Target::Pipe(target));
    }
    builder.init();

    info!("Logging initialized, writing to: {}", log_file.display());
    Ok(())
}

async fn run_application(cli: &Cli, config: &Config) -> Result<()> {
    info!("Starting application");

    if cli.is_verbose() {
        println!("{}", "Verbose mode enabled".yellow());
    }

    match cli.command.clone().unwrap_or_default() {
        Commands::Events { count } => handle_events_command(count, cli.json, config).await,
        Commands::Tasks { retries, attempts } => handle_tasks_command(retries, attempts, cli.json, config).await,
        Commands::Config => handle_config_command(cli.json, config),
    }
}

/// Wait until the scheduler has no entries, Ctrl-C arrives or `deadline`
/// passes. Returns whether it drained on its own.
async fn wait_for_drain(scheduler: &Arc<Scheduler>, deadline: Option<Duration>) -> Result<bool> {
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let started = tokio::time::Instant::now();

    loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                println!("{}", "Interrupted, terminating scheduler...".yellow());
                return Ok(false);
            }
            _ = tokio::time::sleep(DRAIN_POLL) => {
                if scheduler.is_empty()? {
                    return Ok(true);
                }
                if deadline.is_some_and(|d| started.elapsed() >= d) {
                    println!("{}", "Deadline reached, terminating scheduler...".yellow());
                    return Ok(false);
                }
            }
        }
    }
}

/// Stop the worker off the async runtime, aborting whatever is left.
async fn shut_down(scheduler: &Arc<Scheduler>) -> Result<()> {
    let scheduler = Arc::clone(scheduler);
    tokio::task::spawn_blocking(move || scheduler.terminate())
        .await
        .context("Scheduler shutdown task failed")
}

async fn handle_events_command(count: Option<usize>, json: bool, config: &Config) -> Result<()> {
    let count = count.unwrap_or(config.demo.events);
    info!("Running events demo with {} events", count);

    let scheduler = Arc::new(Scheduler::new(config.scheduler.clone()));
    if !scheduler.start() {
        eyre::bail!("Failed to start scheduler '{}'", scheduler.name());
    }

    let jitter = JitterRecorder::default();
    let panel_ctx = Context::new(Panel::default());
    for index in 0..count {
        let id = scheduler.add(demo::phased_event(index, &config.demo, &jitter, &panel_ctx))?;
        if !json {
            println!("{} event {} as {}", "Pushed".green(), index, id);
        }
        tokio::time::sleep(Duration::from_millis(config.demo.stagger_ms / 2)).await;
    }

    wait_for_drain(&scheduler, None).await?;
    shut_down(&scheduler).await?;

    let stats = scheduler.stats()?;
    let jitter = jitter.stats();
    if json {
        let report = serde_json::json!({ "stats": stats, "jitter": jitter });
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!("===================================");
    match jitter {
        Some(j) => {
            println!("{}", "Jitter statistics:".cyan());
            println!("  Samples:            {}", j.samples);
            println!("  Min jitter:         {:.3} ms", j.min_ms);
            println!("  Max jitter:         {:.3} ms", j.max_ms);
            println!("  Average jitter:     {:.3} ms", j.mean_ms);
            println!("  Standard deviation: {:.3} ms", j.std_dev_ms);
        }
        None => println!("{}", "No jitter data collected.".yellow()),
    }
    println!(
        "{} {} cycles, {} invocations, {} timed out, {} aborted",
        "Engine:".cyan(),
        stats.cycles,
        stats.invocations,
        stats.timed_out,
        stats.aborted
    );
    Ok(())
}

async fn handle_tasks_command(retries: u32, attempts: u32, json: bool, config: &Config) -> Result<()> {
    info!("Running tasks demo (retries: {}, attempts: {})", retries, attempts);

    let scheduler = Arc::new(Scheduler::new(config.scheduler.clone()));
    let run_log = RunLog::default();

    let fetch = scheduler.add(demo::one_shot("fetch", 5, &run_log))?;
    let flaky = scheduler.add(demo::flaky(attempts, retries, fetch, &run_log))?;
    // Blocked forever if the flaky step gives up, so give it a lifetime.
    let report = scheduler.add(
        demo::one_shot("report", 1, &run_log)
            .depends_on(flaky)
            .with_lifetime(Duration::from_secs(3)),
    )?;
    scheduler.add(demo::heartbeat(&run_log))?;

    if !scheduler.start() {
        eyre::bail!("Failed to start scheduler '{}'", scheduler.name());
    }

    let pending = scheduler.entries()?;
    let drained = wait_for_drain(&scheduler, Some(TASKS_DEADLINE)).await?;
    shut_down(&scheduler).await?;

    let stats = scheduler.stats()?;
    let lines = run_log.lines();
    if json {
        let report = serde_json::json!({
            "drained": drained,
            "entries": pending,
            "runs": lines,
            "stats": stats,
        });
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!("{}", "Entries:".cyan());
    for entry in &pending {
        let deps = entry
            .dependencies
            .iter()
            .map(|d| d.to_string())
            .collect::<Vec<_>>()
            .join(", ");
        println!(
            "  {} {:<10} priority {:>2}  deps [{}]",
            entry.id,
            entry.label.as_deref().unwrap_or("-"),
            entry.priority,
            deps
        );
    }
    println!("{}", "Run order:".cyan());
    for line in &lines {
        println!("  {}", line);
    }
    let report_ran = lines.iter().any(|l| l == "report");
    let outcome = if report_ran {
        format!("{} ran", report).as_str().green()
    } else {
        format!("{} never ran ({})", report, EntryState::Timeout).as_str().red()
    };
    println!("{} {}", "Report:".cyan(), outcome);
    println!(
        "{} {} completed, {} failed, {} retries, {} timed out",
        "Engine:".cyan(),
        stats.completed,
        stats.failed,
        stats.retries,
        stats.timed_out
    );
    Ok(())
}

fn handle_config_command(json: bool, config: &Config) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(config)?);
    } else {
        print!("{}", config.to_yaml()?);
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments
    let cli = Cli::parse();

    // Load configuration
    let config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;

    // Setup logging once the level is known
    setup_logging(cli.is_verbose(), config.log_level.as_deref()).context("Failed to setup logging")?;

    info!("Starting with config from: {:?}", cli.config);

    // Run the main application logic
    run_application(&cli, &config).await.context("Application failed")?;

    Ok(())
}
