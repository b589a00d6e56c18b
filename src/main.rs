use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use clap::{Parser, Subcommand};

use casewatch::config::Config;
use casewatch::engine::{MonitorSnapshot, PollOutcome};
use casewatch::status::{ExecutionId, Status};
use casewatch::Target;

#[derive(Parser)]
#[command(
    name = "casewatch",
    about = "Follow chatbot test-case executions until they finish",
    version,
    long_about = None
)]
struct Cli {
    /// Configuration file (TOML)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Monitor an execution until it reaches a terminal state
    Watch {
        /// Execution ID
        execution: String,

        /// Task-queue handle (defaults to the one on the record)
        #[arg(long)]
        task: Option<String>,

        /// Read records from a SQLite database instead of the API
        #[arg(long)]
        db: Option<String>,

        /// Serve the status API on this address while watching
        #[arg(long)]
        serve: Option<String>,

        /// JSON output for machine parsing
        #[arg(long)]
        json: bool,
    },

    /// Poll an execution once and print the result
    Status {
        /// Execution ID
        execution: String,

        /// Task-queue handle (defaults to the one on the record)
        #[arg(long)]
        task: Option<String>,

        /// Read records from a SQLite database instead of the API
        #[arg(long)]
        db: Option<String>,

        /// JSON output for machine parsing
        #[arg(long)]
        json: bool,
    },

    /// Ask the backend to stop an execution
    Stop {
        /// Execution ID
        execution: String,
    },
}

fn init_tracing(config: &Config) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.logging.level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if config.logging.json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn print_snapshot(snapshot: &MonitorSnapshot, elapsed: u64, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string(snapshot)?);
        return Ok(());
    }
    let counts = if snapshot.visible.total_conversations > 0 {
        format!(
            " ({}/{} conversations)",
            snapshot.visible.executed_conversations, snapshot.visible.total_conversations
        )
    } else {
        String::new()
    };
    println!(
        "[{:>4}s] {:<9} {:>3}%{}{}",
        elapsed,
        snapshot.status.to_string(),
        snapshot.visible.progress,
        counts,
        snapshot
            .visible
            .stage
            .as_deref()
            .map(|s| format!(" - {}", s))
            .unwrap_or_default()
    );
    if let Some(err) = &snapshot.visible.error_message {
        println!("  error: {}", err);
    }
    if let Some(err) = &snapshot.visible.blocking_error {
        println!("  cannot determine status: {}", err);
    }
    Ok(())
}

async fn watch(config: &Config, target: Target, serve: Option<String>, json: bool) -> Result<ExitCode> {
    let monitor = casewatch::open_monitor(config, &target).await?;

    let _server = match serve {
        Some(bind) => Some(casewatch::api::spawn(&bind, casewatch::api::state::AppState::for_monitor(&monitor)).await?),
        None => None,
    };

    let mut updates = monitor.subscribe();
    let elapsed = monitor.elapsed();
    let printer = tokio::spawn(async move {
        loop {
            let snapshot = updates.borrow_and_update().clone();
            if let Err(e) = print_snapshot(&snapshot, *elapsed.borrow(), json) {
                tracing::error!(error = %e, "failed to print status");
            }
            if snapshot.is_settled() || updates.changed().await.is_err() {
                break;
            }
        }
    });

    monitor.start();

    let settled = tokio::select! {
        res = monitor.wait_settled() => Some(res?),
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("interrupted, stopping monitor");
            None
        }
    };
    match settled {
        // The printer stops on its own once it has shown the settled snapshot.
        Some(_) => {
            if let Err(e) = printer.await {
                tracing::warn!(error = %e, "status printer did not finish");
            }
        }
        None => printer.abort(),
    }
    monitor.dispose();

    Ok(match settled {
        Some(snapshot) if snapshot.status == Status::Succeeded && snapshot.visible.blocking_error.is_none() => {
            ExitCode::SUCCESS
        }
        _ => ExitCode::FAILURE,
    })
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    let config = Config::resolve(cli.config.as_deref())?;
    init_tracing(&config);

    match cli.command {
        Commands::Watch {
            execution,
            task,
            db,
            serve,
            json,
        } => {
            tracing::info!(%execution, "Starting monitor");
            let target = Target {
                execution: ExecutionId::new(execution),
                task_handle: task,
                db_path: db,
            };
            watch(&config, target, serve, json).await
        }
        Commands::Status {
            execution,
            task,
            db,
            json,
        } => {
            let target = Target {
                execution: ExecutionId::new(execution),
                task_handle: task,
                db_path: db,
            };
            let outcome = casewatch::status_once(&config, &target).await?;
            match outcome {
                PollOutcome::Fresh { envelope, source, .. } => {
                    if json {
                        println!("{}", serde_json::to_string_pretty(&envelope)?);
                    } else {
                        println!(
                            "{} ({}) {}% via {}",
                            envelope.classified(),
                            envelope.status,
                            envelope.progress,
                            source
                        );
                    }
                    Ok(ExitCode::SUCCESS)
                }
                PollOutcome::Unavailable { reason, .. } => {
                    eprintln!("status temporarily unavailable: {}", reason);
                    Ok(ExitCode::FAILURE)
                }
                PollOutcome::Fatal { reason } => {
                    eprintln!("cannot determine status: {}", reason);
                    Ok(ExitCode::FAILURE)
                }
            }
        }
        Commands::Stop { execution } => {
            let id = ExecutionId::new(execution);
            let envelope = casewatch::stop(&config, &id).await?;
            println!("stop requested for {}: now {}", id, envelope.classified());
            Ok(ExitCode::SUCCESS)
        }
    }
}
