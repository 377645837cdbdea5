mod bundle;

use anyhow::{anyhow, Result};
use bundle::Bundle;
use clap::{Parser, Subcommand};
use crewcore::{ExecutionEvent, ExecutionStatus, TaskEvent};
use crewinvokers::HttpSettings;
use crewruntime::{CrewRuntime, InvokerRegistry, RuntimeConfig};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "crew")]
#[command(about = "Crew Engine CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute a bundle of agents and a workflow
    Run {
        /// Path to bundle JSON file
        #[arg(short, long)]
        file: PathBuf,

        /// Execution input as JSON
        #[arg(short, long)]
        input: Option<String>,

        /// Show verbose output
        #[arg(short, long)]
        verbose: bool,
    },

    /// Validate a bundle file
    Validate {
        /// Path to bundle JSON file
        file: PathBuf,
    },

    /// List available invokers
    Invokers,

    /// Create an example bundle
    Init {
        /// Output file path
        #[arg(short, long, default_value = "crew.json")]
        output: PathBuf,
    },
}

fn registry() -> InvokerRegistry {
    let mut registry = InvokerRegistry::new();
    crewinvokers::register_all(&mut registry, HttpSettings::from_env());
    registry
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            file,
            input,
            verbose,
        } => {
            let default = if verbose { "debug" } else { "warn" };
            tracing_subscriber::fmt()
                .with_env_filter(
                    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)),
                )
                .init();

            run_bundle(file, input).await?;
        }

        Commands::Validate { file } => {
            validate_bundle(file)?;
        }

        Commands::Invokers => {
            list_invokers();
        }

        Commands::Init { output } => {
            create_example_bundle(output)?;
        }
    }

    Ok(())
}

async fn run_bundle(file: PathBuf, input: Option<String>) -> Result<()> {
    println!("🚀 Loading bundle from: {}", file.display());

    let bundle = Bundle::load(&file)?;
    println!("📋 Workflow: {} ({})", bundle.workflow.name, bundle.workflow.mode.as_str());
    println!("   Agents: {}", bundle.agents.len());
    println!("   Tasks: {}", bundle.workflow.tasks.len());
    println!();

    let input: serde_json::Value = match input {
        Some(raw) => serde_json::from_str(&raw)?,
        None => serde_json::Value::Null,
    };

    let runtime = CrewRuntime::in_memory(Arc::new(registry()), RuntimeConfig::from_env());
    for agent in bundle.agents {
        runtime.create_agent(agent).await?;
    }
    let workflow = runtime.create_workflow(bundle.workflow).await?;

    let mut events = runtime.subscribe_events();
    let execution = runtime.run(workflow.id, input).await?;
    let execution_id = execution.id;

    // events of a workflow that finishes inside run() were sent before we could see them
    let mut finished = execution.is_terminal();
    while !finished {
        tokio::select! {
            event = events.recv() => {
                let Ok(event) = event else { break };
                if event.execution_id() != execution_id {
                    continue;
                }
                finished = matches!(event, ExecutionEvent::ExecutionFinished { .. });
                print_event(event);
            }
            _ = tokio::signal::ctrl_c() => {
                println!("🛑 Cancelling execution");
                if let Err(e) = runtime.cancel(execution_id).await {
                    tracing::warn!("Cancel of {} failed: {}", execution_id, e);
                }
            }
        }
    }

    // fail-fast leaves sibling runs in flight; wait for their outcomes
    let mut execution = runtime.get_execution(execution_id).await?;
    while !(execution.is_terminal() && execution.is_quiescent()) {
        tokio::time::sleep(Duration::from_millis(50)).await;
        execution = runtime.get_execution(execution_id).await?;
    }

    println!();
    println!("📊 Execution Summary:");
    println!("   Execution ID: {}", execution.id);
    println!("   Status: {}", execution.status.as_str());
    println!("   Completed: {}/{} tasks", execution.completed_tasks, execution.total_tasks);
    println!("   Tokens: {}", execution.tokens_used);
    if let Some(ms) = execution.duration_ms() {
        println!("   Duration: {}ms", ms);
    }
    if let Some(error) = &execution.error {
        println!("   Error: {}", error);
    }

    let outputs = execution.outputs();
    if !outputs.is_empty() {
        println!();
        println!("📤 Outputs:");
        for (task_id, output) in &outputs {
            println!("   {}: {}", task_id, output);
        }
    }

    match execution.status {
        ExecutionStatus::Completed => Ok(()),
        status => Err(anyhow!("execution ended {}", status.as_str())),
    }
}

fn print_event(event: ExecutionEvent) {
    match event {
        ExecutionEvent::ExecutionStarted { .. } => {
            println!("▶️  Execution started");
        }
        ExecutionEvent::TaskStarted {
            task_id, iteration, ..
        } => {
            if iteration > 0 {
                println!("  ⚡ Starting task: {} (iteration {})", task_id, iteration);
            } else {
                println!("  ⚡ Starting task: {}", task_id);
            }
        }
        ExecutionEvent::TaskRetrying {
            task_id,
            attempt,
            error,
            delay_ms,
            ..
        } => {
            println!(
                "  🔁 Task {} attempt {} failed ({}), retrying in {}ms",
                task_id, attempt, error, delay_ms
            );
        }
        ExecutionEvent::TaskCompleted {
            task_id,
            duration_ms,
            tokens_used,
            ..
        } => {
            println!(
                "  ✅ Task {} completed in {}ms ({} tokens)",
                task_id, duration_ms, tokens_used
            );
        }
        ExecutionEvent::TaskFailed { task_id, error, .. } => {
            println!("  ❌ Task {} failed: {}", task_id, error);
        }
        ExecutionEvent::TaskSkipped { task_id, .. } => {
            println!("  ⏭️  Task {} skipped", task_id);
        }
        ExecutionEvent::ExecutionPaused { .. } => {
            println!("⏸️  Execution paused");
        }
        ExecutionEvent::ExecutionResumed { .. } => {
            println!("▶️  Execution resumed");
        }
        ExecutionEvent::TaskEvent { task_id, event, .. } => match event {
            TaskEvent::Info { message } => {
                println!("     ℹ️  [{}] {}", task_id, message);
            }
            TaskEvent::Warning { message } => {
                println!("     ⚠️  [{}] {}", task_id, message);
            }
            TaskEvent::Progress { percent, message } => {
                if let Some(msg) = message {
                    println!("     📊 [{}] {}% - {}", task_id, percent, msg);
                } else {
                    println!("     📊 [{}] {}%", task_id, percent);
                }
            }
        },
        ExecutionEvent::ExecutionFinished { status, .. } => match status {
            ExecutionStatus::Completed => println!("✨ Execution completed successfully"),
            other => println!("💥 Execution {}", other.as_str()),
        },
    }
}

fn validate_bundle(file: PathBuf) -> Result<()> {
    println!("🔍 Validating bundle: {}", file.display());

    let bundle = Bundle::load(&file)?;
    bundle.validate()?;

    println!("✅ Bundle is valid:");
    println!("   Workflow: {} ({})", bundle.workflow.name, bundle.workflow.mode.as_str());
    println!("   Agents: {}", bundle.agents.len());
    println!("   Tasks: {}", bundle.workflow.tasks.len());

    Ok(())
}

fn list_invokers() {
    println!("📦 Available Invokers:");
    println!();

    let registry = registry();
    for name in registry.list_invokers() {
        if let Some(metadata) = registry.get_metadata(&name) {
            println!("  • {} ({})", name, metadata.category);
            println!("    {}", metadata.description);
        } else {
            println!("  • {}", name);
        }
    }
}

fn create_example_bundle(output: PathBuf) -> Result<()> {
    Bundle::example().save(&output)?;

    println!("✨ Created example bundle: {}", output.display());
    println!();
    println!("Run it with:");
    println!(
        "  crew run --file {} --input '{{\"topic\": \"edge inference\"}}'",
        output.display()
    );

    Ok(())
}
