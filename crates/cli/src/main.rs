//! Conclave CLI — the main entry point.
//!
//! Commands:
//! - `onboard` — Write a default config
//! - `agents`  — List the configured agents
//! - `run`     — Send one request in a chosen execution mode
//! - `status`  — Show configuration and stored sessions

use clap::{Parser, Subcommand};
use conclave_core::AgentState;
use conclave_orchestrator::ExecutionMode;

mod commands;

#[derive(Parser)]
#[command(
    name = "conclave",
    about = "Conclave — multi-agent orchestration engine",
    version,
    author
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize configuration
    Onboard,

    /// List agents
    Agents {
        /// Only agents that may call this tool
        #[arg(long)]
        capability: Option<String>,

        /// Only agents in this state (idle, busy, paused, failed)
        #[arg(long)]
        state: Option<AgentState>,
    },

    /// Send a request to the agents
    Run {
        /// The request text
        message: String,

        /// single, parallel, sequential or loop
        #[arg(short, long, default_value = "single")]
        mode: ExecutionMode,

        /// Continue an existing session
        #[arg(short, long)]
        session: Option<String>,

        /// Agents to use, in order (repeatable)
        #[arg(short, long = "agent")]
        agents: Vec<String>,

        /// Agent that grades loop iterations
        #[arg(long)]
        evaluator: Option<String>,

        /// Override the loop iteration cap
        #[arg(long)]
        max_iterations: Option<usize>,

        /// Print Prometheus metrics after the run
        #[arg(long)]
        metrics: bool,
    },

    /// Show system status
    Status,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Onboard => commands::onboard::run().await?,
        Commands::Agents { capability, state } => commands::agents::run(capability, state).await?,
        Commands::Run {
            message,
            mode,
            session,
            agents,
            evaluator,
            max_iterations,
            metrics,
        } => {
            commands::run::run(commands::run::RunArgs {
                message,
                mode,
                session,
                agents,
                evaluator,
                max_iterations,
                metrics,
            })
            .await?
        }
        Commands::Status => commands::status::run().await?,
    }

    Ok(())
}
