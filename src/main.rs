use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};

mod cli;
mod error;
mod ledger;
mod lock;
mod reconcile;
mod tmux;

/// Supervises AI coding-agent workbenches inside tmux, reconciling live
/// sessions against the workshop ledger.
#[derive(Parser, Debug)]
#[command(name = "foreman")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to the ledger file (also: FOREMAN_LEDGER)
    #[arg(long, global = true, value_name = "PATH")]
    ledger: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Reconcile a workshop's session with its ledger records
    Apply {
        /// Workshop name
        target: String,

        /// Execute without the interactive confirmation
        #[arg(long)]
        yes: bool,

        /// Print the plan as JSON
        #[arg(long)]
        json: bool,
    },

    /// Attach this terminal to a workshop's running session
    Connect {
        /// Workshop name
        target: String,
    },

    /// Re-run cosmetic decoration (pane titles, key bindings) only
    Enrich {
        /// Workshop name; inferred from the working directory if omitted
        target: Option<String>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Cli::parse();
    let ctx = cli::Ctx::new(args.ledger);

    let result = match args.command {
        Command::Apply { target, yes, json } => cli::apply(&ctx, &target, yes, json).await,
        Command::Connect { target } => cli::connect(&ctx, &target).await,
        Command::Enrich { target } => cli::enrich_session(&ctx, target.as_deref()).await,
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("foreman: {:#}", e);
            ExitCode::FAILURE
        }
    }
}
