mod commands;
mod config;
mod error;
mod extract;
mod probe;
mod procinfo;
mod reviewer;
mod supervisor;
mod telemetry;

use std::process::ExitCode;

use clap::{Parser, Subcommand};

use commands::init::InitArgs;
use commands::review_cycle::ReviewArgs;
use commands::run::RunArgs;

#[derive(Debug, Parser)]
#[command(
    name = "overseer",
    version,
    about = "Supervised CLI-agent invocations with liveness probes and fallback chains"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run one supervised reviewer invocation and print the extracted answer
    Run(RunArgs),
    /// Run the multi-cycle document review loop
    Review(ReviewArgs),
    /// Write a starter .overseer.toml
    Init(InitArgs),
    /// Print the JSON Schema for .overseer.toml
    Schema,
}

impl Commands {
    const fn name(&self) -> &'static str {
        match self {
            Self::Run(_) => "run",
            Self::Review(_) => "review",
            Self::Init(_) => "init",
            Self::Schema => "schema",
        }
    }
}

fn main() -> ExitCode {
    let _telemetry = telemetry::init();

    let cli = Cli::parse();

    let _span = tracing::info_span!("command", name = cli.command.name()).entered();

    let result = match cli.command {
        Commands::Run(args) => args.execute(),
        Commands::Review(args) => args.execute(),
        Commands::Init(args) => args.execute(),
        Commands::Schema => commands::schema::run_schema(),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            if let Some(exit_err) = e.downcast_ref::<error::ExitError>() {
                eprintln!("error: {exit_err}");
                exit_err.exit_code()
            } else if let Some(timeout) = e.downcast_ref::<error::TimeoutError>() {
                eprintln!("error: {timeout}");
                ExitCode::from(5)
            } else {
                eprintln!("error: {e:#}");
                ExitCode::FAILURE
            }
        }
    }
}
