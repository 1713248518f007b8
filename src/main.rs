use clap::{Parser, Subcommand};
use sdc::config::resolve_config_path;
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser)]
#[command(name = "sdc")]
#[command(about = "Incremental security telemetry collector", long_about = None)]
struct Cli {
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Collect every pending window once (default)
    Run,
    /// Show the windows the next run would collect
    Plan,
    State {
        #[command(subcommand)]
        action: StateAction,
    },
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum StateAction {
    /// Print the stored checkpoint
    Show,
    /// Overwrite the checkpoint, e.g. to re-collect a period
    Reset {
        #[arg(long)]
        to: String,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    Init {
        #[arg(long)]
        stdout: bool,
    },
    Validate,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let config_path = resolve_config_path(cli.config.as_deref());

    let result: Result<(), Box<dyn std::error::Error>> = match cli.command {
        Some(Commands::Run) | None => match sdc::cli::run::run(config_path).await {
            // A run that stopped on a failed window still exits 0; the failure is logged
            Ok(_summary) => Ok(()),
            Err(e) => Err(e.into()),
        },
        Some(Commands::Plan) => sdc::cli::plan::plan(config_path),
        Some(Commands::State { action }) => match action {
            StateAction::Show => sdc::cli::state::show(config_path),
            StateAction::Reset { to } => sdc::cli::state::reset(config_path, &to),
        },
        Some(Commands::Config { action }) => match action {
            ConfigAction::Init { stdout } => sdc::cli::config::init(stdout),
            ConfigAction::Validate => sdc::cli::config::validate(config_path),
        },
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}
