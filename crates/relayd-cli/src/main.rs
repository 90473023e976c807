mod cmd;
mod output;

use clap::{Parser, Subcommand};
use cmd::config::ConfigSubcommand;
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "relayd",
    about = "Relay bank scheduler: polls a job server, pulses relays, reports completions",
    version,
    propagate_version = true
)]
struct Cli {
    /// Config file (default: nearest relayd.yaml walking up from the cwd)
    #[arg(long, global = true, env = "RELAYD_CONFIG")]
    config: Option<PathBuf>,

    /// Output as JSON
    #[arg(long, global = true, short = 'j')]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the control loop until Ctrl-C
    Run,

    /// Create, show and validate the config file
    Config {
        #[command(subcommand)]
        subcommand: ConfigSubcommand,
    },

    /// Poll the job server once for a device and print the parsed command
    Poll {
        /// Device id, e.g. DEV001
        device: String,
    },
}

fn main() {
    let cli = Cli::parse();

    let default_level = match &cli.command {
        Commands::Run => tracing::Level::INFO,
        _ => tracing::Level::WARN,
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(default_level.into()),
        )
        .with_target(false)
        .init();

    let path = relayd_core::config::resolve_path(cli.config.as_deref());

    let result = match cli.command {
        Commands::Run => cmd::run::run(&path),
        Commands::Config { subcommand } => cmd::config::run(&path, subcommand, cli.json),
        Commands::Poll { device } => cmd::poll::run(&path, &device, cli.json),
    };

    if let Err(e) = result {
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}
