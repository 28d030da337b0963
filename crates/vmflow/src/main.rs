mod commands;
mod utils;

use clap::{Parser, Subcommand, ValueEnum};
use colored::Colorize;
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "vmflow")]
#[command(about = "Plan and inspect power-state-aware virtual machine updates", long_about = None)]
struct Cli {
    /// Log debug output to stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Settings file (defaults to VMFLOW_CONFIG_PATH, then vmflow.yaml discovery)
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Parse a resource path and print its parts
    Id {
        /// Slash-delimited resource path
        path: String,
        /// Resource kind the path must describe
        #[arg(short, long, value_enum)]
        kind: Option<IdKind>,
    },
    /// Diff two machine configurations and show what an update would do
    Plan {
        /// Desired configuration (YAML or JSON)
        #[arg(long, value_name = "FILE")]
        desired: PathBuf,
        /// Last-known configuration (YAML or JSON)
        #[arg(long, value_name = "FILE")]
        last_known: PathBuf,
        #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },
    /// Print the effective shutdown policy
    Policy,
    /// Print the resolved settings
    Settings,
    /// Print version information
    Version,
}

#[derive(Clone, Copy, ValueEnum)]
pub enum IdKind {
    Vm,
    Extension,
    Nic,
    PublicIp,
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

fn init_logging(verbose: bool) {
    let default = if verbose { "vmflow=debug" } else { "vmflow=info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(filter)
        .init();
}

fn load_settings(explicit: Option<&Path>) -> anyhow::Result<vmflow_config::Settings> {
    let (settings, source) = vmflow_config::load(explicit)?;
    match source {
        Some(path) => tracing::debug!(path = %path.display(), "Loaded settings"),
        None => tracing::debug!("No settings file found, using defaults"),
    }
    Ok(settings)
}

fn run(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Commands::Id { path, kind } => commands::id::handle(&path, kind),
        Commands::Plan {
            desired,
            last_known,
            format,
        } => {
            let settings = load_settings(cli.config.as_deref())?;
            commands::plan::handle(&settings, &desired, &last_known, format)
        }
        Commands::Policy => {
            let settings = load_settings(cli.config.as_deref())?;
            commands::policy::handle(&settings)
        }
        Commands::Settings => commands::settings::handle(cli.config.as_deref()),
        Commands::Version => {
            println!("vmflow {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    if let Err(e) = run(cli) {
        eprintln!("{} {:#}", "Error:".red().bold(), e);
        std::process::exit(1);
    }
}
