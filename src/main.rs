use clap::{Parser, Subcommand};
use logship::config::resolve_config_path;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "logship")]
#[command(about = "Ship object-store log files into a log service", long_about = None)]
struct Cli {
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Ship every object under the configured prefix
    Run {
        /// Exit with status 2 when any object was not fully shipped
        #[arg(long)]
        strict: bool,
    },
    Config {
        #[command(subcommand)]
        action: ConfigAction,
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

#[tokio::main]
async fn main() -> Result<ExitCode, Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "logship=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let config_path = resolve_config_path(cli.config.as_deref());

    match cli.command {
        Some(Commands::Run { strict }) => logship::cli::run::run(config_path, strict).await,
        None => logship::cli::run::run(config_path, false).await,
        Some(Commands::Config { action }) => {
            match action {
                ConfigAction::Init { stdout } => logship::cli::config::init(stdout)?,
                ConfigAction::Validate => logship::cli::config::validate(config_path)?,
            }
            Ok(ExitCode::SUCCESS)
        }
    }
}
