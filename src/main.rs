use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod commands;

use commands::{ConfigCommand, MealCommand, PhotoCommand, SyncCommand, WatchCommand};
use nutrisync::config::Config;

#[derive(Parser)]
#[command(name = "nutrisync")]
#[command(version)]
#[command(about = "Offline-first meal tracking client", long_about = None)]
struct Cli {
    /// Path to config file
    #[arg(long, short, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage meals
    Meal(MealCommand),

    /// Attach or remove meal photos
    Photo(PhotoCommand),

    /// Send changes queued while offline
    Sync(SyncCommand),

    /// Follow live changes until interrupted
    Watch(WatchCommand),

    /// Manage configuration
    Config(ConfigCommand),
}

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "nutrisync=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    if let Err(e) = run().await {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Load configuration
    let config = Config::load(cli.config)?;

    match cli.command {
        Some(Commands::Meal(cmd)) => {
            let coordinator = commands::connect(&config).await?;
            cmd.run(&coordinator).await?;
        }
        Some(Commands::Photo(cmd)) => {
            cmd.run(&config).await?;
        }
        Some(Commands::Sync(cmd)) => {
            let coordinator = commands::connect(&config).await?;
            cmd.run(&coordinator).await?;
        }
        Some(Commands::Watch(cmd)) => {
            let coordinator = commands::connect(&config).await?;
            cmd.run(&coordinator, &config).await?;
        }
        Some(Commands::Config(cmd)) => {
            cmd.run(&config)?;
        }
        None => {
            println!("Use --help to see available commands");
        }
    }

    Ok(())
}
