//! podpush CLI tool.

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod commands;

#[derive(Parser)]
#[command(name = "podpush")]
#[command(about = "Publish pod versions to the index repository", long_about = None)]
struct Cli {
    /// Path to the configuration file
    #[arg(long, env = "PODPUSH_CONFIG", default_value = "podpush.kdl")]
    config: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply database migrations
    Migrate,
    /// Register a pod version and submit it for publishing
    Submit {
        /// Public URL of the version, used as the pull request body
        #[arg(long)]
        url: String,
        /// Path to the podspec JSON document; pod name and version are read from it
        #[arg(long)]
        document: String,
        /// Do not check that the pod's source is publicly accessible
        #[arg(long)]
        skip_source_check: bool,
    },
    /// Advance the longest-waiting runnable job by one step
    Perform,
    /// Run the dispatcher loop until interrupted
    Worker {
        /// Worker name used in logs
        #[arg(long, default_value = "cli")]
        id: String,
    },
    /// Inspect submission jobs
    Jobs {
        #[command(subcommand)]
        command: JobCommands,
    },
    /// Validate the configuration file
    Validate,
}

#[derive(Subcommand)]
enum JobCommands {
    /// List recently updated jobs
    List {
        /// Maximum number of jobs to show
        #[arg(long, default_value = "10")]
        limit: i64,
    },
    /// Show a job with its log trail
    Show {
        /// Job ID
        id: uuid::Uuid,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Migrate => commands::migrate(&cli.config).await?,
        Commands::Submit {
            url,
            document,
            skip_source_check,
        } => commands::jobs::submit(&cli.config, &url, &document, skip_source_check).await?,
        Commands::Perform => commands::worker::perform(&cli.config).await?,
        Commands::Worker { id } => commands::worker::run(&cli.config, &id).await?,
        Commands::Jobs { command } => match command {
            JobCommands::List { limit } => commands::jobs::list(&cli.config, limit).await?,
            JobCommands::Show { id } => commands::jobs::show(&cli.config, id).await?,
        },
        Commands::Validate => commands::validate(&cli.config)?,
    }

    Ok(())
}
