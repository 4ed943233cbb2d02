//! TSDHN command line tool and worker process.

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod commands;

#[derive(Parser)]
#[command(name = "tsdhn")]
#[command(about = "TSDHN tsunami simulation job pipeline", long_about = None)]
struct Cli {
    /// System configuration file
    #[arg(long, env = "TSDHN_CONFIG", default_value = "tsdhn.kdl")]
    config: PathBuf,

    /// Database URL, overrides the configuration file
    #[arg(long, env = "DATABASE_URL")]
    database_url: Option<String>,

    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the worker pool until interrupted
    Worker {
        /// Number of concurrent workers
        #[arg(long)]
        workers: Option<usize>,
    },
    /// Queue a new job
    Submit {
        /// Step to skip, may be repeated
        #[arg(long = "skip")]
        skip: Vec<String>,
    },
    /// Show the status of a job
    Status {
        /// Job ID
        id: String,
    },
    /// Locate the report of a completed job
    Result {
        /// Job ID
        id: String,
    },
    /// List the pipeline steps
    Steps,
    /// Validate a pipeline definition
    Validate {
        /// Pipeline file, the configured pipeline when omitted
        path: Option<PathBuf>,
    },
    /// Run database migrations
    Migrate,
    /// Check connectivity to the job store
    Health,
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    match format {
        LogFormat::Text => tracing_subscriber::fmt().with_env_filter(filter).init(),
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init(),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    let mut config = commands::load_config(&cli.config)?;
    if let Some(url) = cli.database_url {
        config.database_url = url;
    }

    match cli.command {
        Commands::Worker { workers } => {
            commands::worker::run(config, workers).await?;
        }
        Commands::Submit { skip } => {
            commands::jobs::submit(&config, &skip).await?;
        }
        Commands::Status { id } => {
            commands::jobs::status(&config, &id).await?;
        }
        Commands::Result { id } => {
            commands::jobs::result(&config, &id).await?;
        }
        Commands::Steps => {
            commands::pipeline::steps(&config)?;
        }
        Commands::Validate { path } => {
            commands::pipeline::validate(&config, path.as_deref())?;
        }
        Commands::Migrate => {
            commands::jobs::migrate(&config).await?;
        }
        Commands::Health => {
            commands::jobs::health(&config).await?;
        }
    }

    Ok(())
}
