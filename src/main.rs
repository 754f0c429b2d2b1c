use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use pipeline_factory::logging::{LogFormat, init_logging};

mod cmd;

#[derive(Parser)]
#[command(name = "pipeline-factory")]
#[command(version, about = "Per-branch CI/CD pipeline provisioning for GitHub organizations")]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Path to pipeline-factory.toml (defaults to ./pipeline-factory.toml when present)
    #[arg(short, long, global = true, env = "PIPELINE_FACTORY_CONFIG")]
    pub config: Option<PathBuf>,

    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Plaintext, env = "LOG_FORMAT")]
    pub log_format: LogFormat,

    /// GitHub organization to manage. Overrides the config file and ORGANIZATION_NAME.
    #[arg(long, global = true)]
    pub organization: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the HTTP service with periodic discovery and the queue worker
    Serve {
        /// Port to serve on
        #[arg(short, long)]
        port: Option<u16>,
    },
    /// Run one discovery pass over the organization and process every job
    Discover,
    /// Reconcile the pipelines of a single repository
    Reconcile {
        #[arg(long)]
        owner: String,

        #[arg(long)]
        repository: String,

        /// Print the planned creates and deletes without applying them
        #[arg(long)]
        dry_run: bool,
    },
    /// Validate a pipeline-factory.settings file
    CheckSettings {
        /// Path to the settings file
        file: PathBuf,

        /// Also print which branches of this list would be monitored
        #[arg(long, value_delimiter = ',')]
        branches: Vec<String>,

        /// Default branch used when evaluating --branches
        #[arg(long, default_value = "main")]
        default_branch: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();
    init_logging(cli.log_format, cli.verbose)?;

    match &cli.command {
        Commands::Serve { port } => {
            let config = cmd::load_config(&cli)?;
            cmd::cmd_serve(config, *port).await?;
        }
        Commands::Discover => {
            let config = cmd::load_config(&cli)?;
            cmd::cmd_discover(&config).await?;
        }
        Commands::Reconcile {
            owner,
            repository,
            dry_run,
        } => {
            let config = cmd::load_config(&cli)?;
            cmd::cmd_reconcile(&config, owner, repository, *dry_run).await?;
        }
        Commands::CheckSettings {
            file,
            branches,
            default_branch,
        } => cmd::cmd_check_settings(file, branches, default_branch)?,
    }

    Ok(())
}
