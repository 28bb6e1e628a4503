//! Command-line interface for wal-ingest
//!
//! ## Checkpoint Format
//! - PostgreSQL / openGauss: `postgresql-wal:0/16B3748` (LSN of the last applied change)

use std::path::PathBuf;

use anyhow::Context;
use checkpoint::{read_checkpoint_file, Checkpoint, CheckpointStorage};
use clap::{Args, Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::info;
use wal_ingest::{run_job, JobConfig};
use wal_ingest_postgresql_source::{unique_slot_name, DataSourceConfig, PluginKind, WalPosition};

#[derive(Parser)]
#[command(name = "wal-ingest")]
#[command(about = "Incremental ingestion from PostgreSQL and openGauss logical replication slots")]
#[command(long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Stream changes of a job until interrupted
    Run(RunArgs),

    /// Inspect saved checkpoints
    Checkpoint {
        #[command(subcommand)]
        command: CheckpointCommands,
    },

    /// Print the replication slot name derived for a job
    SlotName {
        /// Database the slot belongs to
        #[arg(long)]
        database: String,

        /// Job identifier
        #[arg(long)]
        job_id: String,
    },
}

#[derive(Subcommand)]
enum CheckpointCommands {
    /// Print the saved position of a job
    Show {
        /// Job identifier
        #[arg(long)]
        job_id: String,

        /// Directory checkpoint files are written to
        #[arg(long, default_value = ".wal-ingest-checkpoints")]
        checkpoint_dir: PathBuf,
    },
}

#[derive(Args)]
struct RunArgs {
    /// TOML job file; the flags below are ignored when given
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Source connection string
    #[arg(long, env = "WAL_INGEST_CONNECTION_STRING", required_unless_present = "config")]
    connection_string: Option<String>,

    /// Job identifier, used for the checkpoint and the slot name
    #[arg(long, env = "WAL_INGEST_JOB_ID", required_unless_present = "config")]
    job_id: Option<String>,

    /// Decoding plugin (test_decoding or mppdb_decoding)
    #[arg(long, default_value = "test_decoding")]
    plugin: PluginKind,

    /// Tables to track (comma-separated); all tables of the schema when empty
    #[arg(long, value_delimiter = ',')]
    tables: Vec<String>,

    /// Schema whose table metadata is loaded
    #[arg(long, default_value = "public")]
    schema: String,

    /// Push events one by one instead of grouping them by transaction
    #[arg(long)]
    no_transaction_grouping: bool,

    /// Directory to write checkpoint files
    #[arg(long, default_value = ".wal-ingest-checkpoints")]
    checkpoint_dir: PathBuf,

    /// Write records to this file instead of stdout
    #[arg(long, value_name = "PATH")]
    output: Option<PathBuf>,
}

impl RunArgs {
    fn job_config(&self) -> anyhow::Result<JobConfig> {
        if let Some(path) = &self.config {
            return JobConfig::from_file(path);
        }

        let connection_string = self
            .connection_string
            .clone()
            .context("--connection-string is required")?;
        let job_id = self.job_id.clone().context("--job-id is required")?;

        let mut config = JobConfig::new(job_id, DataSourceConfig::standard(connection_string));
        config.plugin = self.plugin;
        config.tables = self.tables.clone();
        config.schema = self.schema.clone();
        config.decode_with_tx = !self.no_transaction_grouping;
        config.checkpoint = CheckpointStorage::Filesystem {
            dir: self.checkpoint_dir.clone(),
        };
        config.validate()?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if let Err(e) = run().await {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
    Ok(())
}

async fn run() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run(args) => {
            let config = args.job_config()?;
            let cancel = CancellationToken::new();
            {
                let cancel = cancel.clone();
                tokio::spawn(async move {
                    if tokio::signal::ctrl_c().await.is_ok() {
                        info!("Interrupted, stopping");
                        cancel.cancel();
                    }
                });
            }

            let position = match &args.output {
                Some(path) => {
                    let file = tokio::fs::OpenOptions::new()
                        .create(true)
                        .append(true)
                        .open(path)
                        .await
                        .with_context(|| format!("Failed to open output {}", path.display()))?;
                    run_job(config, tokio::io::BufWriter::new(file), cancel).await?
                }
                None => run_job(config, tokio::io::stdout(), cancel).await?,
            };
            info!("Stopped at {}", position.to_cli_string());
        }
        Commands::Checkpoint {
            command:
                CheckpointCommands::Show {
                    job_id,
                    checkpoint_dir,
                },
        } => match read_checkpoint_file(&checkpoint_dir, &job_id).await? {
            Some(file) => {
                let position: WalPosition = file.parse()?;
                println!(
                    "{}:{} (saved {})",
                    file.database_type(),
                    position.to_cli_string(),
                    file.created_at()
                );
            }
            None => anyhow::bail!(
                "No checkpoint for job '{job_id}' in {}",
                checkpoint_dir.display()
            ),
        },
        Commands::SlotName { database, job_id } => {
            println!("{}", unique_slot_name(&database, &job_id));
        }
    }

    Ok(())
}
