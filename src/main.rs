use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::sync::Arc;
use tokio::signal;
use tokio::sync::watch;
use tokio::time::Duration;
use tracing::{error, info};

use pressclip::api::{self, AppState};
use pressclip::db::Database;
use pressclip::environment::Config;
use pressclip::ingest::Ingestor;
use pressclip::poller::{wait_for_terminal, PollOptions};
use pressclip::runs::RunCoordinator;
use pressclip::scoring::AuthorityTable;
use pressclip::search::{SearchClient, SerpApiProvider};
use pressclip::worker::Worker;
use pressclip::{logging, TARGET_WORKER};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// SQLite database path (overrides DATABASE_PATH)
    #[arg(long, global = true)]
    database: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve the HTTP API
    Serve {
        /// Listen port (overrides PORT)
        #[arg(short, long)]
        port: Option<u16>,

        /// Also run a worker loop in this process
        #[arg(long)]
        with_worker: bool,
    },

    /// Poll for queued runs and execute them
    Worker {
        /// Name used in log lines
        #[arg(short, long, default_value = "worker-1")]
        name: String,
    },

    /// Queue a refresh for a client
    Refresh {
        client_id: String,

        /// Wait for the run to finish and print its final state
        #[arg(short, long)]
        wait: bool,

        /// Give up waiting after this many seconds
        #[arg(long, default_value = "300")]
        timeout_secs: u64,
    },

    /// Show a run's status
    Status { run_id: String },

    /// Cancel a queued or running run
    Cancel { run_id: String },

    /// Create a client
    AddClient {
        #[arg(short, long)]
        org_id: String,

        #[arg(short, long)]
        name: String,

        #[arg(short, long)]
        description: Option<String>,
    },

    /// Add a search-term alert to a client
    AddAlert {
        client_id: String,

        #[arg(short, long)]
        query: String,

        #[arg(short, long)]
        label: Option<String>,
    },
}

fn build_ingestor(config: &Config, db: &Database) -> Result<Ingestor> {
    let authority = match &config.authority_table_path {
        Some(path) => AuthorityTable::from_json_file(path)?,
        None => AuthorityTable::default(),
    };
    let provider = SerpApiProvider::new(config.serpapi_settings()?)?;
    let search = SearchClient::new(Arc::new(provider), Arc::new(authority))
        .with_max_pages(config.search_max_pages);
    Ok(Ingestor::new(db.clone(), search))
}

fn shutdown_channel() -> watch::Receiver<bool> {
    let (cancel_tx, cancel_rx) = watch::channel(false);
    tokio::spawn(async move {
        if signal::ctrl_c().await.is_err() {
            error!("Failed to listen for ctrl-c");
        }
        info!(target: TARGET_WORKER, "Shutdown requested");
        let _ = cancel_tx.send(true);
    });
    cancel_rx
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut config = Config::from_env()?;
    if let Some(database) = cli.database {
        config.database_path = database;
    }

    logging::configure_logging(&config.log_dir);

    let db = Database::new(&config.database_path)
        .await
        .with_context(|| format!("Failed to open database {}", config.database_path))?;
    let coordinator = RunCoordinator::new(db.clone());

    match cli.command {
        Commands::Serve { port, with_worker } => {
            if with_worker {
                let worker = Worker::new("api-worker", coordinator.clone(), build_ingestor(&config, &db)?)
                    .with_poll_interval(config.poll_interval);
                let shutdown = shutdown_channel();
                tokio::spawn(async move { worker.run(shutdown).await });
            }
            api::serve(AppState::new(db), port.unwrap_or(config.port)).await?;
        }
        Commands::Worker { name } => {
            let worker = Worker::new(name, coordinator, build_ingestor(&config, &db)?)
                .with_poll_interval(config.poll_interval);
            worker.run(shutdown_channel()).await;
        }
        Commands::Refresh {
            client_id,
            wait,
            timeout_secs,
        } => {
            let run = coordinator.enqueue(&client_id).await?;
            println!("Queued run {}", run.id);
            if wait {
                let options = PollOptions {
                    timeout: Duration::from_secs(timeout_secs),
                    ..Default::default()
                };
                let finished = wait_for_terminal(&coordinator, &run.id, options).await?;
                print_json(&finished)?;
            }
        }
        Commands::Status { run_id } => {
            print_json(&coordinator.status(&run_id).await?)?;
        }
        Commands::Cancel { run_id } => {
            print_json(&coordinator.cancel(&run_id).await?)?;
        }
        Commands::AddClient {
            org_id,
            name,
            description,
        } => {
            let client = db.create_client(org_id.trim(), name.trim(), description.as_deref()).await?;
            print_json(&client)?;
        }
        Commands::AddAlert {
            client_id,
            query,
            label,
        } => {
            let query = query.trim();
            anyhow::ensure!(!query.is_empty(), "Search term is required");
            anyhow::ensure!(db.get_client(&client_id).await?.is_some(), "Client not found: {}", client_id);
            let label = label.as_deref().map(str::trim).filter(|l| !l.is_empty());
            print_json(&db.add_alert(&client_id, query, label).await?)?;
        }
    }

    Ok(())
}
