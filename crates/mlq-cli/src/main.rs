use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use mlq_config::LoadedConfig;
use mlq_db::PgQuestionStore;
use mlq_runtime::{NoopSink, ReconciliationResponse};
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "mlq")]
#[command(about = "Marketplace question reconciliation CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Database commands
    Db {
        #[command(subcommand)]
        cmd: DbCmd,
    },

    /// Compute layered config hash + print canonical JSON
    ConfigHash {
        /// Paths in merge order (base -> env -> local overrides...)
        #[arg(required = true)]
        paths: Vec<String>,
    },

    /// Config validation
    Config {
        #[command(subcommand)]
        cmd: ConfigCmd,
    },

    /// One-shot reconciliation against the database
    Reconcile {
        #[command(subcommand)]
        cmd: ReconcileCmd,

        /// Layered config paths in merge order
        #[arg(long = "config", global = true)]
        config_paths: Vec<String>,
    },
}

#[derive(Subcommand)]
enum DbCmd {
    Status,

    /// Apply SQL migrations.
    Migrate,
}

#[derive(Subcommand)]
enum ConfigCmd {
    /// Load the layered config and validate every typed section
    Check {
        #[arg(required = true)]
        paths: Vec<String>,
    },
}

#[derive(Subcommand)]
enum ReconcileCmd {
    /// Every stale question
    All,
    /// One organization
    Org { id: Uuid },
    /// One seller account
    Account { id: Uuid },
    /// One question, whatever its status
    Question { id: Uuid },
}

fn load(paths: &[String]) -> Result<LoadedConfig> {
    if paths.is_empty() {
        return Ok(LoadedConfig::empty());
    }
    let path_refs: Vec<&str> = paths.iter().map(|s| s.as_str()).collect();
    mlq_config::load_layered_yaml(&path_refs)
}

fn init_tracing() {
    // stderr keeps stdout clean for the JSON the commands print
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::from_filename(".env.local");
    init_tracing();

    let cli = Cli::parse();

    match cli.cmd {
        Commands::Db { cmd } => {
            let pool = mlq_db::connect_from_env().await?;
            match cmd {
                DbCmd::Status => {
                    let s = mlq_db::status(&pool).await?;
                    println!("db_ok={} has_questions_table={}", s.ok, s.has_questions_table);
                }
                DbCmd::Migrate => {
                    mlq_db::migrate(&pool).await?;
                    println!("migrations_applied=true");
                }
            }
        }

        Commands::ConfigHash { paths } => {
            let loaded = load(&paths)?;
            println!("config_hash={}", loaded.config_hash);
            println!("{}", loaded.canonical_json);
        }

        Commands::Config {
            cmd: ConfigCmd::Check { paths },
        } => {
            let loaded = load(&paths)?;
            let reconcile = loaded.reconciliation()?;
            let marketplace = loaded.marketplace()?;
            println!("config_hash={}", loaded.config_hash);
            println!("reconcile_ok=true");
            println!("marketplace_base_url={}", marketplace.base_url);
            println!(
                "{}",
                serde_json::to_string_pretty(&reconcile).context("serialize reconcile config")?
            );
        }

        Commands::Reconcile { cmd, config_paths } => {
            let loaded = load(&config_paths)?;
            let pool = mlq_db::connect_from_env().await?;
            let store = Arc::new(PgQuestionStore::new(pool));
            let engine = mlq_runtime::build_engine(&loaded, store, Arc::new(NoopSink))?;

            let resp: ReconciliationResponse = match cmd {
                ReconcileCmd::All => engine.reconcile_all().await,
                ReconcileCmd::Org { id } => engine.reconcile_organization(id).await,
                ReconcileCmd::Account { id } => engine.reconcile_account(id).await,
                ReconcileCmd::Question { id } => engine.reconcile_question(id).await,
            }?;

            println!(
                "{}",
                serde_json::to_string_pretty(&resp).context("serialize response")?
            );
        }
    }

    Ok(())
}
