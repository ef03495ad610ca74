use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use sqlx::postgres::{PgPool, PgPoolOptions};

mod classifier;
mod db;
mod factors;
mod generator;
mod http;
mod lifecycle;
mod models;
mod pipeline;
mod report;

use db::{PgRecordStore, RecordStore};
use lifecycle::{ModelConfig, Models};
use pipeline::AssessmentPipeline;

#[derive(Parser)]
#[command(name = "stress-assessment")]
#[command(about = "Student stress assessment service", long_about = None)]
struct Cli {
    /// Log at debug level
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Postgres URL; `serve` keeps assessments in memory when unset
    #[arg(long, env = "DATABASE_URL", global = true)]
    database_url: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create or upgrade the database schema
    InitDb,
    /// Run the assessment HTTP service
    Serve(ServeArgs),
    /// Generate a markdown monitoring report
    Report {
        #[arg(long, default_value_t = 30)]
        since_days: i64,
        #[arg(long, default_value = "report.md")]
        out: PathBuf,
    },
    /// Export monitoring data as CSV
    Export {
        #[arg(long, default_value = "monitoring.csv")]
        out: PathBuf,
    },
}

#[derive(Args)]
struct ServeArgs {
    #[arg(long, env = "STRESS_BIND", default_value = "127.0.0.1:8000")]
    bind: SocketAddr,
    /// Classifier artifact exported by the training job
    #[arg(long, env = "STRESS_MODEL_PATH", default_value = "stress_model.json")]
    model_path: PathBuf,
    #[arg(long, env = "GENERATOR_URL", default_value = "http://localhost:11434")]
    generator_url: String,
    #[arg(long, env = "GENERATOR_MODEL", default_value = "tinyllama")]
    generator_model: String,
    /// Skip loading the text generator
    #[arg(long)]
    no_generator: bool,
    /// Seconds to wait for a database connection before a save fails
    #[arg(long, env = "DATABASE_TIMEOUT_SECS", default_value_t = 5)]
    database_timeout_secs: u64,
}

async fn connect(database_url: &str) -> anyhow::Result<PgPool> {
    PgPoolOptions::new()
        .max_connections(5)
        .connect(database_url)
        .await
        .context("failed to connect to Postgres")
}

fn require_database_url(database_url: Option<&str>) -> anyhow::Result<&str> {
    database_url.context("DATABASE_URL must be set to a Postgres instance")
}

async fn serve(args: ServeArgs, database_url: Option<&str>) -> anyhow::Result<()> {
    let store = db::open_store(
        database_url,
        Duration::from_secs(args.database_timeout_secs),
    )
    .await;

    // Models load before the listener binds, so no request observes a
    // half-loaded state.
    let config = ModelConfig {
        classifier_path: args.model_path,
        generator_url: (!args.no_generator).then_some(args.generator_url),
        generator_model: args.generator_model,
    };
    let models = Arc::new(Models::load(&config).await);

    let state = Arc::new(http::AppState::new(AssessmentPipeline::new(models, store)));
    let router = http::create_router(state);

    let listener = tokio::net::TcpListener::bind(args.bind)
        .await
        .with_context(|| format!("failed to bind {}", args.bind))?;
    tracing::info!(addr = %args.bind, "listening");
    axum::serve(listener, router).await?;
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let database_url = cli.database_url.as_deref();

    match cli.command {
        Commands::InitDb => {
            let pool = connect(require_database_url(database_url)?).await?;
            db::init_db(&pool).await?;
            println!("Schema ready.");
        }
        Commands::Serve(args) => serve(args, database_url).await?,
        Commands::Report { since_days, out } => {
            let store = PgRecordStore::new(connect(require_database_url(database_url)?).await?);
            let cutoff = report::cutoff(since_days);
            let records = store.records_since(cutoff).await?;
            let markdown = report::build_report(since_days, cutoff, &records);
            std::fs::write(&out, markdown)?;
            println!("Report written to {}.", out.display());
        }
        Commands::Export { out } => {
            let store = PgRecordStore::new(connect(require_database_url(database_url)?).await?);
            let rows = store.list_all().await?;
            report::write_csv(&rows, &out)?;
            println!("Exported {} assessments to {}.", rows.len(), out.display());
        }
    }

    Ok(())
}
