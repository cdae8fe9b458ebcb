use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use callbridge_core::CallStatus;
use clap::{Parser, Subcommand};
use colored::Colorize;
use db::CallStore;
use server::config::{AppConfig, CONFIG_FILE};
use server::{create_router, state::AppState};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const RECENT_CALLS: usize = 10;

#[derive(Parser)]
#[command(name = "callbridge")]
#[command(about = "Automated phone calls driven by a voice-AI agent", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Configuration file
    #[arg(short, long, global = true, default_value = CONFIG_FILE)]
    config: PathBuf,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a default configuration file and create the database
    Init,
    /// Run the API server, webhooks and orphan reaper
    Serve {
        #[arg(short, long)]
        port: Option<u16>,
    },
    /// Show call counts and the most recent calls
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Init) => init(&cli.config).await,
        Some(Commands::Serve { port }) => serve(&cli.config, port).await,
        Some(Commands::Status) => status(&cli.config).await,
        None => serve(&cli.config, None).await,
    }
}

async fn init(config_path: &Path) -> Result<()> {
    if config_path.exists() {
        println!("Already initialized: {}", config_path.display());
        return Ok(());
    }

    let config = AppConfig::default();
    tokio::fs::write(config_path, config.to_toml()?)
        .await
        .with_context(|| format!("Failed to write {}", config_path.display()))?;

    let pool = db::create_pool(&config.server.database_url).await?;
    db::run_migrations(&pool).await?;

    println!();
    println!("Initialized Callbridge");
    println!();
    println!("Created:");
    println!("  {}", config_path.display());
    println!("  {}", config.server.database_url);
    println!();
    println!("Next steps:");
    println!("  1. Fill in the [telephony], [voice] and [analysis] credentials");
    println!("  2. Set server.public_base_url to an address the providers can reach");
    println!("  3. Run 'callbridge serve'");

    Ok(())
}

async fn serve(config_path: &Path, port: Option<u16>) -> Result<()> {
    init_tracing();

    let mut config = AppConfig::load(config_path).await?;
    if let Some(port) = port {
        config.server.port = port;
    }
    warn_missing_credentials(&config);

    tracing::info!("Database: {}", config.server.database_url);
    tracing::info!("Public base URL: {}", config.server.public_base_url);

    let state = AppState::from_config(&config).await?;
    let orchestrator = state.orchestrator.clone();
    orchestrator
        .rebuild_index()
        .await
        .context("Failed to load active calls")?;
    let reaper = orchestrator.spawn_reaper();

    let app = create_router(state);
    let address = config.bind_address();
    let listener = tokio::net::TcpListener::bind(&address)
        .await
        .with_context(|| format!("Failed to bind {}", address))?;

    println!();
    println!("Callbridge");
    println!("════════════════════════════════════════");
    println!();
    println!("  API Server:  http://{}", address);
    println!("  Swagger UI:  http://{}/swagger-ui", address);
    println!("  Webhooks:    {}/webhooks", config.server.public_base_url.trim_end_matches('/'));
    println!();
    println!("Press Ctrl+C to stop");
    println!();

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    reaper.abort();
    tracing::info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
    }
}

fn warn_missing_credentials(config: &AppConfig) {
    let checks = [
        ("telephony.account_sid", &config.telephony.account_sid),
        ("telephony.auth_token", &config.telephony.auth_token),
        ("voice.api_key", &config.voice.api_key),
        ("analysis.api_key", &config.analysis.api_key),
    ];
    for (key, value) in checks {
        if value.trim().is_empty() {
            tracing::warn!("{} is not set; calls needing it will be rejected", key);
        }
    }
}

async fn status(config_path: &Path) -> Result<()> {
    if !config_path.exists() {
        println!("No {} found.", config_path.display());
        println!("Run 'callbridge init' to initialize.");
        return Ok(());
    }

    let config = AppConfig::load(config_path).await?;
    let pool = db::create_pool(&config.server.database_url).await?;
    db::run_migrations(&pool).await?;
    let repo = db::CallRepository::new(pool);

    let counts = repo.count_by_status().await?;
    let recent = repo.list_recent(RECENT_CALLS).await?;

    println!();
    println!("Database: {}", config.server.database_url);
    println!();

    if counts.is_empty() {
        println!("No calls yet.");
        println!();
        return Ok(());
    }

    println!("Calls by status:");
    for (status, count) in &counts {
        println!("  {:<12} {}", paint(*status), count);
    }

    println!();
    println!("Most recent:");
    for call in &recent {
        println!(
            "  {} {:<12} {:<9} {} {}",
            call.created_at.format("%Y-%m-%d %H:%M"),
            paint(call.status),
            call.direction.as_str(),
            call.phone_number,
            call.id.to_string().dimmed()
        );
    }
    println!();

    Ok(())
}

fn paint(status: CallStatus) -> colored::ColoredString {
    let label = status.to_string();
    match status {
        CallStatus::Completed => label.green(),
        CallStatus::Failed => label.red(),
        CallStatus::Busy | CallStatus::NoAnswer | CallStatus::Cancelled => label.yellow(),
        CallStatus::InProgress => label.cyan(),
        CallStatus::Pending | CallStatus::Initiating | CallStatus::Ringing => label.normal(),
    }
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            "callbridge=info,server=info,orchestrator=info,providers=info,tower_http=info".into()
        }))
        .init();
}
