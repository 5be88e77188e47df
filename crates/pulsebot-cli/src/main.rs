mod app;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use app::App;
use pulsebot_config::PulseConfig;

#[derive(Parser)]
#[command(name = "pulsebot", about = "Scheduling and interaction-control engine")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the scheduler and the HTTP gateway
    Run {
        /// Config file (defaults to ~/.pulsebot/config.json5)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Port to listen on (overrides config)
        #[arg(short, long)]
        port: Option<u16>,
    },
    /// Process due jobs once and print the report
    Heartbeat {
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
    /// Print the persisted status of a job
    Status {
        /// Job ID (e.g. "twitter:interaction_cleanup")
        job_id: String,

        #[arg(short, long)]
        config: Option<PathBuf>,
    },
    /// Check configuration health
    Health {
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
}

fn load_config(path: Option<PathBuf>) -> anyhow::Result<PulseConfig> {
    let config = match path {
        Some(path) => pulsebot_config::load_config_from(&path)?,
        None => pulsebot_config::load_config()?,
    };
    Ok(config)
}

fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run { config, port } => {
            let config = load_config(config)?;
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(run(config, port))?;
        }
        Commands::Heartbeat { config } => {
            let config = load_config(config)?;
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(async {
                let app = App::build(config).await?;
                let report = app.scheduler.trigger_heartbeat().await;
                app.engine.flush().await;
                println!("{}", serde_json::to_string_pretty(&report)?);
                anyhow::Ok(())
            })?;
        }
        Commands::Status { job_id, config } => {
            let config = load_config(config)?;
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(async {
                let app = App::build(config).await?;
                let status = app.scheduler.get_job_status(&job_id).await;
                println!("{}", serde_json::to_string_pretty(&status)?);
                anyhow::Ok(())
            })?;
        }
        Commands::Health { config } => {
            let config = load_config(config)?;
            println!("pulsebot is healthy");
            println!("  scheduler mode: {:?}", config.scheduler.mode);
            println!("  time zone: {}", config.scheduler.time_zone);
            println!(
                "  heartbeat interval: {}ms",
                config.scheduler.heartbeat_interval_ms
            );
            println!("  plugin prefix: {}", config.interaction.plugin_prefix);
            println!("  max thread depth: {}", config.interaction.max_thread_depth);
            match config.database_path() {
                Ok(path) => println!("  database: {}", path.display()),
                Err(e) => println!("  database: unavailable ({e})"),
            }
            println!("  gateway port: {}", config.gateway.port);
        }
    }

    Ok(())
}

/// Long-running mode: heartbeat loop (single-node) plus HTTP gateway until Ctrl-C.
async fn run(config: PulseConfig, port: Option<u16>) -> anyhow::Result<()> {
    let app = App::build(config).await?;
    let cancel = CancellationToken::new();

    let heartbeat = app.scheduler.initialize(cancel.clone());

    let shutdown = cancel.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Shutting down");
                shutdown.cancel();
            }
            Err(e) => warn!("Failed to listen for Ctrl-C: {e}"),
        }
    });

    let served = pulsebot_gateway::start_gateway(
        app.scheduler.clone(),
        &app.config.gateway,
        port,
        cancel.clone(),
    )
    .await;

    cancel.cancel();
    if let Some(handle) = heartbeat {
        if let Err(e) = handle.await {
            warn!("Heartbeat loop ended abnormally: {e}");
        }
    }
    app.engine.flush().await;
    served
}
