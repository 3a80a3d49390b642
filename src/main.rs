//! Model Manager - Main entry point

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use model_manager::{
    CancelToken, LocalModelView, Registry, api, config::ManagerConfig, metrics,
};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;

#[derive(Parser, Debug)]
#[command(name = "model-manager")]
#[command(about = "Local model catalog, download and activation manager", long_about = None)]
#[command(version)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Override API port
    #[arg(long)]
    port: Option<u16>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", global = true)]
    log_level: String,

    /// Log format (json or pretty)
    #[arg(long, default_value = "json", global = true)]
    log_format: String,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the REST API (default)
    Serve,
    /// List catalog models for a pipeline; '*' marks downloaded ones
    List {
        #[arg(long)]
        pipeline: String,
        /// Bypass the local cache
        #[arg(long)]
        refresh: bool,
    },
    /// Download one model, or every model of a pipeline with --all
    Download {
        id: Option<String>,
        #[arg(long, requires = "pipeline", conflicts_with = "id")]
        all: bool,
        #[arg(long)]
        pipeline: Option<String>,
        /// Re-download models that are already present
        #[arg(long)]
        force: bool,
    },
    /// Set the active model and load it into the inference backend
    Use { id: String },
    /// Show downloaded models
    Local,
    /// Show the active model with its path and version
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging; stdout is reserved for command output
    match cli.log_format.as_str() {
        "pretty" => {
            tracing_subscriber::fmt()
                .with_env_filter(&cli.log_level)
                .with_writer(std::io::stderr)
                .init();
        }
        _ => {
            tracing_subscriber::fmt()
                .with_env_filter(&cli.log_level)
                .with_writer(std::io::stderr)
                .json()
                .init();
        }
    }

    // Load configuration
    let mut config = ManagerConfig::load(cli.config)?;

    // CLI overrides
    if let Some(port) = cli.port {
        config.api_port = port;
    }

    config.validate()?;

    tracing::info!(
        api_port = config.api_port,
        hub = %config.hub_endpoint,
        models_dir = ?config.models_dir,
        state_file = ?config.state_file,
        cache_file = ?config.cache_file,
        "Configuration loaded"
    );

    let registry = Arc::new(Registry::from_config(&config)?);

    match cli.command {
        None | Some(Commands::Serve) => serve(config, registry).await,
        Some(Commands::List { pipeline, refresh }) => list(&registry, &pipeline, refresh).await,
        Some(Commands::Download {
            id,
            all,
            pipeline,
            force,
        }) => download(&registry, id, all, pipeline, force).await,
        Some(Commands::Use { id }) => {
            let view = registry.activate(&id).await?;
            println!("Active model: {} ({})", view.record.id, view.record.local_path.display());
            Ok(())
        }
        Some(Commands::Local) => {
            for view in registry.local_models().await? {
                let marker = if view.active { "*" } else { " " };
                println!(
                    "{} {:<50} {:<42} {}",
                    marker,
                    view.record.id,
                    view.record.version,
                    view.record.downloaded_at.format("%Y-%m-%d %H:%M")
                );
            }
            Ok(())
        }
        Some(Commands::Status) => {
            let active = registry.active_model().await?;
            println!("{}", status_report(active.as_ref()));
            Ok(())
        }
    }
}

fn status_report(active: Option<&LocalModelView>) -> String {
    match active {
        Some(view) => format!(
            "Active model:  {}\nPath:          {}\nVersion:       {}\nDownloaded at: {}",
            view.record.id,
            view.record.local_path.display(),
            view.record.version,
            view.record.downloaded_at.format("%Y-%m-%d %H:%M:%S UTC")
        ),
        None => "No active model".to_string(),
    }
}

async fn serve(config: ManagerConfig, registry: Arc<Registry>) -> Result<()> {
    tracing::info!("Starting Model Manager");

    // Setup metrics
    let prometheus_handle = metrics::setup_metrics()?;

    if let Ok(local) = registry.local_models().await {
        metrics::update_local_model_count(local.len());
    }

    let app_state = api::AppState {
        registry,
        prometheus_handle,
    };

    let app = api::create_router(app_state);

    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], config.api_port));
    tracing::info!(addr = %addr, "Starting API server");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("Failed to bind API server")?;

    // Graceful shutdown
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("API server error")?;

    tracing::info!("Shutdown complete");

    Ok(())
}

async fn list(registry: &Registry, pipeline: &str, refresh: bool) -> Result<()> {
    let entries = registry.list_models(pipeline, refresh).await?;
    let local = registry.local_models().await?;

    println!("{:<60} {:<26} DOWNLOADS", "MODEL ID", "LAST MODIFIED");
    for entry in entries {
        let marker = if local.iter().any(|v| v.record.id == entry.id) {
            "*"
        } else {
            ""
        };
        println!(
            "{:<60} {:<26} {}",
            format!("{}{}", entry.id, marker),
            entry.last_modified,
            entry.downloads
        );
    }
    Ok(())
}

async fn download(
    registry: &Registry,
    id: Option<String>,
    all: bool,
    pipeline: Option<String>,
    force: bool,
) -> Result<()> {
    if all {
        let pipeline = pipeline.context("--all requires --pipeline")?;
        let report = registry.download_pipeline(&pipeline, force).await?;
        for id in &report.skipped {
            println!("Skipping {id}, already downloaded");
        }
        for id in &report.downloaded {
            println!("Downloaded {id}");
        }
        if let Some(failure) = report.failed {
            anyhow::bail!("Download of {} failed: {}", failure.id, failure.error);
        }
        return Ok(());
    }

    let id = id.context("Pass a model id or --all --pipeline <pipeline>")?;
    if !force && registry.local_models().await?.iter().any(|v| v.record.id == id) {
        println!("Skipping {id}, already downloaded (use --force to fetch again)");
        return Ok(());
    }

    let mut on_progress = |done: usize, total: usize| {
        println!("[{done}/{total}] {id}");
    };
    let view = registry
        .download(&id, &mut on_progress, &CancelToken::new())
        .await?;
    println!("Downloaded {} at {}", view.record.id, view.record.version);
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C signal");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM signal");
        },
    }
}
