use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::{Arc, RwLock};

use clap::{Parser, ValueEnum};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info};

use antcache_core::{
    Compression, DurabilityConfig, DurabilityEngine, Keyspace, Sweeper,
};
use antcache_server::auth::AuthProbe;
use antcache_server::config::{self, Settings};
use antcache_server::handler::Shared;
use antcache_server::{pool, server};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Strategy {
    /// One task per accepted connection.
    PerConnection,
    /// Bounded worker pool with dynamic sizing.
    Pooled,
}

#[derive(Debug, Parser)]
#[command(name = "antcache-server", about = "In-memory key/value cache server")]
struct Args {
    /// Configuration file path.
    #[arg(long, default_value = "config.json")]
    config: PathBuf,

    /// Print the effective configuration and exit.
    #[arg(long)]
    query: bool,

    /// Snapshot file path (overrides the default cache.atd).
    #[arg(long)]
    atd: Option<PathBuf>,

    /// Command log file path (overrides the default cache.acl).
    #[arg(long)]
    acl: Option<PathBuf>,

    /// Snapshot interval override, e.g. "30m" (min 5m, max 30d).
    #[arg(long)]
    atd_interval: Option<String>,

    /// Command log sync interval override, e.g. "5s" (min 1s, max 1m).
    #[arg(long)]
    acl_interval: Option<String>,

    /// Connection dispatch strategy.
    #[arg(long, value_enum, default_value_t = Strategy::PerConnection)]
    server: Strategy,

    /// Worker count for the pooled strategy.
    #[arg(long, default_value_t = 200)]
    workers: usize,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "antcache=info".into()),
        )
        .init();

    let args = Args::parse();
    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> Result<(), Box<dyn std::error::Error>> {
    let settings = Settings::load(&args.config)?;
    if args.query {
        print!("{}", settings.describe(&args.config));
        return Ok(());
    }
    info!(config = %args.config.display(), "configuration loaded");

    let auth = AuthProbe::from_password(&settings.auth.password);
    if auth.enabled() {
        info!("authentication enabled");
    } else {
        info!("authentication disabled (no password configured)");
    }

    let mut atd_interval = settings.atd_interval();
    if let Some(ref override_str) = args.atd_interval {
        atd_interval = config::parse_duration(override_str)?
            .clamp(config::MIN_ATD_INTERVAL, config::MAX_ATD_INTERVAL);
    }
    let mut acl_interval = settings.acl_interval();
    if let Some(ref override_str) = args.acl_interval {
        acl_interval = config::parse_duration(override_str)?
            .clamp(config::MIN_ACL_INTERVAL, config::MAX_ACL_INTERVAL);
    }

    let durability_config = DurabilityConfig {
        atd_path: args.atd.unwrap_or_else(|| PathBuf::from("cache.atd")),
        acl_path: args.acl.unwrap_or_else(|| PathBuf::from("cache.acl")),
        atd_interval,
        acl_interval,
    };
    info!(
        atd = %durability_config.atd_path.display(),
        acl = %durability_config.acl_path.display(),
        atd_interval = ?durability_config.atd_interval,
        acl_interval = ?durability_config.acl_interval,
        "persistence enabled"
    );

    let engine = Arc::new(DurabilityEngine::new(durability_config)?);

    let mut keyspace = Keyspace::with_compression(Compression::new(settings.compression_config()));
    if let Some(hook) = engine.log_hook() {
        keyspace.set_journal(hook);
    }
    engine.recover(&mut keyspace)?;

    let keyspace = Arc::new(RwLock::new(keyspace));
    engine.start(keyspace.clone());
    let sweeper = Sweeper::start(keyspace.clone());

    let ctx = Arc::new(Shared {
        keyspace: keyspace.clone(),
        auth,
        engine: engine.clone(),
    });

    let addr = format!("{}:{}", settings.server.host, settings.server.port);
    let listener = TcpListener::bind(&addr).await?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    spawn_signal_listener(shutdown_tx);

    let result = match args.server {
        Strategy::PerConnection => {
            server::run_per_connection(listener, ctx, shutdown_rx).await
        }
        Strategy::Pooled => pool::run_pooled(listener, ctx, args.workers, shutdown_rx).await,
    };
    if let Err(e) = result {
        error!("server loop failed: {e}");
    }

    info!("shutting down: flushing durability state");
    engine.stop(&keyspace).await;
    sweeper.stop().await;
    info!("shutdown complete");
    Ok(())
}

/// Forwards SIGINT/SIGTERM into the shutdown channel.
fn spawn_signal_listener(shutdown: watch::Sender<bool>) {
    tokio::spawn(async move {
        let ctrl_c = tokio::signal::ctrl_c();
        #[cfg(unix)]
        {
            let mut sigterm =
                match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                    Ok(sig) => sig,
                    Err(e) => {
                        error!("failed to install SIGTERM handler: {e}");
                        let _ = ctrl_c.await;
                        let _ = shutdown.send(true);
                        return;
                    }
                };
            tokio::select! {
                _ = ctrl_c => {}
                _ = sigterm.recv() => {}
            }
        }
        #[cfg(not(unix))]
        {
            let _ = ctrl_c.await;
        }
        info!("shutdown signal received");
        let _ = shutdown.send(true);
    });
}
