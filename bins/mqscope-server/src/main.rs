mod loopback;
mod replay;

use std::sync::Arc;

use clap::Parser;
use tokio_util::sync::CancellationToken;

use mqscope_api_server::AppState;
use mqscope_config_hcl::HclParser;
use mqscope_engine::{BulkClear, EngineError, MessageStore, ScopeConfig};

use crate::loopback::LoopbackPublisher;

#[derive(Parser)]
#[command(name = "mqscope-server", about = "MQTT traffic inspector message store")]
struct Cli {
    /// Configuration file (`.toml` or `.hcl`). Built-in defaults if absent.
    #[arg(long, env = "MQSCOPE_CONFIG")]
    config: Option<String>,

    /// Decoded messages as JSON lines; `-` reads stdin.
    #[arg(long)]
    input: Option<String>,

    /// Overrides `api_port` from the configuration.
    #[arg(long, env = "MQSCOPE_PORT")]
    port: Option<u16>,
}

fn load_config(path: Option<&str>) -> Result<ScopeConfig, EngineError> {
    match path {
        Some(path) => ScopeConfig::load_with(path, &[&HclParser]),
        None => Ok(ScopeConfig::default()),
    }
}

/// Apply a re-read configuration. Existing buffers keep their limits.
fn reload(path: &str, store: &MessageStore, bulk: &BulkClear) -> Result<(), EngineError> {
    let config = ScopeConfig::load_with(path, &[&HclParser])?;
    store.set_rules(config.rule_set()?);
    bulk.set_config(config.bulk);
    Ok(())
}

async fn run_replay(input: String, store: Arc<MessageStore>, cancel: CancellationToken) {
    let result = if input == "-" {
        let reader = tokio::io::BufReader::new(tokio::io::stdin());
        replay::replay(reader, &store, &cancel).await
    } else {
        match tokio::fs::File::open(&input).await {
            Ok(file) => replay::replay(tokio::io::BufReader::new(file), &store, &cancel).await,
            Err(e) => Err(e),
        }
    };

    match result {
        Ok(count) => tracing::info!(input = %input, messages = count, "replay finished"),
        Err(e) => tracing::error!(input = %input, error = %e, "replay failed"),
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cli = Cli::parse();

    tracing::info!(config = ?cli.config, "loading configuration");
    let config = match load_config(cli.config.as_deref()) {
        Ok(c) => c,
        Err(e) => {
            tracing::error!(error = %e, "failed to load config");
            std::process::exit(1);
        }
    };

    let store = match MessageStore::from_config(&config) {
        Ok(s) => Arc::new(s),
        Err(e) => {
            tracing::error!(error = %e, "failed to build message store");
            std::process::exit(1);
        }
    };
    tracing::info!(
        rules = config.buffer_limits.len(),
        max_topics = config.bulk.max_topics,
        parallelism = config.bulk.parallelism,
        "message store ready"
    );

    let publisher = Arc::new(LoopbackPublisher::new(store.clone()));
    let bulk = Arc::new(BulkClear::new(store.clone(), publisher, config.bulk));
    let shutdown = CancellationToken::new();

    let port = cli.port.unwrap_or(config.api_port);
    let state = AppState {
        store: store.clone(),
        bulk: bulk.clone(),
        shutdown: shutdown.clone(),
    };
    let api = tokio::spawn(async move {
        if let Err(e) = mqscope_api_server::run(port, state).await {
            tracing::error!(error = %e, "api server failed");
        }
    });

    if let Some(input) = cli.input.clone() {
        tokio::spawn(run_replay(input, store.clone(), shutdown.clone()));
    }

    tracing::info!("mqscope-server started, press Ctrl+C to stop");

    // Listen for SIGHUP (config reload) and SIGINT/SIGTERM (shutdown).
    let mut sighup = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::hangup()) {
        Ok(s) => s,
        Err(e) => {
            tracing::error!(error = %e, "failed to register SIGHUP handler");
            std::process::exit(1);
        }
    };

    loop {
        tokio::select! {
            _ = sighup.recv() => {
                let Some(path) = cli.config.as_deref() else {
                    tracing::info!("SIGHUP received, no configuration file to reload");
                    continue;
                };
                tracing::info!(config = %path, "SIGHUP received, reloading configuration");
                match reload(path, &store, &bulk) {
                    Ok(()) => tracing::info!("configuration reloaded, new limits apply to new topics"),
                    Err(e) => tracing::error!(error = %e, "configuration reload failed (keeping old config)"),
                }
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("shutting down...");
                break;
            }
        }
    }

    shutdown.cancel();
    if let Err(e) = api.await {
        tracing::error!(error = %e, "api server task panicked");
    }
    let stats = store.stats();
    tracing::info!(topics = stats.topics, messages = stats.messages, "stopped");
}
