//! lambda-dev CLI entry point.
//!
//! Serves one bundle over HTTP and refreshes it whenever the build writes a
//! new one.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use lambda_dev_common::{BuildConfigFile, DevConfigFile, LambdaError};
use lambda_dev_core::{BundleSource, RebuildListener};
use lambda_dev_server::{AppState, BrokerConfig, BundleWatcher, DevServer, ServerConfig};

#[derive(Debug, Parser)]
#[command(name = "lambda-dev", version, about = "Run an edge-function bundle locally")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Start the development server.
    Start {
        /// Dev config (server, lambda session, storage, fetch policy).
        #[arg(short = 't', long = "dev-config", env = "LAMBDA_DEV_CONFIG")]
        dev_config: Option<PathBuf>,

        /// Build config (bundle path, external modules, watch settings).
        #[arg(short = 'r', long = "build-config", env = "LAMBDA_BUILD_CONFIG")]
        build_config: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,lambda_dev=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let result = match cli.command {
        Command::Start {
            dev_config,
            build_config,
        } => start(dev_config.as_deref(), build_config.as_deref()).await,
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("lambda-dev exited with an error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn start(dev_config: Option<&Path>, build_config: Option<&Path>) -> anyhow::Result<()> {
    let dev_path = existing(dev_config, "dev config (-t)")?;
    let build_path = existing(build_config, "build config (-r)")?;

    let dev = DevConfigFile::from_file(dev_path)
        .with_context(|| format!("Failed to load dev config '{}'", dev_path.display()))?;
    let build = BuildConfigFile::from_file(build_path)
        .with_context(|| format!("Failed to load build config '{}'", build_path.display()))?;

    let server_config = ServerConfig::from_file(&dev.server)?;
    let broker = BrokerConfig {
        runtime: dev.runtime,
        lambda: dev.lambda,
        storage: dev.storage,
        fetch: dev.fetch,
    };

    let mut source = BundleSource::new(&build.bundle);
    if let Some(dir) = &build.modules_dir {
        source = source.with_modules_dir(dir);
    }

    info!(
        bundle = %build.bundle.display(),
        bind_addr = %server_config.bind_addr,
        storage = %broker.storage.root.display(),
        "Configuration loaded"
    );

    let state = AppState::from_config(&broker, source).context("Failed to assemble the broker")?;

    let (events_tx, events_rx) = mpsc::channel(16);
    let listener = RebuildListener::new(state.cache().clone()).spawn(events_rx);

    let watcher = if build.watch.enabled {
        match BundleWatcher::spawn(
            &build.bundle,
            Duration::from_millis(build.watch.debounce_ms),
            events_tx.clone(),
        ) {
            Ok(watcher) => Some(watcher),
            Err(e) => {
                warn!(error = %e, "Bundle watching disabled");
                None
            }
        }
    } else {
        None
    };

    info!("Server initialized. Available endpoints:");
    info!("  GET  /__lambda/health     - Health check");
    info!("  GET  /__lambda/status     - Cache and artifact status");
    info!("  ANY  /*                   - Forwarded to the bundle");

    DevServer::new(state, server_config).run().await?;

    if let Some(watcher) = watcher {
        watcher.stop().await;
    }
    drop(events_tx);
    listener.await.context("Rebuild listener panicked")?;

    Ok(())
}

fn existing<'a>(path: Option<&'a Path>, what: &str) -> Result<&'a Path, LambdaError> {
    let path = path.ok_or_else(|| LambdaError::config(format!("missing {what}")))?;
    if path.exists() {
        Ok(path)
    } else {
        Err(LambdaError::config(format!(
            "{what} '{}' does not exist",
            path.display()
        )))
    }
}
