use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;

mod cli;
mod config;
mod deployer;
mod discoverer;
mod embedded;
mod error;
mod exec;
mod gadget;
mod registry;
mod server;
#[cfg(test)]
mod testing;

use cli::{Cli, ImageSource};
use config::ServerConfig;
use deployer::{Deployer, KubectlProbe};
use exec::{CommandRunner, TokioCommandRunner};
use gadget::CliGadgetClient;
use registry::GadgetToolRegistry;
use server::GadgetServer;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Logs go to stderr; stdout carries protocol frames on the stdio transport
    let mut logger =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"));
    if let Some(level) = cli.log_level {
        logger.filter_level(level.into());
    }
    logger.target(env_logger::Target::Stderr).init();

    let config = cli.server_config()?;
    let images = resolve_images(&cli).await?;
    log::info!(
        "Serving {} gadget images for the {} environment over {}",
        images.len(),
        config.environment,
        config.transport
    );

    let shutdown_token = tokio_util::sync::CancellationToken::new();

    let signal_token = shutdown_token.clone();
    tokio::spawn(async move {
        wait_for_interrupt().await;
        log::debug!("Received interrupt signal, shutting down");
        signal_token.cancel();
    });

    let registry = build_registry(&config, shutdown_token.clone());
    let server = GadgetServer::new(registry.clone(), shutdown_token.clone());

    tokio::select! {
        () = registry.prepare(images) => {}
        () = shutdown_token.cancelled() => {
            log::info!("Interrupted during startup");
            return Ok(());
        }
    }

    server.serve(&config).await
}

async fn resolve_images(cli: &Cli) -> Result<Vec<String>> {
    match cli.image_source().await? {
        ImageSource::Static(images) => Ok(images),
        ImageSource::Discover { source, options } => {
            let discoverer = discoverer::new(&source, options)
                .with_context(|| format!("--gadget-discoverer {source}"))?;
            let images = discoverer
                .list_images()
                .await
                .with_context(|| format!("listing gadget images from {source}"))?;
            log::info!("Discovered {} gadget images from {source}", images.len());
            Ok(images)
        }
    }
}

fn build_registry(
    config: &ServerConfig,
    shutdown: tokio_util::sync::CancellationToken,
) -> GadgetToolRegistry {
    let runner: Arc<dyn CommandRunner> = Arc::new(TokioCommandRunner);
    let client = Arc::new(CliGadgetClient::new(config, runner.clone()));
    let probe = Arc::new(KubectlProbe::new(config, runner.clone()));
    let deployer: Option<Arc<dyn Deployer>> = match deployer::new_deployer(config, runner) {
        Ok(deployer) => Some(deployer),
        Err(e) => {
            log::debug!("Deployment tools unavailable: {e}");
            None
        }
    };
    GadgetToolRegistry::new(config, client, probe, deployer, shutdown)
}

/// Wait for interrupt signal (cross-platform)
#[cfg(unix)]
async fn wait_for_interrupt() {
    use tokio::signal::unix::{SignalKind, signal};

    let mut sigterm_result = signal(SignalKind::terminate());
    let mut sigint_result = signal(SignalKind::interrupt());

    match (sigterm_result.as_mut(), sigint_result.as_mut()) {
        (Ok(sigterm), Ok(sigint)) => {
            tokio::select! {
                _ = sigterm.recv() => {}
                _ = sigint.recv() => {}
            }
        }
        (Ok(sigterm), Err(_)) => {
            let _ = sigterm.recv().await;
        }
        (Err(_), Ok(sigint)) => {
            let _ = sigint.recv().await;
        }
        (Err(_), Err(_)) => {
            let () = std::future::pending().await;
        }
    }
}

/// Wait for interrupt signal (cross-platform)
#[cfg(windows)]
async fn wait_for_interrupt() {
    use tokio::signal::windows;

    match windows::ctrl_c() {
        Ok(mut ctrl_c) => {
            let _ = ctrl_c.recv().await;
        }
        Err(_) => {
            let () = std::future::pending().await;
        }
    }
}
