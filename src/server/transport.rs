use anyhow::{Context, Result};
use rmcp::{
    ServiceExt,
    transport::{
        stdio,
        streamable_http_server::{StreamableHttpService, session::local::LocalSessionManager},
    },
};

use super::GadgetServer;
use crate::config::{ServerConfig, Transport};

impl GadgetServer {
    /// Serve on the configured transport until the client goes away or shutdown fires.
    pub async fn serve(self, config: &ServerConfig) -> Result<()> {
        let registry = self.registry.clone();
        let result = match config.transport {
            Transport::Stdio => self.serve_stdio().await,
            Transport::StreamableHttp => {
                self.serve_http(&config.transport_host, config.transport_port)
                    .await
            }
        };

        let running = registry.sessions().running_count();
        if running > 0 {
            log::warn!("{running} background gadgets started by this server are still running");
        }
        result
    }

    async fn serve_stdio(self) -> Result<()> {
        log::info!("Starting stdio server");

        let ct = self.shutdown.child_token();
        let service = self
            .serve_with_ct(stdio(), ct)
            .await
            .inspect_err(|e| log::error!("serving error: {e:?}"))?;
        let reason = service.waiting().await?;

        log::info!("Stdio server stopped ({reason:?})");
        Ok(())
    }

    async fn serve_http(self, host: &str, port: u16) -> Result<()> {
        let shutdown = self.shutdown.clone();
        let service = StreamableHttpService::new(
            move || Ok(self.clone()),
            LocalSessionManager::default().into(),
            Default::default(),
        );
        let router = axum::Router::new().nest_service("/mcp", service);

        let listener = tokio::net::TcpListener::bind((host, port))
            .await
            .with_context(|| format!("binding {host}:{port}"))?;
        log::info!(
            "Starting streamable-http server on http://{}/mcp",
            listener.local_addr()?
        );

        axum::serve(listener, router)
            .with_graceful_shutdown(shutdown.cancelled_owned())
            .await
            .context("streamable-http server")?;

        log::info!("Streamable-http server stopped");
        Ok(())
    }
}
