use anyhow::{Context, bail};
use clap::{Parser, ValueEnum};
use std::path::PathBuf;

use super::images::{load_image_list, merge_images};
use crate::config::{
    Binaries, ChartDefaults, DEFAULT_ARTIFACTHUB_URL, DEFAULT_CHART_URL, Environment,
    ServerConfig, Transport, resolve_program,
};
use crate::discoverer::DiscovererOptions;

/// Inspektor Gadget MCP server - exposes eBPF gadgets as tools for AI agents
///
/// Each gadget image becomes one tool whose parameters come from the gadget's
/// own metadata. Images are given inline, loaded from a JSON list, or discovered
/// from ArtifactHub.
#[derive(Parser, Debug)]
#[command(name = "gadget-mcp")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Transport the MCP server listens on
    #[arg(long, value_enum, env = "GADGET_MCP_TRANSPORT", default_value_t = Transport::Stdio)]
    pub transport: Transport,

    /// Host for the streamable-http transport
    #[arg(long, value_name = "HOST", default_value = "localhost")]
    pub transport_host: String,

    /// Port for the streamable-http transport
    #[arg(long, value_name = "PORT", default_value_t = 8080)]
    pub transport_port: u16,

    /// Environment the gadgets run against
    #[arg(long, value_enum, env = "GADGET_MCP_ENVIRONMENT", default_value_t = Environment::Kubernetes)]
    pub environment: Environment,

    /// Address of a remote gadget daemon (linux environment only)
    ///
    /// Example: --linux-remote-address tcp://10.0.0.5:1234
    #[arg(long, value_name = "ADDR")]
    pub linux_remote_address: Option<String>,

    /// Gadget images to expose (comma-separated)
    ///
    /// Example: --gadget-images trace_open:latest,trace_dns:latest
    #[arg(long, value_delimiter = ',', value_name = "IMAGES")]
    pub gadget_images: Vec<String>,

    /// JSON image list: a file path or the name of a bundled list
    ///
    /// JSON format:
    /// ```json
    /// { "images": ["ghcr.io/inspektor-gadget/gadget/trace_open:latest"] }
    /// ```
    ///
    /// Example: --gadget-images-file default
    #[arg(long, value_name = "SPEC")]
    pub gadget_images_file: Option<String>,

    /// Discover gadget images from a registry (used only without explicit images)
    #[arg(long, value_name = "SOURCE")]
    pub gadget_discoverer: Option<String>,

    /// Include ArtifactHub packages without an official, CNCF or verified publisher marker
    #[arg(long)]
    pub artifacthub_all: bool,

    /// ArtifactHub base URL
    #[arg(long, value_name = "URL", default_value = DEFAULT_ARTIFACTHUB_URL)]
    pub artifacthub_url: String,

    /// Kubeconfig forwarded to kubectl, helm and the gadget CLI
    #[arg(long, value_name = "PATH", env = "KUBECONFIG")]
    pub kubeconfig: Option<PathBuf>,

    /// Gadget CLI binary (defaults to kubectl-gadget or gadgetctl by environment)
    #[arg(long, value_name = "PATH")]
    pub gadget_binary: Option<String>,

    /// Helm binary
    #[arg(long, value_name = "PATH", default_value = "helm")]
    pub helm_binary: String,

    /// Kubectl binary
    #[arg(long, value_name = "PATH", default_value = "kubectl")]
    pub kubectl_binary: String,

    /// Helm chart deployed by deploy_inspektor_gadget
    #[arg(long, value_name = "URL", env = "GADGET_MCP_CHART_URL", default_value = DEFAULT_CHART_URL)]
    pub chart_url: String,

    /// Log level; RUST_LOG applies when unset
    #[arg(long, value_enum, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl From<LogLevel> for log::LevelFilter {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Debug => log::LevelFilter::Debug,
            LogLevel::Info => log::LevelFilter::Info,
            LogLevel::Warn => log::LevelFilter::Warn,
            LogLevel::Error => log::LevelFilter::Error,
        }
    }
}

/// Where the gadget images come from.
#[derive(Debug, Clone)]
pub enum ImageSource {
    Static(Vec<String>),
    Discover {
        source: String,
        options: DiscovererOptions,
    },
}

impl Cli {
    /// Validate flag combinations and build the server configuration.
    pub fn server_config(&self) -> anyhow::Result<ServerConfig> {
        if self.linux_remote_address.is_some() && self.environment != Environment::Linux {
            bail!("--linux-remote-address is only supported with --environment linux");
        }

        let gadget = self
            .gadget_binary
            .as_deref()
            .unwrap_or(self.environment.default_gadget_binary());

        Ok(ServerConfig {
            transport: self.transport,
            transport_host: self.transport_host.clone(),
            transport_port: self.transport_port,
            environment: self.environment,
            linux_remote_address: self.linux_remote_address.clone(),
            kubeconfig: self.kubeconfig.clone(),
            binaries: Binaries {
                gadget: resolve_program(gadget),
                helm: resolve_program(&self.helm_binary),
                kubectl: resolve_program(&self.kubectl_binary),
            },
            chart: ChartDefaults {
                chart_url: self.chart_url.clone(),
                ..ChartDefaults::default()
            },
        })
    }

    /// Resolve where images come from. Inline and file lists win over discovery.
    pub async fn image_source(&self) -> anyhow::Result<ImageSource> {
        if !self.gadget_images.is_empty() || self.gadget_images_file.is_some() {
            let mut images = self.gadget_images.clone();
            if let Some(spec) = &self.gadget_images_file {
                let listed = load_image_list(spec)
                    .await
                    .with_context(|| format!("loading --gadget-images-file {spec}"))?;
                images.extend(listed);
            }
            let images = merge_images(images);
            if images.is_empty() {
                bail!("the configured gadget image sources are empty");
            }
            return Ok(ImageSource::Static(images));
        }

        if let Some(source) = &self.gadget_discoverer {
            return Ok(ImageSource::Discover {
                source: source.clone(),
                options: DiscovererOptions {
                    base_url: self.artifacthub_url.clone(),
                    include_unofficial: self.artifacthub_all,
                },
            });
        }

        bail!(
            "no gadget image source configured: use --gadget-images, --gadget-images-file or --gadget-discoverer"
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        let mut argv = vec!["gadget-mcp"];
        argv.extend_from_slice(args);
        Cli::try_parse_from(argv).unwrap()
    }

    #[test]
    fn test_defaults() {
        let cli = parse(&["--gadget-images", "trace_open"]);
        assert_eq!(cli.transport, Transport::Stdio);
        assert_eq!(cli.environment, Environment::Kubernetes);
        assert_eq!(cli.transport_port, 8080);
        assert_eq!(cli.chart_url, DEFAULT_CHART_URL);
        assert!(cli.log_level.is_none());
    }

    #[test]
    fn test_remote_address_requires_linux() {
        let cli = parse(&["--linux-remote-address", "tcp://10.0.0.5:1234"]);
        assert!(cli.server_config().is_err());

        let cli = parse(&[
            "--environment",
            "linux",
            "--linux-remote-address",
            "tcp://10.0.0.5:1234",
        ]);
        let config = cli.server_config().unwrap();
        assert_eq!(config.linux_remote_address.as_deref(), Some("tcp://10.0.0.5:1234"));
    }

    #[test]
    fn test_gadget_binary_follows_environment() {
        let cli = parse(&["--environment", "linux", "--gadget-binary", "/opt/bin/gadgetctl"]);
        let config = cli.server_config().unwrap();
        assert_eq!(config.binaries.gadget, PathBuf::from("/opt/bin/gadgetctl"));
    }

    #[test]
    fn test_invalid_values_rejected() {
        assert!(Cli::try_parse_from(["gadget-mcp", "--log-level", "verbose"]).is_err());
        assert!(Cli::try_parse_from(["gadget-mcp", "--transport", "sse"]).is_err());
        assert!(Cli::try_parse_from(["gadget-mcp", "--environment", "windows"]).is_err());
    }

    #[tokio::test]
    async fn test_inline_and_bundled_images_merge() {
        let cli = parse(&[
            "--gadget-images",
            "custom_gadget,trace_open",
            "--gadget-images-file",
            "default",
            "--gadget-discoverer",
            "artifacthub",
        ]);

        let ImageSource::Static(images) = cli.image_source().await.unwrap() else {
            panic!("expected static images");
        };
        assert_eq!(images[0], "custom_gadget");
        assert_eq!(images[1], "trace_open");
        assert!(images.len() > 2);
    }

    #[tokio::test]
    async fn test_discoverer_used_without_lists() {
        let cli = parse(&["--gadget-discoverer", "artifacthub", "--artifacthub-all"]);
        let source = cli.image_source().await.unwrap();
        assert!(matches!(
            source,
            ImageSource::Discover { ref source, ref options }
                if source == "artifacthub" && options.include_unofficial
        ));
    }

    #[tokio::test]
    async fn test_no_image_source_is_fatal() {
        let cli = parse(&[]);
        let err = cli.image_source().await.unwrap_err();
        assert!(err.to_string().contains("no gadget image source"));
    }
}
