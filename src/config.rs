//! Runtime configuration threaded through component constructors.
//!
//! `ServerConfig` is built once from the command line (see `cli::Cli::server_config`)
//! and handed to everything that needs it. Fixed operational limits live here as
//! constants so tests and production share the same numbers.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use clap::ValueEnum;

/// Maximum number of gadget metadata fetches in flight at once.
pub const MAX_CONCURRENT_INFO_FETCHES: usize = 8;

/// Timeout applied to a foreground gadget run when the caller passes none.
pub const DEFAULT_RUN_TIMEOUT: Duration = Duration::from_secs(10);

/// Longest foreground run a caller may ask for.
pub const MAX_RUN_TIMEOUT: Duration = Duration::from_secs(24 * 60 * 60);

/// How long `get-results` listens to a background session before returning.
pub const RESULTS_FETCH_DEADLINE: Duration = Duration::from_secs(5);

/// Pause between a successful deploy and the first readiness check.
pub const POST_DEPLOY_SETTLE: Duration = Duration::from_secs(10);

/// Upper bound on waiting for the runtime to report ready after a deploy.
pub const POST_DEPLOY_MAX_WAIT: Duration = Duration::from_secs(60);

/// Ceiling, in bytes, for any text returned to a caller.
pub const MAX_RESULT_LEN: usize = 64 * 1024;

pub const DEFAULT_CHART_URL: &str = "oci://ghcr.io/inspektor-gadget/inspektor-gadget/charts/gadget";
pub const DEFAULT_RELEASE_NAME: &str = "gadget";
pub const DEFAULT_NAMESPACE: &str = "gadget";

pub const DEFAULT_ARTIFACTHUB_URL: &str = "https://artifacthub.io";

/// Target system the gadgets run against. Fixed for the process lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Environment {
    Kubernetes,
    Linux,
}

impl Environment {
    /// Whether the gadget runtime has to be installed before gadgets can be used.
    pub fn requires_deployment(self) -> bool {
        matches!(self, Environment::Kubernetes)
    }

    /// Default name of the gadget CLI for this environment.
    pub fn default_gadget_binary(self) -> &'static str {
        match self {
            Environment::Kubernetes => "kubectl-gadget",
            Environment::Linux => "gadgetctl",
        }
    }

    pub fn display_name(self) -> &'static str {
        match self {
            Environment::Kubernetes => "Kubernetes",
            Environment::Linux => "Linux",
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

/// Transport the MCP server listens on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Transport {
    Stdio,
    StreamableHttp,
}

impl fmt::Display for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Transport::Stdio => f.write_str("stdio"),
            Transport::StreamableHttp => f.write_str("streamable-http"),
        }
    }
}

/// Paths of the external command line tools the server drives.
#[derive(Debug, Clone)]
pub struct Binaries {
    /// Gadget CLI (`kubectl-gadget` or `gadgetctl`)
    pub gadget: PathBuf,
    pub helm: PathBuf,
    pub kubectl: PathBuf,
}

/// Defaults used by the deploy and undeploy tools.
#[derive(Debug, Clone)]
pub struct ChartDefaults {
    pub chart_url: String,
    pub release_name: String,
    pub namespace: String,
}

impl Default for ChartDefaults {
    fn default() -> Self {
        Self {
            chart_url: DEFAULT_CHART_URL.to_string(),
            release_name: DEFAULT_RELEASE_NAME.to_string(),
            namespace: DEFAULT_NAMESPACE.to_string(),
        }
    }
}

/// Server configuration built from the command line.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub transport: Transport,
    pub transport_host: String,
    pub transport_port: u16,
    pub environment: Environment,
    /// gRPC address of a remote gadget daemon (linux environment only)
    pub linux_remote_address: Option<String>,
    /// Kubeconfig forwarded to kubectl, helm and the gadget CLI
    pub kubeconfig: Option<PathBuf>,
    pub binaries: Binaries,
    pub chart: ChartDefaults,
}

impl ServerConfig {
    /// Configuration suitable for unit tests: kubernetes, stdio, bare program names.
    #[cfg(test)]
    pub fn for_tests(environment: Environment) -> Self {
        Self {
            transport: Transport::Stdio,
            transport_host: "localhost".to_string(),
            transport_port: 8080,
            environment,
            linux_remote_address: None,
            kubeconfig: None,
            binaries: Binaries {
                gadget: PathBuf::from(environment.default_gadget_binary()),
                helm: PathBuf::from("helm"),
                kubectl: PathBuf::from("kubectl"),
            },
            chart: ChartDefaults::default(),
        }
    }
}

/// Resolve a program name through `PATH`, falling back to the bare name so the
/// eventual spawn error names the missing program.
pub fn resolve_program(name: &str) -> PathBuf {
    which::which(name).unwrap_or_else(|_| PathBuf::from(name))
}
