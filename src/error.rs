//! Error types shared across the server.
//!
//! Discovery-time errors are logged and contained by the registry. Invocation-time
//! errors surface to the caller as tool-level error results via [`ToolCallError`].

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Failure running an external command line tool.
#[derive(Debug, Error)]
pub enum CommandError {
    #[error("failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("i/o error talking to {program}: {source}")]
    Io {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{program} exited with {}: {stderr}", exit_code.map_or_else(|| "signal".to_string(), |c| format!("code {c}")))]
    Failed {
        program: String,
        exit_code: Option<i32>,
        stderr: String,
    },

    #[error("{program} did not finish within {deadline:?}")]
    TimedOut { program: String, deadline: Duration },
}

/// Failure talking to the gadget runtime.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error(transparent)]
    Command(#[from] CommandError),

    #[error("decoding gadget info: {0}")]
    Decode(#[from] serde_json::Error),

    #[error(transparent)]
    Descriptor(#[from] DescriptorError),
}

/// Gadget metadata could not be turned into a descriptor.
#[derive(Debug, Error)]
pub enum DescriptorError {
    #[error("unmarshalling gadget metadata: {0}")]
    Metadata(#[from] serde_yaml::Error),

    #[error("gadget metadata for {image} has no name")]
    MissingName { image: String },

    #[error("rendering tool description for {image}: {source}")]
    Template {
        image: String,
        #[source]
        source: minijinja::Error,
    },
}

/// Failure managing the runtime deployment.
#[derive(Debug, Error)]
pub enum DeployError {
    #[error("chart URL not set")]
    ChartUrlNotSet,

    #[error("not deployed by this manager")]
    NotDeployedByManager,

    #[error("deployment is not supported in the {0} environment")]
    UnsupportedEnvironment(String),

    #[error(transparent)]
    Command(#[from] CommandError),

    #[error("decoding helm output: {0}")]
    Decode(#[from] serde_json::Error),
}

/// Failure checking whether the runtime is present in the cluster.
#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("multiple namespaces found for Inspektor Gadget pods: {}", .0.join(", "))]
    AmbiguousNamespaces(Vec<String>),

    #[error("getting pods: {0}")]
    Command(#[from] CommandError),

    #[error("decoding pod list: {0}")]
    Decode(#[from] serde_json::Error),
}

/// Failure enumerating gadget images.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("unknown source: {0}")]
    UnknownSource(String),

    #[error("fetching {url}: {source}")]
    Http {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("unexpected status code from {url}: {status}")]
    Status { url: String, status: u16 },

    #[error("no container images found for package {0}")]
    NoImages(String),
}

/// Failure loading an image list file.
#[derive(Debug, Error)]
pub enum ImageListError {
    #[error("image list file not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("bundled image list '{name}' not found (available: {})", available.join(", "))]
    UnknownBundled { name: String, available: Vec<String> },

    #[error("reading image list {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("parsing image list {name}: {source}")]
    Parse {
        name: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Error returned to the caller of a tool. Rendered as a tool-level error
/// result, never as a protocol fault.
#[derive(Debug, Error)]
pub enum ToolCallError {
    #[error("{0}")]
    InvalidArgument(String),

    #[error("running gadget {image}: {source}")]
    Run {
        image: String,
        #[source]
        source: ClientError,
    },

    #[error("starting gadget {image} in background: {source}")]
    RunDetached {
        image: String,
        #[source]
        source: ClientError,
    },

    #[error("attaching to gadget {id}: {source}")]
    Results {
        id: String,
        #[source]
        source: ClientError,
    },

    #[error("failed to stop gadget with id {id:?}: {source}")]
    Stop {
        id: String,
        #[source]
        source: ClientError,
    },

    #[error(transparent)]
    Deploy(#[from] DeployError),

    #[error(transparent)]
    Probe(#[from] ProbeError),

    #[error("Inspektor Gadget is not deployed")]
    NotDeployed,

    #[error("operation cancelled")]
    Cancelled,
}
