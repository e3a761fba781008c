use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use crate::config::ServerConfig;
use crate::error::ProbeError;
use crate::exec::{CommandRunner, Invocation};

/// Label carried by every gadget runtime pod.
const GADGET_POD_SELECTOR: &str = "k8s-app=gadget";

const PROBE_DEADLINE: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeploymentState {
    NotDeployed,
    Deployed { namespace: String },
}

impl DeploymentState {
    pub fn is_deployed(&self) -> bool {
        matches!(self, DeploymentState::Deployed { .. })
    }
}

/// Looks for the gadget runtime in the cluster, regardless of who installed it.
#[async_trait]
pub trait DeploymentProbe: Send + Sync {
    async fn check(&self) -> Result<DeploymentState, ProbeError>;
}

#[derive(Debug, Deserialize)]
struct PodList {
    #[serde(default)]
    items: Vec<Pod>,
}

#[derive(Debug, Deserialize)]
struct Pod {
    metadata: PodMetadata,
}

#[derive(Debug, Deserialize)]
struct PodMetadata {
    #[serde(default)]
    namespace: String,
}

/// [`DeploymentProbe`] that lists runtime pods with `kubectl`.
pub struct KubectlProbe {
    runner: Arc<dyn CommandRunner>,
    kubectl: PathBuf,
    kubeconfig: Option<PathBuf>,
}

impl KubectlProbe {
    pub fn new(config: &ServerConfig, runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            runner,
            kubectl: config.binaries.kubectl.clone(),
            kubeconfig: config.kubeconfig.clone(),
        }
    }
}

#[async_trait]
impl DeploymentProbe for KubectlProbe {
    async fn check(&self) -> Result<DeploymentState, ProbeError> {
        let mut invocation = Invocation::new(&self.kubectl, PROBE_DEADLINE);
        if let Some(path) = &self.kubeconfig {
            invocation = invocation.arg(format!("--kubeconfig={}", path.display()));
        }
        let invocation = invocation.args([
            "get",
            "pods",
            "--all-namespaces",
            "--selector",
            GADGET_POD_SELECTOR,
            "--output",
            "json",
        ]);

        let stdout = self.runner.run(&invocation).await?.into_stdout();
        state_from_pod_list(&stdout)
    }
}

fn state_from_pod_list(json: &str) -> Result<DeploymentState, ProbeError> {
    let pods: PodList = serde_json::from_str(json)?;
    let namespaces: BTreeSet<String> = pods
        .items
        .into_iter()
        .map(|p| p.metadata.namespace)
        .collect();

    let mut namespaces = namespaces.into_iter();
    match (namespaces.next(), namespaces.next()) {
        (None, _) => Ok(DeploymentState::NotDeployed),
        (Some(namespace), None) => Ok(DeploymentState::Deployed { namespace }),
        (Some(first), Some(second)) => {
            let mut all = vec![first, second];
            all.extend(namespaces);
            Err(ProbeError::AmbiguousNamespaces(all))
        }
    }
}
