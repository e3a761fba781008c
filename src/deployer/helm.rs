use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use super::{DeployOptions, Deployer};
use crate::config::ServerConfig;
use crate::error::DeployError;
use crate::exec::{CommandRunner, Invocation};

/// Label stamped on every release this server installs.
pub const MANAGED_BY_LABEL: &str = "inspektor-gadget.io/managed-by=ig-mcp-server";

/// `helm install --wait` timeout handed to helm itself.
const INSTALL_WAIT: &str = "30s";

/// Outer deadline for helm calls; covers chart pull plus the install wait.
const HELM_DEADLINE: Duration = Duration::from_secs(120);

#[derive(Debug, Deserialize)]
struct ListedRelease {
    name: String,
}

/// [`Deployer`] backed by the `helm` CLI.
pub struct HelmDeployer {
    runner: Arc<dyn CommandRunner>,
    helm: PathBuf,
    kubeconfig: Option<PathBuf>,
}

impl HelmDeployer {
    pub fn new(config: &ServerConfig, runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            runner,
            helm: config.binaries.helm.clone(),
            kubeconfig: config.kubeconfig.clone(),
        }
    }

    fn invocation(&self) -> Invocation {
        let invocation = Invocation::new(&self.helm, HELM_DEADLINE);
        match &self.kubeconfig {
            Some(path) => invocation.arg(format!("--kubeconfig={}", path.display())),
            None => invocation,
        }
    }
}

#[async_trait]
impl Deployer for HelmDeployer {
    async fn deploy(&self, options: &DeployOptions) -> Result<(), DeployError> {
        if options.chart_url.is_empty() {
            return Err(DeployError::ChartUrlNotSet);
        }
        let release = options.release();
        let namespace = options.target_namespace();

        let mut invocation = self
            .invocation()
            .args(["install", release, options.chart_url.as_str(), "--namespace", namespace]);
        if !options.skip_namespace_creation {
            invocation = invocation.arg("--create-namespace");
        }
        invocation = invocation.args(["--wait", "--timeout", INSTALL_WAIT, "--labels", MANAGED_BY_LABEL]);
        if let Some(version) = &options.chart_version {
            invocation = invocation.args(["--version", version.as_str()]);
        }

        log::debug!(
            "Deploying gadget chart {} as {}/{}",
            options.chart_url,
            namespace,
            release
        );
        self.runner.run(&invocation).await?;
        log::info!("Deployed Inspektor Gadget release {release} in namespace {namespace}");
        Ok(())
    }

    async fn undeploy(&self, options: &DeployOptions) -> Result<(), DeployError> {
        let release = options.release();
        let namespace = options.target_namespace();

        if !self.is_deployed(options).await? {
            log::debug!("Release {release} was not deployed by this server, nothing to do");
            return Err(DeployError::NotDeployedByManager);
        }

        let invocation = self
            .invocation()
            .args(["uninstall", release, "--namespace", namespace, "--no-hooks"]);
        self.runner.run(&invocation).await?;
        log::info!("Undeployed Inspektor Gadget release {release} from namespace {namespace}");
        Ok(())
    }

    async fn is_deployed(&self, options: &DeployOptions) -> Result<bool, DeployError> {
        let release = options.release();
        let namespace = options.target_namespace();

        let filter = format!("^{release}$");
        let invocation = self.invocation().args([
            "list",
            "--namespace",
            namespace,
            "--filter",
            filter.as_str(),
            "--selector",
            MANAGED_BY_LABEL,
            "--output",
            "json",
        ]);
        let stdout = self.runner.run(&invocation).await?.into_stdout();
        let stdout = stdout.trim();
        let releases: Vec<ListedRelease> = if stdout.is_empty() {
            Vec::new()
        } else {
            serde_json::from_str(stdout)?
        };

        let deployed = releases.iter().any(|r| r.name == release);
        log::debug!("Release {release} in {namespace} managed by this server: {deployed}");
        Ok(deployed)
    }
}
