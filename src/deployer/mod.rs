//! Installing and removing the gadget runtime, and checking whether it is present.

mod helm;
mod probe;

pub use helm::HelmDeployer;
pub use probe::{DeploymentProbe, DeploymentState, KubectlProbe};

use std::sync::Arc;

use async_trait::async_trait;

use crate::config::{ChartDefaults, DEFAULT_NAMESPACE, DEFAULT_RELEASE_NAME, Environment, ServerConfig};
use crate::error::DeployError;
use crate::exec::CommandRunner;

/// Parameters for a deploy, undeploy or ownership check.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeployOptions {
    pub chart_url: String,
    pub chart_version: Option<String>,
    pub release_name: String,
    pub namespace: String,
    pub skip_namespace_creation: bool,
}

impl DeployOptions {
    pub fn from_defaults(defaults: &ChartDefaults) -> Self {
        Self {
            chart_url: defaults.chart_url.clone(),
            chart_version: None,
            release_name: defaults.release_name.clone(),
            namespace: defaults.namespace.clone(),
            skip_namespace_creation: false,
        }
    }

    pub fn with_chart_version(mut self, version: impl Into<String>) -> Self {
        self.chart_version = Some(version.into());
        self
    }

    pub fn with_release_name(mut self, name: impl Into<String>) -> Self {
        self.release_name = name.into();
        self
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    /// Release name, falling back to `gadget` when empty.
    pub fn release(&self) -> &str {
        non_empty_or(&self.release_name, DEFAULT_RELEASE_NAME)
    }

    /// Namespace, falling back to `gadget` when empty.
    pub fn target_namespace(&self) -> &str {
        non_empty_or(&self.namespace, DEFAULT_NAMESPACE)
    }
}

fn non_empty_or<'a>(value: &'a str, fallback: &'a str) -> &'a str {
    if value.is_empty() { fallback } else { value }
}

/// Manages the runtime's cluster-side installation.
#[async_trait]
pub trait Deployer: Send + Sync {
    async fn deploy(&self, options: &DeployOptions) -> Result<(), DeployError>;

    /// Remove a release previously installed by this server. Fails with
    /// [`DeployError::NotDeployedByManager`] if the release is absent or unmarked.
    async fn undeploy(&self, options: &DeployOptions) -> Result<(), DeployError>;

    /// True only when the release exists and carries the [`helm::MANAGED_BY_LABEL`] marker.
    async fn is_deployed(&self, options: &DeployOptions) -> Result<bool, DeployError>;
}

/// Deployer for the configured environment.
pub fn new_deployer(
    config: &ServerConfig,
    runner: Arc<dyn CommandRunner>,
) -> Result<Arc<dyn Deployer>, DeployError> {
    match config.environment {
        Environment::Kubernetes => Ok(Arc::new(HelmDeployer::new(config, runner))),
        Environment::Linux => Err(DeployError::UnsupportedEnvironment(
            config.environment.to_string(),
        )),
    }
}
