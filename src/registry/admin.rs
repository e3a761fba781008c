//! Tools that are registered regardless of deployment state.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use schemars::{JsonSchema, schema_for};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use super::handler::ToolHandler;
use super::output::wrap_results;
use super::session::SessionTracker;
use super::synth::ToolDefinition;
use super::{GadgetToolRegistry, RegisteredTool, WeakRegistry, refresh_after_deploy};
use crate::config::{ChartDefaults, Environment};
use crate::deployer::{DeployOptions, Deployer, DeploymentProbe, DeploymentState};
use crate::error::{DeployError, ToolCallError};
use crate::gadget::ExecutionClient;

pub const DEPLOY_TOOL: &str = "deploy_inspektor_gadget";
pub const UNDEPLOY_TOOL: &str = "undeploy_inspektor_gadget";
pub const IS_DEPLOYED_TOOL: &str = "is_inspektor_gadget_deployed";
pub const WAIT_TOOL: &str = "wait";
pub const STOP_TOOL: &str = "stop-gadget";
pub const RESULTS_TOOL: &str = "get-results";

#[derive(Debug, Default, Deserialize, JsonSchema)]
struct DeployArgs {
    /// Kubernetes namespace to deploy Inspektor Gadget into, only set if user explicitly specifies a namespace
    #[serde(default)]
    namespace: Option<String>,
    /// Name of Helm release to create for Inspektor Gadget, only set if user explicitly specifies a release name
    #[serde(default)]
    release: Option<String>,
    /// Version of the Inspektor Gadget Helm chart to deploy, only set if user explicitly specifies a version
    #[serde(default)]
    chart_version: Option<String>,
}

#[derive(Debug, Default, Deserialize, JsonSchema)]
struct UndeployArgs {
    /// Name of Helm release to remove, only set if user explicitly specifies a release name
    #[serde(default)]
    release: Option<String>,
    /// Kubernetes namespace to undeploy Inspektor Gadget from, only set if user explicitly specifies a namespace
    #[serde(default)]
    namespace: Option<String>,
}

#[derive(Debug, Default, Deserialize, JsonSchema)]
struct NoArgs {}

#[derive(Debug, Default, Deserialize, JsonSchema)]
struct WaitArgs {
    /// Number of seconds to wait
    #[serde(default, rename = "waitTime")]
    wait_time: Option<f64>,
}

#[derive(Debug, Default, Deserialize, JsonSchema)]
struct StopArgs {
    /// ID of the running gadget
    #[serde(default)]
    id: String,
}

#[derive(Debug, Default, Deserialize, JsonSchema)]
struct ResultsArgs {
    /// ID of the running gadget instance
    #[serde(default)]
    id: String,
}

/// Schema for an argument struct, as a JSON object.
fn build_schema<T: JsonSchema>() -> Map<String, Value> {
    match serde_json::to_value(schema_for!(T)) {
        Ok(Value::Object(map)) => map,
        _ => Map::new(),
    }
}

fn parse_args<T: DeserializeOwned>(args: Map<String, Value>) -> Result<T, ToolCallError> {
    serde_json::from_value(Value::Object(args))
        .map_err(|e| ToolCallError::InvalidArgument(format!("invalid arguments: {e}")))
}

fn require_id(id: &str) -> Result<&str, ToolCallError> {
    let id = id.trim();
    if id.is_empty() {
        return Err(ToolCallError::InvalidArgument("an id is required".to_string()));
    }
    Ok(id)
}

fn tool<T: JsonSchema>(
    name: &str,
    description: &str,
    read_only: bool,
    handler: Arc<dyn ToolHandler>,
) -> RegisteredTool {
    RegisteredTool {
        definition: ToolDefinition {
            name: name.to_string(),
            description: description.to_string(),
            input_schema: build_schema::<T>(),
            read_only,
        },
        handler,
        image: None,
    }
}

pub(super) fn admin_tools(registry: &GadgetToolRegistry) -> Vec<RegisteredTool> {
    let inner = &registry.inner;
    vec![
        tool::<DeployArgs>(
            DEPLOY_TOOL,
            "Deploy Inspektor Gadget on the target system",
            false,
            Arc::new(DeployTool {
                registry: registry.downgrade(),
                deployer: inner.deployer.clone(),
                chart: inner.chart.clone(),
                environment: inner.environment,
            }),
        ),
        tool::<UndeployArgs>(
            UNDEPLOY_TOOL,
            "Undeploy Inspektor Gadget from the target system",
            false,
            Arc::new(UndeployTool {
                deployer: inner.deployer.clone(),
                chart: inner.chart.clone(),
                environment: inner.environment,
            }),
        ),
        tool::<NoArgs>(
            IS_DEPLOYED_TOOL,
            "Check if Inspektor Gadget is deployed on the target system. Doesn't rely on if mcp server deployed it or not but checks if the Inspektor Gadget resources are present in the cluster.",
            true,
            Arc::new(IsDeployedTool {
                probe: inner.probe.clone(),
                environment: inner.environment,
            }),
        ),
        tool::<WaitArgs>(
            WAIT_TOOL,
            "Wait for a number of seconds, for example to let a background gadget collect events before reading its results",
            true,
            Arc::new(WaitTool),
        ),
        tool::<StopArgs>(
            STOP_TOOL,
            "Stops a gadget with an ID",
            true,
            Arc::new(StopTool {
                client: inner.client.clone(),
                sessions: inner.sessions.clone(),
            }),
        ),
        tool::<ResultsArgs>(
            RESULTS_TOOL,
            "Returns the collected events from a gadget instance with a specific ID. Please review the data and provide a concise summary to the user.",
            true,
            Arc::new(ResultsTool {
                client: inner.client.clone(),
                sessions: inner.sessions.clone(),
            }),
        ),
    ]
}

fn require_deployer(
    deployer: &Option<Arc<dyn Deployer>>,
    environment: Environment,
) -> Result<&Arc<dyn Deployer>, ToolCallError> {
    deployer.as_ref().ok_or_else(|| {
        ToolCallError::Deploy(DeployError::UnsupportedEnvironment(environment.to_string()))
    })
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

struct DeployTool {
    registry: WeakRegistry,
    deployer: Option<Arc<dyn Deployer>>,
    chart: ChartDefaults,
    environment: Environment,
}

#[async_trait]
impl ToolHandler for DeployTool {
    async fn call(&self, args: Map<String, Value>) -> Result<String, ToolCallError> {
        let deployer = require_deployer(&self.deployer, self.environment)?;
        let args: DeployArgs = parse_args(args)?;

        let mut options = DeployOptions::from_defaults(&self.chart);
        if let Some(namespace) = non_empty(args.namespace) {
            options = options.with_namespace(namespace);
        }
        if let Some(release) = non_empty(args.release) {
            options = options.with_release_name(release);
        }
        if let Some(version) = non_empty(args.chart_version) {
            options = options.with_chart_version(version);
        }

        deployer.deploy(&options).await?;
        tokio::spawn(refresh_after_deploy(self.registry.clone()));
        Ok("Inspektor Gadget deploy completed successfully".to_string())
    }
}

struct UndeployTool {
    deployer: Option<Arc<dyn Deployer>>,
    chart: ChartDefaults,
    environment: Environment,
}

#[async_trait]
impl ToolHandler for UndeployTool {
    async fn call(&self, args: Map<String, Value>) -> Result<String, ToolCallError> {
        let deployer = require_deployer(&self.deployer, self.environment)?;
        let args: UndeployArgs = parse_args(args)?;

        let mut options = DeployOptions::from_defaults(&self.chart);
        if let Some(namespace) = non_empty(args.namespace) {
            options = options.with_namespace(namespace);
        }
        if let Some(release) = non_empty(args.release) {
            options = options.with_release_name(release);
        }

        deployer.undeploy(&options).await?;
        Ok("Inspektor Gadget undeploy completed successfully".to_string())
    }
}

struct IsDeployedTool {
    probe: Arc<dyn DeploymentProbe>,
    environment: Environment,
}

#[async_trait]
impl ToolHandler for IsDeployedTool {
    async fn call(&self, _args: Map<String, Value>) -> Result<String, ToolCallError> {
        if !self.environment.requires_deployment() {
            return Ok(format!(
                "Inspektor Gadget does not need to be deployed in the {} environment",
                self.environment
            ));
        }
        match self.probe.check().await? {
            DeploymentState::Deployed { namespace } => Ok(format!(
                "Inspektor Gadget is deployed in namespace {namespace}"
            )),
            DeploymentState::NotDeployed => Err(ToolCallError::NotDeployed),
        }
    }
}

struct WaitTool;

#[async_trait]
impl ToolHandler for WaitTool {
    async fn call(&self, args: Map<String, Value>) -> Result<String, ToolCallError> {
        let args: WaitArgs = parse_args(args)?;
        let secs = args.wait_time.unwrap_or(1.0);
        if !secs.is_finite() || secs < 0.0 {
            return Err(ToolCallError::InvalidArgument(format!(
                "waitTime must be a non-negative number of seconds, got {secs}"
            )));
        }
        let secs = secs.trunc() as u64;
        tokio::time::sleep(Duration::from_secs(secs)).await;
        Ok(format!("{secs} seconds have passed"))
    }
}

struct StopTool {
    client: Arc<dyn ExecutionClient>,
    sessions: SessionTracker,
}

#[async_trait]
impl ToolHandler for StopTool {
    async fn call(&self, args: Map<String, Value>) -> Result<String, ToolCallError> {
        let args: StopArgs = parse_args(args)?;
        let id = require_id(&args.id)?;

        self.client
            .stop(id)
            .await
            .map_err(|source| ToolCallError::Stop {
                id: id.to_string(),
                source,
            })?;
        if self.sessions.record_stopped(id).is_none() {
            log::debug!("Stopped gadget {id} that was not started by this server");
        }
        Ok(format!("Gadget with ID {id:?} has been stopped"))
    }
}

struct ResultsTool {
    client: Arc<dyn ExecutionClient>,
    sessions: SessionTracker,
}

#[async_trait]
impl ToolHandler for ResultsTool {
    async fn call(&self, args: Map<String, Value>) -> Result<String, ToolCallError> {
        let args: ResultsArgs = parse_args(args)?;
        let id = require_id(&args.id)?;

        if let Some(entry) = self.sessions.get(id) {
            log::debug!(
                "Fetching results of {} session {id} started {:?} ago",
                entry.image,
                entry.started_at.elapsed()
            );
        }
        let output = self
            .client
            .results(id)
            .await
            .map_err(|source| ToolCallError::Results {
                id: id.to_string(),
                source,
            })?;
        Ok(wrap_results(&output))
    }
}
