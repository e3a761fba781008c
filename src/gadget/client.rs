use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use super::{GadgetDescriptor, new_session_id};
use crate::config::{Environment, RESULTS_FETCH_DEADLINE, ServerConfig};
use crate::error::ClientError;
use crate::exec::{CommandRunner, Invocation};

/// Gadget parameters keyed by `prefix + key`. Ordered so command lines are stable.
pub type Params = BTreeMap<String, String>;

/// Deadline for short control operations (inspect, detach, delete).
const CONTROL_DEADLINE: Duration = Duration::from_secs(30);

/// Slack on top of a foreground run's own timeout before the CLI is killed.
const RUN_GRACE: Duration = Duration::from_secs(10);

/// Operations the registry needs from the gadget runtime.
#[async_trait]
pub trait ExecutionClient: Send + Sync {
    async fn get_info(&self, image: &str) -> Result<GadgetDescriptor, ClientError>;

    /// Run to completion; blocks up to `timeout`.
    async fn run(&self, image: &str, params: &Params, timeout: Duration)
    -> Result<String, ClientError>;

    /// Start a detached session and return its id. Every call creates a new session.
    async fn run_detached(&self, image: &str, params: &Params) -> Result<String, ClientError>;

    /// Output currently buffered by a detached session.
    async fn results(&self, id: &str) -> Result<String, ClientError>;

    async fn stop(&self, id: &str) -> Result<(), ClientError>;
}

/// [`ExecutionClient`] that drives `kubectl-gadget` or `gadgetctl`.
pub struct CliGadgetClient {
    runner: Arc<dyn CommandRunner>,
    binary: PathBuf,
    global_args: Vec<String>,
}

impl CliGadgetClient {
    pub fn new(config: &ServerConfig, runner: Arc<dyn CommandRunner>) -> Self {
        let mut global_args = Vec::new();
        match config.environment {
            Environment::Kubernetes => {
                if let Some(kubeconfig) = &config.kubeconfig {
                    global_args.push(format!("--kubeconfig={}", kubeconfig.display()));
                }
            }
            Environment::Linux => {
                if let Some(address) = &config.linux_remote_address {
                    global_args.push(format!("--remote-address={address}"));
                }
            }
        }
        Self {
            runner,
            binary: config.binaries.gadget.clone(),
            global_args,
        }
    }

    fn invocation(&self, deadline: Duration) -> Invocation {
        Invocation::new(&self.binary, deadline).args(self.global_args.iter().cloned())
    }
}

fn param_flags(params: &Params) -> impl Iterator<Item = String> + '_ {
    params.iter().map(|(k, v)| format!("--{k}={v}"))
}

#[async_trait]
impl ExecutionClient for CliGadgetClient {
    async fn get_info(&self, image: &str) -> Result<GadgetDescriptor, ClientError> {
        let invocation = self
            .invocation(CONTROL_DEADLINE)
            .args(["image", "inspect", image, "--output", "json"]);
        let stdout = self.runner.run(&invocation).await?.into_stdout();
        GadgetDescriptor::from_info_json(&stdout)
    }

    async fn run(
        &self,
        image: &str,
        params: &Params,
        timeout: Duration,
    ) -> Result<String, ClientError> {
        let invocation = self
            .invocation(timeout.saturating_add(RUN_GRACE))
            .args(["run", image, "--timeout"])
            .arg(timeout.as_secs().max(1).to_string())
            .args(["--output", "json"])
            .args(param_flags(params));
        Ok(self.runner.run(&invocation).await?.into_stdout())
    }

    async fn run_detached(&self, image: &str, params: &Params) -> Result<String, ClientError> {
        let id = new_session_id();
        let invocation = self
            .invocation(CONTROL_DEADLINE)
            .args(["run", image, "--detach", "--id", id.as_str()])
            .args(param_flags(params));
        self.runner.run(&invocation).await?;
        Ok(id)
    }

    async fn results(&self, id: &str) -> Result<String, ClientError> {
        let invocation = self
            .invocation(RESULTS_FETCH_DEADLINE)
            .args(["attach", id, "--output", "json"])
            .collect_on_deadline();
        Ok(self.runner.run(&invocation).await?.into_stdout())
    }

    async fn stop(&self, id: &str) -> Result<(), ClientError> {
        let invocation = self.invocation(CONTROL_DEADLINE).args(["delete", id]);
        self.runner.run(&invocation).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::DeadlineMode;
    use crate::testing::RecordingRunner;

    fn client(runner: Arc<RecordingRunner>) -> CliGadgetClient {
        CliGadgetClient::new(&ServerConfig::for_tests(Environment::Kubernetes), runner)
    }

    #[tokio::test]
    async fn test_run_command_line() {
        let runner = Arc::new(RecordingRunner::default());
        let client = client(runner.clone());
        let mut params = Params::new();
        params.insert("namespace".into(), "default".into());
        params.insert("host".into(), "true".into());

        client
            .run("trace_open", &params, Duration::from_secs(10))
            .await
            .unwrap();

        let calls = runner.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].program, PathBuf::from("kubectl-gadget"));
        assert_eq!(
            calls[0].args,
            [
                "run",
                "trace_open",
                "--timeout",
                "10",
                "--output",
                "json",
                "--host=true",
                "--namespace=default"
            ]
        );
        assert_eq!(calls[0].deadline, Duration::from_secs(20));
    }

    #[tokio::test]
    async fn test_run_detached_uses_generated_id() {
        let runner = Arc::new(RecordingRunner::default());
        let client = client(runner.clone());

        let id = client.run_detached("trace_dns", &Params::new()).await.unwrap();

        assert_eq!(id.len(), 32);
        let calls = runner.calls();
        assert_eq!(
            calls[0].args,
            ["run", "trace_dns", "--detach", "--id", id.as_str()]
        );
    }

    #[tokio::test]
    async fn test_results_collects_on_deadline() {
        let runner = Arc::new(RecordingRunner::default());
        runner.respond_with("{\"comm\":\"cat\"}\n");
        let client = client(runner.clone());

        let out = client.results("abc").await.unwrap();

        assert_eq!(out, "{\"comm\":\"cat\"}\n");
        let calls = runner.calls();
        assert_eq!(calls[0].args, ["attach", "abc", "--output", "json"]);
        assert_eq!(calls[0].deadline, RESULTS_FETCH_DEADLINE);
        assert_eq!(calls[0].deadline_mode, DeadlineMode::Collect);
    }

    #[tokio::test]
    async fn test_stop_and_linux_remote_address() {
        let runner = Arc::new(RecordingRunner::default());
        let mut config = ServerConfig::for_tests(Environment::Linux);
        config.linux_remote_address = Some("tcp://10.0.0.1:8888".into());
        let client = CliGadgetClient::new(&config, runner.clone());

        client.stop("abc").await.unwrap();

        let calls = runner.calls();
        assert_eq!(calls[0].program, PathBuf::from("gadgetctl"));
        assert_eq!(
            calls[0].args,
            ["--remote-address=tcp://10.0.0.1:8888", "delete", "abc"]
        );
    }

    #[tokio::test]
    async fn test_get_info_parses_inspect_output() {
        let runner = Arc::new(RecordingRunner::default());
        runner.respond_with(
            &serde_json::json!({
                "imageName": "trace_exec",
                "metadata": "name: trace exec\n",
                "params": []
            })
            .to_string(),
        );
        let client = client(runner.clone());

        let d = client.get_info("trace_exec").await.unwrap();

        assert_eq!(d.name, "trace exec");
        assert_eq!(
            runner.calls()[0].args,
            ["image", "inspect", "trace_exec", "--output", "json"]
        );
    }
}
