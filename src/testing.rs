//! In-crate fakes for unit tests.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::deployer::{DeployOptions, Deployer, DeploymentProbe, DeploymentState};
use crate::error::{ClientError, CommandError, DeployError, ProbeError};
use crate::exec::{CommandOutput, CommandRunner, Invocation};
use crate::gadget::{ExecutionClient, GadgetDescriptor, ParamDesc, Params, new_session_id};

/// Descriptor whose display name is the image with underscores turned into spaces.
pub fn descriptor(image: &str) -> GadgetDescriptor {
    descriptor_with_params(image, &[])
}

pub fn descriptor_with_params(image: &str, params: &[(&str, &str)]) -> GadgetDescriptor {
    GadgetDescriptor {
        image: image.to_string(),
        name: image.replace('_', " "),
        description: format!("{image} gadget"),
        raw_metadata: String::new(),
        params: params
            .iter()
            .map(|(key, default)| ParamDesc {
                key: key.to_string(),
                prefix: String::new(),
                description: format!("{key} parameter"),
                default_value: default.to_string(),
            })
            .collect(),
        output_fields: Vec::new(),
    }
}

fn failure(message: &str) -> ClientError {
    ClientError::Command(CommandError::Failed {
        program: "kubectl-gadget".into(),
        exit_code: Some(1),
        stderr: message.to_string(),
    })
}

type RunCall = (String, Params, Duration);

/// Scripted [`ExecutionClient`] with an in-flight counter on `get_info`.
#[derive(Default)]
pub struct FakeClient {
    descriptors: Mutex<HashMap<String, GadgetDescriptor>>,
    failing_images: Mutex<HashSet<String>>,
    info_delay: Mutex<Option<Duration>>,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
    info_calls: AtomicUsize,
    run_output: Mutex<String>,
    run_failure: Mutex<Option<String>>,
    runs: Mutex<Vec<RunCall>>,
    detached: Mutex<Vec<(String, Params)>>,
    live_sessions: Mutex<HashSet<String>>,
}

impl FakeClient {
    pub fn with_descriptor(&self, descriptor: GadgetDescriptor) {
        self.descriptors
            .lock()
            .insert(descriptor.image.clone(), descriptor);
    }

    pub fn fail_info_for(&self, image: &str) {
        self.failing_images.lock().insert(image.to_string());
    }

    pub fn delay_info(&self, delay: Duration) {
        *self.info_delay.lock() = Some(delay);
    }

    pub fn set_run_output(&self, output: &str) {
        *self.run_output.lock() = output.to_string();
    }

    pub fn fail_runs(&self, message: &str) {
        *self.run_failure.lock() = Some(message.to_string());
    }

    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    pub fn info_calls(&self) -> usize {
        self.info_calls.load(Ordering::SeqCst)
    }

    pub fn runs(&self) -> Vec<RunCall> {
        self.runs.lock().clone()
    }

    pub fn detached(&self) -> Vec<(String, Params)> {
        self.detached.lock().clone()
    }
}

#[async_trait]
impl ExecutionClient for FakeClient {
    async fn get_info(&self, image: &str) -> Result<GadgetDescriptor, ClientError> {
        self.info_calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(now, Ordering::SeqCst);

        let delay = *self.info_delay.lock();
        match delay {
            Some(delay) => tokio::time::sleep(delay).await,
            None => tokio::task::yield_now().await,
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if self.failing_images.lock().contains(image) {
            return Err(failure(&format!("cannot pull {image}")));
        }
        let scripted = self.descriptors.lock().get(image).cloned();
        Ok(scripted.unwrap_or_else(|| descriptor(image)))
    }

    async fn run(
        &self,
        image: &str,
        params: &Params,
        timeout: Duration,
    ) -> Result<String, ClientError> {
        self.runs
            .lock()
            .push((image.to_string(), params.clone(), timeout));
        if let Some(message) = self.run_failure.lock().clone() {
            return Err(failure(&message));
        }
        Ok(self.run_output.lock().clone())
    }

    async fn run_detached(&self, image: &str, params: &Params) -> Result<String, ClientError> {
        self.detached
            .lock()
            .push((image.to_string(), params.clone()));
        let id = new_session_id();
        self.live_sessions.lock().insert(id.clone());
        Ok(id)
    }

    async fn results(&self, id: &str) -> Result<String, ClientError> {
        if self.live_sessions.lock().contains(id) {
            Ok(self.run_output.lock().clone())
        } else {
            Err(failure(&format!("gadget instance {id} not found")))
        }
    }

    async fn stop(&self, id: &str) -> Result<(), ClientError> {
        if self.live_sessions.lock().remove(id) {
            Ok(())
        } else {
            Err(failure(&format!("gadget instance {id} not found")))
        }
    }
}

/// [`CommandRunner`] that records invocations and replays queued stdout.
#[derive(Default)]
pub struct RecordingRunner {
    calls: Mutex<Vec<Invocation>>,
    responses: Mutex<VecDeque<String>>,
}

impl RecordingRunner {
    /// Queue stdout for the next call. Calls with nothing queued get empty output.
    pub fn respond_with(&self, stdout: &str) {
        self.responses.lock().push_back(stdout.to_string());
    }

    pub fn calls(&self) -> Vec<Invocation> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl CommandRunner for RecordingRunner {
    async fn run(&self, invocation: &Invocation) -> Result<CommandOutput, CommandError> {
        self.calls.lock().push(invocation.clone());
        let stdout = self.responses.lock().pop_front().unwrap_or_default();
        Ok(CommandOutput {
            stdout,
            exit_code: Some(0),
            ..CommandOutput::default()
        })
    }
}

/// [`DeploymentProbe`] that replays a scripted sequence, repeating the last state.
pub struct FixedProbe {
    states: Mutex<VecDeque<Option<DeploymentState>>>,
    checks: AtomicUsize,
}

impl FixedProbe {
    /// `None` entries answer with an ambiguous-namespace error.
    pub fn sequence(states: Vec<Option<DeploymentState>>) -> Self {
        Self {
            states: Mutex::new(states.into()),
            checks: AtomicUsize::new(0),
        }
    }

    pub fn deployed(namespace: &str) -> Self {
        Self::sequence(vec![Some(DeploymentState::Deployed {
            namespace: namespace.to_string(),
        })])
    }

    pub fn not_deployed() -> Self {
        Self::sequence(vec![Some(DeploymentState::NotDeployed)])
    }

    pub fn ambiguous() -> Self {
        Self::sequence(vec![None])
    }

    pub fn checks(&self) -> usize {
        self.checks.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DeploymentProbe for FixedProbe {
    async fn check(&self) -> Result<DeploymentState, ProbeError> {
        self.checks.fetch_add(1, Ordering::SeqCst);
        let next = {
            let mut states = self.states.lock();
            if states.len() > 1 {
                states.pop_front().flatten()
            } else {
                states.front().cloned().flatten()
            }
        };
        next.ok_or_else(|| {
            ProbeError::AmbiguousNamespaces(vec!["gadget".into(), "kube-system".into()])
        })
    }
}

/// [`Deployer`] that counts calls; undeploy succeeds only once deploy has run.
#[derive(Default)]
pub struct FakeDeployer {
    deployed: AtomicBool,
    pub deploys: AtomicUsize,
    pub uninstalls: AtomicUsize,
    last_options: Mutex<Option<DeployOptions>>,
}

impl FakeDeployer {
    pub fn last_options(&self) -> Option<DeployOptions> {
        self.last_options.lock().clone()
    }
}

#[async_trait]
impl Deployer for FakeDeployer {
    async fn deploy(&self, options: &DeployOptions) -> Result<(), DeployError> {
        if options.chart_url.is_empty() {
            return Err(DeployError::ChartUrlNotSet);
        }
        *self.last_options.lock() = Some(options.clone());
        self.deploys.fetch_add(1, Ordering::SeqCst);
        self.deployed.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn undeploy(&self, options: &DeployOptions) -> Result<(), DeployError> {
        *self.last_options.lock() = Some(options.clone());
        if !self.deployed.load(Ordering::SeqCst) {
            return Err(DeployError::NotDeployedByManager);
        }
        self.uninstalls.fetch_add(1, Ordering::SeqCst);
        self.deployed.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn is_deployed(&self, _options: &DeployOptions) -> Result<bool, DeployError> {
        Ok(self.deployed.load(Ordering::SeqCst))
    }
}
