//! Tool registry and orchestrator.
//!
//! Owns the mapping from tool name to definition and handler, discovers gadget
//! metadata with bounded concurrency, and publishes the tool set to subscribers
//! whenever it changes.

mod admin;
mod handler;
mod output;
mod session;
mod synth;

pub use handler::ToolHandler;
pub use session::SessionTracker;
pub use synth::ToolDefinition;

use handler::GadgetHandler;
use synth::synthesize;

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::config::{
    ChartDefaults, Environment, MAX_CONCURRENT_INFO_FETCHES, POST_DEPLOY_MAX_WAIT,
    POST_DEPLOY_SETTLE, ServerConfig,
};
use crate::deployer::{Deployer, DeploymentProbe, DeploymentState};
use crate::error::ClientError;
use crate::gadget::{ExecutionClient, GadgetDescriptor};

const READINESS_INITIAL_BACKOFF: Duration = Duration::from_secs(2);
const READINESS_MAX_BACKOFF: Duration = Duration::from_secs(10);

/// A published tool: its definition plus the handler that serves it.
#[derive(Clone)]
pub struct RegisteredTool {
    pub definition: ToolDefinition,
    pub handler: Arc<dyn ToolHandler>,
    /// Image the tool was synthesized from; None for administrative tools.
    pub image: Option<String>,
}

pub type ToolSet = Arc<HashMap<String, RegisteredTool>>;

/// Change callback; receives every definition, sorted by name.
pub type Subscriber = Arc<dyn Fn(&[ToolDefinition]) + Send + Sync>;

#[derive(Default)]
struct State {
    tools: ToolSet,
    subscribers: Vec<Subscriber>,
    images: Vec<String>,
}

struct Inner {
    environment: Environment,
    client: Arc<dyn ExecutionClient>,
    probe: Arc<dyn DeploymentProbe>,
    deployer: Option<Arc<dyn Deployer>>,
    chart: ChartDefaults,
    sessions: SessionTracker,
    shutdown: CancellationToken,
    state: Mutex<State>,
}

/// Cheap handle to the shared registry.
#[derive(Clone)]
pub struct GadgetToolRegistry {
    inner: Arc<Inner>,
}

/// Non-owning handle held by tools that need to call back into the registry.
#[derive(Clone)]
pub struct WeakRegistry {
    inner: Weak<Inner>,
}

impl WeakRegistry {
    pub fn upgrade(&self) -> Option<GadgetToolRegistry> {
        self.inner.upgrade().map(|inner| GadgetToolRegistry { inner })
    }
}

impl GadgetToolRegistry {
    pub fn new(
        config: &ServerConfig,
        client: Arc<dyn ExecutionClient>,
        probe: Arc<dyn DeploymentProbe>,
        deployer: Option<Arc<dyn Deployer>>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                environment: config.environment,
                client,
                probe,
                deployer,
                chart: config.chart.clone(),
                sessions: SessionTracker::new(),
                shutdown,
                state: Mutex::new(State::default()),
            }),
        }
    }

    pub fn downgrade(&self) -> WeakRegistry {
        WeakRegistry {
            inner: Arc::downgrade(&self.inner),
        }
    }

    pub fn environment(&self) -> Environment {
        self.inner.environment
    }

    pub fn sessions(&self) -> &SessionTracker {
        &self.inner.sessions
    }

    /// Register a change callback. Callbacks run in registration order.
    pub fn subscribe(&self, subscriber: Subscriber) {
        self.inner.state.lock().subscribers.push(subscriber);
    }

    /// Current tool set. The returned map never changes; later registrations
    /// publish a new one.
    pub fn snapshot(&self) -> ToolSet {
        self.inner.state.lock().tools.clone()
    }

    pub fn get(&self, name: &str) -> Option<RegisteredTool> {
        self.snapshot().get(name).cloned()
    }

    /// All definitions, sorted by name.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        definitions_of(&self.snapshot())
    }

    /// Bootstrap the tool set. Never fails: administrative tools are always
    /// registered and gadget problems are logged.
    pub async fn prepare(&self, images: Vec<String>) {
        self.inner.state.lock().images = images.clone();
        self.install(admin::admin_tools(self));

        let gated_reason = if self.inner.environment.requires_deployment() {
            match self.inner.probe.check().await {
                Ok(DeploymentState::Deployed { namespace }) => {
                    log::info!("Inspektor Gadget is deployed in namespace {namespace}");
                    None
                }
                Ok(DeploymentState::NotDeployed) => {
                    Some("Inspektor Gadget is not deployed".to_string())
                }
                Err(e) => Some(format!("checking Inspektor Gadget deployment: {e}")),
            }
        } else {
            None
        };

        match gated_reason {
            Some(reason) => log::warn!(
                "{reason}; skipping gadget registration. Use deploy_inspektor_gadget to install it."
            ),
            None => {
                self.register_gadgets(&images).await;
            }
        }

        self.notify();
    }

    /// Fetch metadata for every image and install the resulting tools. Images whose
    /// metadata cannot be fetched or turned into a tool are skipped. Returns the
    /// number of gadget tools installed.
    pub async fn register_gadgets(&self, images: &[String]) -> usize {
        let fetched = self.fetch_descriptors(images).await;

        let mut tools = Vec::with_capacity(fetched.len());
        for (image, result) in fetched {
            let descriptor = match result {
                Ok(descriptor) => descriptor,
                Err(e) => {
                    log::warn!("Skipping gadget image {image}: {e}");
                    continue;
                }
            };
            let definition = match synthesize(&descriptor, self.inner.environment) {
                Ok(definition) => definition,
                Err(e) => {
                    log::warn!("Skipping gadget image {image}: {e}");
                    continue;
                }
            };
            log::debug!(
                "Adding tool {} for image {image} ({} bytes of metadata)",
                definition.name,
                descriptor.raw_metadata.len()
            );
            let handler = GadgetHandler::new(
                Arc::new(descriptor),
                self.inner.client.clone(),
                self.inner.sessions.clone(),
            );
            tools.push(RegisteredTool {
                definition,
                handler: Arc::new(handler),
                image: Some(image),
            });
        }

        let count = tools.len();
        self.install(tools);
        log::info!("Registered {count} of {} gadget images", images.len());
        count
    }

    /// Re-run gadget registration with the images given to `prepare` and notify.
    pub async fn refresh(&self) -> usize {
        let images = self.inner.state.lock().images.clone();
        let count = self.register_gadgets(&images).await;
        self.notify();
        count
    }

    /// Invoke every subscriber with the current tool set. The lock is released
    /// before any callback runs.
    pub fn notify(&self) {
        let (tools, subscribers) = {
            let state = self.inner.state.lock();
            (state.tools.clone(), state.subscribers.clone())
        };
        let definitions = definitions_of(&tools);
        for subscriber in subscribers {
            log::debug!("Notifying tool set subscriber ({} tools)", definitions.len());
            subscriber(&definitions);
        }
    }

    /// Publish `tools` copy-on-write. On a name collision the newer tool wins.
    fn install(&self, tools: Vec<RegisteredTool>) {
        if tools.is_empty() {
            return;
        }
        let mut state = self.inner.state.lock();
        let mut next = HashMap::clone(&state.tools);
        for tool in tools {
            let name = tool.definition.name.clone();
            let image = tool.image.clone();
            if let Some(previous) = next.insert(name.clone(), tool)
                && previous.image != image
            {
                log::warn!(
                    "Tool name {name} is provided by both {} and {}; keeping the latter",
                    previous.image.as_deref().unwrap_or("a built-in tool"),
                    image.as_deref().unwrap_or("a built-in tool"),
                );
            }
        }
        state.tools = Arc::new(next);
    }

    /// Fetch descriptors with at most [`MAX_CONCURRENT_INFO_FETCHES`] calls in
    /// flight. Results come back in input order.
    async fn fetch_descriptors(
        &self,
        images: &[String],
    ) -> Vec<(String, Result<GadgetDescriptor, ClientError>)> {
        let total = images.len();
        if total == 0 {
            return Vec::new();
        }

        let queue: Arc<Mutex<VecDeque<(usize, String)>>> =
            Arc::new(Mutex::new(images.iter().cloned().enumerate().collect()));
        let (tx, mut rx) = mpsc::channel(total);

        for _ in 0..MAX_CONCURRENT_INFO_FETCHES.min(total) {
            let queue = queue.clone();
            let tx = tx.clone();
            let client = self.inner.client.clone();
            let shutdown = self.inner.shutdown.clone();
            tokio::spawn(async move {
                loop {
                    let next = queue.lock().pop_front();
                    let Some((index, image)) = next else {
                        break;
                    };
                    let result = tokio::select! {
                        result = client.get_info(&image) => result,
                        () = shutdown.cancelled() => break,
                    };
                    if tx.send((index, image, result)).await.is_err() {
                        break;
                    }
                }
            });
        }
        drop(tx);

        let mut results = Vec::with_capacity(total);
        while let Some(item) = rx.recv().await {
            results.push(item);
        }
        if results.len() < total {
            log::warn!(
                "Gadget discovery interrupted after {} of {total} images",
                results.len()
            );
        }
        results.sort_by_key(|(index, _, _)| *index);
        results
            .into_iter()
            .map(|(_, image, result)| (image, result))
            .collect()
    }
}

fn definitions_of(tools: &ToolSet) -> Vec<ToolDefinition> {
    let mut definitions: Vec<_> = tools.values().map(|t| t.definition.clone()).collect();
    definitions.sort_by(|a, b| a.name.cmp(&b.name));
    definitions
}

/// Wait for the runtime after a deploy, then register gadgets and notify.
///
/// Holds only a weak reference while sleeping so a dropped registry ends the task.
pub(crate) async fn refresh_after_deploy(registry: WeakRegistry) {
    let Some(shutdown) = registry.upgrade().map(|r| r.inner.shutdown.clone()) else {
        return;
    };

    log::debug!("Waiting {POST_DEPLOY_SETTLE:?} for Inspektor Gadget to settle before registering gadgets");
    tokio::select! {
        () = tokio::time::sleep(POST_DEPLOY_SETTLE) => {}
        () = shutdown.cancelled() => return,
    }

    let Some(registry) = registry.upgrade() else {
        return;
    };
    match registry.await_ready(&shutdown).await {
        Some(true) => log::info!("Inspektor Gadget is ready, registering gadgets"),
        Some(false) => log::warn!(
            "Inspektor Gadget readiness not confirmed within {POST_DEPLOY_MAX_WAIT:?}; registering gadgets anyway"
        ),
        None => return,
    }

    tokio::select! {
        count = registry.refresh() => log::debug!("Post-deploy registration added {count} gadget tools"),
        () = shutdown.cancelled() => {}
    }
}

impl GadgetToolRegistry {
    /// Poll the deployment probe with doubling backoff until it reports the
    /// runtime or the maximum wait elapses. None means shutdown was requested.
    async fn await_ready(&self, shutdown: &CancellationToken) -> Option<bool> {
        let deadline = Instant::now() + POST_DEPLOY_MAX_WAIT;
        let mut backoff = READINESS_INITIAL_BACKOFF;

        loop {
            match self.inner.probe.check().await {
                Ok(state) if state.is_deployed() => return Some(true),
                Ok(_) => log::debug!("Inspektor Gadget pods not visible yet, retrying in {backoff:?}"),
                Err(e) => log::debug!("Readiness check failed: {e}. Retrying in {backoff:?}"),
            }

            let now = Instant::now();
            if now >= deadline {
                return Some(false);
            }
            tokio::select! {
                () = tokio::time::sleep(backoff.min(deadline - now)) => {}
                () = shutdown.cancelled() => return None,
            }
            backoff = (backoff * 2).min(READINESS_MAX_BACKOFF);
        }
    }
}
