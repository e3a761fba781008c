//! Per-call execution of gadget-derived tools.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Map, Value};

use super::output::wrap_results;
use super::session::SessionTracker;
use crate::config::{DEFAULT_RUN_TIMEOUT, MAX_RUN_TIMEOUT};
use crate::error::ToolCallError;
use crate::gadget::{ExecutionClient, GadgetDescriptor, Params};

/// Parameter controlling how often periodic gadgets snapshot their maps.
pub const MAP_FETCH_INTERVAL_PARAM: &str = "operator.oci.ebpf.map-fetch-interval";

const MIN_MAP_FETCH_INTERVAL: Duration = Duration::from_millis(1);

/// Something a caller can invoke by tool name.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    async fn call(&self, args: Map<String, Value>) -> Result<String, ToolCallError>;
}

/// Handler for one gadget image. Holds the descriptor, not the registry.
pub struct GadgetHandler {
    descriptor: Arc<GadgetDescriptor>,
    client: Arc<dyn ExecutionClient>,
    sessions: SessionTracker,
}

/// Validated arguments of a gadget call.
#[derive(Debug, PartialEq)]
struct GadgetRequest {
    params: Params,
    timeout: Duration,
    background: bool,
}

impl GadgetHandler {
    pub fn new(
        descriptor: Arc<GadgetDescriptor>,
        client: Arc<dyn ExecutionClient>,
        sessions: SessionTracker,
    ) -> Self {
        Self {
            descriptor,
            client,
            sessions,
        }
    }

    fn parse_request(&self, args: &Map<String, Value>) -> Result<GadgetRequest, ToolCallError> {
        let mut params = self.descriptor.default_params();

        match args.get("params") {
            None | Some(Value::Null) => {}
            Some(Value::Object(supplied)) => {
                for (key, value) in supplied {
                    let Value::String(value) = value else {
                        return Err(ToolCallError::InvalidArgument(format!(
                            "invalid type for parameter {key}: expected string, got {}",
                            json_type(value)
                        )));
                    };
                    params.insert(key.clone(), value.clone());
                }
            }
            Some(other) => {
                return Err(ToolCallError::InvalidArgument(format!(
                    "invalid type for params: expected object, got {}",
                    json_type(other)
                )));
            }
        }

        let timeout = match args.get("timeout") {
            None | Some(Value::Null) => DEFAULT_RUN_TIMEOUT,
            Some(Value::Number(n)) => match n.as_f64().map(Duration::try_from_secs_f64) {
                Some(Ok(timeout)) if !timeout.is_zero() && timeout <= MAX_RUN_TIMEOUT => timeout,
                _ => {
                    return Err(ToolCallError::InvalidArgument(format!(
                        "timeout must be a positive number of seconds up to {}, got {n}",
                        MAX_RUN_TIMEOUT.as_secs()
                    )));
                }
            },
            Some(other) => {
                return Err(ToolCallError::InvalidArgument(format!(
                    "invalid type for timeout: expected number, got {}",
                    json_type(other)
                )));
            }
        };

        let background = match args.get("background") {
            None | Some(Value::Null) => false,
            Some(Value::Bool(b)) => *b,
            Some(other) => {
                return Err(ToolCallError::InvalidArgument(format!(
                    "invalid type for background: expected boolean, got {}",
                    json_type(other)
                )));
            }
        };

        if !background && let Some(interval) = params.get_mut(MAP_FETCH_INTERVAL_PARAM) {
            *interval = format_duration((timeout / 2).max(MIN_MAP_FETCH_INTERVAL));
        }

        Ok(GadgetRequest {
            params,
            timeout,
            background,
        })
    }
}

#[async_trait]
impl ToolHandler for GadgetHandler {
    async fn call(&self, args: Map<String, Value>) -> Result<String, ToolCallError> {
        let request = self.parse_request(&args)?;
        let image = &self.descriptor.image;

        if request.background {
            log::debug!("Starting gadget {image} in background with params {:?}", request.params);
            let id = self
                .client
                .run_detached(image, &request.params)
                .await
                .map_err(|source| ToolCallError::RunDetached {
                    image: image.clone(),
                    source,
                })?;
            self.sessions.record_started(&id, image);
            return Ok(id);
        }

        log::debug!(
            "Running gadget {image} with params {:?} and timeout {:?}",
            request.params,
            request.timeout
        );
        let output = self
            .client
            .run(image, &request.params, request.timeout)
            .await
            .map_err(|source| ToolCallError::Run {
                image: image.clone(),
                source,
            })?;
        Ok(wrap_results(&output))
    }
}

pub(crate) fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Render a duration the way the gadget CLI parses it ("5s", "2500ms").
fn format_duration(d: Duration) -> String {
    if d.subsec_nanos() == 0 {
        format!("{}s", d.as_secs())
    } else if d.subsec_nanos() % 1_000_000 == 0 {
        format!("{}ms", d.as_millis())
    } else {
        format!("{}us", d.as_micros())
    }
}
