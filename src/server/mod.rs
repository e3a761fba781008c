//! MCP surface over the tool registry.

mod transport;

use std::borrow::Cow;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use rmcp::{
    ErrorData as McpError, RoleServer, ServerHandler,
    model::{
        CallToolRequestParam, CallToolResult, Content, Implementation, JsonObject,
        ListToolsResult, PaginatedRequestParam, ProtocolVersion, ServerCapabilities, ServerInfo,
        Tool, ToolAnnotations,
    },
    service::{NotificationContext, Peer, RequestContext},
};
use tokio_util::sync::CancellationToken;

use crate::error::ToolCallError;
use crate::registry::{GadgetToolRegistry, ToolDefinition};

/// Serves the registry's tools and forwards tool set changes to connected peers.
#[derive(Clone)]
pub struct GadgetServer {
    registry: GadgetToolRegistry,
    peers: Arc<DashMap<u64, Peer<RoleServer>>>,
    next_peer: Arc<AtomicU64>,
    shutdown: CancellationToken,
}

impl GadgetServer {
    /// Build the server and subscribe it to registry changes.
    pub fn new(registry: GadgetToolRegistry, shutdown: CancellationToken) -> Self {
        let peers: Arc<DashMap<u64, Peer<RoleServer>>> = Arc::default();

        let subscribed = peers.clone();
        registry.subscribe(Arc::new(move |tools: &[ToolDefinition]| {
            notify_peers(&subscribed, tools.len());
        }));

        Self {
            registry,
            peers,
            next_peer: Arc::new(AtomicU64::new(0)),
            shutdown,
        }
    }

    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }

    /// Look up and run a tool. Handler failures become tool-level error results;
    /// only an unknown name is a protocol error.
    async fn dispatch(
        &self,
        name: &str,
        arguments: Option<JsonObject>,
        request_ct: CancellationToken,
    ) -> Result<CallToolResult, McpError> {
        let tool = self
            .registry
            .get(name)
            .ok_or_else(|| McpError::invalid_params(format!("Unknown tool: {name}"), None))?;

        log::debug!("Calling tool {name}");
        let outcome = tokio::select! {
            outcome = tool.handler.call(arguments.unwrap_or_default()) => outcome,
            () = request_ct.cancelled() => Err(ToolCallError::Cancelled),
            () = self.shutdown.cancelled() => Err(ToolCallError::Cancelled),
        };

        match outcome {
            Ok(text) => Ok(CallToolResult::success(vec![Content::text(text)])),
            Err(e) => {
                log::warn!("Tool {name} failed: {e}");
                log::debug!("Tool {name} error detail: {e:?}");
                Ok(CallToolResult::error(vec![Content::text(e.to_string())]))
            }
        }
    }
}

/// Forget peers whose transport has closed. Returns how many were dropped.
fn prune_closed<P>(peers: &DashMap<u64, P>, is_closed: impl Fn(&P) -> bool) -> usize {
    let before = peers.len();
    peers.retain(|_, peer| !is_closed(peer));
    before - peers.len()
}

/// Send `tools/list_changed` to every known peer; peers that fail are forgotten.
fn notify_peers(peers: &Arc<DashMap<u64, Peer<RoleServer>>>, tool_count: usize) {
    prune_closed(peers, Peer::is_transport_closed);
    if peers.is_empty() {
        return;
    }
    let Ok(runtime) = tokio::runtime::Handle::try_current() else {
        log::warn!("Tool set changed outside the runtime; peers were not notified");
        return;
    };

    log::debug!("Tool set changed ({tool_count} tools), notifying {} peers", peers.len());
    let targets: Vec<(u64, Peer<RoleServer>)> = peers
        .iter()
        .map(|entry| (*entry.key(), entry.value().clone()))
        .collect();
    let peers = peers.clone();
    runtime.spawn(async move {
        let sends = targets.into_iter().map(|(key, peer)| async move {
            (key, peer.notify_tool_list_changed().await)
        });
        for (key, result) in futures::future::join_all(sends).await {
            if let Err(e) = result {
                log::debug!("Dropping peer {key}: {e}");
                peers.remove(&key);
            }
        }
    });
}

fn to_tool(definition: ToolDefinition) -> Tool {
    Tool {
        name: Cow::Owned(definition.name),
        title: None,
        description: Some(Cow::Owned(definition.description)),
        input_schema: Arc::new(definition.input_schema),
        output_schema: None,
        annotations: Some(ToolAnnotations::new().read_only(definition.read_only)),
        icons: None,
        meta: None,
    }
}

impl ServerHandler for GadgetServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: ProtocolVersion::V_2024_11_05,
            capabilities: ServerCapabilities::builder()
                .enable_tools()
                .enable_tool_list_changed()
                .build(),
            server_info: Implementation::from_build_env(),
            instructions: Some(format!(
                "Inspektor Gadget tools for the {} environment. Each gadget is a tool; \
                 background runs return an id for get-results and stop-gadget.",
                self.registry.environment()
            )),
        }
    }

    async fn call_tool(
        &self,
        request: CallToolRequestParam,
        context: RequestContext<RoleServer>,
    ) -> Result<CallToolResult, McpError> {
        self.dispatch(&request.name, request.arguments, context.ct)
            .await
    }

    async fn list_tools(
        &self,
        _request: Option<PaginatedRequestParam>,
        _context: RequestContext<RoleServer>,
    ) -> Result<ListToolsResult, McpError> {
        let dropped = prune_closed(&self.peers, Peer::is_transport_closed);
        if dropped > 0 {
            log::debug!("Dropped {dropped} closed peers ({} connected)", self.peer_count());
        }
        let tools: Vec<Tool> = self.registry.definitions().into_iter().map(to_tool).collect();
        log::debug!("Serving {} tools", tools.len());
        Ok(ListToolsResult::with_all_items(tools))
    }

    async fn on_initialized(&self, context: NotificationContext<RoleServer>) {
        prune_closed(&self.peers, Peer::is_transport_closed);
        let key = self.next_peer.fetch_add(1, Ordering::Relaxed);
        self.peers.insert(key, context.peer);
        log::info!("Client initialized ({} connected)", self.peer_count());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Environment, ServerConfig};
    use crate::testing::{FakeClient, FixedProbe};
    use serde_json::json;

    async fn server(shutdown: CancellationToken) -> (GadgetServer, Arc<FakeClient>) {
        let client = Arc::new(FakeClient::default());
        let registry = GadgetToolRegistry::new(
            &ServerConfig::for_tests(Environment::Linux),
            client.clone(),
            Arc::new(FixedProbe::not_deployed()),
            None,
            shutdown.clone(),
        );
        let server = GadgetServer::new(registry.clone(), shutdown);
        registry.prepare(vec!["trace_open".into()]).await;
        (server, client)
    }

    fn text(result: &CallToolResult) -> String {
        result.content[0]
            .raw
            .as_text()
            .map(|t| t.text.clone())
            .unwrap_or_default()
    }

    fn object(value: serde_json::Value) -> Option<JsonObject> {
        value.as_object().cloned()
    }

    #[tokio::test]
    async fn test_unknown_tool_is_protocol_error() {
        let (server, _) = server(CancellationToken::new()).await;
        let err = server
            .dispatch("no_such_tool", None, CancellationToken::new())
            .await
            .unwrap_err();
        assert!(err.message.contains("no_such_tool"));
    }

    #[tokio::test]
    async fn test_handler_failure_is_tool_error() {
        let (server, client) = server(CancellationToken::new()).await;
        client.fail_runs("permission denied");

        let result = server
            .dispatch("trace_open", object(json!({"params": {}})), CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(result.is_error, Some(true));
        assert!(text(&result).contains("permission denied"));
    }

    #[tokio::test]
    async fn test_success_returns_wrapped_output() {
        let (server, client) = server(CancellationToken::new()).await;
        client.set_run_output("{}");

        let result = server
            .dispatch("trace_open", object(json!({"params": {}})), CancellationToken::new())
            .await
            .unwrap();

        assert_ne!(result.is_error, Some(true));
        assert_eq!(text(&result), "<results>{}</results>");
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_request_stops_waiting() {
        let (server, _) = server(CancellationToken::new()).await;
        let request_ct = CancellationToken::new();
        request_ct.cancel();

        let result = server
            .dispatch("wait", object(json!({"waitTime": 600})), request_ct)
            .await
            .unwrap();

        assert_eq!(result.is_error, Some(true));
        assert_eq!(text(&result), "operation cancelled");
    }

    #[tokio::test]
    async fn test_tool_conversion_carries_read_only() {
        let (server, _) = server(CancellationToken::new()).await;
        let tools: Vec<Tool> = server
            .registry
            .definitions()
            .into_iter()
            .map(to_tool)
            .collect();

        let deploy = tools
            .iter()
            .find(|t| t.name == "deploy_inspektor_gadget")
            .unwrap();
        assert_eq!(
            deploy.annotations.as_ref().unwrap().read_only_hint,
            Some(false)
        );
        let gadget = tools.iter().find(|t| t.name == "trace_open").unwrap();
        assert_eq!(
            gadget.annotations.as_ref().unwrap().read_only_hint,
            Some(true)
        );
        assert_eq!(gadget.input_schema["required"], json!(["params"]));
    }

    #[test]
    fn test_prune_closed_drops_only_closed_peers() {
        let peers: DashMap<u64, bool> = DashMap::new();
        peers.insert(0, false);
        peers.insert(1, true);
        peers.insert(2, true);

        assert_eq!(prune_closed(&peers, |closed| *closed), 2);
        assert_eq!(peers.len(), 1);
        assert!(peers.contains_key(&0));
        assert_eq!(prune_closed(&peers, |closed| *closed), 0);
    }

    #[tokio::test]
    async fn test_change_without_peers_is_noop() {
        let (server, _) = server(CancellationToken::new()).await;
        server.registry.notify();
        assert_eq!(server.peer_count(), 0);
    }
}
