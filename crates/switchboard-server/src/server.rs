//! `Switchboard`: axum HTTP + `WebSocket` server with URI-routed dispatch.
//!
//! Every bound URI becomes one route backed by an `Endpoint` that holds the
//! URI's HTTP dispatcher, its `WebSocket` dispatcher, or both. Requests no
//! function handles fall through to the document root (or `404`).

use std::collections::{BTreeMap, HashMap};
use std::net::SocketAddr;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use axum::Router;
use axum::body::Body;
use axum::extract::{FromRequestParts, Request, State, WebSocketUpgrade};
use axum::http::request::Parts;
use axum::http::{HeaderMap, Method, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{MethodRouter, get};
use bytes::Bytes;
use switchboard_logging::{LogSink, TracingSink};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tower::ServiceExt;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info};

use crate::config::ServerConfig;
use crate::dispatch::RequestDispatcher;
use crate::errors::{Result, ServerError};
use crate::handler::{AppFunction, RequestInfo, SharedFunction};
use crate::shutdown::ShutdownCoordinator;
use crate::transport::{HttpOutcome, TransportHandler};
use crate::websocket::connection::OutboundFrame;
use crate::websocket::dispatcher::WebSocketDispatcher;
use crate::websocket::registry::ConnectionRegistry;
use crate::websocket::socket;

type RegistryMap = HashMap<String, Arc<ConnectionRegistry>>;

/// Broadcast capability for the `WebSocket` URIs of one server.
///
/// Obtainable from the builder before the server exists, so application
/// functions can capture it and publish from inside a request. Until the
/// server is built every publish returns `false`.
#[derive(Clone, Default)]
pub struct Publisher {
    registries: Arc<OnceLock<RegistryMap>>,
}

impl Publisher {
    fn registry(&self, uri: &str) -> Option<&Arc<ConnectionRegistry>> {
        self.registries.get().and_then(|map| map.get(uri))
    }

    /// Send `payload` to every live connection on `uri`.
    ///
    /// `as_text` selects a text frame (payload read as UTF-8, invalid
    /// sequences replaced) or a binary frame. Returns `false` when `uri` has
    /// no registry or no live connections.
    pub fn publish(&self, uri: &str, payload: &[u8], as_text: bool) -> bool {
        let Some(registry) = self.registry(uri) else {
            debug!(uri, "publish to unbound URI");
            return false;
        };
        let frame = if as_text {
            OutboundFrame::text(String::from_utf8_lossy(payload).into_owned())
        } else {
            OutboundFrame::binary(Bytes::copy_from_slice(payload))
        };
        registry.broadcast(&frame)
    }

    /// Publish a text frame.
    pub fn publish_text(&self, uri: &str, text: &str) -> bool {
        self.publish(uri, text.as_bytes(), true)
    }

    /// Publish a binary frame.
    pub fn publish_binary(&self, uri: &str, data: &[u8]) -> bool {
        self.publish(uri, data, false)
    }

    /// Live connections on `uri` (`0` when unbound).
    pub fn connection_count(&self, uri: &str) -> usize {
        self.registry(uri).map_or(0, |r| r.len())
    }
}

/// Collects bindings and configuration for a [`Switchboard`].
pub struct SwitchboardBuilder {
    config: ServerConfig,
    http: BTreeMap<String, SharedFunction>,
    websocket: BTreeMap<String, SharedFunction>,
    sink: Arc<dyn LogSink>,
    publisher: Publisher,
}

impl SwitchboardBuilder {
    /// Start from `config` with no bindings.
    pub fn new(config: ServerConfig) -> Self {
        Self {
            config,
            http: BTreeMap::new(),
            websocket: BTreeMap::new(),
            sink: Arc::new(TracingSink),
            publisher: Publisher::default(),
        }
    }

    /// Apply flat key/value transport options (see [`ServerConfig::apply_options`]).
    pub fn options<S: AsRef<str>>(mut self, options: &[S]) -> Result<Self> {
        self.config.apply_options(options)?;
        Ok(self)
    }

    /// Bind `function` to HTTP GET/POST on `uri`. Rebinding replaces.
    #[must_use]
    pub fn http(mut self, uri: impl Into<String>, function: impl AppFunction) -> Self {
        let _ = self.http.insert(uri.into(), Arc::new(function));
        self
    }

    /// Bind `function` to `WebSocket` text frames on `uri`. Rebinding replaces.
    #[must_use]
    pub fn websocket(mut self, uri: impl Into<String>, function: impl AppFunction) -> Self {
        let _ = self.websocket.insert(uri.into(), Arc::new(function));
        self
    }

    /// Route connection log lines to `sink` instead of `tracing`.
    #[must_use]
    pub fn log_sink(mut self, sink: Arc<dyn LogSink>) -> Self {
        self.sink = sink;
        self
    }

    /// The publisher the built server will serve.
    pub fn publisher(&self) -> Publisher {
        self.publisher.clone()
    }

    /// Validate bindings and create dispatchers and registries.
    pub fn build(self) -> Result<Switchboard> {
        for uri in self.http.keys().chain(self.websocket.keys()) {
            validate_uri(uri)?;
        }

        let shutdown = ShutdownCoordinator::new();
        let static_files = self.config.document_root.as_ref().map(ServeDir::new);

        let mut registries = RegistryMap::new();
        let mut endpoints: BTreeMap<String, Endpoint> = BTreeMap::new();
        for (uri, function) in self.websocket {
            let registry = Arc::new(ConnectionRegistry::new(uri.clone()));
            let _ = registries.insert(uri.clone(), Arc::clone(&registry));
            let dispatcher = WebSocketDispatcher::new(function, registry, Arc::clone(&self.sink));
            endpoints
                .entry(uri.clone())
                .or_insert_with(|| {
                    Endpoint::new(uri, &self.config, static_files.clone(), &shutdown)
                })
                .ws = Some(Arc::new(dispatcher));
        }
        for (uri, function) in self.http {
            let dispatcher = RequestDispatcher::new(
                uri.clone(),
                function,
                Arc::clone(&self.sink),
                self.config.max_body_size,
            );
            endpoints
                .entry(uri.clone())
                .or_insert_with(|| {
                    Endpoint::new(uri, &self.config, static_files.clone(), &shutdown)
                })
                .http = Some(Arc::new(dispatcher));
        }

        if self.publisher.registries.set(registries).is_err() {
            return Err(ServerError::Config("publisher is already bound to a server".into()));
        }

        Ok(Switchboard {
            config: self.config,
            endpoints: endpoints.into_iter().map(|(uri, ep)| (uri, Arc::new(ep))).collect(),
            static_files,
            publisher: self.publisher,
            shutdown,
        })
    }

    /// Build and start listening.
    pub async fn start(self) -> Result<ServerHandle> {
        self.build()?.start().await
    }
}

/// Reject URIs axum would treat as patterns or refuse outright.
fn validate_uri(uri: &str) -> Result<()> {
    if !uri.starts_with('/') {
        return Err(ServerError::Config(format!("URI {uri:?} must start with '/'")));
    }
    if uri.contains(['{', '}', '*']) || uri.split('/').any(|seg| seg.starts_with(':')) {
        return Err(ServerError::Config(format!(
            "URI {uri:?} must be a literal path without captures or wildcards"
        )));
    }
    Ok(())
}

/// Per-URI state shared by the route handler.
struct Endpoint {
    uri: String,
    http: Option<Arc<RequestDispatcher>>,
    ws: Option<Arc<WebSocketDispatcher>>,
    static_files: Option<ServeDir>,
    shutdown: ShutdownCoordinator,
    send_queue_capacity: usize,
    max_message_size: usize,
}

impl Endpoint {
    fn new(
        uri: String,
        config: &ServerConfig,
        static_files: Option<ServeDir>,
        shutdown: &ShutdownCoordinator,
    ) -> Self {
        Self {
            uri,
            http: None,
            ws: None,
            static_files,
            shutdown: shutdown.clone(),
            send_queue_capacity: config.send_queue_capacity,
            max_message_size: config.max_message_size,
        }
    }
}

fn is_websocket_upgrade(headers: &HeaderMap) -> bool {
    headers
        .get(header::UPGRADE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.eq_ignore_ascii_case("websocket"))
}

/// Route handler shared by every bound URI.
async fn serve_endpoint(State(endpoint): State<Arc<Endpoint>>, req: Request) -> Response {
    let (mut parts, body) = req.into_parts();

    // axum routes HEAD to GET handlers; functions only see GET and POST.
    if parts.method == Method::HEAD {
        let allow = if endpoint.http.is_some() { "GET,POST" } else { "GET" };
        return (StatusCode::METHOD_NOT_ALLOWED, [(header::ALLOW, allow)]).into_response();
    }

    if let Some(ws) = endpoint.ws.as_ref().filter(|_| is_websocket_upgrade(&parts.headers)) {
        return upgrade(&endpoint, Arc::clone(ws), &mut parts).await;
    }

    let body = match &endpoint.http {
        Some(http) => {
            let info = RequestInfo::from_parts(&parts);
            match http.handle_request(info, body).await {
                HttpOutcome::Handled(reply) => return reply.into_response(),
                HttpOutcome::Rejected(status) => return status.into_response(),
                HttpOutcome::Unhandled => Body::empty(),
            }
        }
        None => body,
    };

    debug!(uri = %endpoint.uri, "unhandled, falling back");
    serve_fallback(endpoint.static_files.as_ref(), Request::from_parts(parts, body)).await
}

async fn upgrade(endpoint: &Endpoint, ws: Arc<WebSocketDispatcher>, parts: &mut Parts) -> Response {
    let upgrade = match WebSocketUpgrade::from_request_parts(parts, &()).await {
        Ok(upgrade) => upgrade,
        Err(rejection) => {
            debug!(uri = %endpoint.uri, %rejection, "rejected upgrade");
            return rejection.into_response();
        }
    };

    let info = RequestInfo::from_parts(parts);
    let handler: Arc<dyn TransportHandler> = ws;
    let capacity = endpoint.send_queue_capacity;
    let token = endpoint.shutdown.token();
    upgrade
        .max_message_size(endpoint.max_message_size)
        .on_upgrade(move |socket| async move {
            socket::run_session(socket, info, handler, capacity, token).await;
        })
}

async fn serve_fallback(static_files: Option<&ServeDir>, req: Request) -> Response {
    let Some(dir) = static_files else {
        return StatusCode::NOT_FOUND.into_response();
    };
    match dir.clone().oneshot(req).await {
        Ok(res) => res.into_response(),
        Err(never) => match never {},
    }
}

/// A configured server: bindings, registries and shutdown state.
pub struct Switchboard {
    config: ServerConfig,
    endpoints: BTreeMap<String, Arc<Endpoint>>,
    static_files: Option<ServeDir>,
    publisher: Publisher,
    shutdown: ShutdownCoordinator,
}

impl Switchboard {
    /// Shorthand for [`SwitchboardBuilder::new`].
    pub fn builder(config: ServerConfig) -> SwitchboardBuilder {
        SwitchboardBuilder::new(config)
    }

    /// Build the axum router serving every binding.
    pub fn router(&self) -> Router {
        let mut router = Router::new();
        for (uri, endpoint) in &self.endpoints {
            let mut methods: MethodRouter<Arc<Endpoint>> = get(serve_endpoint);
            if endpoint.http.is_some() {
                methods = methods.post(serve_endpoint);
            }
            router = router.route(uri, methods.with_state(Arc::clone(endpoint)));
        }
        if let Some(dir) = &self.static_files {
            router = router.fallback_service(dir.clone());
        }
        router.layer(TraceLayer::new_for_http())
    }

    /// Server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Broadcast capability for this server.
    pub fn publisher(&self) -> &Publisher {
        &self.publisher
    }

    /// See [`Publisher::publish`].
    pub fn publish(&self, uri: &str, payload: &[u8], as_text: bool) -> bool {
        self.publisher.publish(uri, payload, as_text)
    }

    /// See [`Publisher::publish_text`].
    pub fn publish_text(&self, uri: &str, text: &str) -> bool {
        self.publisher.publish_text(uri, text)
    }

    /// See [`Publisher::publish_binary`].
    pub fn publish_binary(&self, uri: &str, data: &[u8]) -> bool {
        self.publisher.publish_binary(uri, data)
    }

    /// Live connections on `uri`.
    pub fn connection_count(&self, uri: &str) -> usize {
        self.publisher.connection_count(uri)
    }

    /// URIs with an HTTP binding, sorted.
    pub fn http_uris(&self) -> Vec<String> {
        self.endpoints
            .iter()
            .filter(|(_, ep)| ep.http.is_some())
            .map(|(uri, _)| uri.clone())
            .collect()
    }

    /// URIs with a `WebSocket` binding, sorted.
    pub fn ws_uris(&self) -> Vec<String> {
        self.endpoints
            .iter()
            .filter(|(_, ep)| ep.ws.is_some())
            .map(|(uri, _)| uri.clone())
            .collect()
    }

    /// Shutdown coordinator shared with every session.
    pub fn shutdown(&self) -> &ShutdownCoordinator {
        &self.shutdown
    }

    fn clear_registries(&self) {
        for endpoint in self.endpoints.values() {
            if let Some(ws) = &endpoint.ws {
                ws.registry().clear();
            }
        }
    }

    /// Bind the listener and spawn the serve task.
    pub async fn start(self) -> Result<ServerHandle> {
        let addr = self.config.bind_addr();
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|source| ServerError::Bind { addr: addr.clone(), source })?;
        let local_addr = listener
            .local_addr()
            .map_err(|source| ServerError::Bind { addr: addr.clone(), source })?;

        let server = Arc::new(self);
        let app = server.router().into_make_service_with_connect_info::<SocketAddr>();
        let coordinator = server.shutdown.clone();
        let task = tokio::spawn(async move {
            let result = axum::serve(listener, app)
                .with_graceful_shutdown(async move { coordinator.cancelled().await })
                .await;
            if let Err(e) = result {
                error!(error = %e, "server stopped with error");
            }
        });

        info!(
            %local_addr,
            http = ?server.http_uris(),
            websocket = ?server.ws_uris(),
            "switchboard listening"
        );
        Ok(ServerHandle {
            local_addr,
            server,
            task,
        })
    }
}

/// A running server.
pub struct ServerHandle {
    local_addr: SocketAddr,
    server: Arc<Switchboard>,
    task: JoinHandle<()>,
}

impl ServerHandle {
    /// Address the listener is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// The running server.
    pub fn server(&self) -> &Arc<Switchboard> {
        &self.server
    }

    /// Broadcast capability for this server.
    pub fn publisher(&self) -> Publisher {
        self.server.publisher().clone()
    }

    /// See [`Publisher::publish`].
    pub fn publish(&self, uri: &str, payload: &[u8], as_text: bool) -> bool {
        self.server.publish(uri, payload, as_text)
    }

    /// Stop accepting, close every session, and wait for the serve task.
    ///
    /// Returns whether the serve task finished within the configured
    /// timeout. Registries are emptied either way.
    pub async fn shutdown(self) -> bool {
        let timeout = Duration::from_secs(self.server.config.shutdown_timeout_secs);
        info!(addr = %self.local_addr, "shutting down");
        let finished = self.server.shutdown.graceful_shutdown(vec![self.task], timeout).await;
        self.server.clear_registries();
        finished
    }
}
