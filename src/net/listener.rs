//! Listener service: one protocol listener of a server.
//!
//! # Responsibilities
//! - Bind and unbind the listener's socket binding
//! - Accept incoming TCP connections, enforcing `max_connections`
//! - Build the open listener (root handler + statistics) and its wrappers
//! - Toggle enabled/disabled without tearing the service down
//!
//! # States
//! ```text
//! Stopped ──start()──▶ Idle (started, disabled) ──set_enabled(true)──▶ Listening
//!                      └────────── start() with enabled ─────────────▶ Listening
//! stop(): any state ──▶ Stopped
//! ```
//!
//! # Design Decisions
//! - `start`, `stop` and `set_enabled` serialize on one async mutex per
//!   listener, held across bind and unbind
//! - A failed bind rolls back every registration `start` made
//! - The shutdown guard is always the outermost wrapper

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use arc_swap::ArcSwap;
use axum::body::Body;
use axum::http::{header, Method, Request, StatusCode};
use axum::response::Response;
use futures_util::future::BoxFuture;
use hyper_util::rt::{TokioExecutor, TokioTimer};
use hyper_util::server::conn::auto::Builder;
use parking_lot::Mutex;
use tokio::net::TcpListener;
use tokio::runtime::Handle;
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinHandle;
use tokio_rustls::TlsAcceptor;

use crate::http::handler::{HandlerWrapper, HttpHandler, SharedHandler};
use crate::http::response::status_response;
use crate::lifecycle::shutdown::ShutdownGuardWrapper;
use crate::net::connection::{serve_connection, ConnectionContext, ConnectionTracker};
use crate::net::resources::{BufferPool, Worker};
use crate::net::socket::{bind_listener, SocketOptions};
use crate::net::tls::load_tls_acceptor;
use crate::observability::metrics;
use crate::server::registry::Subsystem;
use crate::server::{ListenerRegistration, Server};

const SHUTDOWN_GUARD: &str = "shutdown-guard";
const REQUEST_LIMITS: &str = "request-limits";

#[derive(Debug, thiserror::Error)]
pub enum ListenerError {
    #[error("listener '{listener}': address {addr} already in use")]
    AddressInUse { listener: String, addr: SocketAddr },
    #[error("listener '{listener}': failed to bind {addr}: {source}")]
    Bind {
        listener: String,
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },
    #[error("listener '{listener}': TLS setup failed: {reason}")]
    Tls { listener: String, reason: String },
    #[error("listener '{listener}' failed to start: {source}")]
    Start {
        listener: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
    #[error("listener '{listener}': unknown socket binding '{binding}'")]
    UnknownBinding { listener: String, binding: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerState {
    Stopped,
    /// Started but not bound.
    Idle,
    Listening,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsSettings {
    pub cert_path: PathBuf,
    pub key_path: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListenerProtocol {
    Http,
    Https(TlsSettings),
}

impl ListenerProtocol {
    pub fn name(&self) -> &'static str {
        match self {
            ListenerProtocol::Http => "http",
            ListenerProtocol::Https(_) => "https",
        }
    }
}

/// Immutable per-listener HTTP options.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListenerOptions {
    pub max_header_size: usize,
    pub max_entity_size: u64,
    pub max_headers: usize,
    pub max_parameters: usize,
    pub max_cookies: usize,
    pub max_connections: Option<usize>,
    pub read_timeout: Duration,
    pub write_timeout: Duration,
    pub no_request_timeout: Duration,
    pub allow_encoded_slash: bool,
    pub decode_url: bool,
    pub url_charset: String,
    pub always_set_keep_alive: bool,
    pub disallowed_methods: Vec<Method>,
    pub secure: bool,
}

impl Default for ListenerOptions {
    fn default() -> Self {
        Self {
            max_header_size: 1024 * 1024,
            max_entity_size: 10 * 1024 * 1024,
            max_headers: 200,
            max_parameters: 1000,
            max_cookies: 200,
            max_connections: None,
            read_timeout: Duration::from_millis(90_000),
            write_timeout: Duration::from_millis(90_000),
            no_request_timeout: Duration::from_millis(60_000),
            allow_encoded_slash: false,
            decode_url: true,
            url_charset: "UTF-8".to_string(),
            always_set_keep_alive: true,
            disallowed_methods: vec![Method::TRACE],
            secure: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ListenerSettings {
    pub name: String,
    pub socket_binding: String,
    pub enabled: bool,
    pub proxy_protocol: bool,
    pub protocol: ListenerProtocol,
    pub options: ListenerOptions,
    pub socket: SocketOptions,
}

impl ListenerSettings {
    pub fn http(name: impl Into<String>, socket_binding: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            socket_binding: socket_binding.into(),
            enabled: true,
            proxy_protocol: false,
            protocol: ListenerProtocol::Http,
            options: ListenerOptions::default(),
            socket: SocketOptions::default(),
        }
    }

    pub fn https(name: impl Into<String>, socket_binding: impl Into<String>, tls: TlsSettings) -> Self {
        Self {
            protocol: ListenerProtocol::Https(tls),
            ..Self::http(name, socket_binding)
        }
    }
}

pub struct ListenerDependencies {
    pub server: Arc<Server>,
    pub subsystem: Arc<Subsystem>,
    pub worker: Worker,
    pub buffer_pool: BufferPool,
}

// --- statistics ---

/// Request counters, updated only while the subsystem toggle is on.
#[derive(Debug, Default)]
pub struct ListenerStatistics {
    request_count: AtomicU64,
    error_count: AtomicU64,
    bytes_sent: AtomicU64,
    max_processing_micros: AtomicU64,
    total_processing_micros: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StatisticsSnapshot {
    pub request_count: u64,
    pub error_count: u64,
    pub bytes_sent: u64,
    pub max_processing_time: Duration,
    pub total_processing_time: Duration,
}

impl ListenerStatistics {
    pub fn record(&self, status: StatusCode, bytes: Option<u64>, elapsed: Duration) {
        let micros = u64::try_from(elapsed.as_micros()).unwrap_or(u64::MAX);
        self.request_count.fetch_add(1, Ordering::Relaxed);
        if status.is_server_error() {
            self.error_count.fetch_add(1, Ordering::Relaxed);
        }
        if let Some(bytes) = bytes {
            self.bytes_sent.fetch_add(bytes, Ordering::Relaxed);
        }
        self.max_processing_micros.fetch_max(micros, Ordering::Relaxed);
        self.total_processing_micros.fetch_add(micros, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatisticsSnapshot {
        StatisticsSnapshot {
            request_count: self.request_count.load(Ordering::Relaxed),
            error_count: self.error_count.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            max_processing_time: Duration::from_micros(self.max_processing_micros.load(Ordering::Relaxed)),
            total_processing_time: Duration::from_micros(self.total_processing_micros.load(Ordering::Relaxed)),
        }
    }

    pub fn reset(&self) {
        self.request_count.store(0, Ordering::Relaxed);
        self.error_count.store(0, Ordering::Relaxed);
        self.bytes_sent.store(0, Ordering::Relaxed);
        self.max_processing_micros.store(0, Ordering::Relaxed);
        self.total_processing_micros.store(0, Ordering::Relaxed);
    }
}

// --- open listener ---

/// Protocol front end: the wrapped root handler plus statistics.
pub struct OpenListener {
    name: Arc<str>,
    handler: ArcSwap<SharedHandler>,
    statistics: Arc<ListenerStatistics>,
    statistics_enabled: Arc<AtomicBool>,
}

impl OpenListener {
    fn new(name: Arc<str>, handler: SharedHandler, statistics_enabled: Arc<AtomicBool>) -> Self {
        Self {
            name,
            handler: ArcSwap::from_pointee(handler),
            statistics: Arc::new(ListenerStatistics::default()),
            statistics_enabled,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn root_handler(&self) -> SharedHandler {
        SharedHandler::clone(&self.handler.load())
    }

    pub fn set_root_handler(&self, handler: SharedHandler) {
        self.handler.store(Arc::new(handler));
    }

    pub fn statistics(&self) -> &Arc<ListenerStatistics> {
        &self.statistics
    }

    pub async fn dispatch(&self, req: Request<Body>) -> Response {
        let start = Instant::now();
        let handler = self.root_handler();
        let response = handler.handle(req).await;
        let elapsed = start.elapsed();
        metrics::record_request(&self.name, response.status().as_u16(), elapsed);
        if self.statistics_enabled.load(Ordering::Relaxed) {
            let bytes = response
                .headers()
                .get(header::CONTENT_LENGTH)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse().ok());
            self.statistics.record(response.status(), bytes, elapsed);
        }
        response
    }
}

// --- request limits wrapper ---

/// Listener-level request checks applied before the server's router.
struct RequestLimits {
    disallowed_methods: Arc<[Method]>,
    max_entity_size: u64,
    max_headers: usize,
    max_parameters: usize,
    max_cookies: usize,
}

impl RequestLimits {
    fn from_options(options: &ListenerOptions) -> Self {
        Self {
            disallowed_methods: options.disallowed_methods.clone().into(),
            max_entity_size: options.max_entity_size,
            max_headers: options.max_headers,
            max_parameters: options.max_parameters,
            max_cookies: options.max_cookies,
        }
    }
}

impl HandlerWrapper for RequestLimits {
    fn wrap(&self, next: SharedHandler) -> SharedHandler {
        Arc::new(RequestLimitsHandler {
            disallowed_methods: Arc::clone(&self.disallowed_methods),
            max_entity_size: self.max_entity_size,
            max_headers: self.max_headers,
            max_parameters: self.max_parameters,
            max_cookies: self.max_cookies,
            next,
        })
    }
}

struct RequestLimitsHandler {
    disallowed_methods: Arc<[Method]>,
    max_entity_size: u64,
    max_headers: usize,
    max_parameters: usize,
    max_cookies: usize,
    next: SharedHandler,
}

impl RequestLimitsHandler {
    fn rejection(&self, req: &Request<Body>) -> Option<StatusCode> {
        if self.disallowed_methods.contains(req.method()) {
            return Some(StatusCode::METHOD_NOT_ALLOWED);
        }
        if req.headers().len() > self.max_headers {
            return Some(StatusCode::BAD_REQUEST);
        }
        let content_length = req
            .headers()
            .get(header::CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok());
        if content_length.is_some_and(|len| len > self.max_entity_size) {
            return Some(StatusCode::PAYLOAD_TOO_LARGE);
        }
        let parameters = req
            .uri()
            .query()
            .map(|q| q.split('&').filter(|p| !p.is_empty()).count())
            .unwrap_or(0);
        if parameters > self.max_parameters {
            return Some(StatusCode::BAD_REQUEST);
        }
        let cookies: usize = req
            .headers()
            .get_all(header::COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .map(|v| v.split(';').filter(|c| !c.trim().is_empty()).count())
            .sum();
        if cookies > self.max_cookies {
            return Some(StatusCode::BAD_REQUEST);
        }
        None
    }
}

impl HttpHandler for RequestLimitsHandler {
    fn handle(&self, req: Request<Body>) -> BoxFuture<'_, Response> {
        if let Some(status) = self.rejection(&req) {
            tracing::debug!(
                method = %req.method(),
                path = %req.uri().path(),
                status = status.as_u16(),
                "Request rejected by listener limits"
            );
            return Box::pin(async move { status_response(status) });
        }
        self.next.handle(req)
    }
}

// --- listener service ---

struct BoundSocket {
    local_addr: SocketAddr,
    stop: watch::Sender<bool>,
    task: JoinHandle<()>,
}

struct NamedWrapper {
    name: String,
    wrapper: Arc<dyn HandlerWrapper>,
}

pub struct ListenerService {
    settings: ListenerSettings,
    name: Arc<str>,
    server: Arc<Server>,
    subsystem: Arc<Subsystem>,
    worker: Worker,
    buffer_pool: BufferPool,

    enabled: AtomicBool,
    started: AtomicBool,
    lifecycle: tokio::sync::Mutex<Option<BoundSocket>>,
    local_addr: Mutex<Option<SocketAddr>>,
    open: Mutex<Option<Arc<OpenListener>>>,
    wrappers: Mutex<Vec<NamedWrapper>>,
    tls: Mutex<Option<TlsAcceptor>>,
    connections: ConnectionTracker,
}

impl ListenerService {
    pub fn new(settings: ListenerSettings, deps: ListenerDependencies) -> Arc<Self> {
        let limits: Arc<dyn HandlerWrapper> = Arc::new(RequestLimits::from_options(&settings.options));
        Arc::new(Self {
            name: Arc::from(settings.name.as_str()),
            enabled: AtomicBool::new(settings.enabled),
            server: deps.server,
            subsystem: deps.subsystem,
            worker: deps.worker,
            buffer_pool: deps.buffer_pool,
            started: AtomicBool::new(false),
            lifecycle: tokio::sync::Mutex::new(None),
            local_addr: Mutex::new(None),
            open: Mutex::new(None),
            wrappers: Mutex::new(vec![NamedWrapper {
                name: REQUEST_LIMITS.to_string(),
                wrapper: limits,
            }]),
            tls: Mutex::new(None),
            connections: ConnectionTracker::new(),
            settings,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn settings(&self) -> &ListenerSettings {
        &self.settings
    }

    pub fn server(&self) -> &Arc<Server> {
        &self.server
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::Acquire)
    }

    pub fn state(&self) -> ListenerState {
        if !self.is_started() {
            ListenerState::Stopped
        } else if self.local_addr.lock().is_some() {
            ListenerState::Listening
        } else {
            ListenerState::Idle
        }
    }

    /// Address actually bound, while listening.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.local_addr.lock()
    }

    pub fn open_listener(&self) -> Option<Arc<OpenListener>> {
        self.open.lock().clone()
    }

    pub fn active_connections(&self) -> u64 {
        self.connections.active_count()
    }

    /// Append a wrapper; it wraps everything added before it.
    pub fn add_wrapper(&self, name: impl Into<String>, wrapper: Arc<dyn HandlerWrapper>) {
        self.wrappers.lock().push(NamedWrapper {
            name: name.into(),
            wrapper,
        });
        self.rebuild_root_handler();
    }

    pub fn remove_wrapper(&self, name: &str) -> bool {
        let removed = {
            let mut wrappers = self.wrappers.lock();
            let before = wrappers.len();
            wrappers.retain(|w| w.name != name);
            wrappers.len() != before
        };
        if removed {
            self.rebuild_root_handler();
        }
        removed
    }

    pub fn wrapper_names(&self) -> Vec<String> {
        self.wrappers.lock().iter().map(|w| w.name.clone()).collect()
    }

    fn build_root_handler(&self) -> SharedHandler {
        let mut handler = self.server.root_handler();
        for named in self.wrappers.lock().iter() {
            handler = named.wrapper.wrap(handler);
        }
        handler
    }

    fn rebuild_root_handler(&self) {
        let open = self.open.lock().clone();
        if let Some(open) = open {
            open.set_root_handler(self.build_root_handler());
        }
    }

    // --- lifecycle ---

    pub async fn start(&self) -> Result<(), ListenerError> {
        let mut bound = self.lifecycle.lock().await;
        if self.started.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        if let Err(e) = self.pre_start() {
            self.clean_failed_start(&mut bound);
            return Err(e);
        }

        self.server.register_listener(
            &self.name,
            ListenerRegistration {
                protocol: self.settings.protocol.name(),
                secure: self.is_secure(),
            },
        );

        let open = Arc::new(OpenListener::new(
            Arc::clone(&self.name),
            self.server.root_handler(),
            self.subsystem.statistics_toggle(),
        ));
        *self.open.lock() = Some(Arc::clone(&open));
        self.add_wrapper(
            SHUTDOWN_GUARD,
            Arc::new(ShutdownGuardWrapper::new(Arc::clone(self.subsystem.shutdown()))),
        );

        if self.is_enabled() {
            if let Err(e) = self.bind(&mut bound).await {
                self.clean_failed_start(&mut bound);
                return Err(e);
            }
        }

        self.subsystem
            .register_statistics(&self.name, Arc::clone(open.statistics()));
        tracing::info!(
            listener = %self.name,
            server = %self.server.name(),
            protocol = self.settings.protocol.name(),
            state = ?self.state(),
            "Listener started"
        );
        Ok(())
    }

    pub async fn stop(&self) {
        let mut bound = self.lifecycle.lock().await;
        if !self.started.swap(false, Ordering::AcqRel) {
            return;
        }
        self.server.unregister_listener(&self.name);
        self.unbind(&mut bound).await;
        self.subsystem.unregister_statistics(&self.name);
        self.remove_wrapper(SHUTDOWN_GUARD);
        self.open.lock().take();
        self.tls.lock().take();
        tracing::info!(listener = %self.name, "Listener stopped");
    }

    /// Bind or unbind without stopping. No-op when not started or unchanged.
    pub async fn set_enabled(&self, enabled: bool) -> Result<(), ListenerError> {
        let mut bound = self.lifecycle.lock().await;
        let previous = self.enabled.swap(enabled, Ordering::AcqRel);
        if !self.is_started() || previous == enabled {
            return Ok(());
        }
        if enabled {
            if let Err(e) = self.bind(&mut bound).await {
                self.enabled.store(false, Ordering::Release);
                return Err(e);
            }
        } else {
            self.unbind(&mut bound).await;
        }
        tracing::info!(listener = %self.name, enabled, "Listener toggled");
        Ok(())
    }

    fn is_secure(&self) -> bool {
        self.settings.options.secure || matches!(self.settings.protocol, ListenerProtocol::Https(_))
    }

    fn pre_start(&self) -> Result<(), ListenerError> {
        if let ListenerProtocol::Https(tls) = &self.settings.protocol {
            let acceptor = load_tls_acceptor(&tls.cert_path, &tls.key_path).map_err(|e| ListenerError::Tls {
                listener: self.name.to_string(),
                reason: e.to_string(),
            })?;
            *self.tls.lock() = Some(acceptor);
        }
        Ok(())
    }

    /// Undo everything a failed `start` registered.
    fn clean_failed_start(&self, bound: &mut Option<BoundSocket>) {
        self.started.store(false, Ordering::Release);
        self.server.unregister_listener(&self.name);
        if let Some(socket) = bound.take() {
            socket.task.abort();
        }
        *self.local_addr.lock() = None;
        let registry = self.subsystem.socket_bindings();
        if registry
            .bound(&self.settings.socket_binding)
            .is_some_and(|b| b.listener == *self.name)
        {
            registry.release(&self.settings.socket_binding);
        }
        self.subsystem.unregister_statistics(&self.name);
        self.remove_wrapper(SHUTDOWN_GUARD);
        self.open.lock().take();
        self.tls.lock().take();
        tracing::warn!(listener = %self.name, "Listener start rolled back");
    }

    async fn bind(&self, bound: &mut Option<BoundSocket>) -> Result<(), ListenerError> {
        if bound.is_some() {
            return Ok(());
        }
        let registry = self.subsystem.socket_bindings();
        let binding = registry
            .binding(&self.settings.socket_binding)
            .map_err(|_| ListenerError::UnknownBinding {
                listener: self.name.to_string(),
                binding: self.settings.socket_binding.clone(),
            })?;
        let addr = binding.socket_addr();

        let tcp = {
            let _runtime = self.worker.handle().enter();
            bind_listener(addr, &self.settings.socket)
        }
        .map_err(|source| {
            if source.kind() == std::io::ErrorKind::AddrInUse {
                ListenerError::AddressInUse {
                    listener: self.name.to_string(),
                    addr,
                }
            } else {
                ListenerError::Bind {
                    listener: self.name.to_string(),
                    addr,
                    source,
                }
            }
        })?;
        let local_addr = tcp.local_addr().map_err(|source| ListenerError::Bind {
            listener: self.name.to_string(),
            addr,
            source,
        })?;
        registry
            .claim(&binding.name, &self.name, local_addr)
            .map_err(|e| ListenerError::Start {
                listener: self.name.to_string(),
                source: Box::new(e),
            })?;

        let open = self.open_listener().ok_or_else(|| ListenerError::Start {
            listener: self.name.to_string(),
            source: "open listener missing".into(),
        })?;
        let ctx = Arc::new(ConnectionContext {
            listener: Arc::clone(&self.name),
            local_addr,
            open,
            builder: self.http_builder(),
            tls: self.tls.lock().clone(),
            proxy_protocol: self.settings.proxy_protocol,
            secure: self.settings.options.secure,
            no_delay: self.settings.socket.tcp_no_delay,
            handshake_timeout: self.settings.options.read_timeout,
            tracker: self.connections.clone(),
        });
        let limit = self
            .settings
            .options
            .max_connections
            .map(|max| Arc::new(Semaphore::new(max)));
        let (stop_tx, stop_rx) = watch::channel(false);
        let handle = self.worker.handle().clone();
        let task = handle.spawn(accept_loop(tcp, ctx, limit, stop_rx, handle.clone()));

        *bound = Some(BoundSocket {
            local_addr,
            stop: stop_tx,
            task,
        });
        *self.local_addr.lock() = Some(local_addr);
        metrics::listener_bound(true);
        tracing::info!(
            listener = %self.name,
            binding = %binding.name,
            address = %local_addr,
            max_connections = ?self.settings.options.max_connections,
            "Listener bound"
        );
        Ok(())
    }

    async fn unbind(&self, bound: &mut Option<BoundSocket>) {
        let Some(socket) = bound.take() else {
            return;
        };
        let _ = socket.stop.send(true);
        if let Err(e) = socket.task.await {
            tracing::warn!(listener = %self.name, error = %e, "Accept task ended abnormally");
        }
        *self.local_addr.lock() = None;
        metrics::listener_bound(false);
        self.subsystem
            .socket_bindings()
            .release(&self.settings.socket_binding);
        tracing::info!(
            listener = %self.name,
            address = %socket.local_addr,
            draining = self.connections.active_count(),
            "Listener unbound"
        );
    }

    fn http_builder(&self) -> Builder<TokioExecutor> {
        let options = &self.settings.options;
        let mut builder = Builder::new(TokioExecutor::new());
        builder
            .http1()
            .timer(TokioTimer::new())
            .header_read_timeout(options.read_timeout)
            .keep_alive(options.always_set_keep_alive)
            .max_buf_size(options.max_header_size.max(self.buffer_pool.buffer_size()));
        builder
            .http2()
            .timer(TokioTimer::new())
            .max_header_list_size(u32::try_from(options.max_header_size).unwrap_or(u32::MAX));
        builder
    }
}

async fn accept_loop(
    listener: TcpListener,
    ctx: Arc<ConnectionContext>,
    limit: Option<Arc<Semaphore>>,
    mut stop: watch::Receiver<bool>,
    worker: Handle,
) {
    loop {
        // Acquire permit first (backpressure)
        let permit = match &limit {
            Some(semaphore) => tokio::select! {
                permit = Arc::clone(semaphore).acquire_owned() => match permit {
                    Ok(permit) => Some(permit),
                    Err(_) => break,
                },
                _ = stop.changed() => break,
            },
            None => None,
        };

        let (stream, peer_addr) = tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok(accepted) => accepted,
                Err(e) => {
                    tracing::warn!(listener = %ctx.listener, error = %e, "Accept failed");
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    continue;
                }
            },
            _ = stop.changed() => break,
        };

        tracing::debug!(
            listener = %ctx.listener,
            peer_addr = %peer_addr,
            available_permits = ?limit.as_ref().map(|s| s.available_permits()),
            "Connection accepted"
        );

        let ctx = Arc::clone(&ctx);
        let stop = stop.clone();
        worker.spawn(async move {
            let _permit = permit;
            serve_connection(ctx, stream, peer_addr, stop).await;
        });
    }
    tracing::debug!(listener = %ctx.listener, "Accept loop finished");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::handler::handler_fn;

    fn limits_handler(options: &ListenerOptions) -> SharedHandler {
        RequestLimits::from_options(options).wrap(handler_fn(|_req: Request<Body>| async {
            status_response(StatusCode::OK)
        }))
    }

    #[tokio::test]
    async fn trace_is_disallowed_by_default() {
        let handler = limits_handler(&ListenerOptions::default());
        let req = Request::builder().method(Method::TRACE).uri("/").body(Body::empty()).unwrap();
        assert_eq!(handler.handle(req).await.status(), StatusCode::METHOD_NOT_ALLOWED);
    }

    #[tokio::test]
    async fn oversized_entity_rejected() {
        let options = ListenerOptions {
            max_entity_size: 10,
            ..ListenerOptions::default()
        };
        let handler = limits_handler(&options);
        let req = Request::builder()
            .method(Method::POST)
            .uri("/")
            .header(header::CONTENT_LENGTH, "11")
            .body(Body::from("01234567890"))
            .unwrap();
        assert_eq!(handler.handle(req).await.status(), StatusCode::PAYLOAD_TOO_LARGE);
    }

    #[tokio::test]
    async fn parameter_and_cookie_limits() {
        let options = ListenerOptions {
            max_parameters: 2,
            max_cookies: 1,
            ..ListenerOptions::default()
        };
        let handler = limits_handler(&options);
        let too_many_params = Request::builder().uri("/?a=1&b=2&c=3").body(Body::empty()).unwrap();
        assert_eq!(handler.handle(too_many_params).await.status(), StatusCode::BAD_REQUEST);

        let cookies = Request::builder()
            .uri("/")
            .header(header::COOKIE, "a=1; b=2")
            .body(Body::empty())
            .unwrap();
        assert_eq!(handler.handle(cookies).await.status(), StatusCode::BAD_REQUEST);

        let fine = Request::builder().uri("/?a=1").body(Body::empty()).unwrap();
        assert_eq!(handler.handle(fine).await.status(), StatusCode::OK);
    }

    #[test]
    fn statistics_snapshot() {
        let stats = ListenerStatistics::default();
        stats.record(StatusCode::OK, Some(100), Duration::from_millis(3));
        stats.record(StatusCode::BAD_GATEWAY, None, Duration::from_millis(7));
        let snapshot = stats.snapshot();
        assert_eq!(snapshot.request_count, 2);
        assert_eq!(snapshot.error_count, 1);
        assert_eq!(snapshot.bytes_sent, 100);
        assert_eq!(snapshot.max_processing_time, Duration::from_millis(7));
        assert_eq!(snapshot.total_processing_time, Duration::from_millis(10));

        stats.reset();
        assert_eq!(stats.snapshot(), StatisticsSnapshot::default());
    }
}
