//! Virtual host.
//!
//! # Responsibilities
//! - Own the host's path router, deployments and named locations
//! - Build the root handler chain lazily and rebuild it after invalidation
//! - Gate traffic while the process is starting
//! - Answer 503 from the root while the server is suspended
//!
//! # Chain layout
//! ```text
//! gate (while starting)
//!     → ACME challenge passthrough
//!     → access log (if configured)
//!     → filters, lowest priority outermost
//!     → OPTIONS *
//!     → Expect
//!     → availability decorator
//!     → path router → deployment / location / default handler
//! ```
//!
//! # Design Decisions
//! - The chain is cached in an `ArcSwapOption` tagged with the generation
//!   it was built from; invalidation bumps the generation and clears the
//!   cell, builders serialize on one mutex and re-check before building
//! - Router and availability sets are shared by every chain generation, so
//!   path registration does not need a rebuild

pub mod default_response;
pub mod deployment;

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use arc_swap::ArcSwapOption;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use dashmap::DashMap;
use parking_lot::Mutex;

use crate::http::access_log::AccessLogService;
use crate::http::acme::{AcmeChallengeHandler, AcmeChallengeStore};
use crate::http::expect::ExpectHandler;
use crate::http::filters::FilterRef;
use crate::http::handler::{HandlerWrapper, SharedHandler};
use crate::http::options::OptionsHandler;
use crate::lifecycle::gate::GateHandlerWrapper;
use crate::lifecycle::process_state::{
    ProcessState, ProcessStateListener, ProcessStateNotifier, StateListenerId,
};
use crate::lifecycle::suspend::{ActivityCompletion, ActivityId, ServerActivity, SuspendController, SuspendState};
use crate::routing::matcher::normalize_slashes;
use crate::routing::router::PathRouter;
use crate::routing::unavailable::HttpUnavailablePathHandler;
use crate::server::events::{EventBus, WebEvent};
use crate::server::registry::RegistryError;
use crate::server::Server;

pub use default_response::DefaultResponseCodeHandler;
pub use deployment::Deployment;

#[derive(Debug, Clone)]
pub struct HostSettings {
    pub name: String,
    pub aliases: Vec<String>,
    pub default_web_module: String,
    pub default_response_code: StatusCode,
    pub queue_requests_on_start: bool,
    /// Answered for paths outside every deployment, when set.
    pub unavailable_response_code: Option<StatusCode>,
}

impl HostSettings {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            aliases: Vec::new(),
            default_web_module: "ROOT.war".to_string(),
            default_response_code: StatusCode::NOT_FOUND,
            queue_requests_on_start: true,
            unavailable_response_code: None,
        }
    }
}

pub struct HostDependencies {
    pub server: Arc<Server>,
    pub process_state: Arc<ProcessStateNotifier>,
    pub suspend: Arc<SuspendController>,
    pub acme: AcmeChallengeStore,
}

/// A layer of a built chain, outermost first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChainLayer {
    Gate,
    AcmeChallenge,
    AccessLog,
    Filter(String),
    Options,
    Expect,
    Availability,
    PathRouter,
}

/// One generation of a host's root handler.
pub struct HandlerChain {
    pub handler: SharedHandler,
    pub layers: Vec<ChainLayer>,
    pub generation: u64,
}

/// Outcome of an additional authentication mechanism.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthOutcome {
    Authenticated(String),
    NotAttempted,
    Failed,
}

pub trait AuthenticationMechanism: Send + Sync {
    fn mechanism_name(&self) -> &str;
    fn authenticate(&self, req: &Request<Body>) -> AuthOutcome;
}

pub struct Host {
    settings: HostSettings,
    names: HashSet<String>,
    server: Weak<Server>,
    server_name: String,
    events: Arc<EventBus>,
    process_state: Arc<ProcessStateNotifier>,
    suspend: Arc<SuspendController>,
    acme: AcmeChallengeStore,

    default_handler: Arc<DefaultResponseCodeHandler>,
    router: Arc<PathRouter>,
    availability: Arc<HttpUnavailablePathHandler>,
    deployments: DashMap<String, Deployed>,
    locations: DashMap<String, SharedHandler>,
    filters: Mutex<Vec<FilterRef>>,
    access_log: Mutex<Option<Arc<AccessLogService>>>,
    auth_mechanisms: DashMap<String, Arc<dyn AuthenticationMechanism>>,

    root: ArcSwapOption<HandlerChain>,
    generation: AtomicU64,
    build_lock: Mutex<()>,

    gate: Mutex<Option<Arc<GateHandlerWrapper>>>,
    gate_listener: Mutex<Option<StateListenerId>>,
    activity: Mutex<Option<ActivityId>>,
    started: AtomicBool,
}

impl Host {
    pub fn new(settings: HostSettings, deps: HostDependencies) -> Arc<Self> {
        let default_handler = Arc::new(DefaultResponseCodeHandler::new(settings.default_response_code));
        let router = Arc::new(PathRouter::with_default(default_handler.clone()));
        let availability = Arc::new(HttpUnavailablePathHandler::new(router.clone()));
        availability.set_response_code(settings.unavailable_response_code);

        let mut names: HashSet<String> = settings.aliases.iter().cloned().collect();
        names.insert(settings.name.clone());

        Arc::new(Self {
            names,
            server: Arc::downgrade(&deps.server),
            server_name: deps.server.name().to_string(),
            events: deps.server.events(),
            process_state: deps.process_state,
            suspend: deps.suspend,
            acme: deps.acme,
            default_handler,
            router,
            availability,
            deployments: DashMap::new(),
            locations: DashMap::new(),
            filters: Mutex::new(Vec::new()),
            access_log: Mutex::new(None),
            auth_mechanisms: DashMap::new(),
            root: ArcSwapOption::empty(),
            generation: AtomicU64::new(0),
            build_lock: Mutex::new(()),
            gate: Mutex::new(None),
            gate_listener: Mutex::new(None),
            activity: Mutex::new(None),
            started: AtomicBool::new(false),
            settings,
        })
    }

    pub fn name(&self) -> &str {
        &self.settings.name
    }

    pub fn settings(&self) -> &HostSettings {
        &self.settings
    }

    pub fn server_name(&self) -> &str {
        &self.server_name
    }

    /// Name and aliases.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.names.iter().map(String::as_str)
    }

    /// Exact membership in name and aliases.
    pub fn answers_to(&self, name: &str) -> bool {
        self.names.contains(name)
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::Acquire)
    }

    pub fn default_handler(&self) -> &Arc<DefaultResponseCodeHandler> {
        &self.default_handler
    }

    pub fn router(&self) -> &Arc<PathRouter> {
        &self.router
    }

    pub fn availability(&self) -> &Arc<HttpUnavailablePathHandler> {
        &self.availability
    }

    // --- lifecycle ---

    pub fn start(self: &Arc<Self>) -> Result<(), RegistryError> {
        if self.started.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let Some(server) = self.server.upgrade() else {
            self.started.store(false, Ordering::Release);
            return Err(RegistryError::NotFound {
                kind: "server",
                name: self.server_name.clone(),
            });
        };
        if let Err(e) = server.register_host(Arc::clone(self)) {
            self.started.store(false, Ordering::Release);
            return Err(e);
        }

        if self.process_state.current() == ProcessState::Starting {
            let gate = if self.settings.queue_requests_on_start {
                GateHandlerWrapper::queueing()
            } else {
                GateHandlerWrapper::rejecting(self.settings.default_response_code)
            };
            *self.gate.lock() = Some(Arc::new(gate));
            let opener = Arc::new(GateOpener {
                host: Arc::downgrade(self),
            });
            {
                let mut listener = self.gate_listener.lock();
                *listener = Some(self.process_state.add_listener(opener));
            }
            // The state may have moved on before the listener was in place.
            if self.process_state.current() != ProcessState::Starting {
                self.open_gate();
            }
        }

        self.restore_routes();

        let activity = Arc::new(HostActivity {
            host: self.settings.name.clone(),
            default_handler: Arc::clone(&self.default_handler),
        });
        *self.activity.lock() = Some(self.suspend.register_activity(activity));
        if self.suspend.state() != SuspendState::Running {
            self.default_handler.set_suspended(true);
        }

        self.invalidate_root_handler();
        tracing::info!(
            server = %self.server_name,
            host = %self.settings.name,
            aliases = ?self.settings.aliases,
            "Host started"
        );
        self.events.fire(WebEvent::HostStart {
            server: self.server_name.clone(),
            host: self.settings.name.clone(),
        });
        Ok(())
    }

    pub fn stop(&self) {
        if !self.started.swap(false, Ordering::AcqRel) {
            return;
        }
        if let Some(id) = self.activity.lock().take() {
            self.suspend.unregister_activity(id);
        }
        if let Some(id) = self.gate_listener.lock().take() {
            self.process_state.remove_listener(id);
        }
        // Held requests are released with 503 once the gate sender drops.
        self.gate.lock().take();

        self.router.clear();
        self.invalidate_root_handler();
        if let Some(server) = self.server.upgrade() {
            server.unregister_host(&self.settings.name);
        }
        tracing::info!(server = %self.server_name, host = %self.settings.name, "Host stopped");
        self.events.fire(WebEvent::HostStop {
            server: self.server_name.clone(),
            host: self.settings.name.clone(),
        });
    }

    /// Put the default handler, locations and deployments back into the
    /// router after a previous `stop()` cleared it.
    fn restore_routes(&self) {
        if self.router.prefix_handler("/").is_none() {
            self.router.add_prefix_path("/", self.default_handler.clone());
        }
        for location in self.locations.iter() {
            if !self.deployments.contains_key(location.key()) {
                self.router.add_prefix_path(location.key(), location.value().clone());
            }
        }
        for deployed in self.deployments.iter() {
            self.router.add_prefix_path(deployed.key(), deployed.value().handler.clone());
            self.availability.add_prefix_path(deployed.key());
        }
    }

    fn open_gate(&self) {
        let Some(gate) = self.gate.lock().take() else {
            return;
        };
        gate.open();
        self.invalidate_root_handler();
        if let Some(id) = self.gate_listener.lock().take() {
            self.process_state.remove_listener(id);
        }
        tracing::debug!(host = %self.settings.name, "Startup gate removed");
    }

    pub fn is_gated(&self) -> bool {
        self.gate.lock().is_some()
    }

    // --- root handler ---

    /// The current chain, building it if the cache is empty or stale.
    pub fn get_or_create_root_handler(&self) -> Arc<HandlerChain> {
        if let Some(chain) = self.current_chain() {
            return chain;
        }
        let _guard = self.build_lock.lock();
        if let Some(chain) = self.current_chain() {
            return chain;
        }
        let generation = self.generation.load(Ordering::Acquire);
        let chain = Arc::new(self.build_chain(generation));
        self.root.store(Some(Arc::clone(&chain)));
        tracing::debug!(
            host = %self.settings.name,
            generation,
            layers = chain.layers.len(),
            "Root handler built"
        );
        chain
    }

    fn current_chain(&self) -> Option<Arc<HandlerChain>> {
        let generation = self.generation.load(Ordering::Acquire);
        self.root
            .load_full()
            .filter(|chain| chain.generation == generation)
    }

    /// Drop the cached chain; the next request rebuilds it.
    pub fn invalidate_root_handler(&self) {
        self.generation.fetch_add(1, Ordering::AcqRel);
        self.root.store(None);
    }

    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    fn build_chain(&self, generation: u64) -> HandlerChain {
        let mut layers = vec![ChainLayer::PathRouter, ChainLayer::Availability];
        let mut handler: SharedHandler = self.availability.clone();

        handler = Arc::new(ExpectHandler::new(handler));
        layers.push(ChainLayer::Expect);
        handler = Arc::new(OptionsHandler::new(handler));
        layers.push(ChainLayer::Options);

        let mut filters = self.filters.lock().clone();
        filters.sort_by_key(|f| f.priority);
        for filter in filters.iter().rev() {
            handler = filter.apply(handler);
            layers.push(ChainLayer::Filter(filter.name.clone()));
        }

        if let Some(access_log) = self.access_log.lock().clone() {
            handler = access_log.wrap(handler);
            layers.push(ChainLayer::AccessLog);
        }

        handler = Arc::new(AcmeChallengeHandler::new(self.acme.clone(), handler));
        layers.push(ChainLayer::AcmeChallenge);

        if let Some(gate) = self.gate.lock().clone() {
            handler = gate.wrap(handler);
            layers.push(ChainLayer::Gate);
        }

        layers.reverse();
        HandlerChain {
            handler,
            layers,
            generation,
        }
    }

    // --- path handlers ---

    pub fn register_handler(&self, path: &str, handler: SharedHandler) {
        let path = normalize_slashes(path);
        tracing::debug!(host = %self.settings.name, path = %path, "Registering handler");
        self.router.add_prefix_path(&path, handler);
    }

    /// Remove the handler at `path`, restoring a location or the default
    /// handler when one belongs there.
    pub fn unregister_handler(&self, path: &str) {
        let path = normalize_slashes(path);
        tracing::debug!(host = %self.settings.name, path = %path, "Unregistering handler");
        if let Some(location) = self.locations.get(&path) {
            self.router.add_prefix_path(&path, location.value().clone());
        } else if path == "/" {
            self.router.add_prefix_path("/", self.default_handler.clone());
        } else {
            self.router.remove_prefix_path(&path);
        }
    }

    // --- deployments ---

    /// Deploy `handler` and return the context path it was installed at.
    pub fn register_deployment(&self, deployment: Deployment, handler: SharedHandler) -> String {
        let path = deployment.resolve_context_path(&self.settings.default_web_module);
        self.deployments.insert(
            path.clone(),
            Deployed {
                deployment: deployment.clone(),
                handler: handler.clone(),
            },
        );
        self.register_handler(&path, handler);
        self.availability.add_prefix_path(&path);
        self.invalidate_root_handler();
        tracing::info!(
            host = %self.settings.name,
            deployment = %deployment.name,
            context_path = %path,
            "Deployment registered"
        );
        self.events.fire(WebEvent::DeploymentStart {
            server: self.server_name.clone(),
            host: self.settings.name.clone(),
            deployment: deployment.name,
            context_path: path.clone(),
        });
        path
    }

    pub fn unregister_deployment(&self, deployment: &Deployment) -> bool {
        let path = deployment.resolve_context_path(&self.settings.default_web_module);
        if self.deployments.remove(&path).is_none() {
            return false;
        }
        self.availability.remove_prefix_path(&path);
        self.unregister_handler(&path);
        self.invalidate_root_handler();
        tracing::info!(
            host = %self.settings.name,
            deployment = %deployment.name,
            context_path = %path,
            "Deployment unregistered"
        );
        self.events.fire(WebEvent::DeploymentStop {
            server: self.server_name.clone(),
            host: self.settings.name.clone(),
            deployment: deployment.name.clone(),
            context_path: path,
        });
        true
    }

    pub fn deployments(&self) -> Vec<Deployment> {
        self.deployments.iter().map(|d| d.value().deployment.clone()).collect()
    }

    pub fn deployment_at(&self, context_path: &str) -> Option<Deployment> {
        self.deployments
            .get(&normalize_slashes(context_path))
            .map(|d| d.value().deployment.clone())
    }

    // --- locations ---

    pub fn register_location(&self, path: &str, handler: SharedHandler) {
        let path = normalize_slashes(path);
        self.locations.insert(path.clone(), handler.clone());
        if self.deployments.contains_key(&path) {
            tracing::debug!(host = %self.settings.name, path = %path, "Location shadowed by deployment");
            return;
        }
        self.register_handler(&path, handler);
    }

    pub fn unregister_location(&self, path: &str) -> bool {
        let path = normalize_slashes(path);
        if self.locations.remove(&path).is_none() {
            return false;
        }
        if !self.deployments.contains_key(&path) {
            self.unregister_handler(&path);
        }
        true
    }

    pub fn locations(&self) -> Vec<String> {
        let mut paths: Vec<String> = self.locations.iter().map(|l| l.key().clone()).collect();
        paths.sort();
        paths
    }

    // --- filters and access log ---

    /// Attach a filter, replacing one with the same name.
    pub fn add_filter(&self, filter: FilterRef) {
        {
            let mut filters = self.filters.lock();
            match filters.iter_mut().find(|f| f.name == filter.name) {
                Some(existing) => *existing = filter,
                None => filters.push(filter),
            }
        }
        self.invalidate_root_handler();
    }

    pub fn remove_filter(&self, name: &str) -> bool {
        let removed = {
            let mut filters = self.filters.lock();
            let before = filters.len();
            filters.retain(|f| f.name != name);
            filters.len() != before
        };
        if removed {
            self.invalidate_root_handler();
        }
        removed
    }

    pub fn filter_names(&self) -> Vec<String> {
        self.filters.lock().iter().map(|f| f.name.clone()).collect()
    }

    pub fn set_access_log(&self, access_log: Option<AccessLogService>) {
        *self.access_log.lock() = access_log.map(Arc::new);
        self.invalidate_root_handler();
    }

    pub fn has_access_log(&self) -> bool {
        self.access_log.lock().is_some()
    }

    // --- authentication ---

    pub fn register_authentication_mechanism(&self, mechanism: Arc<dyn AuthenticationMechanism>) {
        let name = mechanism.mechanism_name().to_string();
        tracing::debug!(host = %self.settings.name, mechanism = %name, "Authentication mechanism added");
        self.auth_mechanisms.insert(name, mechanism);
    }

    pub fn unregister_authentication_mechanism(&self, name: &str) -> bool {
        self.auth_mechanisms.remove(name).is_some()
    }

    pub fn authentication_mechanism(&self, name: &str) -> Option<Arc<dyn AuthenticationMechanism>> {
        self.auth_mechanisms.get(name).map(|m| Arc::clone(m.value()))
    }

    pub fn authentication_mechanism_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.auth_mechanisms.iter().map(|m| m.key().clone()).collect();
        names.sort();
        names
    }
}

struct Deployed {
    deployment: Deployment,
    handler: SharedHandler,
}

struct GateOpener {
    host: Weak<Host>,
}

impl ProcessStateListener for GateOpener {
    fn state_changed(&self, _previous: ProcessState, current: ProcessState) {
        if current == ProcessState::Starting {
            return;
        }
        if let Some(host) = self.host.upgrade() {
            host.open_gate();
        }
    }
}

struct HostActivity {
    host: String,
    default_handler: Arc<DefaultResponseCodeHandler>,
}

impl ServerActivity for HostActivity {
    fn pre_suspend(&self, done: ActivityCompletion) {
        self.default_handler.set_suspended(true);
        tracing::debug!(host = %self.host, "Host suspended");
        done.done();
    }

    fn suspended(&self, done: ActivityCompletion) {
        done.done();
    }

    fn resume(&self) {
        self.default_handler.set_suspended(false);
        tracing::debug!(host = %self.host, "Host resumed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::filters::ResponseHeaderFilter;
    use crate::http::handler::{handler_fn, HttpHandler};
    use crate::http::response::text_response;
    use axum::http::{HeaderName, HeaderValue};

    struct Fixture {
        server: Arc<Server>,
        process_state: Arc<ProcessStateNotifier>,
        suspend: Arc<SuspendController>,
    }

    impl Fixture {
        fn new(initial: ProcessState) -> Self {
            Self {
                server: Server::new("default-server", "default-host", Arc::new(EventBus::new())),
                process_state: Arc::new(ProcessStateNotifier::new(initial)),
                suspend: Arc::new(SuspendController::new()),
            }
        }

        fn host(&self, settings: HostSettings) -> Arc<Host> {
            Host::new(
                settings,
                HostDependencies {
                    server: self.server.clone(),
                    process_state: self.process_state.clone(),
                    suspend: self.suspend.clone(),
                    acme: AcmeChallengeStore::new(),
                },
            )
        }
    }

    fn named(name: &'static str) -> SharedHandler {
        handler_fn(move |_req: Request<Body>| async move { text_response(StatusCode::OK, name) })
    }

    async fn call(host: &Host, path: &str) -> (StatusCode, String) {
        let chain = host.get_or_create_root_handler();
        let res = chain
            .handler
            .handle(Request::builder().uri(path).body(Body::empty()).unwrap())
            .await;
        let status = res.status();
        let body = axum::body::to_bytes(res.into_body(), usize::MAX).await.unwrap();
        (status, String::from_utf8(body.to_vec()).unwrap())
    }

    #[tokio::test]
    async fn chain_layers_in_order() {
        let fixture = Fixture::new(ProcessState::Starting);
        let host = fixture.host(HostSettings::new("default-host"));
        host.start().unwrap();
        host.set_access_log(Some(AccessLogService::from_pattern("default-host", "common").unwrap()));
        let header = |n: &'static str| -> Arc<dyn HandlerWrapper> {
            Arc::new(ResponseHeaderFilter::new(
                HeaderName::from_static(n),
                HeaderValue::from_static("1"),
            ))
        };
        host.add_filter(FilterRef::new("late", header("x-late")).with_priority(5));
        host.add_filter(FilterRef::new("early", header("x-early")).with_priority(1));
        host.add_filter(FilterRef::new("tie", header("x-tie")).with_priority(5));

        let chain = host.get_or_create_root_handler();
        assert_eq!(
            chain.layers,
            vec![
                ChainLayer::Gate,
                ChainLayer::AcmeChallenge,
                ChainLayer::AccessLog,
                ChainLayer::Filter("early".into()),
                ChainLayer::Filter("late".into()),
                ChainLayer::Filter("tie".into()),
                ChainLayer::Options,
                ChainLayer::Expect,
                ChainLayer::Availability,
                ChainLayer::PathRouter,
            ]
        );
    }

    #[tokio::test]
    async fn cached_until_invalidated() {
        let fixture = Fixture::new(ProcessState::Running);
        let host = fixture.host(HostSettings::new("default-host"));
        host.start().unwrap();

        let first = host.get_or_create_root_handler();
        let again = host.get_or_create_root_handler();
        assert!(Arc::ptr_eq(&first, &again));

        host.add_filter(FilterRef::new(
            "hdr",
            Arc::new(ResponseHeaderFilter::new(
                HeaderName::from_static("x-a"),
                HeaderValue::from_static("1"),
            )),
        ));
        let rebuilt = host.get_or_create_root_handler();
        assert!(!Arc::ptr_eq(&first, &rebuilt));
        assert!(rebuilt.generation > first.generation);

        assert!(host.remove_filter("hdr"));
        assert!(!host.remove_filter("hdr"));
        let after_remove = host.get_or_create_root_handler();
        assert!(!after_remove.layers.contains(&ChainLayer::Filter("hdr".into())));
    }

    #[tokio::test]
    async fn gate_opens_once_on_running() {
        let fixture = Fixture::new(ProcessState::Starting);
        let mut settings = HostSettings::new("default-host");
        settings.queue_requests_on_start = false;
        let host = fixture.host(settings);
        host.start().unwrap();
        assert!(host.is_gated());
        assert_eq!(call(&host, "/").await.0, StatusCode::NOT_FOUND);
        assert_eq!(fixture.process_state.listener_count(), 1);

        let before = host.generation();
        fixture.process_state.set_state(ProcessState::Running);
        assert_eq!(host.generation(), before + 1);
        assert!(!host.is_gated());
        assert_eq!(fixture.process_state.listener_count(), 0);

        fixture.process_state.set_state(ProcessState::Stopping);
        assert_eq!(host.generation(), before + 1);
        assert!(!host.get_or_create_root_handler().layers.contains(&ChainLayer::Gate));
    }

    #[tokio::test]
    async fn already_running_means_no_gate() {
        let fixture = Fixture::new(ProcessState::Running);
        let host = fixture.host(HostSettings::new("default-host"));
        host.start().unwrap();
        assert!(!host.is_gated());
        assert_eq!(fixture.process_state.listener_count(), 0);
    }

    #[tokio::test]
    async fn location_restored_after_unregister() {
        let fixture = Fixture::new(ProcessState::Running);
        let host = fixture.host(HostSettings::new("default-host"));
        host.start().unwrap();

        host.register_location("/static", named("files"));
        host.register_handler("/static", named("override"));
        assert_eq!(call(&host, "/static/a.css").await.1, "override");
        host.unregister_handler("/static/");
        assert_eq!(call(&host, "/static/a.css").await.1, "files");

        host.register_handler("/", named("app"));
        host.unregister_handler("/");
        assert_eq!(call(&host, "/anything").await.0, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn deployment_beats_location_and_restores_it() {
        let fixture = Fixture::new(ProcessState::Running);
        let host = fixture.host(HostSettings::new("default-host"));
        host.start().unwrap();

        host.register_location("/", named("welcome"));
        let root = Deployment::new("ROOT.war", "/ROOT");
        assert_eq!(host.register_deployment(root.clone(), named("root-app")), "/");
        assert_eq!(call(&host, "/").await.1, "root-app");

        host.register_location("/", named("welcome-2"));
        assert_eq!(call(&host, "/").await.1, "root-app");

        assert!(host.unregister_deployment(&root));
        assert_eq!(call(&host, "/").await.1, "welcome-2");
        assert!(!host.unregister_deployment(&root));
    }

    #[tokio::test]
    async fn suspend_answers_unavailable_from_root() {
        let fixture = Fixture::new(ProcessState::Running);
        let host = fixture.host(HostSettings::new("default-host"));
        host.start().unwrap();
        host.register_handler("/app", named("app"));

        assert!(fixture.suspend.suspend(std::time::Duration::from_secs(1)).await);
        assert_eq!(call(&host, "/").await.0, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(call(&host, "/app").await.0, StatusCode::OK);

        fixture.suspend.resume();
        assert_eq!(call(&host, "/").await.0, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn stop_unregisters_everywhere() {
        let fixture = Fixture::new(ProcessState::Starting);
        let host = fixture.host(HostSettings::new("default-host"));
        host.start().unwrap();
        assert!(fixture.server.host("default-host").is_some());
        assert_eq!(fixture.suspend.activity_count(), 1);

        host.stop();
        assert!(fixture.server.host("default-host").is_none());
        assert_eq!(fixture.suspend.activity_count(), 0);
        assert_eq!(fixture.process_state.listener_count(), 0);
        assert!(host.router().prefix_paths().is_empty());
    }

    #[tokio::test]
    async fn restart_reinstalls_routes() {
        let fixture = Fixture::new(ProcessState::Running);
        let host = fixture.host(HostSettings::new("default-host"));
        host.start().unwrap();
        host.register_location("/static", named("files"));
        host.register_deployment(Deployment::new("app.war", "/app"), named("app"));

        host.stop();
        assert!(host.router().prefix_paths().is_empty());
        host.start().unwrap();

        assert_eq!(call(&host, "/").await.0, StatusCode::NOT_FOUND);
        assert_eq!(call(&host, "/static/a").await.1, "files");
        assert_eq!(call(&host, "/app/page").await.1, "app");
        assert_eq!(host.locations(), vec!["/static".to_string()]);

        assert!(fixture.suspend.suspend(std::time::Duration::from_secs(1)).await);
        assert_eq!(call(&host, "/").await.0, StatusCode::SERVICE_UNAVAILABLE);
        fixture.suspend.resume();
    }

    #[test]
    fn gate_listener_removed_when_state_races_start() {
        for _ in 0..50 {
            let fixture = Fixture::new(ProcessState::Starting);
            let host = fixture.host(HostSettings::new("default-host"));
            std::thread::scope(|scope| {
                scope.spawn(|| fixture.process_state.set_state(ProcessState::Running));
                host.start().unwrap();
            });
            assert!(!host.is_gated());
            assert_eq!(fixture.process_state.listener_count(), 0);
        }
    }

    #[tokio::test]
    async fn clearing_access_log_drops_layer() {
        let fixture = Fixture::new(ProcessState::Running);
        let host = fixture.host(HostSettings::new("default-host"));
        host.start().unwrap();
        host.set_access_log(Some(AccessLogService::from_pattern("default-host", "common").unwrap()));
        assert!(host.get_or_create_root_handler().layers.contains(&ChainLayer::AccessLog));

        host.set_access_log(None);
        assert!(!host.has_access_log());
        assert!(!host.get_or_create_root_handler().layers.contains(&ChainLayer::AccessLog));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_builds_see_complete_chains() {
        let fixture = Fixture::new(ProcessState::Running);
        let host = fixture.host(HostSettings::new("default-host"));
        host.start().unwrap();
        let tail = [
            ChainLayer::Options,
            ChainLayer::Expect,
            ChainLayer::Availability,
            ChainLayer::PathRouter,
        ];

        let mut readers = Vec::new();
        for _ in 0..3 {
            let host = Arc::clone(&host);
            let tail = tail.clone();
            readers.push(tokio::spawn(async move {
                for _ in 0..500 {
                    let chain = host.get_or_create_root_handler();
                    assert_eq!(chain.layers.first(), Some(&ChainLayer::AcmeChallenge));
                    assert!(chain.layers.ends_with(&tail), "{:?}", chain.layers);
                    tokio::task::yield_now().await;
                }
            }));
        }

        let writer = {
            let host = Arc::clone(&host);
            tokio::spawn(async move {
                for i in 0..20 {
                    host.add_filter(FilterRef::new(
                        format!("f{i}"),
                        Arc::new(ResponseHeaderFilter::new(
                            HeaderName::from_static("x-f"),
                            HeaderValue::from_static("1"),
                        )),
                    ));
                    let log = (i % 2 == 0)
                        .then(|| AccessLogService::from_pattern("default-host", "common").unwrap());
                    host.set_access_log(log);
                    tokio::task::yield_now().await;
                }
            })
        };

        writer.await.unwrap();
        for reader in readers {
            reader.await.unwrap();
        }

        let chain = host.get_or_create_root_handler();
        let filters: Vec<ChainLayer> = (0..20).map(|i| ChainLayer::Filter(format!("f{i}"))).collect();
        let mut expected = vec![ChainLayer::AcmeChallenge];
        expected.extend(filters);
        expected.extend(tail);
        assert_eq!(chain.layers, expected);
        assert_eq!(chain.generation, host.generation());
    }

    #[test]
    fn alias_membership_is_exact() {
        let fixture = Fixture::new(ProcessState::Running);
        let mut settings = HostSettings::new("default-host");
        settings.aliases = vec!["localhost".into()];
        let host = fixture.host(settings);
        assert!(host.answers_to("localhost"));
        assert!(host.answers_to("default-host"));
        assert!(!host.answers_to("LOCALHOST"));
    }

    struct HeaderAuth;

    impl AuthenticationMechanism for HeaderAuth {
        fn mechanism_name(&self) -> &str {
            "HEADER"
        }

        fn authenticate(&self, req: &Request<Body>) -> AuthOutcome {
            match req.headers().get("x-user").and_then(|v| v.to_str().ok()) {
                Some(user) => AuthOutcome::Authenticated(user.to_string()),
                None => AuthOutcome::NotAttempted,
            }
        }
    }

    #[test]
    fn authentication_mechanisms_by_name() {
        let fixture = Fixture::new(ProcessState::Running);
        let host = fixture.host(HostSettings::new("default-host"));
        host.register_authentication_mechanism(Arc::new(HeaderAuth));
        assert_eq!(host.authentication_mechanism_names(), vec!["HEADER".to_string()]);

        let req = Request::builder().header("x-user", "alice").body(Body::empty()).unwrap();
        let mechanism = host.authentication_mechanism("HEADER").unwrap();
        assert_eq!(mechanism.authenticate(&req), AuthOutcome::Authenticated("alice".into()));
        assert!(host.unregister_authentication_mechanism("HEADER"));
    }
}
