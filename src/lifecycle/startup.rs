//! Startup orchestration.
//!
//! # Responsibilities
//! - Build the subsystem from a validated configuration
//! - Initialize resources in dependency order
//! - Bind listeners and begin accepting traffic
//! - Tear everything down in reverse order
//!
//! # Design Decisions
//! - Fail fast: any startup error is fatal, and what already started is
//!   stopped before the error is returned
//! - Subsystems initialize in order, not concurrently
//! - Listeners start last (traffic only when ready)

use std::collections::HashMap;
use std::net::IpAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use axum::http::{HeaderName, HeaderValue, Method, StatusCode};

use crate::config::schema::{
    FilterRefConfig, HostConfig, ListenerConfig, ListenerOptionsConfig, ServerConfig, SocketOptionsConfig,
    WebConfig,
};
use crate::config::{validate_config, ConfigError};
use crate::host::{Host, HostDependencies, HostSettings};
use crate::http::access_log::AccessLogService;
use crate::http::filters::{
    ErrorPageFilter, FilterPredicate, FilterRef, GzipFilter, RequestLimitFilter, ResponseHeaderFilter, RewriteFilter,
};
use crate::http::handler::{HandlerWrapper, SharedHandler};
use crate::http::handlers::{FileHandler, ReverseProxyHandler, ReverseProxySettings};
use crate::lifecycle::process_state::ProcessState;
use crate::net::listener::{
    ListenerDependencies, ListenerError, ListenerOptions, ListenerProtocol, ListenerService, ListenerSettings,
    TlsSettings,
};
use crate::net::resources::{BufferPool, Worker};
use crate::net::socket::{SocketBinding, SocketOptions};
use crate::resilience::retries::RetryPolicy;
use crate::server::registry::{RegistryError, Subsystem, SubsystemSettings};
use crate::server::Server;

const DEFAULT_RESOURCE: &str = "default";

#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error(transparent)]
    Listener(#[from] ListenerError),
    #[error("invalid {field}: {reason}")]
    Invalid { field: String, reason: String },
}

fn invalid(field: impl Into<String>, reason: impl Into<String>) -> StartupError {
    StartupError::Invalid {
        field: field.into(),
        reason: reason.into(),
    }
}

fn status(field: &str, code: u16) -> Result<StatusCode, StartupError> {
    StatusCode::from_u16(code).map_err(|_| invalid(field, format!("{code} is not a status code")))
}

fn method(field: &str, name: &str) -> Result<Method, StartupError> {
    Method::from_bytes(name.as_bytes()).map_err(|_| invalid(field, format!("'{name}' is not an HTTP method")))
}

/// Everything started from one configuration.
pub struct Bootstrap {
    subsystem: Arc<Subsystem>,
    servers: Vec<Arc<Server>>,
    hosts: Vec<Arc<Host>>,
    listeners: Vec<Arc<ListenerService>>,
    graceful_timeout: Duration,
}

impl Bootstrap {
    /// Validate `config` and start every component it describes.
    ///
    /// The process stays `Starting` (hosts keep their startup gates) until
    /// [`Bootstrap::mark_running`] is called.
    pub async fn start(config: &WebConfig) -> Result<Self, StartupError> {
        validate_config(config).map_err(ConfigError::Validation)?;

        let defaults = SubsystemSettings::default();
        let subsystem = Subsystem::new(SubsystemSettings {
            default_server: config.subsystem.default_server.clone(),
            default_virtual_host: config.subsystem.default_virtual_host.clone(),
            statistics_enabled: config.subsystem.statistics_enabled,
            instance_id: config.subsystem.instance_id.clone().unwrap_or(defaults.instance_id),
        });
        tracing::info!(
            instance_id = %subsystem.instance_id(),
            servers = config.servers.len(),
            "Web subsystem starting"
        );

        let mut boot = Self {
            subsystem,
            servers: Vec::new(),
            hosts: Vec::new(),
            listeners: Vec::new(),
            graceful_timeout: Duration::from_secs(config.lifecycle.graceful_timeout_secs),
        };
        if let Err(e) = boot.start_components(config).await {
            tracing::error!(error = %e, "Startup failed; stopping what was started");
            boot.stop().await;
            return Err(e);
        }
        tracing::info!(
            servers = boot.servers.len(),
            hosts = boot.hosts.len(),
            listeners = boot.listeners.len(),
            "Web subsystem started"
        );
        Ok(boot)
    }

    async fn start_components(&mut self, config: &WebConfig) -> Result<(), StartupError> {
        // 1. Socket bindings
        for binding in &config.socket_bindings {
            let interface: IpAddr = binding
                .interface
                .parse()
                .map_err(|_| invalid(format!("socket binding '{}'", binding.name), "bad interface"))?;
            self.subsystem
                .socket_bindings()
                .add_binding(SocketBinding::new(&binding.name, interface, binding.port))?;
        }

        // 2. Workers
        let mut workers = HashMap::from([(DEFAULT_RESOURCE.to_string(), Worker::current(DEFAULT_RESOURCE))]);
        for worker in &config.workers {
            workers.insert(worker.name.clone(), Worker::current(&worker.name));
        }

        // 3. Buffer pools
        let mut pools = HashMap::from([(
            DEFAULT_RESOURCE.to_string(),
            BufferPool::new(DEFAULT_RESOURCE, BufferPool::DEFAULT_BUFFER_SIZE),
        )]);
        for pool in &config.buffer_pools {
            pools.insert(pool.name.clone(), BufferPool::new(&pool.name, pool.buffer_size));
        }

        let filters = build_filters(config)?;
        let handlers = build_handlers(config)?;

        // 4. Servers
        for server_config in &config.servers {
            let server = Server::new(&server_config.name, &server_config.default_host, self.subsystem.events());
            self.subsystem.register_server(Arc::clone(&server))?;
            server.start();
            self.servers.push(Arc::clone(&server));

            // 5. Hosts
            for host_config in &server_config.hosts {
                let host = self.start_host(&server, host_config, &filters, &handlers)?;
                self.hosts.push(host);
            }
        }

        // 6. Listeners
        for server_config in &config.servers {
            let server = self.subsystem.server(&server_config.name)?;
            for (listener_config, https) in server_config.listeners() {
                let listener = self.build_listener(&server, server_config, listener_config, https, &workers, &pools)?;
                self.listeners.push(Arc::clone(&listener));
                listener.start().await?;
            }
        }
        Ok(())
    }

    fn start_host(
        &self,
        server: &Arc<Server>,
        config: &HostConfig,
        filters: &HashMap<String, Arc<dyn HandlerWrapper>>,
        handlers: &HashMap<String, SharedHandler>,
    ) -> Result<Arc<Host>, StartupError> {
        let field = format!("host '{}'", config.name);
        let settings = HostSettings {
            name: config.name.clone(),
            aliases: config.aliases.clone(),
            default_web_module: config.default_web_module.clone(),
            default_response_code: status(&field, config.default_response_code)?,
            queue_requests_on_start: config.queue_requests_on_start,
            unavailable_response_code: config
                .unavailable_response_code
                .map(|code| status(&field, code))
                .transpose()?,
        };
        let host = Host::new(
            settings,
            HostDependencies {
                server: Arc::clone(server),
                process_state: Arc::clone(self.subsystem.process_state()),
                suspend: Arc::clone(self.subsystem.suspend_controller()),
                acme: self.subsystem.acme().clone(),
            },
        );

        for location in &config.locations {
            let handler = handlers
                .get(&location.handler)
                .ok_or_else(|| invalid(&field, format!("unknown handler '{}'", location.handler)))?;
            host.register_location(&location.path, SharedHandler::clone(handler));
        }
        for filter_ref in &config.filter_refs {
            host.add_filter(filter_ref_for(filter_ref, filters, &field)?);
        }
        if let Some(access_log) = &config.access_log {
            let service = AccessLogService::from_pattern(&config.name, &access_log.pattern)
                .map_err(|e| invalid(format!("{field} access log"), e.to_string()))?;
            host.set_access_log(Some(service));
        }

        host.start()?;
        Ok(host)
    }

    fn build_listener(
        &self,
        server: &Arc<Server>,
        server_config: &ServerConfig,
        config: &ListenerConfig,
        https: bool,
        workers: &HashMap<String, Worker>,
        pools: &HashMap<String, BufferPool>,
    ) -> Result<Arc<ListenerService>, StartupError> {
        let field = format!("listener '{}' of server '{}'", config.name, server_config.name);
        let worker = workers
            .get(&config.worker)
            .cloned()
            .ok_or_else(|| invalid(&field, format!("unknown worker '{}'", config.worker)))?;
        let buffer_pool = pools
            .get(&config.buffer_pool)
            .cloned()
            .ok_or_else(|| invalid(&field, format!("unknown buffer pool '{}'", config.buffer_pool)))?;

        let protocol = if https {
            let tls = config
                .tls
                .as_ref()
                .ok_or_else(|| invalid(&field, "HTTPS listener without TLS settings"))?;
            ListenerProtocol::Https(TlsSettings {
                cert_path: tls.cert_path.clone().into(),
                key_path: tls.key_path.clone().into(),
            })
        } else {
            ListenerProtocol::Http
        };

        let settings = ListenerSettings {
            name: config.name.clone(),
            socket_binding: config.socket_binding.clone(),
            enabled: config.enabled,
            proxy_protocol: config.proxy_protocol,
            protocol,
            options: listener_options(&config.options, &field)?,
            socket: socket_options(&config.socket),
        };
        Ok(ListenerService::new(
            settings,
            ListenerDependencies {
                server: Arc::clone(server),
                subsystem: Arc::clone(&self.subsystem),
                worker,
                buffer_pool,
            },
        ))
    }

    pub fn subsystem(&self) -> &Arc<Subsystem> {
        &self.subsystem
    }

    pub fn servers(&self) -> &[Arc<Server>] {
        &self.servers
    }

    pub fn hosts(&self) -> &[Arc<Host>] {
        &self.hosts
    }

    pub fn listeners(&self) -> &[Arc<ListenerService>] {
        &self.listeners
    }

    pub fn listener(&self, name: &str) -> Option<&Arc<ListenerService>> {
        self.listeners.iter().find(|l| l.name() == name)
    }

    pub fn host(&self, name: &str) -> Option<&Arc<Host>> {
        self.hosts.iter().find(|h| h.name() == name)
    }

    /// Leave `Starting`; opens every host's startup gate.
    pub fn mark_running(&self) {
        self.subsystem.process_state().set_state(ProcessState::Running);
    }

    /// Suspend (bounded by the graceful timeout), start rejecting with the
    /// shutdown guard, then stop everything.
    pub async fn shutdown(&self) {
        let process_state = self.subsystem.process_state();
        process_state.set_state(ProcessState::Stopping);
        let drained = self.subsystem.suspend_controller().suspend(self.graceful_timeout).await;
        tracing::info!(drained, timeout = ?self.graceful_timeout, "Suspend phase finished");
        self.subsystem.shutdown().trigger();
        self.stop().await;
    }

    /// Stop listeners, hosts and servers in reverse start order.
    pub async fn stop(&self) {
        for listener in self.listeners.iter().rev() {
            listener.stop().await;
        }
        for host in self.hosts.iter().rev() {
            host.stop();
        }
        for server in self.servers.iter().rev() {
            server.stop();
            self.subsystem.unregister_server(server.name());
        }
        self.subsystem.clear();
        self.subsystem.process_state().set_state(ProcessState::Stopped);
        tracing::info!("Web subsystem stopped");
    }
}

fn build_filters(config: &WebConfig) -> Result<HashMap<String, Arc<dyn HandlerWrapper>>, StartupError> {
    let mut filters: HashMap<String, Arc<dyn HandlerWrapper>> = HashMap::new();
    for filter in &config.filters.response_headers {
        let field = format!("filter '{}'", filter.name);
        let name = HeaderName::from_bytes(filter.header_name.as_bytes())
            .map_err(|e| invalid(&field, e.to_string()))?;
        let value = HeaderValue::from_str(&filter.header_value).map_err(|e| invalid(&field, e.to_string()))?;
        filters.insert(filter.name.clone(), Arc::new(ResponseHeaderFilter::new(name, value)));
    }
    for filter in &config.filters.request_limits {
        filters.insert(
            filter.name.clone(),
            Arc::new(RequestLimitFilter::new(filter.max_concurrent_requests, filter.queue_size)),
        );
    }
    for filter in &config.filters.error_pages {
        let field = format!("filter '{}'", filter.name);
        let page = ErrorPageFilter::from_file(status(&field, filter.code)?, Path::new(&filter.path))
            .map_err(|e| invalid(&field, format!("cannot read {}: {e}", filter.path)))?;
        filters.insert(filter.name.clone(), Arc::new(page));
    }
    for filter in &config.filters.gzip {
        filters.insert(filter.name.clone(), Arc::new(GzipFilter::new()));
    }
    for filter in &config.filters.rewrites {
        filters.insert(
            filter.name.clone(),
            Arc::new(RewriteFilter::new(filter.target.clone(), filter.redirect)),
        );
    }
    Ok(filters)
}

fn build_handlers(config: &WebConfig) -> Result<HashMap<String, SharedHandler>, StartupError> {
    let mut handlers: HashMap<String, SharedHandler> = HashMap::new();
    for file in &config.handlers.files {
        handlers.insert(file.name.clone(), Arc::new(FileHandler::new(&file.path, file.directory_listing)));
    }
    for proxy in &config.handlers.reverse_proxies {
        let settings = ReverseProxySettings {
            name: proxy.name.clone(),
            backends: proxy.backends.clone(),
            retry: RetryPolicy {
                max_retries: proxy.max_retries,
                base_delay: Duration::from_millis(proxy.base_delay_ms),
                max_delay: Duration::from_millis(proxy.max_delay_ms),
            },
            request_timeout: Duration::from_millis(proxy.request_timeout_ms),
            max_connections_per_backend: proxy.max_connections_per_backend,
            unhealthy_threshold: proxy.unhealthy_threshold,
            healthy_threshold: proxy.healthy_threshold,
        };
        let handler = ReverseProxyHandler::new(settings)
            .map_err(|e| invalid(format!("handler '{}'", proxy.name), e.to_string()))?;
        handlers.insert(proxy.name.clone(), Arc::new(handler));
    }
    Ok(handlers)
}

fn filter_ref_for(
    config: &FilterRefConfig,
    filters: &HashMap<String, Arc<dyn HandlerWrapper>>,
    field: &str,
) -> Result<FilterRef, StartupError> {
    let filter = filters
        .get(&config.name)
        .ok_or_else(|| invalid(field, format!("unknown filter '{}'", config.name)))?;
    let mut filter_ref = FilterRef::new(&config.name, Arc::clone(filter)).with_priority(config.priority);
    if let Some(predicate) = &config.predicate {
        let methods = predicate
            .methods
            .iter()
            .map(|m| method(field, m))
            .collect::<Result<Vec<_>, _>>()?;
        filter_ref = filter_ref.with_predicate(FilterPredicate {
            path_prefixes: predicate.path_prefix.clone(),
            methods,
        });
    }
    Ok(filter_ref)
}

pub fn listener_options(config: &ListenerOptionsConfig, field: &str) -> Result<ListenerOptions, StartupError> {
    let disallowed_methods = config
        .disallowed_methods
        .iter()
        .map(|m| method(field, m))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(ListenerOptions {
        max_header_size: config.max_header_size,
        max_entity_size: config.max_entity_size,
        max_headers: config.max_headers,
        max_parameters: config.max_parameters,
        max_cookies: config.max_cookies,
        max_connections: config.max_connections,
        read_timeout: Duration::from_millis(config.read_timeout_ms),
        write_timeout: Duration::from_millis(config.write_timeout_ms),
        no_request_timeout: Duration::from_millis(config.no_request_timeout_ms),
        allow_encoded_slash: config.allow_encoded_slash,
        decode_url: config.decode_url,
        url_charset: config.url_charset.clone(),
        always_set_keep_alive: config.always_set_keep_alive,
        disallowed_methods,
        secure: config.secure,
    })
}

pub fn socket_options(config: &SocketOptionsConfig) -> SocketOptions {
    SocketOptions {
        tcp_backlog: config.tcp_backlog,
        receive_buffer: config.receive_buffer,
        send_buffer: config.send_buffer,
        tcp_keep_alive: config.tcp_keep_alive,
        tcp_no_delay: config.tcp_no_delay,
    }
}
