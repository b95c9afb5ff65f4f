//! Configuration schema definitions.
//!
//! This module defines the resolved configuration record for the web
//! subsystem. All types derive Serde traits for deserialization from
//! config files.

use serde::{Deserialize, Serialize};

/// Root configuration for the web subsystem.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct WebConfig {
    /// Process-wide defaults.
    pub subsystem: SubsystemConfig,

    /// Log output settings.
    pub logging: LoggingConfig,

    /// Prometheus exporter settings.
    pub metrics: MetricsConfig,

    /// Startup and shutdown settings.
    pub lifecycle: LifecycleConfig,

    /// Named interface/port pairs listeners bind to.
    pub socket_bindings: Vec<SocketBindingConfig>,

    /// Named I/O workers.
    pub workers: Vec<WorkerConfig>,

    /// Named buffer pools.
    pub buffer_pools: Vec<BufferPoolConfig>,

    /// Filter definitions referenced by hosts.
    pub filters: FiltersConfig,

    /// Location handler definitions referenced by hosts.
    pub handlers: HandlersConfig,

    pub servers: Vec<ServerConfig>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SubsystemConfig {
    pub default_server: String,
    pub default_virtual_host: String,
    pub statistics_enabled: bool,
    /// Generated (uuid v4) when absent.
    pub instance_id: Option<String>,
}

impl Default for SubsystemConfig {
    fn default() -> Self {
        Self {
            default_server: "default-server".to_string(),
            default_virtual_host: "default-host".to_string(),
            statistics_enabled: false,
            instance_id: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error). `RUST_LOG` overrides it.
    pub level: String,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct MetricsConfig {
    pub enabled: bool,
    /// Bind address of the Prometheus scrape endpoint.
    pub address: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            address: "127.0.0.1:9090".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LifecycleConfig {
    /// Upper bound on the suspend phase of a graceful shutdown.
    pub graceful_timeout_secs: u64,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            graceful_timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SocketBindingConfig {
    pub name: String,
    #[serde(default = "default_interface")]
    pub interface: String,
    pub port: u16,
}

fn default_interface() -> String {
    "0.0.0.0".to_string()
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WorkerConfig {
    pub name: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BufferPoolConfig {
    pub name: String,
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,
}

fn default_buffer_size() -> usize {
    16 * 1024
}

// --- filters ---

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct FiltersConfig {
    pub response_headers: Vec<ResponseHeaderFilterConfig>,
    pub request_limits: Vec<RequestLimitFilterConfig>,
    pub error_pages: Vec<ErrorPageFilterConfig>,
    pub gzip: Vec<GzipFilterConfig>,
    pub rewrites: Vec<RewriteFilterConfig>,
}

impl FiltersConfig {
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.response_headers
            .iter()
            .map(|f| f.name.as_str())
            .chain(self.request_limits.iter().map(|f| f.name.as_str()))
            .chain(self.error_pages.iter().map(|f| f.name.as_str()))
            .chain(self.gzip.iter().map(|f| f.name.as_str()))
            .chain(self.rewrites.iter().map(|f| f.name.as_str()))
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ResponseHeaderFilterConfig {
    pub name: String,
    pub header_name: String,
    pub header_value: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RequestLimitFilterConfig {
    pub name: String,
    pub max_concurrent_requests: usize,
    #[serde(default)]
    pub queue_size: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ErrorPageFilterConfig {
    pub name: String,
    pub code: u16,
    /// File whose contents replace the response body.
    pub path: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GzipFilterConfig {
    pub name: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RewriteFilterConfig {
    pub name: String,
    /// New path; `%U` expands to the request path.
    pub target: String,
    /// Answer 302 with `Location: target` instead of rewriting in place.
    #[serde(default)]
    pub redirect: bool,
}

// --- handlers ---

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct HandlersConfig {
    pub files: Vec<FileHandlerConfig>,
    pub reverse_proxies: Vec<ReverseProxyConfig>,
}

impl HandlersConfig {
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.files
            .iter()
            .map(|h| h.name.as_str())
            .chain(self.reverse_proxies.iter().map(|h| h.name.as_str()))
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FileHandlerConfig {
    pub name: String,
    /// Directory served.
    pub path: String,
    #[serde(default)]
    pub directory_listing: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ReverseProxyConfig {
    pub name: String,
    /// Backend base URLs, e.g. `http://127.0.0.1:3000`.
    pub backends: Vec<String>,

    /// Retries after the first attempt, idempotent methods only.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,

    /// Base delay for exponential backoff in milliseconds.
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    /// Maximum delay for exponential backoff in milliseconds.
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    /// Maximum concurrent requests to each backend.
    #[serde(default = "default_max_backend_conns")]
    pub max_connections_per_backend: usize,

    /// Consecutive failures before a backend is skipped.
    #[serde(default = "default_unhealthy_threshold")]
    pub unhealthy_threshold: usize,

    /// Consecutive successes before a backend is trusted again.
    #[serde(default = "default_healthy_threshold")]
    pub healthy_threshold: usize,
}

fn default_max_retries() -> u32 {
    1
}

fn default_request_timeout_ms() -> u64 {
    30_000
}

fn default_base_delay_ms() -> u64 {
    100
}

fn default_max_delay_ms() -> u64 {
    2000
}

fn default_max_backend_conns() -> usize {
    100
}

fn default_unhealthy_threshold() -> usize {
    3
}

fn default_healthy_threshold() -> usize {
    2
}

// --- servers ---

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    pub name: String,
    pub default_host: String,
    #[serde(default)]
    pub http_listeners: Vec<ListenerConfig>,
    #[serde(default)]
    pub https_listeners: Vec<ListenerConfig>,
    #[serde(default)]
    pub hosts: Vec<HostConfig>,
}

impl ServerConfig {
    /// HTTP listeners then HTTPS listeners, each flagged with whether it is HTTPS.
    pub fn listeners(&self) -> impl Iterator<Item = (&ListenerConfig, bool)> {
        self.http_listeners
            .iter()
            .map(|l| (l, false))
            .chain(self.https_listeners.iter().map(|l| (l, true)))
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ListenerConfig {
    pub name: String,
    pub socket_binding: String,
    #[serde(default = "default_resource")]
    pub worker: String,
    #[serde(default = "default_resource")]
    pub buffer_pool: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub proxy_protocol: bool,
    /// Required for HTTPS listeners.
    #[serde(default)]
    pub tls: Option<TlsConfig>,
    #[serde(flatten)]
    pub options: ListenerOptionsConfig,
    #[serde(flatten)]
    pub socket: SocketOptionsConfig,
}

fn default_resource() -> String {
    "default".to_string()
}

fn default_true() -> bool {
    true
}

/// TLS configuration for an HTTPS listener.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TlsConfig {
    /// Path to certificate file (PEM).
    pub cert_path: String,

    /// Path to private key file (PEM).
    pub key_path: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerOptionsConfig {
    pub max_header_size: usize,
    pub max_entity_size: u64,
    pub max_headers: usize,
    pub max_parameters: usize,
    pub max_cookies: usize,
    pub max_connections: Option<usize>,
    pub read_timeout_ms: u64,
    pub write_timeout_ms: u64,
    pub no_request_timeout_ms: u64,
    pub allow_encoded_slash: bool,
    pub decode_url: bool,
    pub url_charset: String,
    pub always_set_keep_alive: bool,
    pub disallowed_methods: Vec<String>,
    pub secure: bool,
}

impl Default for ListenerOptionsConfig {
    fn default() -> Self {
        Self {
            max_header_size: 1024 * 1024,
            max_entity_size: 10 * 1024 * 1024,
            max_headers: 200,
            max_parameters: 1000,
            max_cookies: 200,
            max_connections: None,
            read_timeout_ms: 90_000,
            write_timeout_ms: 90_000,
            no_request_timeout_ms: 60_000,
            allow_encoded_slash: false,
            decode_url: true,
            url_charset: "UTF-8".to_string(),
            always_set_keep_alive: true,
            disallowed_methods: vec!["TRACE".to_string()],
            secure: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SocketOptionsConfig {
    pub tcp_backlog: u32,
    pub receive_buffer: Option<usize>,
    pub send_buffer: Option<usize>,
    pub tcp_keep_alive: bool,
    pub tcp_no_delay: bool,
}

impl Default for SocketOptionsConfig {
    fn default() -> Self {
        Self {
            tcp_backlog: 10_000,
            receive_buffer: None,
            send_buffer: None,
            tcp_keep_alive: false,
            tcp_no_delay: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HostConfig {
    pub name: String,
    #[serde(default)]
    pub aliases: Vec<String>,
    #[serde(default = "default_response_code")]
    pub default_response_code: u16,
    #[serde(default = "default_true")]
    pub queue_requests_on_start: bool,
    #[serde(default = "default_web_module")]
    pub default_web_module: String,
    /// Code answered for paths outside every deployment. Off when absent.
    #[serde(default)]
    pub unavailable_response_code: Option<u16>,
    #[serde(default)]
    pub locations: Vec<LocationConfig>,
    #[serde(default)]
    pub filter_refs: Vec<FilterRefConfig>,
    #[serde(default)]
    pub access_log: Option<AccessLogConfig>,
}

fn default_response_code() -> u16 {
    404
}

fn default_web_module() -> String {
    "ROOT.war".to_string()
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LocationConfig {
    pub path: String,
    /// Name of a handler under `[handlers]`.
    pub handler: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FilterRefConfig {
    /// Name of a filter under `[filters]`.
    pub name: String,
    /// Lower runs earlier.
    #[serde(default = "default_priority")]
    pub priority: i32,
    #[serde(default)]
    pub predicate: Option<PredicateConfig>,
}

fn default_priority() -> i32 {
    1
}

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct PredicateConfig {
    pub path_prefix: Vec<String>,
    pub methods: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AccessLogConfig {
    /// `common`, `combined` or a custom token pattern.
    pub pattern: String,
}

impl Default for AccessLogConfig {
    fn default() -> Self {
        Self {
            pattern: "common".to_string(),
        }
    }
}
