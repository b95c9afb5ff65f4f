//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Check referential integrity (listeners reference existing socket
//!   bindings, workers and buffer pools; hosts reference existing filters
//!   and handlers)
//! - Validate value ranges (status codes, limits, ports)
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: WebConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::collections::HashSet;
use std::fmt;
use std::net::{IpAddr, SocketAddr};

use axum::http::Method;

use crate::config::schema::{HostConfig, ListenerConfig, WebConfig};
use crate::http::access_log::AccessLogPattern;

/// A single semantic problem, located by a dotted path into the document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl ValidationError {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

#[derive(Default)]
struct Errors(Vec<ValidationError>);

impl Errors {
    fn push(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.0.push(ValidationError::new(field, message));
    }

    /// Record a duplicate for every name seen twice.
    fn unique<'a>(&mut self, field: &str, names: impl Iterator<Item = &'a str>) -> HashSet<&'a str> {
        let mut seen = HashSet::new();
        for name in names {
            if name.is_empty() {
                self.push(field, "name must not be empty");
            } else if !seen.insert(name) {
                self.push(field, format!("duplicate name '{name}'"));
            }
        }
        seen
    }
}

fn valid_status(code: u16) -> bool {
    (100..=599).contains(&code)
}

/// Check a parsed config. All problems are reported at once.
pub fn validate_config(config: &WebConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Errors::default();

    let bindings = errors.unique("socket_bindings", config.socket_bindings.iter().map(|b| b.name.as_str()));
    for (i, binding) in config.socket_bindings.iter().enumerate() {
        if binding.interface.parse::<IpAddr>().is_err() {
            errors.push(
                format!("socket_bindings[{i}].interface"),
                format!("'{}' is not an IP address", binding.interface),
            );
        }
    }

    let mut workers = errors.unique("workers", config.workers.iter().map(|w| w.name.as_str()));
    let mut pools = errors.unique("buffer_pools", config.buffer_pools.iter().map(|p| p.name.as_str()));
    // The default worker and buffer pool always exist.
    workers.insert("default");
    pools.insert("default");
    for (i, pool) in config.buffer_pools.iter().enumerate() {
        if pool.buffer_size == 0 {
            errors.push(format!("buffer_pools[{i}].buffer_size"), "must be positive");
        }
    }

    if config.metrics.enabled && config.metrics.address.parse::<SocketAddr>().is_err() {
        errors.push("metrics.address", format!("'{}' is not a socket address", config.metrics.address));
    }
    if config.lifecycle.graceful_timeout_secs == 0 {
        errors.push("lifecycle.graceful_timeout_secs", "must be positive");
    }

    let filters = errors.unique("filters", config.filters.names());
    for (i, filter) in config.filters.response_headers.iter().enumerate() {
        if axum::http::HeaderName::from_bytes(filter.header_name.as_bytes()).is_err() {
            errors.push(
                format!("filters.response_headers[{i}].header_name"),
                format!("'{}' is not a valid header name", filter.header_name),
            );
        }
        if axum::http::HeaderValue::from_str(&filter.header_value).is_err() {
            errors.push(format!("filters.response_headers[{i}].header_value"), "not a valid header value");
        }
    }
    for (i, filter) in config.filters.request_limits.iter().enumerate() {
        if filter.max_concurrent_requests == 0 {
            errors.push(format!("filters.request_limits[{i}].max_concurrent_requests"), "must be positive");
        }
    }
    for (i, filter) in config.filters.error_pages.iter().enumerate() {
        if !valid_status(filter.code) {
            errors.push(format!("filters.error_pages[{i}].code"), format!("{} is not a status code", filter.code));
        }
    }

    for (i, filter) in config.filters.rewrites.iter().enumerate() {
        let field = format!("filters.rewrites[{i}].target");
        if filter.target.is_empty() {
            errors.push(field, "must not be empty");
        } else if !filter.redirect && !filter.target.starts_with('/') {
            errors.push(field, format!("'{}' must start with '/' unless redirecting", filter.target));
        }
    }

    let handlers = errors.unique("handlers", config.handlers.names());
    for (i, proxy) in config.handlers.reverse_proxies.iter().enumerate() {
        let field = format!("handlers.reverse_proxies[{i}]");
        if proxy.backends.is_empty() {
            errors.push(format!("{field}.backends"), "at least one backend is required");
        }
        for backend in &proxy.backends {
            match url::Url::parse(backend) {
                Ok(url) if url.scheme() == "http" && url.host_str().is_some() => {}
                _ => errors.push(format!("{field}.backends"), format!("'{backend}' is not an http:// URL")),
            }
        }
        if proxy.request_timeout_ms == 0 {
            errors.push(format!("{field}.request_timeout_ms"), "must be positive");
        }
        if proxy.max_connections_per_backend == 0 {
            errors.push(format!("{field}.max_connections_per_backend"), "must be positive");
        }
        if proxy.unhealthy_threshold == 0 || proxy.healthy_threshold == 0 {
            errors.push(field, "health thresholds must be positive");
        }
    }

    let servers = errors.unique("servers", config.servers.iter().map(|s| s.name.as_str()));
    if !config.servers.is_empty() && !servers.contains(config.subsystem.default_server.as_str()) {
        errors.push(
            "subsystem.default_server",
            format!("server '{}' is not defined", config.subsystem.default_server),
        );
    }

    // Listener names are unique process-wide; so are socket binding claims.
    let mut listener_names = HashSet::new();
    let mut claimed_bindings = HashSet::new();
    for (s, server) in config.servers.iter().enumerate() {
        let hosts = errors.unique(&format!("servers[{s}].hosts"), server.hosts.iter().map(|h| h.name.as_str()));
        if !hosts.contains(server.default_host.as_str()) {
            errors.push(
                format!("servers[{s}].default_host"),
                format!("host '{}' is not defined", server.default_host),
            );
        }

        for (listener, https) in server.listeners() {
            let field = format!("servers[{s}].listeners.{}", listener.name);
            if !listener_names.insert(listener.name.as_str()) {
                errors.push(&field, "duplicate listener name");
            }
            if !bindings.contains(listener.socket_binding.as_str()) {
                errors.push(
                    format!("{field}.socket_binding"),
                    format!("socket binding '{}' is not defined", listener.socket_binding),
                );
            } else if !claimed_bindings.insert(listener.socket_binding.as_str()) {
                errors.push(
                    format!("{field}.socket_binding"),
                    format!("socket binding '{}' is used by another listener", listener.socket_binding),
                );
            }
            if !workers.contains(listener.worker.as_str()) {
                errors.push(format!("{field}.worker"), format!("worker '{}' is not defined", listener.worker));
            }
            if !pools.contains(listener.buffer_pool.as_str()) {
                errors.push(
                    format!("{field}.buffer_pool"),
                    format!("buffer pool '{}' is not defined", listener.buffer_pool),
                );
            }
            if https && listener.tls.is_none() {
                errors.push(format!("{field}.tls"), "HTTPS listeners require cert_path and key_path");
            }
            validate_listener_options(listener, &field, &mut errors);
        }

        for host in &server.hosts {
            validate_host(host, &format!("servers[{s}].hosts.{}", host.name), &filters, &handlers, &mut errors);
        }
    }

    if errors.0.is_empty() {
        Ok(())
    } else {
        Err(errors.0)
    }
}

fn validate_listener_options(listener: &ListenerConfig, field: &str, errors: &mut Errors) {
    let options = &listener.options;
    let positive = [
        ("max_header_size", options.max_header_size as u64),
        ("max_entity_size", options.max_entity_size),
        ("max_headers", options.max_headers as u64),
        ("max_parameters", options.max_parameters as u64),
        ("max_cookies", options.max_cookies as u64),
        ("read_timeout_ms", options.read_timeout_ms),
        ("write_timeout_ms", options.write_timeout_ms),
        ("no_request_timeout_ms", options.no_request_timeout_ms),
        ("tcp_backlog", u64::from(listener.socket.tcp_backlog)),
    ];
    for (name, value) in positive {
        if value == 0 {
            errors.push(format!("{field}.{name}"), "must be positive");
        }
    }
    if options.max_connections == Some(0) {
        errors.push(format!("{field}.max_connections"), "must be positive when set");
    }
    for method in &options.disallowed_methods {
        if Method::from_bytes(method.as_bytes()).is_err() {
            errors.push(format!("{field}.disallowed_methods"), format!("'{method}' is not an HTTP method"));
        }
    }
}

fn validate_host(
    host: &HostConfig,
    field: &str,
    filters: &HashSet<&str>,
    handlers: &HashSet<&str>,
    errors: &mut Errors,
) {
    if !valid_status(host.default_response_code) {
        errors.push(
            format!("{field}.default_response_code"),
            format!("{} is not a status code", host.default_response_code),
        );
    }
    if let Some(code) = host.unavailable_response_code {
        if !valid_status(code) {
            errors.push(format!("{field}.unavailable_response_code"), format!("{code} is not a status code"));
        }
    }

    let mut paths = HashSet::new();
    for location in &host.locations {
        if !paths.insert(crate::routing::matcher::normalize_slashes(&location.path)) {
            errors.push(format!("{field}.locations"), format!("duplicate location '{}'", location.path));
        }
        if !handlers.contains(location.handler.as_str()) {
            errors.push(
                format!("{field}.locations"),
                format!("handler '{}' is not defined", location.handler),
            );
        }
    }

    let mut refs = HashSet::new();
    for filter_ref in &host.filter_refs {
        if !refs.insert(filter_ref.name.as_str()) {
            errors.push(format!("{field}.filter_refs"), format!("filter '{}' referenced twice", filter_ref.name));
        }
        if !filters.contains(filter_ref.name.as_str()) {
            errors.push(format!("{field}.filter_refs"), format!("filter '{}' is not defined", filter_ref.name));
        }
        if let Some(predicate) = &filter_ref.predicate {
            for method in &predicate.methods {
                if Method::from_bytes(method.as_bytes()).is_err() {
                    errors.push(
                        format!("{field}.filter_refs.{}.predicate", filter_ref.name),
                        format!("'{method}' is not an HTTP method"),
                    );
                }
            }
        }
    }

    if let Some(access_log) = &host.access_log {
        if let Err(e) = AccessLogPattern::parse(&access_log.pattern) {
            errors.push(format!("{field}.access_log.pattern"), e.to_string());
        }
    }
}
