//! Host-header dispatch.
//!
//! # Responsibilities
//! - Map the request's host name (case-insensitive, port stripped) to a host
//! - Fall back to the server's default host
//! - Hand the request to that host's current root handler

use std::collections::HashMap;
use std::sync::Arc;

use arc_swap::ArcSwap;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::response::Response;
use futures_util::future::BoxFuture;
use parking_lot::Mutex;

use crate::host::Host;
use crate::http::handler::HttpHandler;
use crate::http::request::request_host;
use crate::http::response::status_response;

pub struct VirtualHostRouter {
    default_host: String,
    by_name: ArcSwap<HashMap<String, Arc<Host>>>,
    write_lock: Mutex<()>,
}

impl VirtualHostRouter {
    pub fn new(default_host: impl Into<String>) -> Self {
        Self {
            default_host: default_host.into().to_ascii_lowercase(),
            by_name: ArcSwap::from_pointee(HashMap::new()),
            write_lock: Mutex::new(()),
        }
    }

    pub fn default_host(&self) -> &str {
        &self.default_host
    }

    /// Route the host's name and aliases to it.
    pub fn add_host(&self, host: Arc<Host>) {
        let _guard = self.write_lock.lock();
        let mut next = HashMap::clone(&self.by_name.load());
        for name in host.names() {
            next.insert(name.to_ascii_lowercase(), Arc::clone(&host));
        }
        self.by_name.store(Arc::new(next));
    }

    pub fn remove_host(&self, name: &str) {
        let _guard = self.write_lock.lock();
        let mut next = HashMap::clone(&self.by_name.load());
        next.retain(|_, host| host.name() != name);
        self.by_name.store(Arc::new(next));
    }

    /// Host answering `name`, or the default host.
    pub fn resolve(&self, name: Option<&str>) -> Option<Arc<Host>> {
        let table = self.by_name.load();
        name.and_then(|n| table.get(&n.to_ascii_lowercase()))
            .or_else(|| table.get(&self.default_host))
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.by_name.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_name.load().is_empty()
    }
}

impl HttpHandler for VirtualHostRouter {
    fn handle(&self, req: Request<Body>) -> BoxFuture<'_, Response> {
        let name = request_host(&req);
        match self.resolve(name.as_deref()) {
            Some(host) => {
                let chain = host.get_or_create_root_handler();
                Box::pin(async move { chain.handler.handle(req).await })
            }
            None => {
                tracing::debug!(host = ?name, "No virtual host matched");
                Box::pin(async { status_response(StatusCode::NOT_FOUND) })
            }
        }
    }
}
