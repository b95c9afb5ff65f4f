//! Per-request context attached by the listener and the router.
//!
//! # Responsibilities
//! - Carry connection facts (peer, local address, secure flag) as extensions
//! - Record which prefix the path router matched
//! - Extract routing-relevant information (host, path)

use std::net::SocketAddr;
use std::sync::Arc;

use axum::body::Body;
use axum::http::{header, Request};

/// Connection facts inserted into every request by the accepting listener.
#[derive(Debug, Clone)]
pub struct ConnectionInfo {
    /// Peer address (rewritten by the proxy protocol when enabled).
    pub peer_addr: SocketAddr,
    /// Address the listener accepted on.
    pub local_addr: SocketAddr,
    /// True for TLS connections and for listeners configured as secure.
    pub secure: bool,
    /// Name of the accepting listener.
    pub listener: Arc<str>,
}

/// Result of a path router match, inserted before the target handler runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchedPath {
    /// Registered prefix that matched.
    pub prefix: String,
    /// Remainder of the request path below the prefix, always starting with '/'.
    pub relative: String,
}

/// Host name the request is addressed to, without port, lowercased.
///
/// HTTP/1.1 carries it in the `Host` header; HTTP/2 in the URI authority.
pub fn request_host(req: &Request<Body>) -> Option<String> {
    let raw = req
        .headers()
        .get(header::HOST)
        .and_then(|h| h.to_str().ok())
        .map(str::to_string)
        .or_else(|| req.uri().authority().map(|a| a.as_str().to_string()))?;
    Some(strip_port(&raw).to_ascii_lowercase())
}

fn strip_port(authority: &str) -> &str {
    if let Some(rest) = authority.strip_prefix('[') {
        // IPv6 literal
        return match rest.find(']') {
            Some(end) => &authority[..end + 2],
            None => authority,
        };
    }
    match authority.rfind(':') {
        Some(idx) => &authority[..idx],
        None => authority,
    }
}
