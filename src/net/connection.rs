//! Accepted connection handling.
//!
//! # Responsibilities
//! - Track live connections per listener
//! - Number connections for tracing
//! - Apply the proxy-protocol and TLS decorators to an accepted stream
//! - Drive the HTTP/1 + HTTP/2 engine until the connection closes or the
//!   listener unbinds

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use hyper::body::Incoming;
use hyper::service::service_fn;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder;
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio_rustls::TlsAcceptor;

use crate::http::request::ConnectionInfo;
use crate::net::listener::OpenListener;
use crate::net::proxy_protocol;

#[derive(Debug, Default)]
struct Counts {
    next_id: AtomicU64,
    active: AtomicU64,
}

/// Live connections of one listener. Clones share the counts.
#[derive(Debug, Clone, Default)]
pub struct ConnectionTracker {
    counts: Arc<Counts>,
}

impl ConnectionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count a connection until the returned guard drops.
    pub fn track(&self) -> ConnectionGuard {
        self.counts.active.fetch_add(1, Ordering::AcqRel);
        let id = self.counts.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        ConnectionGuard {
            counts: Arc::clone(&self.counts),
            id,
        }
    }

    pub fn active_count(&self) -> u64 {
        self.counts.active.load(Ordering::Acquire)
    }
}

/// One tracked connection; `id` is unique within its listener.
#[derive(Debug)]
pub struct ConnectionGuard {
    counts: Arc<Counts>,
    id: u64,
}

impl ConnectionGuard {
    pub fn id(&self) -> u64 {
        self.id
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.counts.active.fetch_sub(1, Ordering::AcqRel);
        tracing::trace!(connection_id = self.id, "Connection closed");
    }
}

/// Everything a connection task needs from its listener.
pub(crate) struct ConnectionContext {
    pub listener: Arc<str>,
    pub local_addr: SocketAddr,
    pub open: Arc<OpenListener>,
    pub builder: Builder<TokioExecutor>,
    pub tls: Option<TlsAcceptor>,
    pub proxy_protocol: bool,
    pub secure: bool,
    pub no_delay: bool,
    pub handshake_timeout: Duration,
    pub tracker: ConnectionTracker,
}

pub(crate) async fn serve_connection(
    ctx: Arc<ConnectionContext>,
    mut stream: TcpStream,
    mut peer_addr: SocketAddr,
    mut stop: watch::Receiver<bool>,
) {
    let guard = ctx.tracker.track();
    let connection_id = guard.id();
    let local_addr = stream.local_addr().unwrap_or(ctx.local_addr);
    if let Err(e) = stream.set_nodelay(ctx.no_delay) {
        tracing::debug!(connection_id, error = %e, "Failed to set TCP_NODELAY");
    }

    if ctx.proxy_protocol {
        match tokio::time::timeout(ctx.handshake_timeout, proxy_protocol::read_header(&mut stream)).await {
            Ok(Ok(header)) => {
                if let Some(source) = header.source {
                    peer_addr = source;
                }
            }
            Ok(Err(e)) => {
                tracing::debug!(connection_id, peer_addr = %peer_addr, error = %e, "Rejected proxy header");
                return;
            }
            Err(_) => {
                tracing::debug!(connection_id, peer_addr = %peer_addr, "Proxy header timed out");
                return;
            }
        }
    }

    let mut info = ConnectionInfo {
        peer_addr,
        local_addr,
        secure: ctx.secure,
        listener: Arc::clone(&ctx.listener),
    };

    tracing::trace!(connection_id, peer_addr = %peer_addr, "Connection accepted");

    match &ctx.tls {
        Some(acceptor) => {
            let handshake = tokio::time::timeout(ctx.handshake_timeout, acceptor.accept(stream)).await;
            match handshake {
                Ok(Ok(tls)) => {
                    info.secure = true;
                    drive(&ctx, TokioIo::new(tls), info, &mut stop).await;
                }
                Ok(Err(e)) => {
                    tracing::debug!(connection_id, peer_addr = %peer_addr, error = %e, "TLS handshake failed");
                }
                Err(_) => {
                    tracing::debug!(connection_id, peer_addr = %peer_addr, "TLS handshake timed out");
                }
            }
        }
        None => drive(&ctx, TokioIo::new(stream), info, &mut stop).await,
    }
    drop(guard);
}

async fn drive<I>(ctx: &ConnectionContext, io: I, info: ConnectionInfo, stop: &mut watch::Receiver<bool>)
where
    I: hyper::rt::Read + hyper::rt::Write + Unpin + Send + 'static,
{
    let open = Arc::clone(&ctx.open);
    let service = service_fn(move |req: hyper::Request<Incoming>| {
        let open = Arc::clone(&open);
        let info = info.clone();
        async move {
            let mut req = req.map(Body::new);
            req.extensions_mut().insert(info);
            Ok::<_, Infallible>(open.dispatch(req).await)
        }
    });

    let conn = ctx.builder.serve_connection_with_upgrades(io, service);
    tokio::pin!(conn);
    tokio::select! {
        result = conn.as_mut() => {
            if let Err(e) = result {
                tracing::debug!(listener = %ctx.listener, error = %e, "Connection error");
            }
        }
        _ = stop.changed() => {
            conn.as_mut().graceful_shutdown();
            if let Err(e) = conn.await {
                tracing::debug!(listener = %ctx.listener, error = %e, "Connection error while draining");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guards_count_and_number_connections() {
        let tracker = ConnectionTracker::new();
        let first = tracker.track();
        let second = tracker.clone().track();
        assert_eq!(tracker.active_count(), 2);
        assert_eq!((first.id(), second.id()), (1, 2));

        drop(first);
        assert_eq!(tracker.active_count(), 1);
        drop(second);
        assert_eq!(tracker.active_count(), 0);
        assert_eq!(tracker.track().id(), 3);
    }
}
