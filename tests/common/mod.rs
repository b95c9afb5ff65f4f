//! Shared utilities for integration tests.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use vhost_web::config::parse_config;
use vhost_web::lifecycle::Bootstrap;

/// Parse `doc` and start everything it describes, leaving the process in
/// `Starting` so tests can observe startup gates.
pub async fn boot(doc: &str) -> Bootstrap {
    let config = parse_config(doc).unwrap();
    Bootstrap::start(&config).await.unwrap()
}

/// Like [`boot`], then mark the process running.
pub async fn boot_running(doc: &str) -> Bootstrap {
    let boot = boot(doc).await;
    boot.mark_running();
    boot
}

pub fn listener_addr(boot: &Bootstrap, listener: &str) -> SocketAddr {
    boot.listener(listener).unwrap().local_addr().unwrap()
}

pub fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .no_proxy()
        .timeout(Duration::from_secs(5))
        .build()
        .unwrap()
}

/// GET `path` with an explicit `Host` header.
pub async fn get_host(addr: SocketAddr, host: &str, path: &str) -> reqwest::Response {
    client()
        .get(format!("http://{addr}{path}"))
        .header("host", host)
        .send()
        .await
        .unwrap()
}

/// Write `request` verbatim and read until the peer closes.
pub async fn raw_request(addr: SocketAddr, request: &[u8]) -> String {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream.write_all(request).await.unwrap();
    let mut response = Vec::new();
    let _ = tokio::time::timeout(Duration::from_secs(5), stream.read_to_end(&mut response)).await;
    String::from_utf8_lossy(&response).into_owned()
}

/// Start a mock backend that answers every request with `body`.
pub async fn start_mock_backend(body: &'static str) -> SocketAddr {
    start_programmable_backend(move |_request| (200, body.to_string())).await
}

/// Start a mock backend whose response is computed from the raw request head.
pub async fn start_programmable_backend<F>(f: F) -> SocketAddr
where
    F: Fn(&str) -> (u16, String) + Send + Sync + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let f = std::sync::Arc::new(f);

    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            let f = f.clone();
            tokio::spawn(async move {
                let mut head = Vec::new();
                let mut buf = [0u8; 1024];
                while !head.windows(4).any(|w| w == b"\r\n\r\n") {
                    match socket.read(&mut buf).await {
                        Ok(0) | Err(_) => return,
                        Ok(n) => head.extend_from_slice(&buf[..n]),
                    }
                }
                let (status, body) = f(&String::from_utf8_lossy(&head));
                let status_text = match status {
                    200 => "200 OK",
                    404 => "404 Not Found",
                    502 => "502 Bad Gateway",
                    503 => "503 Service Unavailable",
                    _ => "500 Internal Server Error",
                };
                let response = format!(
                    "HTTP/1.1 {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    status_text,
                    body.len(),
                    body
                );
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            });
        }
    });
    addr
}

/// One server with one HTTP listener on an ephemeral loopback port.
pub fn single_listener_config(extra: &str) -> String {
    format!(
        r#"
        [[socket_bindings]]
        name = "http"
        interface = "127.0.0.1"
        port = 0

        [[servers]]
        name = "default-server"
        default_host = "default-host"

        [[servers.http_listeners]]
        name = "default"
        socket_binding = "http"

        {extra}
        "#
    )
}
