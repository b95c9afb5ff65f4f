//! Listener binding, toggling, limits and statistics.

use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;

use axum::http::StatusCode;
use vhost_web::host::{Host, HostDependencies, HostSettings};
use vhost_web::http::handler_fn;
use vhost_web::http::response::text_response;
use vhost_web::lifecycle::{Bootstrap, ProcessState, StartupError};
use vhost_web::net::{
    BufferPool, ListenerDependencies, ListenerError, ListenerService, ListenerSettings, ListenerState,
    SocketBinding, Worker,
};
use vhost_web::server::registry::{Subsystem, SubsystemSettings};
use vhost_web::server::Server;

mod common;

const LOCALHOST: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);

fn empty_host_config(listener_extra: &str) -> String {
    format!(
        r#"
        [subsystem]
        statistics_enabled = true

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
        {listener_extra}

        [[servers.hosts]]
        name = "default-host"
        "#
    )
}

#[tokio::test]
async fn test_enable_is_idempotent_and_disable_unbinds() {
    let boot = common::boot_running(&empty_host_config("")).await;
    let listener = boot.listener("default").unwrap();
    let first = listener.local_addr().unwrap();
    assert_eq!(listener.state(), ListenerState::Listening);

    listener.set_enabled(true).await.unwrap();
    assert_eq!(listener.local_addr(), Some(first));

    listener.set_enabled(false).await.unwrap();
    assert_eq!(listener.state(), ListenerState::Idle);
    assert!(listener.local_addr().is_none());
    assert!(!boot.subsystem().socket_bindings().is_bound("http"));
    assert!(tokio::net::TcpStream::connect(first).await.is_err());
    // Still registered with its server while idle.
    assert!(listener.server().has_listener("default"));

    listener.set_enabled(true).await.unwrap();
    let again = listener.local_addr().unwrap();
    let response = common::get_host(again, "localhost", "/").await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    boot.stop().await;
    assert_eq!(listener.state(), ListenerState::Stopped);
    assert!(!listener.server().has_listener("default"));
}

#[tokio::test]
async fn test_disabled_listener_starts_idle() {
    let boot = common::boot_running(&empty_host_config("enabled = false")).await;
    let listener = boot.listener("default").unwrap();
    assert_eq!(listener.state(), ListenerState::Idle);
    assert!(listener.server().has_listener("default"));

    listener.set_enabled(true).await.unwrap();
    assert_eq!(listener.state(), ListenerState::Listening);
    boot.stop().await;
}

#[tokio::test]
async fn test_bind_failure_rolls_back_registration() {
    let taken = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = taken.local_addr().unwrap().port();

    let subsystem = Subsystem::new(SubsystemSettings::default());
    subsystem
        .socket_bindings()
        .add_binding(SocketBinding::new("http", LOCALHOST, port))
        .unwrap();
    let server = Server::new("default-server", "default-host", subsystem.events());
    subsystem.register_server(server.clone()).unwrap();
    server.start();

    let listener = ListenerService::new(
        ListenerSettings::http("default", "http"),
        ListenerDependencies {
            server: server.clone(),
            subsystem: subsystem.clone(),
            worker: Worker::current("default"),
            buffer_pool: BufferPool::new("default", BufferPool::DEFAULT_BUFFER_SIZE),
        },
    );
    let err = listener.start().await.unwrap_err();
    assert!(matches!(err, ListenerError::AddressInUse { .. }), "{err}");

    assert_eq!(listener.state(), ListenerState::Stopped);
    assert!(!server.has_listener("default"));
    assert!(!subsystem.socket_bindings().is_bound("http"));
    assert!(!subsystem.has_statistics("default"));
    assert!(listener.open_listener().is_none());
    drop(taken);

    // The same service can start once the port is free.
    listener.start().await.unwrap();
    assert_eq!(listener.local_addr().map(|a| a.port()), Some(port));
    listener.stop().await;
}

#[tokio::test]
async fn test_connections_are_served_on_the_listener_worker() {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(1)
        .thread_name("io-worker")
        .enable_all()
        .build()
        .unwrap();

    let subsystem = Subsystem::new(SubsystemSettings::default());
    subsystem.process_state().set_state(ProcessState::Running);
    subsystem
        .socket_bindings()
        .add_binding(SocketBinding::new("http", LOCALHOST, 0))
        .unwrap();
    let server = Server::new("default-server", "default-host", subsystem.events());
    subsystem.register_server(server.clone()).unwrap();
    server.start();

    let host = Host::new(
        HostSettings::new("default-host"),
        HostDependencies {
            server: server.clone(),
            process_state: subsystem.process_state().clone(),
            suspend: subsystem.suspend_controller().clone(),
            acme: subsystem.acme().clone(),
        },
    );
    host.start().unwrap();
    host.register_location(
        "/",
        handler_fn(|_req| async {
            let thread = std::thread::current().name().unwrap_or_default().to_string();
            text_response(StatusCode::OK, thread)
        }),
    );

    let listener = ListenerService::new(
        ListenerSettings::http("default", "http"),
        ListenerDependencies {
            server: server.clone(),
            subsystem: subsystem.clone(),
            worker: Worker::new("io", runtime.handle().clone()),
            buffer_pool: BufferPool::new("default", BufferPool::DEFAULT_BUFFER_SIZE),
        },
    );
    listener.start().await.unwrap();
    let addr = listener.local_addr().unwrap();

    let response = common::get_host(addr, "localhost", "/").await;
    assert_eq!(response.text().await.unwrap(), "io-worker");

    listener.stop().await;
    host.stop();
    runtime.shutdown_background();
}

#[tokio::test]
async fn test_bootstrap_reports_address_in_use_and_stops_everything() {
    let taken = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = taken.local_addr().unwrap().port();
    let doc = format!(
        r#"
        [[socket_bindings]]
        name = "http"
        interface = "127.0.0.1"
        port = {port}

        [[servers]]
        name = "default-server"
        default_host = "default-host"

        [[servers.http_listeners]]
        name = "default"
        socket_binding = "http"

        [[servers.hosts]]
        name = "default-host"
        "#
    );
    let config = vhost_web::config::parse_config(&doc).unwrap();
    let err = Bootstrap::start(&config).await.err().unwrap();
    assert!(matches!(
        err,
        StartupError::Listener(ListenerError::AddressInUse { .. })
    ));
}

#[tokio::test]
async fn test_request_limits_reject_before_routing() {
    let boot = common::boot_running(&empty_host_config("max_entity_size = 16\nmax_cookies = 2")).await;
    let addr = common::listener_addr(&boot, "default");

    let trace = common::raw_request(addr, b"TRACE / HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n").await;
    assert!(trace.starts_with("HTTP/1.1 405"), "{trace}");

    let large = common::client()
        .post(format!("http://{addr}/upload"))
        .body(vec![b'x'; 64])
        .send()
        .await
        .unwrap();
    assert_eq!(large.status(), StatusCode::PAYLOAD_TOO_LARGE);

    let cookies = common::client()
        .get(format!("http://{addr}/"))
        .header("cookie", "a=1; b=2; c=3")
        .send()
        .await
        .unwrap();
    assert_eq!(cookies.status(), StatusCode::BAD_REQUEST);

    boot.stop().await;
}

#[tokio::test]
async fn test_statistics_follow_the_subsystem_toggle() {
    let boot = common::boot_running(&empty_host_config("")).await;
    let addr = common::listener_addr(&boot, "default");
    let subsystem = boot.subsystem();

    for _ in 0..3 {
        common::get_host(addr, "localhost", "/").await;
    }
    let stats = subsystem.statistics("default").unwrap();
    assert_eq!(stats.request_count, 3);
    assert_eq!(stats.error_count, 0);

    subsystem.set_statistics_enabled(false);
    common::get_host(addr, "localhost", "/").await;
    assert_eq!(subsystem.statistics("default").unwrap().request_count, 3);

    boot.listener("default").unwrap().open_listener().unwrap().statistics().reset();
    assert_eq!(subsystem.statistics("default").unwrap().request_count, 0);

    boot.stop().await;
    assert!(subsystem.statistics("default").is_none());
}

#[tokio::test]
async fn test_proxy_protocol_header_sets_peer_address() {
    let backend = common::start_programmable_backend(|head| {
        let forwarded = head
            .lines()
            .find_map(|l| l.strip_prefix("x-forwarded-for: "))
            .unwrap_or("none")
            .to_string();
        (200, forwarded)
    })
    .await;
    let doc = format!(
        r#"
        [[socket_bindings]]
        name = "http"
        interface = "127.0.0.1"
        port = 0

        [[handlers.reverse_proxies]]
        name = "app"
        backends = ["http://{backend}"]

        [[servers]]
        name = "default-server"
        default_host = "default-host"

        [[servers.http_listeners]]
        name = "default"
        socket_binding = "http"
        proxy_protocol = true

        [[servers.hosts]]
        name = "default-host"
        [[servers.hosts.locations]]
        path = "/"
        handler = "app"
        "#
    );
    let boot = common::boot_running(&doc).await;
    let addr = common::listener_addr(&boot, "default");

    let response = common::raw_request(
        addr,
        b"PROXY TCP4 203.0.113.7 10.0.0.1 51000 80\r\nGET / HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n",
    )
    .await;
    assert!(response.starts_with("HTTP/1.1 200"), "{response}");
    assert!(response.ends_with("203.0.113.7"), "{response}");

    // Without the header the connection is dropped.
    let rejected = common::raw_request(addr, b"GET / HTTP/1.1\r\nHost: localhost\r\n\r\n").await;
    assert!(rejected.is_empty(), "{rejected}");

    boot.stop().await;
}

#[tokio::test]
async fn test_shutdown_rejects_new_requests_and_stops() {
    let mut doc = empty_host_config("");
    doc.push_str("\n[lifecycle]\ngraceful_timeout_secs = 1\n");
    let boot = common::boot_running(&doc).await;
    let addr = common::listener_addr(&boot, "default");
    assert_eq!(common::get_host(addr, "localhost", "/").await.status(), StatusCode::NOT_FOUND);

    tokio::time::timeout(Duration::from_secs(5), boot.shutdown()).await.unwrap();
    assert!(boot.subsystem().shutdown().is_triggered());
    assert!(boot.listeners().iter().all(|l| l.state() == ListenerState::Stopped));
    assert!(tokio::net::TcpStream::connect(addr).await.is_err());
}
