use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use sslcaudit_core::{
    AuditOutcome, AuditServer, AuditServerConfig, AuditServerError, ClientConnection,
    ClientIdentity, OutcomeContext, OutcomeKind, ProfileCatalog, ResultSink, SessionContext,
    SessionHandler, SessionHandlerError, SessionHandlerFactory,
};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpSocket, TcpStream};
use tokio::task::JoinSet;

const PARALLEL_CONNECTIONS: usize = 200;

#[derive(Debug, Clone, Copy, Default)]
struct ProbeOptions {
    handle_delay: Duration,
    panic_on_first_connection: bool,
}

struct ProfileEchoFactory {
    options: ProbeOptions,
}

struct ProfileEchoHandler {
    context: SessionContext<&'static str>,
    options: ProbeOptions,
    handled: AtomicU64,
}

impl SessionHandlerFactory for ProfileEchoFactory {
    type Profile = &'static str;
    type Handler = ProfileEchoHandler;

    fn create_handler(&self, context: SessionContext<Self::Profile>) -> Self::Handler {
        ProfileEchoHandler {
            context,
            options: self.options,
            handled: AtomicU64::new(0),
        }
    }
}

impl SessionHandler for ProfileEchoHandler {
    type Connection = ClientConnection;

    async fn handle(&self, mut connection: ClientConnection) -> Result<(), SessionHandlerError> {
        let handled = self.handled.fetch_add(1, Ordering::SeqCst) + 1;
        if self.options.panic_on_first_connection && handled == 1 {
            panic!("first connection from {} hit a handler bug", self.context.client_id);
        }
        if !self.options.handle_delay.is_zero() {
            tokio::time::sleep(self.options.handle_delay).await;
        }

        let line = format!("{}\n", self.context.profiles.join(","));
        connection.stream_mut().write_all(line.as_bytes()).await?;
        connection.stream_mut().shutdown().await?;

        let outcome = AuditOutcome::new(
            OutcomeKind::ProfileSucceeded,
            OutcomeContext::for_session(self.context.client_id.to_string(), self.context.session_id),
        )
        .with_attribute("connection", handled.to_string());
        self.context.result_sink.push(outcome);
        Ok(())
    }
}

fn ephemeral_config() -> AuditServerConfig {
    AuditServerConfig {
        listen_addr: "127.0.0.1".to_string(),
        listen_port: 0,
        ..AuditServerConfig::default()
    }
}

fn sample_catalog() -> ProfileCatalog<&'static str> {
    ProfileCatalog::from_sources([vec!["P1", "P2"], vec!["P3"]])
}

fn build_server(
    config: AuditServerConfig,
    options: ProbeOptions,
    result_sink: Option<ResultSink>,
) -> AuditServer<ProfileEchoFactory> {
    AuditServer::new(config, ProfileEchoFactory { options }, sample_catalog(), result_sink)
        .expect("valid server config")
}

async fn connect_from(source_ip: &str, server_addr: SocketAddr) -> TcpStream {
    let socket = TcpSocket::new_v4().expect("client socket");
    socket
        .bind(format!("{source_ip}:0").parse().expect("source addr literal"))
        .expect("bind client source address");
    socket.connect(server_addr).await.expect("connect audit server")
}

async fn read_reply(mut stream: TcpStream) -> String {
    let mut reply = String::new();
    stream
        .read_to_string(&mut reply)
        .await
        .expect("read handler reply");
    reply
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition should hold within five seconds");
}

#[cfg(target_os = "linux")]
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn clients_get_one_session_each_with_flattened_profiles() {
    let server = build_server(ephemeral_config(), ProbeOptions::default(), None);
    let handle = server.start().await.expect("start audit server");
    let addr = handle.local_addr();

    let reply_a = read_reply(connect_from("127.0.0.1", addr).await).await;
    let reply_b1 = read_reply(connect_from("127.0.0.2", addr).await).await;
    let reply_b2 = read_reply(connect_from("127.0.0.2", addr).await).await;
    assert_eq!(reply_a, "P1,P2,P3\n");
    assert_eq!(reply_b1, "P1,P2,P3\n");
    assert_eq!(reply_b2, "P1,P2,P3\n");

    let summary = handle.stop().await.expect("stop audit server");
    assert_eq!(summary.accepted_connections, 3);
    assert_eq!(summary.completed_connections, 3);
    assert_eq!(summary.failed_connections, 0);

    let dispatcher = handle.dispatcher();
    assert_eq!(dispatcher.session_count(), 2);
    let client_b = ClientIdentity::from_peer_addr("127.0.0.2:0".parse().expect("addr"));
    let session_b = dispatcher.session(&client_b).expect("session B");
    assert_eq!(session_b.profiles(), &["P1", "P2", "P3"]);
    assert_eq!(session_b.routed_connections(), 2);
    assert_eq!(session_b.handler().handled.load(Ordering::SeqCst), 2);
    assert_eq!(dispatcher.metrics().sessions_created, 2);

    let connections_b: Vec<String> = handle
        .result_sink()
        .drain()
        .into_iter()
        .filter(|outcome| outcome.context.client_id == "127.0.0.2")
        .map(|outcome| outcome.attributes["connection"].clone())
        .collect();
    assert_eq!(connections_b, vec!["1".to_string(), "2".to_string()]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn parallel_connections_from_one_host_share_one_session() {
    let server = build_server(ephemeral_config(), ProbeOptions::default(), None);
    let handle = server.start().await.expect("start audit server");
    let addr = handle.local_addr();

    let mut clients = JoinSet::new();
    for _ in 0..PARALLEL_CONNECTIONS {
        clients.spawn(async move {
            let stream = TcpStream::connect(addr).await.expect("connect audit server");
            read_reply(stream).await
        });
    }
    while let Some(result) = clients.join_next().await {
        assert_eq!(result.expect("client join"), "P1,P2,P3\n");
    }

    let summary = handle.stop().await.expect("stop audit server");
    assert_eq!(summary.accepted_connections, PARALLEL_CONNECTIONS as u64);
    assert_eq!(summary.completed_connections, PARALLEL_CONNECTIONS as u64);
    assert_eq!(summary.failed_connections, 0);

    let dispatcher = handle.dispatcher();
    assert_eq!(dispatcher.session_count(), 1);
    let metrics = dispatcher.metrics();
    assert_eq!(metrics.sessions_created, 1);
    assert_eq!(metrics.accepted_connections, PARALLEL_CONNECTIONS as u64);
    assert_eq!(handle.result_sink().len(), PARALLEL_CONNECTIONS);
}

#[tokio::test]
async fn stopped_server_releases_its_address() {
    let server = build_server(ephemeral_config(), ProbeOptions::default(), None);
    let handle = server.start().await.expect("start first server");
    let addr = handle.local_addr();
    let reply = read_reply(TcpStream::connect(addr).await.expect("connect first server")).await;
    assert_eq!(reply, "P1,P2,P3\n");
    handle.stop().await.expect("stop first server");

    let rebound = build_server(
        AuditServerConfig::from_socket_addr(addr),
        ProbeOptions::default(),
        None,
    );
    let rebound = rebound.start().await.expect("rebind the same address after stop");
    assert_eq!(rebound.local_addr(), addr);
    let reply = read_reply(TcpStream::connect(addr).await.expect("connect second server")).await;
    assert_eq!(reply, "P1,P2,P3\n");
    assert_eq!(rebound.dispatcher().session_count(), 1);
    rebound.stop().await.expect("stop second server");
}

#[tokio::test]
async fn stop_is_idempotent() {
    let handle = build_server(ephemeral_config(), ProbeOptions::default(), None)
        .start()
        .await
        .expect("start audit server");
    read_reply(TcpStream::connect(handle.local_addr()).await.expect("connect")).await;
    assert!(handle.is_running().await);

    let first = handle.stop().await.expect("first stop");
    let second = handle.stop().await.expect("second stop");
    assert_eq!(first, second);
    assert_eq!(first.completed_connections, 1);
    assert!(!handle.is_running().await);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn stop_waits_for_in_flight_handlers() {
    let options = ProbeOptions {
        handle_delay: Duration::from_millis(200),
        ..ProbeOptions::default()
    };
    let sink = ResultSink::new();
    let handle = build_server(ephemeral_config(), options, Some(sink.clone()))
        .start()
        .await
        .expect("start audit server");
    let client = TcpStream::connect(handle.local_addr())
        .await
        .expect("connect audit server");
    let dispatcher = handle.dispatcher();
    wait_until(|| dispatcher.metrics().dispatched_connections == 1).await;
    assert!(sink.is_empty(), "handler is still sleeping");

    let summary = handle.stop().await.expect("stop audit server");
    assert_eq!(summary.completed_connections, 1);
    assert_eq!(summary.aborted_connections, 0);
    assert_eq!(sink.len(), 1, "stop returned only after the handler finished");
    assert_eq!(read_reply(client).await, "P1,P2,P3\n");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn drain_timeout_aborts_stuck_handlers() {
    let config = AuditServerConfig {
        drain_timeout_ms: 50,
        ..ephemeral_config()
    };
    let options = ProbeOptions {
        handle_delay: Duration::from_secs(30),
        ..ProbeOptions::default()
    };
    let handle = build_server(config, options, None)
        .start()
        .await
        .expect("start audit server");
    let client = TcpStream::connect(handle.local_addr())
        .await
        .expect("connect audit server");
    let dispatcher = handle.dispatcher();
    wait_until(|| dispatcher.metrics().dispatched_connections == 1).await;

    let summary = tokio::time::timeout(Duration::from_secs(5), handle.stop())
        .await
        .expect("stop must not wait for the stuck handler")
        .expect("stop audit server");
    assert_eq!(summary.accepted_connections, 1);
    assert_eq!(summary.aborted_connections, 1);
    assert_eq!(summary.completed_connections, 0);
    assert!(handle.result_sink().is_empty());
    assert_eq!(read_reply(client).await, "", "aborted handler closes the connection");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn listener_keeps_serving_after_a_handler_panic() {
    let options = ProbeOptions {
        panic_on_first_connection: true,
        ..ProbeOptions::default()
    };
    let handle = build_server(ephemeral_config(), options, None)
        .start()
        .await
        .expect("start audit server");
    let addr = handle.local_addr();

    let first = read_reply(TcpStream::connect(addr).await.expect("first connect")).await;
    assert_eq!(first, "", "panicking handler drops the connection");
    let second = read_reply(TcpStream::connect(addr).await.expect("second connect")).await;
    assert_eq!(second, "P1,P2,P3\n");

    let summary = handle.stop().await.expect("stop audit server");
    assert_eq!(summary.accepted_connections, 2);
    assert_eq!(summary.failed_connections, 1);
    assert_eq!(summary.completed_connections, 1);
    let metrics = handle.dispatcher().metrics();
    assert_eq!(metrics.handler_panics, 1);
    assert_eq!(metrics.sessions_created, 1);
}

#[cfg(target_os = "linux")]
#[tokio::test]
async fn start_reports_bind_failure() {
    let first = build_server(ephemeral_config(), ProbeOptions::default(), None)
        .start()
        .await
        .expect("start first server");
    let taken = AuditServerConfig::from_socket_addr(first.local_addr());

    let err = build_server(taken, ProbeOptions::default(), None)
        .start()
        .await
        .err()
        .expect("second bind on a listening address must fail");
    assert!(matches!(err, AuditServerError::Io(_)), "unexpected error: {err}");
    first.stop().await.expect("stop first server");
}

#[test]
fn invalid_config_is_rejected_before_start() {
    let config = AuditServerConfig {
        listen_addr: "not-an-ip".to_string(),
        ..AuditServerConfig::default()
    };
    let result = AuditServer::new(
        config,
        ProfileEchoFactory {
            options: ProbeOptions::default(),
        },
        sample_catalog(),
        None,
    );
    assert!(matches!(result, Err(AuditServerError::Config(_))));
}
