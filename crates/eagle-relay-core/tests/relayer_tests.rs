//! End-to-end tests driving a live relayer over loopback.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use eagle_relay_core::{
    send_et_check_auth_req, send_et_check_ping_req, send_et_check_speed_req,
    send_et_check_version_req, Config, Protocol, RelayContext, Relayer, Switch, UserConfig,
};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

const CONNECT_ESTABLISHED: &[u8] = b"HTTP/1.1 200 Connection Established\r\n\r\n";

fn server_config() -> Config {
    let mut config = Config::default();
    config.limits.drain_timeout = 1;
    config
}

fn user(id: &str, password: &str) -> UserConfig {
    UserConfig {
        id: id.to_string(),
        password: password.to_string(),
        speed_limit: None,
    }
}

fn client_context(relayer: SocketAddr, local_user: UserConfig) -> RelayContext {
    let mut config = server_config();
    config.relayer.address = Some(relayer.to_string());
    config.local_user = local_user;
    RelayContext::new(config).unwrap()
}

async fn spawn_relayer(config: Config) -> (Arc<Relayer>, SocketAddr, JoinHandle<eagle_relay_core::Result<()>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let relayer = Relayer::new(Arc::new(RelayContext::new(config).unwrap()));
    let handle = {
        let relayer = Arc::clone(&relayer);
        tokio::spawn(async move { relayer.run(listener).await })
    };
    (relayer, addr, handle)
}

async fn spawn_echo_server() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        while let Ok((mut stream, _)) = listener.accept().await {
            tokio::spawn(async move {
                let (mut reader, mut writer) = stream.split();
                let _ = tokio::io::copy(&mut reader, &mut writer).await;
            });
        }
    });
    addr
}

/// Open an anonymous EagleTunnel session and send one request line.
async fn et_session(relayer: SocketAddr, request: &str) -> TcpStream {
    let mut stream = TcpStream::connect(relayer).await.unwrap();
    stream.write_all(b"eagle_tunnel").await.unwrap();
    let mut reply = [0u8; 5];
    stream.read_exact(&mut reply).await.unwrap();
    assert_eq!(&reply, b"valid");
    stream.write_all(request.as_bytes()).await.unwrap();
    stream
}

async fn read_all(stream: &mut TcpStream) -> Vec<u8> {
    let mut data = Vec::new();
    tokio::time::timeout(Duration::from_secs(5), stream.read_to_end(&mut data))
        .await
        .expect("peer closed")
        .unwrap();
    data
}

async fn assert_echo(stream: &mut TcpStream) {
    stream.write_all(b"hello relay").await.unwrap();
    let mut buf = [0u8; 11];
    stream.read_exact(&mut buf).await.unwrap();
    assert_eq!(&buf, b"hello relay");
}

#[tokio::test]
async fn checks_against_live_relayer() {
    let (_relayer, addr, _) = spawn_relayer(server_config()).await;
    let ctx = client_context(addr, UserConfig::default());

    assert_eq!(send_et_check_version_req(&ctx).await, "Protocol Version OK");
    assert_eq!(send_et_check_speed_req(&ctx).await, "speed-check off");
    assert_eq!(send_et_check_auth_req(&ctx).await, "no local user");

    let (tx, rx) = oneshot::channel();
    send_et_check_ping_req(&ctx, tx).await;
    let millis = rx.await.unwrap();
    assert!(millis.parse::<u64>().is_ok(), "unexpected ping result: {millis}");
}

#[tokio::test]
async fn ping_check_runs_detached() {
    let (_relayer, addr, _) = spawn_relayer(server_config()).await;
    let ctx = Arc::new(client_context(addr, UserConfig::default()));

    let (tx, rx) = oneshot::channel();
    let ping_ctx = Arc::clone(&ctx);
    tokio::spawn(async move { send_et_check_ping_req(&ping_ctx, tx).await });

    let millis = rx.await.unwrap();
    assert!(millis.parse::<u64>().is_ok(), "unexpected ping result: {millis}");
}

#[tokio::test]
async fn speed_check_reports_number_when_enabled() {
    let mut config = server_config();
    config.speed_check = Switch::On;
    let (_relayer, addr, _) = spawn_relayer(config).await;
    let ctx = client_context(addr, UserConfig::default());

    let reply = send_et_check_speed_req(&ctx).await;
    assert!(reply.parse::<u64>().is_ok(), "unexpected speed reply: {reply}");
}

#[tokio::test]
async fn auth_check_with_registered_user() {
    let mut config = server_config();
    config.users = vec![user("alice", "secret")];
    let (_relayer, addr, _) = spawn_relayer(config).await;

    let ctx = client_context(addr, user("alice", "secret"));
    assert_eq!(
        send_et_check_auth_req(&ctx).await,
        "AUTH OK with local user: alice"
    );
    assert_eq!(send_et_check_version_req(&ctx).await, "Protocol Version OK");

    let wrong = client_context(addr, user("alice", "guess"));
    assert_eq!(send_et_check_auth_req(&wrong).await, "Authentication failed");

    let anonymous = client_context(addr, UserConfig::default());
    assert_eq!(send_et_check_auth_req(&anonymous).await, "Authentication failed");
}

#[tokio::test]
async fn version_check_replies() {
    let (_relayer, addr, _) = spawn_relayer(server_config()).await;

    let mut old = et_session(addr, "eagle_tunnel CHECK VERSION 0.9.0").await;
    let reply = String::from_utf8(read_all(&mut old).await).unwrap();
    assert!(reply.contains("incompatible"));

    let mut missing = et_session(addr, "eagle_tunnel check version").await;
    let reply = String::from_utf8(read_all(&mut missing).await).unwrap();
    assert_eq!(reply, "no protocol version value");
}

#[tokio::test]
async fn unknown_check_kind_gets_no_reply() {
    let (relayer, addr, _) = spawn_relayer(server_config()).await;

    let mut stream = et_session(addr, "eagle_tunnel CHECK LOCATION 8.8.8.8").await;
    assert!(read_all(&mut stream).await.is_empty());

    let mut stream = et_session(addr, "eagle_tunnel CHECK AUTH").await;
    assert!(read_all(&mut stream).await.is_empty());

    // Completed checks never enter relay mode.
    assert_eq!(relayer.stats().get_aggregated().await.total_connections, 0);
}

#[tokio::test]
async fn disabled_protocol_is_dropped_silently() {
    let mut config = server_config();
    config.protocols.http = false;
    let (_relayer, addr, _) = spawn_relayer(config).await;

    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream
        .write_all(b"GET http://example.com/ HTTP/1.1\r\nHost: example.com\r\n\r\n")
        .await
        .unwrap();
    assert!(read_all(&mut stream).await.is_empty());
}

#[tokio::test]
async fn unknown_protocol_is_dropped_silently() {
    let (_relayer, addr, _) = spawn_relayer(server_config()).await;

    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream.write_all(b"\x16\x03\x01 hello").await.unwrap();
    assert!(read_all(&mut stream).await.is_empty());
}

#[tokio::test]
async fn eagle_tunnel_tcp_relays_and_records_stats() {
    let echo = spawn_echo_server().await;
    let (relayer, addr, _) = spawn_relayer(server_config()).await;

    let mut stream = et_session(addr, &format!("eagle_tunnel TCP {}", echo)).await;
    let mut reply = [0u8; 2];
    stream.read_exact(&mut reply).await.unwrap();
    assert_eq!(&reply, b"ok");
    assert_echo(&mut stream).await;
    drop(stream);

    let mut history = Vec::new();
    for _ in 0..50 {
        history = relayer.stats().get_history(None).await;
        if !history.is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].info.protocol, Protocol::EagleTunnel);
    assert_eq!(history[0].info.target_port, echo.port());
    assert_eq!(history[0].info.user.as_deref(), Some("root"));
    assert_eq!(history[0].info.bytes_sent, 11);
}

#[tokio::test]
async fn eagle_tunnel_tcp_to_closed_port_fails() {
    let closed = {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap()
    };
    let (_relayer, addr, _) = spawn_relayer(server_config()).await;

    let mut stream = et_session(addr, &format!("eagle_tunnel TCP {}", closed)).await;
    assert_eq!(read_all(&mut stream).await, b"failed");
}

#[tokio::test]
async fn http_connect_relays() {
    let echo = spawn_echo_server().await;
    let (_relayer, addr, _) = spawn_relayer(server_config()).await;

    let mut stream = TcpStream::connect(addr).await.unwrap();
    let request = format!("CONNECT {echo} HTTP/1.1\r\nHost: {echo}\r\n\r\n");
    stream.write_all(request.as_bytes()).await.unwrap();

    let mut reply = vec![0u8; CONNECT_ESTABLISHED.len()];
    stream.read_exact(&mut reply).await.unwrap();
    assert_eq!(reply, CONNECT_ESTABLISHED);
    assert_echo(&mut stream).await;
}

#[tokio::test]
async fn socks5_connect_relays() {
    let echo = spawn_echo_server().await;
    let (_relayer, addr, _) = spawn_relayer(server_config()).await;

    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream.write_all(&[0x05, 0x01, 0x00]).await.unwrap();
    let mut choice = [0u8; 2];
    stream.read_exact(&mut choice).await.unwrap();
    assert_eq!(choice, [0x05, 0x00]);

    let port = echo.port().to_be_bytes();
    stream
        .write_all(&[0x05, 0x01, 0x00, 0x01, 127, 0, 0, 1, port[0], port[1]])
        .await
        .unwrap();
    let mut reply = [0u8; 10];
    stream.read_exact(&mut reply).await.unwrap();
    assert_eq!(reply[1], 0x00);
    assert_echo(&mut stream).await;
}

#[tokio::test]
async fn socks5_rejects_password_only_clients() {
    let (_relayer, addr, _) = spawn_relayer(server_config()).await;

    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream.write_all(&[0x05, 0x01, 0x02]).await.unwrap();
    assert_eq!(read_all(&mut stream).await, vec![0x05, 0xFF]);
}

#[tokio::test]
async fn socks5_through_upstream_relayer() {
    let echo = spawn_echo_server().await;

    let mut remote_config = server_config();
    remote_config.users = vec![user("alice", "secret")];
    let (_remote, remote_addr, _) = spawn_relayer(remote_config).await;

    let mut local_config = server_config();
    local_config.relayer.address = Some(remote_addr.to_string());
    local_config.local_user = user("alice", "secret");
    let (_local, local_addr, _) = spawn_relayer(local_config).await;

    let mut stream = TcpStream::connect(local_addr).await.unwrap();
    stream.write_all(&[0x05, 0x01, 0x00]).await.unwrap();
    let mut choice = [0u8; 2];
    stream.read_exact(&mut choice).await.unwrap();

    let mut request = vec![0x05, 0x01, 0x00, 0x03, 9];
    request.extend_from_slice(b"127.0.0.1");
    request.extend_from_slice(&echo.port().to_be_bytes());
    stream.write_all(&request).await.unwrap();

    let mut reply = [0u8; 10];
    stream.read_exact(&mut reply).await.unwrap();
    assert_eq!(reply[1], 0x00);
    assert_echo(&mut stream).await;
}

#[tokio::test]
async fn sequential_connections_reuse_tunnels() {
    let (relayer, addr, _) = spawn_relayer(server_config()).await;

    for _ in 0..20 {
        let mut stream = et_session(addr, "eagle_tunnel CHECK PING").await;
        assert_eq!(read_all(&mut stream).await, b"ok");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    assert!(
        relayer.pool().allocated() <= 3,
        "allocated {} tunnels for 20 sequential connections",
        relayer.pool().allocated()
    );
}

#[tokio::test]
async fn close_stops_accepting() {
    let (relayer, addr, handle) = spawn_relayer(server_config()).await;
    assert!(TcpStream::connect(addr).await.is_ok());

    relayer.close().await;
    assert!(!relayer.is_running());

    let result = tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("accept loop stopped")
        .unwrap();
    assert!(result.is_ok());
    assert!(TcpStream::connect(addr).await.is_err());
}

/// Upstream that accepts any credentials and answers the next request with `reply`.
async fn spawn_scripted_relayer(reply: &'static [u8]) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        let mut buf = [0u8; 1024];
        let n = stream.read(&mut buf).await.unwrap();
        assert!(buf[..n].starts_with(b"eagle_tunnel"));
        stream.write_all(b"valid").await.unwrap();

        let n = stream.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"eagle_tunnel CHECK PING");
        stream.write_all(reply).await.unwrap();
    });
    addr
}

#[tokio::test]
async fn ping_check_reports_unexpected_reply() {
    let upstream = spawn_scripted_relayer(b"pong").await;
    let ctx = client_context(upstream, UserConfig::default());

    let (tx, rx) = oneshot::channel();
    send_et_check_ping_req(&ctx, tx).await;
    assert_eq!(rx.await.unwrap(), "invalid ping reply: pong");
}
