//! Tunnels: a left (inbound) and right (upstream) endpoint pair.

mod pool;
mod relay;

pub use pool::{PooledTunnel, TunnelPool};
pub use relay::relay_tcp;

use std::fmt;
use std::io;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use crate::user::EagleUser;

/// Destination a handler connected the right endpoint to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetAddr {
    pub host: String,
    pub port: u16,
}

impl TargetAddr {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for TargetAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

/// Bidirectional conduit between an inbound connection and its upstream.
#[derive(Debug, Default)]
pub struct Tunnel {
    left: Option<TcpStream>,
    right: Option<TcpStream>,
    user: Option<Arc<EagleUser>>,
    target: Option<TargetAddr>,
}

fn not_connected(side: &str) -> io::Error {
    io::Error::new(io::ErrorKind::NotConnected, format!("{side} endpoint not bound"))
}

impl Tunnel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop both endpoints and all per-connection state.
    pub fn clear(&mut self) {
        self.left = None;
        self.right = None;
        self.user = None;
        self.target = None;
    }

    pub fn is_clear(&self) -> bool {
        self.left.is_none() && self.right.is_none() && self.user.is_none() && self.target.is_none()
    }

    pub fn bind_left(&mut self, stream: TcpStream) {
        self.left = Some(stream);
    }

    pub fn bind_right(&mut self, stream: TcpStream) {
        self.right = Some(stream);
    }

    /// Attach the user whose traffic this tunnel carries.
    pub fn set_user(&mut self, user: Arc<EagleUser>) {
        self.user = Some(user);
    }

    pub fn user(&self) -> Option<&Arc<EagleUser>> {
        self.user.as_ref()
    }

    pub fn set_target(&mut self, target: TargetAddr) {
        self.target = Some(target);
    }

    pub fn target(&self) -> Option<&TargetAddr> {
        self.target.as_ref()
    }

    pub fn left_mut(&mut self) -> io::Result<&mut TcpStream> {
        self.left.as_mut().ok_or_else(|| not_connected("left"))
    }

    pub fn right_mut(&mut self) -> io::Result<&mut TcpStream> {
        self.right.as_mut().ok_or_else(|| not_connected("right"))
    }

    pub async fn read_left(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.left_mut()?.read(buf).await
    }

    pub async fn write_left(&mut self, data: &[u8]) -> io::Result<()> {
        self.left_mut()?.write_all(data).await
    }

    pub async fn read_right(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.right_mut()?.read(buf).await
    }

    pub async fn write_right(&mut self, data: &[u8]) -> io::Result<()> {
        self.right_mut()?.write_all(data).await
    }

    /// Shut both endpoints down and clear the tunnel.
    pub async fn close(&mut self) {
        if let Some(left) = self.left.as_mut() {
            let _ = left.shutdown().await;
        }
        if let Some(right) = self.right.as_mut() {
            let _ = right.shutdown().await;
        }
        self.clear();
    }

    /// Relay bytes between both endpoints until either side closes.
    ///
    /// Consumes the endpoints; the tunnel is clear afterwards. Returns
    /// (bytes_left_to_right, bytes_right_to_left).
    pub async fn flow(&mut self) -> (u64, u64) {
        let (left, right) = match (self.left.take(), self.right.take()) {
            (Some(left), Some(right)) => (left, right),
            _ => {
                self.clear();
                return (0, 0);
            }
        };
        let user = self.user.take();
        let counts = relay_tcp(left, right, user).await;
        self.clear();
        counts
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    async fn stream_pair() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (client, accepted) = tokio::join!(TcpStream::connect(addr), listener.accept());
        (client.unwrap(), accepted.unwrap().0)
    }

    #[test]
    fn target_display_brackets_ipv6() {
        assert_eq!(TargetAddr::new("example.com", 80).to_string(), "example.com:80");
        assert_eq!(TargetAddr::new("::1", 443).to_string(), "[::1]:443");
    }

    #[tokio::test]
    async fn unbound_sides_report_not_connected() {
        let mut tunnel = Tunnel::new();
        let err = tunnel.write_left(b"x").await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotConnected);
        let mut buf = [0u8; 4];
        assert!(tunnel.read_right(&mut buf).await.is_err());
    }

    #[tokio::test]
    async fn flow_relays_both_directions_and_counts_user_bytes() {
        let (mut client, left) = stream_pair().await;
        let (right, mut upstream) = stream_pair().await;
        let user = Arc::new(EagleUser::new("alice", "pw", None));

        let mut tunnel = Tunnel::new();
        tunnel.bind_left(left);
        tunnel.bind_right(right);
        tunnel.set_user(Arc::clone(&user));

        let flow = tokio::spawn(async move {
            let counts = tunnel.flow().await;
            assert!(tunnel.is_clear());
            counts
        });

        client.write_all(b"ping").await.unwrap();
        let mut buf = [0u8; 4];
        upstream.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ping");

        upstream.write_all(b"pong!").await.unwrap();
        let mut buf = [0u8; 5];
        client.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"pong!");

        drop(client);
        drop(upstream);
        let (sent, received) = flow.await.unwrap();
        assert_eq!((sent, received), (4, 5));

        user.check_speed();
        assert!(user.speed() > 0);
    }

    #[tokio::test]
    async fn close_clears_everything() {
        let (_client, left) = stream_pair().await;
        let mut tunnel = Tunnel::new();
        tunnel.bind_left(left);
        tunnel.set_target(TargetAddr::new("localhost", 1));
        tunnel.close().await;
        assert!(tunnel.is_clear());
    }
}
