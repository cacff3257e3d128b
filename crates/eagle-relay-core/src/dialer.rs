//! Outbound connections: directly to a target, or through an upstream relayer.

use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::debug;

use crate::context::RelayContext;
use crate::error::{Error, Result};
use crate::handler::eagle_tunnel::{self, EtRequestType, AUTH_VALID, REPLY_OK};
use crate::tunnel::{TargetAddr, Tunnel};

const HANDSHAKE_REPLY_SIZE: usize = 64;

/// Connect the tunnel's right endpoint to `target`.
///
/// Goes through the configured relayer when there is one, otherwise dials
/// the target directly. Records the target on the tunnel.
pub async fn connect_target(tunnel: &mut Tunnel, ctx: &RelayContext, target: TargetAddr) -> Result<()> {
    let connect_timeout = ctx.config().limits.connect_timeout();

    if ctx.config().relayer.address.is_some() {
        timeout(connect_timeout, connect_via_relayer(tunnel, ctx, &target))
            .await
            .map_err(|_| Error::Timeout)??;
    } else {
        let stream = timeout(
            connect_timeout,
            TcpStream::connect((target.host.as_str(), target.port)),
        )
        .await
        .map_err(|_| Error::Timeout)?
        .map_err(|e| Error::ConnectionRefused(format!("{}: {}", target, e)))?;
        tunnel.bind_right(stream);
    }

    debug!("Connected to {}", target);
    tunnel.set_target(target);
    Ok(())
}

/// Open an authenticated EagleTunnel to the configured relayer on the
/// tunnel's right side.
///
/// The local user is attached to the tunnel unless a user is already set.
pub async fn connect_to_relayer(tunnel: &mut Tunnel, ctx: &RelayContext) -> Result<()> {
    let addr = ctx
        .config()
        .relayer
        .address
        .as_deref()
        .ok_or(Error::NoRelayer)?;

    let stream = timeout(ctx.config().limits.connect_timeout(), TcpStream::connect(addr))
        .await
        .map_err(|_| Error::Timeout)?
        .map_err(|e| Error::ConnectionRefused(format!("relayer {}: {}", addr, e)))?;
    tunnel.bind_right(stream);

    let local_user = ctx.local_user();
    tunnel
        .write_right(eagle_tunnel::format_auth(local_user).as_bytes())
        .await?;

    let mut reply = [0u8; HANDSHAKE_REPLY_SIZE];
    let n = tunnel.read_right(&mut reply).await?;
    if &reply[..n] != AUTH_VALID.as_bytes() {
        return Err(Error::AuthenticationFailed);
    }

    if tunnel.user().is_none() {
        tunnel.set_user(Arc::clone(local_user));
    }
    Ok(())
}

async fn connect_via_relayer(tunnel: &mut Tunnel, ctx: &RelayContext, target: &TargetAddr) -> Result<()> {
    connect_to_relayer(tunnel, ctx).await?;

    let target_arg = target.to_string();
    let request = eagle_tunnel::format_request(EtRequestType::Tcp, &[target_arg.as_str()]);
    tunnel.write_right(request.as_bytes()).await?;

    let mut reply = [0u8; HANDSHAKE_REPLY_SIZE];
    let n = tunnel.read_right(&mut reply).await?;
    if &reply[..n] != REPLY_OK.as_bytes() {
        return Err(Error::ConnectionRefused(target.to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use tokio::net::TcpListener;

    async fn closed_port() -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap().port()
    }

    #[tokio::test]
    async fn direct_connect_failure_carries_target_and_cause() {
        let ctx = RelayContext::new(Config::default()).unwrap();
        let port = closed_port().await;
        let mut tunnel = Tunnel::default();

        let err = connect_target(&mut tunnel, &ctx, TargetAddr::new("127.0.0.1", port))
            .await
            .unwrap_err();

        match err {
            Error::ConnectionRefused(text) => {
                assert!(text.starts_with(&format!("127.0.0.1:{}: ", port)), "{}", text);
            }
            other => panic!("unexpected error: {:?}", other),
        }
        assert!(tunnel.target().is_none());
        assert!(tunnel.right_mut().is_err());
    }

    #[tokio::test]
    async fn relayer_connect_failure_names_relayer() {
        let mut config = Config::default();
        let port = closed_port().await;
        config.relayer.address = Some(format!("127.0.0.1:{}", port));
        let ctx = RelayContext::new(config).unwrap();
        let mut tunnel = Tunnel::default();

        let err = connect_to_relayer(&mut tunnel, &ctx).await.unwrap_err();
        assert!(err.to_string().contains("relayer 127.0.0.1:"), "{}", err);
    }

    #[tokio::test]
    async fn missing_relayer_is_reported() {
        let ctx = RelayContext::new(Config::default()).unwrap();
        let mut tunnel = Tunnel::default();
        assert!(matches!(
            connect_to_relayer(&mut tunnel, &ctx).await,
            Err(Error::NoRelayer)
        ));
    }
}
