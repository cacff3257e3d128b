//! EagleTunnel protocol: relay-side handler and message formats.
//!
//! A client first sends `eagle_tunnel [<id>:<password>]` and receives
//! `valid` or `invalid`. It then sends one request line,
//! `eagle_tunnel <TYPE> [ARGS...]`, where TYPE is `TCP`, `DNS` or `CHECK`.

use std::sync::Arc;
use tracing::debug;

use crate::context::RelayContext;
use crate::dialer;
use crate::error::{Error, Result};
use crate::handler::{et_check, parse_host_port};
use crate::request::{Request, ET_MARKER};
use crate::tunnel::Tunnel;
use crate::user::EagleUser;

/// Authentication accepted.
pub const AUTH_VALID: &str = "valid";

/// Authentication rejected.
pub const AUTH_INVALID: &str = "invalid";

/// Request succeeded; for `TCP` the tunnel now relays.
pub const REPLY_OK: &str = "ok";

/// Request could not be served.
pub const REPLY_FAILED: &str = "failed";

const MESSAGE_BUFFER_SIZE: usize = 1024;

/// Kind of request following a successful authentication.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EtRequestType {
    Tcp,
    Dns,
    Check,
    Unknown,
}

impl EtRequestType {
    pub fn parse(token: &str) -> Self {
        if token.eq_ignore_ascii_case("TCP") {
            EtRequestType::Tcp
        } else if token.eq_ignore_ascii_case("DNS") {
            EtRequestType::Dns
        } else if token.eq_ignore_ascii_case("CHECK") {
            EtRequestType::Check
        } else {
            EtRequestType::Unknown
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EtRequestType::Tcp => "TCP",
            EtRequestType::Dns => "DNS",
            EtRequestType::Check => "CHECK",
            EtRequestType::Unknown => "UNKNOWN",
        }
    }
}

/// Authentication line presenting `user`'s credentials.
pub fn format_auth(user: &EagleUser) -> String {
    format!("{} {}", ET_MARKER, user.credentials())
}

/// Request line `eagle_tunnel <TYPE> [ARGS...]`.
pub fn format_request(kind: EtRequestType, args: &[&str]) -> String {
    let mut line = format!("{} {}", ET_MARKER, kind.as_str());
    for arg in args {
        line.push(' ');
        line.push_str(arg);
    }
    line
}

/// Relay-side EagleTunnel handler.
#[derive(Debug, Clone, Copy, Default)]
pub struct EagleTunnel;

impl EagleTunnel {
    pub async fn handle(&self, request: &Request, tunnel: &mut Tunnel, ctx: &RelayContext) -> Result<()> {
        authenticate(request, tunnel, ctx).await?;

        let mut buf = vec![0u8; MESSAGE_BUFFER_SIZE];
        let n = tunnel.read_left(&mut buf).await?;
        if n == 0 {
            return Err(Error::InvalidEagleTunnelProtocol(
                "connection closed before request".into(),
            ));
        }

        let text = String::from_utf8_lossy(&buf[..n]).into_owned();
        let tokens: Vec<&str> = text.split_whitespace().collect();
        if tokens.first() != Some(&ET_MARKER) {
            return Err(Error::InvalidEagleTunnelProtocol(format!(
                "missing marker in request: {}",
                text.trim()
            )));
        }

        let kind = tokens
            .get(1)
            .map(|t| EtRequestType::parse(t))
            .unwrap_or(EtRequestType::Unknown);
        let args = tokens.get(2..).unwrap_or_default();

        match kind {
            EtRequestType::Tcp => handle_tcp(args, tunnel, ctx).await,
            EtRequestType::Dns => handle_dns(args, tunnel).await,
            EtRequestType::Check => et_check::handle(args, tunnel, ctx).await,
            EtRequestType::Unknown => Err(Error::InvalidEagleTunnelProtocol(format!(
                "unknown request type: {}",
                tokens.get(1).copied().unwrap_or_default()
            ))),
        }
    }
}

/// Check the authentication line carried by the first payload.
async fn authenticate(request: &Request, tunnel: &mut Tunnel, ctx: &RelayContext) -> Result<()> {
    if !ctx.requires_auth() {
        tunnel.write_left(AUTH_VALID.as_bytes()).await?;
        return Ok(());
    }

    let text = request.message_text();
    let user = text
        .split_whitespace()
        .nth(1)
        .and_then(|credentials| credentials.split_once(':'))
        .and_then(|(id, password)| {
            ctx.user(id)
                .filter(|user| user.verify(password))
                .map(Arc::clone)
        });

    match user {
        Some(user) => {
            debug!("EagleTunnel user {} authenticated", user.id());
            tunnel.set_user(user);
            tunnel.write_left(AUTH_VALID.as_bytes()).await?;
            Ok(())
        }
        None => {
            tunnel.write_left(AUTH_INVALID.as_bytes()).await?;
            Err(Error::AuthenticationFailed)
        }
    }
}

async fn handle_tcp(args: &[&str], tunnel: &mut Tunnel, ctx: &RelayContext) -> Result<()> {
    let target = match args.first() {
        Some(target) => parse_host_port(target).map_err(|_| {
            Error::InvalidEagleTunnelProtocol(format!("invalid TCP target: {}", target))
        })?,
        None => {
            return Err(Error::InvalidEagleTunnelProtocol("missing TCP target".into()));
        }
    };

    if let Err(e) = dialer::connect_target(tunnel, ctx, target).await {
        tunnel.write_left(REPLY_FAILED.as_bytes()).await?;
        return Err(e);
    }
    tunnel.write_left(REPLY_OK.as_bytes()).await?;
    Ok(())
}

async fn handle_dns(args: &[&str], tunnel: &mut Tunnel) -> Result<()> {
    let Some(domain) = args.first() else {
        tunnel.write_left(REPLY_FAILED.as_bytes()).await?;
        return Err(Error::NoNeedToContinue);
    };

    let reply = match tokio::net::lookup_host((*domain, 0)).await {
        Ok(mut addrs) => addrs
            .next()
            .map(|addr| addr.ip().to_string())
            .unwrap_or_else(|| REPLY_FAILED.to_string()),
        Err(e) => {
            debug!("Failed to resolve {}: {}", domain, e);
            REPLY_FAILED.to_string()
        }
    };
    tunnel.write_left(reply.as_bytes()).await?;
    Err(Error::NoNeedToContinue)
}
