//! ET-Check: control queries between relay peers.
//!
//! Requests are `eagle_tunnel CHECK <KIND> [ARGS...]` with KIND one of
//! `AUTH`, `PING`, `VERSION` or `SPEED`. Replies are bare text. Unknown kinds
//! (and `AUTH`, which is answered by the handshake itself) get no reply.

use std::time::{Duration, Instant};
use tokio::sync::oneshot;

use crate::context::RelayContext;
use crate::dialer;
use crate::error::{Error, Result};
use crate::handler::eagle_tunnel::{self, EtRequestType};
use crate::tunnel::Tunnel;
use crate::version::{Version, PROTOCOL_COMPATIBLE_VERSION, PROTOCOL_VERSION};

pub const PING_REPLY: &str = "ok";
pub const VERSION_OK: &str = "Protocol Version OK";
pub const VERSION_INCOMPATIBLE: &str = "the version of protocol may be incompatible";
pub const VERSION_MISSING: &str = "no protocol version value";

const PING_REPLY_SIZE: usize = 8;
const VERSION_REPLY_SIZE: usize = 1024;
const SPEED_REPLY_SIZE: usize = 64;

/// Kind of ET-Check query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EtCheckKind {
    Auth,
    Ping,
    Version,
    Speed,
    Unknown,
}

impl EtCheckKind {
    pub fn parse(token: &str) -> Self {
        match token.to_ascii_uppercase().as_str() {
            "AUTH" => EtCheckKind::Auth,
            "PING" => EtCheckKind::Ping,
            "VERSION" => EtCheckKind::Version,
            "SPEED" => EtCheckKind::Speed,
            _ => EtCheckKind::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EtCheckKind::Auth => "AUTH",
            EtCheckKind::Ping => "PING",
            EtCheckKind::Version => "VERSION",
            EtCheckKind::Speed => "SPEED",
            EtCheckKind::Unknown => "UNKNOWN",
        }
    }
}

/// Request line for an ET-Check query.
pub fn format_request(kind: EtCheckKind, args: &[&str]) -> String {
    let mut parts = Vec::with_capacity(args.len() + 1);
    parts.push(kind.as_str());
    parts.extend_from_slice(args);
    eagle_tunnel::format_request(EtRequestType::Check, &parts)
}

/// The reply a responder sends for a query, or `None` for no reply.
///
/// `args` are the tokens after `CHECK`: the kind followed by its arguments.
pub fn reply(args: &[&str], ctx: &RelayContext) -> Option<String> {
    let kind = args
        .first()
        .map(|t| EtCheckKind::parse(t))
        .unwrap_or(EtCheckKind::Unknown);

    match kind {
        EtCheckKind::Ping => Some(PING_REPLY.to_string()),
        EtCheckKind::Version => Some(version_reply(args.get(1).copied())),
        EtCheckKind::Speed => Some(speed_reply(ctx)),
        EtCheckKind::Auth | EtCheckKind::Unknown => None,
    }
}

fn version_reply(raw: Option<&str>) -> String {
    let Some(raw) = raw else {
        return VERSION_MISSING.to_string();
    };
    match Version::parse(raw) {
        Ok(version) if version < PROTOCOL_COMPATIBLE_VERSION => VERSION_INCOMPATIBLE.to_string(),
        Ok(_) => VERSION_OK.to_string(),
        Err(e) => e.to_string(),
    }
}

fn speed_reply(ctx: &RelayContext) -> String {
    let speed_check = ctx.config().speed_check;
    if !speed_check.is_on() {
        return format!("speed-check {}", speed_check);
    }
    ctx.local_user().speed().to_string()
}

/// Answer a query on the tunnel's left side.
///
/// Always ends with [`Error::NoNeedToContinue`]: the reply is the whole
/// exchange and the tunnel must not relay afterwards.
pub async fn handle(args: &[&str], tunnel: &mut Tunnel, ctx: &RelayContext) -> Result<()> {
    if let Some(reply) = reply(args, ctx) {
        tunnel.write_left(reply.as_bytes()).await?;
    }
    Err(Error::NoNeedToContinue)
}

/// Send one query over a fresh tunnel to the relayer and time the exchange.
async fn exchange(ctx: &RelayContext, request: &str, reply_size: usize) -> Result<(String, Duration)> {
    let mut tunnel = Tunnel::new();
    let result = async {
        dialer::connect_to_relayer(&mut tunnel, ctx).await?;

        let start = Instant::now();
        tunnel.write_right(request.as_bytes()).await?;
        let mut buf = vec![0u8; reply_size];
        let n = tunnel.read_right(&mut buf).await?;
        let elapsed = start.elapsed();

        Ok::<_, Error>((String::from_utf8_lossy(&buf[..n]).into_owned(), elapsed))
    }
    .await;
    tunnel.close().await;
    result
}

/// Check authentication against the relayer.
pub async fn send_et_check_auth_req(ctx: &RelayContext) -> String {
    let mut tunnel = Tunnel::new();
    let result = dialer::connect_to_relayer(&mut tunnel, ctx).await;
    tunnel.close().await;

    match result {
        Err(e) => e.to_string(),
        Ok(()) if ctx.local_user().is_anonymous() => "no local user".to_string(),
        Ok(()) => format!("AUTH OK with local user: {}", ctx.local_user().id()),
    }
}

/// Measure round-trip time to the relayer; the result goes to `result_tx`.
///
/// Sends the elapsed milliseconds as a decimal string, or a failure message.
pub async fn send_et_check_ping_req(ctx: &RelayContext, result_tx: oneshot::Sender<String>) {
    let request = format_request(EtCheckKind::Ping, &[]);
    let message = match exchange(ctx, &request, PING_REPLY_SIZE).await {
        Ok((reply, elapsed)) if reply == PING_REPLY => elapsed.as_millis().to_string(),
        Ok((reply, _)) => format!("invalid ping reply: {}", reply),
        Err(e) => e.to_string(),
    };
    let _ = result_tx.send(message);
}

/// Ask the relayer whether our protocol version is compatible.
pub async fn send_et_check_version_req(ctx: &RelayContext) -> String {
    let version = PROTOCOL_VERSION.to_string();
    let request = format_request(EtCheckKind::Version, &[version.as_str()]);
    match exchange(ctx, &request, VERSION_REPLY_SIZE).await {
        Ok((reply, _)) => reply,
        Err(e) => e.to_string(),
    }
}

/// Ask the relayer for the measured speed of its local user.
pub async fn send_et_check_speed_req(ctx: &RelayContext) -> String {
    let request = format_request(EtCheckKind::Speed, &[]);
    match exchange(ctx, &request, SPEED_REPLY_SIZE).await {
        Ok((reply, _)) => reply,
        Err(e) => e.to_string(),
    }
}
