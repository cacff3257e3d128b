//! Protocol handlers.
//!
//! A handler takes the classified first payload and a tunnel whose left
//! endpoint is bound, and either prepares the right endpoint for relaying
//! (`Ok`) or ends the connection (`Err`). [`Error::NoNeedToContinue`] means
//! the handler already finished the exchange itself.

pub mod eagle_tunnel;
pub mod et_check;
pub mod http;
pub mod socks5;

pub use eagle_tunnel::EagleTunnel;
pub use http::HttpProxy;
pub use socks5::Socks5;

use crate::config::ProtocolsConfig;
use crate::connection::Protocol;
use crate::context::RelayContext;
use crate::error::{Error, Result};
use crate::request::{ProtocolKind, Request};
use crate::tunnel::{TargetAddr, Tunnel};

/// Handler selected for a connection.
#[derive(Debug, Clone, Copy)]
pub enum Handler {
    EagleTunnel(EagleTunnel),
    HttpProxy(HttpProxy),
    Socks5(Socks5),
}

impl Handler {
    /// Pick the handler for a protocol kind, if that protocol is enabled.
    pub fn select(kind: ProtocolKind, protocols: &ProtocolsConfig) -> Option<Self> {
        match kind {
            ProtocolKind::EagleTunnel if protocols.eagle_tunnel => {
                Some(Handler::EagleTunnel(EagleTunnel))
            }
            ProtocolKind::HttpProxy if protocols.http => Some(Handler::HttpProxy(HttpProxy)),
            ProtocolKind::Socks if protocols.socks5 => Some(Handler::Socks5(Socks5)),
            _ => None,
        }
    }

    pub fn protocol(&self) -> Protocol {
        match self {
            Handler::EagleTunnel(_) => Protocol::EagleTunnel,
            Handler::HttpProxy(_) => Protocol::HttpProxy,
            Handler::Socks5(_) => Protocol::Socks5,
        }
    }

    pub async fn handle(&self, request: &Request, tunnel: &mut Tunnel, ctx: &RelayContext) -> Result<()> {
        match self {
            Handler::EagleTunnel(handler) => handler.handle(request, tunnel, ctx).await,
            Handler::HttpProxy(handler) => handler.handle(request, tunnel, ctx).await,
            Handler::Socks5(handler) => handler.handle(request, tunnel, ctx).await,
        }
    }
}

/// Parse `host:port` or `[v6]:port`.
pub(crate) fn parse_host_port(target: &str) -> Result<TargetAddr> {
    let (host, port) = target
        .rsplit_once(':')
        .ok_or_else(|| Error::AddressResolution(format!("Invalid target: {}", target)))?;

    let port: u16 = port
        .parse()
        .map_err(|_| Error::AddressResolution(format!("Invalid port: {}", port)))?;

    let host = host.trim_start_matches('[').trim_end_matches(']');
    if host.is_empty() {
        return Err(Error::AddressResolution(format!("Invalid target: {}", target)));
    }

    Ok(TargetAddr::new(host, port))
}
