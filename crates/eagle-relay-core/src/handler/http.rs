//! HTTP proxy handler: `CONNECT` tunnels and absolute-form forwarding.

use tracing::debug;

use crate::context::RelayContext;
use crate::dialer;
use crate::error::{Error, Result};
use crate::handler::parse_host_port;
use crate::request::Request;
use crate::tunnel::{TargetAddr, Tunnel};

const CONNECT_ESTABLISHED: &[u8] = b"HTTP/1.1 200 Connection Established\r\n\r\n";
const BAD_GATEWAY: &[u8] = b"HTTP/1.1 502 Bad Gateway\r\n\r\n";

/// HTTP proxy handler.
#[derive(Debug, Clone, Copy, Default)]
pub struct HttpProxy;

impl HttpProxy {
    pub async fn handle(&self, request: &Request, tunnel: &mut Tunnel, ctx: &RelayContext) -> Result<()> {
        let text = request.message_text();
        let request_line = text.lines().next().unwrap_or_default();

        // CONNECT host:port HTTP/1.1
        let parts: Vec<&str> = request_line.split_whitespace().collect();
        if parts.len() < 3 {
            return Err(Error::InvalidHttpProtocol("Invalid request line".into()));
        }
        let method = parts[0];
        let is_connect = method.eq_ignore_ascii_case("CONNECT");

        let target = if is_connect {
            parse_host_port(parts[1])
                .map_err(|_| Error::InvalidHttpProtocol(format!("Invalid target: {}", parts[1])))?
        } else {
            parse_absolute_uri(parts[1])?
        };

        debug!("HTTP {} to {}", method, target);

        if let Err(e) = dialer::connect_target(tunnel, ctx, target).await {
            tunnel.write_left(BAD_GATEWAY).await?;
            return Err(e);
        }

        if is_connect {
            tunnel.write_left(CONNECT_ESTABLISHED).await?;
        } else {
            tunnel.write_right(request.raw()).await?;
        }
        Ok(())
    }
}

/// Target of an absolute-form request URI, `http://host[:port]/path`.
fn parse_absolute_uri(uri: &str) -> Result<TargetAddr> {
    let rest = uri
        .strip_prefix("http://")
        .ok_or_else(|| Error::InvalidHttpProtocol(format!("Unsupported request URI: {}", uri)))?;

    let authority = rest.split(['/', '?', '#']).next().unwrap_or_default();
    let authority = authority.rsplit('@').next().unwrap_or_default();
    if authority.is_empty() {
        return Err(Error::InvalidHttpProtocol(format!("Missing host: {}", uri)));
    }

    let has_port = match authority.rfind(':') {
        Some(colon) => !authority[colon..].contains(']'),
        None => false,
    };
    if has_port {
        parse_host_port(authority)
            .map_err(|_| Error::InvalidHttpProtocol(format!("Invalid host: {}", authority)))
    } else {
        let host = authority.trim_start_matches('[').trim_end_matches(']');
        Ok(TargetAddr::new(host, 80))
    }
}
