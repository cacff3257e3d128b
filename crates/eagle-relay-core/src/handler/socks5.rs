//! SOCKS5 handler: no-auth `CONNECT`.

use std::net::{Ipv4Addr, Ipv6Addr};
use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;
use tracing::debug;

use crate::context::RelayContext;
use crate::dialer;
use crate::error::{Error, Result};
use crate::request::Request;
use crate::tunnel::{TargetAddr, Tunnel};

// SOCKS5 constants
const SOCKS_VERSION: u8 = 0x05;
const AUTH_NONE: u8 = 0x00;
const AUTH_NO_ACCEPTABLE: u8 = 0xFF;
const CMD_CONNECT: u8 = 0x01;
const ADDR_TYPE_IPV4: u8 = 0x01;
const ADDR_TYPE_DOMAIN: u8 = 0x03;
const ADDR_TYPE_IPV6: u8 = 0x04;
const REP_SUCCESS: u8 = 0x00;
const REP_CONNECTION_REFUSED: u8 = 0x05;
const REP_CMD_NOT_SUPPORTED: u8 = 0x07;
const REP_ADDR_NOT_SUPPORTED: u8 = 0x08;

/// SOCKS5 handler.
#[derive(Debug, Clone, Copy, Default)]
pub struct Socks5;

impl Socks5 {
    pub async fn handle(&self, request: &Request, tunnel: &mut Tunnel, ctx: &RelayContext) -> Result<()> {
        let methods = parse_greeting(request.raw())?;
        if !methods.contains(&AUTH_NONE) {
            tunnel.write_left(&[SOCKS_VERSION, AUTH_NO_ACCEPTABLE]).await?;
            return Err(Error::AuthenticationFailed);
        }
        tunnel.write_left(&[SOCKS_VERSION, AUTH_NONE]).await?;

        // VER CMD RSV ATYP
        let mut header = [0u8; 4];
        tunnel.left_mut()?.read_exact(&mut header).await?;
        if header[0] != SOCKS_VERSION {
            return Err(Error::InvalidSocks5Protocol(
                "Invalid request version".into(),
            ));
        }

        let cmd = header[1];
        if cmd != CMD_CONNECT {
            tunnel.write_left(&reply(REP_CMD_NOT_SUPPORTED)).await?;
            return Err(Error::UnsupportedCommand(cmd));
        }

        let target = match read_address(tunnel.left_mut()?, header[3]).await {
            Err(Error::UnsupportedAddressType(atyp)) => {
                tunnel.write_left(&reply(REP_ADDR_NOT_SUPPORTED)).await?;
                return Err(Error::UnsupportedAddressType(atyp));
            }
            other => other?,
        };

        debug!("SOCKS5 CONNECT to {}", target);

        if let Err(e) = dialer::connect_target(tunnel, ctx, target).await {
            tunnel.write_left(&reply(REP_CONNECTION_REFUSED)).await?;
            return Err(e);
        }

        tunnel.write_left(&reply(REP_SUCCESS)).await?;
        Ok(())
    }
}

/// Offered authentication methods from a `VER NMETHODS METHODS...` greeting.
fn parse_greeting(raw: &[u8]) -> Result<&[u8]> {
    match raw {
        [SOCKS_VERSION, nmethods, methods @ ..] if methods.len() >= *nmethods as usize => {
            Ok(&methods[..*nmethods as usize])
        }
        [SOCKS_VERSION, ..] => Err(Error::InvalidSocks5Protocol(
            "Truncated greeting".into(),
        )),
        _ => Err(Error::InvalidSocks5Protocol(format!(
            "Invalid version: {:?}",
            raw.first()
        ))),
    }
}

/// Read `DST.ADDR DST.PORT` for the given address type.
async fn read_address(stream: &mut TcpStream, atyp: u8) -> Result<TargetAddr> {
    let host = match atyp {
        ADDR_TYPE_IPV4 => {
            let mut buf = [0u8; 4];
            stream.read_exact(&mut buf).await?;
            Ipv4Addr::from(buf).to_string()
        }
        ADDR_TYPE_DOMAIN => {
            let mut len = [0u8; 1];
            stream.read_exact(&mut len).await?;
            let mut domain = vec![0u8; len[0] as usize];
            stream.read_exact(&mut domain).await?;
            String::from_utf8_lossy(&domain).to_string()
        }
        ADDR_TYPE_IPV6 => {
            let mut buf = [0u8; 16];
            stream.read_exact(&mut buf).await?;
            Ipv6Addr::from(buf).to_string()
        }
        _ => {
            return Err(Error::UnsupportedAddressType(atyp));
        }
    };

    let mut port_buf = [0u8; 2];
    stream.read_exact(&mut port_buf).await?;
    Ok(TargetAddr::new(host, u16::from_be_bytes(port_buf)))
}

/// Reply `VER REP RSV ATYP BND.ADDR BND.PORT` with 0.0.0.0:0 as bound address.
fn reply(rep: u8) -> [u8; 10] {
    [SOCKS_VERSION, rep, 0x00, ADDR_TYPE_IPV4, 0, 0, 0, 0, 0, 0]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn greeting_methods() {
        assert_eq!(parse_greeting(&[0x05, 0x02, 0x00, 0x02]).unwrap(), &[0x00, 0x02]);
        assert_eq!(parse_greeting(&[0x05, 0x00]).unwrap(), &[] as &[u8]);
        assert!(parse_greeting(&[0x05, 0x03, 0x00]).is_err());
        assert!(parse_greeting(&[0x04, 0x01, 0x00]).is_err());
        assert!(parse_greeting(&[]).is_err());
    }

    #[test]
    fn reply_layout() {
        assert_eq!(reply(REP_SUCCESS), [5, 0, 0, 1, 0, 0, 0, 0, 0, 0]);
    }
}
