//! The first payload of an accepted connection and its protocol kind.

use bytes::Bytes;
use std::borrow::Cow;

/// Leading token of every EagleTunnel message.
pub const ET_MARKER: &str = "eagle_tunnel";

const SOCKS_VERSION: u8 = 0x05;

const HTTP_METHODS: &[&str] = &[
    "CONNECT", "GET", "POST", "PUT", "DELETE", "HEAD", "OPTIONS", "TRACE", "PATCH",
];

/// Protocol a client speaks, judged from its first bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolKind {
    EagleTunnel,
    HttpProxy,
    Socks,
    Unknown,
}

/// Classify a buffer by the protocol signature in its leading bytes.
pub fn classify(raw: &[u8]) -> ProtocolKind {
    if raw.starts_with(ET_MARKER.as_bytes()) {
        return ProtocolKind::EagleTunnel;
    }
    if raw.first() == Some(&SOCKS_VERSION) {
        return ProtocolKind::Socks;
    }
    let is_http = HTTP_METHODS.iter().any(|method| {
        raw.len() > method.len()
            && raw.starts_with(method.as_bytes())
            && raw[method.len()] == b' '
    });
    if is_http {
        return ProtocolKind::HttpProxy;
    }
    ProtocolKind::Unknown
}

/// Read-only view over the bytes read when a connection was accepted.
#[derive(Debug, Clone)]
pub struct Request {
    raw: Bytes,
    kind: ProtocolKind,
}

impl Request {
    pub fn new(raw: impl Into<Bytes>) -> Self {
        let raw = raw.into();
        let kind = classify(&raw);
        Self { raw, kind }
    }

    pub fn raw(&self) -> &Bytes {
        &self.raw
    }

    /// The payload as text, with invalid UTF-8 replaced.
    pub fn message_text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.raw)
    }

    pub fn kind(&self) -> ProtocolKind {
        self.kind
    }
}
