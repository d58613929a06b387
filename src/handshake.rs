//! HTTP/1.1 upgrade handshake: request/response construction and
//! validation, plus the accept-key computation.
//!
//! The engine speaks just enough HTTP for the upgrade exchange. Header names
//! are matched case-insensitively and bare-LF line endings are tolerated on
//! input; output always uses CRLF.

use base64::prelude::*;
use nom::bytes::complete::{tag, take_while1};
use nom::character::complete::{char, digit1, space0, space1};
use nom::{IResult, Parser};
use sha1::{Digest, Sha1};

use crate::config::{ConnectConfig, Protocol};
use crate::{Result, WsError};

/// The GUID every accept key is derived from (RFC 6455 Section 1.3).
const WS_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// A fresh `Sec-WebSocket-Key`: base64 of 16 random bytes.
pub(crate) fn generate_key() -> String {
    BASE64_STANDARD.encode(rand::random::<[u8; 16]>())
}

/// `Sec-WebSocket-Accept` for a given key: base64(SHA1(key ++ GUID)).
pub(crate) fn accept_key(key: &str) -> String {
    let mut sha1 = Sha1::new();
    sha1.update(key.as_bytes());
    sha1.update(WS_GUID.as_bytes());
    BASE64_STANDARD.encode(sha1.finalize())
}

/// Build the client upgrade request.
pub(crate) fn build_client_request(cfg: &ConnectConfig, key: &str) -> String {
    let default_port = match cfg.protocol {
        Protocol::Ws => 80,
        Protocol::Wss => 443,
    };
    let mut req = format!("GET {} HTTP/1.1\r\n", cfg.resource);
    if cfg.port == default_port {
        req.push_str(&format!("Host: {}\r\n", cfg.host));
    } else {
        req.push_str(&format!("Host: {}:{}\r\n", cfg.host, cfg.port));
    }
    req.push_str("Upgrade: websocket\r\n");
    req.push_str("Connection: Upgrade\r\n");
    req.push_str(&format!("Sec-WebSocket-Key: {key}\r\n"));
    req.push_str("Sec-WebSocket-Version: 13\r\n");
    if let Some(origin) = &cfg.origin {
        req.push_str(&format!("Origin: {origin}\r\n"));
    }
    if let Some(subprotocol) = &cfg.subprotocol {
        req.push_str(&format!("Sec-WebSocket-Protocol: {subprotocol}\r\n"));
    }
    for line in &cfg.extra_headers {
        req.push_str(line);
        req.push_str("\r\n");
    }
    req.push_str("\r\n");
    req
}

/// Validate the server's upgrade response against the key we sent.
pub(crate) fn validate_client_response(head: &[u8], key: &str) -> Result<()> {
    let text = std::str::from_utf8(head).map_err(|_| WsError::BadHttpResponse)?;
    let mut lines = lines(text);

    let status = lines.next().ok_or(WsError::BadHttpResponse)?;
    let code = parse_status_code(status).ok_or(WsError::BadHttpResponse)?;
    if code != 101 {
        return Err(WsError::InvalidStatusCode(code));
    }

    let accept =
        find_header(lines, "Sec-WebSocket-Accept").ok_or(WsError::MissingSecWebSocketAccept)?;
    if accept != accept_key(key) {
        return Err(WsError::AcceptKeyMismatch);
    }
    Ok(())
}

/// Validate a client's upgrade request, returning its `Sec-WebSocket-Key`.
pub(crate) fn validate_server_request(head: &[u8]) -> Result<String> {
    let text = std::str::from_utf8(head).map_err(|_| WsError::BadHttpRequest)?;
    let mut line_iter = lines(text);

    let request_line = line_iter.next().ok_or(WsError::BadHttpRequest)?;
    parse_request_target(request_line).ok_or(WsError::BadHttpRequest)?;

    let headers: Vec<&str> = line_iter.collect();

    find_header(headers.iter().copied(), "Upgrade")
        .filter(|v| v.eq_ignore_ascii_case("websocket"))
        .ok_or(WsError::InvalidUpgradeHeader)?;

    find_header(headers.iter().copied(), "Connection")
        .filter(|v| has_token(v, "Upgrade"))
        .ok_or(WsError::InvalidConnectionHeader)?;

    let key = find_header(headers.iter().copied(), "Sec-WebSocket-Key")
        .ok_or(WsError::MissingSecWebSocketKey)?;
    Ok(key.to_owned())
}

/// Build the 101 response carrying the accept key.
pub(crate) fn build_server_response(accept: &str) -> String {
    format!(
        "HTTP/1.1 101 Switching Protocols\r\n\
         Upgrade: websocket\r\n\
         Connection: Upgrade\r\n\
         Sec-WebSocket-Accept: {accept}\r\n\r\n"
    )
}

/// Non-empty lines of a header block, tolerating bare-LF endings.
fn lines(text: &str) -> impl Iterator<Item = &str> {
    text.split('\n')
        .map(|l| l.trim_end_matches('\r'))
        .filter(|l| !l.is_empty())
}

/// Status code of an `HTTP/1.x <code> ...` line.
fn parse_status_code(line: &str) -> Option<u16> {
    let res: IResult<&str, (&str, &str, &str, &str)> =
        (tag("HTTP/1."), digit1, space1, digit1).parse(line);
    match res {
        Ok((_, (_, _, _, code))) => code.parse().ok(),
        Err(_) => None,
    }
}

/// Request target of a `GET <target> ...` line.
fn parse_request_target(line: &str) -> Option<&str> {
    let res: IResult<&str, (&str, &str, &str)> =
        (tag("GET"), space1, take_while1(|c: char| !c.is_whitespace())).parse(line);
    match res {
        Ok((_, (_, _, target))) => Some(target),
        Err(_) => None,
    }
}

/// Split a `Name: value` header line.
fn header_kv(line: &str) -> Option<(&str, &str)> {
    let res: IResult<&str, (&str, char, &str)> =
        (take_while1(|c: char| c != ':'), char(':'), space0).parse(line);
    match res {
        Ok((value, (name, _, _))) => Some((name.trim(), value.trim_end())),
        Err(_) => None,
    }
}

/// Case-insensitive header lookup over parsed lines.
fn find_header<'a>(lines: impl Iterator<Item = &'a str>, name: &str) -> Option<&'a str> {
    for line in lines {
        if let Some((k, v)) = header_kv(line) {
            if k.eq_ignore_ascii_case(name) {
                return Some(v);
            }
        }
    }
    None
}

/// Whether a comma-separated header value contains `token`
/// (case-insensitive), e.g. `Connection: keep-alive, Upgrade`.
fn has_token(value: &str, token: &str) -> bool {
    value
        .split(',')
        .any(|t| t.trim().eq_ignore_ascii_case(token))
}
