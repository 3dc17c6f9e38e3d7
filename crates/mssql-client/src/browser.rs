//! SQL Server Browser lookup for named instances.
//!
//! A named instance listens on a dynamic port. The Browser service answers
//! a `CLNT_UCAST_INST` datagram on UDP 1434 with the instance's properties
//! as `key;value;` pairs, from which the TCP port is taken.

use std::net::SocketAddr;
use std::time::Duration;

use tokio::net::{UdpSocket, lookup_host};

use crate::error::{Error, Result};

/// UDP port of the Browser service.
pub const BROWSER_PORT: u16 = 1434;

const CLNT_UCAST_INST: u8 = 0x04;
const SVR_RESP: u8 = 0x05;
const MAX_RESPONSE: usize = 4096;

/// Resolve `instance` on `host` to a TCP port.
pub(crate) async fn resolve_instance(host: &str, instance: &str, timeout: Duration) -> Result<u16> {
    let addrs = lookup_host((host, BROWSER_PORT))
        .await
        .map_err(|e| Error::Browser(format!("cannot resolve {host}: {e}")))?;

    let mut last_error = Error::Browser(format!("no address for {host}"));
    for addr in addrs {
        match query(addr, instance, timeout).await {
            Ok(port) => {
                tracing::debug!(host, instance, port, "resolved named instance");
                return Ok(port);
            }
            Err(e) => {
                tracing::debug!(%addr, error = %e, "browser query failed");
                last_error = e;
            }
        }
    }
    Err(last_error)
}

async fn query(addr: SocketAddr, instance: &str, timeout: Duration) -> Result<u16> {
    let local: SocketAddr = if addr.is_ipv4() {
        SocketAddr::from(([0, 0, 0, 0], 0))
    } else {
        SocketAddr::from(([0u16; 8], 0))
    };
    let socket = UdpSocket::bind(local).await?;

    let mut request = Vec::with_capacity(1 + instance.len());
    request.push(CLNT_UCAST_INST);
    request.extend_from_slice(instance.as_bytes());
    socket.send_to(&request, addr).await?;

    let mut buf = vec![0u8; MAX_RESPONSE];
    let len = tokio::time::timeout(timeout, socket.recv(&mut buf))
        .await
        .map_err(|_| Error::Browser(format!("no answer from {addr} for instance {instance}")))??;
    parse_response(&buf[..len], instance)
}

/// Extract the TCP port of `instance` from a Browser response.
pub(crate) fn parse_response(response: &[u8], instance: &str) -> Result<u16> {
    let [SVR_RESP, lo, hi, body @ ..] = response else {
        return Err(Error::Browser("malformed browser response".into()));
    };
    let declared = usize::from(u16::from_le_bytes([*lo, *hi]));
    let body = body.get(..declared).unwrap_or(body);
    let text = String::from_utf8_lossy(body);

    // Instances are separated by ";;"; each is a flat list of key;value pairs.
    for block in text.split(";;") {
        let mut fields = block.split(';');
        let mut name = None;
        let mut port = None;
        while let (Some(key), Some(value)) = (fields.next(), fields.next()) {
            match key {
                k if k.eq_ignore_ascii_case("InstanceName") => name = Some(value),
                k if k.eq_ignore_ascii_case("tcp") => port = Some(value),
                _ => {}
            }
        }
        if name.is_some_and(|n| n.eq_ignore_ascii_case(instance)) {
            return port
                .ok_or_else(|| Error::Browser(format!("instance {instance} has no TCP listener")))?
                .parse()
                .map_err(|_| Error::Browser(format!("invalid port for instance {instance}")));
        }
    }
    Err(Error::Browser(format!("instance {instance} not found")))
}
