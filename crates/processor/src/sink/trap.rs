//! SNMPv2c trap transport
//!
//! Traps carry the standard `sysUpTime.0` and `snmpTrapOID.0` bindings
//! followed by one OCTET STRING binding under `{oid}.1` holding the rendered
//! message. Encoding is plain BER.

use crate::error::SinkError;
use async_trait::async_trait;
use std::sync::atomic::{AtomicI32, Ordering};
use std::time::Instant;
use tokio::net::UdpSocket;
use tokio::sync::OnceCell;
use tracing::debug;

const SYS_UP_TIME: &str = "1.3.6.1.2.1.1.3.0";
const SNMP_TRAP_OID: &str = "1.3.6.1.6.3.1.1.4.1.0";
const DEFAULT_TRAP_PORT: u16 = 162;

const TAG_INTEGER: u8 = 0x02;
const TAG_OCTET_STRING: u8 = 0x04;
const TAG_OID: u8 = 0x06;
const TAG_SEQUENCE: u8 = 0x30;
const TAG_TIMETICKS: u8 = 0x43;
const TAG_TRAP_V2: u8 = 0xA7;
const SNMP_V2C: i64 = 1;

#[async_trait]
pub trait TrapSender: Send + Sync {
    async fn send(&self, target: &str, community: &str, oid: &str, message: &str) -> anyhow::Result<()>;
}

/// Sends traps from one UDP socket, bound to `bind_address` on first use
#[derive(Debug)]
pub struct UdpTrapSender {
    bind_address: String,
    socket: OnceCell<UdpSocket>,
    request_id: AtomicI32,
    started: Instant,
}

impl UdpTrapSender {
    pub fn new(bind_address: impl Into<String>) -> Self {
        Self {
            bind_address: bind_address.into(),
            socket: OnceCell::new(),
            request_id: AtomicI32::new(1),
            started: Instant::now(),
        }
    }

    fn uptime_ticks(&self) -> u32 {
        // hundredths of a second
        (self.started.elapsed().as_millis() / 10).min(u32::MAX as u128) as u32
    }

    /// A failed bind leaves the cell empty so the next trap tries again
    async fn socket(&self) -> std::io::Result<&UdpSocket> {
        self.socket
            .get_or_try_init(|| UdpSocket::bind(self.bind_address.as_str()))
            .await
    }
}

#[async_trait]
impl TrapSender for UdpTrapSender {
    async fn send(&self, target: &str, community: &str, oid: &str, message: &str) -> anyhow::Result<()> {
        let request_id = self.request_id.fetch_add(1, Ordering::Relaxed) & i32::MAX;
        let pdu = encode_trap(community, request_id, self.uptime_ticks(), oid, message)?;

        let target = with_default_port(target);
        let socket = self.socket().await?;
        let sent = socket.send_to(&pdu, &target).await?;
        debug!(target = %target, bytes = sent, request_id, "trap sent");
        Ok(())
    }
}

fn with_default_port(target: &str) -> String {
    let has_port = match target.rsplit_once(':') {
        // bare IPv6 addresses contain colons but no brackets
        Some((host, port)) => port.parse::<u16>().is_ok() && (!host.contains(':') || host.ends_with(']')),
        None => false,
    };
    if has_port {
        target.to_string()
    } else {
        format!("{}:{}", target, DEFAULT_TRAP_PORT)
    }
}

/// Full SNMPv2c trap message
pub fn encode_trap(
    community: &str,
    request_id: i32,
    uptime_ticks: u32,
    oid: &str,
    message: &str,
) -> Result<Vec<u8>, SinkError> {
    let payload_oid = format!("{}.1", oid);
    let mut bindings = Vec::new();
    bindings.extend(varbind(SYS_UP_TIME, tlv(TAG_TIMETICKS, &unsigned_bytes(uptime_ticks)))?);
    bindings.extend(varbind(SNMP_TRAP_OID, encode_oid(oid)?)?);
    bindings.extend(varbind(&payload_oid, tlv(TAG_OCTET_STRING, message.as_bytes()))?);

    let mut pdu = Vec::new();
    pdu.extend(encode_integer(i64::from(request_id)));
    pdu.extend(encode_integer(0)); // error-status
    pdu.extend(encode_integer(0)); // error-index
    pdu.extend(tlv(TAG_SEQUENCE, &bindings));

    let mut body = Vec::new();
    body.extend(encode_integer(SNMP_V2C));
    body.extend(tlv(TAG_OCTET_STRING, community.as_bytes()));
    body.extend(tlv(TAG_TRAP_V2, &pdu));
    Ok(tlv(TAG_SEQUENCE, &body))
}

fn varbind(oid: &str, value: Vec<u8>) -> Result<Vec<u8>, SinkError> {
    let mut content = encode_oid(oid)?;
    content.extend(value);
    Ok(tlv(TAG_SEQUENCE, &content))
}

fn tlv(tag: u8, content: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(content.len() + 4);
    out.push(tag);
    out.extend(encode_length(content.len()));
    out.extend_from_slice(content);
    out
}

fn encode_length(len: usize) -> Vec<u8> {
    if len < 0x80 {
        return vec![len as u8];
    }
    let bytes: Vec<u8> = len
        .to_be_bytes()
        .into_iter()
        .skip_while(|b| *b == 0)
        .collect();
    let mut out = Vec::with_capacity(bytes.len() + 1);
    out.push(0x80 | bytes.len() as u8);
    out.extend(bytes);
    out
}

fn encode_integer(value: i64) -> Vec<u8> {
    let bytes = value.to_be_bytes();
    // drop leading bytes that only repeat the sign
    let mut start = 0;
    while start < bytes.len() - 1 {
        let redundant = (bytes[start] == 0x00 && bytes[start + 1] & 0x80 == 0)
            || (bytes[start] == 0xff && bytes[start + 1] & 0x80 != 0);
        if !redundant {
            break;
        }
        start += 1;
    }
    tlv(TAG_INTEGER, &bytes[start..])
}

fn unsigned_bytes(value: u32) -> Vec<u8> {
    let mut bytes: Vec<u8> = value
        .to_be_bytes()
        .into_iter()
        .skip_while(|b| *b == 0)
        .collect();
    if bytes.first().map_or(true, |b| b & 0x80 != 0) {
        bytes.insert(0, 0);
    }
    bytes
}

fn encode_oid(oid: &str) -> Result<Vec<u8>, SinkError> {
    let arcs = oid
        .split('.')
        .map(str::parse::<u32>)
        .collect::<Result<Vec<u32>, _>>()
        .map_err(|_| SinkError::Render(format!("invalid oid {}", oid)))?;
    if arcs.len() < 2 || arcs[0] > 2 || (arcs[0] < 2 && arcs[1] >= 40) {
        return Err(SinkError::Render(format!("invalid oid {}", oid)));
    }

    let mut content = base128(arcs[0] * 40 + arcs[1]);
    for arc in &arcs[2..] {
        content.extend(base128(*arc));
    }
    Ok(tlv(TAG_OID, &content))
}

fn base128(mut value: u32) -> Vec<u8> {
    let mut out = vec![(value & 0x7f) as u8];
    value >>= 7;
    while value > 0 {
        out.push(((value & 0x7f) as u8) | 0x80);
        value >>= 7;
    }
    out.reverse();
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_length_forms() {
        assert_eq!(encode_length(5), vec![0x05]);
        assert_eq!(encode_length(200), vec![0x81, 0xc8]);
        assert_eq!(encode_length(300), vec![0x82, 0x01, 0x2c]);
    }

    #[test]
    fn test_integers() {
        assert_eq!(encode_integer(0), vec![0x02, 0x01, 0x00]);
        assert_eq!(encode_integer(127), vec![0x02, 0x01, 0x7f]);
        assert_eq!(encode_integer(128), vec![0x02, 0x02, 0x00, 0x80]);
        assert_eq!(encode_integer(-1), vec![0x02, 0x01, 0xff]);
        assert_eq!(unsigned_bytes(0), vec![0x00]);
        assert_eq!(unsigned_bytes(0x80), vec![0x00, 0x80]);
    }

    #[test]
    fn test_oid() {
        assert_eq!(encode_oid("1.3.6.1").unwrap(), vec![0x06, 0x03, 0x2b, 0x06, 0x01]);
        // 8072 needs two base-128 digits
        assert_eq!(
            encode_oid("1.3.6.1.4.1.8072").unwrap(),
            vec![0x06, 0x07, 0x2b, 0x06, 0x01, 0x04, 0x01, 0xbf, 0x08]
        );
        assert!(encode_oid("1").is_err());
        assert!(encode_oid("1.x.3").is_err());
    }

    #[test]
    fn test_trap_layout() {
        let pdu = encode_trap("public", 7, 100, "1.3.6.1.4.1.8072.9999.1", "toto=12").unwrap();
        assert_eq!(pdu[0], TAG_SEQUENCE);
        // version 1 (v2c), then the community string
        let body = &pdu[2..];
        assert_eq!(&body[..3], &[0x02, 0x01, 0x01]);
        assert_eq!(&body[3..5], &[0x04, 0x06]);
        assert_eq!(&body[5..11], b"public");
        assert_eq!(body[11], TAG_TRAP_V2);
        assert_eq!(pdu[1] as usize, pdu.len() - 2);
        assert!(pdu.windows(7).any(|w| w == b"toto=12"));
    }

    #[test]
    fn test_default_port() {
        assert_eq!(with_default_port("10.0.0.1"), "10.0.0.1:162");
        assert_eq!(with_default_port("10.0.0.1:1162"), "10.0.0.1:1162");
        assert_eq!(with_default_port("[::1]:1162"), "[::1]:1162");
    }

    #[tokio::test]
    async fn test_send_over_udp() {
        let receiver = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let target = receiver.local_addr().unwrap().to_string();

        let sender = UdpTrapSender::new("127.0.0.1:0");
        sender
            .send(&target, "secret", "1.3.6.1.4.1.8072.9999.1", "hello")
            .await
            .unwrap();

        let mut buf = [0u8; 512];
        let (len, _) = receiver.recv_from(&mut buf).await.unwrap();
        let datagram = &buf[..len];
        assert!(datagram.windows(6).any(|w| w == b"secret"));
        assert!(datagram.windows(5).any(|w| w == b"hello"));
    }

    #[tokio::test]
    async fn test_traps_share_one_socket() {
        let receiver = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let target = receiver.local_addr().unwrap().to_string();

        let sender = UdpTrapSender::new("127.0.0.1:0");
        for message in ["first", "second"] {
            sender
                .send(&target, "public", "1.3.6.1.4.1.8072.9999.1", message)
                .await
                .unwrap();
        }

        let mut buf = [0u8; 512];
        let (len, first_from) = receiver.recv_from(&mut buf).await.unwrap();
        assert!(buf[..len].windows(5).any(|w| w == b"first"));
        let (len, second_from) = receiver.recv_from(&mut buf).await.unwrap();
        assert!(buf[..len].windows(6).any(|w| w == b"second"));

        assert_eq!(first_from, second_from);
        assert_eq!(sender.socket().await.unwrap().local_addr().unwrap(), first_from);
    }

    #[tokio::test]
    async fn test_bind_failure_is_retried() {
        let sender = UdpTrapSender::new("not-an-address");
        assert!(sender.send("127.0.0.1:9", "public", "1.3.6.1.4.1.8072", "x").await.is_err());
        assert!(!sender.socket.initialized());
    }
}
