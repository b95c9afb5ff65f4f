//! PROXY protocol (v1 text, v2 binary) header parsing.
//!
//! A listener with `proxy_protocol` enabled reads one header from every
//! accepted connection before handing the stream to the HTTP engine. The
//! header's source address replaces the socket peer address.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

use tokio::io::{AsyncRead, AsyncReadExt};

const V2_SIGNATURE: [u8; 12] = [
    0x0D, 0x0A, 0x0D, 0x0A, 0x00, 0x0D, 0x0A, 0x51, 0x55, 0x49, 0x54, 0x0A,
];
const V1_MAX_LEN: usize = 107;

#[derive(Debug, thiserror::Error)]
pub enum ProxyProtocolError {
    #[error("connection closed while reading proxy header: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid proxy header: {0}")]
    Invalid(String),
}

/// Addresses carried by a header. `None` for `UNKNOWN` / `LOCAL`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProxyHeader {
    pub source: Option<SocketAddr>,
    pub destination: Option<SocketAddr>,
}

impl ProxyHeader {
    const LOCAL: ProxyHeader = ProxyHeader {
        source: None,
        destination: None,
    };
}

fn invalid(msg: impl Into<String>) -> ProxyProtocolError {
    ProxyProtocolError::Invalid(msg.into())
}

/// Read exactly one header from `stream`, leaving the payload unread.
pub async fn read_header<S>(stream: &mut S) -> Result<ProxyHeader, ProxyProtocolError>
where
    S: AsyncRead + Unpin,
{
    let mut prefix = [0u8; 8];
    stream.read_exact(&mut prefix).await?;

    if prefix == V2_SIGNATURE[..8] {
        let mut header = [0u8; 16];
        header[..8].copy_from_slice(&prefix);
        stream.read_exact(&mut header[8..]).await?;
        let len = u16::from_be_bytes([header[14], header[15]]) as usize;
        let mut payload = vec![0u8; len];
        stream.read_exact(&mut payload).await?;
        return parse_v2(&header, &payload);
    }

    if &prefix[..6] != b"PROXY " {
        return Err(invalid("missing PROXY signature"));
    }
    let mut line = prefix.to_vec();
    while !line.ends_with(b"\r\n") {
        if line.len() >= V1_MAX_LEN {
            return Err(invalid("v1 header too long"));
        }
        let mut byte = [0u8; 1];
        stream.read_exact(&mut byte).await?;
        line.push(byte[0]);
    }
    let text = std::str::from_utf8(&line).map_err(|_| invalid("v1 header is not ASCII"))?;
    parse_v1(text)
}

/// Parse a complete v1 line, including its trailing CRLF.
pub fn parse_v1(line: &str) -> Result<ProxyHeader, ProxyProtocolError> {
    let line = line
        .strip_suffix("\r\n")
        .ok_or_else(|| invalid("v1 header not terminated"))?;
    let mut parts = line.split(' ');
    if parts.next() != Some("PROXY") {
        return Err(invalid("missing PROXY signature"));
    }
    match parts.next() {
        Some("UNKNOWN") => Ok(ProxyHeader::LOCAL),
        Some(family @ ("TCP4" | "TCP6")) => {
            let fields: Vec<&str> = parts.collect();
            let [src, dst, src_port, dst_port] = fields[..] else {
                return Err(invalid("v1 header needs four address fields"));
            };
            let src: IpAddr = src.parse().map_err(|_| invalid("bad source address"))?;
            let dst: IpAddr = dst.parse().map_err(|_| invalid("bad destination address"))?;
            if (family == "TCP4") != src.is_ipv4() || src.is_ipv4() != dst.is_ipv4() {
                return Err(invalid("address family mismatch"));
            }
            let src_port: u16 = src_port.parse().map_err(|_| invalid("bad source port"))?;
            let dst_port: u16 = dst_port.parse().map_err(|_| invalid("bad destination port"))?;
            Ok(ProxyHeader {
                source: Some(SocketAddr::new(src, src_port)),
                destination: Some(SocketAddr::new(dst, dst_port)),
            })
        }
        _ => Err(invalid("unknown v1 protocol family")),
    }
}

/// Parse a v2 header (16 bytes) and its address payload.
pub fn parse_v2(header: &[u8; 16], payload: &[u8]) -> Result<ProxyHeader, ProxyProtocolError> {
    if header[..12] != V2_SIGNATURE {
        return Err(invalid("missing v2 signature"));
    }
    let version = header[12] >> 4;
    let command = header[12] & 0x0F;
    if version != 2 {
        return Err(invalid(format!("unsupported version {version}")));
    }
    match command {
        0x0 => return Ok(ProxyHeader::LOCAL),
        0x1 => {}
        other => return Err(invalid(format!("unknown command {other}"))),
    }

    let family = header[13] >> 4;
    match family {
        // AF_INET
        0x1 => {
            let a = payload.get(..12).ok_or_else(|| invalid("short IPv4 payload"))?;
            let src = Ipv4Addr::new(a[0], a[1], a[2], a[3]);
            let dst = Ipv4Addr::new(a[4], a[5], a[6], a[7]);
            let src_port = u16::from_be_bytes([a[8], a[9]]);
            let dst_port = u16::from_be_bytes([a[10], a[11]]);
            Ok(ProxyHeader {
                source: Some(SocketAddr::new(IpAddr::V4(src), src_port)),
                destination: Some(SocketAddr::new(IpAddr::V4(dst), dst_port)),
            })
        }
        // AF_INET6
        0x2 => {
            let a = payload.get(..36).ok_or_else(|| invalid("short IPv6 payload"))?;
            let mut src = [0u8; 16];
            let mut dst = [0u8; 16];
            src.copy_from_slice(&a[..16]);
            dst.copy_from_slice(&a[16..32]);
            let src_port = u16::from_be_bytes([a[32], a[33]]);
            let dst_port = u16::from_be_bytes([a[34], a[35]]);
            Ok(ProxyHeader {
                source: Some(SocketAddr::new(IpAddr::V6(Ipv6Addr::from(src)), src_port)),
                destination: Some(SocketAddr::new(IpAddr::V6(Ipv6Addr::from(dst)), dst_port)),
            })
        }
        // AF_UNSPEC, AF_UNIX: no usable peer address
        _ => Ok(ProxyHeader::LOCAL),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn v1_tcp4() {
        let header = parse_v1("PROXY TCP4 192.168.0.1 192.168.0.11 56324 443\r\n").unwrap();
        assert_eq!(header.source, Some("192.168.0.1:56324".parse().unwrap()));
        assert_eq!(header.destination, Some("192.168.0.11:443".parse().unwrap()));
    }

    #[test]
    fn v1_unknown_and_errors() {
        assert_eq!(parse_v1("PROXY UNKNOWN\r\n").unwrap(), ProxyHeader::LOCAL);
        assert!(parse_v1("PROXY TCP4 ::1 ::1 1 2\r\n").is_err());
        assert!(parse_v1("PROXY TCP4 1.1.1.1 2.2.2.2 1\r\n").is_err());
        assert!(parse_v1("PROXY TCP4 1.1.1.1 2.2.2.2 1 2").is_err());
    }

    fn v2_bytes(command: u8, family: u8, payload: &[u8]) -> Vec<u8> {
        let mut bytes = V2_SIGNATURE.to_vec();
        bytes.push(0x20 | command);
        bytes.push(family);
        bytes.extend_from_slice(&(payload.len() as u16).to_be_bytes());
        bytes.extend_from_slice(payload);
        bytes
    }

    #[tokio::test]
    async fn v2_ipv4_leaves_payload_unread() {
        let mut wire = v2_bytes(0x1, 0x11, &[10, 0, 0, 1, 10, 0, 0, 2, 0x1F, 0x90, 0x00, 0x50]);
        wire.extend_from_slice(b"GET / HTTP/1.1\r\n");
        let mut stream = &wire[..];

        let header = read_header(&mut stream).await.unwrap();
        assert_eq!(header.source, Some("10.0.0.1:8080".parse().unwrap()));
        assert_eq!(header.destination, Some("10.0.0.2:80".parse().unwrap()));
        assert_eq!(stream, b"GET / HTTP/1.1\r\n");
    }

    #[tokio::test]
    async fn v1_over_stream() {
        let wire = b"PROXY TCP6 ::1 ::2 1000 2000\r\nGET /".to_vec();
        let mut stream = &wire[..];
        let header = read_header(&mut stream).await.unwrap();
        assert_eq!(header.source, Some("[::1]:1000".parse().unwrap()));
        assert_eq!(stream, b"GET /");
    }

    #[tokio::test]
    async fn v2_local_and_garbage() {
        let wire = v2_bytes(0x0, 0x00, &[]);
        let mut stream = &wire[..];
        assert_eq!(read_header(&mut stream).await.unwrap(), ProxyHeader::LOCAL);

        let mut garbage = &b"GET / HTTP/1.1\r\n"[..];
        assert!(matches!(
            read_header(&mut garbage).await,
            Err(ProxyProtocolError::Invalid(_))
        ));
    }
}
